//! The built-in queue chain: track, fetch, pull, build, push.

mod build;
mod fetch;
mod pull;
mod push;
mod track;

pub use build::BuildQueue;
pub use fetch::FetchQueue;
pub use pull::PullQueue;
pub use push::PushQueue;
pub use track::TrackQueue;
