//! Chroot build sandbox.
//!
//! A sandbox runs one command list against a constructed root filesystem
//! with deterministic mounts, environment and working directory. Sandboxes
//! are transient: one is assembled for each build and torn down on every
//! exit path, with all acquired mounts, device nodes and temporary
//! directories released in reverse acquisition order.
//!
//! Assembly requires privileges (`chroot`, `mount`, `mknod`); failures are
//! reported as structured errors that distinguish missing permissions from
//! other I/O problems. Network isolation is best-effort only: no
//! `resolv.conf` is staged into the rootfs, and nothing further is
//! attempted.

mod cleanup;
mod devices;
mod error;
mod mount;
mod run;

pub use cleanup::CleanupStack;
pub use devices::DEVICES;
pub use error::{Error, Result};
pub use mount::MountMap;
pub use run::{MarkedDirectory, Sandbox, SandboxFlags};
