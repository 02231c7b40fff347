//! strata CLI — declarative, content-addressed builds of software stacks.

// CLI binary talks to the terminal on purpose
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;
mod context;

use clap::Parser;
use cli::{Cli, Command, EXIT_FAILURE, EXIT_OK};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Invalid invocations exit with code 2 via clap
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupt received, draining in-flight work");
                cancel.cancel();
            }
        });
    }

    let exit_code = match run(&cli, cancel).await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            EXIT_FAILURE
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: &Cli, cancel: CancellationToken) -> miette::Result<i32> {
    let invocation = context::Invocation::load(cli, cancel)?;
    match &cli.command {
        Command::Build(args) => commands::build::run(&invocation, args).await,
        Command::Fetch(args) => commands::fetch::run(&invocation, args).await,
        Command::Track(args) => commands::track::run(&invocation, args).await,
        Command::Pull(args) => commands::pull::run(&invocation, args).await,
        Command::Push(args) => commands::push::run(&invocation, args).await,
        Command::Show(args) => commands::show::run(&invocation, args),
        Command::Shell(args) => commands::shell::run(&invocation, args).await,
    }
    .map(|success| if success { EXIT_OK } else { EXIT_FAILURE })
}
