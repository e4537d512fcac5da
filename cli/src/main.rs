//! mbl CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use mbl_core::MblError;
use tracing_subscriber::EnvFilter;

use mbl_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Dropping the command future closes its engine connections. Returning
    // (rather than exiting) lets staged files clean up after themselves.
    let result = tokio::select! {
        result = dispatch(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(MblError::Interrupted.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
