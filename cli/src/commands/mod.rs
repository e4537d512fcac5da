//! CLI command definitions and dispatch.

mod build;
mod deploy;
mod info;
mod logs;
mod stop;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use mbl_core::{DeploymentTarget, MblConfig, MblError};
use mbl_runtime::{Engine, EngineEndpoint, HttpEngine};

/// mbl - build and deploy containerised applications to devices.
#[derive(Parser)]
#[command(name = "mbl", version, about)]
pub struct Cli {
    /// Configuration file (default: $MBL_CONFIG or <config dir>/mbl/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an application image and save it to a file
    Build(build::BuildArgs),
    /// Build an application and run it on a device
    Deploy(deploy::DeployArgs),
    /// Stop the application on a device
    Stop(stop::StopArgs),
    /// Print the application's output
    Logs(logs::LogsArgs),
    /// Show a container engine's version and architecture
    Info(info::InfoArgs),
}

/// Flags shared by the commands that build.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct BuildFlags {
    /// Rebuild without the engine's layer cache
    #[arg(short, long)]
    pub force: bool,

    /// Never inject emulation into the build
    #[arg(short = 'n', long = "no-emulation")]
    pub no_emulation: bool,

    /// Build on a remote engine (HOST[:PORT], or the configured remote host)
    #[arg(short, long, value_name = "HOST", num_args = 0..=1)]
    pub remote: Option<Option<String>>,
}

impl BuildFlags {
    /// The engine builds run on.
    pub fn build_endpoint(&self, config: &MblConfig) -> Result<EngineEndpoint, MblError> {
        match &self.remote {
            None => Ok(EngineEndpoint::socket(&config.engine_socket)),
            Some(Some(host)) => EngineEndpoint::remote(host, config.engine_port),
            Some(None) => match config.remote_host.as_deref() {
                Some(host) => EngineEndpoint::remote(host, config.engine_port),
                None => Err(MblError::ConfigError(
                    "--remote needs a host; none given and no remote_host configured".into(),
                )),
            },
        }
    }
}

/// The device at `address`, or the configured device.
pub(crate) fn device_target(
    address: Option<&str>,
    config: &MblConfig,
) -> Result<DeploymentTarget, MblError> {
    DeploymentTarget::parse(address.unwrap_or(&config.device_address), config)
}

pub(crate) fn engine_at(endpoint: EngineEndpoint) -> Arc<dyn Engine> {
    Arc::new(HttpEngine::new(endpoint))
}

/// Load the configuration and run the selected command.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = MblConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Build(args) => build::execute(args, &config).await,
        Command::Deploy(args) => deploy::execute(args, &config).await,
        Command::Stop(args) => stop::execute(args, &config).await,
        Command::Logs(args) => logs::execute(args, &config).await,
        Command::Info(args) => info::execute(args, &config).await,
    }
}
