//! `mbl logs` command - Print the application's output.

use clap::Args;
use mbl_core::{EventEmitter, MblConfig};
use mbl_runtime::{DeviceSession, EngineEndpoint};

use super::{device_target, engine_at};

#[derive(Args)]
pub struct LogsArgs {
    /// Device address HOST[:PORT] (default: the configured device)
    pub address: Option<String>,

    /// Follow log output
    #[arg(long)]
    pub follow: bool,
}

pub async fn execute(args: LogsArgs, config: &MblConfig) -> Result<(), Box<dyn std::error::Error>> {
    let target = device_target(args.address.as_deref(), config)?;
    let engine = engine_at(EngineEndpoint::device(&target));
    let session = DeviceSession::new(engine, &target, EventEmitter::default());

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    session.logs(args.follow, &mut stdout, &mut stderr).await?;
    Ok(())
}
