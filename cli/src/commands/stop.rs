//! `mbl stop` command - Stop the application on a device.

use clap::Args;
use mbl_core::{EventEmitter, MblConfig};
use mbl_runtime::{DeviceSession, EngineEndpoint};

use super::{device_target, engine_at};
use crate::output;

#[derive(Args)]
pub struct StopArgs {
    /// Device address HOST[:PORT] (default: the configured device)
    pub address: Option<String>,
}

pub async fn execute(args: StopArgs, config: &MblConfig) -> Result<(), Box<dyn std::error::Error>> {
    let target = device_target(args.address.as_deref(), config)?;
    let engine = engine_at(EngineEndpoint::device(&target));

    let emitter = EventEmitter::default();
    let printer = output::print_events(emitter.subscribe());
    let result = DeviceSession::new(engine, &target, emitter)
        .stop_application()
        .await;
    let _ = printer.await;

    result?;
    println!("{}", target.container_name);
    Ok(())
}
