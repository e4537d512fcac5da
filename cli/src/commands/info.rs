//! `mbl info` command - Show a container engine's version and architecture.

use std::sync::Arc;

use clap::Args;
use mbl_core::MblConfig;
use mbl_runtime::emulation::requires_emulation;
use mbl_runtime::{Engine, EngineEndpoint, EngineVersion, HttpEngine};

use super::{device_target, engine_at};
use crate::output;

#[derive(Args)]
pub struct InfoArgs {
    /// Device address HOST[:PORT] (default: the build engine)
    pub address: Option<String>,
}

pub async fn execute(args: InfoArgs, config: &MblConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine: Arc<dyn Engine> = match args.address.as_deref() {
        Some(address) => engine_at(EngineEndpoint::device(&device_target(Some(address), config)?)),
        None => Arc::new(HttpEngine::from_config(config)?),
    };
    let version = engine.version().await?;

    println!("{}", render(&engine.endpoint(), &version, config));
    Ok(())
}

fn render(endpoint: &str, version: &EngineVersion, config: &MblConfig) -> String {
    let emulation = if requires_emulation(&version.arch, &config.target_arch) {
        "required"
    } else {
        "not required"
    };

    let mut table = output::new_table(&["ENDPOINT", "VERSION", "API", "OS", "ARCH", "EMULATION"]);
    table.add_row([
        endpoint,
        version.version.as_str(),
        version.api_version.as_str(),
        version.os.as_str(),
        version.arch.as_str(),
        emulation,
    ]);
    table.to_string()
}
