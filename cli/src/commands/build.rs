//! `mbl build` command - Build an application image and save it to a file.

use std::path::{Path, PathBuf};

use clap::Args;
use mbl_core::{BuildRequest, EventEmitter, MblConfig};
use mbl_runtime::{BuildOutcome, ImageBuilder, ImageDeployer, DEFAULT_IMAGE_FILE};

use super::{engine_at, BuildFlags};
use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// Application directory (contains the Dockerfile)
    #[arg(default_value = ".")]
    pub source: PathBuf,

    /// File (or directory) the image is saved to
    #[arg(default_value = DEFAULT_IMAGE_FILE)]
    pub destination: PathBuf,

    #[command(flatten)]
    pub flags: BuildFlags,

    /// Tag for the image (default: the configured image name)
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,
}

pub async fn execute(args: BuildArgs, config: &MblConfig) -> Result<(), Box<dyn std::error::Error>> {
    let events = EventEmitter::default();
    let printer = output::print_events(events.subscribe());
    let result = run(args, config, events).await;
    let _ = printer.await;

    let path = result?;
    let size = tokio::fs::metadata(&path).await?.len();
    println!("Image saved to {} ({})", path.display(), output::format_bytes(size));
    Ok(())
}

async fn run(
    args: BuildArgs,
    config: &MblConfig,
    events: EventEmitter,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let endpoint = args.flags.build_endpoint(config)?;
    let engine = engine_at(endpoint);

    let request = build_request(&args.source, args.tag, &args.flags, config)?;
    let builder = ImageBuilder::new(engine.clone(), config).with_events(events.clone());
    let mut stdout = tokio::io::stdout();
    let BuildOutcome { tag, .. } = builder.build(&request, &mut stdout).await?;

    let deployer = ImageDeployer::new(engine).with_events(events);
    let saved = deployer
        .deploy_stream(&tag, Some(&args.destination))
        .await?
        .ok_or("image was not saved")?;
    Ok(saved)
}

/// The build request for a source directory and the command's flags.
pub(super) fn build_request(
    source: &Path,
    tag: Option<String>,
    flags: &BuildFlags,
    config: &MblConfig,
) -> Result<BuildRequest, mbl_core::MblError> {
    let mut request = BuildRequest::from_config(source, config)?
        .force(flags.force)
        .emulation(!flags.no_emulation);
    if let Some(tag) = tag {
        request = request.with_tag(tag)?;
    }
    Ok(request)
}
