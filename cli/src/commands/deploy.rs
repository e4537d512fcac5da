//! `mbl deploy` command - Build an application and run it on a device.
//!
//! A directory source is built first, on the local engine or on the
//! `--remote` one. A file source is taken to be a saved image and is sent
//! as is. Building on the device itself already leaves the new image in
//! place there, so no image is sent.

use std::path::{Path, PathBuf};

use clap::Args;
use mbl_core::event::events;
use mbl_core::{DeploymentTarget, EventEmitter, MblConfig, MblError};
use mbl_runtime::{
    pipe, ByteStream, DeviceSession, EngineEndpoint, ImageBuilder, ImageDeployer,
};

use super::build::build_request;
use super::{device_target, engine_at, BuildFlags};
use crate::output;

#[derive(Args)]
pub struct DeployArgs {
    /// Application directory, or a saved image file
    #[arg(default_value = ".")]
    pub source: PathBuf,

    /// Device address HOST[:PORT] (default: the configured device)
    pub address: Option<String>,

    #[command(flatten)]
    pub flags: BuildFlags,

    /// Return once the application has started instead of attaching to it
    #[arg(short, long)]
    pub detached: bool,
}

/// Where the image comes from.
#[derive(Debug, PartialEq)]
enum ImageSource {
    /// Build from a directory on the given engine.
    Build(EngineEndpoint),
    /// A saved image file.
    Archive(PathBuf),
}

pub async fn execute(args: DeployArgs, config: &MblConfig) -> Result<(), Box<dyn std::error::Error>> {
    let emitter = EventEmitter::default();
    let printer = output::print_events(emitter.subscribe());
    let result = run(args, config, emitter).await;
    let _ = printer.await;
    result
}

async fn run(
    args: DeployArgs,
    config: &MblConfig,
    emitter: EventEmitter,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = device_target(args.address.as_deref(), config)?;
    let device = EngineEndpoint::device(&target);

    let image = match image_source(&args.source, &args.flags, config)? {
        ImageSource::Archive(path) => {
            emitter.message(
                events::DEPLOY_SENDING,
                format!("Sending {} to {}", path.display(), device),
            );
            Some(open_archive(&path).await?)
        }
        ImageSource::Build(endpoint) => {
            let off_device = endpoint != device;
            let engine = engine_at(endpoint);
            let request = build_request(&args.source, None, &args.flags, config)?;
            let builder = ImageBuilder::new(engine.clone(), config).with_events(emitter.clone());
            let outcome = builder.build(&request, &mut tokio::io::stdout()).await?;

            if off_device {
                emitter.message(
                    events::DEPLOY_SENDING,
                    format!("Sending {} to {}", outcome.tag, device),
                );
                let deployer = ImageDeployer::new(engine).with_events(emitter.clone());
                Some(deployer.export(&outcome.tag).await?)
            } else {
                tracing::info!(tag = %outcome.tag, "Built on the device; no image transfer");
                None
            }
        }
    };

    replace_application(&target, device, image, !args.detached, emitter).await?;
    Ok(())
}

fn image_source(
    source: &Path,
    flags: &BuildFlags,
    config: &MblConfig,
) -> Result<ImageSource, MblError> {
    if source.is_dir() {
        Ok(ImageSource::Build(flags.build_endpoint(config)?))
    } else if source.is_file() {
        Ok(ImageSource::Archive(source.to_path_buf()))
    } else {
        Err(MblError::NotFound(source.to_path_buf()))
    }
}

async fn open_archive(path: &Path) -> Result<ByteStream, MblError> {
    let file = tokio::fs::File::open(path).await?;
    Ok(pipe::from_async_read(file))
}

async fn replace_application(
    target: &DeploymentTarget,
    device: EngineEndpoint,
    image: Option<ByteStream>,
    attach: bool,
    emitter: EventEmitter,
) -> Result<(), MblError> {
    let session = DeviceSession::new(engine_at(device), target, emitter);
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    session.replace(image, attach, &mut stdout, &mut stderr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_source_builds() {
        let dir = TempDir::new().unwrap();
        let source = image_source(dir.path(), &BuildFlags::default(), &MblConfig::default());
        assert_eq!(
            source.unwrap(),
            ImageSource::Build(EngineEndpoint::socket("/var/run/docker.sock"))
        );
    }

    #[test]
    fn test_file_source_is_archive() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("mbed-image.tar");
        std::fs::write(&file, b"tar").unwrap();

        let source = image_source(&file, &BuildFlags::default(), &MblConfig::default());
        assert_eq!(source.unwrap(), ImageSource::Archive(file));
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let source = image_source(&missing, &BuildFlags::default(), &MblConfig::default());
        assert!(matches!(source, Err(MblError::NotFound(p)) if p == missing));
    }

    #[test]
    fn test_remote_build_on_device_needs_no_transfer() {
        let dir = TempDir::new().unwrap();
        let config = MblConfig::default();
        let target = device_target(Some("10.0.0.2"), &config).unwrap();
        let flags = BuildFlags {
            remote: Some(Some("10.0.0.2".to_string())),
            ..Default::default()
        };

        let ImageSource::Build(endpoint) = image_source(dir.path(), &flags, &config).unwrap()
        else {
            panic!("expected a build");
        };
        assert_eq!(endpoint, EngineEndpoint::device(&target));
    }

    #[tokio::test]
    async fn test_open_archive_streams_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("image.tar");
        std::fs::write(&file, b"saved image").unwrap();

        let stream = open_archive(&file).await.unwrap();
        assert_eq!(pipe::collect(stream).await.unwrap(), b"saved image");
    }
}
