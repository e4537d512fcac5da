//! Image deployer: image on an engine → saved image stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mbl_core::error::{MblError, Result};
use mbl_core::event::{events, EventEmitter};

use crate::engine::Engine;
use crate::pipe::{self, ByteStream};

/// File name used when a deploy destination is a directory.
pub const DEFAULT_IMAGE_FILE: &str = "mbed-image.tar";

/// Where a saved image lands for a given destination argument.
pub fn resolve_destination(destination: &Path) -> PathBuf {
    let names_directory = destination.is_dir()
        || destination
            .to_str()
            .is_some_and(|s| s.ends_with(std::path::MAIN_SEPARATOR) || s.ends_with('/'));
    if names_directory {
        destination.join(DEFAULT_IMAGE_FILE)
    } else {
        destination.to_path_buf()
    }
}

/// Retrieves built images from an engine.
pub struct ImageDeployer {
    engine: Arc<dyn Engine>,
    events: EventEmitter,
}

impl ImageDeployer {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Open the saved-image stream for `tag`.
    pub async fn export(&self, tag: &str) -> Result<ByteStream> {
        if tag.trim().is_empty() {
            return Err(MblError::MissingTag);
        }
        if self.engine.inspect_image(tag).await?.is_none() {
            return Err(MblError::ImageNotFound(tag.to_string()));
        }
        self.engine.export_image(tag).await.map_err(|e| {
            if e.is_not_found() {
                MblError::ImageNotFound(tag.to_string())
            } else {
                e
            }
        })
    }

    /// Stream the image for `tag` to `destination`, or discard it when no
    /// destination is given. Returns the file written, if any.
    pub async fn deploy_stream(&self, tag: &str, destination: Option<&Path>) -> Result<Option<PathBuf>> {
        let stream = self.export(tag).await?;

        let Some(destination) = destination else {
            let size = pipe::copy_to(stream, &mut tokio::io::sink()).await?;
            tracing::debug!(tag, size, "Image stream discarded");
            return Ok(None);
        };

        let path = resolve_destination(destination);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.events.message(
            events::DEPLOY_SAVING,
            format!("Saving {} to {}", tag, path.display()),
        );
        let mut file = tokio::fs::File::create(&path).await?;
        let size = pipe::copy_to(stream, &mut file).await?;
        file.sync_all().await?;

        self.events.message(
            events::DEPLOY_SAVED,
            format!("Saved {} ({} bytes) to {}", tag, size, path.display()),
        );
        tracing::info!(tag, size, path = %path.display(), "Image saved");
        Ok(Some(path))
    }
}
