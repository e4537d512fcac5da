//! Image builder: source directory → image on an engine.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use mbl_core::error::{MblError, Result};
use mbl_core::event::{events, EventEmitter};
use mbl_core::{BuildRequest, MblConfig};
use tokio::io::AsyncWrite;

use crate::archive::{pack, rewrite_entry, rewrite_manifest, IgnoreList, MANIFEST_FILE};
use crate::emulation::{
    interpreter_context_path, is_staging_file, EmulationProvisioner, Fetcher, HttpFetcher,
};
use crate::engine::{BuildOptions, Engine};
use crate::prettify::PrettyWriter;

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub tag: String,
    /// Image ID announced by the engine, when it reports one.
    pub image_id: Option<String>,
    pub emulated: bool,
}

/// Builds images from application source directories.
///
/// Builds of the same tag must not run concurrently; nothing here
/// serialises them.
pub struct ImageBuilder<F = HttpFetcher> {
    engine: Arc<dyn Engine>,
    provisioner: EmulationProvisioner<F>,
    events: EventEmitter,
}

impl ImageBuilder<HttpFetcher> {
    pub fn new(engine: Arc<dyn Engine>, config: &MblConfig) -> Self {
        let provisioner = EmulationProvisioner::new()
            .url(config.interpreter_url.clone())
            .target_arch(config.target_arch.clone());
        Self::with_provisioner(engine, provisioner)
    }
}

impl<F: Fetcher> ImageBuilder<F> {
    pub fn with_provisioner(engine: Arc<dyn Engine>, provisioner: EmulationProvisioner<F>) -> Self {
        Self {
            engine,
            provisioner,
            events: EventEmitter::default(),
        }
    }

    /// Publish phase events on `events` instead of a private channel.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Build `request` on the engine, writing readable build output to
    /// `output`.
    pub async fn build<W>(&self, request: &BuildRequest, output: &mut W) -> Result<BuildOutcome>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let source = &request.source_path;
        let manifest = source.join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Err(MblError::InvalidSource(format!(
                "no {} found in {}",
                MANIFEST_FILE,
                source.display()
            )));
        }

        self.events.message(
            events::BUILD_STARTED,
            format!("Building {} from {}", request.image_tag, source.display()),
        );
        tracing::info!(tag = %request.image_tag, source = %source.display(), "Starting build");

        let version = self.engine.version().await.map_err(|e| match e {
            e @ MblError::EngineUnavailable { .. } => e,
            other => MblError::EngineUnavailable {
                endpoint: self.engine.endpoint(),
                message: other.to_string(),
            },
        })?;

        let emulated = request.emulation && self.provisioner.requires(&version.arch);
        if emulated {
            // Reject an unusable manifest before downloading anything.
            let content = tokio::fs::read_to_string(&manifest).await?;
            rewrite_manifest(&content, &interpreter_context_path())?;

            self.events.message(
                events::BUILD_EMULATION,
                format!("Engine architecture is {}; building with emulation", version.arch),
            );
            self.provisioner.prepare_for_arch(&version.arch, source).await?;
        }

        let ignore = IgnoreList::new(request.ignore_patterns.iter().cloned());
        let mut archive = pack(source, move |path: &Path| {
            ignore.matches(path) || is_staging_file(path)
        })?;
        if emulated {
            let interpreter = interpreter_context_path();
            archive = rewrite_entry(archive, MANIFEST_FILE, move |content| {
                rewrite_manifest(&content, &interpreter)
            });
        }
        let (context, worker) = archive.into_parts();

        self.events.message(
            events::BUILD_SUBMITTED,
            format!("Sending build context to {}", self.engine.endpoint()),
        );
        let options = BuildOptions {
            tag: request.image_tag.clone(),
            no_cache: request.force_rebuild,
        };
        let mut progress = match self.engine.build_image(context, &options).await {
            Ok(progress) => progress,
            Err(e) => {
                // The engine gave up on the upload; a context failure is
                // the more useful report.
                return Err(match worker.wait().await {
                    Err(cause) if !cause.is_broken_pipe() => cause,
                    _ => e,
                });
            }
        };

        let mut writer = PrettyWriter::new(output);
        let mut transfer_error = None;
        while let Some(chunk) = progress.next().await {
            match chunk {
                Ok(chunk) => writer.write_chunk(&chunk).await?,
                Err(e) => {
                    transfer_error = Some(e);
                    break;
                }
            }
        }
        let summary = writer.finish().await?;

        worker.wait().await?;
        if let Some(e) = transfer_error {
            return Err(MblError::Transport(e.to_string()));
        }
        if let Some(message) = summary.error {
            tracing::warn!(tag = %request.image_tag, error = %message, "Engine reported build failure");
            return Err(MblError::BuildFailed(message));
        }

        self.events.message(
            events::BUILD_COMPLETED,
            format!("Built {}", request.image_tag),
        );
        tracing::info!(tag = %request.image_tag, image_id = ?summary.image_id, "Build completed");

        Ok(BuildOutcome {
            tag: request.image_tag.clone(),
            image_id: summary.image_id,
            emulated,
        })
    }
}
