//! Device session controller.
//!
//! Replaces the application container on a device:
//!
//! ```text
//! Idle → Stopping → Removing → (ImageSwap) → Creating → Starting → (Attaching) → Done
//!                                 any step failure → Failed
//! ```
//!
//! Teardown of a container that does not exist or is not running is a
//! no-op. There is no rollback: a failure leaves the device without the
//! application container.

use std::sync::Arc;

use futures::StreamExt;
use mbl_core::error::{MblError, Result};
use mbl_core::event::{events, EventEmitter};
use mbl_core::DeploymentTarget;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio::sync::RwLock;

use crate::engine::{demux_to, ContainerSpec, Engine};
use crate::pipe::ByteStream;
use crate::prettify::PrettyWriter;

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing done yet
    Idle,

    /// Stopping the running application container
    Stopping,

    /// Removing the old application container
    Removing,

    /// Replacing the application image
    ImageSwap,

    /// Creating the new container
    Creating,

    /// Starting the new container
    Starting,

    /// Streaming the container's output
    Attaching,

    /// Sequence completed
    Done,

    /// A step failed; the sequence was abandoned
    Failed,
}

impl SessionState {
    /// Progress event key announcing this state.
    pub fn event_key(self) -> Option<&'static str> {
        match self {
            SessionState::Idle => None,
            SessionState::Stopping => Some(events::SESSION_STOPPING),
            SessionState::Removing => Some(events::SESSION_REMOVING),
            SessionState::ImageSwap => Some(events::SESSION_IMAGE_SWAP),
            SessionState::Creating => Some(events::SESSION_CREATING),
            SessionState::Starting => Some(events::SESSION_STARTING),
            SessionState::Attaching => Some(events::SESSION_ATTACHING),
            SessionState::Done => Some(events::SESSION_DONE),
            SessionState::Failed => Some(events::SESSION_FAILED),
        }
    }
}

/// Controls the application container on one device engine.
pub struct DeviceSession {
    engine: Arc<dyn Engine>,
    container_name: String,
    image_name: String,
    state: Arc<RwLock<SessionState>>,
    event_emitter: EventEmitter,
}

impl DeviceSession {
    pub fn new(engine: Arc<dyn Engine>, target: &DeploymentTarget, event_emitter: EventEmitter) -> Self {
        Self {
            engine,
            container_name: target.container_name.clone(),
            image_name: target.image_name.clone(),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            event_emitter,
        }
    }

    /// Get current state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Replace the application container.
    ///
    /// With `image`, the device's copy of the application image is deleted
    /// and the stream is loaded in its place. With `attach`, the call
    /// returns only when the container's output ends.
    pub async fn replace<O, E>(
        &self,
        image: Option<ByteStream>,
        attach: bool,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<()>
    where
        O: AsyncWrite + Unpin + Send + ?Sized,
        E: AsyncWrite + Unpin + Send + ?Sized,
    {
        let result = self.run(image, attach, stdout, stderr).await;
        if let Err(e) = &result {
            let from = self.state().await;
            tracing::warn!(state = ?from, error = %e, "Device session failed");
            self.transition(SessionState::Failed, format!("Deployment failed: {e}"))
                .await;
        }
        result
    }

    async fn run<O, E>(
        &self,
        image: Option<ByteStream>,
        attach: bool,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<()>
    where
        O: AsyncWrite + Unpin + Send + ?Sized,
        E: AsyncWrite + Unpin + Send + ?Sized,
    {
        let name = self.container_name.clone();

        self.transition(SessionState::Stopping, format!("Stopping {name}"))
            .await;
        tolerate_absent(self.engine.stop_container(&name).await, "stop", &name)?;

        self.transition(SessionState::Removing, format!("Removing {name}"))
            .await;
        tolerate_absent(
            self.engine.remove_container(&name, true).await,
            "remove",
            &name,
        )?;

        if let Some(image) = image {
            self.transition(
                SessionState::ImageSwap,
                format!("Replacing image {}", self.image_name),
            )
            .await;
            self.swap_image(image, stdout).await?;
        }

        self.transition(SessionState::Creating, format!("Creating {name}"))
            .await;
        let spec = ContainerSpec::application(name.clone(), self.image_name.clone());
        let id = self.engine.create_container(&spec).await?;
        tracing::debug!(container = %name, id = %id, "Container created");

        self.transition(SessionState::Starting, format!("Starting {name}"))
            .await;
        self.engine.start_container(&name).await?;

        if attach {
            self.transition(SessionState::Attaching, format!("Attached to {name}"))
                .await;
            let output = self.engine.attach_container(&name).await?;
            demux_to(output, stdout, stderr).await?;
        }

        self.transition(SessionState::Done, format!("{name} deployed"))
            .await;
        Ok(())
    }

    async fn swap_image<O>(&self, image: ByteStream, progress: &mut O) -> Result<()>
    where
        O: AsyncWrite + Unpin + Send + ?Sized,
    {
        if let Some(old) = self.engine.inspect_image(&self.image_name).await? {
            tolerate_absent(
                self.engine.remove_image(&old.id, true).await,
                "remove image",
                &old.id,
            )?;
        }

        let mut output = self.engine.load_image(image).await?;
        let mut writer = PrettyWriter::new(progress);
        while let Some(chunk) = output.next().await {
            writer.write_chunk(&chunk?).await?;
        }
        let summary = writer.finish().await?;
        if let Some(message) = summary.error {
            return Err(MblError::Other(format!("image load failed: {message}")));
        }
        Ok(())
    }

    /// Stop the application container, if it runs.
    pub async fn stop_application(&self) -> Result<()> {
        let name = &self.container_name;
        self.transition(SessionState::Stopping, format!("Stopping {name}"))
            .await;
        let result = tolerate_absent(self.engine.stop_container(name).await, "stop", name);
        match &result {
            Ok(()) => {
                self.transition(SessionState::Done, format!("{name} stopped"))
                    .await
            }
            Err(e) => {
                self.transition(SessionState::Failed, format!("Stop failed: {e}"))
                    .await
            }
        }
        result
    }

    /// Copy the application container's output to `stdout`/`stderr`. With
    /// `follow`, keeps streaming until the container exits.
    pub async fn logs<O, E>(&self, follow: bool, stdout: &mut O, stderr: &mut E) -> Result<()>
    where
        O: AsyncWrite + Unpin + Send + ?Sized,
        E: AsyncWrite + Unpin + Send + ?Sized,
    {
        let output = self
            .engine
            .container_logs(&self.container_name, follow)
            .await?;
        demux_to(output, stdout, stderr).await
    }

    async fn transition(&self, next: SessionState, message: String) {
        *self.state.write().await = next;
        tracing::info!(state = ?next, "{}", message);
        if let Some(key) = next.event_key() {
            self.event_emitter.message(key, message);
        }
    }
}

/// Treat "no such container" and "not running" as success.
fn tolerate_absent(result: Result<()>, action: &str, name: &str) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() || e.is_not_modified() => {
            tracing::warn!(action, name, reason = %e, "Nothing to do");
            Ok(())
        }
        other => other,
    }
}
