//! Container engine abstraction.
//!
//! The build and deploy pipelines only talk to an [`Engine`]. The real
//! implementation speaks the Docker Engine HTTP API over a Unix socket or
//! TCP; tests substitute a recording fake.

mod client;
mod demux;
mod endpoint;
#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use mbl_core::error::Result;
use serde::{Deserialize, Serialize};

use crate::pipe::ByteStream;

pub use client::HttpEngine;
pub use demux::{demux_to, Demuxer, OutputFrame, StreamKind};
pub use endpoint::{ConnectionTarget, EngineEndpoint};

/// Engine identification returned by the version endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineVersion {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default, rename = "ApiVersion")]
    pub api_version: String,
}

/// Parameters for an image build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub tag: String,
    /// Ignore cached layers.
    pub no_cache: bool,
}

/// The subset of image metadata the pipelines need.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "Id")]
    pub id: String,
}

/// How an application container is created on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Share the device's network namespace.
    pub host_network: bool,
    pub privileged: bool,
}

impl ContainerSpec {
    /// Containers for device applications: host networking, privileged.
    pub fn application(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            host_network: true,
            privileged: true,
        }
    }
}

/// Operations the pipelines need from a container engine.
///
/// Streaming methods return the raw response body; failures reported
/// inside the body (build errors, load errors) are left to the caller.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Human-readable location of the engine, for messages.
    fn endpoint(&self) -> String;

    async fn version(&self) -> Result<EngineVersion>;

    /// Build an image from an uncompressed tar build context.
    async fn build_image(&self, context: ByteStream, options: &BuildOptions)
        -> Result<ByteStream>;

    /// Export an image as a saved-image tar stream.
    async fn export_image(&self, name: &str) -> Result<ByteStream>;

    /// Look up an image. `Ok(None)` when the engine does not know it.
    async fn inspect_image(&self, name: &str) -> Result<Option<ImageInfo>>;

    async fn remove_image(&self, id: &str, force: bool) -> Result<()>;

    /// Load a saved-image tar stream. Returns the engine's progress output.
    async fn load_image(&self, image: ByteStream) -> Result<ByteStream>;

    /// Create a container, returning its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    /// Attach to a container's output. The stream is multiplexed (see
    /// [`Demuxer`]) and ends when the container exits.
    async fn attach_container(&self, name: &str) -> Result<ByteStream>;

    /// A container's past output, and with `follow` its live output.
    async fn container_logs(&self, name: &str, follow: bool) -> Result<ByteStream>;
}
