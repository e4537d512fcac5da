//! mbl Runtime - build and deploy pipeline.
//!
//! Packs application sources into build contexts, injects emulation for
//! foreign-architecture engines, drives image builds, and replaces the
//! application container on devices through the container engine API.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod builder;
pub mod deployer;
pub mod emulation;
pub mod engine;
pub mod pipe;
pub mod prettify;
pub mod session;

// Re-export common types
pub use archive::{pack, rewrite_entry, rewrite_manifest, ArchiveStream, IgnoreList};
pub use builder::{BuildOutcome, ImageBuilder};
pub use deployer::{resolve_destination, ImageDeployer, DEFAULT_IMAGE_FILE};
pub use emulation::{EmulationProvisioner, EmulationState, Fetcher, HttpFetcher};
pub use engine::{
    BuildOptions, ConnectionTarget, ContainerSpec, Engine, EngineEndpoint, EngineVersion,
    HttpEngine, ImageInfo,
};
pub use pipe::ByteStream;
pub use prettify::{prettify_chunk, PrettyWriter};
pub use session::{DeviceSession, SessionState};

/// mbl Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
