//! mbl Core - Foundational Types
//!
//! Error taxonomy, configuration, progress events and the request types
//! shared by the build-and-deploy runtime and the command line.

pub mod config;
pub mod error;
pub mod event;
pub mod request;

// Re-export commonly used types
pub use config::MblConfig;
pub use error::{MblError, Result};
pub use event::{EventEmitter, ProgressEvent};
pub use request::{BuildRequest, DeploymentTarget};

/// mbl version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
