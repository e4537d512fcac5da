use std::path::PathBuf;

use thiserror::Error;

/// mbl error types
#[derive(Error, Debug)]
pub enum MblError {
    /// Source directory is not a buildable application
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// A path the operation needs does not exist
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Container engine could not be reached
    #[error("Engine unavailable at {endpoint}: {message}")]
    EngineUnavailable { endpoint: String, message: String },

    /// Emulation interpreter could not be fetched or cached
    #[error("Provisioning failed: {url} - {message}")]
    Provisioning { url: String, message: String },

    /// An image operation was requested without a tag
    #[error("No image tag specified")]
    MissingTag,

    /// The engine has no image for the requested tag
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// The engine answered a request with a non-success status
    #[error("Engine error: {status} - {message}")]
    Engine { status: u16, message: String },

    /// The engine reported a failure event while building
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// The engine connection failed mid-request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The command was cancelled by the user
    #[error("Interrupted")]
    Interrupted,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MblError {
    /// The engine reported that the target object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MblError::Engine { status: 404, .. })
    }

    /// The engine reported that the request changed nothing (e.g. stopping
    /// a container that is not running).
    pub fn is_not_modified(&self) -> bool {
        matches!(self, MblError::Engine { status: 304, .. })
    }

    /// The consuming side of a stream went away before the producer finished.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, MblError::IoError(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

impl From<serde_json::Error> for MblError {
    fn from(err: serde_json::Error) -> Self {
        MblError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for MblError {
    fn from(err: serde_yaml::Error) -> Self {
        MblError::SerializationError(err.to_string())
    }
}

/// Result type alias for mbl operations
pub type Result<T> = std::result::Result<T, MblError>;
