use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MblError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MBL_CONFIG";

/// Local engine socket.
pub const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Unencrypted engine TCP port.
pub const DEFAULT_ENGINE_PORT: u16 = 2375;

/// Address devices advertise themselves under.
pub const DEFAULT_DEVICE_ADDRESS: &str = "resin.local";

/// Image tag and container name used for the application.
pub const DEFAULT_APP_NAME: &str = "mbed-app";

/// Native architecture of target devices, as reported by the engine.
pub const DEFAULT_TARGET_ARCH: &str = "arm64";

/// Static user-mode interpreter used for foreign-architecture builds.
pub const DEFAULT_INTERPRETER_URL: &str =
    "https://github.com/resin-io/qemu/releases/download/v2.5.50-resin-execve/qemu-execve.gz";

/// mbl configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MblConfig {
    /// Local engine socket path
    pub engine_socket: PathBuf,

    /// Default engine port for `host` addresses without one
    pub engine_port: u16,

    /// Build host used when `--remote` is given without a value
    pub remote_host: Option<String>,

    /// Device to deploy to when no address is given
    pub device_address: String,

    /// Image tag to build and deploy
    pub image_name: String,

    /// Container name on the device
    pub container_name: String,

    /// Architecture that needs no emulation
    pub target_arch: String,

    /// Where the emulation interpreter is downloaded from
    pub interpreter_url: String,

    /// Names excluded from the build context
    pub ignore: Vec<String>,
}

impl Default for MblConfig {
    fn default() -> Self {
        Self {
            engine_socket: PathBuf::from(DEFAULT_ENGINE_SOCKET),
            engine_port: DEFAULT_ENGINE_PORT,
            remote_host: None,
            device_address: DEFAULT_DEVICE_ADDRESS.to_string(),
            image_name: DEFAULT_APP_NAME.to_string(),
            container_name: DEFAULT_APP_NAME.to_string(),
            target_arch: DEFAULT_TARGET_ARCH.to_string(),
            interpreter_url: DEFAULT_INTERPRETER_URL.to_string(),
            ignore: vec![".git".to_string()],
        }
    }
}

impl MblConfig {
    /// Default config file location (`<config_dir>/mbl/config.yaml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mbl")
            .join("config.yaml")
    }

    /// Resolve which file to load: an explicit path, then `$MBL_CONFIG`,
    /// then the default location.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::default_path(),
        }
    }

    /// Load and validate the configuration.
    ///
    /// A missing file is not an error: defaults apply. An explicitly named
    /// file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(explicit);

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config = Self::from_yaml(&content)?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            config
        } else if explicit.is_some() {
            return Err(MblError::ConfigError(format!(
                "config file {} does not exist",
                path.display()
            )));
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML; absent fields take their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reject values no command could work with.
    pub fn validate(&self) -> Result<()> {
        if self.image_name.trim().is_empty() {
            return Err(MblError::ConfigError("image_name must not be empty".into()));
        }
        if self.container_name.trim().is_empty() {
            return Err(MblError::ConfigError(
                "container_name must not be empty".into(),
            ));
        }
        if self.engine_port == 0 {
            return Err(MblError::ConfigError("engine_port must not be 0".into()));
        }
        if self.target_arch.trim().is_empty() {
            return Err(MblError::ConfigError("target_arch must not be empty".into()));
        }
        if !self.interpreter_url.starts_with("http://")
            && !self.interpreter_url.starts_with("https://")
        {
            return Err(MblError::ConfigError(format!(
                "interpreter_url must be an http(s) URL: {}",
                self.interpreter_url
            )));
        }
        Ok(())
    }
}
