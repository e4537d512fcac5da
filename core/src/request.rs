//! Inputs to the build and deploy operations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{MblConfig, DEFAULT_ENGINE_PORT};
use crate::error::{MblError, Result};

/// A single image build invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    /// Directory holding the manifest and sources
    pub source_path: PathBuf,
    /// Tag applied to the built image (never empty)
    pub image_tag: String,
    /// Build without the engine's layer cache
    pub force_rebuild: bool,
    /// Entry names excluded from the build context
    pub ignore_patterns: BTreeSet<String>,
    /// Allow emulation to be injected when the engine is foreign
    pub emulation: bool,
}

impl BuildRequest {
    pub fn new(source_path: impl Into<PathBuf>, image_tag: impl Into<String>) -> Result<Self> {
        let image_tag = image_tag.into();
        if image_tag.trim().is_empty() {
            return Err(MblError::MissingTag);
        }
        Ok(Self {
            source_path: source_path.into(),
            image_tag,
            force_rebuild: false,
            ignore_patterns: [".git".to_string()].into_iter().collect(),
            emulation: true,
        })
    }

    /// Build request for `source` using the configured tag and ignore list.
    pub fn from_config(source: &Path, config: &MblConfig) -> Result<Self> {
        let mut request = Self::new(source, config.image_name.clone())?;
        request.ignore_patterns = config.ignore.iter().cloned().collect();
        Ok(request)
    }

    /// Replace the image tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(MblError::MissingTag);
        }
        self.image_tag = tag;
        Ok(self)
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn emulation(mut self, enabled: bool) -> Self {
        self.emulation = enabled;
        self
    }
}

/// The device an application is deployed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub address: String,
    pub port: u16,
    pub container_name: String,
    pub image_name: String,
}

impl DeploymentTarget {
    /// Parse `host[:port]`, falling back to the configured engine port and
    /// application names.
    pub fn parse(address: &str, config: &MblConfig) -> Result<Self> {
        let (host, port) = split_host_port(address, config.engine_port)?;
        Ok(Self {
            address: host,
            port,
            container_name: config.container_name.clone(),
            image_name: config.image_name.clone(),
        })
    }

    /// `host:port` form used to reach the device's engine.
    pub fn engine_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Split `host[:port]`. Bracketed IPv6 literals (`[::1]:2375`) are accepted.
pub fn split_host_port(address: &str, default_port: u16) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(MblError::ConfigError("empty device address".into()));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| MblError::ConfigError(format!("invalid address: {address}")))?;
        (host, tail.strip_prefix(':'))
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            _ => (address, None),
        }
    };

    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| MblError::ConfigError(format!("invalid port in address: {address}")))?,
        None => default_port,
    };
    if host.is_empty() {
        return Err(MblError::ConfigError(format!("invalid address: {address}")));
    }
    Ok((host.to_string(), port))
}

impl Default for DeploymentTarget {
    fn default() -> Self {
        let config = MblConfig::default();
        Self {
            address: config.device_address,
            port: DEFAULT_ENGINE_PORT,
            container_name: config.container_name,
            image_name: config.image_name,
        }
    }
}
