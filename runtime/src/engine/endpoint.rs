use std::fmt;
use std::path::PathBuf;

use mbl_core::error::{MblError, Result};
use mbl_core::request::split_host_port;
use mbl_core::{DeploymentTarget, MblConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

/// A connected byte stream to an engine.
pub(crate) trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Where an engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Socket(PathBuf),
    Tcp { host: String, port: u16 },
}

/// Address of a container engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    pub target: ConnectionTarget,
}

impl EngineEndpoint {
    pub fn socket(path: impl Into<PathBuf>) -> Self {
        Self {
            target: ConnectionTarget::Socket(path.into()),
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            target: ConnectionTarget::Tcp {
                host: host.into(),
                port,
            },
        }
    }

    /// Parse `host[:port]`, defaulting the port.
    pub fn remote(address: &str, default_port: u16) -> Result<Self> {
        let (host, port) = split_host_port(address, default_port)?;
        Ok(Self::tcp(host, port))
    }

    /// The engine builds run against: the configured remote host, or the
    /// local socket.
    pub fn from_config(config: &MblConfig) -> Result<Self> {
        match config.remote_host.as_deref() {
            Some(host) => Self::remote(host, config.engine_port),
            None => Ok(Self::socket(&config.engine_socket)),
        }
    }

    /// The engine running on a device.
    pub fn device(target: &DeploymentTarget) -> Self {
        Self::tcp(target.address.clone(), target.port)
    }

    /// Value for the HTTP `Host` header.
    pub(crate) fn host_header(&self) -> String {
        match &self.target {
            // The socket has no authority; the engine accepts any name.
            ConnectionTarget::Socket(_) => "docker".to_string(),
            ConnectionTarget::Tcp { host, port } if host.contains(':') => {
                format!("[{host}]:{port}")
            }
            ConnectionTarget::Tcp { host, port } => format!("{host}:{port}"),
        }
    }

    pub(crate) async fn connect(&self) -> Result<Box<dyn Transport>> {
        let stream: Box<dyn Transport> = match &self.target {
            ConnectionTarget::Socket(path) => Box::new(
                UnixStream::connect(path)
                    .await
                    .map_err(|e| self.unavailable(e))?,
            ),
            ConnectionTarget::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| self.unavailable(e))?;
                stream.set_nodelay(true).map_err(|e| self.unavailable(e))?;
                Box::new(stream)
            }
        };
        tracing::debug!(endpoint = %self, "Connected to engine");
        Ok(stream)
    }

    fn unavailable(&self, err: std::io::Error) -> MblError {
        MblError::EngineUnavailable {
            endpoint: self.to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            ConnectionTarget::Socket(path) => write!(f, "unix://{}", path.display()),
            ConnectionTarget::Tcp { .. } => write!(f, "tcp://{}", self.host_header()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            EngineEndpoint::socket("/var/run/docker.sock").to_string(),
            "unix:///var/run/docker.sock"
        );
        assert_eq!(
            EngineEndpoint::tcp("resin.local", 2375).to_string(),
            "tcp://resin.local:2375"
        );
        assert_eq!(EngineEndpoint::tcp("::1", 2375).to_string(), "tcp://[::1]:2375");
    }

    #[test]
    fn test_remote_defaults_port() {
        let endpoint = EngineEndpoint::remote("10.0.0.2", 2375).unwrap();
        assert_eq!(endpoint, EngineEndpoint::tcp("10.0.0.2", 2375));

        let endpoint = EngineEndpoint::remote("10.0.0.2:4000", 2375).unwrap();
        assert_eq!(endpoint, EngineEndpoint::tcp("10.0.0.2", 4000));
    }

    #[test]
    fn test_from_config() {
        let mut config = MblConfig::default();
        assert!(matches!(
            EngineEndpoint::from_config(&config).unwrap().target,
            ConnectionTarget::Socket(_)
        ));

        config.remote_host = Some("builder.lan".to_string());
        assert_eq!(
            EngineEndpoint::from_config(&config).unwrap(),
            EngineEndpoint::tcp("builder.lan", config.engine_port)
        );
    }

    #[test]
    fn test_host_header() {
        assert_eq!(EngineEndpoint::socket("/x").host_header(), "docker");
        assert_eq!(EngineEndpoint::tcp("dev", 2375).host_header(), "dev:2375");
    }

    #[tokio::test]
    async fn test_connect_missing_socket_is_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let endpoint = EngineEndpoint::socket(dir.path().join("engine.sock"));
        let result = endpoint.connect().await;
        assert!(matches!(result, Err(MblError::EngineUnavailable { .. })));
    }
}
