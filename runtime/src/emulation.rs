//! Cross-architecture build emulation.
//!
//! Images target arm64 devices. When the build engine runs on another
//! architecture, build steps execute under a user-mode emulator that is
//! downloaded once into the build directory and copied into the image by
//! the rewritten manifest.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use mbl_core::config::{DEFAULT_INTERPRETER_URL, DEFAULT_TARGET_ARCH};
use mbl_core::error::{MblError, Result};
use sha2::{Digest, Sha256};

use crate::engine::Engine;
use crate::pipe::{self, ByteStream, CHUNK_SIZE};

/// Directory inside the build context holding tooling.
pub const TOOLS_DIR: &str = ".mbed";

/// File name of the cached interpreter.
pub const INTERPRETER_NAME: &str = "qemu-execve";

/// Name prefix of partial downloads inside [`TOOLS_DIR`]. A download cut
/// short by an interrupt can leave one behind.
pub const STAGING_PREFIX: &str = ".staging-";

/// Build-context-relative path of the interpreter, as the manifest sees it.
pub fn interpreter_context_path() -> String {
    format!("{TOOLS_DIR}/{INTERPRETER_NAME}")
}

/// Normalise architecture names reported by engines.
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "aarch64" | "arm64v8" => "arm64",
        "x86_64" | "x86-64" => "amd64",
        other => other,
    }
}

/// Whether an engine reporting `engine_arch` needs emulation to build for
/// `target_arch`.
pub fn requires_emulation(engine_arch: &str, target_arch: &str) -> bool {
    normalize_arch(engine_arch) != normalize_arch(target_arch)
}

/// Source of the compressed interpreter.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ByteStream>;
}

/// Downloads over HTTPS.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream> {
        let response = self.client.get(url).send().await.map_err(|e| {
            MblError::Provisioning {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(MblError::Provisioning {
                url: url.to_string(),
                message: format!("download failed with status {}", response.status()),
            });
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        })))
    }
}

/// Outcome of emulation detection for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationState {
    pub required: bool,
    /// Absolute path of the cached interpreter when emulation is required.
    pub interpreter_path: Option<PathBuf>,
}

/// Decides whether a build needs emulation and caches the interpreter.
pub struct EmulationProvisioner<F = HttpFetcher> {
    fetcher: F,
    url: String,
    target_arch: String,
}

impl EmulationProvisioner<HttpFetcher> {
    pub fn new() -> Self {
        Self::with_fetcher(HttpFetcher::new())
    }
}

impl Default for EmulationProvisioner<HttpFetcher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Fetcher> EmulationProvisioner<F> {
    pub fn with_fetcher(fetcher: F) -> Self {
        Self {
            fetcher,
            url: DEFAULT_INTERPRETER_URL.to_string(),
            target_arch: DEFAULT_TARGET_ARCH.to_string(),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn target_arch(mut self, arch: impl Into<String>) -> Self {
        self.target_arch = arch.into();
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Whether builds on an engine reporting `engine_arch` need emulation.
    pub fn requires(&self, engine_arch: &str) -> bool {
        requires_emulation(engine_arch, &self.target_arch)
    }

    /// Ask `engine` for its architecture and, if it differs from the
    /// target, make sure the interpreter is cached under `build_path`.
    pub async fn determine_and_prepare(
        &self,
        engine: &dyn Engine,
        build_path: &Path,
    ) -> Result<EmulationState> {
        let version = engine.version().await.map_err(|e| match e {
            e @ MblError::EngineUnavailable { .. } => e,
            other => MblError::EngineUnavailable {
                endpoint: engine.endpoint(),
                message: other.to_string(),
            },
        })?;
        tracing::debug!(arch = %version.arch, target = %self.target_arch, "Engine architecture");
        self.prepare_for_arch(&version.arch, build_path).await
    }

    /// As [`determine_and_prepare`](Self::determine_and_prepare) for a
    /// known engine architecture.
    pub async fn prepare_for_arch(&self, engine_arch: &str, build_path: &Path) -> Result<EmulationState> {
        if !self.requires(engine_arch) {
            return Ok(EmulationState {
                required: false,
                interpreter_path: None,
            });
        }

        let tools = build_path.join(TOOLS_DIR);
        let interpreter = tools.join(INTERPRETER_NAME);
        if interpreter.exists() {
            tracing::debug!(path = %interpreter.display(), "Interpreter already cached");
        } else {
            self.download(&tools, &interpreter).await?;
        }

        Ok(EmulationState {
            required: true,
            interpreter_path: Some(interpreter),
        })
    }

    async fn download(&self, tools: &Path, interpreter: &Path) -> Result<()> {
        tracing::info!(url = %self.url, "Downloading emulation interpreter");
        let provisioning = |message: String| MblError::Provisioning {
            url: self.url.clone(),
            message,
        };

        tokio::fs::create_dir_all(tools)
            .await
            .map_err(|e| provisioning(format!("{}: {}", tools.display(), e)))?;

        let stream = self.fetcher.fetch(&self.url).await?;
        let compressed = pipe::blocking_reader(stream);
        let (staging_dir, target) = (tools.to_path_buf(), interpreter.to_path_buf());
        let digest = tokio::task::spawn_blocking(move || install(compressed, &staging_dir, &target))
            .await
            .map_err(|e| provisioning(format!("install task failed: {e}")))?
            .map_err(provisioning)?;

        tracing::info!(
            path = %interpreter.display(),
            sha256 = %digest,
            "Emulation interpreter cached"
        );
        Ok(())
    }
}

/// Whether `relative` is an interpreter download still being staged.
pub fn is_staging_file(relative: &Path) -> bool {
    relative.parent() == Some(Path::new(TOOLS_DIR))
        && relative
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(STAGING_PREFIX))
}

/// Decompress `compressed` into a staging file under `tools`, then rename
/// it to `interpreter`. Returns the SHA-256 of the installed binary.
fn install<R: Read>(
    compressed: R,
    tools: &Path,
    interpreter: &Path,
) -> std::result::Result<String, String> {
    let mut staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(tools)
        .map_err(|e| format!("{}: {}", tools.display(), e))?;

    let mut decoder = flate2::read::GzDecoder::new(compressed);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| format!("decompression failed: {e}"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        staging
            .write_all(&buf[..n])
            .map_err(|e| format!("{}: {}", staging.path().display(), e))?;
    }
    staging.flush().map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staging
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))
            .map_err(|e| e.to_string())?;
    }

    staging
        .persist(interpreter)
        .map_err(|e| format!("{}: {}", interpreter.display(), e.error))?;
    Ok(hex::encode(hasher.finalize()))
}
