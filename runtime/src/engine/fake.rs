//! Recording in-memory doubles for tests.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mbl_core::error::{MblError, Result};

use super::{BuildOptions, ContainerSpec, Engine, EngineVersion, ImageInfo};
use crate::emulation::Fetcher;
use crate::pipe::{self, ByteStream};

/// Content served (gzip-compressed) by [`FakeFetcher`].
pub(crate) const INTERPRETER_PAYLOAD: &[u8] = b"\x7fELF fake interpreter";

/// Engine double. Every call is appended to `calls` as `op` or `op:arg`.
/// Operations listed in `failures` answer with the given status.
pub(crate) struct FakeEngine {
    pub arch: String,
    pub unavailable: bool,
    pub images: Mutex<HashMap<String, String>>,
    pub failures: Mutex<HashMap<String, (u16, String)>>,
    pub build_output: Vec<u8>,
    pub export_data: Vec<u8>,
    pub load_output: Vec<u8>,
    pub attach_output: Vec<u8>,
    pub calls: Mutex<Vec<String>>,
    pub received_context: Mutex<Option<Vec<u8>>>,
    pub loaded: Mutex<Option<Vec<u8>>>,
}

impl FakeEngine {
    pub fn new(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            unavailable: false,
            images: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            build_output: b"{\"stream\":\"Successfully built\\n\"}\n".to_vec(),
            export_data: Vec::new(),
            load_output: b"{\"stream\":\"Loaded image\\n\"}\n".to_vec(),
            attach_output: Vec::new(),
            calls: Mutex::new(Vec::new()),
            received_context: Mutex::new(None),
            loaded: Mutex::new(None),
        }
    }

    pub fn with_image(self, name: &str, id: &str) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert(name.to_string(), id.to_string());
        self
    }

    pub fn fail(self, op: &str, status: u16, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(op.to_string(), (status, message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation names only, without arguments.
    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    fn record(&self, op: &str, arg: Option<&str>) -> Result<()> {
        let call = match arg {
            Some(arg) => format!("{op}:{arg}"),
            None => op.to_string(),
        };
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(op) {
            Some((status, message)) => Err(MblError::Engine {
                status: *status,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn endpoint(&self) -> String {
        "fake://engine".to_string()
    }

    async fn version(&self) -> Result<EngineVersion> {
        self.record("version", None)?;
        if self.unavailable {
            return Err(MblError::EngineUnavailable {
                endpoint: self.endpoint(),
                message: "connection refused".to_string(),
            });
        }
        Ok(EngineVersion {
            version: "20.10.7".to_string(),
            os: "linux".to_string(),
            arch: self.arch.clone(),
            api_version: "1.41".to_string(),
        })
    }

    async fn build_image(&self, context: ByteStream, options: &BuildOptions) -> Result<ByteStream> {
        self.record("build", Some(&options.tag))?;
        let context = pipe::collect(context).await?;
        *self.received_context.lock().unwrap() = Some(context);
        Ok(pipe::from_bytes(self.build_output.clone()))
    }

    async fn export_image(&self, name: &str) -> Result<ByteStream> {
        self.record("export", Some(name))?;
        if !self.images.lock().unwrap().contains_key(name) {
            return Err(MblError::Engine {
                status: 404,
                message: format!("reference does not exist: {name}"),
            });
        }
        Ok(pipe::from_bytes(self.export_data.clone()))
    }

    async fn inspect_image(&self, name: &str) -> Result<Option<ImageInfo>> {
        self.record("inspect", Some(name))?;
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(name)
            .map(|id| ImageInfo { id: id.clone() }))
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<()> {
        self.record("remove_image", Some(id))?;
        self.images.lock().unwrap().retain(|_, v| v != id);
        Ok(())
    }

    async fn load_image(&self, image: ByteStream) -> Result<ByteStream> {
        self.record("load", None)?;
        let image = pipe::collect(image).await?;
        *self.loaded.lock().unwrap() = Some(image);
        Ok(pipe::from_bytes(self.load_output.clone()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record("create", Some(&spec.name))?;
        Ok(format!("{}-id", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record("start", Some(name))
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.record("stop", Some(name))
    }

    async fn remove_container(&self, name: &str, _force: bool) -> Result<()> {
        self.record("remove_container", Some(name))
    }

    async fn attach_container(&self, name: &str) -> Result<ByteStream> {
        self.record("attach", Some(name))?;
        Ok(pipe::from_bytes(self.attach_output.clone()))
    }

    async fn container_logs(&self, name: &str, _follow: bool) -> Result<ByteStream> {
        self.record("logs", Some(name))?;
        Ok(pipe::from_bytes(self.attach_output.clone()))
    }
}

/// Serves a gzip-compressed [`INTERPRETER_PAYLOAD`], counting fetches.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    pub fetches: AtomicUsize,
    /// Serve bytes that are not gzip.
    pub corrupt: bool,
}

impl FakeFetcher {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<ByteStream> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.corrupt {
            return Ok(pipe::from_bytes(&b"not gzip at all"[..]));
        }
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(INTERPRETER_PAYLOAD)?;
        Ok(pipe::from_bytes(encoder.finish()?))
    }
}
