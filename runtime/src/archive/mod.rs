//! Build context archives.
//!
//! Packs a source directory into an uncompressed tar stream and rewrites
//! single entries of such a stream in flight. All work runs on blocking
//! threads feeding a bounded pipe, so the engine upload paces the
//! directory walk.
//!
//! # Pipeline
//!
//! ```text
//!  source dir ──pack──▶ tar stream ──rewrite_entry("Dockerfile")──▶ engine
//!      │                                   │
//!      └─ ignore predicate                 └─ other entries copied as-is
//! ```

mod manifest;
mod pack;
mod rewrite;

use std::io;

use mbl_core::error::{MblError, Result};
use tokio::task::JoinHandle;

use crate::pipe::{self, ByteStream, ChannelWriter};

pub use manifest::{
    emulation_start, find_run_instruction, rewrite_manifest, EMULATION_END, MANIFEST_FILE,
};
pub use pack::{pack, IgnoreList};
pub use rewrite::rewrite_entry;

/// A tar byte stream together with the task producing it.
///
/// The stream carries producer failures as `io::Error`s; the worker keeps
/// the original typed error so callers can report it after the consumer
/// (usually the engine upload) has given up.
pub struct ArchiveStream {
    body: ByteStream,
    worker: ArchiveWorker,
}

impl ArchiveStream {
    /// Wrap an existing tar stream that has no producer task of its own.
    pub fn from_stream(body: ByteStream) -> Self {
        Self {
            body,
            worker: ArchiveWorker { handle: None },
        }
    }

    /// Split into the byte stream and its producer.
    pub fn into_parts(self) -> (ByteStream, ArchiveWorker) {
        (self.body, self.worker)
    }

    /// Drain the whole archive into memory, surfacing producer errors.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        let (body, worker) = self.into_parts();
        let collected = pipe::collect(body).await;
        worker.wait().await?;
        Ok(collected?)
    }

    /// Run `job` on a blocking thread, streaming whatever it writes.
    pub(crate) fn spawn_blocking<F>(job: F) -> Self
    where
        F: FnOnce(ChannelWriter) -> Result<()> + Send + 'static,
    {
        let (writer, body) = pipe::channel();
        let reporter = writer.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = job(writer);
            if let Err(e) = &result {
                if !e.is_broken_pipe() {
                    reporter.fail(to_io_error(e));
                }
            }
            result
        });
        Self {
            body,
            worker: ArchiveWorker {
                handle: Some(handle),
            },
        }
    }

    /// Replace this stream's worker with one that also waits on `upstream`.
    pub(crate) fn chain(self, upstream: ArchiveWorker) -> Self {
        let (body, downstream) = self.into_parts();
        let handle = tokio::spawn(async move {
            let up = upstream.wait().await;
            let down = downstream.wait().await;
            match (up, down) {
                // A downstream failure closes the pipe, which the upstream
                // sees as a broken pipe; report the cause, not the symptom.
                (Err(e), _) if !e.is_broken_pipe() => Err(e),
                (_, Err(e)) => Err(e),
                (up, Ok(())) => up,
            }
        });
        Self {
            body,
            worker: ArchiveWorker {
                handle: Some(handle),
            },
        }
    }
}

/// Handle on the task producing an [`ArchiveStream`].
pub struct ArchiveWorker {
    handle: Option<JoinHandle<Result<()>>>,
}

impl ArchiveWorker {
    /// Wait for the producer to finish and return its outcome.
    pub async fn wait(self) -> Result<()> {
        match self.handle {
            None => Ok(()),
            Some(handle) => handle
                .await
                .map_err(|e| MblError::Other(format!("archive worker failed: {e}")))?,
        }
    }
}

/// Convert a producer error into the `io::Error` carried on the stream.
fn to_io_error(err: &MblError) -> io::Error {
    match err {
        MblError::IoError(e) => io::Error::new(e.kind(), e.to_string()),
        MblError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err.to_string()),
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Attach the failing path to an I/O error unless it already names it.
fn path_error(path: &std::path::Path, err: io::Error) -> MblError {
    let shown = path.display().to_string();
    if err.to_string().contains(&shown) {
        return MblError::IoError(err);
    }
    MblError::IoError(io::Error::new(err.kind(), format!("{shown}: {err}")))
}
