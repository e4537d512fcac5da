//! Byte-stream plumbing between blocking archive code and async I/O.
//!
//! The `tar` crate is synchronous, while the engine client and disk sinks
//! are async. A bounded channel sits between them so a slow consumer
//! parks the blocking producer instead of letting chunks pile up.

use std::io::{self, Write};
use std::pin::Pin;

use futures::stream::{Stream, StreamExt};
use hyper::body::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

/// Async stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Chunks buffered between a producer and its consumer.
pub const PIPE_DEPTH: usize = 16;

/// Read size used when turning readers into streams.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Create a bounded pipe: a blocking writer and the stream it feeds.
///
/// The stream ends once every clone of the writer is dropped.
pub fn channel() -> (ChannelWriter, ByteStream) {
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    (ChannelWriter { tx }, Box::pin(ReceiverStream::new(rx)))
}

/// Blocking `Write` half of [`channel`]. Must only be used off the async
/// executor (e.g. inside `spawn_blocking`).
#[derive(Clone)]
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelWriter {
    /// Forward a producer failure to the consumer. Ignored if the consumer
    /// has already gone away.
    pub fn fail(&self, err: io::Error) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stream consumer dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocking `Read` over a [`ByteStream`].
pub type BlockingReader = SyncIoBridge<StreamReader<ByteStream, Bytes>>;

/// Wrap `stream` for reading on a blocking thread. Must be called from
/// within the runtime; the reader must only be used off the executor
/// (e.g. inside `spawn_blocking`).
pub fn blocking_reader(stream: ByteStream) -> BlockingReader {
    SyncIoBridge::new(StreamReader::new(stream))
}

/// A stream yielding `bytes` as a single chunk.
pub fn from_bytes(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    Box::pin(futures::stream::iter(std::iter::once(Ok::<_, io::Error>(bytes))))
}

/// Stream an async reader in [`CHUNK_SIZE`] chunks. The stream ends after
/// the first read error.
pub fn from_async_read<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::with_capacity(reader, CHUNK_SIZE))
}

/// Copy a stream into an async writer, awaiting each write so the writer's
/// pace governs how fast the stream is pulled. Returns the bytes written.
pub async fn copy_to<W>(mut stream: ByteStream, writer: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Drain a stream into memory.
pub async fn collect(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
