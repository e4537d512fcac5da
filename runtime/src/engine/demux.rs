//! Multiplexed container output.
//!
//! Without a TTY the engine frames attach and log output as
//! `[stream, 0, 0, 0, size (u32 BE)]` followed by `size` payload bytes.
//! Frames may be split across, or packed into, transport chunks.

use futures::StreamExt;
use hyper::body::Bytes;
use mbl_core::error::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::pipe::ByteStream;

const HEADER_LEN: usize = 8;

/// Which container stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub kind: StreamKind,
    pub data: Bytes,
}

/// Incremental frame decoder.
///
/// Output from containers started with a TTY is not framed; when the first
/// bytes do not look like a frame header everything is treated as stdout.
#[derive(Debug, Default)]
pub struct Demuxer {
    buf: Vec<u8>,
    raw: bool,
    started: bool,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<OutputFrame> {
        if self.raw {
            return raw_frame(chunk);
        }
        self.buf.extend_from_slice(chunk);

        if !self.started && self.buf.len() >= HEADER_LEN {
            self.started = true;
            if parse_header(&self.buf).is_none() {
                self.raw = true;
                let pending = std::mem::take(&mut self.buf);
                return raw_frame(&pending);
            }
        }

        let mut frames = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            let Some((kind, size)) = parse_header(&self.buf) else {
                // Corrupt framing mid-stream: surface the rest verbatim.
                self.raw = true;
                frames.extend(raw_frame(&std::mem::take(&mut self.buf)));
                break;
            };
            if self.buf.len() < HEADER_LEN + size {
                break;
            }
            let rest = self.buf.split_off(HEADER_LEN + size);
            let frame = std::mem::replace(&mut self.buf, rest);
            frames.push(OutputFrame {
                kind,
                data: Bytes::copy_from_slice(&frame[HEADER_LEN..]),
            });
        }
        frames
    }

    /// Bytes left over at end of stream (an incomplete frame).
    pub fn finish(self) -> Vec<OutputFrame> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        if self.started && !self.raw {
            tracing::debug!(bytes = self.buf.len(), "Discarding truncated output frame");
            return Vec::new();
        }
        raw_frame(&self.buf)
    }
}

fn parse_header(buf: &[u8]) -> Option<(StreamKind, usize)> {
    let kind = StreamKind::from_byte(buf[0])?;
    if buf[1..4] != [0, 0, 0] {
        return None;
    }
    let size = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    Some((kind, size))
}

fn raw_frame(chunk: &[u8]) -> Vec<OutputFrame> {
    if chunk.is_empty() {
        return Vec::new();
    }
    vec![OutputFrame {
        kind: StreamKind::Stdout,
        data: Bytes::copy_from_slice(chunk),
    }]
}

/// Copy a multiplexed stream to separate stdout and stderr writers until
/// the stream ends.
pub async fn demux_to<O, E>(mut stream: ByteStream, stdout: &mut O, stderr: &mut E) -> Result<()>
where
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut demuxer = Demuxer::new();
    while let Some(chunk) = stream.next().await {
        for frame in demuxer.push(&chunk?) {
            write_frame(frame, stdout, stderr).await?;
        }
    }
    for frame in demuxer.finish() {
        write_frame(frame, stdout, stderr).await?;
    }
    stdout.flush().await?;
    stderr.flush().await?;
    Ok(())
}

async fn write_frame<O, E>(frame: OutputFrame, stdout: &mut O, stderr: &mut E) -> Result<()>
where
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    match frame.kind {
        StreamKind::Stderr => stderr.write_all(&frame.data).await?,
        _ => stdout.write_all(&frame.data).await?,
    }
    Ok(())
}
