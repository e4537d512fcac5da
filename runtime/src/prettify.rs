//! Engine progress output → human-readable text.
//!
//! Build and load endpoints answer with newline-delimited JSON records.
//! Each chunk is split into lines; JSON records contribute their `stream`
//! text and anything else is passed through verbatim.

use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::pipe::CHUNK_SIZE;

/// One progress record emitted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_detail: Option<ErrorDetail>,
    #[serde(default)]
    pub aux: Option<AuxRecord>,
}

impl ProgressRecord {
    /// Failure message carried by the record, if any.
    pub fn failure(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.error_detail.as_ref().and_then(|d| d.message.as_deref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

/// Auxiliary payload; for builds it carries the resulting image ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuxRecord {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
}

/// A decoded output line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Record(ProgressRecord),
    /// Valid JSON that is not an object.
    Other,
    /// Not JSON at all.
    Text(String),
}

/// Decode a single line of engine output.
pub fn decode_line(line: &str) -> Line {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value @ serde_json::Value::Object(_)) => {
            Line::Record(serde_json::from_value(value).unwrap_or_default())
        }
        Ok(_) => Line::Other,
        Err(_) => Line::Text(line.to_string()),
    }
}

/// Text produced for one line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrettyLine {
    pub text: String,
    /// The line was not JSON; it lost its newline when split.
    pub passthrough: bool,
}

/// Transform one chunk of engine output.
///
/// Empty fragments are skipped. A JSON object yields its `stream` text (or
/// nothing visible when absent), other JSON yields an empty string, and
/// non-JSON text is passed through unchanged.
pub fn prettify_chunk(chunk: &[u8]) -> Vec<PrettyLine> {
    let text = String::from_utf8_lossy(chunk);
    text.split('\n')
        .filter(|fragment| !fragment.is_empty())
        .map(|fragment| match decode_line(fragment) {
            Line::Record(record) => PrettyLine {
                text: record.stream.unwrap_or_default(),
                passthrough: false,
            },
            Line::Other => PrettyLine {
                text: String::new(),
                passthrough: false,
            },
            Line::Text(text) => PrettyLine {
                text,
                passthrough: true,
            },
        })
        .collect()
}

/// Summary of a prettified progress stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSummary {
    /// First failure reported by the engine.
    pub error: Option<String>,
    /// Last image ID announced in an `aux` record.
    pub image_id: Option<String>,
}

/// Prettifies chunks into a writer while tracking failures and image IDs.
///
/// Lines split across chunks are reassembled before decoding. A partial
/// line longer than [`CHUNK_SIZE`] is written out raw, and so is the rest
/// of that line once its newline arrives.
pub struct PrettyWriter<'a, W: ?Sized> {
    out: &'a mut W,
    pending: Vec<u8>,
    /// Part of the current line was already written raw.
    overflowed: bool,
    summary: ProgressSummary,
}

impl<'a, W> PrettyWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(out: &'a mut W) -> Self {
        Self {
            out,
            pending: Vec::new(),
            overflowed: false,
            summary: ProgressSummary::default(),
        }
    }

    /// Write the readable form of every complete line seen so far.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.pending.extend_from_slice(chunk);
        let Some(end) = self.pending.iter().rposition(|&b| b == b'\n') else {
            if self.pending.len() > CHUNK_SIZE {
                let overflow = std::mem::take(&mut self.pending);
                self.overflowed = true;
                return self.out.write_all(&overflow).await;
            }
            return Ok(());
        };
        let mut lines: Vec<u8> = self.pending.drain(..=end).collect();
        if self.overflowed {
            self.overflowed = false;
            let tail_end = lines.iter().position(|&b| b == b'\n').unwrap_or(end);
            let tail: Vec<u8> = lines.drain(..=tail_end).collect();
            self.out.write_all(&tail).await?;
        }
        self.emit(&lines).await
    }

    async fn emit(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(chunk);
        for fragment in text.split('\n').filter(|f| !f.is_empty()) {
            if let Line::Record(record) = decode_line(fragment) {
                if self.summary.error.is_none() {
                    self.summary.error = record.failure().map(str::to_string);
                }
                if let Some(id) = record.aux.as_ref().and_then(|a| a.id.clone()) {
                    self.summary.image_id = Some(id);
                }
            }
        }

        for line in prettify_chunk(chunk) {
            self.out.write_all(line.text.as_bytes()).await?;
            if line.passthrough {
                self.out.write_all(b"\n").await?;
            }
        }
        Ok(())
    }

    /// Flush any trailing partial line and return the summary.
    pub async fn finish(mut self) -> std::io::Result<ProgressSummary> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            if self.overflowed {
                self.out.write_all(&rest).await?;
            } else {
                self.emit(&rest).await?;
            }
        }
        self.out.flush().await?;
        Ok(self.summary)
    }
}
