//! Worker → orchestrator result channel.
//!
//! The worker writes exactly one JSON message to its stdout:
//!
//! ```text
//! {"status": "success", "files": ["/abs/path/out.pdf"]}
//! {"status": "error", "message": "ImportError: import of 'socket' is denied"}
//! ```

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::diagnostic::excerpt;

/// Upper bound on bytes read from a worker's result channel.
pub const MAX_CHANNEL_BYTES: usize = 256 * 1024;

/// Written verbatim when the real message cannot be serialized.
const FALLBACK_MESSAGE: &[u8] = b"{\"status\":\"error\",\"message\":\"internal error while reporting result\"}\n";

/// The single message a worker reports for its job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerMessage {
    Success { files: Vec<String> },
    Error { message: String },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    #[error("worker produced no result")]
    Empty,

    #[error("unparsable worker result: {excerpt}")]
    Malformed { excerpt: String },
}

impl WorkerMessage {
    /// Parses raw channel content. Surrounding whitespace is ignored; anything
    /// else that is not exactly one message is rejected with a bounded excerpt.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::Empty);
        }
        serde_json::from_str(trimmed).map_err(|_| ProtocolError::Malformed {
            excerpt: excerpt(raw),
        })
    }
}

/// Single-use handle on the result channel. `report` consumes the handle,
/// so a second report for the same job does not type-check.
pub struct ResultChannel<W: Write> {
    out: W,
}

impl<W: Write> ResultChannel<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Serializes and flushes `message`. If serialization fails, a fixed
    /// static marker is written instead.
    pub fn report(mut self, message: &WorkerMessage) -> std::io::Result<()> {
        match serde_json::to_vec(message) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                self.out.write_all(&bytes)?;
            }
            Err(_) => self.out.write_all(FALLBACK_MESSAGE)?,
        }
        self.out.flush()
    }

    /// Writes the static error marker. Used when building the real message
    /// itself failed.
    pub fn report_fallback(mut self) -> std::io::Result<()> {
        self.out.write_all(FALLBACK_MESSAGE)?;
        self.out.flush()
    }
}
