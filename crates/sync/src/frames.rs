//! Incremental event-stream frame parser.
//!
//! The sync API streams progress as standard event-stream framing:
//! `data: <json>` lines, with an empty line terminating one frame.
//! [`StreamFrameParser`] accepts arbitrary byte chunks, keeps any partial
//! trailing line for the next call, and yields one JSON value per
//! completed frame.
//!
//! Comment lines (`:keep-alive`) and other fields (`event:`, `id:`,
//! `retry:`) are skipped. A frame that is not valid UTF-8 or JSON is
//! dropped and reported to the error hook; parsing continues with the
//! next line.

use std::fmt;
use std::sync::Arc;

/// Upper bound on a single buffered partial line.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

const DATA_PREFIX: &[u8] = b"data:";

/// Callback invoked for every frame that is dropped.
pub type ParseErrorHook = Arc<dyn Fn(&FrameError) + Send + Sync>;

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("event line is not valid UTF-8")]
    InvalidUtf8,

    #[error("event payload is not valid JSON: {message}")]
    InvalidJson { message: String, payload: String },

    #[error("event payload has an unrecognised shape: {0}")]
    UnknownShape(String),

    #[error("partial line exceeded {limit} bytes and was discarded")]
    Oversized { limit: usize },
}

/// Stateful decoder turning byte chunks into JSON payloads.
#[derive(Default)]
pub struct StreamFrameParser {
    /// Bytes after the last newline seen so far.
    buffer: Vec<u8>,
    /// `data:` lines of the frame currently being assembled.
    data_lines: Vec<String>,
    /// Set when the current partial line overflowed and must be skipped
    /// up to the next newline.
    discarding: bool,
    on_error: Option<ParseErrorHook>,
}

impl fmt::Debug for StreamFrameParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFrameParser")
            .field("pending_bytes", &self.buffer.len())
            .field("pending_data_lines", &self.data_lines.len())
            .field("discarding", &self.discarding)
            .finish()
    }
}

impl StreamFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report dropped frames to `hook` in addition to the log.
    pub fn with_error_hook(mut self, hook: ParseErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Consume one chunk and return every frame completed by it.
    ///
    /// Never blocks. A trailing partial line is retained until a later
    /// call supplies its newline.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut frames);
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_PENDING_BYTES {
                self.buffer.clear();
                self.discarding = true;
                self.report(&FrameError::Oversized {
                    limit: MAX_PENDING_BYTES,
                });
            }
        }

        frames
    }

    /// Forward a dropped-frame error to the hook and the log.
    pub fn report(&self, error: &FrameError) {
        tracing::warn!(error = %error, "Dropping malformed stream frame");
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }

    // ---- private helpers ----

    fn process_line(&mut self, raw: &[u8], frames: &mut Vec<serde_json::Value>) {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);

        if line.is_empty() {
            self.dispatch(frames);
            return;
        }

        let Some(value) = line.strip_prefix(DATA_PREFIX) else {
            // Comments and non-data fields.
            return;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);

        match std::str::from_utf8(value) {
            Ok(text) => self.data_lines.push(text.to_string()),
            Err(_) => self.report(&FrameError::InvalidUtf8),
        }
    }

    /// Complete the current frame, if it has any data.
    fn dispatch(&mut self, frames: &mut Vec<serde_json::Value>) {
        if self.data_lines.is_empty() {
            return;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();

        match serde_json::from_str(&payload) {
            Ok(value) => frames.push(value),
            Err(e) => self.report(&FrameError::InvalidJson {
                message: e.to_string(),
                payload,
            }),
        }
    }
}
