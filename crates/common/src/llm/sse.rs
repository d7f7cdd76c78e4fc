//! Server-sent events decoding for streamed chat completions
//!
//! Network chunks do not align with event boundaries, so bytes are buffered
//! until a full line is available. Only `data:` lines are meaningful; the
//! `[DONE]` sentinel ends the stream.

use serde::Deserialize;

/// One decoded frame from the completion stream
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A text delta (possibly empty)
    Delta(String),
    /// The `[DONE]` sentinel
    Done,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder over raw stream bytes
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every complete frame it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = self.decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest)
    }

    /// Number of data lines that could not be decoded
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            return Some(SseFrame::Done);
        }

        match serde_json::from_str::<ChunkPayload>(data) {
            Ok(payload) => Some(SseFrame::Delta(
                payload
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default(),
            )),
            Err(e) => {
                self.skipped += 1;
                tracing::debug!(error = %e, "Skipping undecodable stream frame");
                None
            }
        }
    }
}
