//! Line framing for the ELM327 serial protocol
//!
//! The adapter terminates every response with a `>` prompt, but error
//! conditions ("NO DATA", "UNABLE TO CONNECT") are also treated as frame
//! boundaries so callers see them as soon as they arrive instead of
//! waiting for the prompt.

use super::{KEYWORD_MARKERS, PROMPT};

/// Encode an outbound command, appending the carriage return the adapter
/// expects exactly once.
pub fn encode(command: &str) -> Vec<u8> {
    let mut bytes = command.trim_end_matches('\r').as_bytes().to_vec();
    bytes.push(b'\r');
    bytes
}

/// Accumulates inbound bytes and splits off completed frames.
///
/// Feeding is the only suspension point exposed to callers: when no
/// terminator has arrived yet, `feed` returns no frames and keeps
/// everything buffered. The buffer never blocks and never emits a
/// partial frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes and return any frames they complete.
    ///
    /// The adapter speaks ASCII; stray non-ASCII bytes (line noise during
    /// link setup) are dropped on ingest. The prompt character is stripped
    /// from frames; keyword markers remain in the frame text because
    /// callers classify responses on them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf
            .extend(bytes.iter().filter(|b| b.is_ascii()).map(|&b| b as char));

        let mut frames = Vec::new();
        while let Some((end, marker_len, keep_marker)) = self.next_terminator() {
            let upto = if keep_marker { end + marker_len } else { end };
            let raw: String = self.buf.drain(..end + marker_len).take(upto).collect();
            let frame = clean(&raw);
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes currently buffered without a terminator
    pub fn pending(&self) -> &str {
        &self.buf
    }

    /// Drop any buffered partial data (on command start, so a stale tail
    /// from a previous exchange cannot leak into the next response).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Earliest terminator in the buffer: byte offset, marker length, and
    /// whether the marker text stays in the frame.
    fn next_terminator(&self) -> Option<(usize, usize, bool)> {
        let mut best: Option<(usize, usize, bool)> = None;
        if let Some(pos) = self.buf.find(PROMPT as char) {
            best = Some((pos, 1, false));
        }
        for marker in KEYWORD_MARKERS {
            if let Some(pos) = self.buf.find(marker) {
                if best.map_or(true, |(b, _, _)| pos < b) {
                    best = Some((pos, marker.len(), true));
                }
            }
        }
        best
    }
}

/// Collapse embedded carriage returns / line feeds to single spaces and
/// trim the result.
fn clean(raw: &str) -> String {
    raw.split(|c| c == '\r' || c == '\n' || c == ' ')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
