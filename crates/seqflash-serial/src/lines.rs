//! Line assembly over a raw byte stream
//!
//! Decoding never fails: invalid UTF-8 is replaced with U+FFFD. Lines are
//! trimmed and empty lines are dropped.

/// Longest line kept before it is force-split
pub const MAX_LINE_LEN: usize = 4096;

/// Decode raw bytes into a trimmed line, replacing invalid sequences
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Accumulates bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes and return every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = decode_line(&raw);
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.pending.len() > MAX_LINE_LEN {
            let raw: Vec<u8> = self.pending.drain(..).collect();
            let line = decode_line(&raw);
            if !line.is_empty() {
                lines.push(line);
            }
        }

        lines
    }

    /// Take whatever partial line remains
    pub fn finish(&mut self) -> Option<String> {
        let raw: Vec<u8> = self.pending.drain(..).collect();
        let line = decode_line(&raw);
        (!line.is_empty()).then_some(line)
    }
}
