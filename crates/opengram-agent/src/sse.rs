// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal Server-Sent Events decoder for the agent's `/event` stream.
//!
//! Accumulates `data:` lines and dispatches a payload per blank line.
//! Comment lines and `event:`/`id:` fields are ignored; multi-line data is
//! joined with newlines per the SSE specification.

/// Incremental SSE frame decoder. Feed raw chunks, collect payloads.
#[derive(Default)]
pub struct SseDecoder {
    line_buffer: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk of the byte stream, returning every complete
    /// `data` payload it finished.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut payloads = Vec::new();
        self.line_buffer.push_str(chunk);

        while let Some(newline) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    payloads.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // `event:`, `id:`, `retry:` and comments are ignored.
        }

        payloads
    }
}
