// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message splitting at Telegram's size limits.
//!
//! Long texts are cut at the best available boundary, preferring paragraph
//! breaks over line breaks over sentence ends over spaces, with a hard cut
//! as the last resort. A boundary is only eligible in the upper half of the
//! window so a stray early newline cannot produce a tiny first chunk.

/// Telegram's per-message character limit.
pub const TELEGRAM_MAX: usize = 4096;

/// Maximum forum topic name length.
pub const TOPIC_NAME_MAX: usize = 128;

/// Finds the byte index to cut `text` at so the first piece fits in
/// `max` bytes. Returns `text.len()` when no split is needed.
///
/// Boundary priority: `\n\n` > `\n` > `. ` > space > hard cut. Only
/// boundaries at or beyond `max / 2` qualify.
pub fn split_point(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }

    let limit = floor_char_boundary(text, max);
    let floor = max / 2;
    let region = &text[..limit];

    if let Some(pos) = region.rfind("\n\n").filter(|&p| p >= floor) {
        return pos;
    }
    if let Some(pos) = region.rfind('\n').filter(|&p| p >= floor) {
        return pos;
    }
    if let Some(pos) = region.rfind(". ").filter(|&p| p >= floor) {
        // Keep the period with the first piece.
        return pos + 1;
    }
    if let Some(pos) = region.rfind(' ').filter(|&p| p >= floor) {
        return pos;
    }
    limit
}

/// Splits `text` into chunks of at most [`TELEGRAM_MAX`] bytes.
pub fn split_message(text: &str) -> Vec<&str> {
    split_message_at(text, TELEGRAM_MAX)
}

/// Splits `text` into chunks of at most `max` bytes each.
pub fn split_message_at(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let cut = split_point(rest, max);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail.trim_start_matches(['\n', ' ']);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Truncates a forum topic name to Telegram's 128-character limit.
/// Longer names become their first 125 characters plus an ellipsis.
pub fn truncate_topic_name(name: &str) -> String {
    if name.chars().count() <= TOPIC_NAME_MAX {
        return name.to_string();
    }
    let mut truncated: String = name.chars().take(TOPIC_NAME_MAX - 3).collect();
    truncated.push('…');
    truncated
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
