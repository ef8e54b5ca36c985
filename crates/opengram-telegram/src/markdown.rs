// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MarkdownV2 escaping for the Telegram Bot API.
//!
//! Telegram requires escaping 18 special characters outside code spans,
//! while the contents of inline code and fenced blocks must stay verbatim.
//! Sends try MarkdownV2 first and retry as plain text on a parse error, so
//! this escaper favors keeping code intact over handling every exotic
//! nesting correctly.

/// Characters that must be escaped outside code spans.
const SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escapes `text` for MarkdownV2, leaving inline code and fenced code
/// blocks untouched.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut rest = text;

    while let Some(start) = rest.find('`') {
        let (before, from_tick) = rest.split_at(start);
        escape_plain_into(&mut out, before);

        let fence = if from_tick.starts_with("```") { "```" } else { "`" };
        let body_start = fence.len();
        match from_tick[body_start..].find(fence) {
            Some(end) => {
                let span_end = body_start + end + fence.len();
                out.push_str(&from_tick[..span_end]);
                rest = &from_tick[span_end..];
            }
            None => {
                // Unclosed span: escape the delimiter and move on so the
                // parser never sees a dangling backtick.
                for c in fence.chars() {
                    out.push('\\');
                    out.push(c);
                }
                rest = &from_tick[body_start..];
            }
        }
    }

    escape_plain_into(&mut out, rest);
    out
}

fn escape_plain_into(out: &mut String, text: &str) {
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Renders `text` as an italic MarkdownV2 fragment.
pub fn italic(text: &str) -> String {
    format!("_{}_", escape_markdown(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(escape_markdown("hello world"), "hello world");
        assert_eq!(escape_markdown(""), "");
    }

    #[test]
    fn punctuation_is_escaped() {
        assert_eq!(escape_markdown("Done. Next!"), "Done\\. Next\\!");
        assert_eq!(escape_markdown("a-b (c)"), "a\\-b \\(c\\)");
    }

    #[test]
    fn inline_code_stays_verbatim() {
        assert_eq!(
            escape_markdown("run `cargo build --release` now."),
            "run `cargo build --release` now\\."
        );
    }

    #[test]
    fn fenced_block_stays_verbatim() {
        let text = "before.\n```rust\nlet x = a - b;\n```\nafter.";
        let escaped = escape_markdown(text);
        assert!(escaped.contains("```rust\nlet x = a - b;\n```"));
        assert!(escaped.starts_with("before\\."));
        assert!(escaped.ends_with("after\\."));
    }

    #[test]
    fn unclosed_backtick_is_escaped() {
        assert_eq!(escape_markdown("oops ` here."), "oops \\` here\\.");
    }

    #[test]
    fn unclosed_fence_is_escaped() {
        let escaped = escape_markdown("start ```rust\nno end.");
        assert!(escaped.starts_with("start \\`\\`\\`"));
    }

    #[test]
    fn italic_wraps_and_escapes() {
        assert_eq!(italic("done."), "_done\\._");
    }
}
