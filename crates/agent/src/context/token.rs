//! Token estimation utilities.
//!
//! Uses a character-based heuristic: 4 bytes per token, rounded down. The
//! numbers only drive the compressor's thresholds; they are never sent to
//! the endpoint.

use aiq_core::message::Message;

const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Sum of the estimates of each part.
pub fn estimate_prompt_tokens(parts: &[&str]) -> usize {
    parts.iter().map(|p| estimate_tokens(p)).sum()
}

/// History rendered as `role: content` lines joined by newlines.
pub fn render_history(history: &[Message]) -> String {
    history
        .iter()
        .map(Message::as_transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}
