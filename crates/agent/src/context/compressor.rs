//! Graduated prompt degradation against a context-window budget.
//!
//! | Usage | Action |
//! |-------|--------|
//! | ≥ 80% | Keep the last 10 history entries behind a summary marker |
//! | ≥ 90% | Drop skills below `Relevant` |
//! | ≥ 95% | Keep the last 5 history entries, drop skills below `Active` |
//!
//! Each threshold is checked against the usage recomputed after the
//! previous step. The compressor only ever removes content.

use aiq_core::message::Message;
use aiq_skills::{Priority, Skill};
use tracing::debug;

use super::token::{estimate_prompt_tokens, render_history};

pub const THRESHOLD_COMPRESS_HISTORY: f64 = 0.80;
pub const THRESHOLD_EVICT_SKILLS: f64 = 0.90;
pub const THRESHOLD_AGGRESSIVE: f64 = 0.95;

/// Used when the configured window is zero or negative.
pub const DEFAULT_CONTEXT_WINDOW: usize = 100_000;

const KEEP_HISTORY: usize = 10;
const KEEP_HISTORY_AGGRESSIVE: usize = 5;

/// Output of [`PromptCompressor::compress`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub compressed_history: Vec<Message>,
    pub remaining_skills: Vec<Skill>,
    /// `false` means history and skills are exactly the inputs.
    pub compressed: bool,
}

#[derive(Debug, Clone)]
pub struct PromptCompressor {
    context_window: usize,
}

impl PromptCompressor {
    pub fn new(context_window: i64) -> Self {
        let context_window = match usize::try_from(context_window) {
            Ok(w) if w > 0 => w,
            _ => DEFAULT_CONTEXT_WINDOW,
        };
        Self { context_window }
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    fn usage(&self, system_prompt: &str, history: &[Message], query: &str) -> f64 {
        let tokens = estimate_prompt_tokens(&[system_prompt, &render_history(history), query]);
        tokens as f64 / self.context_window as f64
    }

    pub fn compress(
        &self,
        history: &[Message],
        skills: &[Skill],
        system_prompt: &str,
        query: &str,
    ) -> CompressionResult {
        let mut result = CompressionResult {
            compressed_history: history.to_vec(),
            remaining_skills: skills.to_vec(),
            compressed: false,
        };

        let mut usage = self.usage(system_prompt, history, query);
        if usage >= THRESHOLD_COMPRESS_HISTORY {
            result.compressed_history = compress_history(history, KEEP_HISTORY);
            result.compressed = true;
            usage = self.usage(system_prompt, &result.compressed_history, query);
        }

        if usage >= THRESHOLD_EVICT_SKILLS {
            result.remaining_skills = retain_at_least(skills, Priority::Relevant);
            result.compressed = true;
            usage = self.usage(system_prompt, &result.compressed_history, query);
        }

        if usage >= THRESHOLD_AGGRESSIVE {
            result.compressed_history = compress_history(history, KEEP_HISTORY_AGGRESSIVE);
            result.remaining_skills = retain_at_least(skills, Priority::Active);
        }

        if result.compressed {
            debug!(
                usage,
                history = result.compressed_history.len(),
                skills = result.remaining_skills.len(),
                "Prompt compressed"
            );
        }
        result
    }
}

impl Default for PromptCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW as i64)
    }
}

/// Keep the last `keep_last` entries behind a marker counting the rest.
pub fn compress_history(history: &[Message], keep_last: usize) -> Vec<Message> {
    if history.len() <= keep_last {
        return history.to_vec();
    }

    let split = history.len() - keep_last;
    let mut out = Vec::with_capacity(keep_last + 1);
    out.push(summary_marker(split));
    out.extend_from_slice(&history[split..]);
    out
}

fn summary_marker(count: usize) -> Message {
    Message::system(format!("[Previous conversation: {count} messages compressed]"))
}

fn retain_at_least(skills: &[Skill], min: Priority) -> Vec<Skill> {
    skills.iter().filter(|s| s.priority >= min).cloned().collect()
}
