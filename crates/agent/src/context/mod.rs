//! Context budgeting.
//!
//! The whole prompt (system prompt, history, current query) is estimated
//! against the model's context window, and degraded in steps when it gets
//! close to full:
//!
//! | Step | Trigger | Effect |
//! |------|---------|--------|
//! | 1 | 80% | Older history summarized into a marker |
//! | 2 | 90% | Skills below `Relevant` dropped |
//! | 3 | 95% | Only 5 history entries and `Active` skills kept |

pub mod compressor;
pub mod token;

pub use compressor::{CompressionResult, DEFAULT_CONTEXT_WINDOW, PromptCompressor};
