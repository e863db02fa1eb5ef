//! Human-in-the-loop confirmation for high-impact tool calls.

use async_trait::async_trait;

/// The user's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
    /// The prompt was aborted (Ctrl+C, closed input).
    Cancelled,
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed)
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> Confirmation;
}

/// Approves everything. Used by `--yes` and non-interactive runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> Confirmation {
        Confirmation::Confirmed
    }
}
