//! Session and mode types.
//!
//! A session is the explicit per-conversation context handed to the
//! orchestrator: which mode it runs in and the user/assistant turns so far.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::message::Message;

/// User/assistant pairs a session keeps; older messages are dropped.
pub const HISTORY_LIMIT: usize = 20;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the session is attached to a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Mode {
    /// No database: SQL execution is unavailable.
    Free,
    /// Connected to a database of `engine` whose structure is `schema`.
    Bound { schema: String, engine: String },
}

impl Mode {
    pub fn is_free(&self) -> bool {
        matches!(self, Mode::Free)
    }
}

/// A conversation with its mode and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    pub mode: Mode,

    /// Completed user/assistant turns, oldest first
    pub history: Vec<Message>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            mode,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, keeping at most [`HISTORY_LIMIT`] pairs.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.history.push(message);

        let max = HISTORY_LIMIT * 2;
        if self.history.len() > max {
            let excess = self.history.len() - max;
            self.history.drain(..excess);
        }
    }
}
