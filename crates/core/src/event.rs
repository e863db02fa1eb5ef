//! Domain event system: decoupled observation of a turn.
//!
//! The orchestrator publishes events as it works; the CLI (or a test)
//! subscribes to show progress without coupling to the loop itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// Skills were matched and loaded for a query
    SkillsLoaded {
        names: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Skills were dropped from the cache
    SkillsEvicted {
        names: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The prompt was degraded to fit the context window
    PromptCompressed {
        history_len: usize,
        remaining_skills: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool call passed its checks and is about to run
    ToolStarted {
        tool_name: String,
        /// One-line description of the call, e.g. the SQL or the command
        summary: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        /// What went wrong when `success` is false
        error: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a response
    ResponseGenerated {
        session_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },
}

/// One progress line, as shown to a user watching a turn.
impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkillsLoaded { names, .. } => write!(f, "Loaded skills: {}", names.join(", ")),
            Self::SkillsEvicted { names, .. } => write!(f, "Evicted skills: {}", names.join(", ")),
            Self::PromptCompressed {
                history_len,
                remaining_skills,
                ..
            } => write!(
                f,
                "Compressed prompt to {history_len} history message(s) and {remaining_skills} skill(s)"
            ),
            Self::ToolStarted { summary, .. } => write!(f, "Calling tool {summary}"),
            Self::ToolExecuted {
                tool_name,
                success: true,
                ..
            } => write!(f, "Tool [{tool_name}] executed successfully"),
            Self::ToolExecuted {
                tool_name, error, ..
            } => match error {
                Some(error) => write!(f, "Tool [{tool_name}] failed: {error}"),
                None => write!(f, "Tool [{tool_name}] failed"),
            },
            Self::ResponseGenerated {
                model, tokens_used, ..
            } => write!(f, "Response from {model} ({tokens_used} tokens)"),
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
