//! # AIQ Core
//!
//! Domain types, traits, and error definitions shared by every AIQ crate.
//! Nothing here talks to the network or the filesystem; it only defines the
//! model that the other crates implement against.
//!
//! ## Seams
//!
//! - [`Provider`]: the chat-completion backend the orchestrator drives
//! - [`ToolExecutor`]: the capability surface tool calls are dispatched to
//! - [`Confirmer`]: the human-in-the-loop gate for high-impact tools
//!
//! Each seam is a trait so the agent loop can be exercised with scripted
//! providers and in-memory tools.

pub mod confirm;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

pub use confirm::{AutoConfirm, Confirmation, Confirmer};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role, ToolCall};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use session::{HISTORY_LIMIT, Mode, Session, SessionId};
pub use tool::{Tool, ToolExecutor, ToolRegistry};
