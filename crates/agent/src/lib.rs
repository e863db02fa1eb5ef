//! The AIQ agent: everything between a user query and a final answer.
//!
//! - [`Orchestrator`] runs the tool-calling loop for one turn
//! - [`context`] estimates tokens and compresses prompts near the window
//! - [`prompt`] loads mode templates and appends the skills section
//! - [`arguments`] recovers tool arguments from model output

pub mod arguments;
pub mod context;
pub mod orchestrator;
pub mod prompt;

pub use arguments::parse_arguments;
pub use context::{CompressionResult, DEFAULT_CONTEXT_WINDOW, PromptCompressor};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, QueryResult, TurnOutcome,
};
pub use prompt::{PromptTemplates, SystemPromptBuilder, TemplateError};
