//! System prompt assembly: a mode template, the common policy, then the
//! skills section.

pub mod builder;
pub mod templates;

pub use builder::SystemPromptBuilder;
pub use templates::{PromptTemplates, TemplateError};
