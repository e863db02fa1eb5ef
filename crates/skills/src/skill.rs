use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How much a cached skill currently matters.
///
/// Raised by explicit tagging as a turn matches and loads skills;
/// lowered only by eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Not matched by the current query
    #[default]
    Inactive,
    /// Matched but not yet in use
    Relevant,
    /// Loaded into the current prompt
    Active,
}

/// The front-matter of a skill plus where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub location: PathBuf,
}

/// A fully loaded skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Markdown body, trimmed
    pub content: String,
    pub priority: Priority,
    pub loaded: bool,
}
