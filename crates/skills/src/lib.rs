//! Skills for AIQ.
//!
//! A skill is a Markdown document with a YAML front-matter header that gives
//! the model domain guidance (installation steps, engine quirks, runbooks).
//! Skills are not tools: their text is injected into the system prompt when
//! a query needs it.
//!
//! - [`store`] reads `SKILL.md` files, metadata-only or in full
//! - [`SkillsManager`] owns the loaded-skill cache and usage history
//! - [`SkillsMatcher`] decides which skills a query needs

pub mod manager;
pub mod matcher;
pub mod skill;
pub mod store;

pub use manager::{RECENT_QUERY_CAPACITY, SkillsManager};
pub use matcher::{DEFAULT_MAX_SKILLS, MatchResult, SkillsMatcher, extract_keywords, keyword_match};
pub use skill::{Metadata, Priority, Skill};
