//! Reading `SKILL.md` documents.
//!
//! Layout on disk is one directory per skill:
//!
//! ```text
//! skills/
//!   mysql-install/SKILL.md
//!   replication/SKILL.md
//! ```
//!
//! Each document opens with a YAML block between `---` lines carrying at
//! least `name` and `description`; the Markdown body follows.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use aiq_core::error::SkillError;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::skill::{Metadata, Priority, Skill};

pub const SKILL_FILE: &str = "SKILL.md";

const DELIMITER: &str = "---";

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn invalid(path: &Path, reason: impl Into<String>) -> SkillError {
    SkillError::InvalidDocument {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Parse the YAML header and check the required keys.
fn parse_frontmatter(yaml: &str, path: &Path) -> Result<(String, String), SkillError> {
    let fm: Frontmatter = if yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| invalid(path, format!("invalid YAML: {e}")))?
    };

    let name = fm
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid(path, "missing required field 'name'"))?;
    let description = fm
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| invalid(path, "missing required field 'description'"))?;

    Ok((name, description))
}

/// Parse a complete skill document.
pub fn parse_document(content: &str, path: &Path) -> Result<Skill, SkillError> {
    let mut lines = content.lines();

    match lines.by_ref().find(|l| !l.trim().is_empty()) {
        Some(first) if first.trim() == DELIMITER => {}
        _ => return Err(invalid(path, "missing frontmatter delimiter")),
    }

    let mut yaml = Vec::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim() == DELIMITER {
            closed = true;
            break;
        }
        yaml.push(line);
    }
    if !closed {
        return Err(invalid(path, "missing closing frontmatter delimiter"));
    }

    let (name, description) = parse_frontmatter(&yaml.join("\n"), path)?;
    let body = lines.collect::<Vec<_>>().join("\n");

    Ok(Skill {
        name,
        description,
        content: body.trim().to_string(),
        priority: Priority::Inactive,
        loaded: true,
    })
}

/// Parse only the header, stopping at the closing delimiter.
pub fn parse_metadata<R: BufRead>(reader: R, path: &Path) -> Result<Metadata, SkillError> {
    let mut opened = false;
    let mut yaml = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| SkillError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let trimmed = line.trim();

        if !opened {
            if trimmed.is_empty() {
                continue;
            }
            if trimmed != DELIMITER {
                return Err(invalid(path, "missing frontmatter delimiter"));
            }
            opened = true;
            continue;
        }

        if trimmed == DELIMITER {
            let (name, description) = parse_frontmatter(&yaml.join("\n"), path)?;
            return Ok(Metadata {
                name,
                description,
                location: path.to_path_buf(),
            });
        }
        yaml.push(line);
    }

    if opened {
        Err(invalid(path, "missing closing frontmatter delimiter"))
    } else {
        Err(invalid(path, "missing frontmatter delimiter"))
    }
}

/// Read a skill file's metadata without reading its body.
pub fn read_metadata(path: &Path) -> Result<Metadata, SkillError> {
    let file = File::open(path).map_err(|e| SkillError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_metadata(BufReader::new(file), path)
}

/// Read and parse a full skill file.
pub fn load_skill(path: &Path) -> Result<Skill, SkillError> {
    let content = std::fs::read_to_string(path).map_err(|e| SkillError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_document(&content, path)
}

/// Scan `dir` for `<name>/SKILL.md` and collect their metadata.
///
/// Unreadable or malformed files are logged and skipped. Duplicate names
/// keep the first occurrence in directory-name order.
pub fn discover(dir: &Path) -> Vec<Metadata> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Skills directory not readable");
            return Vec::new();
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .map(|p| p.join(SKILL_FILE))
        .filter(|p| p.is_file())
        .collect();
    candidates.sort();

    let mut found: Vec<Metadata> = Vec::with_capacity(candidates.len());
    for path in candidates {
        match read_metadata(&path) {
            Ok(md) if found.iter().any(|f| f.name == md.name) => {
                warn!(skill = %md.name, path = %path.display(), "Duplicate skill name, skipping");
            }
            Ok(md) => found.push(md),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid skill"),
        }
    }

    debug!(dir = %dir.display(), count = found.len(), "Discovered skills");
    found
}
