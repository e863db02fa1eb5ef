//! Prompt templates on disk.
//!
//! Templates live in `~/.aiq/prompts/` as Markdown files with an optional
//! YAML front-matter block (documentation for whoever edits them, never
//! sent to the model). Full-line HTML comments are stripped as well. Any
//! missing default file is written out on load so users have something to
//! edit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aiq_core::Mode;
use tracing::{debug, warn};

pub const FREE_MODE_BASE_FILE: &str = "free-mode-base.md";
pub const DATABASE_BASE_FILE: &str = "database-base.md";
pub const COMMON_FILE: &str = "common.md";

const DATABASE_TYPE_PLACEHOLDER: &str = "{{DATABASE_TYPE}}";
const SCHEMA_CONTEXT_PLACEHOLDER: &str = "{{SCHEMA_CONTEXT}}";

/// Engine patches, keyed by lowercase engine name.
const PATCHES: &[(&str, &str)] = &[
    ("mysql", "mysql.md"),
    ("postgresql", "postgresql.md"),
    ("seekdb", "seekdb.md"),
    ("sqlite", "sqlite.md"),
];

/// Engine whose patch applies when the engine is not recognized.
const FALLBACK_ENGINE: &str = "mysql";

const DEFAULT_FREE_MODE_BASE: &str = r#"---
description: "Free mode base prompt - used when no database is connected"
version: "1.1"
---

<MODE>
FREE MODE - No database connection available. SQL execution is not available.
</MODE>

<ROLE>
You are a helpful AI assistant. You can have natural conversations and help with system operations using available tools.
</ROLE>

<TOOLS>
- execute_command: System operations (install, setup, configuration). Not for database queries.
- http_request: Make HTTP requests.
- file_operations: Read/write files.
</TOOLS>

<POLICY>
- If the user asks for database operations, explain that no database is connected and ask whether they want to connect one.
- Do not guess database commands or run mysql/psql in free mode.
- If the request is ambiguous for the current mode, ask a clarifying question before acting.
</POLICY>
"#;

const DEFAULT_DATABASE_BASE: &str = r#"---
description: "Database mode base prompt - generic database query assistant"
version: "2.0"
placeholders:
  - name: "{{DATABASE_TYPE}}"
    description: "Replaced with the database engine type"
  - name: "{{SCHEMA_CONTEXT}}"
    description: "Replaced with database schema information"
---

<MODE>
DATABASE MODE - Connected to a database.
</MODE>

<ROLE>
You are a helpful AI assistant for database queries and related tasks.
</ROLE>

<CONTEXT>
- Database engine type: {{DATABASE_TYPE}}
- Database connection and schema information:
{{SCHEMA_CONTEXT}}
</CONTEXT>

<POLICY>
- Use execute_sql for database queries. Do not use execute_command to run mysql/psql.
- Respect engine-specific syntax differences. Engine-specific guidance is provided in a separate section.
- If a request is not a database query, use the appropriate non-SQL tools.
- When unsure about syntax, rely on schema context or ask a clarifying question.
</POLICY>

<TOOLS>
- execute_sql: Execute SQL queries against the database.
- render_table: Format query results as a table.
- execute_command: System operations (install, setup, configuration). Not for database queries.
- http_request: Make HTTP requests.
- file_operations: Read/write files.
</TOOLS>
"#;

const DEFAULT_COMMON: &str = r#"---
description: "Common section - appended to both free mode and database mode prompts"
version: "1.1"
---

<EXECUTION>
- For system operations, use execute_command with explicit commands.
- If a command requires elevated privileges or interactive input, ask the user to run it manually and explain why.
- Do not fabricate command outputs. Use tool results to decide the next step.
</EXECUTION>
"#;

const DEFAULT_MYSQL_PATCH: &str = r#"---
description: "MySQL syntax guidance"
version: "2.0"
---

<MYSQL_SYNTAX>
- Use SHOW TABLES; or SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE();
- Use the DATABASE() function to get the current database name.
- The schema name in WHERE table_schema is the actual database name, not the engine type.
</MYSQL_SYNTAX>
"#;

const DEFAULT_POSTGRESQL_PATCH: &str = r#"---
description: "PostgreSQL syntax guidance"
version: "2.0"
---

<POSTGRESQL_SYNTAX>
- Use SELECT tablename FROM pg_tables WHERE schemaname = 'public'; or query information_schema.tables with table_schema = 'public'.
- The default schema is 'public' unless otherwise specified.
- Use the current_database() function to get the current database name.
</POSTGRESQL_SYNTAX>
"#;

const DEFAULT_SEEKDB_PATCH: &str = r#"---
description: "SeekDB syntax guidance"
version: "2.0"
---

<SEEKDB_SYNTAX>
- SeekDB is MySQL-compatible, so use MySQL syntax patterns.
- Use SHOW TABLES; or SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE();
- Use the DATABASE() function to get the current database name.
</SEEKDB_SYNTAX>
"#;

const DEFAULT_SQLITE_PATCH: &str = r#"---
description: "SQLite syntax guidance"
version: "1.0"
---

<SQLITE_SYNTAX>
- List tables with SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%';
- Inspect a table with PRAGMA table_info(table_name);
- SQLite has no SHOW statements and no information_schema.
</SQLITE_SYNTAX>
"#;

fn default_files() -> [(&'static str, &'static str); 7] {
    [
        (FREE_MODE_BASE_FILE, DEFAULT_FREE_MODE_BASE),
        (DATABASE_BASE_FILE, DEFAULT_DATABASE_BASE),
        (COMMON_FILE, DEFAULT_COMMON),
        ("mysql.md", DEFAULT_MYSQL_PATCH),
        ("postgresql.md", DEFAULT_POSTGRESQL_PATCH),
        ("seekdb.md", DEFAULT_SEEKDB_PATCH),
        ("sqlite.md", DEFAULT_SQLITE_PATCH),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("prompt file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("prompt file {file}: missing closing front-matter delimiter")]
    UnclosedFrontmatter { file: String },
}

/// The loaded prompt texts, front-matter already removed.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    free_mode_base: String,
    database_base: String,
    common: String,
    /// Engine name → patch body
    patches: HashMap<String, String>,
}

impl PromptTemplates {
    /// The compiled-in defaults.
    pub fn builtin() -> Self {
        let mut templates = Self {
            free_mode_base: String::new(),
            database_base: String::new(),
            common: String::new(),
            patches: HashMap::new(),
        };
        for (file, content) in default_files() {
            // The defaults always carry well-formed front-matter
            let body = parse_prompt_file(content, file).unwrap_or_default();
            templates.set(file, body);
        }
        templates
    }

    /// Write any missing defaults into `dir`, then read every template
    /// from it. Patch files are optional.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        for (file, content) in default_files() {
            let path = dir.join(file);
            if !path.exists() {
                std::fs::write(&path, content).map_err(|e| io_error(&path, e))?;
                debug!(path = %path.display(), "Wrote default prompt");
            }
        }

        let mut templates = Self::builtin();
        templates.patches.clear();

        for file in [FREE_MODE_BASE_FILE, DATABASE_BASE_FILE, COMMON_FILE] {
            let path = dir.join(file);
            let content = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            templates.set(file, parse_prompt_file(&content, file)?);
        }

        for (_, file) in PATCHES {
            let path = dir.join(file);
            match std::fs::read_to_string(&path) {
                Ok(content) => templates.set(file, parse_prompt_file(&content, file)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }

        Ok(templates)
    }

    /// [`load`](Self::load), falling back to the built-in defaults.
    pub fn load_or_builtin(dir: &Path) -> Self {
        match Self::load(dir) {
            Ok(templates) => templates,
            Err(e) => {
                warn!(error = %e, "Failed to load prompts, using defaults");
                Self::builtin()
            }
        }
    }

    fn set(&mut self, file: &str, body: String) {
        match file {
            FREE_MODE_BASE_FILE => self.free_mode_base = body,
            DATABASE_BASE_FILE => self.database_base = body,
            COMMON_FILE => self.common = body,
            _ => {
                if let Some((engine, _)) = PATCHES.iter().find(|(_, f)| *f == file) {
                    self.patches.insert(engine.to_string(), body);
                }
            }
        }
    }

    pub fn free_mode_base(&self) -> &str {
        &self.free_mode_base
    }

    pub fn common(&self) -> &str {
        &self.common
    }

    /// The database base with placeholders filled, plus the engine's patch.
    pub fn database_mode_base(&self, engine: &str, schema: &str) -> String {
        let mut prompt = self
            .database_base
            .replace(DATABASE_TYPE_PLACEHOLDER, engine)
            .replace(SCHEMA_CONTEXT_PLACEHOLDER, schema);

        let key = match engine.to_lowercase().as_str() {
            "postgres" => "postgresql".to_string(),
            other if PATCHES.iter().any(|(e, _)| *e == other) => other.to_string(),
            _ => FALLBACK_ENGINE.to_string(),
        };
        if let Some(patch) = self.patches.get(&key).filter(|p| !p.is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(patch);
        }
        prompt
    }

    /// Mode base followed by the common section.
    pub fn base_for(&self, mode: &Mode) -> String {
        let base = match mode {
            Mode::Free => self.free_mode_base.clone(),
            Mode::Bound { schema, engine } => self.database_mode_base(engine, schema),
        };
        if self.common.is_empty() {
            base
        } else {
            format!("{base}\n\n{}", self.common)
        }
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

fn io_error(path: &Path, e: std::io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Strip front-matter and full-line HTML comments from a template.
pub fn parse_prompt_file(content: &str, file: &str) -> Result<String, TemplateError> {
    let content = content.trim();
    if !content.starts_with("---") {
        return Ok(strip_html_comments(content));
    }

    let mut lines = content.lines();
    lines.next();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim() == "---" {
            closed = true;
            break;
        }
    }
    if !closed {
        return Err(TemplateError::UnclosedFrontmatter { file: file.to_string() });
    }

    Ok(strip_html_comments(&lines.collect::<Vec<_>>().join("\n")))
}

fn strip_html_comments(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let t = line.trim();
            !(t.starts_with("<!--") && t.ends_with("-->"))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
