//! `file_operations`: read, write, list and check files under allowed roots.

use std::io;
use std::path::{Component, Path, PathBuf};

use aiq_core::error::ToolError;
use aiq_core::tool::{Tool, names};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct FileOperationsTool {
    roots: Vec<PathBuf>,
}

impl FileOperationsTool {
    /// Roots that cannot be resolved are skipped.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots.iter().filter_map(|r| resolve(r).ok()).collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve `path` and make sure it stays under one of the roots.
    fn validate(&self, path: &str) -> Result<PathBuf, ToolError> {
        let denied = |reason: String| ToolError::PermissionDenied {
            tool_name: names::FILE_OPERATIONS.into(),
            reason,
        };

        let raw = Path::new(path);
        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(denied(format!("path traversal is not allowed: {path}")));
        }

        let resolved = resolve(raw).map_err(|e| denied(format!("invalid path '{path}': {e}")))?;
        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            return Ok(resolved);
        }

        let roots: Vec<String> = self.roots.iter().map(|r| r.display().to_string()).collect();
        Err(denied(format!(
            "path '{path}' is not within allowed directories: {}",
            roots.join(", ")
        )))
    }
}

/// Absolute, symlink-free form of `path`. Components past the deepest
/// existing ancestor are appended unchanged, so files about to be written
/// resolve too.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut pending = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                pending.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in pending.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: names::FILE_OPERATIONS.into(),
        reason,
    }
}

fn required_path(args: &Map<String, Value>) -> Result<&str, ToolError> {
    args.get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments("path is required".into()))
}

#[async_trait]
impl Tool for FileOperationsTool {
    fn name(&self) -> &str {
        names::FILE_OPERATIONS
    }

    fn description(&self) -> &str {
        "Read, write, list or check files. Paths must stay inside the AIQ config directory or the current working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read", "write", "list", "exists"],
                    "description": "The file operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory path; list defaults to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write (write only)"
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, args: Map<String, Value>, _cancel: CancellationToken) -> Result<Value, ToolError> {
        let operation = args.get("operation").and_then(Value::as_str).ok_or_else(|| {
            ToolError::InvalidArguments("operation is required (read, write, list, exists)".into())
        })?;
        debug!(operation, path = ?args.get("path"), "File operation");

        match operation {
            "read" => {
                let path = self.validate(required_path(&args)?)?;
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| failed(format!("failed to read file: {e}")))?;
                Ok(json!({ "status": "success", "content": content }))
            }
            "write" => {
                let path = self.validate(required_path(&args)?)?;
                let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| failed(format!("failed to create directory: {e}")))?;
                }
                tokio::fs::write(&path, content)
                    .await
                    .map_err(|e| failed(format!("failed to write file: {e}")))?;
                Ok(json!({ "status": "success", "message": "File written successfully" }))
            }
            "list" => {
                let path = match args.get("path").and_then(Value::as_str).filter(|p| !p.is_empty()) {
                    Some(p) => self.validate(p)?,
                    None => {
                        let cwd = std::env::current_dir()
                            .map_err(|e| failed(format!("failed to get current directory: {e}")))?;
                        self.validate(&cwd.to_string_lossy())?
                    }
                };
                let mut entries = tokio::fs::read_dir(&path)
                    .await
                    .map_err(|e| failed(format!("failed to list directory: {e}")))?;
                let mut files = Vec::new();
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| failed(format!("failed to list directory: {e}")))?
                {
                    files.push(entry.file_name().to_string_lossy().into_owned());
                }
                files.sort();
                Ok(json!({ "status": "success", "files": files }))
            }
            "exists" => {
                let path = self.validate(required_path(&args)?)?;
                let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
                Ok(json!({ "status": "success", "exists": exists }))
            }
            other => Err(ToolError::InvalidArguments(format!("unknown operation: {other}"))),
        }
    }
}
