//! Built-in tool executors for AIQ.
//!
//! Tools give the model the ability to act:
//! run setup commands, call HTTP endpoints, read and write files, query the
//! connected database and format results as tables.
//!
//! `execute_sql` is only registered when a database is connected.

pub mod command;
pub mod file_operations;
pub mod http_request;
pub mod sql;
pub mod table;

use std::sync::Arc;

use aiq_config::AppConfig;
use aiq_core::error::ToolError;
use aiq_core::tool::ToolRegistry;
use aiq_core::Mode;

pub use command::CommandTool;
pub use file_operations::FileOperationsTool;
pub use http_request::HttpRequestTool;
pub use sql::{Engine, QueryOutput, SqlDatabase, SqlTool};
pub use table::{RenderTableTool, render_table};

/// The registry for one session.
///
/// Security defaults come from `[tools]`:
/// - Commands: block-list and interactive list, idle timeout
/// - Files: confined to `allowed_dirs`, or the config dir and cwd
pub fn default_registry(config: &AppConfig, database: Option<Arc<SqlDatabase>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CommandTool::from_config(&config.tools)));
    registry.register(Box::new(HttpRequestTool::new()));
    registry.register(Box::new(FileOperationsTool::new(config.file_roots())));
    registry.register(Box::new(RenderTableTool));
    if let Some(database) = database {
        registry.register(Box::new(SqlTool::new(database, config.agent.confirm_sql)));
    }
    registry
}

/// Connect to `url` and describe it as a bound session mode.
///
/// The engine comes from the connection; `expected_engine`, when given,
/// must name the same one.
pub async fn connect_bound(
    url: &str,
    expected_engine: Option<&str>,
) -> Result<(Arc<SqlDatabase>, Mode), ToolError> {
    let db = SqlDatabase::connect(url).await?;
    db.ensure_engine(expected_engine)?;
    let schema = db.describe_schema().await?;
    let mode = Mode::Bound {
        schema,
        engine: db.engine().to_string(),
    };
    Ok((Arc::new(db), mode))
}
