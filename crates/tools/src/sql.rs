//! `execute_sql`: run statements against the session's database.
//!
//! [`SqlDatabase`] owns one pool for the engine named by the URL scheme:
//!
//! | URL | Engine |
//! |-----|--------|
//! | `sqlite:…` or a plain path | SQLite |
//! | `mysql://`, `mariadb://` | MySQL |
//! | `seekdb://` | seekdb (MySQL wire protocol) |
//! | `postgres://`, `postgresql://` | PostgreSQL |
//!
//! It can describe its own schema for the database-mode prompt.
//! [`SqlTool`] exposes it to the model and is gated by confirmation when
//! `agent.confirm_sql` is set.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use aiq_core::error::ToolError;
use aiq_core::tool::{Tool, names};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_SERVER_CONNECTIONS: u32 = 10;
const COMPLETION_MESSAGE: &str = "SQL executed successfully. Task completed.";
const WRITE_PREFIXES: [&str; 8] = [
    "CREATE", "ALTER", "DROP", "INSERT", "UPDATE", "DELETE", "CALL", "TRUNCATE",
];

const SQLITE_SCHEMA: &str = "\
SELECT m.name, p.name, p.type, \
       CASE p.\"notnull\" WHEN 0 THEN 'YES' ELSE 'NO' END, \
       CASE WHEN p.pk > 0 THEN 'PRI' ELSE '' END \
FROM sqlite_master m JOIN pragma_table_info(m.name) p \
WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
ORDER BY m.name, p.cid";

const MYSQL_SCHEMA: &str = "\
SELECT table_name, column_name, column_type, is_nullable, column_key \
FROM information_schema.columns \
WHERE table_schema = DATABASE() \
ORDER BY table_name, ordinal_position";

const POSTGRES_SCHEMA: &str = "\
SELECT c.table_name, c.column_name, c.data_type, c.is_nullable, \
       CASE WHEN EXISTS ( \
           SELECT 1 FROM information_schema.table_constraints tc \
           JOIN information_schema.key_column_usage k \
             ON tc.constraint_name = k.constraint_name \
            AND tc.table_schema = k.table_schema \
            AND tc.table_name = k.table_name \
           WHERE tc.constraint_type = 'PRIMARY KEY' \
             AND k.table_schema = c.table_schema \
             AND k.table_name = c.table_name \
             AND k.column_name = c.column_name \
       ) THEN 'PRI' ELSE '' END \
FROM information_schema.columns c \
WHERE c.table_schema = current_schema() \
ORDER BY c.table_name, c.ordinal_position";

/// Database engines a session can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Sqlite,
    MySql,
    PostgreSql,
    SeekDb,
}

impl Engine {
    /// The name used for prompt dialect patches.
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::MySql => "mysql",
            Engine::PostgreSql => "postgresql",
            Engine::SeekDb => "seekdb",
        }
    }

    /// Parse a user-facing engine name. `postgres` and `mariadb` are aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Engine::Sqlite),
            "mysql" | "mariadb" => Some(Engine::MySql),
            "postgresql" | "postgres" => Some(Engine::PostgreSql),
            "seekdb" => Some(Engine::SeekDb),
            _ => None,
        }
    }

    /// The engine a connection URL addresses. Strings without a scheme are
    /// SQLite file paths.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("sqlite:") {
            return Some(Engine::Sqlite);
        }
        match url.split_once("://") {
            None => Some(Engine::Sqlite),
            Some((scheme, _)) => match scheme.to_ascii_lowercase().as_str() {
                "mysql" | "mariadb" => Some(Engine::MySql),
                "postgres" | "postgresql" => Some(Engine::PostgreSql),
                "seekdb" => Some(Engine::SeekDb),
                _ => None,
            },
        }
    }

    fn schema_query(&self) -> &'static str {
        match self {
            Engine::Sqlite => SQLITE_SCHEMA,
            Engine::MySql | Engine::SeekDb => MYSQL_SCHEMA,
            Engine::PostgreSql => POSTGRES_SCHEMA,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows of one statement, every cell rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

enum Pool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
    Postgres(PgPool),
}

pub struct SqlDatabase {
    pool: Pool,
    engine: Engine,
}

fn unavailable(reason: String) -> ToolError {
    ToolError::Unavailable {
        tool_name: names::EXECUTE_SQL.into(),
        reason,
    }
}

impl SqlDatabase {
    /// Connect to the database a URL names. The engine comes from the scheme.
    pub async fn connect(url: &str) -> Result<Self, ToolError> {
        let engine = Engine::from_url(url).ok_or_else(|| {
            unavailable(format!(
                "unsupported database URL '{}': expected sqlite, mysql, seekdb or postgres",
                redact_url(url)
            ))
        })?;

        let pool = match engine {
            Engine::Sqlite => Pool::Sqlite(connect_sqlite(url).await?),
            Engine::MySql | Engine::SeekDb => Pool::MySql(connect_mysql(url).await?),
            Engine::PostgreSql => Pool::Postgres(connect_postgres(url).await?),
        };

        info!(url = %redact_url(url), %engine, "Connected to database");
        Ok(Self { pool, engine })
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Fail when `expected` names an engine other than the connected one.
    pub fn ensure_engine(&self, expected: Option<&str>) -> Result<(), ToolError> {
        let Some(name) = expected else {
            return Ok(());
        };
        match Engine::from_name(name) {
            Some(engine) if engine == self.engine => Ok(()),
            Some(engine) => Err(unavailable(format!(
                "engine '{engine}' was requested but the database is {}",
                self.engine
            ))),
            None => Err(unavailable(format!("unknown database engine '{name}'"))),
        }
    }

    /// Tables and their columns, one block per table.
    pub async fn describe_schema(&self) -> Result<String, ToolError> {
        let output = self.query(self.engine.schema_query()).await?;
        Ok(format_schema(&output.rows))
    }

    /// Run one statement. Statements that return nothing yield empty output.
    pub async fn query(&self, sql: &str) -> Result<QueryOutput, ToolError> {
        tokio::time::timeout(QUERY_TIMEOUT, self.run(sql))
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: names::EXECUTE_SQL.into(),
                timeout_secs: QUERY_TIMEOUT.as_secs(),
            })?
    }

    async fn run(&self, sql: &str) -> Result<QueryOutput, ToolError> {
        match &self.pool {
            Pool::Sqlite(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await.map_err(query_failed)?;
                Ok(collect(&rows, sqlite_cell))
            }
            // The text protocol hands back every value as text
            Pool::MySql(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await.map_err(query_failed)?;
                Ok(collect(&rows, text_cell))
            }
            Pool::Postgres(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await.map_err(query_failed)?;
                Ok(collect(&rows, text_cell))
            }
        }
    }
}

async fn connect_sqlite(url: &str) -> Result<SqlitePool, ToolError> {
    let options = if url.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(url)
            .map_err(|e| unavailable(format!("invalid SQLite URL: {e}")))?
    } else {
        SqliteConnectOptions::new().filename(url)
    };

    // One long-lived connection keeps `:memory:` databases alive
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| unavailable(format!("failed to open database: {e}")))
}

async fn connect_mysql(url: &str) -> Result<MySqlPool, ToolError> {
    // seekdb speaks the MySQL protocol under its own scheme
    let url = match url.split_once("://") {
        Some((_, rest)) => format!("mysql://{rest}"),
        None => url.to_string(),
    };
    let options = MySqlConnectOptions::from_str(&url)
        .map_err(|e| unavailable(format!("invalid MySQL URL: {e}")))?;

    MySqlPoolOptions::new()
        .max_connections(MAX_SERVER_CONNECTIONS)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| unavailable(format!("failed to connect to database: {e}")))
}

async fn connect_postgres(url: &str) -> Result<PgPool, ToolError> {
    let options = PgConnectOptions::from_str(url)
        .map_err(|e| unavailable(format!("invalid PostgreSQL URL: {e}")))?;

    PgPoolOptions::new()
        .max_connections(MAX_SERVER_CONNECTIONS)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| unavailable(format!("failed to connect to database: {e}")))
}

/// The URL with any password replaced, for logs and errors.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

fn query_failed(e: sqlx::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: names::EXECUTE_SQL.into(),
        reason: format!("query execution failed: {e}"),
    }
}

fn collect<R: Row>(rows: &[R], cell: fn(&R, usize) -> String) -> QueryOutput {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| cell(row, i)).collect())
        .collect();
    QueryOutput { columns, rows }
}

/// Text form of one SQLite cell, decoded by the value's storage class.
fn sqlite_cell(row: &SqliteRow, index: usize) -> String {
    let kind = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return "NULL".to_string(),
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return String::new(),
    };

    let text = match kind.as_str() {
        "INTEGER" | "BIGINT" | "INT8" => row.try_get_unchecked::<i64, _>(index).map(|v| v.to_string()),
        "REAL" => row.try_get_unchecked::<f64, _>(index).map(|v| v.to_string()),
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(index).map(|v| v.to_string()),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|v| String::from_utf8_lossy(&v).into_owned()),
        _ => row.try_get_unchecked::<String, _>(index),
    };
    text.unwrap_or_default()
}

/// Text form of a cell returned over a text protocol.
fn text_cell<R>(row: &R, index: usize) -> String
where
    R: Row,
    for<'r> String: sqlx::Decode<'r, R::Database>,
    for<'r> Vec<u8>: sqlx::Decode<'r, R::Database>,
    usize: sqlx::ColumnIndex<R>,
{
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return "NULL".to_string(),
        Ok(_) => {}
        Err(_) => return String::new(),
    }
    row.try_get_unchecked::<String, _>(index)
        .or_else(|_| {
            row.try_get_unchecked::<Vec<u8>, _>(index)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .unwrap_or_default()
}

/// Render `(table, column, type, is_nullable, key)` rows as the prompt's
/// schema block.
fn format_schema(rows: &[Vec<String>]) -> String {
    let mut schema = String::new();
    let mut current: Option<&str> = None;

    for row in rows {
        let [table, column, data_type, nullable, key] = row.as_slice() else {
            continue;
        };
        if current != Some(table.as_str()) {
            if current.is_some() {
                schema.push('\n');
            }
            schema.push_str(&format!("Table: {table}\nColumns:\n"));
            current = Some(table.as_str());
        }

        let data_type = if data_type.is_empty() { "ANY" } else { data_type.as_str() };
        let nullable = if nullable.eq_ignore_ascii_case("NO") { "NOT NULL" } else { "NULL" };
        let key = if key == "PRI" { " PRIMARY KEY" } else { "" };
        schema.push_str(&format!("  - {column} ({data_type}, {nullable}{key})\n"));
    }
    if current.is_some() {
        schema.push('\n');
    }
    schema
}

fn is_write_statement(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    WRITE_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub struct SqlTool {
    database: Arc<SqlDatabase>,
    confirm: bool,
}

impl SqlTool {
    pub fn new(database: Arc<SqlDatabase>, confirm: bool) -> Self {
        Self { database, confirm }
    }
}

#[async_trait]
impl Tool for SqlTool {
    fn name(&self) -> &str {
        names::EXECUTE_SQL
    }

    fn description(&self) -> &str {
        "Execute a SQL statement against the connected database and return columns and rows."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "The SQL statement to execute"
                }
            },
            "required": ["sql"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        self.confirm
    }

    async fn execute(&self, args: Map<String, Value>, cancel: CancellationToken) -> Result<Value, ToolError> {
        let sql = args
            .get("sql")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("sql is required".into()))?;

        debug!(sql, "Executing SQL");
        let output = tokio::select! {
            output = self.database.query(sql) => output?,
            _ = cancel.cancelled() => return Err(ToolError::Cancelled("query cancelled".into())),
        };

        let mut result = json!({
            "status": "success",
            "row_count": output.rows.len(),
            "columns": output.columns,
            "rows": output.rows,
        });
        if output.rows.is_empty() && is_write_statement(sql) {
            result["message"] = json!(COMPLETION_MESSAGE);
        }
        Ok(result)
    }
}
