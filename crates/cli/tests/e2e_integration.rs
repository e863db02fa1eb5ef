//! End-to-end integration tests for the AIQ orchestrator.
//!
//! These tests drive a full turn through the real tool registry, a real
//! in-memory SQLite database and skills on disk. Only the model is
//! scripted.

use std::path::Path;
use std::sync::{Arc, Mutex};

use aiq_agent::{Orchestrator, OrchestratorConfig, OrchestratorError, PromptTemplates};
use aiq_config::AppConfig;
use aiq_core::error::ProviderError;
use aiq_core::message::{Message, Role, ToolCall};
use aiq_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use aiq_core::{DomainEvent, Mode, Session};
use aiq_skills::{SkillsManager, SkillsMatcher};
use aiq_tools::{SqlDatabase, default_registry, render_table};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence and keeps
/// every request it saw.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn tool_then_text(name: &str, arguments: Value, answer: &str) -> Arc<Self> {
        Self::new(vec![
            tool_response(vec![tool_call("call_1", name, arguments)]),
            text_response(answer),
        ])
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut responses = self.responses.lock().unwrap();
        let call = self.requests.lock().unwrap().len();
        if responses.is_empty() {
            panic!("ScriptedProvider exhausted: call #{call}");
        }
        self.requests.lock().unwrap().push(request);
        Ok(responses.remove(0))
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "e2e-model".into(),
        finish_reason: Some("stop".into()),
    }
}

fn tool_response(calls: Vec<ToolCall>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = calls;
    ProviderResponse {
        message,
        usage: None,
        model: "e2e-model".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

async fn sample_database() -> Arc<SqlDatabase> {
    let db = SqlDatabase::connect("sqlite::memory:").await.unwrap();
    db.query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT)")
        .await
        .unwrap();
    db.query("INSERT INTO users (name, email) VALUES ('alice', 'a@example.com'), ('bob', NULL)")
        .await
        .unwrap();
    Arc::new(db)
}

async fn bound_session(db: &SqlDatabase) -> Session {
    Session::new(Mode::Bound {
        schema: db.describe_schema().await.unwrap(),
        engine: "sqlite".into(),
    })
}

fn config_with_roots(roots: &[&Path]) -> AppConfig {
    let mut config = AppConfig::default();
    config.tools.allowed_dirs = roots.iter().map(|p| p.to_path_buf()).collect();
    config
}

fn orchestrator(provider: Arc<ScriptedProvider>, config: &AppConfig, db: Option<Arc<SqlDatabase>>) -> Orchestrator {
    let registry = Arc::new(default_registry(config, db));
    Orchestrator::new(provider, registry, OrchestratorConfig::new("e2e-model"))
}

fn write_skill(root: &Path, name: &str, description: &str, body: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("SKILL.md"),
        format!("---\nname: {name}\ndescription: {description}\n---\n\n{body}\n"),
    )
    .unwrap();
}

/// Tool messages of a recorded request, parsed.
fn tool_payloads(request: &ProviderRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| serde_json::from_str(&m.content).unwrap())
        .collect()
}

fn system_prompt(request: &ProviderRequest) -> &str {
    let first = &request.messages[0];
    assert_eq!(first.role, Role::System);
    &first.content
}

// ── Database mode ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_sql_query_returns_rows_to_the_caller() {
    let db = sample_database().await;
    let mut session = bound_session(&db).await;
    let provider = ScriptedProvider::tool_then_text(
        "execute_sql",
        json!({"sql": "SELECT name, email FROM users ORDER BY name"}),
        "There are two users.",
    );
    let agent = orchestrator(provider.clone(), &AppConfig::default(), Some(db));

    let outcome = agent
        .run_turn(&mut session, "who are the users?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "There are two users.");
    assert_eq!(outcome.iterations, 2);
    let result = outcome.last_result.expect("query result");
    assert_eq!(result.columns, vec!["name", "email"]);
    assert_eq!(
        result.rows,
        vec![vec!["alice", "a@example.com"], vec!["bob", "NULL"]]
    );
    let table = render_table(&result.columns, &result.rows);
    assert!(table.contains("alice"));
    assert!(table.contains("NULL"));

    let requests = provider.requests();
    assert!(system_prompt(&requests[0]).contains("Table: users"));
    assert!(requests[0].tools.iter().any(|t| t.name == "execute_sql"));

    // The model sees the count, not the rows
    let payloads = tool_payloads(&requests[1]);
    assert_eq!(payloads[0]["status"], "success");
    assert_eq!(payloads[0]["row_count"], 2);
    assert_eq!(payloads[0]["displayed"], true);
    assert!(payloads[0].get("rows").is_none());

    assert_eq!(session.history.len(), 2);
}

#[tokio::test]
async fn e2e_ddl_reports_completion_and_changes_schema() {
    let db = sample_database().await;
    let mut session = bound_session(&db).await;
    let provider = ScriptedProvider::tool_then_text(
        "execute_sql",
        json!({"sql": "CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL)"}),
        "Created the orders table.",
    );
    let agent = orchestrator(provider.clone(), &AppConfig::default(), Some(db.clone()));

    let outcome = agent
        .run_turn(&mut session, "create an orders table", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Created the orders table.");
    let payloads = tool_payloads(&provider.requests()[1]);
    assert_eq!(payloads[0]["message"], "SQL executed successfully. Task completed.");
    assert!(payloads[0].get("displayed").is_none());

    let schema = db.describe_schema().await.unwrap();
    assert!(schema.contains("Table: orders"));
    assert!(schema.contains("total (REAL, NULL)"));
}

#[tokio::test]
async fn e2e_sql_error_carries_retry_hint_and_model_recovers() {
    let db = sample_database().await;
    let mut session = bound_session(&db).await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("c1", "execute_sql", json!({"sql": "SELEC * FROM users"}))]),
        tool_response(vec![tool_call("c2", "execute_sql", json!({"sql": "SELECT COUNT(*) AS n FROM users"}))]),
        text_response("There are 2 users."),
    ]);
    let agent = orchestrator(provider.clone(), &AppConfig::default(), Some(db));

    let outcome = agent
        .run_turn(&mut session, "how many users?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.last_result.unwrap().rows, vec![vec!["2"]]);

    let first = &tool_payloads(&provider.requests()[1])[0];
    assert_eq!(first["status"], "error");
    assert!(first["hint"].as_str().unwrap().contains("max 2 attempts"));
}

#[tokio::test]
async fn e2e_progress_events_describe_each_tool_call() {
    let db = sample_database().await;
    let mut session = bound_session(&db).await;
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call("c1", "execute_sql", json!({"sql": "SELECT * FROM nope"}))]),
        tool_response(vec![tool_call("c2", "execute_sql", json!({"sql": "SELECT name FROM users"}))]),
        text_response("alice and bob"),
    ]);
    let agent = orchestrator(provider, &AppConfig::default(), Some(db));
    let mut events = agent.events().subscribe();

    agent
        .run_turn(&mut session, "list users", &CancellationToken::new())
        .await
        .unwrap();

    let mut lines = Vec::new();
    while let Ok(event) = events.try_recv() {
        if matches!(event.as_ref(), DomainEvent::ToolStarted { .. } | DomainEvent::ToolExecuted { .. }) {
            lines.push(event.to_string());
        }
    }
    assert_eq!(lines.len(), 4, "{lines:?}");
    assert_eq!(lines[0], "Calling tool [execute_sql] with SQL: SELECT * FROM nope");
    assert!(lines[1].starts_with("Tool [execute_sql] failed: "), "{}", lines[1]);
    assert!(lines[1].contains("nope"));
    assert_eq!(lines[2], "Calling tool [execute_sql] with SQL: SELECT name FROM users");
    assert_eq!(lines[3], "Tool [execute_sql] executed successfully");
}

#[tokio::test]
async fn e2e_bound_mode_engine_comes_from_the_connection() {
    let (db, mode) = aiq_tools::connect_bound("sqlite::memory:", None).await.unwrap();
    assert_eq!(db.engine().as_str(), "sqlite");
    match &mode {
        Mode::Bound { engine, .. } => assert_eq!(engine, "sqlite"),
        Mode::Free => panic!("expected bound mode"),
    }

    let err = aiq_tools::connect_bound("sqlite::memory:", Some("mysql"))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("requested but the database is sqlite"));

    let provider = ScriptedProvider::new(vec![text_response("ok")]);
    let agent = orchestrator(provider.clone(), &AppConfig::default(), Some(db));
    agent
        .run_turn(&mut Session::new(mode), "hi", &CancellationToken::new())
        .await
        .unwrap();
    assert!(system_prompt(&provider.requests()[0]).contains("<SQLITE_SYNTAX>"));
}

#[tokio::test]
async fn e2e_free_mode_refuses_sql() {
    let provider = ScriptedProvider::tool_then_text(
        "execute_sql",
        json!({"sql": "SELECT 1"}),
        "Please connect a database first.",
    );
    let config = AppConfig::default();
    let agent = orchestrator(provider.clone(), &config, None);
    let mut session = Session::new(Mode::Free);

    let outcome = agent
        .run_turn(&mut session, "select 1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Please connect a database first.");
    assert!(outcome.last_result.is_none());

    let requests = provider.requests();
    assert!(!requests[0].tools.iter().any(|t| t.name == "execute_sql"));
    let payloads = tool_payloads(&requests[1]);
    assert_eq!(payloads[0]["status"], "error");
    assert!(payloads[0]["error"].as_str().unwrap().contains("not available in free mode"));
}

// ── Skills and system tools ──────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn e2e_matched_skill_guides_a_command() {
    let skills_dir = tempfile::tempdir().unwrap();
    write_skill(
        skills_dir.path(),
        "mysql-install",
        "Install MySQL on macOS and Linux",
        "# Install\n\nRun the platform package manager.",
    );
    write_skill(
        skills_dir.path(),
        "log-rotation",
        "Rotate application logs",
        "# Logs\n\nUse logrotate.",
    );

    let provider = ScriptedProvider::tool_then_text(
        "execute_command",
        json!({"command": "echo installed"}),
        "MySQL is installed.",
    );
    let manager = Arc::new(SkillsManager::from_dir(skills_dir.path()));
    let agent = orchestrator(provider.clone(), &AppConfig::default(), None)
        .with_skills(manager.clone(), Arc::new(SkillsMatcher::new()));
    let mut events = agent.events().subscribe();
    let mut session = Session::new(Mode::Free);

    let outcome = agent
        .run_turn(&mut session, "install mysql", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.skills, vec!["mysql-install"]);
    let requests = provider.requests();
    let prompt = system_prompt(&requests[0]);
    assert!(prompt.contains("Run the platform package manager."));
    assert!(!prompt.contains("Use logrotate."));

    let payload = &tool_payloads(&requests[1])[0];
    assert_eq!(payload["status"], "success");
    assert_eq!(payload["exit_code"], 0);
    assert!(payload["stdout"].as_str().unwrap().contains("installed"));

    let mut saw_skills = false;
    let mut saw_tool = false;
    while let Ok(event) = events.try_recv() {
        match event.as_ref() {
            DomainEvent::SkillsLoaded { names, .. } => saw_skills = names == &["mysql-install"],
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                saw_tool = tool_name == "execute_command" && *success;
            }
            _ => {}
        }
    }
    assert!(saw_skills);
    assert!(saw_tool);
    assert_eq!(manager.cached_skills().len(), 1);
}

#[tokio::test]
async fn e2e_blocked_command_is_fed_back_as_error() {
    let provider = ScriptedProvider::tool_then_text(
        "execute_command",
        json!({"command": "rm -rf /tmp/aiq-e2e-nothing"}),
        "I can't remove files.",
    );
    let agent = orchestrator(provider.clone(), &AppConfig::default(), None);
    let mut session = Session::new(Mode::Free);

    let outcome = agent
        .run_turn(&mut session, "delete it", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "I can't remove files.");
    let payload = &tool_payloads(&provider.requests()[1])[0];
    assert_eq!(payload["status"], "error");
    assert!(payload["error"].as_str().unwrap().contains("Permission denied"));
}

#[tokio::test]
async fn e2e_file_operations_stay_inside_allowed_dirs() {
    let allowed = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let inside_file = allowed.path().join("notes/todo.txt");
    let outside_file = outside.path().join("secret.txt");

    let provider = ScriptedProvider::new(vec![
        tool_response(vec![
            tool_call(
                "w",
                "file_operations",
                json!({"operation": "write", "path": inside_file.to_str().unwrap(), "content": "buy milk"}),
            ),
            tool_call(
                "x",
                "file_operations",
                json!({"operation": "write", "path": outside_file.to_str().unwrap(), "content": "nope"}),
            ),
        ]),
        text_response("Saved your note."),
    ]);
    let config = config_with_roots(&[allowed.path()]);
    let agent = orchestrator(provider.clone(), &config, None);
    let mut session = Session::new(Mode::Free);

    agent
        .run_turn(&mut session, "save a note", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&inside_file).unwrap(), "buy milk");
    assert!(!outside_file.exists());

    let payloads = tool_payloads(&provider.requests()[1]);
    assert_eq!(payloads[0]["status"], "success");
    assert_eq!(payloads[1]["status"], "error");
}

#[tokio::test]
async fn e2e_rendered_table_is_the_fallback_answer() {
    let provider = ScriptedProvider::new(vec![
        tool_response(vec![tool_call(
            "t",
            "render_table",
            json!({"columns": ["host", "port"], "rows": [["db1", 3306]]}),
        )]),
        text_response(""),
    ]);
    let agent = orchestrator(provider.clone(), &AppConfig::default(), None);
    let mut session = Session::new(Mode::Free);

    let outcome = agent
        .run_turn(&mut session, "show the hosts as a table", &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.text.contains("db1"));
    assert!(outcome.text.contains("3306"));
    assert!(outcome.text.starts_with('┌'));
}

#[tokio::test]
async fn e2e_iteration_cap_keeps_last_result() {
    let db = sample_database().await;
    let mut session = bound_session(&db).await;
    let looping = tool_response(vec![tool_call("c", "execute_sql", json!({"sql": "SELECT id FROM users"}))]);
    let provider = ScriptedProvider::new(vec![looping.clone(), looping.clone(), looping]);
    let registry = Arc::new(default_registry(&AppConfig::default(), Some(db)));
    let mut config = OrchestratorConfig::new("e2e-model");
    config.max_iterations = 3;
    let agent = Orchestrator::new(provider.clone(), registry, config);

    let err = agent
        .run_turn(&mut session, "loop forever", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::MaxIterations { limit: 3, .. }));
    assert_eq!(err.last_result().unwrap().rows.len(), 2);
    assert_eq!(provider.calls(), 3);
    assert!(session.history.is_empty());
}

// ── Prompt templates ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_templates_loaded_from_directory() {
    let prompts = tempfile::tempdir().unwrap();
    PromptTemplates::load(prompts.path()).unwrap();
    assert!(prompts.path().join("common.md").exists());
    assert!(prompts.path().join("sqlite.md").exists());

    std::fs::write(
        prompts.path().join("free-mode-base.md"),
        "---\ndescription: custom\n---\nYou are the ops helper for ACME.\n",
    )
    .unwrap();
    std::fs::write(prompts.path().join("common.md"), "Always answer in one line.\n").unwrap();

    let templates = PromptTemplates::load(prompts.path()).unwrap();
    let provider = ScriptedProvider::new(vec![text_response("Hi.")]);
    let agent = orchestrator(provider.clone(), &AppConfig::default(), None).with_templates(templates);
    let mut session = Session::new(Mode::Free);

    agent
        .run_turn(&mut session, "hello", &CancellationToken::new())
        .await
        .unwrap();

    let requests = provider.requests();
    let prompt = system_prompt(&requests[0]);
    assert!(prompt.starts_with("You are the ops helper for ACME."));
    assert!(prompt.contains("Always answer in one line."));
    assert!(!prompt.contains("description: custom"));
}

#[tokio::test]
async fn e2e_conversation_carries_history() {
    let provider = ScriptedProvider::new(vec![
        text_response("Nice to meet you, Sam."),
        text_response("Your name is Sam."),
    ]);
    let agent = orchestrator(provider.clone(), &AppConfig::default(), None);
    let mut session = Session::new(Mode::Free);

    agent
        .run_turn(&mut session, "my name is Sam", &CancellationToken::new())
        .await
        .unwrap();
    let outcome = agent
        .run_turn(&mut session, "what is my name?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "Your name is Sam.");
    let second = &provider.requests()[1];
    assert!(second.messages.iter().any(|m| m.content == "my name is Sam"));
    assert_eq!(session.history.len(), 4);
}
