//! The tool-calling turn loop.
//!
//! One call to [`Orchestrator::run_turn`] answers one user query:
//!
//! 1. **Select skills**: match, demote last turn's unmatched skills, evict
//!    stale ones, track usage, load, tag `Active`
//! 2. **Assemble**: mode template + common policy + skills section
//! 3. **Budget**: compress history and skills if the prompt is near the window
//! 4. **Loop**: call the model; if it asks for tools, run them in order and
//!    feed each result back as a `tool` message; stop on a plain answer or
//!    at the iteration cap
//!
//! Tool failures never end the turn. They go back to the model as
//! `{"status":"error", ...}` payloads so it can recover.

use std::sync::Arc;
use std::time::Instant;

use aiq_config::AppConfig;
use aiq_core::error::ProviderError;
use aiq_core::tool::names;
use aiq_core::{
    AutoConfirm, Confirmer, DomainEvent, EventBus, Message, Mode, Provider, ProviderRequest,
    Session, ToolCall, ToolExecutor,
};
use aiq_skills::{Priority, Skill, SkillsManager, SkillsMatcher};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arguments::parse_arguments;
use crate::context::PromptCompressor;
use crate::prompt::{PromptTemplates, SystemPromptBuilder};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_EVICTION_WINDOW: usize = 5;

const FREE_MODE_SQL_ERROR: &str =
    "SQL execution is not available in free mode. Please connect a database to enable SQL queries.";
const SQL_RETRY_HINT: &str = "Check available Skills for correct syntax or required parameters. \
                              You may retry with corrections (max 2 attempts).";
const DISPLAYED_INSTRUCTION: &str = "Results already displayed to user in table format. \
    Do NOT list, repeat, or summarize the data. Just confirm completion or ask if user needs anything else.";
const SQL_CANCELLED: &str = "query execution cancelled by user";
const TOOL_CANCELLED: &str = "tool call cancelled by user";

/// Rows returned by the last successful `execute_sql` call of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    /// Read `columns` and `rows` out of an `execute_sql` payload.
    fn from_payload(payload: &Value) -> Option<Self> {
        let columns = payload.get("columns")?.as_array()?.iter().map(cell_text).collect();
        let rows = payload
            .get("rows")?
            .as_array()?
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|cells| cells.iter().map(cell_text).collect())
                    .unwrap_or_default()
            })
            .collect();
        Some(Self { columns, rows })
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// A completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The model's answer, or the last rendered output if it ended silently
    pub text: String,
    pub last_result: Option<QueryResult>,
    /// Model calls made
    pub iterations: u32,
    /// Skills in the final system prompt
    pub skills: Vec<String>,
}

/// Why a turn ended without an answer. Every variant still carries the
/// last query result so the caller can show it.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("LLM call failed: {source}")]
    Provider {
        #[source]
        source: ProviderError,
        last_result: Option<QueryResult>,
    },

    #[error("empty response from LLM")]
    EmptyResponse { last_result: Option<QueryResult> },

    #[error("max iterations ({limit}) reached without a final answer")]
    MaxIterations {
        limit: u32,
        last_result: Option<QueryResult>,
    },

    #[error("turn cancelled")]
    Cancelled { last_result: Option<QueryResult> },
}

impl OrchestratorError {
    pub fn last_result(&self) -> Option<&QueryResult> {
        match self {
            Self::Provider { last_result, .. }
            | Self::EmptyResponse { last_result }
            | Self::MaxIterations { last_result, .. }
            | Self::Cancelled { last_result } => last_result.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
    /// Usage window passed to [`SkillsManager::evict_unused_skills`]
    pub eviction_window: usize,
}

impl OrchestratorConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            eviction_window: DEFAULT_EVICTION_WINDOW,
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            max_iterations: config.agent.max_iterations.max(1),
            eviction_window: config.agent.eviction_window,
        }
    }
}

/// Results carried between tool calls within one turn.
#[derive(Debug, Default)]
struct TurnState {
    last_result: Option<QueryResult>,
    last_output: Option<String>,
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    executor: Arc<dyn ToolExecutor>,
    confirmer: Arc<dyn Confirmer>,
    skills: Option<Arc<SkillsManager>>,
    matcher: Arc<SkillsMatcher>,
    compressor: PromptCompressor,
    templates: PromptTemplates,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// An orchestrator with no skills, built-in templates, the default
    /// context window and a confirmer that approves everything.
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            confirmer: Arc::new(AutoConfirm),
            skills: None,
            matcher: Arc::new(SkillsMatcher::new()),
            compressor: PromptCompressor::default(),
            templates: PromptTemplates::builtin(),
            events: Arc::new(EventBus::default()),
            config,
        }
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn with_skills(mut self, manager: Arc<SkillsManager>, matcher: Arc<SkillsMatcher>) -> Self {
        self.skills = Some(manager);
        self.matcher = matcher;
        self
    }

    pub fn with_compressor(mut self, compressor: PromptCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Answer `query` within `session`.
    ///
    /// On success the query and the answer are appended to the session
    /// history. Tool-call traffic stays local to the turn.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, OrchestratorError> {
        info!(
            session_id = %session.id,
            free_mode = session.mode.is_free(),
            history = session.history.len(),
            "Processing turn"
        );

        let skills = self.select_skills(query).await;
        let builder = SystemPromptBuilder::new(self.templates.base_for(&session.mode));
        let mut system_prompt = builder.build(&skills);

        let compression = self
            .compressor
            .compress(&session.history, &skills, &system_prompt, query);
        let (history, skills) = if compression.compressed {
            system_prompt = builder.build(&compression.remaining_skills);
            self.events.publish(DomainEvent::PromptCompressed {
                history_len: compression.compressed_history.len(),
                remaining_skills: compression.remaining_skills.len(),
                timestamp: Utc::now(),
            });
            (compression.compressed_history, compression.remaining_skills)
        } else {
            (session.history.clone(), skills)
        };
        let skill_names: Vec<String> = skills.iter().map(|s| s.name.clone()).collect();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history);
        messages.push(Message::user(query));

        let tools = self.executor.definitions();
        let mut state = TurnState::default();

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled {
                    last_result: state.last_result,
                });
            }
            debug!(iteration, messages = messages.len(), "Calling model");

            let mut request = ProviderRequest::new(self.config.model.clone(), messages.clone());
            request.temperature = self.config.temperature;
            request.max_tokens = self.config.max_tokens;
            request.tools = tools.clone();

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.provider.complete(request) => Some(result),
            };
            let response = match reply {
                None => {
                    return Err(OrchestratorError::Cancelled {
                        last_result: state.last_result,
                    });
                }
                Some(Err(source)) => {
                    return Err(OrchestratorError::Provider {
                        source,
                        last_result: state.last_result,
                    });
                }
                Some(Ok(response)) => response,
            };

            if let Some(usage) = &response.usage {
                self.events.publish(DomainEvent::ResponseGenerated {
                    session_id: session.id.to_string(),
                    model: response.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: Utc::now(),
                });
            }

            let assistant = response.message;
            if assistant.tool_calls.is_empty() {
                let text = if assistant.content.trim().is_empty() {
                    match state.last_output.take() {
                        Some(output) => output,
                        None => {
                            return Err(OrchestratorError::EmptyResponse {
                                last_result: state.last_result,
                            });
                        }
                    }
                } else {
                    assistant.content
                };

                session.push(Message::user(query));
                session.push(Message::assistant(text.clone()));
                info!(iterations = iteration, "Turn complete");
                return Ok(TurnOutcome {
                    text,
                    last_result: state.last_result,
                    iterations: iteration,
                    skills: skill_names,
                });
            }

            debug!(count = assistant.tool_calls.len(), "Executing tool calls");
            let calls = assistant.tool_calls.clone();
            messages.push(assistant);

            for call in &calls {
                let payload = self.handle_call(call, &session.mode, cancel, &mut state).await;
                messages.push(Message::tool_result(&call.id, payload.to_string()));
            }
        }

        warn!(limit = self.config.max_iterations, "Max tool iterations reached");
        Err(OrchestratorError::MaxIterations {
            limit: self.config.max_iterations,
            last_result: state.last_result,
        })
    }

    async fn select_skills(&self, query: &str) -> Vec<Skill> {
        let Some(manager) = &self.skills else {
            return Vec::new();
        };
        let metadata = manager.list_metadata();
        if metadata.is_empty() {
            return Vec::new();
        }

        let matched = self.matcher.match_skills(query, &metadata).await;
        let names: Vec<String> = matched.into_iter().map(|m| m.name).collect();

        let demoted = manager.demote_active_except(&names);
        if !demoted.is_empty() {
            debug!(skills = ?demoted, "Skills no longer active");
        }

        let evicted = manager.evict_unused_skills(self.config.eviction_window);
        if !evicted.is_empty() {
            self.events.publish(DomainEvent::SkillsEvicted {
                names: evicted,
                timestamp: Utc::now(),
            });
        }

        if names.is_empty() {
            debug!("No skills needed");
            return Vec::new();
        }

        for name in &names {
            manager.track_usage(name, query);
            manager.set_priority(name, Priority::Relevant);
        }

        let (loaded, error) = manager.load_many(&names);
        if let Some(e) = error {
            warn!(error = %e, "Failed to load some skills");
        }

        let mut active = Vec::with_capacity(loaded.len());
        for mut skill in loaded {
            manager.set_priority(&skill.name, Priority::Active);
            skill.priority = Priority::Active;
            active.push(skill);
        }

        if !active.is_empty() {
            let names: Vec<String> = active.iter().map(|s| s.name.clone()).collect();
            info!(skills = ?names, "Loaded skills");
            self.events.publish(DomainEvent::SkillsLoaded {
                names,
                timestamp: Utc::now(),
            });
        }
        active
    }

    async fn handle_call(
        &self,
        call: &ToolCall,
        mode: &Mode,
        cancel: &CancellationToken,
        state: &mut TurnState,
    ) -> Value {
        let is_sql = call.name == names::EXECUTE_SQL;
        if is_sql && mode.is_free() {
            self.publish_executed(&call.name, Some(FREE_MODE_SQL_ERROR), 0);
            return error_payload(FREE_MODE_SQL_ERROR, None);
        }

        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Unusable tool arguments");
                let message = e.to_string();
                self.publish_executed(&call.name, Some(&message), 0);
                return error_payload(&message, None);
            }
        };

        if self.executor.requires_confirmation(&call.name) {
            let answer = self.confirmer.confirm(&confirmation_prompt(&call.name, &args)).await;
            if !answer.is_confirmed() {
                info!(tool = %call.name, ?answer, "Tool call not confirmed");
                let message = if is_sql { SQL_CANCELLED } else { TOOL_CANCELLED };
                return json!({ "status": "cancelled", "message": message });
            }
        }

        self.events.publish(DomainEvent::ToolStarted {
            tool_name: call.name.clone(),
            summary: summarize_call(&call.name, &args),
            timestamp: Utc::now(),
        });

        debug!(tool = %call.name, "Executing tool");
        let started = Instant::now();
        let outcome = self.executor.execute(&call.name, args, cancel.clone()).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let payload = match outcome {
            Ok(value) => shape_result(&call.name, value, state),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                error_payload(&e.to_string(), is_sql.then_some(SQL_RETRY_HINT))
            }
        };

        let error = (payload.get("status").and_then(Value::as_str) == Some("error")).then(|| {
            payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("tool reported an error")
        });
        self.publish_executed(&call.name, error, duration_ms);
        payload
    }

    fn publish_executed(&self, tool_name: &str, error: Option<&str>, duration_ms: u64) {
        self.events.publish(DomainEvent::ToolExecuted {
            tool_name: tool_name.to_string(),
            success: error.is_none(),
            error: error.map(str::to_string),
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Adjust a successful tool result before it goes back to the model, and
/// remember anything the turn may need to return.
fn shape_result(name: &str, mut value: Value, state: &mut TurnState) -> Value {
    match name {
        names::EXECUTE_COMMAND => annotate_exit_status(&mut value),
        names::EXECUTE_SQL => {
            if let Some(result) = QueryResult::from_payload(&value) {
                // The caller shows the rows; the model only needs the count
                let mut simplified = json!({
                    "status": "success",
                    "row_count": result.rows.len(),
                });
                if !result.rows.is_empty() {
                    simplified["displayed"] = json!(true);
                    simplified["instruction"] = json!(DISPLAYED_INSTRUCTION);
                }
                if let Some(message) = value.get("message") {
                    simplified["message"] = message.clone();
                }
                state.last_result = Some(result);
                value = simplified;
            }
        }
        _ => {}
    }

    if let Some(output) = value.get("output").and_then(Value::as_str).filter(|o| !o.is_empty()) {
        state.last_output = Some(output.to_string());
    }
    value
}

/// `status` from the exit code: 0 is success, anything else an error.
fn annotate_exit_status(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let code = obj.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        obj.insert("status".into(), json!("success"));
    } else {
        obj.insert("status".into(), json!("error"));
        obj.insert("error".into(), json!(format!("Command exited with code {code}")));
    }
}

fn error_payload(message: &str, hint: Option<&str>) -> Value {
    let mut payload = json!({ "status": "error", "error": message });
    if let Some(hint) = hint {
        payload["hint"] = json!(hint);
    }
    payload
}

fn confirmation_prompt(name: &str, args: &Map<String, Value>) -> String {
    match args.get("sql").and_then(Value::as_str) {
        Some(sql) if name == names::EXECUTE_SQL => {
            format!("Generated SQL:\n{sql}\n\nExecute this query?")
        }
        _ => format!("Run tool [{name}] with {}?", Value::Object(args.clone())),
    }
}

const SUMMARY_WIDTH: usize = 80;
const SUMMARY_PATH_WIDTH: usize = 60;

/// One line describing a tool call for progress display.
pub fn summarize_call(name: &str, args: &Map<String, Value>) -> String {
    let text = |key: &str| args.get(key).and_then(Value::as_str);
    let described = match name {
        names::EXECUTE_SQL => text("sql").map(|sql| format!("with SQL: {}", truncate(sql, SUMMARY_WIDTH))),
        names::EXECUTE_COMMAND => {
            text("command").map(|cmd| format!("with command: {}", truncate(cmd, SUMMARY_WIDTH)))
        }
        names::HTTP_REQUEST => text("url").map(|url| {
            let method = text("method").unwrap_or("GET");
            format!("{method} {}", truncate(url, SUMMARY_PATH_WIDTH))
        }),
        names::FILE_OPERATIONS => text("operation").map(|op| match text("path") {
            Some(path) => format!("{op}: {}", truncate(path, SUMMARY_PATH_WIDTH)),
            None => op.to_string(),
        }),
        names::RENDER_TABLE => args
            .get("rows")
            .and_then(Value::as_array)
            .map(|rows| format!("with {} row(s)", rows.len())),
        _ => None,
    };
    let described = described.unwrap_or_else(|| {
        let raw = Value::Object(args.clone()).to_string();
        format!("with args: {}", truncate(&raw, SUMMARY_PATH_WIDTH))
    });
    format!("[{name}] {described}")
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let kept: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
