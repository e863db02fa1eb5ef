//! `execute_command`: run a system command for setup and maintenance work.
//!
//! Commands run directly, not through a shell. Leading `VAR=value` words
//! become environment variables. A block-list and an interactive list
//! reject commands that are destructive or would wait on a terminal.
//!
//! There is no fixed deadline. The command is killed once it has been
//! silent for the idle timeout, and the timer restarts on any output.
//! Output is read in fixed-size chunks, so a line with no newline cannot
//! grow past the capture cap.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use aiq_config::ToolsConfig;
use aiq_core::error::ToolError;
use aiq_core::tool::{Tool, names};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SUCCESS_TAIL_LINES: usize = 20;
const FAILURE_TAIL_LINES: usize = 100;
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// A command line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandLine {
    env: Vec<(String, String)>,
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let mut env = Vec::new();

        while let Some(word) = words.next() {
            if !word.starts_with('-')
                && let Some((key, value)) = word.split_once('=')
                && !key.is_empty()
            {
                env.push((key.to_string(), value.to_string()));
                continue;
            }
            return Some(Self {
                env,
                program: word.to_string(),
                args: words.map(String::from).collect(),
            });
        }
        None
    }

    /// `/usr/bin/rm` and `rm` are the same command for the block-list.
    fn base_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

pub struct CommandTool {
    blocked: HashSet<String>,
    interactive: HashSet<String>,
    idle_timeout: Duration,
}

impl CommandTool {
    pub fn new(blocked: Vec<String>, interactive: Vec<String>, idle_timeout: Duration) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
            interactive: interactive.into_iter().collect(),
            idle_timeout,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(
            config.blocked_commands.clone(),
            config.interactive_commands.clone(),
            Duration::from_secs(config.command_idle_timeout_secs.max(1)),
        )
    }

    fn check(&self, line: &str, command: &CommandLine) -> Result<(), ToolError> {
        let name = command.base_name();
        if self.blocked.contains(name) {
            let mut blocked: Vec<_> = self.blocked.iter().map(String::as_str).collect();
            blocked.sort_unstable();
            return Err(ToolError::PermissionDenied {
                tool_name: names::EXECUTE_COMMAND.into(),
                reason: format!(
                    "command '{name}' is blocked for security reasons. Blocked commands: {}",
                    blocked.join(", ")
                ),
            });
        }

        if line.contains("sudo ") {
            return Err(ToolError::PermissionDenied {
                tool_name: names::EXECUTE_COMMAND.into(),
                reason: format!(
                    "command requires sudo privileges and cannot be executed automatically. \
                     Please run this command manually in your terminal: {line}"
                ),
            });
        }

        if self.interactive.contains(name) {
            return Err(ToolError::Unavailable {
                tool_name: names::EXECUTE_COMMAND.into(),
                reason: format!(
                    "command '{name}' requires interactive input and cannot be executed \
                     non-interactively. Please run it manually in your terminal, or use a \
                     non-interactive alternative"
                ),
            });
        }
        Ok(())
    }
}

impl Default for CommandTool {
    fn default() -> Self {
        Self::from_config(&ToolsConfig::default())
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        names::EXECUTE_COMMAND
    }

    fn description(&self) -> &str {
        "Execute shell commands for system operations (installation, setup, configuration). \
         Use for system operations, NOT for database queries. Most commands are allowed, but \
         dangerous commands (like rm, sudo, dd) are blocked for security."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command to execute (e.g., 'ls -la')"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Command arguments; replaces any given inline"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory for command execution"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Seconds without output before the command is killed (default: 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Map<String, Value>, cancel: CancellationToken) -> Result<Value, ToolError> {
        let line = args
            .get("command")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;

        let mut command = CommandLine::parse(line)
            .ok_or_else(|| ToolError::InvalidArguments(format!("no valid command found in: {line}")))?;
        self.check(line, &command)?;

        if let Some(explicit) = args.get("args").and_then(Value::as_array)
            && !explicit.is_empty()
        {
            command.args = explicit
                .iter()
                .map(|a| a.as_str().map_or_else(|| a.to_string(), String::from))
                .collect();
        }

        let idle_timeout = args
            .get("timeout")
            .and_then(Value::as_u64)
            .filter(|&t| t > 0)
            .map_or(self.idle_timeout, Duration::from_secs);

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = args.get("working_dir").and_then(Value::as_str).filter(|d| !d.is_empty()) {
            process.current_dir(dir);
        }

        debug!(program = %command.program, args = ?command.args, "Executing command");
        let output = run(process, idle_timeout, &cancel).await?;

        let tail = if output.exit_code == 0 {
            SUCCESS_TAIL_LINES
        } else {
            warn!(command = %line, exit_code = output.exit_code, "Command failed");
            FAILURE_TAIL_LINES
        };

        Ok(json!({
            "truncated_stdout": tail_lines(&output.stdout, tail),
            "truncated_stderr": tail_lines(&output.stderr, tail),
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exit_code": output.exit_code,
        }))
    }
}

struct CommandOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Output bytes up to [`MAX_CAPTURE_BYTES`]; the rest is read and dropped.
#[derive(Default)]
struct Capture(Vec<u8>);

impl Capture {
    fn push(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.0.len());
        self.0.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_text(self) -> String {
        String::from_utf8_lossy(&self.0).replace("\r\n", "\n")
    }
}

async fn run(
    mut process: Command,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ToolError> {
    let failed = |reason: String| ToolError::ExecutionFailed {
        tool_name: names::EXECUTE_COMMAND.into(),
        reason,
    };

    let mut child = process
        .spawn()
        .map_err(|e| failed(format!("failed to start command: {e}")))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| failed("stdout was not captured".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| failed("stderr was not captured".into()))?;

    let mut out_buf = [0u8; READ_CHUNK_BYTES];
    let mut err_buf = [0u8; READ_CHUNK_BYTES];
    let (mut out, mut err) = (Capture::default(), Capture::default());
    let (mut out_open, mut err_open) = (true, true);

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    let timed_out = || ToolError::Timeout {
        tool_name: names::EXECUTE_COMMAND.into(),
        timeout_secs: idle_timeout.as_secs(),
    };
    let cancelled = || ToolError::Cancelled("command execution cancelled".into());

    while out_open || err_open {
        tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => match read {
                Ok(n) if n > 0 => {
                    out.push(&out_buf[..n]);
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                }
                _ => out_open = false,
            },
            read = stderr.read(&mut err_buf), if err_open => match read {
                Ok(n) if n > 0 => {
                    err.push(&err_buf[..n]);
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                }
                _ => err_open = false,
            },
            _ = &mut idle => {
                let _ = child.start_kill();
                return Err(timed_out());
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(cancelled());
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| failed(format!("command execution failed: {e}")))?,
        _ = &mut idle => {
            let _ = child.start_kill();
            return Err(timed_out());
        }
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            return Err(cancelled());
        }
    };

    Ok(CommandOutput {
        stdout: out.into_text(),
        stderr: err.into_text(),
        exit_code: status.code().unwrap_or(-1),
    })
}

/// The last `max` lines of `output`, or all of it if shorter.
pub fn tail_lines(output: &str, max: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= max {
        return output.to_string();
    }
    lines[lines.len() - max..].join("\n")
}
