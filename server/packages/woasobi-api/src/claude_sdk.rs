//! Query seam for the Claude Code backend.
//!
//! [`ClaudeQuery`] yields the backend's native JSON records for one prompt.
//! [`ClaudeCodeProcess`] drives the `claude` executable in `stream-json`
//! print mode; tests substitute scripted implementations.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub const TOOLS_PRESET: &str = "claude_code";
pub const ALLOWED_TOOLS: &[&str] = &[
    "Read",
    "Edit",
    "Write",
    "Glob",
    "Grep",
    "Bash",
    "WebSearch",
    "WebFetch",
    "Task",
    "TodoWrite",
];
pub const SETTING_SOURCES: &[&str] = &["user", "project"];
pub const DEFAULT_PERMISSION_MODE: &str = "bypassPermissions";
pub const MAX_TURNS: u32 = 200;

pub type QueryStream = BoxStream<'static, Result<Value, QueryError>>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to start {program}: {error}")]
    Spawn {
        program: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to capture Claude Code {0}")]
    MissingPipe(&'static str),
    #[error("failed to talk to Claude Code: {0}")]
    Io(#[from] std::io::Error),
    #[error("{message}")]
    Exited { code: Option<i32>, message: String },
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub executable: PathBuf,
    pub tools_preset: String,
    pub allowed_tools: Vec<String>,
    pub setting_sources: Vec<String>,
    pub permission_mode: String,
    pub allow_dangerously_skip_permissions: bool,
    pub max_turns: u32,
    pub model: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<OsString, OsString>,
    pub cancel: CancellationToken,
}

impl QueryOptions {
    pub fn new(
        executable: PathBuf,
        env: HashMap<OsString, OsString>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executable,
            tools_preset: TOOLS_PRESET.to_string(),
            allowed_tools: ALLOWED_TOOLS.iter().map(|tool| tool.to_string()).collect(),
            setting_sources: SETTING_SOURCES.iter().map(|source| source.to_string()).collect(),
            permission_mode: DEFAULT_PERMISSION_MODE.to_string(),
            allow_dangerously_skip_permissions: true,
            max_turns: MAX_TURNS,
            model: None,
            cwd: None,
            env,
            cancel,
        }
    }

    /// Skipping permission checks is only allowed in bypass mode.
    pub fn with_permission_mode(mut self, mode: Option<&str>) -> Self {
        let mode = mode
            .map(str::trim)
            .filter(|mode| !mode.is_empty())
            .unwrap_or(DEFAULT_PERMISSION_MODE);
        self.permission_mode = mode.to_string();
        self.allow_dangerously_skip_permissions = mode == DEFAULT_PERMISSION_MODE;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Command-line arguments for `claude`, excluding the prompt which goes
    /// over stdin.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
            "--permission-mode".to_string(),
            self.permission_mode.clone(),
            "--setting-sources".to_string(),
            self.setting_sources.join(","),
        ];
        // `claude_code` is the executable's own default tool set.
        if self.tools_preset != TOOLS_PRESET {
            args.push("--tools".to_string());
            args.push(self.tools_preset.clone());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if self.allow_dangerously_skip_permissions {
            args.push("--allow-dangerously-skip-permissions".to_string());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

pub trait ClaudeQuery: Send + Sync + fmt::Debug {
    /// Streams native records until the backend finishes, fails, or
    /// `options.cancel` fires.
    fn query(&self, prompt: String, options: QueryOptions) -> QueryStream;
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeCodeProcess;

impl ClaudeQuery for ClaudeCodeProcess {
    fn query(&self, prompt: String, options: QueryOptions) -> QueryStream {
        Box::pin(async_stream::stream! {
            let args = options.cli_args();
            let mut command = Command::new(&options.executable);
            command
                .args(&args)
                .env_clear()
                .envs(&options.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(cwd) = &options.cwd {
                command.current_dir(cwd);
            }

            tracing::info!(program = ?options.executable, args = ?args, "spawning claude code");
            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(error) => {
                    tracing::error!(program = ?options.executable, error = %error, "failed to spawn claude code");
                    yield Err(QueryError::Spawn {
                        program: options.executable.display().to_string(),
                        error,
                    });
                    return;
                }
            };
            let pid = child.id().unwrap_or(0);
            tracing::info!(pid = pid, "claude code spawned");

            let (mut stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
                (Some(stdin), Some(stdout)) => (stdin, stdout),
                _ => {
                    yield Err(QueryError::MissingPipe("stdio"));
                    return;
                }
            };
            let stderr_task = child.stderr.take().map(|mut stderr| {
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    if let Err(err) = stderr.read_to_end(&mut buffer).await {
                        tracing::debug!(pid = pid, error = %err, "claude code stderr read failed");
                    }
                    String::from_utf8_lossy(&buffer).into_owned()
                })
            });

            if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                tracing::debug!(pid = pid, error = %err, "claude code closed stdin early");
            }
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            let mut reported_error: Option<String> = None;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = options.cancel.cancelled() => None,
                    line = lines.next_line() => Some(line),
                };
                let Some(line) = next else {
                    tracing::info!(pid = pid, "claude code cancelled");
                    if let Err(err) = child.kill().await {
                        tracing::debug!(pid = pid, error = %err, "claude code already exited");
                    }
                    return;
                };
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(record) => {
                                if let Some(message) = reported_failure(&record) {
                                    reported_error = Some(message);
                                }
                                yield Ok(record);
                            }
                            Err(err) => {
                                tracing::debug!(pid = pid, error = %err, "skipping non-json claude output");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(QueryError::Io(err));
                        return;
                    }
                }
            }

            let waited = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => None,
                status = child.wait() => Some(status),
            };
            let Some(status) = waited else {
                tracing::info!(pid = pid, "claude code cancelled while exiting");
                if let Err(err) = child.kill().await {
                    tracing::debug!(pid = pid, error = %err, "claude code already exited");
                }
                return;
            };
            match status {
                Ok(status) if status.success() => {
                    tracing::info!(pid = pid, "claude code exited");
                }
                Ok(status) => {
                    let stderr = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    tracing::warn!(pid = pid, code = ?status.code(), "claude code exited with failure");
                    yield Err(exit_error(status.code(), &stderr, reported_error));
                }
                Err(err) => yield Err(QueryError::Io(err)),
            }
        })
    }
}

/// Failure text carried by an error-flagged `result` record.
fn reported_failure(record: &Value) -> Option<String> {
    if record.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }
    if record.get("is_error").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    record
        .get("result")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn exit_error(code: Option<i32>, stderr: &str, reported: Option<String>) -> QueryError {
    let stderr = stderr.trim();
    let message = if !stderr.is_empty() {
        stderr.to_string()
    } else if let Some(reported) = reported {
        reported
    } else {
        match code {
            Some(code) => format!("Claude Code process exited with code {code}"),
            None => "Claude Code process was terminated by a signal".to_string(),
        }
    };
    QueryError::Exited { code, message }
}
