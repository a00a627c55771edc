use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use woasobi_agent_management::locator::current_extended_path;
use woasobi_universal_agent_schema::{failure_event, parse_exec_output, AgentEvent, CODEX_NOT_FOUND};

use super::{inherited_environment, locate, AgentConfig, AgentRuntime, EventStream, RunRequest};

/// Child environment for the Codex CLI.
pub fn codex_environment(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    path: OsString,
    config: &AgentConfig,
) -> HashMap<OsString, OsString> {
    let mut env = inherited_environment(base, path);
    if let Some(api_key) = &config.api_key {
        env.insert("OPENAI_API_KEY".into(), api_key.into());
        if config.base_url.is_none() {
            env.remove(&OsString::from("OPENAI_BASE_URL"));
        }
    }
    if let Some(base_url) = &config.base_url {
        env.insert("OPENAI_BASE_URL".into(), base_url.into());
    }
    if let Some(model) = &config.model {
        env.insert("CODEX_MODEL".into(), model.into());
    }
    env
}

pub fn codex_arguments(prompt: &str, model: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "--json".to_string(),
        "--skip-git-repo-check".to_string(),
    ];
    if let Some(model) = model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    args.push(prompt.to_string());
    args
}

async fn read_all<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buffer = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        tracing::debug!(error = %err, "codex pipe read failed");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn exit_failure(stderr: &str, code: Option<i32>) -> AgentEvent {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return failure_event(stderr);
    }
    match code {
        Some(code) => failure_event(format!("Codex exited with code {code}")),
        None => failure_event("Codex was terminated by a signal"),
    }
}

pub(super) fn run(runtime: AgentRuntime, request: RunRequest) -> EventStream {
    Box::pin(async_stream::stream! {
        let session = runtime.sessions.open();
        let session_id = session.id().to_string();
        let token = session.token().clone();
        tracing::info!(session_id = %session_id, provider = "codex", "agent run started");
        yield Ok(AgentEvent::session(session_id.clone()));

        let executable = match locate(&runtime.codex_locator).await {
            Ok(Some(executable)) => executable,
            Ok(None) => {
                tracing::warn!(session_id = %session_id, "codex executable not found");
                yield Ok(AgentEvent::error(CODEX_NOT_FOUND));
                drop(session);
                yield Ok(AgentEvent::done());
                return;
            }
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "codex lookup failed");
                yield Ok(AgentEvent::error(err.to_string()));
                drop(session);
                yield Ok(AgentEvent::done());
                return;
            }
        };

        if token.is_cancelled() {
            tracing::info!(session_id = %session_id, "agent run cancelled before spawn");
            drop(session);
            yield Ok(AgentEvent::done());
            return;
        }

        let config = &request.config;
        let args = codex_arguments(&request.prompt, config.model.as_deref());
        let env = codex_environment(std::env::vars_os(), current_extended_path(), config);
        let mut command = Command::new(&executable);
        command
            .args(&args)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        tracing::info!(session_id = %session_id, program = ?executable, "spawning codex");
        let spawned = command.spawn();
        match spawned {
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "failed to spawn codex");
                yield Ok(failure_event(format!("Failed to start Codex: {err}")));
            }
            Ok(mut child) => {
                let pid = child.id().unwrap_or(0);
                let stdout_task = tokio::spawn(read_all(child.stdout.take()));
                let stderr_task = tokio::spawn(read_all(child.stderr.take()));

                let waited = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    status = child.wait() => Some(status),
                };

                match waited {
                    None => {
                        tracing::info!(session_id = %session_id, pid = pid, "agent run cancelled; killing codex");
                        if let Err(err) = child.kill().await {
                            tracing::debug!(pid = pid, error = %err, "codex already exited");
                        }
                        stdout_task.abort();
                        stderr_task.abort();
                    }
                    Some(status) => {
                        let stdout = stdout_task.await.unwrap_or_default();
                        let stderr = stderr_task.await.unwrap_or_default();
                        let output = parse_exec_output(&stdout);
                        let emitted_text = output.text().is_some();
                        for event in output.into_events() {
                            yield Ok(event);
                        }
                        match status {
                            Ok(status) if status.success() => {
                                tracing::info!(session_id = %session_id, pid = pid, "codex exited");
                            }
                            Ok(status) => {
                                tracing::warn!(session_id = %session_id, pid = pid, code = ?status.code(), "codex exited with failure");
                                if !emitted_text {
                                    yield Ok(exit_failure(&stderr, status.code()));
                                }
                            }
                            Err(err) => {
                                tracing::warn!(session_id = %session_id, pid = pid, error = %err, "waiting on codex failed");
                                if !emitted_text {
                                    yield Ok(failure_event(err.to_string()));
                                }
                            }
                        }
                    }
                }
            }
        }

        drop(session);
        tracing::info!(session_id = %session_id, "agent run finished");
        yield Ok(AgentEvent::done());
    })
}
