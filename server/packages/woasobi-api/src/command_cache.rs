use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use woasobi_agent_management::agents::AgentId;
use woasobi_agent_management::locator::{current_extended_path, LocateBinary};
use woasobi_universal_agent_schema::{normalize_commands, AgentEvent, ClaudeNormalizer, SlashCommandInfo};

use crate::agent_run::{claude_environment, AgentConfig};
use crate::claude_sdk::{ClaudeQuery, QueryOptions};

pub const COMMAND_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const CACHE_FILE_NAME: &str = "claude-commands.json";

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;
type SharedProbe = Shared<BoxFuture<'static, Option<Vec<SlashCommandInfo>>>>;

#[derive(Debug, Error)]
pub enum CommandCacheError {
    #[error("command cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command cache json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runs a throwaway backend session to learn which commands it advertises.
pub trait CommandProbe: Send + Sync + fmt::Debug {
    fn probe(&self) -> BoxFuture<'static, Option<Vec<SlashCommandInfo>>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedCommands {
    timestamp: i64,
    commands: Vec<SlashCommandInfo>,
}

/// Slash commands advertised by Claude Code, kept in memory and on disk.
pub struct CommandCache {
    path: Option<PathBuf>,
    ttl: Duration,
    clock: Clock,
    probe: Arc<dyn CommandProbe>,
    memory: Mutex<Option<CachedCommands>>,
    inflight: tokio::sync::Mutex<Option<(u64, SharedProbe)>>,
    generation: AtomicU64,
}

impl fmt::Debug for CommandCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCache")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

pub fn default_cache_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("woasobi").join(CACHE_FILE_NAME))
}

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl CommandCache {
    pub fn new(path: Option<PathBuf>, probe: Arc<dyn CommandProbe>) -> Self {
        Self {
            path,
            ttl: COMMAND_CACHE_TTL,
            clock: Arc::new(system_clock),
            probe,
            memory: Mutex::new(None),
            inflight: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn is_fresh(&self, timestamp: i64) -> bool {
        let age = (self.clock)().saturating_sub(timestamp);
        age < i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Fresh commands from memory, falling back to the durable file.
    pub async fn get(&self) -> Option<Vec<SlashCommandInfo>> {
        if let Some(commands) = self.fresh_in_memory() {
            return Some(commands);
        }

        let path = self.path.as_ref()?;
        let entry = match read_cache_file(path).await {
            Ok(entry) => entry,
            Err(CommandCacheError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return None;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable command cache");
                return None;
            }
        };
        if !self.is_fresh(entry.timestamp) {
            tracing::debug!(path = %path.display(), "command cache expired");
            return None;
        }
        let commands = entry.commands.clone();
        *self.memory.lock().unwrap_or_else(PoisonError::into_inner) = Some(entry);
        Some(commands)
    }

    fn fresh_in_memory(&self) -> Option<Vec<SlashCommandInfo>> {
        let memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        memory
            .as_ref()
            .filter(|entry| self.is_fresh(entry.timestamp))
            .map(|entry| entry.commands.clone())
    }

    /// Probes the backend, sharing one in-flight probe between callers. The
    /// in-flight slot is cleared only once memory holds the result.
    pub async fn discover(&self) -> Option<Vec<SlashCommandInfo>> {
        let (generation, probe) = {
            let mut inflight = self.inflight.lock().await;
            if let Some(commands) = self.fresh_in_memory() {
                return Some(commands);
            }
            match inflight.as_ref() {
                Some((generation, probe)) => (*generation, probe.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let probe = self.probe.probe().shared();
                    tracing::info!(generation = generation, "discovering claude commands");
                    *inflight = Some((generation, probe.clone()));
                    (generation, probe)
                }
            }
        };

        let commands = probe.await.filter(|commands| !commands.is_empty());

        let remembered = {
            let mut inflight = self.inflight.lock().await;
            match inflight.as_ref() {
                Some((current, _)) if *current == generation => {
                    let entry = commands.clone().map(|commands| self.remember(commands));
                    *inflight = None;
                    entry
                }
                _ => None,
            }
        };
        if let Some(entry) = remembered {
            self.persist(&entry).await;
        }
        commands
    }

    /// Replaces the cached commands and rewrites the durable file.
    pub async fn store(&self, commands: Vec<SlashCommandInfo>) {
        let entry = self.remember(commands);
        self.persist(&entry).await;
    }

    fn remember(&self, commands: Vec<SlashCommandInfo>) -> CachedCommands {
        let entry = CachedCommands {
            timestamp: (self.clock)(),
            commands,
        };
        *self.memory.lock().unwrap_or_else(PoisonError::into_inner) = Some(entry.clone());
        entry
    }

    async fn persist(&self, entry: &CachedCommands) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_cache_file(path, entry).await {
            tracing::warn!(path = %path.display(), error = %err, "failed to persist command cache");
        }
    }

    pub async fn lookup(&self) -> Option<Vec<SlashCommandInfo>> {
        match self.get().await {
            Some(commands) => Some(commands),
            None => self.discover().await,
        }
    }
}

async fn read_cache_file(path: &Path) -> Result<CachedCommands, CommandCacheError> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn write_cache_file(path: &Path, entry: &CachedCommands) -> Result<(), CommandCacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(entry)?;
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, payload).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

/// Learns the command list from the `init` record of a `/help` run.
#[derive(Debug, Clone)]
pub struct ClaudeHelpProbe {
    locator: Arc<dyn LocateBinary>,
    query: Arc<dyn ClaudeQuery>,
    timeout: Duration,
}

impl ClaudeHelpProbe {
    pub fn new(locator: Arc<dyn LocateBinary>, query: Arc<dyn ClaudeQuery>) -> Self {
        Self {
            locator,
            query,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandProbe for ClaudeHelpProbe {
    fn probe(&self) -> BoxFuture<'static, Option<Vec<SlashCommandInfo>>> {
        let locator = Arc::clone(&self.locator);
        let query = Arc::clone(&self.query);
        let timeout = self.timeout;
        async move {
            let executable = tokio::task::spawn_blocking(move || locator.locate())
                .await
                .ok()
                .flatten()?;

            let cancel = CancellationToken::new();
            let _cancel_on_exit = cancel.clone().drop_guard();
            let config = AgentConfig::new(AgentId::Claude);
            let env = claude_environment(std::env::vars_os(), current_extended_path(), &config);
            let options = QueryOptions::new(executable, env, cancel).with_max_turns(1);
            let mut records = query.query("/help".to_string(), options);

            let capture = async {
                let mut normalizer = ClaudeNormalizer::new();
                while let Some(record) = records.next().await {
                    let record = record.ok()?;
                    let Ok(events) = normalizer.convert(&record) else {
                        continue;
                    };
                    for event in events {
                        if let AgentEvent::Init {
                            slash_commands: Some(names),
                            ..
                        } = event
                        {
                            return Some(normalize_commands(names));
                        }
                    }
                }
                None
            };

            match tokio::time::timeout(timeout, capture).await {
                Ok(commands) => commands,
                Err(_) => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "claude command probe timed out");
                    None
                }
            }
        }
        .boxed()
    }
}
