#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use serde_json::Value;
use woasobi_agent_management::locator::LocateBinary;
use woasobi_api::agent_run::{AgentRuntime, EventStream};
use woasobi_api::claude_sdk::{ClaudeQuery, QueryError, QueryOptions, QueryStream};
use woasobi_api::command_cache::{CommandCache, CommandProbe};
use woasobi_api::session_registry::SessionRegistry;
use woasobi_universal_agent_schema::{AgentEvent, SlashCommandInfo};

#[derive(Debug, Clone)]
pub struct FixedLocator(pub Option<PathBuf>);

impl LocateBinary for FixedLocator {
    fn locate(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Prompt and flags a scripted query was invoked with.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub prompt: String,
    pub args: Vec<String>,
}

/// Replays canned Claude records, optionally failing or hanging afterwards.
#[derive(Debug, Default)]
pub struct ScriptedQuery {
    records: Vec<Value>,
    failure: Option<String>,
    hang: bool,
    calls: Arc<Mutex<Vec<RecordedQuery>>>,
}

impl ScriptedQuery {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<RecordedQuery>>> {
        Arc::clone(&self.calls)
    }
}

impl ClaudeQuery for ScriptedQuery {
    fn query(&self, prompt: String, options: QueryOptions) -> QueryStream {
        self.calls
            .lock()
            .expect("calls lock")
            .push(RecordedQuery {
                prompt,
                args: options.cli_args(),
            });
        let records = self.records.clone();
        let failure = self.failure.clone();
        let hang = self.hang;
        let cancel = options.cancel.clone();
        Box::pin(async_stream::stream! {
            for record in records {
                yield Ok(record);
            }
            if let Some(message) = failure {
                yield Err(QueryError::Exited { code: Some(1), message });
            }
            if hang {
                cancel.cancelled().await;
            }
        })
    }
}

#[derive(Debug, Default)]
pub struct StaticProbe(pub Option<Vec<SlashCommandInfo>>);

impl CommandProbe for StaticProbe {
    fn probe(&self) -> BoxFuture<'static, Option<Vec<SlashCommandInfo>>> {
        let commands = self.0.clone();
        async move { commands }.boxed()
    }
}

/// Panics inside the blocking lookup task.
#[derive(Debug)]
pub struct PanickingLocator;

impl LocateBinary for PanickingLocator {
    fn locate(&self) -> Option<PathBuf> {
        panic!("lookup exploded");
    }
}

/// Resolves after blocking for `delay`, like a slow login-shell lookup.
#[derive(Debug)]
pub struct SlowLocator {
    pub delay: Duration,
    pub path: PathBuf,
}

impl LocateBinary for SlowLocator {
    fn locate(&self) -> Option<PathBuf> {
        std::thread::sleep(self.delay);
        Some(self.path.clone())
    }
}

pub struct RuntimeBuilder {
    claude_locator: Arc<dyn LocateBinary>,
    codex_locator: Arc<dyn LocateBinary>,
    query: Arc<dyn ClaudeQuery>,
    probe: Arc<dyn CommandProbe>,
    cache_path: Option<PathBuf>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            claude_locator: Arc::new(FixedLocator(None)),
            codex_locator: Arc::new(FixedLocator(None)),
            query: Arc::new(ScriptedQuery::default()),
            probe: Arc::new(StaticProbe::default()),
            cache_path: None,
        }
    }

    pub fn claude(mut self, binary: &str, query: Arc<dyn ClaudeQuery>) -> Self {
        self.claude_locator = Arc::new(FixedLocator(Some(PathBuf::from(binary))));
        self.query = query;
        self
    }

    pub fn claude_locator(mut self, locator: Arc<dyn LocateBinary>) -> Self {
        self.claude_locator = locator;
        self
    }

    pub fn codex(self, binary: &Path) -> Self {
        self.codex_locator(Arc::new(FixedLocator(Some(binary.to_path_buf()))))
    }

    pub fn codex_locator(mut self, locator: Arc<dyn LocateBinary>) -> Self {
        self.codex_locator = locator;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn CommandProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    pub fn build(self) -> AgentRuntime {
        AgentRuntime::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(CommandCache::new(self.cache_path, self.probe)),
            self.claude_locator,
            self.codex_locator,
            self.query,
        )
    }
}

pub async fn collect_events(stream: EventStream) -> Vec<AgentEvent> {
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("run finished in time")
        .into_iter()
        .map(|event| event.expect("event"))
        .collect()
}

pub fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::kind).collect()
}

pub fn write_executable(path: &Path, script: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, script).expect("write executable");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set mode");
    }
}
