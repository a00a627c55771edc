use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi};
use woasobi_agent_management::agents::AgentId;
use woasobi_agent_management::locator::LivenessCache;
use woasobi_error::{ErrorType, ProblemDetails, WoasobiError};
use woasobi_universal_agent_schema::{AgentEvent, SlashCommandInfo};

use crate::agent_run::{
    looks_like_slash_command, AgentConfig, AgentRuntime, ConversationMessage, ConversationRole,
    RunRequest,
};
use crate::commands::{builtin_claude_commands, builtin_codex_commands, merge_commands};
use crate::models::{codex_models, codex_models_cache_path, ModelInfo};
use crate::sse::sse_response;

mod types;

pub use types::*;

#[derive(Debug)]
pub struct AppState {
    runtime: AgentRuntime,
    liveness: LivenessCache,
    http: reqwest::Client,
    started_at: Instant,
    codex_models_cache: Option<PathBuf>,
}

impl AppState {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self {
            runtime,
            liveness: LivenessCache::default(),
            http: reqwest::Client::new(),
            started_at: Instant::now(),
            codex_models_cache: codex_models_cache_path(),
        }
    }

    pub fn with_codex_models_cache(mut self, path: Option<PathBuf>) -> Self {
        self.codex_models_cache = path;
        self
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state)).0
}

pub fn build_router_with_state(shared: Arc<AppState>) -> (Router, Arc<AppState>) {
    let mut router = Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/openapi.json", get(get_openapi))
        .route("/agent", post(post_agent))
        .route("/agent/stop/:session_id", post(stop_agent))
        .route("/agent/commands/:provider", get(get_commands))
        .route("/agent/models/:provider", post(post_models))
        .with_state(shared.clone());

    let http_logging = match std::env::var("WOASOBI_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!("http.request", method = %req.method(), uri = %req.uri())
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::info!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    (router, shared)
}

/// Cancels every live run so their backend processes are released.
pub async fn shutdown(state: &Arc<AppState>) {
    let cancelled = state.runtime.sessions().cancel_all();
    tracing::info!(cancelled = cancelled, "cancelled running sessions");
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_root,
        get_health,
        post_agent,
        stop_agent,
        get_commands,
        post_models
    ),
    components(
        schemas(
            AgentRequest,
            ModelConfig,
            ConversationMessage,
            ConversationRole,
            AgentEvent,
            SlashCommandInfo,
            ModelsRequest,
            ModelInfo,
            StopResponse,
            HealthResponse,
            CliAvailability,
            RootResponse,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "agent", description = "Agent runs")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:2026")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Woasobi(#[from] WoasobiError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Woasobi(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

fn parse_agent_id(value: &str) -> Result<AgentId, WoasobiError> {
    AgentId::parse(value).ok_or_else(|| WoasobiError::UnsupportedAgent {
        agent: value.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, body = RootResponse)),
    tag = "meta"
)]
async fn get_root() -> Json<RootResponse> {
    let endpoints = [
        "GET /",
        "GET /health",
        "GET /openapi.json",
        "POST /agent",
        "POST /agent/stop/:sessionId",
        "GET /agent/commands/:provider",
        "POST /agent/models/:provider",
    ];
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: endpoints.iter().map(|endpoint| endpoint.to_string()).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let probe_state = state.clone();
    let clis = tokio::task::spawn_blocking(move || {
        let available = |agent: AgentId| {
            probe_state
                .liveness
                .is_available(agent, probe_state.runtime.locator(agent).as_ref())
        };
        CliAvailability {
            claude: available(AgentId::Claude),
            codex: available(AgentId::Codex),
        }
    })
    .await
    .unwrap_or_else(|err| {
        tracing::warn!(error = %err, "cli availability check failed");
        CliAvailability {
            claude: false,
            codex: false,
        }
    });

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        uptime: state.started_at.elapsed().as_secs_f64(),
        clis,
    })
}

async fn get_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/agent",
    request_body = AgentRequest,
    responses(
        (status = 200, description = "One `data:` frame per event", content_type = "text/event-stream", body = AgentEvent),
        (status = 400, body = ProblemDetails)
    ),
    tag = "agent"
)]
async fn post_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRequest>,
) -> Result<Response, ApiError> {
    let provider = match request.provider.as_deref() {
        Some(provider) => parse_agent_id(provider)?,
        None => AgentId::Claude,
    };
    if request.prompt.trim().is_empty() {
        return Err(WoasobiError::InvalidRequest {
            message: "prompt is required".to_string(),
        }
        .into());
    }

    let model_config = request.model_config.unwrap_or_default();
    let conversation = request.conversation.unwrap_or_default();
    tracing::info!(
        provider = %provider,
        has_api_key = model_config.api_key.is_some(),
        model = ?model_config.model,
        conversation_len = conversation.len(),
        "agent run requested"
    );

    let is_slash_command = request
        .is_slash_command
        .unwrap_or_else(|| looks_like_slash_command(&request.prompt));
    let config = AgentConfig {
        provider,
        api_key: model_config.api_key,
        base_url: model_config.base_url,
        model: model_config.model,
        cwd: request.cwd.filter(|cwd| !cwd.is_empty()).map(PathBuf::from),
    };
    let run = RunRequest {
        prompt: request.prompt,
        config,
        conversation,
        permission_mode: request.permission_mode,
        is_slash_command,
    };

    Ok(sse_response(state.runtime.run(run)))
}

#[utoipa::path(
    post,
    path = "/agent/stop/{session_id}",
    responses(
        (status = 200, body = StopResponse),
        (status = 404, body = ProblemDetails)
    ),
    params(("session_id" = String, Path, description = "Session id from the `session` event")),
    tag = "agent"
)]
async fn stop_agent(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    if !state.runtime.sessions().cancel(&session_id) {
        return Err(WoasobiError::SessionNotFound { session_id }.into());
    }
    tracing::info!(session_id = %session_id, "agent run stopped");
    Ok(Json(StopResponse {
        status: "stopped".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/agent/commands/{provider}",
    responses(
        (status = 200, body = [SlashCommandInfo]),
        (status = 400, body = ProblemDetails)
    ),
    params(("provider" = String, Path, description = "`claude` or `codex`")),
    tag = "agent"
)]
async fn get_commands(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<Vec<SlashCommandInfo>>, ApiError> {
    let commands = match parse_agent_id(&provider)? {
        AgentId::Codex => builtin_codex_commands(),
        AgentId::Claude => match state.runtime.cached_commands().await {
            Some(discovered) if !discovered.is_empty() => {
                merge_commands(discovered, builtin_claude_commands())
            }
            _ => builtin_claude_commands(),
        },
    };
    Ok(Json(commands))
}

#[utoipa::path(
    post,
    path = "/agent/models/{provider}",
    request_body = ModelsRequest,
    responses((status = 200, body = [ModelInfo])),
    params(("provider" = String, Path, description = "Provider id; only `codex` lists models")),
    tag = "agent"
)]
async fn post_models(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Json<Vec<ModelInfo>> {
    if AgentId::parse(&provider) != Some(AgentId::Codex) {
        return Json(Vec::new());
    }

    let request: ModelsRequest = serde_json::from_slice(&body).unwrap_or_default();
    let config = request.model_config.unwrap_or_default();
    let api_key = config
        .api_key
        .filter(|key| !key.is_empty())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let base_url = config
        .base_url
        .filter(|url| !url.is_empty())
        .or_else(|| std::env::var("OPENAI_BASE_URL").ok());

    Json(
        codex_models(
            &state.http,
            state.codex_models_cache.as_deref(),
            api_key.as_deref(),
            base_url.as_deref(),
        )
        .await,
    )
}
