use std::sync::Arc;

use axum::http::HeaderValue;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

use crate::agent_run::AgentRuntime;
use crate::router::{build_router_with_state, shutdown, ApiDoc, AppState};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 2026;
const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:1420",
    "http://127.0.0.1:1420",
    "http://localhost:5173",
];

#[derive(Parser, Debug)]
#[command(name = "woasobi-api", bin_name = "woasobi-api")]
#[command(about = "Local agent API for WoaSobi", version)]
#[command(arg_required_else_help = true)]
pub struct WoasobiCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent HTTP server.
    Server(ServerArgs),
    /// Print the OpenAPI document.
    Openapi,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Allowed browser origins. Defaults to the desktop shell and dev server.
    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
}

pub fn run_woasobi_api() -> Result<(), CliError> {
    let cli = WoasobiCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(&cli.command)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Server(err.to_string()))
}

pub fn run_command(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Openapi => print_openapi(),
    }
}

fn print_openapi() -> Result<(), CliError> {
    let document = serde_json::to_string_pretty(&ApiDoc::openapi())?;
    println!("{document}");
    Ok(())
}

fn run_server(server: &ServerArgs) -> Result<(), CliError> {
    let state = Arc::new(AppState::new(AgentRuntime::from_environment()));
    let (mut router, state) = build_router_with_state(state);

    let cors = build_cors_layer(server)?;
    router = router.layer(cors);

    let addr = format!("{}:{}", server.host, server.port);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            command_cache = ?state.runtime().commands().path(),
            "server listening"
        );
        let shutdown_state = state.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                shutdown(&shutdown_state).await;
            })
            .await
            .map_err(|err| CliError::Server(err.to_string()))
    })
}

fn build_cors_layer(server: &ServerArgs) -> Result<CorsLayer, CliError> {
    let configured: Vec<&str> = if server.cors_allow_origin.is_empty() {
        DEFAULT_CORS_ORIGINS.to_vec()
    } else {
        server.cors_allow_origin.iter().map(String::as_str).collect()
    };

    let mut origins = Vec::with_capacity(configured.len());
    for origin in configured {
        let value: HeaderValue = origin
            .parse()
            .map_err(|_| CliError::InvalidCorsOrigin(origin.to_string()))?;
        origins.push(value);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}
