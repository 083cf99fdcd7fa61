//! Pagesmith server: chat with an agent that builds simple web pages.
//!
//! Exposes a WebSocket chat endpoint backed by the conversation relay and
//! serves the generated site statically.

mod agent;
mod config;
mod state;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagesmith::relay::ConversationRelay;
use pagesmith::session::SessionStore;
use pagesmith::tools::{DataToolsProvider, SiteToolsProvider, ToolProvider, ToolRegistry};

use crate::agent::LoopbackCapability;
use crate::config::Config;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "pagesmith-server", about = "Chat server for agent-built web pages")]
struct Cli {
    /// Host to bind
    #[arg(long, env = "PAGESMITH_HOST")]
    host: Option<String>,

    /// Port to bind
    #[arg(long, env = "PAGESMITH_PORT")]
    port: Option<u16>,

    /// Load configuration from a TOML file instead of the environment
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagesmith=info,pagesmith_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    info!("Starting Pagesmith server on {}:{}", config.host, config.port);

    // Sandbox roots must exist before the tools or the static service touch
    // them.
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.site_dir)?;
    info!(
        "Sandbox roots: data={} site={}",
        config.data_dir.display(),
        config.site_dir.display()
    );

    let sessions = Arc::new(SessionStore::new());
    let tools = Arc::new(ToolRegistry::new(vec![
        Arc::new(DataToolsProvider::new(config.data_dir.clone())) as Arc<dyn ToolProvider>,
        Arc::new(SiteToolsProvider::new(config.site_dir.clone())) as Arc<dyn ToolProvider>,
    ]));

    let mut relay = ConversationRelay::new(sessions.clone(), Arc::new(LoopbackCapability), tools);
    if let Some(timeout) = config.turn_timeout() {
        relay = relay.with_turn_timeout(timeout);
    }

    let state = AppState {
        sessions,
        relay: Arc::new(relay),
        config: config.clone(),
    };

    let app = build_router(state, &config);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState, config: &Config) -> Router {
    // CORS configuration: explicit origin list when configured, otherwise
    // open (dev mode).
    let cors = match config
        .cors_allowed_origins
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        Some(origins) => {
            let list: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(list))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .route("/ws", get(ws::websocket_handler))
        .nest_service("/site", ServeDir::new(&config.site_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> &'static str {
    "Pagesmith Server"
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pagesmith-server",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.sessions.active_count().await,
        "dataDir": state.config.data_dir.display().to_string(),
        "siteDir": state.config.site_dir.display().to_string(),
    }))
}
