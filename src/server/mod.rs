//! HTTP API.
//!
//! | Method | Path | |
//! |--------|------|-|
//! | POST | `/api/generate-story` | full pipeline, returns the story with `_debug` |
//! | POST | `/api/generate-image` | regenerate one illustration from feedback |
//! | POST | `/api/character-profile` | standalone character profile |
//! | POST | `/api/save-story` | save an edited story |
//! | GET | `/api/stories` | stored story summaries |
//! | GET | `/api/stories/{id}` | one stored story |
//! | GET | `/api/stories/{id}/pdf` | render a stored story to PDF |
//! | GET | `/api/generation-status` | SSE stage labels |
//! | GET | `/health` | liveness |
//! | GET | `/stories/…` | static files from the stories root |

pub mod error;
pub mod handlers;
pub mod state;

use crate::config::StoryConfig;
use crate::error::StorybookError;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

pub use state::AppState;

/// Listener and CORS settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Allowed origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

/// Build the CORS layer. Fails on an origin that is not a valid header value.
pub fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, StorybookError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let parsed = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| StorybookError::InvalidConfig(format!("CORS origin '{o}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(parsed))
}

/// Build the application router with its middleware stack.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let stories = ServeDir::new(state.config.stories_root.clone());

    let api = Router::new()
        .route("/generate-story", post(handlers::generate_story_handler))
        .route("/generate-image", post(handlers::generate_image_handler))
        .route("/character-profile", post(handlers::character_profile_handler))
        .route("/save-story", post(handlers::save_story_handler))
        .route("/stories", get(handlers::list_stories_handler))
        .route("/stories/{id}", get(handlers::get_story_handler))
        .route("/stories/{id}/pdf", get(handlers::story_pdf_handler))
        .route("/generation-status", get(handlers::generation_status_handler));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .nest_service("/stories", stories)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until SIGINT or SIGTERM.
pub async fn serve(config: StoryConfig, options: &ServerOptions) -> Result<(), StorybookError> {
    let cors = build_cors_layer(&options.cors_origins)?;
    let state = AppState::new(config);
    let app = build_router(state, cors);

    let ip = options
        .host
        .parse::<IpAddr>()
        .map_err(|e| StorybookError::InvalidConfig(format!("host '{}': {e}", options.host)))?;
    let addr = SocketAddr::new(ip, options.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StorybookError::Internal(format!("bind {addr}: {e}")))?;
    info!(%addr, "Storybook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StorybookError::Internal(format!("server error: {e}")))?;
    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
