//! # termgraph HTTP API Module
//!
//! Read-only REST API over a loaded session, served with axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Graph counters and readiness
//! - `GET /concepts/{id}` - One concept with its parents
//! - `GET /concepts/{id}/ancestors?form=stated|inferred`
//! - `GET /concepts/{id}/descendants?form=stated|inferred&self=true`
//! - `POST /ecl` - Resolve an expression
//! - `GET /integrity` - Re-run the integrity checks
//!
//! ## Security Configuration
//!
//! - `TERMGRAPH_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `server.api_key` / `TERMGRAPH_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod types;

pub use handlers::{
    ApiError, ancestors_handler, concept_handler, descendants_handler, ecl_handler,
    health_handler, integrity_handler, status_handler,
};
pub use types::{
    ConceptResponse, ConceptSetResponse, EclRequest, EclResponse, ErrorResponse, Form,
    HealthResponse, HierarchyQuery, IntegrityResponse, StatusResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use termgraph_core::{GraphError, IntegrityOptions, Session};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the graph session.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<Session>>,
    /// Bearer key; `None` disables authentication.
    pub api_key: Option<Arc<str>>,
    pub integrity: IntegrityOptions,
}

impl AppState {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
            api_key: None,
            integrity: IntegrityOptions::default(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: Option<&str>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty()).map(Arc::from);
        self
    }

    #[must_use]
    pub fn with_integrity(mut self, integrity: IntegrityOptions) -> Self {
        self.integrity = integrity;
        self
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `TERMGRAPH_CORS_ORIGINS`.
///
/// - `*` allows every origin
/// - unset or unparsable falls back to localhost only
/// - otherwise a comma-separated origin list
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("TERMGRAPH_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins (TERMGRAPH_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => Some(hv),
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins in TERMGRAPH_CORS_ORIGINS, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit,
/// authentication.
pub fn create_router(state: AppState) -> Router {
    if state.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("API key authentication disabled; set TERMGRAPH_API_KEY to enable it");
    }

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/concepts/{id}", get(handlers::concept_handler))
        .route("/concepts/{id}/ancestors", get(handlers::ancestors_handler))
        .route("/concepts/{id}/descendants", get(handlers::descendants_handler))
        .route("/ecl", post(handlers::ecl_handler))
        .route("/integrity", get(handlers::integrity_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_auth_middleware,
        ))
        .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server over a loaded session.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), GraphError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GraphError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("termgraph HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| GraphError::Io(format!("Server error: {}", e)))
}
