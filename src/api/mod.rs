mod handlers;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use stageflow_core::registry::SessionRegistry;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::bridge::ProcessSessionBridge;

/// State shared by every control plane handler. The registry is the same instance the
/// orchestrator uses.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub bridge: ProcessSessionBridge,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: SessionRegistry, bridge: ProcessSessionBridge) -> Self {
        Self {
            registry,
            bridge,
            started_at: Utc::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/relay", post(handlers::relay))
        // Sessions
        .route("/sessions", get(handlers::list_sessions))
        .route("/session/register", post(handlers::register_session))
        .route("/session/by-thread/{thread_id}", get(handlers::get_session_by_thread))
        .route("/session/{session_number}", get(handlers::get_session))
        // Health
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
