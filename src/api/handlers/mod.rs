use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use stageflow_core::models::Stage;

use super::types::*;
use super::AppState;
use crate::bridge::RelayError;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    let msg = msg.into();
    tracing::warn!("Validation error: {}", msg);
    (StatusCode::BAD_REQUEST, msg)
}

fn session_detail(state: &AppState, session_number: u32) -> Option<SessionDetail> {
    let registry = &state.registry;
    let thread_id = registry.find_thread_by_session(session_number)?;
    let mut detail = SessionDetail::bare(session_number, thread_id);
    if let Some(session) = registry.session_info(session_number) {
        let project = registry.project(&session.project_name);
        detail = detail.with_session(session);
        detail.project = project.map(ProjectDetail::from);
    }
    Some(detail)
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.registry.stats().total_sessions,
    })
}

pub async fn status(State(state): State<AppState>) -> Json<Status> {
    let running_hosts = state.bridge.running_sessions().await;
    Json(Status {
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        stats: state.registry.stats(),
        running_hosts,
    })
}

// ============================================================
// Relay
// ============================================================

pub async fn relay(
    State(state): State<AppState>,
    Json(input): Json<RelayRequest>,
) -> Result<Json<RelayResponse>, (StatusCode, String)> {
    if input.text.trim().is_empty() {
        return Err(bad_request("text is required"));
    }
    let length = input.text.chars().count();
    if length > MAX_RELAY_TEXT {
        return Err(bad_request(format!(
            "text exceeds {} characters",
            MAX_RELAY_TEXT
        )));
    }

    tracing::info!(
        session_number = input.session_number,
        thread_id = ?input.thread_id,
        length,
        "Relay request"
    );

    match state.bridge.relay(input.session_number, &input.text).await {
        Ok(()) => Ok(Json(RelayResponse {
            status: "relayed".to_string(),
            session_number: input.session_number,
            length,
        })),
        Err(e @ RelayError::HostMissing { .. }) => {
            tracing::warn!("{}", e);
            Err((StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e) => Err(internal_error(e)),
    }
}

// ============================================================
// Sessions
// ============================================================

pub async fn register_session(
    State(state): State<AppState>,
    Json(input): Json<RegisterSessionRequest>,
) -> Result<Json<RegisterSessionResponse>, (StatusCode, String)> {
    let stage = Stage::from_str(&input.stage)
        .ok_or_else(|| bad_request(format!("unknown stage: {}", input.stage)))?;
    if input.thread_id.trim().is_empty() {
        return Err(bad_request("thread_id is required"));
    }
    if input.session_number == 0 {
        return Err(bad_request("session_number must be positive"));
    }

    let registry = &state.registry;
    let session_number = registry
        .register_session(input.session_number, &input.thread_id)
        .ok_or_else(|| {
            (
                StatusCode::CONFLICT,
                format!(
                    "Session {} is bound to another thread",
                    input.session_number
                ),
            )
        })?;
    registry.create_session_info(
        session_number,
        &input.thread_id,
        &input.project_name,
        stage,
        &input.working_directory,
    );

    if input.create_project {
        if let Some(path) = &input.project_path {
            registry.create_project_info(&input.project_name, path);
            registry.update_project_stage(&input.project_name, stage);
            registry.create_workflow_state(&input.project_name, stage);
        }
    }
    registry.add_thread_to_workflow(&input.project_name, stage, &input.thread_id);

    tracing::info!(
        session_number,
        thread_id = %input.thread_id,
        project = %input.project_name,
        "Session registered"
    );
    Ok(Json(RegisterSessionResponse {
        status: "registered".to_string(),
        session_number,
        thread_id: input.thread_id,
        project_name: input.project_name,
    }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_number): Path<u32>,
) -> Result<Json<SessionDetail>, (StatusCode, String)> {
    session_detail(&state, session_number).map(Json).ok_or((
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_number),
    ))
}

pub async fn get_session_by_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionDetail>, (StatusCode, String)> {
    state
        .registry
        .get_session(&thread_id)
        .and_then(|n| session_detail(&state, n))
        .map(Json)
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("No session found for thread {}", thread_id),
        ))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    let registry = &state.registry;
    let sessions: Vec<SessionDetail> = registry
        .list_sessions()
        .into_iter()
        .map(|s| match registry.session_info(s.session_number) {
            Some(info) => SessionDetail::bare(s.session_number, s.thread_id).with_session(info),
            None => SessionDetail::bare(s.session_number, s.thread_id),
        })
        .collect();

    Json(SessionList {
        total_count: sessions.len(),
        sessions,
        stats: registry.stats(),
    })
}
