use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Stage;

/// A numbered execution context bound to one chat thread.
///
/// Session numbers are allocated by the registry from a counter that starts at 1 and is
/// never reused. Every stage transition creates a new session, so a session's stage is set
/// once at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_number: u32,
    pub thread_id: String,
    pub project_name: String,
    pub stage: Stage,
    /// Name of the terminal host running the backing agent, e.g. `claude-session-3`.
    pub host_name: String,
    pub working_directory: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Lightweight `(number, thread)` pair returned by session listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRef {
    pub session_number: u32,
    pub thread_id: String,
}

/// Aggregate counts for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub next_session_number: u32,
    pub total_projects: usize,
    pub active_workflows: usize,
}
