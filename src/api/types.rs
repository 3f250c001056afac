//! Request and response bodies of the control plane, shared with [`crate::client`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stageflow_core::models::{Project, RegistryStats, Session, Stage};

/// Longest text accepted by `POST /relay`, in characters.
pub const MAX_RELAY_TEXT: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    #[serde(alias = "sessionNumber", alias = "session", alias = "session_num")]
    pub session_number: u32,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default, alias = "threadId")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayResponse {
    pub status: String,
    pub session_number: u32,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSessionRequest {
    #[serde(alias = "sessionNumber", alias = "session_num")]
    pub session_number: u32,
    #[serde(alias = "threadId")]
    pub thread_id: String,
    #[serde(alias = "projectName", alias = "idea_name")]
    pub project_name: String,
    #[serde(alias = "current_stage")]
    pub stage: String,
    #[serde(alias = "workingDirectory")]
    pub working_directory: PathBuf,
    #[serde(default, alias = "projectPath")]
    pub project_path: Option<PathBuf>,
    #[serde(default, alias = "createProject")]
    pub create_project: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSessionResponse {
    pub status: String,
    /// The number actually bound to the thread; an existing mapping wins over the request.
    pub session_number: u32,
    pub thread_id: String,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub root: PathBuf,
    pub current_stage: Stage,
    pub execution_workspace: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub documents: BTreeMap<Stage, PathBuf>,
}

impl From<Project> for ProjectDetail {
    fn from(project: Project) -> Self {
        Self {
            root: project.root,
            current_stage: project.current_stage,
            execution_workspace: project.execution_workspace,
            remote_url: project.remote_url,
            documents: project.documents,
        }
    }
}

/// One session as reported by the control plane. Metadata fields are absent for threads
/// that are mapped to a number but were never given session info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session_number: u32,
    pub thread_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectDetail>,
}

impl SessionDetail {
    pub fn bare(session_number: u32, thread_id: impl Into<String>) -> Self {
        Self {
            session_number,
            thread_id: thread_id.into(),
            status: "active".to_string(),
            project_name: None,
            stage: None,
            host_name: None,
            working_directory: None,
            created_at: None,
            project: None,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.project_name = Some(session.project_name);
        self.stage = Some(session.stage);
        self.host_name = Some(session.host_name);
        self.working_directory = Some(session.working_directory);
        self.created_at = Some(session.created_at);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionDetail>,
    pub total_count: usize,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub stats: RegistryStats,
    /// Session numbers whose backing host is currently running.
    pub running_hosts: Vec<u32>,
}
