use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Stage;

/// Pipeline bookkeeping for one project.
///
/// `next_channel` is always `current_channel.next()`; the registry is the only writer and
/// keeps the two in step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub project_name: String,
    pub current_channel: Stage,
    pub next_channel: Option<Stage>,
    /// Append-only, in completion order.
    pub completed_stages: Vec<Stage>,
    pub thread_ids: BTreeMap<Stage, String>,
    /// Set while a transition out of a stage is running or has failed part-way.
    pub in_progress: Option<TransitionProgress>,
}

impl WorkflowState {
    pub fn new(project_name: impl Into<String>, current_channel: Stage) -> Self {
        Self {
            project_name: project_name.into(),
            current_channel,
            next_channel: current_channel.next(),
            completed_stages: Vec::new(),
            thread_ids: BTreeMap::new(),
            in_progress: None,
        }
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed_stages.contains(&stage)
    }
}

/// Marker for a stage transition that has started but not finished.
///
/// Transitions are not atomic: the git checkpoint and the repository publication are
/// external side effects that cannot be undone. The marker records which of them already
/// happened so a retried transition resumes instead of repeating them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionProgress {
    pub id: Uuid,
    pub from: Stage,
    pub started_at: DateTime<Utc>,
    pub checkpointed: bool,
    pub promotion: Option<Promotion>,
}

impl TransitionProgress {
    pub fn new(from: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            started_at: Utc::now(),
            checkpointed: false,
            promotion: None,
        }
    }
}

/// Result of promoting a project into its execution workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    pub workspace: PathBuf,
    pub remote_url: String,
}
