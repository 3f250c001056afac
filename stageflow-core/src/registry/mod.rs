//! In-memory session registry.
//!
//! The registry maps chat threads to sequential session numbers and keeps the session,
//! project and workflow records the orchestrator and the control plane share. All state
//! sits behind one mutex per registry instance, so `get_or_create_session` is atomic with
//! respect to every other mutation. Cloning a [`SessionRegistry`] clones the handle, not
//! the data.
//!
//! Lookups on unknown keys return `None`; mutators that reference a project or workflow
//! that does not exist return `false` (or `None`) and leave the registry unchanged.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::models::*;

/// Default prefix for terminal host names.
pub const DEFAULT_HOST_PREFIX: &str = "claude-session";

struct RegistryState {
    thread_sessions: HashMap<String, u32>,
    session_threads: BTreeMap<u32, String>,
    next_session_number: u32,
    sessions: BTreeMap<u32, Session>,
    projects: HashMap<String, Project>,
    workflows: HashMap<String, WorkflowState>,
    thread_projects: HashMap<String, String>,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            thread_sessions: HashMap::new(),
            session_threads: BTreeMap::new(),
            next_session_number: 1,
            sessions: BTreeMap::new(),
            projects: HashMap::new(),
            workflows: HashMap::new(),
            thread_projects: HashMap::new(),
        }
    }

    fn bind(&mut self, session_number: u32, thread_id: &str) {
        self.thread_sessions
            .insert(thread_id.to_string(), session_number);
        self.session_threads
            .insert(session_number, thread_id.to_string());
    }

    fn holder_of(&self, session_number: u32) -> Option<&str> {
        self.session_threads
            .get(&session_number)
            .or_else(|| self.sessions.get(&session_number).map(|s| &s.thread_id))
            .map(String::as_str)
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    state: Arc<Mutex<RegistryState>>,
    host_prefix: Arc<str>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_host_prefix(DEFAULT_HOST_PREFIX)
    }

    pub fn with_host_prefix(prefix: impl AsRef<str>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::new())),
            host_prefix: Arc::from(prefix.as_ref()),
        }
    }

    /// Terminal host name for a session number, `<prefix>-<n>`.
    pub fn host_name(&self, session_number: u32) -> String {
        format!("{}-{}", self.host_prefix, session_number)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry lock poisoned")
    }

    // ============================================================
    // Thread ↔ session mapping
    // ============================================================

    /// Return the session number for `thread_id`, allocating the next one if the thread
    /// has never been seen.
    pub fn get_or_create_session(&self, thread_id: &str) -> u32 {
        self.claim_session(thread_id).0
    }

    /// Like [`get_or_create_session`](Self::get_or_create_session), but also reports
    /// whether this call allocated the number.
    pub fn claim_session(&self, thread_id: &str) -> (u32, bool) {
        let mut state = self.lock();
        if let Some(&number) = state.thread_sessions.get(thread_id) {
            return (number, false);
        }

        let number = state.next_session_number;
        state.next_session_number += 1;
        state.bind(number, thread_id);
        tracing::info!(thread_id, session_number = number, "New session created");
        (number, true)
    }

    pub fn get_session(&self, thread_id: &str) -> Option<u32> {
        self.lock().thread_sessions.get(thread_id).copied()
    }

    /// Inverse lookup. Sessions with full metadata win over bare thread mappings.
    pub fn find_thread_by_session(&self, session_number: u32) -> Option<String> {
        let state = self.lock();
        if let Some(session) = state.sessions.get(&session_number) {
            return Some(session.thread_id.clone());
        }
        state.session_threads.get(&session_number).cloned()
    }

    /// Map `thread_id` to an externally chosen number.
    ///
    /// If the thread is already mapped its existing number is returned unchanged. Otherwise
    /// the mapping is stored and the counter is raised past `session_number` so the number
    /// is never handed out again. Returns `None` when another thread holds the number.
    pub fn register_session(&self, session_number: u32, thread_id: &str) -> Option<u32> {
        let mut state = self.lock();
        if let Some(&existing) = state.thread_sessions.get(thread_id) {
            return Some(existing);
        }
        if let Some(holder) = state.holder_of(session_number).filter(|h| *h != thread_id) {
            tracing::warn!(
                thread_id,
                session_number,
                holder,
                "Session number already bound to another thread"
            );
            return None;
        }

        state.bind(session_number, thread_id);
        if session_number >= state.next_session_number {
            state.next_session_number = session_number + 1;
        }
        tracing::info!(thread_id, session_number, "Session registered");
        Some(session_number)
    }

    /// All sessions as `(number, thread)` pairs, ordered by number.
    pub fn list_sessions(&self) -> Vec<SessionRef> {
        let state = self.lock();
        let mut sessions: BTreeMap<u32, String> = state
            .sessions
            .values()
            .map(|s| (s.session_number, s.thread_id.clone()))
            .collect();
        for (&number, thread) in &state.session_threads {
            sessions.entry(number).or_insert_with(|| thread.clone());
        }
        sessions
            .into_iter()
            .map(|(session_number, thread_id)| SessionRef {
                session_number,
                thread_id,
            })
            .collect()
    }

    /// Unmap a thread. The number is not recycled.
    pub fn remove_session(&self, thread_id: &str) -> bool {
        let mut state = self.lock();
        let Some(number) = state.thread_sessions.remove(thread_id) else {
            return false;
        };
        state.session_threads.remove(&number);
        if state
            .sessions
            .get(&number)
            .is_some_and(|s| s.thread_id == thread_id)
        {
            state.sessions.remove(&number);
        }
        tracing::info!(thread_id, session_number = number, "Session removed");
        true
    }

    /// Administrative reset: drops every record and restarts numbering at 1.
    pub fn clear_all(&self) {
        *self.lock() = RegistryState::new();
        tracing::info!("All sessions cleared");
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            total_sessions: state.thread_sessions.len(),
            next_session_number: state.next_session_number,
            total_projects: state.projects.len(),
            active_workflows: state.workflows.len(),
        }
    }

    // ============================================================
    // Session metadata
    // ============================================================

    pub fn create_session_info(
        &self,
        session_number: u32,
        thread_id: &str,
        project_name: &str,
        stage: Stage,
        working_directory: impl Into<PathBuf>,
    ) -> Session {
        let session = Session {
            session_number,
            thread_id: thread_id.to_string(),
            project_name: project_name.to_string(),
            stage,
            host_name: self.host_name(session_number),
            working_directory: working_directory.into(),
            created_at: Utc::now(),
        };

        let mut state = self.lock();
        state.sessions.insert(session_number, session.clone());
        state
            .thread_projects
            .insert(thread_id.to_string(), project_name.to_string());
        tracing::info!(
            session_number,
            thread_id,
            project = project_name,
            stage = %stage,
            "Created session info"
        );
        session
    }

    pub fn session_info(&self, session_number: u32) -> Option<Session> {
        self.lock().sessions.get(&session_number).cloned()
    }

    // ============================================================
    // Projects
    // ============================================================

    /// Create (or replace) the record for a project starting at `Idea`.
    pub fn create_project_info(&self, name: &str, root: impl Into<PathBuf>) -> Project {
        let project = Project {
            name: name.to_string(),
            created_at: Utc::now(),
            current_stage: Stage::Idea,
            root: root.into(),
            execution_workspace: None,
            remote_url: None,
            documents: BTreeMap::new(),
        };
        self.lock()
            .projects
            .insert(name.to_string(), project.clone());
        tracing::info!(project = name, root = %project.root.display(), "Created project info");
        project
    }

    pub fn project(&self, name: &str) -> Option<Project> {
        self.lock().projects.get(name).cloned()
    }

    pub fn project_by_thread(&self, thread_id: &str) -> Option<Project> {
        let state = self.lock();
        let name = state.thread_projects.get(thread_id)?;
        state.projects.get(name).cloned()
    }

    pub fn update_project_stage(&self, name: &str, stage: Stage) -> bool {
        let mut state = self.lock();
        let Some(project) = state.projects.get_mut(name) else {
            return false;
        };
        project.current_stage = stage;
        tracing::info!(project = name, stage = %stage, "Updated project stage");
        true
    }

    pub fn add_project_document(&self, name: &str, stage: Stage, path: impl Into<PathBuf>) -> bool {
        let mut state = self.lock();
        let Some(project) = state.projects.get_mut(name) else {
            return false;
        };
        let path = path.into();
        tracing::info!(project = name, stage = %stage, path = %path.display(), "Added project document");
        project.documents.insert(stage, path);
        true
    }

    pub fn set_project_promotion(
        &self,
        name: &str,
        workspace: impl Into<PathBuf>,
        remote_url: Option<String>,
    ) -> bool {
        let mut state = self.lock();
        let Some(project) = state.projects.get_mut(name) else {
            return false;
        };
        project.execution_workspace = Some(workspace.into());
        project.remote_url = remote_url;
        true
    }

    // ============================================================
    // Workflow state
    // ============================================================

    /// Create the workflow record for an existing project. Returns `None` when the project
    /// is unknown.
    pub fn create_workflow_state(&self, name: &str, current: Stage) -> Option<WorkflowState> {
        let mut state = self.lock();
        if !state.projects.contains_key(name) {
            return None;
        }
        let workflow = WorkflowState::new(name, current);
        state.workflows.insert(name.to_string(), workflow.clone());
        tracing::info!(project = name, channel = %current.channel_name(), "Created workflow state");
        Some(workflow)
    }

    pub fn workflow_state(&self, name: &str) -> Option<WorkflowState> {
        self.lock().workflows.get(name).cloned()
    }

    pub fn add_thread_to_workflow(&self, name: &str, channel: Stage, thread_id: &str) -> bool {
        let mut state = self.lock();
        let Some(workflow) = state.workflows.get_mut(name) else {
            return false;
        };
        workflow.thread_ids.insert(channel, thread_id.to_string());
        state
            .thread_projects
            .insert(thread_id.to_string(), name.to_string());
        tracing::info!(project = name, channel = %channel.channel_name(), thread_id, "Added thread to workflow");
        true
    }

    // ============================================================
    // Transition markers
    // ============================================================

    /// Start (or resume) a transition out of `from`.
    ///
    /// An existing marker for the same stage is returned as-is so the caller can skip the
    /// steps it records as done. A marker for a different stage is replaced.
    pub fn begin_transition(&self, name: &str, from: Stage) -> Option<TransitionProgress> {
        let mut state = self.lock();
        let workflow = state.workflows.get_mut(name)?;
        match &workflow.in_progress {
            Some(progress) if progress.from == from => {
                tracing::info!(project = name, from = %from, transition = %progress.id, "Resuming transition");
                Some(progress.clone())
            }
            _ => {
                let progress = TransitionProgress::new(from);
                tracing::debug!(project = name, from = %from, transition = %progress.id, "Beginning transition");
                workflow.in_progress = Some(progress.clone());
                Some(progress)
            }
        }
    }

    pub fn mark_checkpointed(&self, name: &str) -> bool {
        let mut state = self.lock();
        match state
            .workflows
            .get_mut(name)
            .and_then(|w| w.in_progress.as_mut())
        {
            Some(progress) => {
                progress.checkpointed = true;
                true
            }
            None => false,
        }
    }

    pub fn record_promotion(&self, name: &str, promotion: Promotion) -> bool {
        let mut state = self.lock();
        match state
            .workflows
            .get_mut(name)
            .and_then(|w| w.in_progress.as_mut())
        {
            Some(progress) => {
                progress.promotion = Some(promotion);
                true
            }
            None => false,
        }
    }

    /// Close the transition out of `from`: record it as completed (once), remember its
    /// document, clear the marker and advance the project to the next stage.
    pub fn finish_transition(&self, name: &str, from: Stage, document: Option<PathBuf>) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let (Some(workflow), Some(project)) =
            (state.workflows.get_mut(name), state.projects.get_mut(name))
        else {
            return false;
        };

        if !workflow.is_completed(from) {
            workflow.completed_stages.push(from);
        }
        workflow.in_progress = None;
        if let Some(next) = from.next() {
            workflow.current_channel = next;
            workflow.next_channel = next.next();
            project.current_stage = next;
        }
        if let Some(path) = document {
            project.documents.insert(from, path);
        }
        tracing::info!(project = name, completed = %from, stage = %project.current_stage, "Finished transition");
        true
    }
}
