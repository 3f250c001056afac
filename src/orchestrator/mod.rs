//! Stage state machine.
//!
//! [`StageOrchestrator`] advances a project through `idea → requirements → design → tasks →
//! development`. A transition checkpoints the finished stage, promotes and publishes the
//! project when development is next, opens the next stage's thread, binds a new session to
//! it and starts that session's agent with the stage prompt.
//!
//! Transitions are not atomic. Each one is tracked by a marker in the registry so that a
//! retry after a failure skips the checkpoint and promotion it already got through; the
//! thread and session steps are at-least-once.

pub mod prompts;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use serde::Serialize;
use stageflow_core::models::{Project, Promotion, Stage};
use stageflow_core::registry::SessionRegistry;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bridge::{startup_command, ProcessSessionBridge, RelayError};
use crate::chat::{ChatError, ChatGateway, ChatTarget, InboundMessage, PostedMessage};
use crate::git::{CheckpointReport, GitError, GitWorkflowExecutor};
use crate::publish::{PublishError, PublishReport, RepositoryPublisher};
use crate::workspace::{Workspace, WorkspaceError};

/// Longest accepted project name.
pub const MAX_PROJECT_NAME_LEN: usize = 50;

const TOOL_OUTPUT_LIMIT: usize = 1500;
const UNEXPECTED_LIMIT: usize = 100;

// ============================================================
// Errors
// ============================================================

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("{0}")]
    Process(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

impl WorkflowError {
    /// Message shown to the chat user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::NotFound(msg) | Self::Process(msg) => msg.clone(),
            Self::Relay(e) => e.to_string(),
            Self::Git(e) => format!(
                "Git error:\n```\n{}\n```",
                truncate(e.output(), TOOL_OUTPUT_LIMIT)
            ),
            Self::Publish(PublishError::Create(output)) => format!(
                "Repository creation failed:\n```\n{}\n```\nCheck authentication with `gh auth login`.",
                truncate(output, TOOL_OUTPUT_LIMIT)
            ),
            Self::Publish(e) => format!(
                "Publishing failed:\n```\n{}\n```",
                truncate(e.output(), TOOL_OUTPUT_LIMIT)
            ),
            Self::Chat(ChatError::ChannelNotFound(channel)) => {
                format!("Channel #{} not found", channel)
            }
            Self::Workspace(
                e @ (WorkspaceError::ProjectExists(_)
                | WorkspaceError::ProjectMissing(_)
                | WorkspaceError::WorkspaceExists(_)),
            ) => e.to_string(),
            other => format!(
                "An error occurred: {}",
                truncate(&other.to_string(), UNEXPECTED_LIMIT)
            ),
        }
    }
}

/// Check a project name: lowercase words joined by single hyphens, at most 50 characters.
pub fn validate_project_name(name: &str) -> Result<(), WorkflowError> {
    static PROJECT_NAME: OnceLock<Regex> = OnceLock::new();
    let pattern = PROJECT_NAME
        .get_or_init(|| Regex::new(r"^[a-z]+(-[a-z]+)*$").expect("project name pattern is valid"));
    if !pattern.is_match(name) {
        return Err(WorkflowError::Validation(
            "Project names may only contain lowercase letters and hyphens, e.g. `my-awesome-app`"
                .to_string(),
        ));
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(WorkflowError::Validation(format!(
            "Project names must be at most {} characters",
            MAX_PROJECT_NAME_LEN
        )));
    }
    Ok(())
}

// ============================================================
// Reports
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub project: String,
    pub completed: Stage,
    pub next: Stage,
    pub session_number: u32,
    pub thread_id: String,
    /// `None` when a retried transition had already checkpointed.
    #[serde(skip)]
    pub checkpoint: Option<CheckpointReport>,
    pub repository_url: Option<String>,
    pub push_skipped: bool,
    pub prompt_delivered: bool,
}

impl TransitionReport {
    /// Chat reply for a successful transition.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("{} stage complete.", self.completed.label())];
        if let Some(url) = &self.repository_url {
            if self.push_skipped {
                lines.push(format!("Repository created, push skipped: {}", url));
            } else {
                lines.push(format!("Repository: {}", url));
            }
        }
        lines.push(format!(
            "Next stage: #{} (session {})",
            self.next.channel_name(),
            self.session_number
        ));
        if !self.prompt_delivered {
            lines.push(format!(
                "The agent for session {} did not receive its prompt.",
                self.session_number
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStart {
    pub project: String,
    pub session_number: u32,
    pub thread_id: String,
    pub root: PathBuf,
    pub prompt_delivered: bool,
}

/// A stage-completion command issued from a chat thread.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub thread_id: String,
    pub thread_name: String,
    /// Channel the thread belongs to; `None` when the command was not issued in a thread.
    pub parent_channel: Option<String>,
}

/// Agent launched in every backing host.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub command: String,
    pub options: String,
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            options: String::new(),
        }
    }
}

// ============================================================
// Orchestrator
// ============================================================

pub struct StageOrchestrator {
    registry: SessionRegistry,
    git: GitWorkflowExecutor,
    publisher: RepositoryPublisher,
    bridge: ProcessSessionBridge,
    gateway: Arc<dyn ChatGateway>,
    workspace: Workspace,
    agent: AgentCommand,
    project_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StageOrchestrator {
    pub fn new(
        registry: SessionRegistry,
        git: GitWorkflowExecutor,
        publisher: RepositoryPublisher,
        bridge: ProcessSessionBridge,
        gateway: Arc<dyn ChatGateway>,
        workspace: Workspace,
    ) -> Self {
        Self {
            registry,
            git,
            publisher,
            bridge,
            gateway,
            workspace,
            agent: AgentCommand::default(),
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_agent(mut self, agent: AgentCommand) -> Self {
        self.agent = agent;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn project_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.project_locks
            .lock()
            .expect("project lock table poisoned")
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    async fn on_workspace<T, F>(&self, op: F) -> Result<T, WorkflowError>
    where
        T: Send + 'static,
        F: FnOnce(&Workspace) -> Result<T, WorkspaceError> + Send + 'static,
    {
        let workspace = self.workspace.clone();
        tokio::task::spawn_blocking(move || op(&workspace))
            .await
            .map_err(|e| WorkflowError::Unexpected(e.to_string()))?
            .map_err(WorkflowError::from)
    }

    /// Start the agent for a session and hand it its first message. Process failures are
    /// logged; the return value says whether the message was delivered.
    async fn launch(&self, session_number: u32, working_dir: &Path, message: &str) -> bool {
        let command = startup_command(working_dir, &self.agent.command, &self.agent.options);
        if !self.bridge.start(session_number, working_dir, &command).await {
            return false;
        }
        if !self.bridge.wait_until_ready(session_number).await {
            warn!(session_number, "Relaying to a host that never reported ready");
        }
        match self.bridge.relay(session_number, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_number, error = %e, "Failed to deliver initial prompt");
                false
            }
        }
    }

    // ------------------------------------------------------------
    // New projects
    // ------------------------------------------------------------

    /// Create a project from an idea posted in the idea channel: scaffold the project root
    /// with `idea.md`, open its thread under `origin`, register the session and start the
    /// idea agent.
    pub async fn start_project(
        &self,
        name: &str,
        idea: &str,
        origin: &PostedMessage,
    ) -> Result<ProjectStart, WorkflowError> {
        validate_project_name(name)?;

        let lock = self.project_lock(name);
        let _guard = lock.lock().await;

        if self.workspace.project_root(name).exists() || self.registry.project(name).is_some() {
            return Err(WorkflowError::Validation(format!(
                "Project `{}` already exists",
                name
            )));
        }

        let (project, content) = (name.to_string(), prompts::idea_document(name, idea));
        let (root, document) = self
            .on_workspace(move |ws| {
                let root = ws.create_project(&project)?;
                let document = ws.write_document(&project, Stage::Idea, &content)?;
                Ok((root, document))
            })
            .await?;

        let thread = match self.gateway.create_thread(origin, name).await {
            Ok(thread) => thread,
            Err(e) => {
                let project = name.to_string();
                let removed = self
                    .on_workspace(move |ws| ws.remove_project(&project))
                    .await;
                if let Err(cleanup) = removed {
                    warn!(project = name, error = %cleanup, "Failed to remove scaffold after thread error");
                }
                return Err(e.into());
            }
        };
        let session_number = self.registry.get_or_create_session(&thread.id);

        self.registry.create_project_info(name, &root);
        self.registry
            .create_session_info(session_number, &thread.id, name, Stage::Idea, &root);
        self.registry.create_workflow_state(name, Stage::Idea);
        self.registry
            .add_thread_to_workflow(name, Stage::Idea, &thread.id);

        let prompt = prompts::stage_prompt(Stage::Idea, name, Some(idea));
        let prompt_delivered = self.launch(session_number, &root, &prompt).await;

        let intro = prompts::project_intro(name, session_number, &document);
        if let Err(e) = self
            .gateway
            .send(&ChatTarget::Thread(thread.id.clone()), &intro)
            .await
        {
            warn!(project = name, error = %e, "Failed to post project intro");
        }

        info!(project = name, session_number, thread_id = %thread.id, "Project started");
        Ok(ProjectStart {
            project: name.to_string(),
            session_number,
            thread_id: thread.id,
            root,
            prompt_delivered,
        })
    }

    // ------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------

    /// Relay a thread message into its session. Command messages (`!...`) are not relayed
    /// and yield `None`. A thread seen for the first time gets a session and a backing host.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> Result<Option<u32>, WorkflowError> {
        if message.content.starts_with('!') {
            debug!(thread_id = %message.thread_id, "Command message not relayed");
            return Ok(None);
        }

        let (session_number, created) = self.registry.claim_session(&message.thread_id);

        if created {
            let working_dir = self.working_dir_for_thread(message);
            let context = prompts::session_context(session_number, message);
            self.launch(session_number, &working_dir, &context).await;
            info!(session_number, thread_id = %message.thread_id, "Created session for existing thread");
        }

        let text = prompts::with_attachments(&message.content, &message.attachments);
        self.bridge.relay(session_number, &text).await?;
        Ok(Some(session_number))
    }

    fn working_dir_for_thread(&self, message: &InboundMessage) -> PathBuf {
        if let Some(project) = self.registry.project_by_thread(&message.thread_id) {
            return project.execution_workspace.unwrap_or(project.root);
        }
        let root = self.workspace.project_root(&message.thread_name);
        if root.is_dir() {
            root
        } else {
            self.workspace.projects_root().to_path_buf()
        }
    }

    // ------------------------------------------------------------
    // Stage transitions
    // ------------------------------------------------------------

    /// Registry record for `name`, adopting a project whose root exists on disk but that
    /// this process has not seen yet.
    fn resolve_project(&self, name: &str, stage: Stage) -> Result<Project, WorkflowError> {
        if let Some(project) = self.registry.project(name) {
            if self.registry.workflow_state(name).is_none() {
                self.registry.create_workflow_state(name, project.current_stage);
            }
            return Ok(project);
        }

        let root = self.workspace.project_root(name);
        if !root.is_dir() {
            return Err(WorkflowError::NotFound(format!(
                "Project `{}` not found",
                name
            )));
        }
        info!(project = name, stage = %stage, "Adopting project from disk");
        self.registry.create_project_info(name, &root);
        self.registry.update_project_stage(name, stage);
        self.registry.create_workflow_state(name, stage);
        self.registry
            .project(name)
            .ok_or_else(|| WorkflowError::Unexpected(format!("project `{}` vanished", name)))
    }

    /// Complete `stage` for `project` and open the next one.
    pub async fn complete_stage(
        &self,
        project: &str,
        stage: Stage,
    ) -> Result<TransitionReport, WorkflowError> {
        let Some(next) = stage.next() else {
            return Err(WorkflowError::Validation(format!(
                "{} is the final stage; there is nothing to complete",
                stage.label()
            )));
        };

        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let info = self.resolve_project(project, stage)?;
        let workflow = self.registry.workflow_state(project).ok_or_else(|| {
            WorkflowError::NotFound(format!("No workflow for project `{}`", project))
        })?;
        if workflow.current_channel != stage {
            return Err(WorkflowError::Validation(format!(
                "Project `{}` is in the {} stage, not {}",
                project, workflow.current_channel, stage
            )));
        }

        let progress = self
            .registry
            .begin_transition(project, stage)
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("No workflow for project `{}`", project))
            })?;

        let checkpoint = if progress.checkpointed {
            debug!(project, stage = %stage, "Checkpoint already taken");
            None
        } else {
            let report = self.git.checkpoint(&info.root, project, stage).await?;
            self.registry.mark_checkpointed(project);
            Some(report)
        };

        let mut publication = None;
        let promotion = match (next, progress.promotion.clone()) {
            (Stage::Development, None) => {
                let (promotion, report) = self.promote(project, progress.checkpointed).await?;
                self.registry.record_promotion(project, promotion.clone());
                self.registry.set_project_promotion(
                    project,
                    &promotion.workspace,
                    Some(promotion.remote_url.clone()),
                );
                publication = Some(report);
                Some(promotion)
            }
            (_, existing) => existing,
        };

        let post = self
            .gateway
            .send(
                &ChatTarget::Channel(next),
                &prompts::announcement(next, project),
            )
            .await?;
        let thread = self.gateway.create_thread(&post, project).await?;

        let working_dir = match (&promotion, next) {
            (Some(promotion), Stage::Development) => promotion.workspace.clone(),
            _ => info.root.clone(),
        };
        let session_number = self.registry.get_or_create_session(&thread.id);
        self.registry
            .create_session_info(session_number, &thread.id, project, next, &working_dir);
        self.registry.add_thread_to_workflow(project, next, &thread.id);

        if next.is_documentation() {
            let name = project.to_string();
            self.on_workspace(move |ws| ws.touch_document(&name, next))
                .await?;
        }

        let prompt = prompts::stage_prompt(next, project, None);
        let prompt_delivered = self.launch(session_number, &working_dir, &prompt).await;

        let document = stage
            .is_documentation()
            .then(|| self.workspace.document_path(project, stage))
            .filter(|path| path.is_file());
        self.registry.finish_transition(project, stage, document);

        info!(project, completed = %stage, next = %next, session_number, "Stage transition complete");
        Ok(TransitionReport {
            project: project.to_string(),
            completed: stage,
            next,
            session_number,
            thread_id: thread.id,
            checkpoint,
            repository_url: promotion
                .as_ref()
                .map(|p| p.remote_url.trim_end_matches(".git").to_string()),
            push_skipped: publication.as_ref().is_some_and(PublishReport::push_skipped),
            prompt_delivered,
        })
    }

    /// Copy the project into its execution workspace and publish it.
    ///
    /// A retried transition (`resumed`) may find the workspace its earlier attempt copied;
    /// that copy is reused instead of failing.
    async fn promote(
        &self,
        project: &str,
        resumed: bool,
    ) -> Result<(Promotion, PublishReport), WorkflowError> {
        let name = project.to_string();
        let workspace = self
            .on_workspace(move |ws| {
                let target = ws.execution_root(&name);
                let target = match ws.promote(&name) {
                    Ok(target) => target,
                    Err(WorkspaceError::WorkspaceExists(_)) if resumed => target,
                    Err(e) => return Err(e),
                };
                ws.install_ci_templates(&name)?;
                Ok(target)
            })
            .await?;

        self.git.ensure_repository(&workspace).await?;
        let report = self.publisher.publish(&workspace, project).await?;
        if report.push_skipped() {
            warn!(project, "Repository created, push skipped");
        }

        Ok((
            Promotion {
                workspace,
                remote_url: report.remote_url.clone(),
            },
            report,
        ))
    }

    /// Chat boundary for `!complete`: run the transition for the thread's stage and reply in
    /// the thread with the outcome.
    pub async fn complete_from_chat(
        &self,
        request: &CompletionRequest,
    ) -> Result<TransitionReport, WorkflowError> {
        let result = self.complete_for_thread(request).await;

        let reply = match &result {
            Ok(report) => report.summary(),
            Err(e) => {
                match e {
                    WorkflowError::Validation(_) | WorkflowError::NotFound(_) => {
                        warn!(thread_id = %request.thread_id, error = %e, "Stage completion rejected")
                    }
                    _ => {
                        error!(thread_id = %request.thread_id, error = ?e, "Stage completion failed")
                    }
                }
                e.user_message()
            }
        };

        if let Err(e) = self
            .gateway
            .send(&ChatTarget::Thread(request.thread_id.clone()), &reply)
            .await
        {
            warn!(thread_id = %request.thread_id, error = %e, "Failed to post completion reply");
        }
        result
    }

    async fn complete_for_thread(
        &self,
        request: &CompletionRequest,
    ) -> Result<TransitionReport, WorkflowError> {
        let Some(channel) = request.parent_channel.as_deref() else {
            return Err(WorkflowError::Validation(
                "Run !complete inside a stage thread".to_string(),
            ));
        };
        let Some(stage) = Stage::from_channel_name(channel) else {
            return Err(WorkflowError::Validation(format!(
                "#{} is not a stage channel",
                channel.trim_start_matches('#')
            )));
        };

        let project = self
            .registry
            .project_by_thread(&request.thread_id)
            .map(|p| p.name)
            .unwrap_or_else(|| request.thread_name.clone());
        self.complete_stage(&project, stage).await
    }

    // ------------------------------------------------------------
    // Stopping sessions
    // ------------------------------------------------------------

    /// Stop a session's backing host and unmap its thread.
    pub async fn stop_session(&self, session_number: u32) -> Result<(), WorkflowError> {
        if !self.bridge.exists(session_number).await {
            return Err(WorkflowError::NotFound(format!(
                "Session {} does not exist",
                session_number
            )));
        }
        if !self.bridge.stop(session_number).await {
            return Err(WorkflowError::Process(format!(
                "Failed to stop session {}",
                session_number
            )));
        }
        if let Some(thread_id) = self.registry.find_thread_by_session(session_number) {
            self.registry.remove_session(&thread_id);
        }
        Ok(())
    }

    /// Stop every backing host and unmap every thread. Session numbers are not reused
    /// afterwards. Returns how many hosts were stopped.
    pub async fn stop_all_sessions(&self) -> usize {
        let stopped = self.bridge.stop_all().await;
        for session in self.registry.list_sessions() {
            self.registry.remove_session(&session.thread_id);
        }
        info!(stopped, "Stopped all sessions");
        stopped
    }
}
