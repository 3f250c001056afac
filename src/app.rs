//! Root composition point.
//!
//! One [`SessionRegistry`] is created here and handed to both the orchestrator and the
//! control plane, so chat-driven transitions and HTTP registrations see the same state.
//!
//! The binary only serves the control plane. A chat adapter embeds [`App`] and drives
//! [`App::orchestrator`] with the messages and commands it receives.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use stageflow_core::registry::SessionRegistry;

use crate::api::{self, AppState};
use crate::bridge::ProcessSessionBridge;
use crate::chat::ChatGateway;
use crate::config::Settings;
use crate::git::GitWorkflowExecutor;
use crate::orchestrator::{AgentCommand, StageOrchestrator};
use crate::publish::RepositoryPublisher;
use crate::runner::{CommandRunner, TokioCommandRunner};
use crate::workspace::Workspace;

/// Upper bound on any single git, gh or tmux invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

pub struct App {
    registry: SessionRegistry,
    orchestrator: Arc<StageOrchestrator>,
    state: AppState,
}

impl App {
    /// Wire every component from `settings`, running external tools through `runner`.
    pub fn new(
        settings: &Settings,
        runner: Arc<dyn CommandRunner>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        let registry = SessionRegistry::with_host_prefix(&settings.session_prefix);
        let bridge = ProcessSessionBridge::new(runner.clone(), settings.session_prefix.clone())
            .with_readiness(settings.readiness());
        let publisher = RepositoryPublisher::new(runner.clone(), settings.hosting_host.clone())
            .with_user(settings.hosting_user.clone())
            .with_secrets(settings.repo_secrets.clone());
        let workspace = Workspace::new(&settings.projects_root, &settings.workspace_root)
            .with_templates(settings.templates_dir.clone());

        let orchestrator = StageOrchestrator::new(
            registry.clone(),
            GitWorkflowExecutor::new(runner),
            publisher,
            bridge.clone(),
            gateway,
            workspace,
        )
        .with_agent(AgentCommand {
            command: settings.agent_command.clone(),
            options: settings.agent_options.clone(),
        });

        Self {
            state: AppState::new(registry.clone(), bridge),
            registry,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wire the app against the real subprocess runner.
    pub fn from_settings(settings: &Settings, gateway: Arc<dyn ChatGateway>) -> Self {
        let runner = Arc::new(TokioCommandRunner::with_timeout(COMMAND_TIMEOUT));
        Self::new(settings, runner, gateway)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> Arc<StageOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn router(&self) -> Router {
        api::create_router(self.state.clone())
    }

    /// Serve the control plane on `127.0.0.1:<port>` until the process is stopped.
    pub async fn serve(&self, port: u16) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
        tracing::info!("stageflow control plane listening on http://127.0.0.1:{}", port);
        axum::serve(listener, self.router()).await
    }
}
