//! Remote repository publication through the hosting CLI (`gh`).
//!
//! Runs once per project, when it is promoted into its execution workspace: create (or
//! discover) the remote repository, wire `origin` to its HTTPS URL so no SSH key material
//! is needed, push the initial commit, and set configured repository secrets.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::git::{GitError, GitWorkflowExecutor, InitialPushOutcome};
use crate::runner::CommandRunner;

const ALREADY_EXISTS: &str = "already exists";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("repository creation failed: {0}")]
    Create(String),

    #[error("could not resolve hosting user: {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Git(#[from] GitError),
}

impl PublishError {
    pub fn output(&self) -> &str {
        match self {
            Self::Create(s) | Self::UnknownUser(s) => s,
            Self::Git(e) => e.output(),
        }
    }
}

/// Outcome of a successful publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Browser URL, `https://<host>/<user>/<project>`.
    pub repository_url: String,
    /// Git remote URL, `https://<host>/<user>/<project>.git`.
    pub remote_url: String,
    /// `false` when the repository already existed and `origin` was rewired to it.
    pub created: bool,
    pub push: InitialPushOutcome,
    /// Names of the secrets that were set on the repository.
    pub secrets: Vec<String>,
}

impl PublishReport {
    pub fn push_skipped(&self) -> bool {
        !matches!(self.push, InitialPushOutcome::Pushed { .. })
    }
}

type SecretLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct RepositoryPublisher {
    runner: Arc<dyn CommandRunner>,
    git: GitWorkflowExecutor,
    host: String,
    user: Option<String>,
    secret_names: Vec<String>,
    secret_lookup: SecretLookup,
}

impl RepositoryPublisher {
    pub fn new(runner: Arc<dyn CommandRunner>, host: impl Into<String>) -> Self {
        Self {
            git: GitWorkflowExecutor::new(runner.clone()),
            runner,
            host: host.into(),
            user: None,
            secret_names: Vec::new(),
            secret_lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Use a fixed account instead of asking the hosting CLI.
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.filter(|u| !u.trim().is_empty());
        self
    }

    /// Secrets to set on every published repository. Values are looked up by name,
    /// from the process environment unless [`RepositoryPublisher::with_secret_lookup`] says otherwise.
    pub fn with_secrets(mut self, names: Vec<String>) -> Self {
        self.secret_names = names;
        self
    }

    pub fn with_secret_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.secret_lookup = Arc::new(lookup);
        self
    }

    pub fn remote_url(&self, user: &str, project: &str) -> String {
        format!("https://{}/{}/{}.git", self.host, user, project)
    }

    pub fn repository_url(&self, user: &str, project: &str) -> String {
        format!("https://{}/{}/{}", self.host, user, project)
    }

    async fn gh(&self, args: &[&str], cwd: Option<&Path>) -> crate::runner::CommandOutput {
        self.runner.run("gh", args, cwd).await
    }

    /// Login of the account the hosting CLI is authenticated as.
    pub async fn resolve_user(&self) -> Result<String, PublishError> {
        if let Some(user) = &self.user {
            return Ok(user.clone());
        }
        let output = self.gh(&["api", "user", "--jq", ".login"], None).await;
        if output.success && !output.text().is_empty() {
            Ok(output.text().to_string())
        } else {
            Err(PublishError::UnknownUser(output.error_text()))
        }
    }

    /// Publish the repository at `workspace` as `project`.
    pub async fn publish(
        &self,
        workspace: &Path,
        project: &str,
    ) -> Result<PublishReport, PublishError> {
        let create = self
            .gh(
                &[
                    "repo",
                    "create",
                    project,
                    "--public",
                    "--source=.",
                    "--remote=origin",
                ],
                Some(workspace),
            )
            .await;

        let created = if create.success {
            true
        } else if create.mentions(ALREADY_EXISTS) {
            info!(project, "Repository already exists, rewiring origin");
            false
        } else {
            tracing::error!(project, error = %create.error_text(), "Repository creation failed");
            return Err(PublishError::Create(create.error_text()));
        };

        let user = self.resolve_user().await?;
        let remote_url = self.remote_url(&user, project);
        if created {
            self.git.set_origin_url(workspace, &remote_url).await;
        } else {
            self.git.replace_origin(workspace, &remote_url).await?;
        }

        let push = self.git.initial_push(workspace).await?;
        let secrets = self.set_secrets(&user, project).await;

        info!(project, url = %remote_url, created, "Published repository");
        Ok(PublishReport {
            repository_url: self.repository_url(&user, project),
            remote_url,
            created,
            push,
            secrets,
        })
    }

    /// Set each configured secret that has a value. Failures are warnings.
    async fn set_secrets(&self, user: &str, project: &str) -> Vec<String> {
        let repo = format!("{}/{}", user, project);
        let mut set = Vec::new();
        for name in &self.secret_names {
            let Some(value) = (self.secret_lookup)(name) else {
                warn!(secret = %name, "Secret has no value in the environment, skipping");
                continue;
            };
            let output = self
                .gh(&["secret", "set", name, "-b", &value, "-R", &repo], None)
                .await;
            if output.success {
                info!(secret = %name, repo = %repo, "Set repository secret");
                set.push(name.clone());
            } else {
                warn!(secret = %name, error = %output.error_text(), "Failed to set repository secret");
            }
        }
        set
    }
}
