//! Git checkpointing.
//!
//! A checkpoint commits everything under a project root when a stage completes. Tool
//! failures are classified rather than propagated wholesale:
//!
//! - `init` failure: fatal.
//! - `commit` failing with "nothing to commit": soft skip. The push is skipped too and the
//!   checkpoint still succeeds.
//! - any other `commit` failure: fatal, carrying the raw tool output.
//! - `push` failure: warning only.
//!
//! The initial publication push of an execution workspace ([`GitWorkflowExecutor::initial_push`])
//! uses the same rules plus a soft classification for remote-access failures.

use std::path::Path;
use std::sync::Arc;

use stageflow_core::models::Stage;
use thiserror::Error;
use tracing::{info, warn};

use crate::runner::{CommandOutput, CommandRunner};

const NOTHING_TO_COMMIT: &str = "nothing to commit";

/// Push failures that mean "the remote is there but we cannot reach or write to it".
const REMOTE_ACCESS_DENIED: &[&str] = &[
    "could not read from remote repository",
    "does not appear to be a git repository",
    "permission denied",
    "unable to access",
];

/// Fatal git failures. Each variant carries the raw tool output.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("git init failed: {0}")]
    Init(String),

    #[error("git add failed: {0}")]
    Stage(String),

    #[error("git commit failed: {0}")]
    Commit(String),

    #[error("git push failed: {0}")]
    Push(String),

    #[error("git remote configuration failed: {0}")]
    Remote(String),
}

impl GitError {
    /// Raw tool output that caused the failure.
    pub fn output(&self) -> &str {
        match self {
            Self::Init(s) | Self::Stage(s) | Self::Commit(s) | Self::Push(s) | Self::Remote(s) => s,
        }
    }
}

/// What happened to the push step of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// No `origin` remote is configured.
    NoRemote,
    /// Skipped because there was nothing to commit.
    Skipped,
    /// The push ran and failed; never fatal.
    Failed(String),
}

/// Successful checkpoint result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointReport {
    /// A repository had to be created at the root first.
    pub initialized: bool,
    /// `false` when the commit was skipped because the tree was clean.
    pub committed: bool,
    pub push: PushOutcome,
}

/// Result of the first commit and push in a fresh execution workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialPushOutcome {
    Pushed { branch: String },
    NothingToCommit,
    /// Remote exists but could not be written to; reported as "repository created, push skipped".
    PushSkipped { reason: String },
}

/// Commit message used for stage checkpoints.
pub fn checkpoint_message(project: &str, stage: Stage) -> String {
    format!("[{}] Complete {} phase", project, stage)
}

fn is_nothing_to_commit(output: &CommandOutput) -> bool {
    output.mentions(NOTHING_TO_COMMIT)
}

fn is_remote_access_denied(output: &CommandOutput) -> bool {
    REMOTE_ACCESS_DENIED
        .iter()
        .any(|pattern| output.mentions(pattern))
}

#[derive(Clone)]
pub struct GitWorkflowExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl GitWorkflowExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn git(&self, root: &Path, args: &[&str]) -> CommandOutput {
        self.runner.run("git", args, Some(root)).await
    }

    /// Initialize a repository at `root` unless one exists. Returns whether one was created.
    pub async fn ensure_repository(&self, root: &Path) -> Result<bool, GitError> {
        if root.join(".git").exists() {
            return Ok(false);
        }
        let output = self.git(root, &["init"]).await;
        if !output.success {
            tracing::error!(root = %root.display(), error = %output.error_text(), "git init failed");
            return Err(GitError::Init(output.error_text()));
        }
        info!(root = %root.display(), "Initialized git repository");
        Ok(true)
    }

    /// URL of the `origin` remote, if one is configured.
    pub async fn remote_url(&self, root: &Path) -> Option<String> {
        let output = self.git(root, &["remote", "get-url", "origin"]).await;
        if output.success && !output.text().is_empty() {
            Some(output.text().to_string())
        } else {
            None
        }
    }

    /// Commit all work under `root` for the completion of `stage`.
    pub async fn checkpoint(
        &self,
        root: &Path,
        project: &str,
        stage: Stage,
    ) -> Result<CheckpointReport, GitError> {
        let initialized = self.ensure_repository(root).await?;

        let add = self.git(root, &["add", "."]).await;
        if !add.success {
            return Err(GitError::Stage(add.error_text()));
        }

        let message = checkpoint_message(project, stage);
        let commit = self.git(root, &["commit", "-m", &message]).await;
        if !commit.success {
            if is_nothing_to_commit(&commit) {
                info!(project, stage = %stage, "Nothing to commit, skipping push");
                return Ok(CheckpointReport {
                    initialized,
                    committed: false,
                    push: PushOutcome::Skipped,
                });
            }
            tracing::error!(project, stage = %stage, error = %commit.error_text(), "git commit failed");
            return Err(GitError::Commit(commit.error_text()));
        }

        let push = if self.remote_url(root).await.is_some() {
            let output = self.git(root, &["push"]).await;
            if output.success {
                PushOutcome::Pushed
            } else {
                warn!(project, error = %output.error_text(), "Git push failed (checkpoint kept)");
                PushOutcome::Failed(output.error_text())
            }
        } else {
            info!(project, "No remote configured, skipping push");
            PushOutcome::NoRemote
        };

        Ok(CheckpointReport {
            initialized,
            committed: true,
            push,
        })
    }

    /// Point `origin` at `url`, replacing any existing remote of that name.
    pub async fn replace_origin(&self, root: &Path, url: &str) -> Result<(), GitError> {
        // Absent remote makes this fail; that is expected.
        let _ = self.git(root, &["remote", "remove", "origin"]).await;
        let output = self.git(root, &["remote", "add", "origin", url]).await;
        if !output.success {
            return Err(GitError::Remote(output.error_text()));
        }
        info!(root = %root.display(), url, "Configured origin remote");
        Ok(())
    }

    /// Force the URL of an existing `origin`. Failure leaves the old URL in place.
    pub async fn set_origin_url(&self, root: &Path, url: &str) -> bool {
        let output = self.git(root, &["remote", "set-url", "origin", url]).await;
        if output.success {
            info!(url, "Remote URL set to HTTPS");
        } else {
            warn!(url, error = %output.error_text(), "Failed to set HTTPS remote URL, keeping existing");
        }
        output.success
    }

    /// Active branch, creating and checking out `main` in a repository without one.
    pub async fn current_branch_or_main(&self, root: &Path) -> String {
        let output = self.git(root, &["branch", "--show-current"]).await;
        if output.success && !output.text().is_empty() {
            return output.text().to_string();
        }
        let checkout = self.git(root, &["checkout", "-b", "main"]).await;
        if !checkout.success {
            warn!(error = %checkout.error_text(), "Failed to create main branch");
        }
        "main".to_string()
    }

    /// Stage everything, commit "Initial commit" and push with upstream tracking.
    pub async fn initial_push(&self, root: &Path) -> Result<InitialPushOutcome, GitError> {
        let branch = self.current_branch_or_main(root).await;

        let add = self.git(root, &["add", "."]).await;
        if !add.success {
            return Err(GitError::Stage(add.error_text()));
        }

        let commit = self.git(root, &["commit", "-m", "Initial commit"]).await;
        if !commit.success {
            if is_nothing_to_commit(&commit) {
                info!(root = %root.display(), "Nothing to commit in workspace, skipping push");
                return Ok(InitialPushOutcome::NothingToCommit);
            }
            return Err(GitError::Commit(commit.error_text()));
        }

        let push = self.git(root, &["push", "-u", "origin", &branch]).await;
        if push.success {
            info!(branch = %branch, "Pushed initial commit");
            return Ok(InitialPushOutcome::Pushed { branch });
        }
        if is_remote_access_denied(&push) {
            warn!(error = %push.error_text(), "Push failed due to remote access, skipping");
            return Ok(InitialPushOutcome::PushSkipped {
                reason: push.error_text(),
            });
        }
        Err(GitError::Push(push.error_text()))
    }
}
