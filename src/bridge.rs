//! Backing agent processes hosted in tmux.
//!
//! Each session's agent runs in a detached tmux session named `<prefix>-<n>`. Relaying a
//! message types it into that host as literal keystrokes, waits briefly and submits it
//! with Enter. The host offers no acknowledgment channel, so readiness after start is
//! established by polling the pane ([`ProcessSessionBridge::wait_until_ready`]).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::runner::CommandRunner;

/// Pause between typing the text and pressing Enter.
pub const DEFAULT_RELAY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay to session {session_number} failed: backing host {host} does not exist")]
    HostMissing { session_number: u32, host: String },

    #[error("relay to session {session_number} failed: {output}")]
    Write { session_number: u32, output: String },
}

/// How long and how often to poll a freshly started host before relaying into it.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Text the pane must show. Without a marker any pane output counts as ready.
    pub marker: Option<String>,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
            marker: None,
        }
    }
}

/// Shell command that starts the agent in `working_dir`.
pub fn startup_command(working_dir: &Path, agent: &str, options: &str) -> String {
    let dir = working_dir.to_string_lossy();
    format!(
        "export LANG=C.UTF-8 && export LC_ALL=C.UTF-8 && cd {} && {} {}",
        shell_words::quote(&dir),
        agent,
        options
    )
    .trim()
    .to_string()
}

#[derive(Clone)]
pub struct ProcessSessionBridge {
    runner: Arc<dyn CommandRunner>,
    prefix: String,
    relay_delay: Duration,
    readiness: ReadinessProbe,
}

impl ProcessSessionBridge {
    pub fn new(runner: Arc<dyn CommandRunner>, prefix: impl Into<String>) -> Self {
        Self {
            runner,
            prefix: prefix.into(),
            relay_delay: DEFAULT_RELAY_DELAY,
            readiness: ReadinessProbe::default(),
        }
    }

    pub fn with_relay_delay(mut self, delay: Duration) -> Self {
        self.relay_delay = delay;
        self
    }

    pub fn with_readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = probe;
        self
    }

    pub fn readiness(&self) -> &ReadinessProbe {
        &self.readiness
    }

    pub fn host_name(&self, session_number: u32) -> String {
        format!("{}-{}", self.prefix, session_number)
    }

    /// Exact-match session target. A bare name would let tmux fall back to a prefix match.
    fn session_target(&self, session_number: u32) -> String {
        format!("={}", self.host_name(session_number))
    }

    /// Exact-match target for the active pane of the session.
    fn pane_target(&self, session_number: u32) -> String {
        format!("={}:", self.host_name(session_number))
    }

    async fn tmux(&self, args: &[&str]) -> crate::runner::CommandOutput {
        self.runner.run("tmux", args, None).await
    }

    pub async fn exists(&self, session_number: u32) -> bool {
        let target = self.session_target(session_number);
        self.tmux(&["has-session", "-t", &target]).await.success
    }

    /// Start the backing host for a session. Failures are logged and reported as `false`.
    pub async fn start(&self, session_number: u32, working_dir: &Path, command: &str) -> bool {
        let host = self.host_name(session_number);
        if self.exists(session_number).await {
            info!(session_number, host = %host, "Backing host already running");
            return true;
        }

        let dir = working_dir.to_string_lossy();
        let output = self
            .tmux(&[
                "new-session",
                "-d",
                "-s",
                &host,
                "-c",
                &dir,
                "bash",
                "-c",
                command,
            ])
            .await;
        if output.success {
            info!(session_number, host = %host, dir = %dir, "Started backing host");
            true
        } else {
            error!(session_number, host = %host, error = %output.error_text(), "Failed to start backing host");
            false
        }
    }

    /// Type `text` into the session's host and submit it.
    pub async fn relay(&self, session_number: u32, text: &str) -> Result<(), RelayError> {
        let host = self.host_name(session_number);
        if !self.exists(session_number).await {
            warn!(session_number, host = %host, "Relay target does not exist");
            return Err(RelayError::HostMissing {
                session_number,
                host,
            });
        }

        let target = self.pane_target(session_number);
        let typed = self
            .tmux(&["send-keys", "-t", &target, "-l", "--", text])
            .await;
        if !typed.success {
            error!(session_number, error = %typed.error_text(), "tmux send-keys failed");
            return Err(RelayError::Write {
                session_number,
                output: typed.error_text(),
            });
        }

        sleep(self.relay_delay).await;

        let submitted = self.tmux(&["send-keys", "-t", &target, "C-m"]).await;
        if !submitted.success {
            error!(session_number, error = %submitted.error_text(), "tmux submit failed");
            return Err(RelayError::Write {
                session_number,
                output: submitted.error_text(),
            });
        }

        info!(session_number, length = text.len(), "Message relayed");
        Ok(())
    }

    /// Poll until the host exists and its pane shows the readiness marker (or any output
    /// when no marker is configured). Returns `false` on timeout.
    pub async fn wait_until_ready(&self, session_number: u32) -> bool {
        let target = self.pane_target(session_number);
        let deadline = Instant::now() + self.readiness.timeout;

        loop {
            if self.exists(session_number).await {
                let pane = self.tmux(&["capture-pane", "-p", "-t", &target]).await;
                let ready = pane.success
                    && match &self.readiness.marker {
                        Some(marker) => pane.stdout.contains(marker.as_str()),
                        None => !pane.text().is_empty(),
                    };
                if ready {
                    debug!(session_number, "Backing host ready");
                    return true;
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    session_number,
                    timeout_secs = self.readiness.timeout.as_secs(),
                    "Backing host not ready before timeout"
                );
                return false;
            }
            sleep(self.readiness.poll_interval).await;
        }
    }

    pub async fn stop(&self, session_number: u32) -> bool {
        let host = self.host_name(session_number);
        let output = self
            .tmux(&["kill-session", "-t", &self.session_target(session_number)])
            .await;
        if output.success {
            info!(session_number, host = %host, "Stopped backing host");
        } else {
            warn!(session_number, error = %output.error_text(), "Failed to stop backing host");
        }
        output.success
    }

    /// Session numbers of every running host carrying this bridge's prefix.
    pub async fn running_sessions(&self) -> Vec<u32> {
        let output = self
            .tmux(&["list-sessions", "-F", "#{session_name}"])
            .await;
        if !output.success {
            // No tmux server means no sessions.
            return Vec::new();
        }
        let prefix = format!("{}-", self.prefix);
        let mut numbers: Vec<u32> = output
            .stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .filter_map(|n| n.parse().ok())
            .collect();
        numbers.sort_unstable();
        numbers
    }

    /// Stop every host carrying this bridge's prefix. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for number in self.running_sessions().await {
            if self.stop(number).await {
                stopped += 1;
            }
        }
        stopped
    }
}
