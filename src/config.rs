//! Runtime settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::ReadinessProbe;
use crate::client::DEFAULT_URL;

pub const DEFAULT_PORT: u16 = 5001;

/// Settings for `sflow serve` and the client subcommands.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Control plane port (from STAGEFLOW_PORT)
    pub port: u16,
    /// Control plane base URL used by the client (from STAGEFLOW_URL)
    pub url: String,
    /// Roots of documentation-stage projects (from STAGEFLOW_PROJECTS_ROOT)
    pub projects_root: PathBuf,
    /// Execution workspaces (from STAGEFLOW_WORKSPACE_ROOT)
    pub workspace_root: PathBuf,
    /// Directory holding the `.github` CI templates (from STAGEFLOW_TEMPLATES_DIR)
    pub templates_dir: Option<PathBuf>,
    /// Agent started in every backing host (from STAGEFLOW_AGENT_COMMAND)
    pub agent_command: String,
    /// Extra agent arguments (from STAGEFLOW_AGENT_OPTIONS)
    pub agent_options: String,
    /// Terminal host naming prefix (from STAGEFLOW_SESSION_PREFIX)
    pub session_prefix: String,
    /// Host used in synthesized repository URLs (from STAGEFLOW_HOSTING_HOST)
    pub hosting_host: String,
    /// Hosting account, instead of asking `gh` (from STAGEFLOW_HOSTING_USER)
    pub hosting_user: Option<String>,
    /// Secret names set on published repositories (from STAGEFLOW_REPO_SECRETS, comma-separated)
    pub repo_secrets: Vec<String>,
    /// Readiness poll timeout (from STAGEFLOW_READY_TIMEOUT_SECS)
    pub ready_timeout: Duration,
    /// Text a host pane must show to count as ready (from STAGEFLOW_READY_MARKER)
    pub ready_marker: Option<String>,
}

fn home_path(rel: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(rel)
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = get("STAGEFLOW_PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let repo_secrets = get("STAGEFLOW_REPO_SECRETS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let ready_timeout = get("STAGEFLOW_READY_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| ReadinessProbe::default().timeout);

        Self {
            port,
            url: get("STAGEFLOW_URL").unwrap_or_else(|| DEFAULT_URL.to_string()),
            projects_root: get("STAGEFLOW_PROJECTS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| home_path("stageflow/projects")),
            workspace_root: get("STAGEFLOW_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| home_path("stageflow/workspaces")),
            templates_dir: get("STAGEFLOW_TEMPLATES_DIR").map(PathBuf::from),
            agent_command: get("STAGEFLOW_AGENT_COMMAND").unwrap_or_else(|| "claude".to_string()),
            agent_options: get("STAGEFLOW_AGENT_OPTIONS").unwrap_or_default(),
            session_prefix: get("STAGEFLOW_SESSION_PREFIX")
                .unwrap_or_else(|| stageflow_core::registry::DEFAULT_HOST_PREFIX.to_string()),
            hosting_host: get("STAGEFLOW_HOSTING_HOST").unwrap_or_else(|| "github.com".to_string()),
            hosting_user: get("STAGEFLOW_HOSTING_USER"),
            repo_secrets,
            ready_timeout,
            ready_marker: get("STAGEFLOW_READY_MARKER"),
        }
    }

    pub fn readiness(&self) -> ReadinessProbe {
        ReadinessProbe {
            timeout: self.ready_timeout,
            marker: self.ready_marker.clone(),
            ..ReadinessProbe::default()
        }
    }
}
