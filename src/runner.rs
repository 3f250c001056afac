//! External tool invocation.
//!
//! Every call to git, tmux or the hosting CLI goes through [`CommandRunner`], which never
//! fails: spawn errors and timeouts come back as an unsuccessful [`CommandOutput`] so the
//! caller can classify them like any other tool failure.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Trimmed stdout.
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// Error text: stderr, falling back to stdout, falling back to the exit code.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("Command failed with exit code {}", code),
            None => "Command terminated by signal".to_string(),
        }
    }

    /// Case-insensitive search across both streams. Git prints some failures (e.g.
    /// "nothing to commit") on stdout.
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.stdout.to_ascii_lowercase().contains(&needle)
            || self.stderr.to_ascii_lowercase().contains(&needle)
    }
}

/// Arguments with secret values (`-b <value>`, `--body <value>`) masked for logging.
fn redacted(args: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push("***".to_string());
            mask_next = false;
        } else {
            mask_next = matches!(*arg, "-b" | "--body");
            out.push((*arg).to_string());
        }
    }
    out
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally in `cwd`, and wait for it to exit.
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> CommandOutput;
}

/// Real subprocess execution backed by `tokio::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner {
    timeout: Option<Duration>,
}

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> CommandOutput {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!(program, args = ?redacted(args), cwd = ?cwd, "Executing command");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(program, "Command not found");
                return CommandOutput {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Command not found: {}", program),
                };
            }
            Err(e) => {
                warn!(program, error = %e, "Failed to spawn command");
                return CommandOutput {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Command execution error: {}", e),
                };
            }
        };

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(program, timeout_secs = limit.as_secs(), "Command timed out");
                    return CommandOutput {
                        success: false,
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("Command timed out after {} seconds", limit.as_secs()),
                    };
                }
            },
            None => child.wait_with_output().await,
        };

        match waited {
            Ok(output) => {
                let result = CommandOutput {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(program, exit_code = ?result.exit_code, "Command completed");
                result
            }
            Err(e) => CommandOutput {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!("Command execution error: {}", e),
            },
        }
    }
}
