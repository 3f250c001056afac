//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stageflow::bridge::{ProcessSessionBridge, ReadinessProbe};
use stageflow::runner::{CommandOutput, CommandRunner};

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// `program arg1 arg2 ...`
    pub fn line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    output: CommandOutput,
    once: bool,
}

/// `CommandRunner` that answers from scripted rules and records every call.
///
/// The most recently added matching rule wins; `once` rules are used up by their first
/// match. Calls no rule matches succeed with empty output. With [`ScriptedRunner::with_tmux`]
/// tmux calls no rule matches are answered by an in-memory set of running hosts.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
    hosts: Option<Mutex<BTreeSet<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tmux() -> Self {
        Self {
            hosts: Some(Mutex::new(BTreeSet::new())),
            ..Self::default()
        }
    }

    fn add(&self, program: &str, prefix: &[&str], output: CommandOutput, once: bool) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
            once,
        });
    }

    /// Answer every call to `program` whose args start with `prefix`.
    pub fn on(&self, program: &str, prefix: &[&str], output: CommandOutput) -> &Self {
        self.add(program, prefix, output, false);
        self
    }

    /// Answer only the next matching call.
    pub fn once(&self, program: &str, prefix: &[&str], output: CommandOutput) -> &Self {
        self.add(program, prefix, output, true);
        self
    }

    /// Pretend a tmux host of this name is already running.
    pub fn add_host(&self, name: &str) {
        if let Some(hosts) = &self.hosts {
            hosts.lock().unwrap().insert(name.to_string());
        }
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts
            .as_ref()
            .map(|h| h.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::line).collect()
    }

    /// Number of calls whose line starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    fn scripted(&self, program: &str, args: &[&str]) -> Option<CommandOutput> {
        let mut rules = self.rules.lock().unwrap();
        let index = rules.iter().rposition(|rule| {
            rule.program == program
                && rule.prefix.len() <= args.len()
                && rule.prefix.iter().zip(args).all(|(p, a)| p == a)
        })?;
        let output = rules[index].output.clone();
        if rules[index].once {
            rules.remove(index);
        }
        Some(output)
    }

    fn tmux(&self, hosts: &Mutex<BTreeSet<String>>, args: &[&str]) -> CommandOutput {
        let mut hosts = hosts.lock().unwrap();
        let flag_value = |flag: &str| {
            args.iter()
                .position(|a| *a == flag)
                .and_then(|i| args.get(i + 1))
                .map(|s| s.to_string())
        };
        let requested = flag_value("-t").unwrap_or_default();
        let missing = || CommandOutput::failed(format!("can't find session: {}", requested));
        let target = resolve_target(&hosts, &requested);

        match args.first().copied() {
            Some("new-session") => {
                hosts.insert(flag_value("-s").unwrap_or_default());
                CommandOutput::ok("")
            }
            Some("has-session") | Some("send-keys") => match target {
                Some(_) => CommandOutput::ok(""),
                None => missing(),
            },
            Some("capture-pane") => match target {
                Some(_) => CommandOutput::ok("Welcome to the agent\n> "),
                None => missing(),
            },
            Some("kill-session") => match target {
                Some(name) => {
                    hosts.remove(&name);
                    CommandOutput::ok("")
                }
                None => missing(),
            },
            Some("list-sessions") => {
                if hosts.is_empty() {
                    CommandOutput::failed("no server running on /tmp/tmux-0/default")
                } else {
                    let names: Vec<&str> = hosts.iter().map(String::as_str).collect();
                    CommandOutput::ok(names.join("\n"))
                }
            }
            _ => CommandOutput::ok(""),
        }
    }
}

/// Resolve a `-t` target the way tmux does: `=name` (optionally followed by `:` for a pane)
/// matches exactly, a bare name falls back to the first host it prefixes.
fn resolve_target(hosts: &BTreeSet<String>, requested: &str) -> Option<String> {
    if let Some(exact) = requested.strip_prefix('=') {
        let exact = exact.strip_suffix(':').unwrap_or(exact);
        return hosts.get(exact).cloned();
    }
    let name = requested.strip_suffix(':').unwrap_or(requested);
    if let Some(found) = hosts.get(name) {
        return Some(found.clone());
    }
    hosts.iter().find(|h| h.starts_with(name)).cloned()
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> CommandOutput {
        self.calls.lock().unwrap().push(Invocation {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: cwd.map(Path::to_path_buf),
        });

        if let Some(output) = self.scripted(program, args) {
            return output;
        }
        match (&self.hosts, program) {
            (Some(hosts), "tmux") => self.tmux(hosts, args),
            _ => CommandOutput::ok(""),
        }
    }
}

/// A `CommandOutput` that failed with `text` on stdout, the way git reports a clean tree.
pub fn failed_stdout(text: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        exit_code: Some(1),
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

/// Bridge over `runner` with no relay delay and a short readiness poll.
pub fn fast_bridge(runner: Arc<ScriptedRunner>) -> ProcessSessionBridge {
    ProcessSessionBridge::new(runner, "claude-session")
        .with_relay_delay(Duration::ZERO)
        .with_readiness(ReadinessProbe {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            marker: None,
        })
}
