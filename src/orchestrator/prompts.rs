//! Text the orchestrator relays to agents and posts to chat.

use std::path::Path;

use stageflow_core::models::Stage;

use crate::chat::InboundMessage;

/// Post that opens the next stage's channel thread, e.g. `"Requirements: foo-app"`.
pub fn announcement(next: Stage, project: &str) -> String {
    format!("{}: {}", next.label(), project)
}

/// Initial content of `idea.md`.
pub fn idea_document(project: &str, idea: &str) -> String {
    format!("# {}\n\n## Origin\n\n{}\n", project, idea)
}

/// Prompt relayed into a fresh session for `stage`. Paths are relative to the session's
/// working directory (the project root, or the execution workspace for development).
pub fn stage_prompt(stage: Stage, project: &str, idea: Option<&str>) -> String {
    match stage {
        Stage::Idea => idea_prompt(project, idea.unwrap_or_default()),
        Stage::Requirements => requirements_prompt(),
        Stage::Design => design_prompt(),
        Stage::Tasks => tasks_prompt(),
        Stage::Development => development_prompt(),
    }
}

fn idea_prompt(project: &str, idea: &str) -> String {
    format!(
        "Using the idea below, write a project proposal for `{project}` to ./idea.md.

Idea:
{idea}

Write it in Markdown and cover:
- project overview
- the problem to solve
- the proposed solution
- expected benefits
- an implementation outline from a technical point of view"
    )
}

fn requirements_prompt() -> String {
    "Read ./idea.md and write the requirements to ./requirements.md.

Structure:
1. Introduction: a clear summary of the feature.
2. Requirements: a hierarchical numbered list. Each requirement has
   - a user story: \"As a [role], I want [feature], so that [benefit]\"
   - acceptance criteria in EARS form:
     - WHEN [event] THEN [system] SHALL [response]
     - IF [precondition] THEN [system] SHALL [response]

Consider edge cases, user experience, technical constraints and success criteria."
        .to_string()
}

fn design_prompt() -> String {
    "Read ./requirements.md and write the design document to ./design.md.

Include these sections:
1. Overview
2. Architecture: overall structure, component relationships, data flow
3. Components and Interfaces: detailed design, interface definitions, API specification
4. Data Models: data structures and schemas where relevant
5. Error Handling
6. Testing Strategy

Add Mermaid diagrams where they help. Show how every requirement is realized."
        .to_string()
}

fn tasks_prompt() -> String {
    "Read ./design.md and write an implementation task list to ./tasks.md.

- Turn the design into a series of coding tasks, test-driven first.
- Keep each step small; every task builds on the previous one and ends in integration.
- Use a numbered checkbox list, at most two levels deep, with sub-details as bullets.
- Reference requirement numbers as _Requirements: X.X_.
- Coding tasks only: no user testing, deployment, performance measurement or docs.

Example:
- [ ] 1. Set up project structure and core interfaces
  - Create the directory layout
  - Define the interfaces
  - _Requirements: 1.1_"
        .to_string()
}

fn development_prompt() -> String {
    "Start v0 development following the task list in ./tasks.md.

Work through the tasks in order and tick each checkbox when its task is done.
Write tests first, commit in small steps, handle errors properly and keep the code readable.

Begin with the first task."
        .to_string()
}

/// Context relayed into a session that was created for an existing thread.
pub fn session_context(session_number: u32, message: &InboundMessage) -> String {
    [
        "=== Thread ===".to_string(),
        format!(
            "Channel: {}",
            message.parent_channel.as_deref().unwrap_or("unknown")
        ),
        format!("Thread: {}", message.thread_name),
        format!("Thread ID: {}", message.thread_id),
        format!("Session: {}", session_number),
        String::new(),
        "This session is bound to that thread only.".to_string(),
    ]
    .join("\n")
}

/// Message content with attachment paths appended.
pub fn with_attachments(content: &str, attachments: &[String]) -> String {
    if attachments.is_empty() {
        return content.to_string();
    }
    let parts: Vec<String> = attachments
        .iter()
        .map(|path| format!("[attachment: {}]", path))
        .collect();
    format!("{} {}", content, parts.join(" "))
}

/// Message posted in a new project's thread.
pub fn project_intro(project: &str, session_number: u32, document: &Path) -> String {
    format!(
        "Created project `{}`.\nStarted agent session #{}.\nFile: `{}`\n\nWriting up the idea...",
        project,
        session_number,
        document.display()
    )
}
