mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::{fast_bridge, ScriptedRunner};
use stageflow::chat::{
    ChatError, ChatGateway, ChatTarget, InboundMessage, LocalGateway, PostedMessage, ThreadRef,
};
use stageflow::git::GitWorkflowExecutor;
use stageflow::models::Stage;
use stageflow::orchestrator::{CompletionRequest, ProjectStart, StageOrchestrator, WorkflowError};
use stageflow::publish::RepositoryPublisher;
use stageflow::registry::SessionRegistry;
use stageflow::runner::CommandOutput;
use stageflow::workspace::Workspace;
use tempfile::TempDir;

struct Harness {
    runner: Arc<ScriptedRunner>,
    gateway: Arc<LocalGateway>,
    orchestrator: StageOrchestrator,
    projects: PathBuf,
    workspaces: PathBuf,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_gateway(LocalGateway::new())
    }

    fn with_gateway(gateway: LocalGateway) -> Self {
        let dir = TempDir::new().unwrap();
        let projects = dir.path().join("projects");
        let workspaces = dir.path().join("workspaces");
        let templates = dir.path().join("templates");
        fs::create_dir_all(&projects).unwrap();
        fs::create_dir_all(templates.join(".github/workflows")).unwrap();
        fs::write(templates.join(".github/workflows/ci.yml"), "name: CI\n").unwrap();

        let runner = Arc::new(ScriptedRunner::with_tmux());
        let gateway = Arc::new(gateway);
        let orchestrator = StageOrchestrator::new(
            SessionRegistry::new(),
            GitWorkflowExecutor::new(runner.clone()),
            RepositoryPublisher::new(runner.clone(), "github.com"),
            fast_bridge(runner.clone()),
            gateway.clone(),
            Workspace::new(&projects, &workspaces).with_templates(Some(templates)),
        );

        Self {
            runner,
            gateway,
            orchestrator,
            projects,
            workspaces,
            _dir: dir,
        }
    }

    async fn start(&self, name: &str) -> ProjectStart {
        let origin = self
            .gateway
            .send(&ChatTarget::Channel(Stage::Idea), "A todo app for cats")
            .await
            .unwrap();
        self.orchestrator
            .start_project(name, "A todo app for cats", &origin)
            .await
            .unwrap()
    }

    async fn advance_to(&self, name: &str, target: Stage) {
        let mut stage = Stage::Idea;
        while stage != target {
            self.orchestrator.complete_stage(name, stage).await.unwrap();
            stage = stage.next().unwrap();
        }
    }

    fn cwd_of(&self, prefix: &str) -> Option<PathBuf> {
        self.runner
            .calls()
            .into_iter()
            .find(|c| c.line().starts_with(prefix))
            .and_then(|c| c.cwd)
    }
}

fn message(thread_id: &str, thread_name: &str, content: &str) -> InboundMessage {
    InboundMessage {
        thread_id: thread_id.to_string(),
        thread_name: thread_name.to_string(),
        parent_channel: Some("3-design".to_string()),
        author: "alice".to_string(),
        content: content.to_string(),
        attachments: Vec::new(),
    }
}

fn file_text(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

mod start_project {
    use super::*;

    #[tokio::test]
    async fn scaffolds_the_project_and_launches_the_idea_agent() {
        let h = Harness::new();

        let start = h.start("foo-app").await;

        assert_eq!(start.session_number, 1);
        assert_eq!(start.root, h.projects.join("foo-app"));
        assert!(start.prompt_delivered);
        assert!(file_text(&start.root.join("idea.md")).contains("A todo app for cats"));

        let registry = h.orchestrator.registry();
        assert_eq!(registry.get_session(&start.thread_id), Some(1));
        assert_eq!(registry.project("foo-app").unwrap().current_stage, Stage::Idea);
        let workflow = registry.workflow_state("foo-app").unwrap();
        assert_eq!(workflow.thread_ids.get(&Stage::Idea), Some(&start.thread_id));

        assert_eq!(h.runner.count("tmux new-session -d -s claude-session-1"), 1);
        assert!(h
            .runner
            .ran("tmux send-keys -t =claude-session-1: -l -- Using the idea below"));

        let intro = h.gateway.posts_to(&ChatTarget::Thread(start.thread_id.clone()));
        assert_eq!(intro.len(), 1);
        assert!(intro[0].text.contains("Started agent session #1"));
    }

    #[tokio::test]
    async fn rejects_invalid_names_before_touching_anything() {
        let h = Harness::new();
        let origin = h
            .gateway
            .send(&ChatTarget::Channel(Stage::Idea), "idea")
            .await
            .unwrap();

        let err = h
            .orchestrator
            .start_project("Foo_App", "idea", &origin)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(h.gateway.threads().is_empty());
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_an_existing_project() {
        let h = Harness::new();
        h.start("foo-app").await;
        let origin = h
            .gateway
            .send(&ChatTarget::Channel(Stage::Idea), "again")
            .await
            .unwrap();

        let err = h
            .orchestrator
            .start_project("foo-app", "again", &origin)
            .await
            .unwrap_err();

        assert!(err.user_message().contains("already exists"));
        assert_eq!(h.gateway.threads().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ideas_at_once_open_one_thread() {
        let h = Harness::new();
        let origin = h
            .gateway
            .send(&ChatTarget::Channel(Stage::Idea), "A todo app for cats")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.orchestrator
                .start_project("foo-app", "A todo app for cats", &origin),
            h.orchestrator
                .start_project("foo-app", "A todo app for cats", &origin),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(WorkflowError::Validation(_)))));
        assert_eq!(h.gateway.threads().len(), 1);
        assert_eq!(h.orchestrator.registry().list_sessions().len(), 1);
        assert_eq!(h.runner.count("tmux new-session"), 1);
    }

    struct ThreadlessGateway;

    #[async_trait]
    impl ChatGateway for ThreadlessGateway {
        async fn send(&self, target: &ChatTarget, text: &str) -> Result<PostedMessage, ChatError> {
            Ok(PostedMessage {
                id: "m-1".to_string(),
                target: target.clone(),
                text: text.to_string(),
            })
        }

        async fn create_thread(
            &self,
            _message: &PostedMessage,
            _name: &str,
        ) -> Result<ThreadRef, ChatError> {
            Err(ChatError::Gateway("threads are disabled".to_string()))
        }
    }

    #[tokio::test]
    async fn thread_failure_removes_the_scaffold() {
        let dir = TempDir::new().unwrap();
        let projects = dir.path().join("projects");
        let runner = Arc::new(ScriptedRunner::with_tmux());
        let gateway: Arc<dyn ChatGateway> = Arc::new(ThreadlessGateway);
        let orchestrator = StageOrchestrator::new(
            SessionRegistry::new(),
            GitWorkflowExecutor::new(runner.clone()),
            RepositoryPublisher::new(runner.clone(), "github.com"),
            fast_bridge(runner.clone()),
            gateway.clone(),
            Workspace::new(&projects, dir.path().join("workspaces")),
        );
        let origin = gateway
            .send(&ChatTarget::Channel(Stage::Idea), "idea")
            .await
            .unwrap();

        let err = orchestrator
            .start_project("foo-app", "idea", &origin)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Chat(_)));
        assert!(!projects.join("foo-app").exists());
        assert!(orchestrator.registry().project("foo-app").is_none());
        assert!(orchestrator.registry().list_sessions().is_empty());
        assert!(!runner.ran("tmux"));
    }
}

mod complete_stage {
    use super::*;

    #[tokio::test]
    async fn idea_checkpoints_and_opens_requirements() {
        let h = Harness::new();
        h.start("foo-app").await;

        let report = h
            .orchestrator
            .complete_stage("foo-app", Stage::Idea)
            .await
            .unwrap();

        assert_eq!(report.next, Stage::Requirements);
        assert_eq!(report.session_number, 2);
        assert!(report.prompt_delivered);
        assert!(report.repository_url.is_none());

        let root = h.projects.join("foo-app");
        assert!(h.runner.ran("git commit -m [foo-app] Complete idea phase"));
        assert_eq!(h.cwd_of("git commit"), Some(root.clone()));
        assert!(!h.runner.ran("git push"));

        let posts = h.gateway.posts_to(&ChatTarget::Channel(Stage::Requirements));
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "Requirements: foo-app");

        assert!(root.join("requirements.md").is_file());
        assert!(h.runner.ran(&format!(
            "tmux new-session -d -s claude-session-2 -c {}",
            root.display()
        )));
        assert!(h
            .runner
            .ran("tmux send-keys -t =claude-session-2: -l -- Read ./idea.md"));

        let registry = h.orchestrator.registry();
        let workflow = registry.workflow_state("foo-app").unwrap();
        assert_eq!(workflow.completed_stages, vec![Stage::Idea]);
        assert_eq!(workflow.current_channel, Stage::Requirements);
        assert!(workflow.in_progress.is_none());
        let project = registry.project("foo-app").unwrap();
        assert_eq!(project.current_stage, Stage::Requirements);
        assert_eq!(project.documents.get(&Stage::Idea), Some(&root.join("idea.md")));
        assert!(!project.documents.contains_key(&Stage::Requirements));
        assert_eq!(
            registry.session_info(2).unwrap().stage,
            Stage::Requirements
        );
    }

    #[tokio::test]
    async fn tasks_promotes_and_publishes_before_development() {
        let h = Harness::new();
        h.runner
            .on("gh", &["api", "user"], CommandOutput::ok("octo"))
            .on(
                "gh",
                &["repo", "create"],
                CommandOutput::failed("GraphQL: Name already exists on this account"),
            )
            .on(
                "git",
                &["push", "-u"],
                CommandOutput::failed("remote: Permission denied to octo/foo-app."),
            );
        h.start("foo-app").await;
        h.advance_to("foo-app", Stage::Tasks).await;

        let report = h
            .orchestrator
            .complete_stage("foo-app", Stage::Tasks)
            .await
            .unwrap();

        let exec = h.workspaces.join("foo-app");
        assert_eq!(report.next, Stage::Development);
        assert_eq!(
            report.repository_url.as_deref(),
            Some("https://github.com/octo/foo-app")
        );
        assert!(report.push_skipped);
        assert!(report.summary().contains("Repository created, push skipped"));

        assert!(exec.join("tasks.md").is_file());
        assert!(exec.join(".github/workflows/ci.yml").is_file());
        assert!(!exec.join("development.md").exists());

        assert!(h.runner.ran("git remote add origin https://github.com/octo/foo-app.git"));
        assert_eq!(h.cwd_of("git remote add"), Some(exec.clone()));
        assert_eq!(h.cwd_of("git checkout -b main"), Some(exec.clone()));
        assert!(h.runner.ran("git commit -m Initial commit"));

        let registry = h.orchestrator.registry();
        let project = registry.project("foo-app").unwrap();
        assert_eq!(project.current_stage, Stage::Development);
        assert_eq!(project.execution_workspace, Some(exec.clone()));
        assert_eq!(
            project.remote_url.as_deref(),
            Some("https://github.com/octo/foo-app.git")
        );
        let session = registry.session_info(report.session_number).unwrap();
        assert_eq!(session.working_directory, exec);
        assert_eq!(
            registry.workflow_state("foo-app").unwrap().completed_stages,
            vec![Stage::Idea, Stage::Requirements, Stage::Design, Stage::Tasks]
        );
    }

    #[tokio::test]
    async fn retry_after_missing_channel_skips_the_checkpoint() {
        let h = Harness::with_gateway(LocalGateway::new().without_channel(Stage::Requirements));
        h.start("foo-app").await;

        let err = h
            .orchestrator
            .complete_stage("foo-app", Stage::Idea)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Chat(ChatError::ChannelNotFound(_))));
        assert_eq!(err.user_message(), "Channel #2-requirements not found");

        let workflow = h.orchestrator.registry().workflow_state("foo-app").unwrap();
        assert_eq!(workflow.current_channel, Stage::Idea);
        assert!(workflow.in_progress.unwrap().checkpointed);

        h.gateway.restore_channel(Stage::Requirements);
        let report = h
            .orchestrator
            .complete_stage("foo-app", Stage::Idea)
            .await
            .unwrap();

        assert!(report.checkpoint.is_none());
        assert_eq!(h.runner.count("git commit"), 1);
        assert_eq!(report.next, Stage::Requirements);
    }

    #[tokio::test]
    async fn commit_failure_leaves_the_stage_in_place() {
        let h = Harness::new();
        h.runner.on(
            "git",
            &["commit"],
            CommandOutput::failed("fatal: unable to auto-detect email address"),
        );
        h.start("foo-app").await;

        let err = h
            .orchestrator
            .complete_stage("foo-app", Stage::Idea)
            .await
            .unwrap_err();

        assert!(err.user_message().starts_with("Git error:"));
        assert!(err.user_message().contains("auto-detect email"));
        assert!(h.gateway.posts_to(&ChatTarget::Channel(Stage::Requirements)).is_empty());
        assert_eq!(
            h.orchestrator.registry().project("foo-app").unwrap().current_stage,
            Stage::Idea
        );
    }

    #[tokio::test]
    async fn repository_creation_failure_points_at_authentication() {
        let h = Harness::new();
        h.start("foo-app").await;
        h.advance_to("foo-app", Stage::Tasks).await;
        h.runner.on(
            "gh",
            &["repo", "create"],
            CommandOutput::failed("HTTP 401: Bad credentials"),
        );

        let err = h
            .orchestrator
            .complete_stage("foo-app", Stage::Tasks)
            .await
            .unwrap_err();

        assert!(err.user_message().contains("gh auth login"));
        assert!(h
            .gateway
            .posts_to(&ChatTarget::Channel(Stage::Development))
            .is_empty());
    }

    #[tokio::test]
    async fn development_cannot_be_completed() {
        let h = Harness::new();

        let err = h
            .orchestrator
            .complete_stage("foo-app", Stage::Development)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(h.runner.calls().is_empty());
        assert!(h.gateway.posts().is_empty());
    }

    #[tokio::test]
    async fn simultaneous_completions_transition_once() {
        let h = Harness::new();
        h.start("foo-app").await;

        let (a, b) = tokio::join!(
            h.orchestrator.complete_stage("foo-app", Stage::Idea),
            h.orchestrator.complete_stage("foo-app", Stage::Idea),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(WorkflowError::Validation(_)))));
        assert_eq!(h.runner.count("git commit"), 1);
        assert_eq!(
            h.gateway
                .posts_to(&ChatTarget::Channel(Stage::Requirements))
                .len(),
            1
        );
        let workflow = h.orchestrator.registry().workflow_state("foo-app").unwrap();
        assert_eq!(workflow.completed_stages, vec![Stage::Idea]);
    }

    #[tokio::test]
    async fn wrong_stage_is_rejected() {
        let h = Harness::new();
        h.start("foo-app").await;

        let err = h
            .orchestrator
            .complete_stage("foo-app", Stage::Design)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(!h.runner.ran("git"));
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let h = Harness::new();

        let err = h
            .orchestrator
            .complete_stage("ghost", Stage::Idea)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn project_on_disk_is_adopted() {
        let h = Harness::new();
        let root = h.projects.join("legacy-app");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("design.md"), "# Design\n").unwrap();

        let report = h
            .orchestrator
            .complete_stage("legacy-app", Stage::Design)
            .await
            .unwrap();

        assert_eq!(report.session_number, 1);
        assert_eq!(report.next, Stage::Tasks);
        let project = h.orchestrator.registry().project("legacy-app").unwrap();
        assert_eq!(project.current_stage, Stage::Tasks);
        assert_eq!(project.documents.get(&Stage::Design), Some(&root.join("design.md")));
    }
}

mod complete_from_chat {
    use super::*;

    #[tokio::test]
    async fn replies_with_the_summary() {
        let h = Harness::new();
        let start = h.start("foo-app").await;

        let report = h
            .orchestrator
            .complete_from_chat(&CompletionRequest {
                thread_id: start.thread_id.clone(),
                thread_name: "foo-app".into(),
                parent_channel: Some("1-idea".into()),
            })
            .await
            .unwrap();

        assert_eq!(report.completed, Stage::Idea);
        let replies = h.gateway.posts_to(&ChatTarget::Thread(start.thread_id));
        let last = replies.last().unwrap();
        assert!(last.text.contains("Next stage: #2-requirements (session 2)"));
    }

    #[tokio::test]
    async fn outside_a_stage_thread_is_rejected_in_chat() {
        let h = Harness::new();
        let post = h
            .gateway
            .send(&ChatTarget::Channel(Stage::Idea), "hello")
            .await
            .unwrap();
        let thread = h.gateway.create_thread(&post, "chatter").await.unwrap();

        let err = h
            .orchestrator
            .complete_from_chat(&CompletionRequest {
                thread_id: thread.id.clone(),
                thread_name: "chatter".into(),
                parent_channel: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Validation(_)));
        let replies = h.gateway.posts_to(&ChatTarget::Thread(thread.id));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, err.user_message());
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn non_stage_channel_is_rejected() {
        let h = Harness::new();

        let err = h
            .orchestrator
            .complete_from_chat(&CompletionRequest {
                thread_id: "t-1".into(),
                thread_name: "foo-app".into(),
                parent_channel: Some("general".into()),
            })
            .await
            .unwrap_err();

        assert!(err.user_message().contains("#general"));
    }
}

mod handle_message {
    use super::*;

    #[tokio::test]
    async fn new_thread_gets_a_session_and_context() {
        let h = Harness::new();
        let mut msg = message("t-77", "random", "look at this");
        msg.attachments = vec!["/tmp/a.png".into()];

        let session = h.orchestrator.handle_message(&msg).await.unwrap();

        assert_eq!(session, Some(1));
        assert!(h.runner.ran(&format!(
            "tmux new-session -d -s claude-session-1 -c {}",
            h.projects.display()
        )));
        assert!(h
            .runner
            .ran("tmux send-keys -t =claude-session-1: -l -- === Thread ==="));
        assert!(h
            .runner
            .ran("tmux send-keys -t =claude-session-1: -l -- look at this [attachment: /tmp/a.png]"));
    }

    #[tokio::test]
    async fn known_thread_is_relayed_without_restarting() {
        let h = Harness::new();
        let start = h.start("foo-app").await;

        let session = h
            .orchestrator
            .handle_message(&message(&start.thread_id, "foo-app", "more detail"))
            .await
            .unwrap();

        assert_eq!(session, Some(1));
        assert_eq!(h.runner.count("tmux new-session"), 1);
        assert!(h
            .runner
            .ran("tmux send-keys -t =claude-session-1: -l -- more detail"));
    }

    #[tokio::test]
    async fn simultaneous_first_messages_launch_one_host() {
        let h = Harness::new();
        let first = message("t-5", "random", "first");
        let second = message("t-5", "random", "second");

        let (a, b) = tokio::join!(
            h.orchestrator.handle_message(&first),
            h.orchestrator.handle_message(&second),
        );

        assert_eq!(a.unwrap(), Some(1));
        assert_eq!(b.unwrap(), Some(1));
        assert_eq!(h.runner.count("tmux new-session"), 1);
        assert_eq!(
            h.runner
                .count("tmux send-keys -t =claude-session-1: -l -- === Thread ==="),
            1
        );
    }

    #[tokio::test]
    async fn commands_are_not_relayed() {
        let h = Harness::new();

        let session = h
            .orchestrator
            .handle_message(&message("t-1", "foo-app", "!complete"))
            .await
            .unwrap();

        assert_eq!(session, None);
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.orchestrator.registry().get_session("t-1"), None);
    }

    #[tokio::test]
    async fn dead_host_surfaces_a_relay_error() {
        let h = Harness::new();
        let start = h.start("foo-app").await;
        h.orchestrator.stop_all_sessions().await;
        h.orchestrator.registry().register_session(1, &start.thread_id);

        let err = h
            .orchestrator
            .handle_message(&message(&start.thread_id, "foo-app", "hello?"))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Relay(_)));
    }
}

mod stopping {
    use super::*;

    #[tokio::test]
    async fn stop_session_unmaps_the_thread() {
        let h = Harness::new();
        let start = h.start("foo-app").await;

        h.orchestrator.stop_session(1).await.unwrap();

        assert!(h.runner.hosts().is_empty());
        assert_eq!(h.orchestrator.registry().get_session(&start.thread_id), None);
        assert!(matches!(
            h.orchestrator.stop_session(1).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_all_does_not_reuse_numbers() {
        let h = Harness::new();
        h.start("foo-app").await;
        h.orchestrator.complete_stage("foo-app", Stage::Idea).await.unwrap();

        assert_eq!(h.orchestrator.stop_all_sessions().await, 2);

        let registry = h.orchestrator.registry();
        assert!(registry.list_sessions().is_empty());
        assert_eq!(registry.get_or_create_session("fresh"), 3);
    }
}
