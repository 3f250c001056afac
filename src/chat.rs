//! Chat gateway seam.
//!
//! The orchestrator needs exactly two things from the chat platform: post a message to a
//! channel or thread, and open a thread under a posted message. Platform adapters implement
//! [`ChatGateway`]; [`LocalGateway`] is the in-process implementation used by `sflow serve`
//! when no adapter is attached, and by tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stageflow_core::models::Stage;
use thiserror::Error;
use uuid::Uuid;

/// Where a message is posted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTarget {
    /// The channel that belongs to a stage (`1-idea`, `2-requirements`, ...).
    Channel(Stage),
    Thread(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub id: String,
    pub target: ChatTarget,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub id: String,
    pub name: String,
    pub parent: ChatTarget,
}

/// A message received from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub thread_id: String,
    pub thread_name: String,
    /// Name of the channel the thread hangs off, if the message was posted in a thread.
    pub parent_channel: Option<String>,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("channel #{0} not found")]
    ChannelNotFound(String),

    #[error("thread {0} not found")]
    ThreadNotFound(String),

    #[error("chat gateway error: {0}")]
    Gateway(String),
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send(&self, target: &ChatTarget, text: &str) -> Result<PostedMessage, ChatError>;

    async fn create_thread(
        &self,
        message: &PostedMessage,
        name: &str,
    ) -> Result<ThreadRef, ChatError>;
}

#[derive(Default)]
struct LocalState {
    posts: Vec<PostedMessage>,
    threads: Vec<ThreadRef>,
    missing_channels: HashSet<Stage>,
}

/// Gateway that keeps posts in memory and writes them to the log.
#[derive(Default)]
pub struct LocalGateway {
    state: Mutex<LocalState>,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the channel for `stage` as absent; posting to it fails with
    /// [`ChatError::ChannelNotFound`].
    pub fn without_channel(self, stage: Stage) -> Self {
        self.state
            .lock()
            .expect("gateway lock poisoned")
            .missing_channels
            .insert(stage);
        self
    }

    pub fn restore_channel(&self, stage: Stage) {
        self.state
            .lock()
            .expect("gateway lock poisoned")
            .missing_channels
            .remove(&stage);
    }

    pub fn posts(&self) -> Vec<PostedMessage> {
        self.state.lock().expect("gateway lock poisoned").posts.clone()
    }

    pub fn posts_to(&self, target: &ChatTarget) -> Vec<PostedMessage> {
        self.posts()
            .into_iter()
            .filter(|p| &p.target == target)
            .collect()
    }

    pub fn threads(&self) -> Vec<ThreadRef> {
        self.state
            .lock()
            .expect("gateway lock poisoned")
            .threads
            .clone()
    }
}

#[async_trait]
impl ChatGateway for LocalGateway {
    async fn send(&self, target: &ChatTarget, text: &str) -> Result<PostedMessage, ChatError> {
        let mut state = self.state.lock().expect("gateway lock poisoned");
        match target {
            ChatTarget::Channel(stage) if state.missing_channels.contains(stage) => {
                return Err(ChatError::ChannelNotFound(stage.channel_name()));
            }
            ChatTarget::Thread(id) if !state.threads.iter().any(|t| &t.id == id) => {
                return Err(ChatError::ThreadNotFound(id.clone()));
            }
            _ => {}
        }

        let message = PostedMessage {
            id: Uuid::new_v4().to_string(),
            target: target.clone(),
            text: text.to_string(),
        };
        tracing::info!(target = ?target, text, "Chat post");
        state.posts.push(message.clone());
        Ok(message)
    }

    async fn create_thread(
        &self,
        message: &PostedMessage,
        name: &str,
    ) -> Result<ThreadRef, ChatError> {
        let thread = ThreadRef {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            parent: message.target.clone(),
        };
        tracing::info!(thread_id = %thread.id, name, "Chat thread created");
        self.state
            .lock()
            .expect("gateway lock poisoned")
            .threads
            .push(thread.clone());
        Ok(thread)
    }
}
