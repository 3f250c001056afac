pub mod api;
pub mod app;
pub mod bridge;
pub mod chat;
pub mod client;
pub mod config;
pub mod git;
pub mod orchestrator;
pub mod publish;
pub mod runner;
pub mod workspace;

pub use stageflow_core::{models, registry};
