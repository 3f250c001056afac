//! Core types for stageflow: the stage pipeline models and the in-memory
//! [`registry::SessionRegistry`] shared by the orchestrator and the HTTP control plane.

pub mod models;
pub mod registry;
