use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Stage;

/// A project tracked through the pipeline.
///
/// `documents` only ever holds entries for stages that have completed. The execution
/// workspace and remote URL are set once, when the project is promoted to `Development`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub current_stage: Stage,
    /// Directory holding the stage documents.
    pub root: PathBuf,
    pub execution_workspace: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub documents: BTreeMap<Stage, PathBuf>,
}
