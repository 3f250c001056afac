//! Project scaffolding on the local filesystem.
//!
//! Documentation stages live under `projects_root/<name>`; promotion copies that tree
//! into `workspace_root/<name>`, where development happens. Everything here is blocking
//! std I/O; async callers wrap it in `spawn_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stageflow_core::models::Stage;
use thiserror::Error;
use tracing::{debug, info};

/// Directory copied from the templates dir into every execution workspace.
const CI_TEMPLATE_DIR: &str = ".github";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("project directory already exists: {0}")]
    ProjectExists(PathBuf),

    #[error("project directory not found: {0}")]
    ProjectMissing(PathBuf),

    #[error("execution workspace already exists: {0}")]
    WorkspaceExists(PathBuf),

    #[error("{stage} has no stage document")]
    NoDocument { stage: Stage },

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    projects_root: PathBuf,
    workspace_root: PathBuf,
    templates_dir: Option<PathBuf>,
}

impl Workspace {
    pub fn new(projects_root: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            workspace_root: workspace_root.into(),
            templates_dir: None,
        }
    }

    pub fn with_templates(mut self, templates_dir: Option<PathBuf>) -> Self {
        self.templates_dir = templates_dir;
        self
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    pub fn project_root(&self, name: &str) -> PathBuf {
        self.projects_root.join(name)
    }

    pub fn execution_root(&self, name: &str) -> PathBuf {
        self.workspace_root.join(name)
    }

    pub fn document_path(&self, name: &str, stage: Stage) -> PathBuf {
        self.project_root(name).join(stage.document_name())
    }

    /// Create the project root. Fails if it already exists.
    pub fn create_project(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let root = self.project_root(name);
        if root.exists() {
            return Err(WorkspaceError::ProjectExists(root));
        }
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        info!(project = name, root = %root.display(), "Created project directory");
        Ok(root)
    }

    /// Remove a project root and everything under it. Missing roots are not an error.
    pub fn remove_project(&self, name: &str) -> Result<(), WorkspaceError> {
        let root = self.project_root(name);
        match fs::remove_dir_all(&root) {
            Ok(()) => {
                info!(project = name, root = %root.display(), "Removed project directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&root)(e)),
        }
    }

    /// Write the document for a documentation stage, replacing any previous content.
    pub fn write_document(
        &self,
        name: &str,
        stage: Stage,
        content: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        if !stage.is_documentation() {
            return Err(WorkspaceError::NoDocument { stage });
        }
        let root = self.project_root(name);
        if !root.is_dir() {
            return Err(WorkspaceError::ProjectMissing(root));
        }
        let path = root.join(stage.document_name());
        fs::write(&path, content).map_err(io_err(&path))?;
        debug!(project = name, path = %path.display(), "Wrote stage document");
        Ok(path)
    }

    /// Create the stage document empty if it does not exist yet.
    pub fn touch_document(&self, name: &str, stage: Stage) -> Result<PathBuf, WorkspaceError> {
        let path = self.document_path(name, stage);
        if path.exists() {
            return Ok(path);
        }
        self.write_document(name, stage, "")
    }

    /// Copy the project tree into a fresh execution workspace. The project's own `.git`
    /// is left behind so the workspace starts a history of its own.
    pub fn promote(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let source = self.project_root(name);
        if !source.is_dir() {
            return Err(WorkspaceError::ProjectMissing(source));
        }
        let target = self.execution_root(name);
        if target.exists() {
            return Err(WorkspaceError::WorkspaceExists(target));
        }
        copy_tree(&source, &target, &[".git"])?;
        info!(project = name, from = %source.display(), to = %target.display(), "Promoted project to execution workspace");
        Ok(target)
    }

    /// Copy the CI templates into the workspace, replacing any existing copy. Returns
    /// `false` when no templates are configured or the template dir has none.
    pub fn install_ci_templates(&self, name: &str) -> Result<bool, WorkspaceError> {
        let Some(templates) = &self.templates_dir else {
            return Ok(false);
        };
        let source = templates.join(CI_TEMPLATE_DIR);
        if !source.is_dir() {
            debug!(path = %source.display(), "No CI templates to install");
            return Ok(false);
        }
        let workspace = self.execution_root(name);
        if !workspace.is_dir() {
            return Err(WorkspaceError::ProjectMissing(workspace));
        }
        let target = workspace.join(CI_TEMPLATE_DIR);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(io_err(&target))?;
        }
        copy_tree(&source, &target, &[])?;
        info!(project = name, to = %target.display(), "Installed CI templates");
        Ok(true)
    }
}

fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> Result<(), WorkspaceError> {
    fs::create_dir_all(dst).map_err(io_err(dst))?;
    for entry in fs::read_dir(src).map_err(io_err(src))? {
        let entry = entry.map_err(io_err(src))?;
        let name = entry.file_name();
        if skip.iter().any(|s| name == *s) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type().map_err(io_err(&from))?;
        if file_type.is_dir() {
            copy_tree(&from, &to, &[])?;
        } else if file_type.is_symlink() {
            copy_link(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(io_err(&from))?;
        }
    }
    Ok(())
}

/// Recreate a symlink as-is instead of following it.
#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    let link = fs::read_link(from).map_err(io_err(from))?;
    std::os::unix::fs::symlink(&link, to).map_err(io_err(to))
}

#[cfg(not(unix))]
fn copy_link(from: &Path, _to: &Path) -> Result<(), WorkspaceError> {
    debug!(path = %from.display(), "Skipping symlink");
    Ok(())
}
