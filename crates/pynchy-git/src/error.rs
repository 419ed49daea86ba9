use pynchy_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {command} ({reason})")]
    CommandFailed { command: String, reason: String },

    #[error("worktree conflict in {folder}: {0}", folder = .0)]
    Conflict(String),

    #[error("worktree not found for folder {0}")]
    WorktreeMissing(String),

    #[error("worktree for {folder} is dirty, refusing to {op}")]
    Dirty { folder: String, op: String },

    #[error("github cli error: {0}")]
    GitHub(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitError::CommandFailed { .. } => ErrorKind::BackendUnavailable,
            GitError::Conflict(_) => ErrorKind::GitConflict,
            GitError::WorktreeMissing(_) => ErrorKind::NotFound,
            GitError::Dirty { .. } => ErrorKind::GitConflict,
            GitError::GitHub(_) => ErrorKind::BackendUnavailable,
            GitError::Io(_) => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, GitError>;
