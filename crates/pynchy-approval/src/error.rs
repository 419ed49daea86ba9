use pynchy_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no pending approval {0}")]
    NotFound(String),

    #[error("approval {0} timed out")]
    TimedOut(String),

    #[error("could not allocate a short id for folder {0} (all 2-char ids in use)")]
    ShortIdExhausted(String),

    #[error(transparent)]
    Ipc(#[from] pynchy_ipc::IpcError),
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApprovalError::NotFound(_) => ErrorKind::NotFound,
            ApprovalError::TimedOut(_) => ErrorKind::ApprovalTimeout,
            ApprovalError::ShortIdExhausted(_) => ErrorKind::InternalError,
            ApprovalError::Ipc(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApprovalError>;
