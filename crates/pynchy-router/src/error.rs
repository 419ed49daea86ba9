use pynchy_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("workspace not found for jid {0}")]
    UnknownWorkspace(String),

    #[error(transparent)]
    Store(#[from] pynchy_store::StoreError),

    #[error(transparent)]
    Session(#[from] pynchy_session::SessionError),

    #[error(transparent)]
    Bus(#[from] pynchy_bus::BusError),

    #[error(transparent)]
    Approval(#[from] pynchy_approval::ApprovalError),

    #[error(transparent)]
    Git(#[from] pynchy_git::GitError),

    #[error(transparent)]
    Ipc(#[from] pynchy_ipc::IpcError),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::UnknownWorkspace(_) => ErrorKind::NotFound,
            RouterError::Store(_) => ErrorKind::InternalError,
            RouterError::Session(e) => e.kind(),
            RouterError::Bus(_) => ErrorKind::BackendUnavailable,
            RouterError::Approval(e) => e.kind(),
            RouterError::Git(e) => e.kind(),
            RouterError::Ipc(_) => ErrorKind::ParseError,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
