use pynchy_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("no handler registered for task type {0}")]
    NoHandler(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl IpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IpcError::Io(_) | IpcError::Watch(_) => ErrorKind::InternalError,
            IpcError::Parse { .. } => ErrorKind::ParseError,
            IpcError::NoHandler(_) => ErrorKind::NotFound,
            IpcError::Unauthorized(_) => ErrorKind::Unauthorized,
        }
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
