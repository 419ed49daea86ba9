use pynchy_core::ErrorKind;
use thiserror::Error;

/// Errors from the container session manager (§4.2).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The container process failed to spawn (bad image, docker daemon
    /// unreachable, port conflict, ...).
    #[error("container spawn failed for {folder}: {reason}")]
    SpawnFailed { folder: String, reason: String },

    /// The container process exited before emitting a query-done pulse
    /// while a query was in flight.
    #[error("container for {folder} died before completing its turn")]
    ContainerDied { folder: String },

    /// `wait_done` exceeded the effective timeout.
    #[error("query for {folder} timed out after {ms}ms")]
    Timeout { folder: String, ms: u64 },

    /// No session is registered for this workspace.
    #[error("no active session for workspace {0}")]
    NotFound(String),

    /// A cold start was requested while a session already existed.
    #[error("session already active for workspace {0}")]
    AlreadyActive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(#[from] pynchy_ipc::IpcError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::SpawnFailed { .. } => ErrorKind::BackendUnavailable,
            SessionError::ContainerDied { .. } => ErrorKind::ContainerDied,
            SessionError::Timeout { .. } => ErrorKind::Timeout,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::AlreadyActive(_) => ErrorKind::Validation,
            SessionError::Io(_) | SessionError::Ipc(_) => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
