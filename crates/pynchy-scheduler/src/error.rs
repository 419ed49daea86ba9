use pynchy_core::ErrorKind;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem (§4.7).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduled task not found: {id}")]
    TaskNotFound { id: String },

    #[error("invalid schedule_value {value:?} for schedule_type {schedule_type}: {reason}")]
    InvalidSchedule { schedule_type: String, value: String, reason: String },

    #[error(transparent)]
    Store(#[from] pynchy_store::StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::TaskNotFound { .. } => ErrorKind::NotFound,
            SchedulerError::InvalidSchedule { .. } => ErrorKind::Validation,
            SchedulerError::Store(e) => e.kind(),
            SchedulerError::Io(_) => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
