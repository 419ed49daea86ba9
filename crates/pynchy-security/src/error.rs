use pynchy_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("no security gate registered for folder {folder} invocation {invocation_ts}")]
    GateNotFound { folder: String, invocation_ts: String },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("rate limit exceeded for tool {tool} ({limit}/hour)")]
    RateLimited { tool: String, limit: u32 },
}

impl SecurityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SecurityError::GateNotFound { .. } => ErrorKind::NotFound,
            SecurityError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            SecurityError::RateLimited { .. } => ErrorKind::PolicyDenied,
        }
    }
}

pub type Result<T> = std::result::Result<T, SecurityError>;
