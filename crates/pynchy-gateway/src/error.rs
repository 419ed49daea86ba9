use pynchy_core::ErrorKind;
use thiserror::Error;

/// Errors raised by the LLM reverse proxy and MCP proxy (§4.6).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no route for path {0}")]
    NoRoute(String),

    #[error("no security gate registered for ({folder}, {invocation_ts})")]
    NoGate { folder: String, invocation_ts: String },

    #[error("tool call denied: {0}")]
    Denied(String),

    #[error("approval timed out")]
    ApprovalTimedOut,

    #[error("mcp instance {0} not found in workspace {1}")]
    InstanceNotFound(String, String),

    #[error("failed to start mcp instance {0}: {1}")]
    InstanceStartFailed(String, String),

    #[error(transparent)]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Security(#[from] pynchy_security::SecurityError),

    #[error(transparent)]
    Approval(#[from] pynchy_approval::ApprovalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthorized(_) => ErrorKind::Unauthorized,
            GatewayError::NoRoute(_) => ErrorKind::NotFound,
            GatewayError::NoGate { .. } => ErrorKind::PolicyDenied,
            GatewayError::Denied(_) => ErrorKind::PolicyDenied,
            GatewayError::ApprovalTimedOut => ErrorKind::ApprovalTimeout,
            GatewayError::InstanceNotFound(..) => ErrorKind::NotFound,
            GatewayError::InstanceStartFailed(..) => ErrorKind::BackendUnavailable,
            GatewayError::Upstream(_) => ErrorKind::BackendUnavailable,
            GatewayError::Security(e) => e.kind(),
            GatewayError::Approval(e) => e.kind(),
            GatewayError::Io(_) => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
