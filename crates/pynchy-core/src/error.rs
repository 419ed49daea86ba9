use thiserror::Error;

/// Error-kind taxonomy from the error handling design (§7). These are the
/// coarse kinds every crate's own error enum maps onto via `.kind()`; the
/// taxonomy itself is what a caller branches on (e.g. the router treats
/// `ContainerDied` as "retry", the gateway maps `PolicyDenied` to HTTP 403).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Unauthorized,
    Timeout,
    BackendUnavailable,
    ContainerDied,
    GitConflict,
    PolicyDenied,
    ApprovalNeeded,
    ApprovalTimeout,
    ParseError,
    InternalError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::ContainerDied => "CONTAINER_DIED",
            ErrorKind::GitConflict => "GIT_CONFLICT",
            ErrorKind::PolicyDenied => "POLICY_DENIED",
            ErrorKind::ApprovalNeeded => "APPROVAL_NEEDED",
            ErrorKind::ApprovalTimeout => "APPROVAL_TIMEOUT",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Shared top-level error type for crates that don't need a bespoke enum.
/// Subsystem crates (`pynchy-session`, `pynchy-git`, ...) define their own
/// `thiserror` enums with a `.kind()` method returning one of the above, and
/// convert into this type at crate boundaries via `#[from]`.
#[derive(Debug, Error)]
pub enum PynchyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("container died before completing its turn")]
    ContainerDied,

    #[error("git conflict: {0}")]
    GitConflict(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("approval needed for request {request_id}")]
    ApprovalNeeded { request_id: String },

    #[error("approval timed out for request {request_id}")]
    ApprovalTimeout { request_id: String },

    #[error("failed to parse {what}: {reason}")]
    ParseError { what: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PynchyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PynchyError::NotFound(_) => ErrorKind::NotFound,
            PynchyError::Validation(_) => ErrorKind::Validation,
            PynchyError::Unauthorized(_) => ErrorKind::Unauthorized,
            PynchyError::Timeout { .. } => ErrorKind::Timeout,
            PynchyError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            PynchyError::ContainerDied => ErrorKind::ContainerDied,
            PynchyError::GitConflict(_) => ErrorKind::GitConflict,
            PynchyError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            PynchyError::ApprovalNeeded { .. } => ErrorKind::ApprovalNeeded,
            PynchyError::ApprovalTimeout { .. } => ErrorKind::ApprovalTimeout,
            PynchyError::ParseError { .. } => ErrorKind::ParseError,
            PynchyError::Config(_) | PynchyError::Database(_) | PynchyError::Io(_) => {
                ErrorKind::InternalError
            }
            PynchyError::Serialization(_) => ErrorKind::ParseError,
            PynchyError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

pub type Result<T> = std::result::Result<T, PynchyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_died_maps_to_container_died_kind() {
        assert_eq!(PynchyError::ContainerDied.kind(), ErrorKind::ContainerDied);
        assert_eq!(PynchyError::ContainerDied.code(), "CONTAINER_DIED");
    }

    #[test]
    fn parse_errors_from_serde_map_to_parse_error_kind() {
        let err: PynchyError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }
}
