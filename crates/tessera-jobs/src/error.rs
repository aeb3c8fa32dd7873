//! Scheduler error types.

use std::fmt;
use tessera_core::{ErrorResponse, IdError, TesseraError};
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Which entity a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No queue was ever registered for the tenant.
    Tenant,
    /// The tenant exists but the queue does not.
    Queue,
    /// The queue exists but the job does not.
    Job,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tenant => write!(f, "Tenant"),
            Self::Queue => write!(f, "Scheduler"),
            Self::Job => write!(f, "Job"),
        }
    }
}

/// Every scheduler operation fails with exactly one of these.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Tenant, queue or job is absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },

    /// Queue key is already registered (or being registered).
    #[error("Scheduler already exists: {0}")]
    AlreadyExists(String),

    /// Schedule spec is malformed: both or neither of run time and cron,
    /// an unparsable cron expression, or a run time in the past.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Malformed tenant id, queue name or job name.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient failure talking to the engine or the catalog.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// An operation was partially applied and rolled back as far as possible.
    #[error("Engine inconsistent: {0}")]
    EngineInconsistent(String),
}

impl SchedulerError {
    /// Creates a not-found error.
    pub fn not_found(kind: NotFoundKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// HTTP status code the routing layer should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists(_) => 409,
            Self::InvalidSchedule(_) | Self::InvalidArgument(_) => 400,
            Self::EngineUnavailable(_) => 503,
            Self::EngineInconsistent(_) => 500,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { kind, .. } => match kind {
                NotFoundKind::Tenant => "TENANT_NOT_FOUND",
                NotFoundKind::Queue => "SCHEDULER_NOT_FOUND",
                NotFoundKind::Job => "JOB_NOT_FOUND",
            },
            Self::AlreadyExists(_) => "SCHEDULER_EXISTS",
            Self::InvalidSchedule(_) => "INVALID_SCHEDULE",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            Self::EngineInconsistent(_) => "ENGINE_INCONSISTENT",
        }
    }

    /// Returns true if the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_) | Self::EngineInconsistent(_))
    }
}

impl From<IdError> for SchedulerError {
    fn from(err: IdError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<redis::RedisError> for SchedulerError {
    fn from(err: redis::RedisError) -> Self {
        Self::EngineUnavailable(format!("Redis error: {}", err))
    }
}

impl From<deadpool_redis::PoolError> for SchedulerError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::EngineUnavailable(format!("Redis pool error: {}", err))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::EngineUnavailable(format!("Corrupt job record: {}", err))
    }
}

impl From<SchedulerError> for TesseraError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::EngineUnavailable(message) => TesseraError::external("engine", message),
            SchedulerError::EngineInconsistent(message) => TesseraError::internal(message),
            other => TesseraError::Validation(other.to_string()),
        }
    }
}

impl From<&SchedulerError> for ErrorResponse {
    fn from(err: &SchedulerError) -> Self {
        ErrorResponse::new(err.error_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        let err = SchedulerError::not_found(NotFoundKind::Tenant, "t1");
        assert_eq!(err.to_string(), "Tenant not found: t1");
        let err = SchedulerError::not_found(NotFoundKind::Queue, "t1:alpha");
        assert_eq!(err.to_string(), "Scheduler not found: t1:alpha");
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.error_code(), "SCHEDULER_NOT_FOUND");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(SchedulerError::AlreadyExists("t:q".into()).status_code(), 409);
        assert_eq!(SchedulerError::InvalidSchedule("x".into()).status_code(), 400);
        assert_eq!(SchedulerError::InvalidArgument("x".into()).status_code(), 400);
        assert_eq!(SchedulerError::EngineUnavailable("x".into()).status_code(), 503);
        assert_eq!(SchedulerError::EngineInconsistent("x".into()).status_code(), 500);
    }

    #[test]
    fn test_only_engine_errors_are_retryable() {
        assert!(SchedulerError::EngineUnavailable("down".into()).is_retryable());
        assert!(SchedulerError::EngineInconsistent("half".into()).is_retryable());
        assert!(!SchedulerError::AlreadyExists("t:q".into()).is_retryable());
        assert!(!SchedulerError::not_found(NotFoundKind::Job, "7").is_retryable());
        assert!(!SchedulerError::InvalidSchedule("bad cron".into()).is_retryable());
    }

    #[test]
    fn test_from_id_error() {
        let id_err = tessera_core::TenantId::parse("").unwrap_err();
        let err = SchedulerError::from(id_err);
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_serde_error_is_engine_unavailable() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SchedulerError::from(json_err);
        assert!(matches!(err, SchedulerError::EngineUnavailable(_)));
    }

    #[test]
    fn test_into_tessera_error() {
        let err: TesseraError = SchedulerError::EngineUnavailable("redis down".into()).into();
        assert!(err.is_retriable());
        let err: TesseraError = SchedulerError::AlreadyExists("t:q".into()).into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_error_response() {
        let err = SchedulerError::not_found(NotFoundKind::Job, "12");
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "JOB_NOT_FOUND");
        assert_eq!(response.message, "Job not found: 12");
    }
}
