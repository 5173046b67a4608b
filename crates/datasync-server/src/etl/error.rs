//! Error taxonomy for the ETL orchestration core
//!
//! Every connector, store and executor failure is expressed as an [`EtlError`].
//! The `retryable` classification carried by connector errors is authoritative:
//! activity retries consult [`EtlError::is_retryable`] and nothing else.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the `etl` module
pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug, Clone)]
pub enum EtlError {
    #[error("connection error: {message}")]
    Connection { message: String, retryable: bool },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("query failed: {message}")]
    Query { message: String, retryable: bool },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("quality check error: {0}")]
    QualityCheck(String),

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("cancelled by user")]
    Cancelled,

    #[error("too many errors, aborting ({errors} errors, budget {budget})")]
    ErrorBudgetExceeded { errors: usize, budget: usize },

    #[error("workflow {0} is already running")]
    AlreadyRunning(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Serializable classification of an [`EtlError`], recorded in the error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Authentication,
    Query,
    Validation,
    QualityCheck,
    Timeout,
    Cancelled,
    ErrorBudgetExceeded,
    AlreadyRunning,
    NotFound,
    Storage,
    Unsupported,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Query => "query",
            ErrorKind::Validation => "validation",
            ErrorKind::QualityCheck => "quality_check",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ErrorBudgetExceeded => "error_budget_exceeded",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EtlError {
    /// Transient connection failure (network reset, pool exhaustion)
    pub fn connection(message: impl Into<String>) -> Self {
        EtlError::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    /// Query failure that will fail the same way if repeated
    pub fn query(message: impl Into<String>) -> Self {
        EtlError::Query {
            message: message.into(),
            retryable: false,
        }
    }

    /// Query failure caused by a transient condition (deadlock, serialization)
    pub fn transient_query(message: impl Into<String>) -> Self {
        EtlError::Query {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EtlError::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        EtlError::Storage(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::Connection { retryable, .. } | EtlError::Query { retryable, .. } => *retryable,
            EtlError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Connection { .. } => ErrorKind::Connection,
            EtlError::Authentication(_) => ErrorKind::Authentication,
            EtlError::Query { .. } => ErrorKind::Query,
            EtlError::Validation(_) => ErrorKind::Validation,
            EtlError::QualityCheck(_) => ErrorKind::QualityCheck,
            EtlError::Timeout { .. } => ErrorKind::Timeout,
            EtlError::Cancelled => ErrorKind::Cancelled,
            EtlError::ErrorBudgetExceeded { .. } => ErrorKind::ErrorBudgetExceeded,
            EtlError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            EtlError::NotFound(_) => ErrorKind::NotFound,
            EtlError::Storage(_) => ErrorKind::Storage,
            EtlError::Unsupported(_) => ErrorKind::Unsupported,
            EtlError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Store-side database failures. Connectors classify their own sqlx errors.
impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        EtlError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Storage(format!("serialization failed: {}", err))
    }
}
