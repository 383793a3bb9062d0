//! Query error types
//!
//! Schema and invariant violations are request failures raised while
//! compiling; they never touch shared state. Store failures surface from
//! execution. Timeouts and cancellations are not errors at all.

use thiserror::Error;

use crate::schema::{BigUIntError, SchemaError};
use crate::store::StoreError;

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Filter or selection references something the schema does not declare
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Schema shape that cannot be compiled (join inside array element, ...)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Operand cannot be converted to the field's stored form
    #[error("Invalid value: {0}")]
    InvalidValue(#[from] BigUIntError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Caller is not allowed to read this collection
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn schema_violation(message: impl Into<String>) -> Self {
        QueryError::SchemaViolation(message.into())
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        QueryError::InvariantViolation(message.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::SchemaViolation(_) | QueryError::InvalidValue(_) => {
                "QINDEX_SCHEMA_VIOLATION"
            }
            QueryError::InvariantViolation(_) => "QINDEX_INVARIANT_VIOLATION",
            QueryError::Schema(e) => e.code(),
            QueryError::Store(e) => e.code(),
            QueryError::AccessDenied(_) => "QINDEX_ACCESS_DENIED",
            QueryError::Internal(_) => "QINDEX_INTERNAL",
        }
    }

    /// Whether the failure is caused by the request itself rather than by
    /// the service or its store
    pub fn is_request_failure(&self) -> bool {
        !matches!(self, QueryError::Store(_) | QueryError::Internal(_))
    }
}
