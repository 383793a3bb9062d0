//! Store connection errors
//!
//! A store failure is fatal to the request that triggered it and is never
//! retried by the query layer.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a document-store connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store refused the query
    #[error("Store rejected query: {0}")]
    Rejected(String),

    /// The store did not answer in time
    #[error("Store query timed out after {0} ms")]
    Timeout(u64),

    /// The connection is not usable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The program references a collection the store does not have
    #[error("Unknown collection '{0}'")]
    UnknownCollection(String),
}

impl StoreError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Timeout(_) => "QINDEX_STORE_TIMEOUT",
            _ => "QINDEX_STORE_FAILURE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(StoreError::Timeout(10).code(), "QINDEX_STORE_TIMEOUT");
        assert_eq!(
            StoreError::Rejected("syntax".into()).code(),
            "QINDEX_STORE_FAILURE"
        );
    }

    #[test]
    fn test_display() {
        let err = StoreError::UnknownCollection("blocks".into());
        assert_eq!(err.to_string(), "Unknown collection 'blocks'");
    }
}
