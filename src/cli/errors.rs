//! CLI error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::query::QueryError;
use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Invalid fixture: {0}")]
    InvalidFixture(String),

    #[error("Empty input")]
    EmptyInput,
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Io(_) | CliError::EmptyInput => "QINDEX_CLI_IO_ERROR",
            CliError::Json(_) | CliError::InvalidFixture(_) => "QINDEX_CLI_INVALID_INPUT",
            CliError::Config(e) => e.code(),
            CliError::Schema(e) => e.code(),
            CliError::Query(e) => e.code(),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_pass_through() {
        let err = CliError::from(QueryError::AccessDenied("no".into()));
        assert_eq!(err.code(), "QINDEX_ACCESS_DENIED");
        assert_eq!(CliError::EmptyInput.code(), "QINDEX_CLI_IO_ERROR");
    }
}
