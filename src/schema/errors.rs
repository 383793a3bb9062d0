//! Schema error types
//!
//! Schema errors are raised while the schema table is being built at
//! start-up, and when a request names a collection the table does not know.

use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Schema construction and lookup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A handle was declared but never given a definition
    #[error("Type '{0}' was declared but never defined")]
    Undefined(String),

    /// A handle was defined twice
    #[error("Type '{0}' is already defined")]
    AlreadyDefined(String),

    /// A declaration references a type name that does not exist
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    /// Two collections share a name
    #[error("Duplicate collection '{0}'")]
    DuplicateCollection(String),

    /// Collection lookup failed
    #[error("Unknown collection '{0}'")]
    UnknownCollection(String),

    /// A struct declares the same field twice
    #[error("Duplicate field '{field}' in type '{owner}'")]
    DuplicateField { owner: String, field: String },

    /// Join points at something other than a collection root
    #[error("Join field '{field}' targets '{target}', which is not a collection root")]
    JoinTargetNotCollection { field: String, target: String },

    /// Companion field references a sibling that does not exist
    #[error("Companion field '{field}' references missing field '{backing}'")]
    MissingBackingField { field: String, backing: String },

    /// The same companion node is wired to two different backing fields
    #[error("Companion type is shared by fields with different backings ('{0}')")]
    SharedCompanion(String),

    /// Companions only make sense next to their backing field
    #[error("Array item of '{0}' cannot be a companion field")]
    CompanionInArray(String),

    /// Declaration document could not be parsed
    #[error("Invalid schema declaration: {0}")]
    InvalidDeclaration(String),
}

impl SchemaError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::UnknownCollection(_) => "QINDEX_UNKNOWN_COLLECTION",
            SchemaError::InvalidDeclaration(_) => "QINDEX_SCHEMA_DECLARATION",
            _ => "QINDEX_SCHEMA_INVALID",
        }
    }
}
