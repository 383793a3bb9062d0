//! Schema table of field-type combinators
//!
//! The schema is a static arena of `QType` nodes built once at start-up,
//! either programmatically through `SchemaBuilder` or from JSON declarations
//! through `SchemaLoader`. Query compilation, projection and in-memory
//! predicate evaluation all dispatch on these nodes.

pub mod biguint;
mod builder;
mod errors;
mod loader;
mod types;

pub use biguint::{BigUIntError, BigUIntFormat, BigUIntResult};
pub use builder::SchemaBuilder;
pub use errors::{SchemaError, SchemaResult};
pub use loader::{FieldDecl, SchemaDecl, SchemaLoader, StructDecl, TypeDecl};
pub use types::{
    EnumNameType, FieldDef, JoinType, QType, SchemaTable, StringCompanionType, StructType,
    TypeId, ID_FIELD, KEY_FIELD,
};
