//! # Access control
//!
//! Resolves the caller's read rights from an access key and turns them into
//! document-level restrictions, both as a compiled query condition and as an
//! in-memory check for documents pushed to live queries.

mod access;

pub use access::{AccessPolicy, AccessRights, Authorizer, StaticAuthorizer};
