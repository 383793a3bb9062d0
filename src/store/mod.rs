//! # Document store connections
//!
//! The query layer talks to the backing store through `DocumentStore`: a
//! compiled program with its text and bound parameters goes in, rows come
//! out. A collection holds two connections, one for index-backed ("fast")
//! queries and one for full scans, plus index introspection on the fast one.
//!
//! `MemoryStore` interprets programs directly and backs tests and the
//! command line tool.

mod errors;
mod memory;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{QParams, QueryProgram};

/// One program sent to a store connection
#[derive(Debug, Clone, Copy)]
pub struct StoreQuery<'a> {
    pub text: &'a str,
    pub params: &'a QParams,
    pub program: &'a QueryProgram,
}

/// An index as reported by the store: its fields in index order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexInfo {
    pub fields: Vec<String>,
}

impl IndexInfo {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Canonical form used to compare index sets
    pub fn signature(&self) -> String {
        self.fields.join(",")
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Executes a program and returns its rows.
    async fn query(&self, query: &StoreQuery<'_>) -> StoreResult<Vec<Value>>;

    /// Indexes currently defined on `collection`.
    async fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexInfo>>;
}
