//! Live-query adapters binding a compiled query to a collection

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::query::{CompiledQuery, QueryResult};
use crate::realtime::{LiveMatcher, PollSource};

use super::manager::CollectionInner;

/// Poll arm: executes the compiled query on its routed connection
pub(crate) struct QueryPoll {
    pub(crate) inner: Arc<CollectionInner>,
    pub(crate) query: Arc<CompiledQuery>,
    pub(crate) fast: bool,
}

#[async_trait]
impl PollSource for QueryPoll {
    async fn poll(&self) -> QueryResult<Vec<Value>> {
        self.inner.run_select(&self.query, self.fast).await
    }
}

/// Listener arm and subscriptions: access check, filter, then projection
pub(crate) struct QueryMatcher {
    pub(crate) inner: Arc<CollectionInner>,
    pub(crate) query: Arc<CompiledQuery>,
}

impl LiveMatcher for QueryMatcher {
    fn evaluate(&self, doc: &Value) -> QueryResult<Option<Value>> {
        let inner = &self.inner;
        if !inner.policy.allows(&self.query.access, doc) {
            return Ok(None);
        }
        let schema = inner.builder.schema();
        if !self.query.matches(schema, inner.joins.as_ref(), doc)? {
            return Ok(None);
        }
        self.query
            .project(schema, inner.joins.as_ref(), doc.clone())
            .map(Some)
    }
}
