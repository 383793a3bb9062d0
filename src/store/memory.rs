//! In-memory document store
//!
//! Collections are vectors of JSON documents keyed by `_key`. Programs are
//! interpreted with the expression evaluator, so a condition selects exactly
//! the documents the in-memory predicate accepts.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Number, Value};

use crate::query::value_order::compare;
use crate::query::{
    AggregateSpec, AggregationFn, Direction, Evaluator, Expr, JoinSource, QParams, QueryProgram,
    Scope, SortKey, DOC,
};
use crate::schema::KEY_FIELD;

use super::errors::{StoreError, StoreResult};
use super::{DocumentStore, IndexInfo, StoreQuery};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    indexes: RwLock<HashMap<String, Vec<IndexInfo>>>,
    /// Programs executed so far
    queries: AtomicU64,
    /// Error returned by every query while set
    failure: RwLock<Option<StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty collection; existing documents are kept.
    pub fn create_collection(&self, name: &str) {
        if let Ok(mut collections) = self.collections.write() {
            collections.entry(name.to_string()).or_default();
        }
    }

    /// Inserts or replaces a document by `_key`.
    pub fn insert(&self, collection: &str, doc: Value) {
        if let Ok(mut collections) = self.collections.write() {
            let docs = collections.entry(collection.to_string()).or_default();
            let key = doc.get(KEY_FIELD).cloned();
            match key.and_then(|k| docs.iter().position(|d| d.get(KEY_FIELD) == Some(&k))) {
                Some(i) => docs[i] = doc,
                None => docs.push(doc),
            }
        }
    }

    pub fn set_indexes(&self, collection: &str, indexes: Vec<IndexInfo>) {
        if let Ok(mut all) = self.indexes.write() {
            all.insert(collection.to_string(), indexes);
        }
    }

    /// Makes every following query fail with `error` (`None` restores).
    pub fn fail_with(&self, error: Option<StoreError>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = error;
        }
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(AtomicOrdering::Relaxed)
    }

    fn snapshot(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Unavailable("Lock poisoned".into()))?;
        collections
            .get(collection)
            .cloned()
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn filter(
        &self,
        eval: &Evaluator<'_>,
        docs: Vec<Value>,
        condition: &Expr,
    ) -> StoreResult<Vec<Value>> {
        let mut out = Vec::new();
        for doc in docs {
            let mut scope = Scope::with(DOC, doc);
            if eval.test(condition, &mut scope).map_err(rejected)? {
                if let Some(doc) = scope.get(DOC).cloned() {
                    out.push(doc);
                }
            }
        }
        Ok(out)
    }

    fn select(
        &self,
        params: &QParams,
        docs: Vec<Value>,
        condition: &Expr,
        sort: &[SortKey],
        limit: usize,
        projection: &Expr,
    ) -> StoreResult<Vec<Value>> {
        let eval = Evaluator::new(params, self);
        let matched = self.filter(&eval, docs, condition)?;

        let mut keyed = Vec::with_capacity(matched.len());
        for doc in matched {
            let mut scope = Scope::with(DOC, doc);
            let keys = sort
                .iter()
                .map(|k| eval.eval(&k.expr, &mut scope))
                .collect::<Result<Vec<_>, _>>()
                .map_err(rejected)?;
            keyed.push((keys, scope));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), key) in a.iter().zip(b).zip(sort) {
                let ord = match key.direction {
                    Direction::Asc => compare(x, y),
                    Direction::Desc => compare(y, x),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        keyed
            .into_iter()
            .take(limit)
            .map(|(_, mut scope)| eval.eval(projection, &mut scope).map_err(rejected))
            .collect()
    }

    fn aggregate(
        &self,
        params: &QParams,
        docs: Vec<Value>,
        condition: &Expr,
        aggregates: &[AggregateSpec],
    ) -> StoreResult<Vec<Value>> {
        let eval = Evaluator::new(params, self);
        let matched = self.filter(&eval, docs, condition)?;

        let mut results = Vec::with_capacity(aggregates.len());
        for spec in aggregates {
            let values = match &spec.expr {
                Some(expr) => {
                    let mut values = Vec::with_capacity(matched.len());
                    for doc in &matched {
                        let value = eval
                            .eval(expr, &mut Scope::with(DOC, doc.clone()))
                            .map_err(rejected)?;
                        if !value.is_null() {
                            values.push(value);
                        }
                    }
                    values
                }
                None => Vec::new(),
            };
            results.push(match spec.func {
                AggregationFn::Count => Value::from(matched.len() as u64),
                AggregationFn::Min => values.into_iter().min_by(compare).unwrap_or(Value::Null),
                AggregationFn::Max => values.into_iter().max_by(compare).unwrap_or(Value::Null),
                AggregationFn::Sum => sum(&values),
                AggregationFn::Average => {
                    let n = values.iter().filter(|v| v.is_number()).count();
                    if n == 0 {
                        Value::Null
                    } else {
                        let total: f64 = values.iter().filter_map(Value::as_f64).sum();
                        Number::from_f64(total / n as f64).map_or(Value::Null, Value::Number)
                    }
                }
            });
        }
        Ok(vec![Value::Array(results)])
    }
}

fn rejected(e: crate::query::QueryError) -> StoreError {
    StoreError::Rejected(e.to_string())
}

/// Integer sum when every operand is an integer, float sum otherwise.
fn sum(values: &[Value]) -> Value {
    let numbers: Vec<&Number> = values
        .iter()
        .filter_map(|v| match v {
            Value::Number(n) => Some(n),
            _ => None,
        })
        .collect();
    let ints: Option<i64> = numbers
        .iter()
        .try_fold(0i64, |acc, n| n.as_i64().and_then(|i| acc.checked_add(i)));
    match ints {
        Some(total) => Value::from(total),
        None => {
            let total: f64 = numbers.iter().filter_map(|n| n.as_f64()).sum();
            Number::from_f64(total).map_or(Value::Null, Value::Number)
        }
    }
}

impl JoinSource for MemoryStore {
    fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .ok()
            .and_then(|c| c.get(collection).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: &StoreQuery<'_>) -> StoreResult<Vec<Value>> {
        self.queries.fetch_add(1, AtomicOrdering::Relaxed);
        if let Some(error) = self
            .failure
            .read()
            .map_err(|_| StoreError::Unavailable("Lock poisoned".into()))?
            .clone()
        {
            return Err(error);
        }

        let docs = self.snapshot(query.program.collection())?;
        match query.program {
            QueryProgram::Select {
                condition,
                sort,
                limit,
                projection,
                ..
            } => self.select(query.params, docs, condition, sort, *limit, projection),
            QueryProgram::Aggregate {
                condition,
                aggregates,
                ..
            } => self.aggregate(query.params, docs, condition, aggregates),
        }
    }

    async fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexInfo>> {
        let all = self
            .indexes
            .read()
            .map_err(|_| StoreError::Unavailable("Lock poisoned".into()))?;
        Ok(all.get(collection).cloned().unwrap_or_default())
    }
}
