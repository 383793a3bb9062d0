//! Parameter binder
//!
//! Collects the values bound to a generated query. Query text only ever
//! references placeholders (`@v1`, `@v2`, ...); the values travel separately.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Per-path set of operators used by a filter
pub type Explanation = BTreeMap<String, BTreeSet<String>>;

/// Ordered placeholder -> value map for one compiled query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QParams {
    values: IndexMap<String, Value>,
    counter: usize,
    explanation: Option<Explanation>,
}

impl QParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binder that also records which operators touched which paths
    pub fn explaining() -> Self {
        Self {
            explanation: Some(Explanation::new()),
            ..Self::default()
        }
    }

    /// Binds a value and returns its placeholder name (without `@`).
    pub fn add(&mut self, value: Value) -> String {
        self.counter += 1;
        let name = format!("v{}", self.counter);
        self.values.insert(name.clone(), value);
        name
    }

    /// Records an operator applied to `path`, when explaining.
    pub fn explain_op(&mut self, path: &str, op: &str) {
        if let Some(explanation) = &mut self.explanation {
            explanation
                .entry(path.to_string())
                .or_default()
                .insert(op.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn explanation(&self) -> Option<&Explanation> {
        self.explanation.as_ref()
    }

    /// Bound values as a JSON object, in binding order
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}
