//! Fast/slow detection
//!
//! The detector decides whether a single (query, sort) pair can be answered
//! from an index. It is consulted only on cache misses.

use std::collections::HashSet;

use serde_json::Value;

use crate::schema::{ID_FIELD, KEY_FIELD};
use crate::store::IndexInfo;

/// Everything a detector may look at
#[derive(Debug, Clone, Copy)]
pub struct DetectorInput<'a> {
    pub collection: &'a str,
    pub text: &'a str,
    pub filter: &'a Value,
    /// Stored paths of the sort keys, in order
    pub sort_fields: &'a [String],
    pub indexes: &'a [IndexInfo],
}

pub trait SlowDetector: Send + Sync {
    fn is_fast(&self, input: &DetectorInput<'_>) -> bool;
}

/// Treats a query as fast when every OR alternative of the filter touches
/// the leading field of some index and the first sort key leads an index.
/// An empty filter without sort is a full scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedFieldsDetector;

impl IndexedFieldsDetector {
    fn alternatives(filter: &Value) -> Vec<HashSet<String>> {
        let mut out = Vec::new();
        let mut current = Some(filter);
        while let Some(Value::Object(map)) = current {
            let fields: HashSet<String> = map
                .keys()
                .filter(|k| k.as_str() != "OR")
                .map(|k| {
                    if k == ID_FIELD {
                        KEY_FIELD.to_string()
                    } else {
                        k.clone()
                    }
                })
                .collect();
            out.push(fields);
            current = map.get("OR");
        }
        out
    }
}

impl SlowDetector for IndexedFieldsDetector {
    fn is_fast(&self, input: &DetectorInput<'_>) -> bool {
        let leading: HashSet<&str> = input
            .indexes
            .iter()
            .filter_map(|i| i.fields.first().map(String::as_str))
            .chain(std::iter::once(KEY_FIELD))
            .collect();

        if let Some(first) = input.sort_fields.first() {
            if !leading.contains(first.as_str()) {
                return false;
            }
        }

        let alternatives = Self::alternatives(input.filter);
        let filtered = alternatives.iter().any(|fields| !fields.is_empty());
        if !filtered {
            return !input.sort_fields.is_empty();
        }
        alternatives
            .iter()
            .all(|fields| fields.iter().any(|f| leading.contains(f.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast(filter: Value, sort: &[&str]) -> bool {
        let indexes = vec![IndexInfo::new(["acc_type", "balance"]), IndexInfo::new(["last_paid"])];
        let sort: Vec<String> = sort.iter().map(|s| s.to_string()).collect();
        IndexedFieldsDetector.is_fast(&DetectorInput {
            collection: "accounts",
            text: "",
            filter: &filter,
            sort_fields: &sort,
            indexes: &indexes,
        })
    }

    #[test]
    fn test_indexed_filter_is_fast() {
        assert!(fast(json!({ "acc_type": { "eq": 1 } }), &[]));
        assert!(fast(json!({ "id": { "eq": "a" } }), &[]));
        assert!(fast(json!({ "acc_type": { "eq": 1 }, "code": { "eq": 2 } }), &["last_paid"]));
    }

    #[test]
    fn test_unindexed_shapes_are_slow() {
        assert!(!fast(json!({ "balance": { "gt": 1 } }), &[]));
        assert!(!fast(json!({}), &[]));
        assert!(!fast(json!({ "acc_type": { "eq": 1 } }), &["balance"]));
        assert!(!fast(
            json!({ "acc_type": { "eq": 1 }, "OR": { "code": { "eq": 2 } } }),
            &[]
        ));
    }

    #[test]
    fn test_sort_only_uses_index() {
        assert!(fast(Value::Null, &["last_paid"]));
    }
}
