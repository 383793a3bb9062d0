//! In-memory filter evaluation
//!
//! Mirrors `FilterCompiler` field for field and operator for operator, but
//! tests a stored document directly instead of emitting query text. Used by
//! the live-query listener arm and by subscriptions, where a store
//! round-trip per announced document is not an option.

use serde_json::Value;

use crate::schema::{biguint, JoinType, QType, SchemaTable, TypeId, KEY_FIELD};

use super::errors::{QueryError, QueryResult};
use super::eval::JoinSource;
use super::filter::{
    alternatives_of, array_ops, child_path, enum_value, field_filters, in_operands, scalar_ops,
    Quantifier, ScalarOp,
};
use super::value_order::{compare, elements, equals, to_sortable_string};

/// Evaluates filters against stored documents.
pub struct Predicate<'a> {
    schema: &'a SchemaTable,
    joins: &'a dyn JoinSource,
}

impl<'a> Predicate<'a> {
    pub fn new(schema: &'a SchemaTable, joins: &'a dyn JoinSource) -> Self {
        Self { schema, joins }
    }

    /// Whether `doc` (a document of the collection rooted at `root`)
    /// satisfies `filter`.
    pub fn test(&self, root: TypeId, doc: &Value, filter: &Value) -> QueryResult<bool> {
        if filter.is_null() {
            return Ok(true);
        }
        self.test_struct(root, doc, filter, "", false)
    }

    fn test_struct(
        &self,
        id: TypeId,
        value: &Value,
        filter: &Value,
        path: &str,
        in_array: bool,
    ) -> QueryResult<bool> {
        let fields = self
            .schema
            .struct_type(id)
            .ok_or_else(|| QueryError::invariant_violation(format!("'{}' is not a struct", path)))?;

        // Later alternatives are still validated after a match.
        let mut any_alternative = false;
        let mut any_matched = false;
        for alternative in alternatives_of(filter, path)? {
            let mut nonempty = false;
            let mut matched = true;
            for (name, sub) in field_filters(alternative) {
                nonempty = true;
                let field = fields.field(name).ok_or_else(|| {
                    QueryError::schema_violation(format!(
                        "Unknown field '{}' in filter",
                        child_path(path, name)
                    ))
                })?;
                // Every field is still validated after a mismatch so errors
                // surface exactly as they do when compiling.
                if !self.test_field(
                    field.ty,
                    value,
                    Some(&field.stored),
                    sub,
                    &child_path(path, name),
                    in_array,
                )? {
                    matched = false;
                }
            }
            if nonempty {
                any_alternative = true;
                any_matched |= matched;
            }
        }
        Ok(any_matched || !any_alternative)
    }

    /// `stored` is the attribute of `parent` holding the value, or `None`
    /// when `parent` is itself the array element under test.
    fn test_field(
        &self,
        ty: TypeId,
        parent: &Value,
        stored: Option<&str>,
        filter: &Value,
        path: &str,
        in_array: bool,
    ) -> QueryResult<bool> {
        let value = match stored {
            Some(name) => parent.get(name).unwrap_or(&Value::Null),
            None => parent,
        };
        let is_key = stored == Some(KEY_FIELD);

        match self.schema.get(ty) {
            QType::Scalar => test_scalar(value, is_key, filter, path, |v| Ok(v.clone())),
            QType::BigUInt(prefix) => test_scalar(value, is_key, filter, path, |v| {
                Ok(Value::String(biguint::encode_value(*prefix, v)?))
            }),
            QType::Struct(_) => self.test_struct(ty, value, filter, path, in_array),
            QType::Array(item) => {
                let items = elements(value);
                let mut result = true;
                for (quantifier, sub) in array_ops(filter, path)? {
                    let item_path = format!("{}[*]", path);
                    let mut matching = 0;
                    for item_value in items {
                        if self.test_field(*item, item_value, None, sub, &item_path, true)? {
                            matching += 1;
                        }
                    }
                    // Validate the element filter even for empty arrays.
                    if items.is_empty() {
                        self.test_field(*item, &Value::Null, None, sub, &item_path, true)?;
                    }
                    let ok = match quantifier {
                        Quantifier::All => matching == items.len(),
                        Quantifier::Any => matching > 0,
                    };
                    result &= ok;
                }
                Ok(result)
            }
            QType::EnumName(e) => {
                if stored.is_none() {
                    return Err(QueryError::invariant_violation(format!(
                        "Enum name field '{}' used as an array item",
                        path
                    )));
                }
                let backing = parent.get(&e.backing).unwrap_or(&Value::Null);
                test_scalar(backing, e.backing == KEY_FIELD, filter, path, |v| {
                    enum_value(e, v, path)
                })
            }
            QType::StringCompanion(_) => Ok(false),
            QType::Join(join) => {
                self.check_join_position(stored, path, in_array)?;
                let key = parent.get(&join.on).cloned().unwrap_or(Value::Null);
                let candidates = self.candidates(join, &[key]);
                self.any_matches(join, &candidates, filter, path)
            }
            QType::JoinArray(join) => {
                self.check_join_position(stored, path, in_array)?;
                let local = parent.get(&join.on).unwrap_or(&Value::Null);
                let keys = elements(local);
                let candidates = self.candidates(join, keys);
                let mut result = true;
                for (quantifier, sub) in array_ops(filter, path)? {
                    let mut matching = 0;
                    for doc in &candidates {
                        if self.test_struct(join.target, doc, sub, path, false)? {
                            matching += 1;
                        }
                    }
                    if candidates.is_empty() {
                        self.test_struct(join.target, &Value::Null, sub, path, false)?;
                    }
                    let ok = match quantifier {
                        Quantifier::Any => matching > 0,
                        Quantifier::All => matching == keys.len(),
                    };
                    result &= ok;
                }
                Ok(result)
            }
        }
    }

    fn check_join_position(&self, stored: Option<&str>, path: &str, in_array: bool) -> QueryResult<()> {
        if stored.is_none() || in_array {
            return Err(QueryError::invariant_violation(format!(
                "Join field '{}' cannot be filtered inside an array element",
                path
            )));
        }
        Ok(())
    }

    fn candidates(&self, join: &JoinType, keys: &[Value]) -> Vec<Value> {
        if keys.is_empty() {
            return Vec::new();
        }
        self.joins.find(&join.collection, &join.ref_on, keys)
    }

    fn any_matches(
        &self,
        join: &JoinType,
        candidates: &[Value],
        filter: &Value,
        path: &str,
    ) -> QueryResult<bool> {
        let mut found = false;
        for doc in candidates {
            if self.test_struct(join.target, doc, filter, path, false)? {
                found = true;
                break;
            }
        }
        if candidates.is_empty() {
            self.test_struct(join.target, &Value::Null, filter, path, false)?;
        }
        Ok(found)
    }
}

fn test_scalar<F>(value: &Value, is_key: bool, filter: &Value, path: &str, encode: F) -> QueryResult<bool>
where
    F: Fn(&Value) -> QueryResult<Value>,
{
    let mut result = true;
    for (_, op, operand) in scalar_ops(filter, path)? {
        let ok = match op {
            ScalarOp::Cmp(cmp) => {
                let rhs = encode(operand)?;
                if is_key && cmp.is_ordered() {
                    let lhs = Value::String(to_sortable_string(value));
                    cmp.holds(compare(&lhs, &rhs))
                } else {
                    cmp.holds(compare(value, &rhs))
                }
            }
            ScalarOp::In | ScalarOp::NotIn => {
                let mut any = false;
                for item in in_operands(operand, path)? {
                    if equals(value, &encode(item)?) {
                        any = true;
                    }
                }
                if op == ScalarOp::In {
                    any
                } else {
                    !any
                }
            }
        };
        result &= ok;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::eval::NoJoins;
    use crate::schema::{FieldDef, SchemaBuilder};
    use serde_json::json;

    struct Messages(Vec<Value>);

    impl JoinSource for Messages {
        fn documents(&self, collection: &str) -> Vec<Value> {
            if collection == "messages" {
                self.0.clone()
            } else {
                Vec::new()
            }
        }
    }

    fn schema() -> (SchemaTable, TypeId) {
        let mut b = SchemaBuilder::new();
        let account = b.declare("Account").unwrap();
        let message = b.declare("Message").unwrap();
        let s = b.scalar();
        let big = b.big_uint(1);
        let tags = b.array(s);
        let name = b.enum_name("acc_type", [("Uninit", 0), ("Active", 1)]);
        let last = b.join("last_msg", "_key", message);
        let msgs = b.join_array("msg_ids", "_key", message);
        b.collection(
            "accounts",
            account,
            vec![
                FieldDef::new("acc_type", s),
                FieldDef::new("acc_type_name", name),
                FieldDef::new("balance", big),
                FieldDef::new("tags", tags),
                FieldDef::new("last_msg", s),
                FieldDef::new("last_message", last),
                FieldDef::new("msg_ids", tags),
                FieldDef::new("messages", msgs),
            ],
        )
        .unwrap();
        b.collection("messages", message, vec![FieldDef::new("value", s)])
            .unwrap();
        let table = b.build().unwrap();
        let root = table.collection_root("accounts").unwrap();
        (table, root)
    }

    #[test]
    fn test_scalar_and_enum() {
        let (table, root) = schema();
        let p = Predicate::new(&table, &NoJoins);
        let doc = json!({ "_key": "a1", "acc_type": 1 });
        assert!(p.test(root, &doc, &json!({ "acc_type": { "eq": 1 } })).unwrap());
        assert!(p.test(root, &doc, &json!({ "acc_type_name": { "eq": "Active" } })).unwrap());
        assert!(!p.test(root, &doc, &json!({ "acc_type": { "in": [2, 3] } })).unwrap());
        assert!(p.test(root, &doc, &json!({ "acc_type": { "notIn": [2, 3] } })).unwrap());
        assert!(p.test(root, &doc, &json!({ "id": { "eq": "a1" } })).unwrap());
        assert!(p.test(root, &doc, &json!({ "id": { "gt": "a" } })).unwrap());
    }

    #[test]
    fn test_big_uint_compares_encoded() {
        let (table, root) = schema();
        let p = Predicate::new(&table, &NoJoins);
        let stored = biguint::encode_value(1, &json!(300)).unwrap();
        let doc = json!({ "balance": stored });
        assert!(p.test(root, &doc, &json!({ "balance": { "gt": 255 } })).unwrap());
        assert!(!p.test(root, &doc, &json!({ "balance": { "gt": "0x1000" } })).unwrap());
    }

    #[test]
    fn test_or_and_empty() {
        let (table, root) = schema();
        let p = Predicate::new(&table, &NoJoins);
        let doc = json!({ "acc_type": 3 });
        assert!(p.test(root, &doc, &json!({})).unwrap());
        assert!(p
            .test(
                root,
                &doc,
                &json!({ "acc_type": { "eq": 1 }, "OR": { "acc_type": { "eq": 3 } } })
            )
            .unwrap());
    }

    #[test]
    fn test_arrays() {
        let (table, root) = schema();
        let p = Predicate::new(&table, &NoJoins);
        let doc = json!({ "tags": ["X", "Y"] });
        assert!(p.test(root, &doc, &json!({ "tags": { "any": { "eq": "X" } } })).unwrap());
        assert!(!p.test(root, &doc, &json!({ "tags": { "all": { "eq": "X" } } })).unwrap());
        let empty = json!({ "tags": "not-an-array" });
        assert!(p.test(root, &empty, &json!({ "tags": { "all": { "eq": "X" } } })).unwrap());
        assert!(!p.test(root, &empty, &json!({ "tags": { "any": { "eq": "X" } } })).unwrap());
    }

    #[test]
    fn test_joins() {
        let (table, root) = schema();
        let joins = Messages(vec![
            json!({ "_key": "m1", "value": 5 }),
            json!({ "_key": "m2", "value": 9 }),
        ]);
        let p = Predicate::new(&table, &joins);
        let doc = json!({ "last_msg": "m2", "msg_ids": ["m1", "m2"] });
        assert!(p
            .test(root, &doc, &json!({ "last_message": { "value": { "gt": 6 } } }))
            .unwrap());
        assert!(!p
            .test(root, &doc, &json!({ "last_message": { "value": { "lt": 6 } } }))
            .unwrap());
        assert!(p
            .test(root, &doc, &json!({ "messages": { "any": { "value": { "eq": 5 } } } }))
            .unwrap());
        assert!(p
            .test(root, &doc, &json!({ "messages": { "all": { "value": { "gt": 1 } } } }))
            .unwrap());
        assert!(!p
            .test(root, &doc, &json!({ "messages": { "all": { "value": { "gt": 6 } } } }))
            .unwrap());
    }

    #[test]
    fn test_errors_match_compiler() {
        let (table, root) = schema();
        let p = Predicate::new(&table, &NoJoins);
        let doc = json!({});
        assert_eq!(
            p.test(root, &doc, &json!({ "nope": { "eq": 1 } }))
                .unwrap_err()
                .code(),
            "QINDEX_SCHEMA_VIOLATION"
        );
        assert!(p
            .test(root, &doc, &json!({ "acc_type_name": { "eq": "Frozen" } }))
            .is_err());
        assert!(p
            .test(root, &doc, &json!({ "tags": { "any": { "bad": 1 } } }))
            .is_err());
    }

    #[test]
    fn test_matched_alternative_does_not_hide_later_errors() {
        let (table, root) = schema();
        let p = Predicate::new(&table, &NoJoins);
        let doc = json!({ "acc_type": 1 });
        let filter = json!({ "acc_type": { "eq": 1 }, "OR": { "nope": { "eq": 1 } } });
        assert_eq!(
            p.test(root, &doc, &filter).unwrap_err().code(),
            "QINDEX_SCHEMA_VIOLATION"
        );
        let filter = json!({
            "acc_type": { "eq": 1 },
            "OR": { "acc_type": { "eq": 2 }, "OR": { "acc_type_name": { "eq": "Frozen" } } }
        });
        assert!(p.test(root, &doc, &filter).is_err());
    }
}
