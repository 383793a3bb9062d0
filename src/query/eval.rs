//! In-memory interpreter for compiled expressions
//!
//! Executes an `Expr` against JSON documents using the shared value order.
//! The reference store runs whole programs through it, and the live-query
//! arms use it to project documents announced on the change bus.

use serde_json::{Map, Number, Value};

use super::binder::QParams;
use super::errors::{QueryError, QueryResult};
use super::expr::{Const, Expr, Source, CURRENT};
use super::value_order::{compare, elements, equals, length, to_sortable_string, truthy};

/// Read access to other collections, used to resolve joins in memory
pub trait JoinSource: Send + Sync {
    /// Every document of `collection`
    fn documents(&self, collection: &str) -> Vec<Value>;

    /// Documents of `collection` whose `field` equals one of `keys`
    fn find(&self, collection: &str, field: &str, keys: &[Value]) -> Vec<Value> {
        self.documents(collection)
            .into_iter()
            .filter(|doc| {
                let value = doc.get(field).unwrap_or(&Value::Null);
                keys.iter().any(|k| equals(value, k))
            })
            .collect()
    }
}

/// Join source with no collections; every join is empty
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJoins;

impl JoinSource for NoJoins {
    fn documents(&self, _collection: &str) -> Vec<Value> {
        Vec::new()
    }
}

/// Variable bindings, innermost last
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<(String, Value)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(name: impl Into<String>, value: Value) -> Self {
        Self {
            vars: vec![(name.into(), value)],
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.vars.push((name.into(), value));
    }

    pub fn pop(&mut self) {
        self.vars.pop();
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

pub struct Evaluator<'a> {
    params: &'a QParams,
    joins: &'a dyn JoinSource,
}

impl<'a> Evaluator<'a> {
    pub fn new(params: &'a QParams, joins: &'a dyn JoinSource) -> Self {
        Self { params, joins }
    }

    /// Evaluates `expr` and reports whether the result is truthy.
    pub fn test(&self, expr: &Expr, scope: &mut Scope) -> QueryResult<bool> {
        Ok(truthy(&self.eval(expr, scope)?))
    }

    pub fn eval(&self, expr: &Expr, scope: &mut Scope) -> QueryResult<Value> {
        Ok(match expr {
            Expr::Var(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| QueryError::Internal(format!("Unbound variable '{}'", name)))?,
            Expr::Field(base, name) => match self.eval(base, scope)? {
                Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Expr::Index(base, i) => match self.eval(base, scope)? {
                Value::Array(mut items) if *i < items.len() => items.swap_remove(*i),
                _ => Value::Null,
            },
            Expr::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| QueryError::Internal(format!("Unbound parameter '@{}'", name)))?,
            Expr::Const(c) => match c {
                Const::Null => Value::Null,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(n) => Value::Number(Number::from(*n)),
            },
            Expr::Compare(l, op, r) => {
                let l = self.eval(l, scope)?;
                let r = self.eval(r, scope)?;
                Value::Bool(op.holds(compare(&l, &r)))
            }
            Expr::In(l, r) => {
                let l = self.eval(l, scope)?;
                let r = self.eval(r, scope)?;
                Value::Bool(elements(&r).iter().any(|item| equals(&l, item)))
            }
            Expr::And(items) => {
                for item in items {
                    if !self.test(item, scope)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Expr::Or(items) => {
                for item in items {
                    if self.test(item, scope)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Expr::Not(e) => Value::Bool(!self.test(e, scope)?),
            Expr::ToString(e) => Value::String(to_sortable_string(&self.eval(e, scope)?)),
            Expr::Length(e) => Value::Number(Number::from(length(&self.eval(e, scope)?) as u64)),
            Expr::Expand { base, path } => {
                let base = self.eval(base, scope)?;
                let items = elements(&base)
                    .iter()
                    .map(|item| {
                        path.iter().fold(item.clone(), |v, name| match v {
                            Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
                            _ => Value::Null,
                        })
                    })
                    .collect();
                Value::Array(items)
            }
            Expr::InlineFilter { base, cond } => {
                let base = self.eval(base, scope)?;
                let mut out = Vec::new();
                for item in elements(&base) {
                    scope.push(CURRENT, item.clone());
                    let keep = self.test(cond, scope);
                    scope.pop();
                    if keep? {
                        out.push(item.clone());
                    }
                }
                Value::Array(out)
            }
            Expr::Subquery(q) => {
                let items = match &q.source {
                    Source::Collection(name) => self.joins.documents(name),
                    Source::Expr(e) => elements(&self.eval(e, scope)?).to_vec(),
                };
                let mut out = Vec::new();
                for item in items {
                    if q.limit.map_or(false, |limit| out.len() >= limit) {
                        break;
                    }
                    scope.push(q.var.clone(), item);
                    let row = self.subquery_row(q.filter.as_ref(), &q.ret, scope);
                    scope.pop();
                    if let Some(row) = row? {
                        out.push(row);
                    }
                }
                Value::Array(out)
            }
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (name, value) in fields {
                    map.insert(name.clone(), self.eval(value, scope)?);
                }
                Value::Object(map)
            }
            Expr::Guard(cond, value) => {
                let c = self.eval(cond, scope)?;
                if truthy(&c) {
                    self.eval(value, scope)?
                } else {
                    c
                }
            }
        })
    }

    fn subquery_row(
        &self,
        filter: Option<&Expr>,
        ret: &Expr,
        scope: &mut Scope,
    ) -> QueryResult<Option<Value>> {
        if let Some(filter) = filter {
            if !self.test(filter, scope)? {
                return Ok(None);
            }
        }
        self.eval(ret, scope).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{CmpOp, Subquery, DOC};
    use serde_json::json;

    struct Fixture(Vec<Value>);

    impl JoinSource for Fixture {
        fn documents(&self, collection: &str) -> Vec<Value> {
            if collection == "messages" {
                self.0.clone()
            } else {
                Vec::new()
            }
        }
    }

    fn doc_field(name: &str) -> Expr {
        Expr::field(Expr::var(DOC), name)
    }

    #[test]
    fn test_compare_with_params() {
        let mut params = QParams::new();
        let v = params.add(json!(1));
        let e = Expr::compare(doc_field("acc_type"), CmpOp::Eq, Expr::param(v));
        let eval = Evaluator::new(&params, &NoJoins);

        let mut hit = Scope::with(DOC, json!({ "acc_type": 1 }));
        let mut miss = Scope::with(DOC, json!({ "acc_type": 2 }));
        let mut missing = Scope::with(DOC, json!({}));
        assert!(eval.test(&e, &mut hit).unwrap());
        assert!(!eval.test(&e, &mut miss).unwrap());
        assert!(!eval.test(&e, &mut missing).unwrap());
    }

    #[test]
    fn test_inline_filter_and_expand() {
        let mut params = QParams::new();
        let v = params.add(json!("X"));
        let eval = Evaluator::new(&params, &NoJoins);
        let doc = json!({ "out": [{ "dst": "X" }, { "dst": "Y" }, { "dst": "X" }] });

        let filtered = Expr::length(Expr::inline_filter(
            doc_field("out"),
            Expr::compare(
                Expr::field(Expr::var(CURRENT), "dst"),
                CmpOp::Eq,
                Expr::param(v.clone()),
            ),
        ));
        assert_eq!(eval.eval(&filtered, &mut Scope::with(DOC, doc.clone())).unwrap(), json!(2));

        let member = Expr::is_in(
            Expr::param(v),
            Expr::expand(doc_field("out"), vec!["dst".into()]),
        );
        assert!(eval.test(&member, &mut Scope::with(DOC, doc)).unwrap());
        assert!(!eval
            .test(&member, &mut Scope::with(DOC, json!({ "out": "X" })))
            .unwrap());
    }

    #[test]
    fn test_subquery_over_join_source() {
        let params = QParams::new();
        let joins = Fixture(vec![
            json!({ "_key": "m1", "value": 5 }),
            json!({ "_key": "m2", "value": 7 }),
        ]);
        let eval = Evaluator::new(&params, &joins);
        let q = Expr::Index(
            Box::new(Expr::subquery(Subquery {
                var: "j1".into(),
                source: Source::Collection("messages".into()),
                filter: Some(Expr::compare(
                    Expr::field(Expr::var("j1"), "_key"),
                    CmpOp::Eq,
                    doc_field("in_msg"),
                )),
                limit: Some(1),
                ret: Expr::field(Expr::var("j1"), "value"),
            })),
            0,
        );
        let mut scope = Scope::with(DOC, json!({ "in_msg": "m2" }));
        assert_eq!(eval.eval(&q, &mut scope).unwrap(), json!(7));
        let mut scope = Scope::with(DOC, json!({ "in_msg": "m9" }));
        assert_eq!(eval.eval(&q, &mut scope).unwrap(), Value::Null);
    }

    #[test]
    fn test_guard_and_to_string() {
        let params = QParams::new();
        let eval = Evaluator::new(&params, &NoJoins);
        let g = Expr::guard(doc_field("meta"), Expr::field(doc_field("meta"), "code"));
        assert_eq!(
            eval.eval(&g, &mut Scope::with(DOC, json!({ "meta": { "code": 3 } }))).unwrap(),
            json!(3)
        );
        assert_eq!(eval.eval(&g, &mut Scope::with(DOC, json!({}))).unwrap(), Value::Null);

        let s = Expr::ToString(Box::new(doc_field("_key")));
        assert_eq!(
            eval.eval(&s, &mut Scope::with(DOC, json!({ "_key": 12 }))).unwrap(),
            json!("12")
        );
    }

    #[test]
    fn test_unbound_variable_is_internal_error() {
        let params = QParams::new();
        let eval = Evaluator::new(&params, &NoJoins);
        let err = eval.eval(&Expr::var("nope"), &mut Scope::new()).unwrap_err();
        assert!(matches!(err, QueryError::Internal(_)));
    }

    #[test]
    fn test_default_find() {
        let joins = Fixture(vec![json!({ "_key": "a" }), json!({ "_key": "b" })]);
        let found = joins.find("messages", "_key", &[json!("b"), json!("c")]);
        assert_eq!(found, vec![json!({ "_key": "b" })]);
    }
}
