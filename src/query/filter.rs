//! Filter compiler
//!
//! Turns a client filter into a condition `Expr` by walking the schema
//! table in step with the filter tree:
//!
//! - struct levels AND their fields; a top-level `OR` sibling chains
//!   alternatives that are ORed together
//! - scalar leaves take `eq ne lt le gt ge in notIn`
//! - arrays take `all` / `any` over a `CURRENT` element condition
//! - joins become correlated existence subqueries
//!
//! The parsing helpers at the bottom are shared with the predicate
//! evaluator so both sides accept exactly the same filters.

use serde_json::{Map, Value};

use crate::schema::{biguint, JoinType, QType, SchemaTable, TypeId, KEY_FIELD};

use super::binder::QParams;
use super::errors::{QueryError, QueryResult};
use super::expr::{CmpOp, Expr, Source, Subquery, CURRENT, DOC};
use super::optimizer;

/// Where a field's value lives
#[derive(Debug, Clone)]
enum Target {
    /// Attribute `stored` of the struct at `parent`
    Field { parent: Expr, stored: String },
    /// The current array element
    Element(Expr),
}

impl Target {
    fn path(&self) -> Expr {
        match self {
            Target::Field { parent, stored } => Expr::field(parent.clone(), stored.clone()),
            Target::Element(e) => e.clone(),
        }
    }

    fn is_key(&self) -> bool {
        matches!(self, Target::Field { stored, .. } if stored == KEY_FIELD)
    }
}

/// Compiles filters against one schema, binding operands into `params`.
pub struct FilterCompiler<'a> {
    schema: &'a SchemaTable,
    params: &'a mut QParams,
    aliases: usize,
    optimize: bool,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(schema: &'a SchemaTable, params: &'a mut QParams) -> Self {
        Self {
            schema,
            params,
            aliases: 0,
            optimize: true,
        }
    }

    /// Disables the array-`any` membership rewrite.
    pub fn without_optimizer(mut self) -> Self {
        self.optimize = false;
        self
    }

    /// Compiles `filter` against the struct `root`, bound to `doc`.
    pub fn compile(&mut self, root: TypeId, filter: &Value) -> QueryResult<Expr> {
        if filter.is_null() {
            return Ok(Expr::TRUE);
        }
        self.compile_struct(root, Expr::var(DOC), filter, "", false)
    }

    fn next_alias(&mut self) -> String {
        self.aliases += 1;
        format!("j{}", self.aliases)
    }

    fn compile_struct(
        &mut self,
        id: TypeId,
        base: Expr,
        filter: &Value,
        path: &str,
        in_array: bool,
    ) -> QueryResult<Expr> {
        let schema = self.schema;
        let fields = schema
            .struct_type(id)
            .ok_or_else(|| QueryError::invariant_violation(format!("'{}' is not a struct", path)))?;

        let mut alternatives = Vec::new();
        for alternative in alternatives_of(filter, path)? {
            let mut parts = Vec::new();
            for (name, sub) in field_filters(alternative) {
                let field = fields.field(name).ok_or_else(|| {
                    QueryError::schema_violation(format!(
                        "Unknown field '{}' in filter",
                        child_path(path, name)
                    ))
                })?;
                let target = Target::Field {
                    parent: base.clone(),
                    stored: field.stored.clone(),
                };
                parts.push(self.compile_field(
                    field.ty,
                    target,
                    sub,
                    &child_path(path, name),
                    in_array,
                )?);
            }
            if !parts.is_empty() {
                alternatives.push(Expr::and(parts));
            }
        }

        if alternatives.is_empty() {
            return Ok(Expr::TRUE);
        }
        Ok(Expr::or(alternatives))
    }

    fn compile_field(
        &mut self,
        ty: TypeId,
        target: Target,
        filter: &Value,
        path: &str,
        in_array: bool,
    ) -> QueryResult<Expr> {
        let schema = self.schema;
        match schema.get(ty) {
            QType::Scalar => self.compile_scalar(&target, filter, path, |v| Ok(v.clone())),
            QType::BigUInt(prefix) => {
                let prefix = *prefix;
                self.compile_scalar(&target, filter, path, |v| {
                    Ok(Value::String(biguint::encode_value(prefix, v)?))
                })
            }
            QType::Struct(_) => self.compile_struct(ty, target.path(), filter, path, in_array),
            QType::Array(item) => self.compile_array(*item, &target, filter, path),
            QType::EnumName(e) => {
                let Target::Field { parent, .. } = &target else {
                    return Err(QueryError::invariant_violation(format!(
                        "Enum name field '{}' used as an array item",
                        path
                    )));
                };
                let backing = Target::Field {
                    parent: parent.clone(),
                    stored: e.backing.clone(),
                };
                self.compile_scalar(&backing, filter, path, |v| enum_value(e, v, path))
            }
            QType::StringCompanion(_) => Ok(Expr::FALSE),
            QType::Join(join) => {
                let parent = join_parent(&target, path, in_array)?;
                self.compile_join(join, parent, filter, path)
            }
            QType::JoinArray(join) => {
                let parent = join_parent(&target, path, in_array)?;
                self.compile_join_array(join, parent, filter, path)
            }
        }
    }

    fn compile_scalar<F>(
        &mut self,
        target: &Target,
        filter: &Value,
        path: &str,
        encode: F,
    ) -> QueryResult<Expr>
    where
        F: Fn(&Value) -> QueryResult<Value>,
    {
        let lhs = target.path();
        let mut parts = Vec::new();
        for (name, op, operand) in scalar_ops(filter, path)? {
            self.params.explain_op(path, name);
            let part = match op {
                ScalarOp::Cmp(cmp) => {
                    let lhs = if target.is_key() && cmp.is_ordered() {
                        Expr::ToString(Box::new(lhs.clone()))
                    } else {
                        lhs.clone()
                    };
                    let placeholder = self.params.add(encode(operand)?);
                    Expr::compare(lhs, cmp, Expr::param(placeholder))
                }
                ScalarOp::In | ScalarOp::NotIn => {
                    let mut equalities = Vec::new();
                    for item in in_operands(operand, path)? {
                        let placeholder = self.params.add(encode(item)?);
                        equalities.push(Expr::compare(
                            lhs.clone(),
                            CmpOp::Eq,
                            Expr::param(placeholder),
                        ));
                    }
                    let any = Expr::or(equalities);
                    if op == ScalarOp::In {
                        any
                    } else {
                        Expr::not(any)
                    }
                }
            };
            parts.push(part);
        }
        Ok(Expr::and(parts))
    }

    fn compile_array(
        &mut self,
        item: TypeId,
        target: &Target,
        filter: &Value,
        path: &str,
    ) -> QueryResult<Expr> {
        let array = target.path();
        let item_path = format!("{}[*]", path);
        let mut parts = Vec::new();
        for (quantifier, sub) in array_ops(filter, path)? {
            self.params.explain_op(path, quantifier.as_str());
            let cond = self.compile_field(
                item,
                Target::Element(Expr::var(CURRENT)),
                sub,
                &item_path,
                true,
            )?;
            let part = match quantifier {
                Quantifier::All if cond.is_true() => Expr::TRUE,
                Quantifier::All => Expr::compare(
                    Expr::length(Expr::inline_filter(array.clone(), cond)),
                    CmpOp::Eq,
                    Expr::length(Expr::expand(array.clone(), Vec::new())),
                ),
                Quantifier::Any if cond.is_false() => Expr::FALSE,
                Quantifier::Any => {
                    let rewritten = if self.optimize {
                        optimizer::rewrite_any(&array, &cond)
                    } else {
                        None
                    };
                    rewritten.unwrap_or_else(|| {
                        Expr::compare(
                            Expr::length(Expr::inline_filter(array.clone(), cond)),
                            CmpOp::Gt,
                            Expr::int(0),
                        )
                    })
                }
            };
            parts.push(part);
        }
        Ok(Expr::and(parts))
    }

    fn compile_join(
        &mut self,
        join: &JoinType,
        parent: &Expr,
        filter: &Value,
        path: &str,
    ) -> QueryResult<Expr> {
        let alias = self.next_alias();
        let cond = self.compile_struct(join.target, Expr::var(alias.clone()), filter, path, false)?;
        if cond.is_false() {
            return Ok(Expr::FALSE);
        }
        let correlation = Expr::compare(
            Expr::field(Expr::var(alias.clone()), join.ref_on.clone()),
            CmpOp::Eq,
            Expr::field(parent.clone(), join.on.clone()),
        );
        let exists = Expr::subquery(Subquery {
            var: alias,
            source: Source::Collection(join.collection.clone()),
            filter: Some(Expr::and([correlation, cond])),
            limit: Some(1),
            ret: Expr::int(1),
        });
        Ok(Expr::compare(Expr::length(exists), CmpOp::Gt, Expr::int(0)))
    }

    fn compile_join_array(
        &mut self,
        join: &JoinType,
        parent: &Expr,
        filter: &Value,
        path: &str,
    ) -> QueryResult<Expr> {
        let local = Expr::field(parent.clone(), join.on.clone());
        let mut parts = Vec::new();
        for (quantifier, sub) in array_ops(filter, path)? {
            self.params.explain_op(path, quantifier.as_str());
            let alias = self.next_alias();
            let cond =
                self.compile_struct(join.target, Expr::var(alias.clone()), sub, path, false)?;
            let membership = Expr::is_in(
                Expr::field(Expr::var(alias.clone()), join.ref_on.clone()),
                local.clone(),
            );
            let part = match quantifier {
                Quantifier::Any if cond.is_false() => Expr::FALSE,
                Quantifier::Any => Expr::compare(
                    Expr::length(Expr::subquery(Subquery {
                        var: alias,
                        source: Source::Collection(join.collection.clone()),
                        filter: Some(Expr::and([membership, cond])),
                        limit: Some(1),
                        ret: Expr::int(1),
                    })),
                    CmpOp::Gt,
                    Expr::int(0),
                ),
                Quantifier::All => Expr::compare(
                    Expr::length(Expr::subquery(Subquery {
                        var: alias,
                        source: Source::Collection(join.collection.clone()),
                        filter: Some(Expr::and([membership, cond])),
                        limit: None,
                        ret: Expr::int(1),
                    })),
                    CmpOp::Eq,
                    Expr::length(Expr::expand(local.clone(), Vec::new())),
                ),
            };
            parts.push(part);
        }
        Ok(Expr::and(parts))
    }
}

fn join_parent<'t>(target: &'t Target, path: &str, in_array: bool) -> QueryResult<&'t Expr> {
    match target {
        Target::Field { parent, .. } if !in_array => Ok(parent),
        _ => Err(QueryError::invariant_violation(format!(
            "Join field '{}' cannot be filtered inside an array element",
            path
        ))),
    }
}

// ---------------------------------------------------------------------------
// Filter shape parsing, shared with the predicate evaluator
// ---------------------------------------------------------------------------

/// Operator applicable to a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarOp {
    Cmp(CmpOp),
    In,
    NotIn,
}

/// Array quantifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantifier {
    All,
    Any,
}

impl Quantifier {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Quantifier::All => "all",
            Quantifier::Any => "any",
        }
    }
}

pub(crate) fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn expect_object<'v>(filter: &'v Value, path: &str) -> QueryResult<&'v Map<String, Value>> {
    filter.as_object().ok_or_else(|| {
        let at = if path.is_empty() { "<root>" } else { path };
        QueryError::schema_violation(format!("Filter for '{}' must be an object", at))
    })
}

/// Splits a struct filter on its `OR` chain.
pub(crate) fn alternatives_of<'v>(
    filter: &'v Value,
    path: &str,
) -> QueryResult<Vec<&'v Map<String, Value>>> {
    let mut out = Vec::new();
    let mut current = filter;
    loop {
        let map = expect_object(current, path)?;
        out.push(map);
        match map.get("OR") {
            None | Some(Value::Null) => return Ok(out),
            Some(next) => current = next,
        }
    }
}

/// Field entries of one alternative; `OR` and null-valued fields are skipped.
pub(crate) fn field_filters(
    alternative: &Map<String, Value>,
) -> impl Iterator<Item = (&str, &Value)> {
    alternative
        .iter()
        .filter(|(name, value)| name.as_str() != "OR" && !value.is_null())
        .map(|(name, value)| (name.as_str(), value))
}

/// Operators of a scalar leaf; null operands are skipped.
pub(crate) fn scalar_ops<'v>(
    filter: &'v Value,
    path: &str,
) -> QueryResult<Vec<(&'v str, ScalarOp, &'v Value)>> {
    let mut out = Vec::new();
    for (name, operand) in expect_object(filter, path)? {
        if operand.is_null() {
            continue;
        }
        let op = match name.as_str() {
            "in" => ScalarOp::In,
            "notIn" => ScalarOp::NotIn,
            other => ScalarOp::Cmp(CmpOp::from_filter_op(other).ok_or_else(|| {
                QueryError::schema_violation(format!(
                    "Unknown operator '{}' for field '{}'",
                    other, path
                ))
            })?),
        };
        out.push((name.as_str(), op, operand));
    }
    Ok(out)
}

/// Operand list of `in` / `notIn`.
pub(crate) fn in_operands<'v>(operand: &'v Value, path: &str) -> QueryResult<&'v [Value]> {
    operand.as_array().map(Vec::as_slice).ok_or_else(|| {
        QueryError::schema_violation(format!("'in'/'notIn' on '{}' expects a list", path))
    })
}

/// Quantifiers of an array filter; null operands are skipped.
pub(crate) fn array_ops<'v>(
    filter: &'v Value,
    path: &str,
) -> QueryResult<Vec<(Quantifier, &'v Value)>> {
    let mut out = Vec::new();
    for (name, sub) in expect_object(filter, path)? {
        if sub.is_null() {
            continue;
        }
        let quantifier = match name.as_str() {
            "all" => Quantifier::All,
            "any" => Quantifier::Any,
            other => {
                return Err(QueryError::schema_violation(format!(
                    "Unknown operator '{}' for array field '{}'",
                    other, path
                )))
            }
        };
        out.push((quantifier, sub));
    }
    Ok(out)
}

/// Resolves an enum name operand to its backing value.
pub(crate) fn enum_value(
    e: &crate::schema::EnumNameType,
    operand: &Value,
    path: &str,
) -> QueryResult<Value> {
    let name = operand.as_str().ok_or_else(|| {
        QueryError::schema_violation(format!("Enum field '{}' expects a name", path))
    })?;
    e.value_of(name).map(Value::from).ok_or_else(|| {
        QueryError::schema_violation(format!("Unknown value '{}' for enum field '{}'", name, path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, SchemaBuilder};
    use serde_json::json;

    fn schema() -> (SchemaTable, TypeId) {
        let mut b = SchemaBuilder::new();
        let account = b.declare("Account").unwrap();
        let message = b.declare("Message").unwrap();
        let meta = b.declare("Meta").unwrap();
        let s = b.scalar();
        let big = b.big_uint(2);
        let tags = b.array(s);
        let outs = b.array(meta);
        let name = b.enum_name("acc_type", [("Uninit", 0), ("Active", 1)]);
        let text = b.string_companion("balance");
        let last = b.join("last_msg", "_key", message);
        let msgs = b.join_array("msg_ids", "_key", message);
        let nested_join = b.join("src", "_key", message);
        b.structure(
            meta,
            vec![FieldDef::new("code", s), FieldDef::new("msg", nested_join)],
        )
        .unwrap();
        b.collection(
            "accounts",
            account,
            vec![
                FieldDef::new("acc_type", s),
                FieldDef::new("acc_type_name", name),
                FieldDef::new("balance", big),
                FieldDef::new("balance_text", text),
                FieldDef::new("tags", tags),
                FieldDef::new("outs", outs),
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

    fn compile(filter: Value) -> QueryResult<(String, QParams)> {
        let (table, root) = schema();
        let mut params = QParams::new();
        let expr = FilterCompiler::new(&table, &mut params).compile(root, &filter)?;
        Ok((expr.to_string(), params))
    }

    #[test]
    fn test_scalar_eq() {
        let (text, params) = compile(json!({ "acc_type": { "eq": 1 } })).unwrap();
        assert_eq!(text, "doc.acc_type == @v1");
        assert_eq!(params.get("v1"), Some(&json!(1)));
    }

    #[test]
    fn test_text_never_contains_operands() {
        let (text, _) = compile(json!({ "acc_type": { "eq": "'; DROP" } })).unwrap();
        assert!(!text.contains("DROP"));
    }

    #[test]
    fn test_multiple_ops_and() {
        let (text, _) = compile(json!({ "acc_type": { "ge": 1, "le": 3 } })).unwrap();
        assert_eq!(text, "(doc.acc_type >= @v1) AND (doc.acc_type <= @v2)");
    }

    #[test]
    fn test_in_and_not_in() {
        let (text, _) = compile(json!({ "acc_type": { "in": [1, 2] } })).unwrap();
        assert_eq!(text, "(doc.acc_type == @v1) OR (doc.acc_type == @v2)");

        let (text, _) = compile(json!({ "acc_type": { "notIn": [1] } })).unwrap();
        assert_eq!(text, "NOT (doc.acc_type == @v1)");

        let (text, _) = compile(json!({ "acc_type": { "in": [] } })).unwrap();
        assert_eq!(text, "false");

        let (text, _) = compile(json!({ "acc_type": { "notIn": [] } })).unwrap();
        assert_eq!(text, "true");
    }

    #[test]
    fn test_key_cast_only_for_ordered_ops() {
        let (text, _) = compile(json!({ "id": { "gt": "a", "eq": "b" } })).unwrap();
        assert_eq!(text, "(doc._key == @v1) AND (TO_STRING(doc._key) > @v2)");
    }

    #[test]
    fn test_big_uint_operands_encoded() {
        let (text, params) = compile(json!({ "balance": { "gt": "0xff" } })).unwrap();
        assert_eq!(text, "doc.balance > @v1");
        assert_eq!(params.get("v1"), Some(&json!("01ff")));
    }

    #[test]
    fn test_enum_name_resolves_to_backing() {
        let (text, params) = compile(json!({ "acc_type_name": { "eq": "Active" } })).unwrap();
        assert_eq!(text, "doc.acc_type == @v1");
        assert_eq!(params.get("v1"), Some(&json!(1)));

        let err = compile(json!({ "acc_type_name": { "eq": "Frozen" } })).unwrap_err();
        assert_eq!(err.code(), "QINDEX_SCHEMA_VIOLATION");
    }

    #[test]
    fn test_string_companion_is_false() {
        let (text, _) = compile(json!({ "balance_text": { "eq": "1" } })).unwrap();
        assert_eq!(text, "false");
    }

    #[test]
    fn test_unknown_field_and_operator_rejected() {
        let err = compile(json!({ "nope": { "eq": 1 } })).unwrap_err();
        assert!(err.to_string().contains("nope"));
        let err = compile(json!({ "acc_type": { "like": 1 } })).unwrap_err();
        assert!(err.to_string().contains("like"));
        let err = compile(json!({ "tags": { "some": {} } })).unwrap_err();
        assert!(err.to_string().contains("some"));
    }

    #[test]
    fn test_or_chain() {
        let (text, _) = compile(json!({
            "acc_type": { "eq": 1 },
            "OR": { "acc_type": { "eq": 2 }, "OR": { "acc_type": { "eq": 3 } } }
        }))
        .unwrap();
        assert_eq!(
            text,
            "(doc.acc_type == @v1) OR (doc.acc_type == @v2) OR (doc.acc_type == @v3)"
        );
    }

    #[test]
    fn test_empty_filter_and_empty_alternatives() {
        assert_eq!(compile(json!({})).unwrap().0, "true");
        assert_eq!(compile(Value::Null).unwrap().0, "true");
        let (text, _) = compile(json!({ "OR": { "acc_type": { "eq": 2 } } })).unwrap();
        assert_eq!(text, "doc.acc_type == @v1");
    }

    #[test]
    fn test_array_any_optimized() {
        let (text, _) = compile(json!({ "tags": { "any": { "eq": "X" } } })).unwrap();
        assert_eq!(text, "@v1 IN doc.tags[*]");

        let (text, _) = compile(json!({ "outs": { "any": { "code": { "eq": 5 } } } })).unwrap();
        assert_eq!(text, "@v1 IN doc.outs[*].code");
    }

    #[test]
    fn test_array_any_unoptimized_and_all() {
        let (table, root) = schema();
        let mut params = QParams::new();
        let expr = FilterCompiler::new(&table, &mut params)
            .without_optimizer()
            .compile(root, &json!({ "tags": { "any": { "eq": "X" } } }))
            .unwrap();
        assert_eq!(
            expr.to_string(),
            "LENGTH(doc.tags[* FILTER CURRENT == @v1]) > 0"
        );

        let (text, _) = compile(json!({ "tags": { "all": { "ne": "X" } } })).unwrap();
        assert_eq!(
            text,
            "LENGTH(doc.tags[* FILTER CURRENT != @v1]) == LENGTH(doc.tags[*])"
        );
    }

    #[test]
    fn test_join_subquery() {
        let (text, _) =
            compile(json!({ "last_message": { "value": { "gt": 10 } } })).unwrap();
        assert_eq!(
            text,
            "LENGTH((FOR j1 IN messages FILTER (j1._key == doc.last_msg) AND (j1.value > @v1) LIMIT 1 RETURN 1)) > 0"
        );
    }

    #[test]
    fn test_join_array_quantifiers() {
        let (text, _) =
            compile(json!({ "messages": { "any": { "value": { "eq": 1 } } } })).unwrap();
        assert_eq!(
            text,
            "LENGTH((FOR j1 IN messages FILTER (j1._key IN doc.msg_ids) AND (j1.value == @v1) LIMIT 1 RETURN 1)) > 0"
        );

        let (text, _) =
            compile(json!({ "messages": { "all": { "value": { "eq": 1 } } } })).unwrap();
        assert_eq!(
            text,
            "LENGTH((FOR j1 IN messages FILTER (j1._key IN doc.msg_ids) AND (j1.value == @v1) RETURN 1)) == LENGTH(doc.msg_ids[*])"
        );
    }

    #[test]
    fn test_join_inside_array_is_invariant_violation() {
        let err = compile(json!({ "outs": { "any": { "msg": { "value": { "eq": 1 } } } } }))
            .unwrap_err();
        assert_eq!(err.code(), "QINDEX_INVARIANT_VIOLATION");
    }

    #[test]
    fn test_explanation_records_paths() {
        let (table, root) = schema();
        let mut params = QParams::explaining();
        FilterCompiler::new(&table, &mut params)
            .compile(
                root,
                &json!({ "balance": { "gt": 1 }, "outs": { "any": { "code": { "eq": 1 } } } }),
            )
            .unwrap();
        let explanation = params.explanation().unwrap();
        assert!(explanation["balance"].contains("gt"));
        assert!(explanation["outs"].contains("any"));
        assert!(explanation["outs[*].code"].contains("eq"));
    }
}
