//! Projection compiler and result rendering
//!
//! A selection is first normalised against the schema (unknown fields are
//! rejected, empty struct selections expand to every non-join field), then
//! compiled into a `RETURN` object. Rows coming back from the store, or
//! projected in memory, are rendered against the same normalised selection:
//! big integers are decoded, enum names resolved and string companions
//! stringified.

use serde_json::Value;

use crate::schema::{
    biguint, BigUIntFormat, QType, SchemaTable, StructType, TypeId, ID_FIELD, KEY_FIELD,
};

use super::errors::{QueryError, QueryResult};
use super::expr::{CmpOp, Expr, Source, Subquery, DOC};
use super::filter::child_path;
use super::request::{Selection, SelectionField};

/// Depth at which default expansion of nested structs stops
const MAX_DEFAULT_DEPTH: usize = 8;

/// Validates `selection` and fills in default sub-selections.
pub fn normalize(schema: &SchemaTable, root: TypeId, selection: &Selection) -> QueryResult<Selection> {
    Ok(Selection::new(normalize_struct(
        schema,
        root,
        &selection.fields,
        "",
        0,
    )?))
}

fn struct_of<'s>(schema: &'s SchemaTable, id: TypeId, path: &str) -> QueryResult<&'s StructType> {
    schema
        .struct_type(id)
        .ok_or_else(|| QueryError::invariant_violation(format!("'{}' is not a struct", path)))
}

fn normalize_struct(
    schema: &SchemaTable,
    id: TypeId,
    fields: &[SelectionField],
    path: &str,
    depth: usize,
) -> QueryResult<Vec<SelectionField>> {
    let st = struct_of(schema, id, path)?;
    if fields.is_empty() {
        if depth >= MAX_DEFAULT_DEPTH {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for field in &st.fields {
            if matches!(schema.get(field.ty), QType::Join(_) | QType::JoinArray(_)) {
                continue;
            }
            let sel = SelectionField::new(field.name.clone());
            out.push(normalize_field(schema, field.ty, &sel, &child_path(path, &field.name), depth + 1)?);
        }
        return Ok(out);
    }

    let mut out = Vec::new();
    for sel in fields {
        let field = st.field(&sel.name).ok_or_else(|| {
            QueryError::schema_violation(format!(
                "Unknown field '{}' in selection",
                child_path(path, &sel.name)
            ))
        })?;
        out.push(normalize_field(schema, field.ty, sel, &child_path(path, &sel.name), depth + 1)?);
    }
    Ok(out)
}

fn normalize_field(
    schema: &SchemaTable,
    ty: TypeId,
    sel: &SelectionField,
    path: &str,
    depth: usize,
) -> QueryResult<SelectionField> {
    let fields = match schema.get(ty) {
        QType::Struct(_) => normalize_struct(schema, ty, &sel.fields, path, depth)?,
        QType::Join(j) | QType::JoinArray(j) => {
            normalize_struct(schema, j.target, &sel.fields, path, depth)?
        }
        QType::Array(item) => {
            return normalize_field(schema, *item, sel, path, depth);
        }
        _ if !sel.fields.is_empty() => {
            return Err(QueryError::schema_violation(format!(
                "Field '{}' has no sub-fields",
                path
            )))
        }
        _ => Vec::new(),
    };
    Ok(SelectionField {
        name: sel.name.clone(),
        format: sel.format,
        fields,
    })
}

/// Compiles normalised selections into `RETURN` expressions.
#[derive(Debug)]
pub struct ProjectionCompiler<'a> {
    schema: &'a SchemaTable,
    aliases: usize,
}

impl<'a> ProjectionCompiler<'a> {
    pub fn new(schema: &'a SchemaTable) -> Self {
        Self { schema, aliases: 0 }
    }

    /// Projection of a document of the collection rooted at `root`.
    pub fn compile(&mut self, root: TypeId, selection: &Selection) -> QueryResult<Expr> {
        self.compile_struct(root, Expr::var(DOC), &selection.fields)
    }

    fn next_alias(&mut self) -> String {
        self.aliases += 1;
        format!("p{}", self.aliases)
    }

    fn compile_struct(
        &mut self,
        id: TypeId,
        base: Expr,
        fields: &[SelectionField],
    ) -> QueryResult<Expr> {
        let schema = self.schema;
        let st = struct_of(schema, id, "")?;
        let mut entries = Vec::new();
        if st.is_collection_root() {
            entries.push((ID_FIELD.to_string(), Expr::field(base.clone(), KEY_FIELD)));
        }
        for sel in fields {
            if st.is_collection_root() && sel.name == ID_FIELD {
                continue;
            }
            let field = st.field(&sel.name).ok_or_else(|| {
                QueryError::schema_violation(format!("Unknown field '{}' in selection", sel.name))
            })?;
            let value = Expr::field(base.clone(), field.stored.clone());
            let expr = self.compile_value(field.ty, value, Some(&base), sel)?;
            entries.push((sel.name.clone(), expr));
        }
        Ok(Expr::Object(entries))
    }

    /// `parent` is the struct holding `value`; array elements have none.
    fn compile_value(
        &mut self,
        ty: TypeId,
        value: Expr,
        parent: Option<&Expr>,
        sel: &SelectionField,
    ) -> QueryResult<Expr> {
        let schema = self.schema;
        let need_parent = || {
            QueryError::invariant_violation(format!(
                "Field '{}' must be a struct member",
                sel.name
            ))
        };
        Ok(match schema.get(ty) {
            QType::Scalar | QType::BigUInt(_) => value,
            QType::Struct(_) => {
                let object = self.compile_struct(ty, value.clone(), &sel.fields)?;
                Expr::guard(value, object)
            }
            QType::Array(item) => {
                if !needs_per_element(schema, *item) {
                    return Ok(value);
                }
                let alias = self.next_alias();
                let ret = self.compile_value(*item, Expr::var(alias.clone()), None, sel)?;
                Expr::subquery(Subquery {
                    var: alias,
                    source: Source::Expr(Box::new(Expr::expand(value, Vec::new()))),
                    filter: None,
                    limit: None,
                    ret,
                })
            }
            QType::EnumName(e) => Expr::field(parent.ok_or_else(need_parent)?.clone(), e.backing.clone()),
            QType::StringCompanion(c) => {
                Expr::field(parent.ok_or_else(need_parent)?.clone(), c.backing.clone())
            }
            QType::Join(j) => {
                let parent = parent.ok_or_else(need_parent)?.clone();
                let alias = self.next_alias();
                let ret = self.compile_struct(j.target, Expr::var(alias.clone()), &sel.fields)?;
                let first = Expr::subquery(Subquery {
                    var: alias.clone(),
                    source: Source::Collection(j.collection.clone()),
                    filter: Some(Expr::compare(
                        Expr::field(Expr::var(alias), j.ref_on.clone()),
                        CmpOp::Eq,
                        Expr::field(parent, j.on.clone()),
                    )),
                    limit: Some(1),
                    ret,
                });
                Expr::Index(Box::new(first), 0)
            }
            QType::JoinArray(j) => {
                let parent = parent.ok_or_else(need_parent)?.clone();
                let alias = self.next_alias();
                let ret = self.compile_struct(j.target, Expr::var(alias.clone()), &sel.fields)?;
                Expr::subquery(Subquery {
                    var: alias.clone(),
                    source: Source::Collection(j.collection.clone()),
                    filter: Some(Expr::is_in(
                        Expr::field(Expr::var(alias), j.ref_on.clone()),
                        Expr::field(parent, j.on.clone()),
                    )),
                    limit: None,
                    ret,
                })
            }
        })
    }
}

/// Arrays of plain values are returned as stored.
fn needs_per_element(schema: &SchemaTable, item: TypeId) -> bool {
    match schema.get(item) {
        QType::Scalar | QType::BigUInt(_) => false,
        QType::Array(inner) => needs_per_element(schema, *inner),
        _ => true,
    }
}

/// Renders a projected row in place.
pub fn render(schema: &SchemaTable, root: TypeId, selection: &Selection, row: &mut Value) -> QueryResult<()> {
    render_struct(schema, root, &selection.fields, row)
}

fn render_struct(
    schema: &SchemaTable,
    id: TypeId,
    fields: &[SelectionField],
    row: &mut Value,
) -> QueryResult<()> {
    let Some(st) = schema.struct_type(id) else {
        return Ok(());
    };
    let Value::Object(map) = row else {
        return Ok(());
    };
    for sel in fields {
        let Some(field) = st.field(&sel.name) else {
            continue;
        };
        if let Some(value) = map.get_mut(&sel.name) {
            render_value(schema, field.ty, sel, value)?;
        }
    }
    Ok(())
}

fn render_value(
    schema: &SchemaTable,
    ty: TypeId,
    sel: &SelectionField,
    value: &mut Value,
) -> QueryResult<()> {
    match schema.get(ty) {
        QType::Scalar => {}
        QType::BigUInt(prefix) => {
            if let Value::String(encoded) = value {
                let n = biguint::decode(*prefix, encoded)?;
                *value = Value::String(biguint::render(&n, sel.format.unwrap_or_default()));
            }
        }
        QType::Struct(_) => render_struct(schema, ty, &sel.fields, value)?,
        QType::Array(item) => {
            if let Value::Array(items) = value {
                for item_value in items {
                    render_value(schema, *item, sel, item_value)?;
                }
            }
        }
        QType::EnumName(e) => {
            *value = value
                .as_i64()
                .and_then(|v| e.name_of(v))
                .map_or(Value::Null, |name| Value::String(name.to_string()));
        }
        QType::StringCompanion(c) => {
            let backing = c.backing_ty.map(|t| schema.get(t));
            *value = match (backing, &*value) {
                (_, Value::Null) => Value::Null,
                (Some(QType::BigUInt(prefix)), Value::String(encoded)) => {
                    let n = biguint::decode(*prefix, encoded)?;
                    Value::String(biguint::render(&n, BigUIntFormat::Dec))
                }
                (_, Value::String(s)) => Value::String(s.clone()),
                (_, other) => Value::String(other.to_string()),
            };
        }
        QType::Join(j) => render_struct(schema, j.target, &sel.fields, value)?,
        QType::JoinArray(j) => {
            if let Value::Array(items) = value {
                for item_value in items {
                    render_struct(schema, j.target, &sel.fields, item_value)?;
                }
            }
        }
    }
    Ok(())
}

/// Renders every row of a result set.
pub fn render_rows(
    schema: &SchemaTable,
    root: TypeId,
    selection: &Selection,
    rows: Vec<Value>,
) -> QueryResult<Vec<Value>> {
    rows.into_iter()
        .map(|mut row| {
            render(schema, root, selection, &mut row)?;
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::binder::QParams;
    use crate::query::eval::{Evaluator, JoinSource, Scope};
    use crate::schema::{FieldDef, SchemaBuilder};
    use serde_json::json;

    struct Messages;

    impl JoinSource for Messages {
        fn documents(&self, collection: &str) -> Vec<Value> {
            if collection == "messages" {
                vec![json!({ "_key": "m1", "value": biguint::encode_value(1, &json!(255)).unwrap() })]
            } else {
                Vec::new()
            }
        }
    }

    fn schema() -> (SchemaTable, TypeId) {
        let mut b = SchemaBuilder::new();
        let account = b.declare("Account").unwrap();
        let message = b.declare("Message").unwrap();
        let meta = b.declare("Meta").unwrap();
        let s = b.scalar();
        let big = b.big_uint(1);
        let name = b.enum_name("acc_type", [("Active", 1)]);
        let text = b.string_companion("balance");
        let metas = b.array(meta);
        let last = b.join("last_msg", "_key", message);
        b.structure(meta, vec![FieldDef::new("code", s), FieldDef::new("amount", big)])
            .unwrap();
        b.collection(
            "accounts",
            account,
            vec![
                FieldDef::new("acc_type", s),
                FieldDef::new("acc_type_name", name),
                FieldDef::new("balance", big),
                FieldDef::new("balance_text", text),
                FieldDef::new("meta", meta),
                FieldDef::new("metas", metas),
                FieldDef::new("last_msg", s),
                FieldDef::new("last_message", last),
            ],
        )
        .unwrap();
        b.collection("messages", message, vec![FieldDef::new("value", big)])
            .unwrap();
        let table = b.build().unwrap();
        let root = table.collection_root("accounts").unwrap();
        (table, root)
    }

    fn compile(selection: Selection) -> QueryResult<(Expr, Selection)> {
        let (table, root) = schema();
        let normalized = normalize(&table, root, &selection)?;
        let expr = ProjectionCompiler::new(&table).compile(root, &normalized)?;
        Ok((expr, normalized))
    }

    #[test]
    fn test_id_always_included() {
        let (expr, _) = compile(Selection::from_paths(["acc_type"])).unwrap();
        assert_eq!(expr.to_string(), "{ id: doc._key, acc_type: doc.acc_type }");
        let (expr, _) = compile(Selection::from_paths(["id", "acc_type"])).unwrap();
        assert_eq!(expr.to_string(), "{ id: doc._key, acc_type: doc.acc_type }");
    }

    #[test]
    fn test_nested_struct_and_array() {
        let (expr, _) = compile(Selection::from_paths(["meta.code", "metas.code"])).unwrap();
        assert_eq!(
            expr.to_string(),
            "{ id: doc._key, meta: (doc.meta && { code: doc.meta.code }), metas: (FOR p1 IN doc.metas[*] RETURN (p1 && { code: p1.code })) }"
        );
    }

    #[test]
    fn test_companions_project_backing() {
        let (expr, _) = compile(Selection::from_paths(["acc_type_name", "balance_text"])).unwrap();
        assert_eq!(
            expr.to_string(),
            "{ id: doc._key, acc_type_name: doc.acc_type, balance_text: doc.balance }"
        );
    }

    #[test]
    fn test_join_projection() {
        let (expr, _) = compile(Selection::from_paths(["last_message.value"])).unwrap();
        assert_eq!(
            expr.to_string(),
            "{ id: doc._key, last_message: (FOR p1 IN messages FILTER p1._key == doc.last_msg LIMIT 1 RETURN { id: p1._key, value: p1.value })[0] }"
        );
    }

    #[test]
    fn test_default_selection_skips_joins() {
        let (_, normalized) = compile(Selection::default()).unwrap();
        let names: Vec<_> = normalized.fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"meta"));
        assert!(!names.contains(&"last_message"));
        let meta = normalized.fields.iter().find(|f| f.name == "meta").unwrap();
        assert_eq!(meta.fields.len(), 2);
    }

    #[test]
    fn test_invalid_selections() {
        assert!(compile(Selection::from_paths(["nope"])).is_err());
        assert!(compile(Selection::from_paths(["acc_type.sub"])).is_err());
    }

    #[test]
    fn test_project_and_render_in_memory() {
        let (table, root) = schema();
        let selection = normalize(
            &table,
            root,
            &Selection::new(vec![
                SelectionField::new("balance").with_format(BigUIntFormat::Dec),
                SelectionField::new("balance_text"),
                SelectionField::new("acc_type_name"),
                SelectionField::new("metas").with_fields(vec![SelectionField::new("amount")]),
                SelectionField::new("last_message"),
            ]),
        )
        .unwrap();
        let projection = ProjectionCompiler::new(&table).compile(root, &selection).unwrap();

        let stored = json!({
            "_key": "a1",
            "acc_type": 1,
            "balance": biguint::encode_value(1, &json!(4096)).unwrap(),
            "metas": [{ "amount": biguint::encode_value(1, &json!(16)).unwrap(), "code": 1 }],
            "last_msg": "m1"
        });
        let params = QParams::new();
        let mut row = Evaluator::new(&params, &Messages)
            .eval(&projection, &mut Scope::with(DOC, stored))
            .unwrap();
        render(&table, root, &selection, &mut row).unwrap();

        assert_eq!(
            row,
            json!({
                "id": "a1",
                "balance": "4096",
                "balance_text": "4096",
                "acc_type_name": "Active",
                "metas": [{ "amount": "0x10" }],
                "last_message": { "id": "m1", "value": "0xff" }
            })
        );
    }

    #[test]
    fn test_render_unknown_enum_value_is_null() {
        let (table, root) = schema();
        let selection = normalize(&table, root, &Selection::from_paths(["acc_type_name"])).unwrap();
        let mut row = json!({ "id": "a", "acc_type_name": 7 });
        render(&table, root, &selection, &mut row).unwrap();
        assert_eq!(row["acc_type_name"], Value::Null);
    }
}
