//! Query builder
//!
//! Assembles complete programs from requests: the user filter ANDed with the
//! caller's access condition, the normalised projection, sort keys and the
//! clamped limit. A condition that folds to literal `false` marks the query
//! unsatisfiable; callers answer it without touching the store.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::auth::{AccessPolicy, AccessRights};
use crate::config::QueryConfig;
use crate::schema::{QType, SchemaTable, TypeId};

use super::aggregate::{AggregateSpec, AggregationFn};
use super::binder::QParams;
use super::errors::{QueryError, QueryResult};
use super::eval::{Evaluator, JoinSource, Scope};
use super::expr::{Expr, DOC};
use super::filter::FilterCompiler;
use super::predicate::Predicate;
use super::projection::{self, ProjectionCompiler};
use super::request::{AggregationRequest, Direction, QueryRequest, Selection};

/// A dotted request path resolved against the schema
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub expr: Expr,
    pub ty: TypeId,
    /// Stored attribute path, e.g. `_key` or `meta.code`
    pub stored_path: String,
}

/// Resolves a dotted path through struct fields only.
pub fn resolve_field_path(
    schema: &SchemaTable,
    root: TypeId,
    dotted: &str,
) -> QueryResult<ResolvedField> {
    let mut expr = Expr::var(DOC);
    let mut ty = root;
    let mut stored = Vec::new();
    for name in dotted.split('.') {
        let st = schema.struct_type(ty).ok_or_else(|| {
            QueryError::schema_violation(format!("'{}' does not resolve to a field", dotted))
        })?;
        let field = st.field(name).ok_or_else(|| {
            QueryError::schema_violation(format!("Unknown field '{}'", dotted))
        })?;
        expr = Expr::field(expr, field.stored.clone());
        stored.push(field.stored.clone());
        ty = field.ty;
    }
    Ok(ResolvedField {
        expr,
        ty,
        stored_path: stored.join("."),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: Direction,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, self.direction.as_str())
    }
}

/// Complete program handed to the store
#[derive(Debug, Clone, PartialEq)]
pub enum QueryProgram {
    Select {
        collection: String,
        condition: Expr,
        sort: Vec<SortKey>,
        limit: usize,
        projection: Expr,
    },
    Aggregate {
        collection: String,
        condition: Expr,
        aggregates: Vec<AggregateSpec>,
    },
}

impl QueryProgram {
    pub fn collection(&self) -> &str {
        match self {
            QueryProgram::Select { collection, .. } | QueryProgram::Aggregate { collection, .. } => {
                collection
            }
        }
    }

    pub fn condition(&self) -> &Expr {
        match self {
            QueryProgram::Select { condition, .. } | QueryProgram::Aggregate { condition, .. } => {
                condition
            }
        }
    }
}

fn write_scan(f: &mut fmt::Formatter<'_>, collection: &str, condition: &Expr) -> fmt::Result {
    write!(f, "FOR {} IN {}", DOC, collection)?;
    if !condition.is_true() {
        write!(f, " FILTER {}", condition)?;
    }
    Ok(())
}

impl fmt::Display for QueryProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryProgram::Select {
                collection,
                condition,
                sort,
                limit,
                projection,
            } => {
                write_scan(f, collection, condition)?;
                if !sort.is_empty() {
                    f.write_str(" SORT ")?;
                    write!(f, "{}", join_sort(sort))?;
                }
                write!(f, " LIMIT {} RETURN {}", limit, projection)
            }
            QueryProgram::Aggregate {
                collection,
                condition,
                aggregates,
            } => {
                write_scan(f, collection, condition)?;
                f.write_str(" COLLECT AGGREGATE ")?;
                for (i, spec) in aggregates.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "a{} = {}", i, spec)?;
                }
                f.write_str(" RETURN [")?;
                for i in 0..aggregates.len() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "a{}", i)?;
                }
                f.write_str("]")
            }
        }
    }
}

fn join_sort(sort: &[SortKey]) -> String {
    sort.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A select query ready for execution
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub collection: String,
    pub root: TypeId,
    /// The filter as received
    pub filter: Value,
    /// Normalised selection the rows are rendered against
    pub selection: Selection,
    pub sort: Vec<SortKey>,
    /// Canonical sort rendering, `None` without sort keys
    pub sort_text: Option<String>,
    /// Stored paths of the sort keys
    pub sort_fields: Vec<String>,
    pub limit: usize,
    pub timeout_ms: u64,
    pub operation_id: String,
    pub text: String,
    pub params: QParams,
    pub access: AccessRights,
    pub program: QueryProgram,
    pub unsatisfiable: bool,
}

impl CompiledQuery {
    pub fn condition(&self) -> &Expr {
        self.program.condition()
    }

    /// Whether a stored document satisfies the request filter.
    pub fn matches(
        &self,
        schema: &SchemaTable,
        joins: &dyn JoinSource,
        doc: &Value,
    ) -> QueryResult<bool> {
        Predicate::new(schema, joins).test(self.root, doc, &self.filter)
    }

    /// Projects and renders a stored document the way store rows are.
    pub fn project(
        &self,
        schema: &SchemaTable,
        joins: &dyn JoinSource,
        doc: Value,
    ) -> QueryResult<Value> {
        let QueryProgram::Select { projection, .. } = &self.program else {
            return Err(QueryError::Internal("Not a select program".into()));
        };
        let mut row = Evaluator::new(&self.params, joins).eval(projection, &mut Scope::with(DOC, doc))?;
        projection::render(schema, self.root, &self.selection, &mut row)?;
        Ok(row)
    }

    /// Renders rows returned by the store.
    pub fn render_rows(&self, schema: &SchemaTable, rows: Vec<Value>) -> QueryResult<Vec<Value>> {
        projection::render_rows(schema, self.root, &self.selection, rows)
    }
}

/// Index probe for one aggregate: a plain scan optionally sorted on the
/// aggregated field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastProbe {
    pub sort_text: Option<String>,
    pub sort_fields: Vec<String>,
}

/// An aggregation ready for execution
#[derive(Debug, Clone)]
pub struct CompiledAggregation {
    pub collection: String,
    pub filter: Value,
    pub text: String,
    /// Text of the underlying scan, used for classification
    pub scan_text: String,
    pub params: QParams,
    pub access: AccessRights,
    pub program: QueryProgram,
    pub unsatisfiable: bool,
    /// `None` when some function can never use an index
    pub probes: Option<Vec<FastProbe>>,
}

impl CompiledAggregation {
    pub fn aggregates(&self) -> &[AggregateSpec] {
        match &self.program {
            QueryProgram::Aggregate { aggregates, .. } => aggregates,
            QueryProgram::Select { .. } => &[],
        }
    }

    /// Result over an empty document set.
    pub fn empty_result(&self) -> Vec<Value> {
        self.aggregates()
            .iter()
            .map(|spec| match spec.func {
                AggregationFn::Count => Value::from(0),
                _ => Value::Null,
            })
            .collect()
    }

    /// Decodes the single row returned by the store.
    pub fn render(&self, rows: Vec<Value>) -> QueryResult<Vec<Value>> {
        let Some(Value::Array(values)) = rows.into_iter().next() else {
            return Ok(self.empty_result());
        };
        if values.len() != self.aggregates().len() {
            return Err(QueryError::Internal(format!(
                "Expected {} aggregate values, got {}",
                self.aggregates().len(),
                values.len()
            )));
        }
        self.aggregates()
            .iter()
            .zip(values)
            .map(|(spec, raw)| spec.render(raw))
            .collect()
    }
}

/// Compiles requests for one collection
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    schema: Arc<SchemaTable>,
    collection: String,
    root: TypeId,
    config: QueryConfig,
}

impl QueryBuilder {
    pub fn new(
        schema: Arc<SchemaTable>,
        collection: impl Into<String>,
        config: QueryConfig,
    ) -> QueryResult<Self> {
        let collection = collection.into();
        let root = schema.collection_root(&collection)?;
        Ok(Self {
            schema,
            collection,
            root,
            config,
        })
    }

    pub fn schema(&self) -> &Arc<SchemaTable> {
        &self.schema
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn root(&self) -> TypeId {
        self.root
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn condition(
        &self,
        filter: &Value,
        rights: &AccessRights,
        policy: &AccessPolicy,
        params: &mut QParams,
    ) -> QueryResult<Expr> {
        if !rights.granted {
            return Err(QueryError::AccessDenied(format!(
                "Collection '{}' is not readable with this key",
                self.collection
            )));
        }
        let user = FilterCompiler::new(&self.schema, params).compile(self.root, filter)?;
        let access = policy.condition(rights, params);
        Ok(Expr::and([user, access]))
    }

    /// Compiles a select request. With `explain`, the binder records the
    /// operators applied per path.
    pub fn compile(
        &self,
        request: &QueryRequest,
        rights: &AccessRights,
        policy: &AccessPolicy,
        explain: bool,
    ) -> QueryResult<CompiledQuery> {
        let mut params = if explain {
            QParams::explaining()
        } else {
            QParams::new()
        };
        let condition = self.condition(&request.filter, rights, policy, &mut params)?;
        let unsatisfiable = condition.is_false();

        let selection = projection::normalize(&self.schema, self.root, &request.selection)?;
        let projection = ProjectionCompiler::new(&self.schema).compile(self.root, &selection)?;

        let mut sort = Vec::new();
        let mut sort_fields = Vec::new();
        for order in &request.order_by {
            let field = resolve_field_path(&self.schema, self.root, &order.path)?;
            if !matches!(self.schema.get(field.ty), QType::Scalar | QType::BigUInt(_)) {
                return Err(QueryError::schema_violation(format!(
                    "Cannot sort by {} field '{}'",
                    self.schema.get(field.ty).kind(),
                    order.path
                )));
            }
            sort.push(SortKey {
                expr: field.expr,
                direction: order.direction,
            });
            sort_fields.push(field.stored_path);
        }
        let sort_text = (!sort.is_empty()).then(|| join_sort(&sort));

        let limit = self.config.clamp_limit(request.limit);
        let program = QueryProgram::Select {
            collection: self.collection.clone(),
            condition,
            sort: sort.clone(),
            limit,
            projection,
        };

        Ok(CompiledQuery {
            collection: self.collection.clone(),
            root: self.root,
            filter: request.filter.clone(),
            selection,
            sort,
            sort_text,
            sort_fields,
            limit,
            timeout_ms: request
                .timeout_ms
                .unwrap_or(self.config.default_wait_timeout_ms),
            operation_id: request
                .operation_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            text: program.to_string(),
            params,
            access: rights.clone(),
            program,
            unsatisfiable,
        })
    }

    pub fn compile_aggregate(
        &self,
        request: &AggregationRequest,
        rights: &AccessRights,
        policy: &AccessPolicy,
    ) -> QueryResult<CompiledAggregation> {
        if request.fields.is_empty() {
            return Err(QueryError::schema_violation(
                "Aggregation requires at least one field",
            ));
        }
        let mut params = QParams::new();
        let condition = self.condition(&request.filter, rights, policy, &mut params)?;
        let unsatisfiable = condition.is_false();

        let mut aggregates = Vec::new();
        let mut probes = Some(Vec::new());
        for field in &request.fields {
            let resolved = match (&field.field, field.func) {
                (_, AggregationFn::Count) | (None, _) => None,
                (Some(path), _) => Some((path, resolve_field_path(&self.schema, self.root, path)?)),
            };
            let path = resolved.as_ref().map_or("", |(p, _)| p.as_str());
            let spec = AggregateSpec::new(
                field.func,
                resolved
                    .as_ref()
                    .map(|(_, r)| (r.expr.clone(), self.schema.get(r.ty))),
                path,
            )?;

            if !field.func.may_be_fast() {
                probes = None;
            } else if let Some(probes) = probes.as_mut() {
                let probe = match (&resolved, field.func.needs_sort()) {
                    (Some((_, r)), true) => FastProbe {
                        sort_text: Some(
                            SortKey {
                                expr: r.expr.clone(),
                                direction: Direction::Asc,
                            }
                            .to_string(),
                        ),
                        sort_fields: vec![r.stored_path.clone()],
                    },
                    _ => FastProbe {
                        sort_text: None,
                        sort_fields: Vec::new(),
                    },
                };
                probes.push(probe);
            }
            aggregates.push(spec);
        }

        let scan_text = QueryProgram::Select {
            collection: self.collection.clone(),
            condition: condition.clone(),
            sort: Vec::new(),
            limit: self.config.max_limit,
            projection: Expr::var(DOC),
        }
        .to_string();
        let program = QueryProgram::Aggregate {
            collection: self.collection.clone(),
            condition,
            aggregates,
        };

        Ok(CompiledAggregation {
            collection: self.collection.clone(),
            filter: request.filter.clone(),
            text: program.to_string(),
            scan_text,
            params,
            access: rights.clone(),
            program,
            unsatisfiable,
            probes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::request::{AggregationField, OrderBy};
    use crate::schema::{biguint, FieldDef, SchemaBuilder};
    use serde_json::json;

    fn builder() -> QueryBuilder {
        let mut b = SchemaBuilder::new();
        let account = b.declare("Account").unwrap();
        let meta = b.declare("Meta").unwrap();
        let s = b.scalar();
        let big = b.big_uint(2);
        let text = b.string_companion("balance");
        b.structure(meta, vec![FieldDef::new("code", s)]).unwrap();
        b.collection(
            "accounts",
            account,
            vec![
                FieldDef::new("acc_type", s),
                FieldDef::new("balance", big),
                FieldDef::new("balance_text", text),
                FieldDef::new("meta", meta),
                FieldDef::new("owner", s),
            ],
        )
        .unwrap();
        let schema = Arc::new(b.build().unwrap());
        QueryBuilder::new(schema, "accounts", QueryConfig::default()).unwrap()
    }

    fn select(filter: Value) -> QueryRequest {
        QueryRequest::new(filter).with_selection(Selection::from_paths(["acc_type"]))
    }

    #[test]
    fn test_compile_select_text() {
        let q = builder()
            .compile(
                &select(json!({ "acc_type": { "eq": 1 } }))
                    .with_order_by(vec![OrderBy::desc("balance"), OrderBy::asc("meta.code")])
                    .with_limit(10),
                &AccessRights::unrestricted(),
                &AccessPolicy::default(),
                false,
            )
            .unwrap();
        assert_eq!(
            q.text,
            "FOR doc IN accounts FILTER doc.acc_type == @v1 SORT doc.balance DESC, doc.meta.code ASC LIMIT 10 RETURN { id: doc._key, acc_type: doc.acc_type }"
        );
        assert_eq!(q.sort_text.as_deref(), Some("doc.balance DESC, doc.meta.code ASC"));
        assert_eq!(q.sort_fields, vec!["balance".to_string(), "meta.code".to_string()]);
        assert_eq!(q.params.get("v1"), Some(&json!(1)));
        assert!(!q.unsatisfiable);
    }

    #[test]
    fn test_text_never_embeds_values() {
        let q = builder()
            .compile(
                &select(json!({ "owner": { "eq": "x\" OR true" } })),
                &AccessRights::unrestricted(),
                &AccessPolicy::default(),
                false,
            )
            .unwrap();
        assert!(!q.text.contains("OR true"));
    }

    #[test]
    fn test_limit_clamped_and_defaults() {
        let b = builder();
        let rights = AccessRights::unrestricted();
        let policy = AccessPolicy::default();
        let q = b
            .compile(&select(Value::Null).with_limit(500), &rights, &policy, false)
            .unwrap();
        assert_eq!(q.limit, 50);
        assert_eq!(q.timeout_ms, 0);
        assert!(Uuid::parse_str(&q.operation_id).is_ok());
        assert_eq!(
            q.text,
            "FOR doc IN accounts LIMIT 50 RETURN { id: doc._key, acc_type: doc.acc_type }"
        );

        let q = b
            .compile(
                &select(Value::Null).with_operation_id("op-1").with_timeout_ms(30),
                &rights,
                &policy,
                false,
            )
            .unwrap();
        assert_eq!(q.operation_id, "op-1");
        assert_eq!(q.timeout_ms, 30);
    }

    #[test]
    fn test_unsatisfiable_from_filter_or_access() {
        let b = builder();
        let q = b
            .compile(
                &select(json!({ "balance_text": { "eq": "1" } })),
                &AccessRights::unrestricted(),
                &AccessPolicy::default(),
                false,
            )
            .unwrap();
        assert!(q.unsatisfiable);

        let q = b
            .compile(
                &select(json!({ "acc_type": { "eq": 1 } })),
                &AccessRights::restricted(["a"]),
                &AccessPolicy::default(),
                false,
            )
            .unwrap();
        assert!(q.unsatisfiable);
    }

    #[test]
    fn test_access_condition_is_anded() {
        let q = builder()
            .compile(
                &select(json!({ "acc_type": { "eq": 1 } })),
                &AccessRights::restricted(["alice"]),
                &AccessPolicy::new(["owner"]),
                false,
            )
            .unwrap();
        assert!(q
            .text
            .starts_with("FOR doc IN accounts FILTER (doc.acc_type == @v1) AND (doc.owner == @v2)"));
    }

    #[test]
    fn test_denied_is_request_failure() {
        let err = builder()
            .compile(
                &select(Value::Null),
                &AccessRights::denied(),
                &AccessPolicy::default(),
                false,
            )
            .unwrap_err();
        assert_eq!(err.code(), "QINDEX_ACCESS_DENIED");
    }

    #[test]
    fn test_invalid_sort() {
        let b = builder();
        let rights = AccessRights::unrestricted();
        let policy = AccessPolicy::default();
        let err = b
            .compile(
                &select(Value::Null).with_order_by(vec![OrderBy::asc("meta")]),
                &rights,
                &policy,
                false,
            )
            .unwrap_err();
        assert_eq!(err.code(), "QINDEX_SCHEMA_VIOLATION");
        assert!(b
            .compile(
                &select(Value::Null).with_order_by(vec![OrderBy::asc("nope")]),
                &rights,
                &policy,
                false
            )
            .is_err());
    }

    #[test]
    fn test_id_resolves_to_key() {
        let b = builder();
        let resolved = resolve_field_path(b.schema(), b.root(), "id").unwrap();
        assert_eq!(resolved.expr.to_string(), "doc._key");
        assert_eq!(resolved.stored_path, "_key");
    }

    #[test]
    fn test_explain_records_operators() {
        let q = builder()
            .compile(
                &select(json!({ "acc_type": { "ge": 1, "lt": 3 } })),
                &AccessRights::unrestricted(),
                &AccessPolicy::default(),
                true,
            )
            .unwrap();
        let explanation = q.params.explanation().unwrap();
        let ops: Vec<_> = explanation["acc_type"].iter().cloned().collect();
        assert_eq!(ops, vec!["ge".to_string(), "lt".to_string()]);
    }

    #[test]
    fn test_project_stored_document() {
        let q = builder()
            .compile(
                &QueryRequest::new(Value::Null)
                    .with_selection(Selection::from_paths(["balance", "balance_text"])),
                &AccessRights::unrestricted(),
                &AccessPolicy::default(),
                false,
            )
            .unwrap();
        let doc = json!({ "_key": "a1", "balance": biguint::encode_value(2, &json!(255)).unwrap() });
        let b = builder();
        let row = q.project(b.schema(), &crate::query::NoJoins, doc.clone()).unwrap();
        assert_eq!(row, json!({ "id": "a1", "balance": "0xff", "balance_text": "255" }));
        assert!(q.matches(b.schema(), &crate::query::NoJoins, &doc).unwrap());
    }

    #[test]
    fn test_compile_aggregate() {
        let b = builder();
        let request = AggregationRequest::new(
            json!({ "acc_type": { "eq": 1 } }),
            vec![
                AggregationField::count(),
                AggregationField::of(AggregationFn::Max, "balance"),
            ],
        );
        let agg = b
            .compile_aggregate(&request, &AccessRights::unrestricted(), &AccessPolicy::default())
            .unwrap();
        assert_eq!(
            agg.text,
            "FOR doc IN accounts FILTER doc.acc_type == @v1 COLLECT AGGREGATE a0 = COUNT(1), a1 = MAX(doc.balance) RETURN [a0, a1]"
        );
        let probes = agg.probes.clone().unwrap();
        assert_eq!(probes[0].sort_text, None);
        assert_eq!(probes[1].sort_text.as_deref(), Some("doc.balance ASC"));
        assert_eq!(agg.empty_result(), vec![json!(0), Value::Null]);
        assert_eq!(
            agg.render(vec![json!([2, "01ff"])]).unwrap(),
            vec![json!(2), json!("0xff")]
        );
    }

    #[test]
    fn test_aggregate_sum_is_never_fast() {
        let request = AggregationRequest::new(
            Value::Null,
            vec![AggregationField::of(AggregationFn::Sum, "acc_type")],
        );
        let agg = builder()
            .compile_aggregate(&request, &AccessRights::unrestricted(), &AccessPolicy::default())
            .unwrap();
        assert!(agg.probes.is_none());

        let bad = AggregationRequest::new(
            Value::Null,
            vec![AggregationField::of(AggregationFn::Sum, "balance")],
        );
        assert!(builder()
            .compile_aggregate(&bad, &AccessRights::unrestricted(), &AccessPolicy::default())
            .is_err());
    }
}
