//! # Query compilation
//!
//! Client filters, selections and sort keys are compiled against the schema
//! table into native query programs. Operand values are always bound through
//! `QParams`; the rendered text holds only placeholders.
//!
//! The same filters can be evaluated in memory through `Predicate`, which
//! accepts exactly what the compiler accepts and agrees with it on every
//! document.

pub mod aggregate;
pub mod binder;
pub mod builder;
pub mod errors;
pub mod eval;
pub mod expr;
pub mod filter;
pub mod optimizer;
pub mod predicate;
pub mod projection;
pub mod request;
pub mod value_order;

pub use aggregate::{AggregateSpec, AggregationFn};
pub use binder::{Explanation, QParams};
pub use builder::{
    resolve_field_path, CompiledAggregation, CompiledQuery, FastProbe, QueryBuilder, QueryProgram,
    ResolvedField, SortKey,
};
pub use errors::{QueryError, QueryResult};
pub use eval::{Evaluator, JoinSource, NoJoins, Scope};
pub use expr::{CmpOp, Const, Expr, Source, Subquery, CURRENT, DOC};
pub use filter::FilterCompiler;
pub use predicate::Predicate;
pub use projection::ProjectionCompiler;
pub use request::{
    AggregationField, AggregationRequest, Direction, OrderBy, QueryRequest, Selection,
    SelectionField,
};
