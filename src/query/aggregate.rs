//! Aggregation function catalog
//!
//! | fn      | field types         | may be fast               |
//! |---------|---------------------|---------------------------|
//! | COUNT   | ignored             | yes (filter only)         |
//! | MIN/MAX | scalar, big integer | yes (filter + field sort) |
//! | SUM/AVG | scalar              | never                     |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{biguint, BigUIntFormat, QType};

use super::errors::{QueryError, QueryResult};
use super::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationFn {
    Count,
    Min,
    Max,
    Sum,
    Average,
}

impl AggregationFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationFn::Count => "COUNT",
            AggregationFn::Min => "MIN",
            AggregationFn::Max => "MAX",
            AggregationFn::Sum => "SUM",
            AggregationFn::Average => "AVERAGE",
        }
    }

    /// Whether an index can ever answer this aggregate
    pub fn may_be_fast(&self) -> bool {
        matches!(
            self,
            AggregationFn::Count | AggregationFn::Min | AggregationFn::Max
        )
    }

    /// Whether the index lookup needs a sort on the aggregated field
    pub fn needs_sort(&self) -> bool {
        matches!(self, AggregationFn::Min | AggregationFn::Max)
    }

    fn accepts(&self, ty: &QType) -> bool {
        match self {
            AggregationFn::Count => true,
            AggregationFn::Min | AggregationFn::Max => {
                matches!(ty, QType::Scalar | QType::BigUInt(_))
            }
            AggregationFn::Sum | AggregationFn::Average => matches!(ty, QType::Scalar),
        }
    }
}

impl fmt::Display for AggregationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiled aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub func: AggregationFn,
    /// Aggregated value; `None` for COUNT
    pub expr: Option<Expr>,
    /// Stored form of the field, for decoding results
    pub big_uint_prefix: Option<u8>,
}

impl AggregateSpec {
    /// Checks the field type and builds the aggregate.
    pub fn new(
        func: AggregationFn,
        field: Option<(Expr, &QType)>,
        path: &str,
    ) -> QueryResult<Self> {
        if func == AggregationFn::Count {
            return Ok(Self {
                func,
                expr: None,
                big_uint_prefix: None,
            });
        }
        let (expr, ty) = field.ok_or_else(|| {
            QueryError::schema_violation(format!("{} requires a field", func))
        })?;
        if !func.accepts(ty) {
            return Err(QueryError::schema_violation(format!(
                "{} cannot be applied to {} field '{}'",
                func,
                ty.kind(),
                path
            )));
        }
        let big_uint_prefix = match ty {
            QType::BigUInt(prefix) => Some(*prefix),
            _ => None,
        };
        Ok(Self {
            func,
            expr: Some(expr),
            big_uint_prefix,
        })
    }

    /// Decodes a raw aggregate value for output.
    pub fn render(&self, raw: Value) -> QueryResult<Value> {
        match (self.big_uint_prefix, raw) {
            (Some(prefix), Value::String(encoded)) => {
                let n = biguint::decode(prefix, &encoded)?;
                Ok(Value::String(biguint::render(&n, BigUIntFormat::Hex)))
            }
            (_, raw) => Ok(raw),
        }
    }
}

impl fmt::Display for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Some(expr) => write!(f, "{}({})", self.func, expr),
            None => write!(f, "{}(1)", self.func),
        }
    }
}
