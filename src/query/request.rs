//! Request shapes accepted by the query surface

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::BigUIntFormat;

use super::aggregate::AggregationFn;

/// One selected field, with optional sub-selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionField {
    pub name: String,
    /// Render format for big integer fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<BigUIntFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SelectionField>,
}

impl SelectionField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: BigUIntFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_fields(mut self, fields: Vec<SelectionField>) -> Self {
        self.fields = fields;
        self
    }
}

/// Fields to return; empty selects every non-join field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    pub fields: Vec<SelectionField>,
}

impl Selection {
    pub fn new(fields: Vec<SelectionField>) -> Self {
        Self { fields }
    }

    /// Builds a selection from dotted paths (`"balance"`, `"meta.code"`).
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selection = Selection::default();
        for path in paths {
            let mut level = &mut selection.fields;
            for name in path.as_ref().split('.').filter(|s| !s.is_empty()) {
                let index = match level.iter().position(|f| f.name == name) {
                    Some(i) => i,
                    None => {
                        level.push(SelectionField::new(name));
                        level.len() - 1
                    }
                };
                level = &mut level[index].fields;
            }
        }
        selection
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Sort key given as a dotted field path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub path: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Desc,
        }
    }
}

/// `query(filter, orderBy, limit, timeout, accessKey, operationId)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub filter: Value,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Milliseconds; `Some(0)` executes once
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub operation_id: Option<String>,
}

impl QueryRequest {
    pub fn new(filter: Value) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    pub fn with_operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }
}

/// One aggregate: function applied to a dotted field path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationField {
    /// Ignored by COUNT
    #[serde(default)]
    pub field: Option<String>,
    #[serde(rename = "fn")]
    pub func: AggregationFn,
}

impl AggregationField {
    pub fn count() -> Self {
        Self {
            field: None,
            func: AggregationFn::Count,
        }
    }

    pub fn of(func: AggregationFn, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            func,
        }
    }
}

/// `aggregate(filter, fields, accessKey)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    #[serde(default)]
    pub filter: Value,
    pub fields: Vec<AggregationField>,
    #[serde(default)]
    pub access_key: Option<String>,
}

impl AggregationRequest {
    pub fn new(filter: Value, fields: Vec<AggregationField>) -> Self {
        Self {
            filter,
            fields,
            access_key: None,
        }
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }
}
