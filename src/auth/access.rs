//! # Access rights
//!
//! Document-level read restriction for collections.
//!
//! The caller's rights are resolved from an optional access key. A
//! restricted caller only sees documents whose policy fields hold one of the
//! permitted ids. The restriction is applied twice, with identical meaning:
//! as a compiled condition ANDed into every query, and as an in-memory check
//! on documents announced to live queries and subscriptions.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::value_order::equals;
use crate::query::{CmpOp, Expr, QParams, QueryResult, DOC};

/// What a caller may read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRights {
    pub granted: bool,
    /// `None` means unrestricted
    #[serde(default)]
    pub restrict_to: Option<Vec<String>>,
}

impl AccessRights {
    pub fn unrestricted() -> Self {
        Self {
            granted: true,
            restrict_to: None,
        }
    }

    pub fn restricted(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            granted: true,
            restrict_to: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            restrict_to: None,
        }
    }
}

impl Default for AccessRights {
    fn default() -> Self {
        Self::unrestricted()
    }
}

/// Stored fields of a collection that carry entity ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub fields: Vec<String>,
}

impl AccessPolicy {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Compiled restriction: `==` for one id, `IN` for several, ORed
    /// across policy fields. A collection without policy fields is never
    /// visible to a restricted caller.
    pub fn condition(&self, rights: &AccessRights, params: &mut QParams) -> Expr {
        if !rights.granted {
            return Expr::FALSE;
        }
        let Some(ids) = &rights.restrict_to else {
            return Expr::TRUE;
        };
        if ids.is_empty() {
            return Expr::FALSE;
        }

        let mut alternatives = Vec::new();
        for field in &self.fields {
            let path = Expr::field(Expr::var(DOC), field.clone());
            let part = if ids.len() == 1 {
                let v = params.add(Value::String(ids[0].clone()));
                Expr::compare(path, CmpOp::Eq, Expr::param(v))
            } else {
                let v = params.add(Value::Array(
                    ids.iter().cloned().map(Value::String).collect(),
                ));
                Expr::is_in(path, Expr::param(v))
            };
            alternatives.push(part);
        }
        Expr::or(alternatives)
    }

    /// In-memory counterpart of `condition` for a stored document.
    pub fn allows(&self, rights: &AccessRights, doc: &Value) -> bool {
        if !rights.granted {
            return false;
        }
        let Some(ids) = &rights.restrict_to else {
            return true;
        };
        self.fields.iter().any(|field| {
            let value = doc.get(field).unwrap_or(&Value::Null);
            ids.iter()
                .any(|id| equals(value, &Value::String(id.clone())))
        })
    }
}

/// Resolves access keys into rights
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn access_rights(&self, access_key: Option<&str>) -> QueryResult<AccessRights>;
}

/// Fixed key table; unknown keys are denied
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    anonymous: AccessRights,
    keys: HashMap<String, AccessRights>,
}

impl StaticAuthorizer {
    /// Authorizer granting `anonymous` to requests without a key
    pub fn new(anonymous: AccessRights) -> Self {
        Self {
            anonymous,
            keys: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, rights: AccessRights) -> Self {
        self.keys.insert(key.into(), rights);
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn access_rights(&self, access_key: Option<&str>) -> QueryResult<AccessRights> {
        Ok(match access_key {
            None => self.anonymous.clone(),
            Some(key) => self
                .keys
                .get(key)
                .cloned()
                .unwrap_or_else(AccessRights::denied),
        })
    }
}
