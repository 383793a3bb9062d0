//! Schema loader for JSON schema declarations
//!
//! A declaration file lists named struct types; those carrying a
//! `collection` become collection roots. Fields reference other structs by
//! name, so declarations may appear in any order and may be mutually
//! recursive.
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "Account", "collection": "accounts", "fields": [
//!       { "name": "acc_type", "kind": "scalar" },
//!       { "name": "acc_type_name", "kind": "enum_name",
//!         "backing": "acc_type", "values": { "Active": 1 } },
//!       { "name": "balance", "kind": "big_uint", "prefix": 2 }
//!     ] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::builder::SchemaBuilder;
use super::errors::{SchemaError, SchemaResult};
use super::types::{FieldDef, SchemaTable, TypeId};

/// Whole declaration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDecl {
    pub types: Vec<StructDecl>,
}

/// Named struct, optionally a collection root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(flatten)]
    pub ty: TypeDecl,
}

/// Field type, tagged by `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDecl {
    Scalar,
    BigUint {
        #[serde(default = "default_prefix")]
        prefix: u8,
    },
    Struct {
        #[serde(rename = "type")]
        type_name: String,
    },
    Array {
        item: Box<TypeDecl>,
    },
    EnumName {
        backing: String,
        values: BTreeMap<String, i64>,
    },
    StringCompanion {
        backing: String,
    },
    Join {
        on: String,
        ref_on: String,
        target: String,
    },
    JoinArray {
        on: String,
        ref_on: String,
        target: String,
    },
}

fn default_prefix() -> u8 {
    1
}

impl SchemaDecl {
    /// Builds the schema table in two passes: declare every struct, then
    /// define each one with its resolved fields.
    pub fn into_table(self) -> SchemaResult<SchemaTable> {
        let mut builder = SchemaBuilder::new();
        let mut handles = BTreeMap::new();
        for decl in &self.types {
            handles.insert(decl.name.clone(), builder.declare(decl.name.clone())?);
        }

        for decl in self.types {
            let id = handles[&decl.name];
            let mut fields = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                let ty = resolve(&mut builder, &handles, &field.ty)?;
                fields.push(FieldDef::new(field.name.clone(), ty));
            }
            match decl.collection {
                Some(collection) => builder.collection(collection, id, fields)?,
                None => builder.structure(id, fields)?,
            }
        }

        builder.build()
    }
}

fn resolve(
    builder: &mut SchemaBuilder,
    handles: &BTreeMap<String, TypeId>,
    decl: &TypeDecl,
) -> SchemaResult<TypeId> {
    let named = |name: &str| {
        handles
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    };

    Ok(match decl {
        TypeDecl::Scalar => builder.scalar(),
        TypeDecl::BigUint { prefix } => builder.big_uint(*prefix),
        TypeDecl::Struct { type_name } => named(type_name)?,
        TypeDecl::Array { item } => {
            let item = resolve(builder, handles, item)?;
            builder.array(item)
        }
        TypeDecl::EnumName { backing, values } => {
            builder.enum_name(backing.clone(), values.iter().map(|(k, v)| (k.clone(), *v)))
        }
        TypeDecl::StringCompanion { backing } => builder.string_companion(backing.clone()),
        TypeDecl::Join { on, ref_on, target } => {
            let target = named(target)?;
            builder.join(on.clone(), ref_on.clone(), target)
        }
        TypeDecl::JoinArray { on, ref_on, target } => {
            let target = named(target)?;
            builder.join_array(on.clone(), ref_on.clone(), target)
        }
    })
}

/// Reads schema declarations from JSON text or disk.
pub struct SchemaLoader;

impl SchemaLoader {
    /// Parses a declaration document and builds the table.
    pub fn from_json(json: &str) -> SchemaResult<SchemaTable> {
        let decl: SchemaDecl = serde_json::from_str(json)
            .map_err(|e| SchemaError::InvalidDeclaration(e.to_string()))?;
        decl.into_table()
    }

    /// Loads a declaration file.
    ///
    /// A missing or unreadable file is reported as an invalid declaration.
    pub fn load(path: &Path) -> SchemaResult<SchemaTable> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::InvalidDeclaration(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}
