//! Field-type combinators and the schema table
//!
//! Every declared field is backed by one immutable `QType` node stored in an
//! arena. Nodes reference each other through `TypeId` handles, which lets
//! mutually recursive collections (a transaction joins its messages, a message
//! joins its transaction) be wired without lazy thunks.

use std::collections::{BTreeMap, HashMap};

use super::errors::{SchemaError, SchemaResult};

/// Store-internal primary key field
pub const KEY_FIELD: &str = "_key";

/// External name of the primary key on collection roots
pub const ID_FIELD: &str = "id";

/// Stable handle of a node in the schema arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) usize);

impl TypeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A named field of a struct node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Name clients use in filters and selections
    pub name: String,
    /// Name of the attribute in stored documents
    pub stored: String,
    /// Field type
    pub ty: TypeId,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        let name = name.into();
        Self {
            stored: name.clone(),
            name,
            ty,
        }
    }
}

/// Struct node: ordered fields, optionally the root of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub fields: Vec<FieldDef>,
    /// Collection name when this struct is a collection root
    pub collection: Option<String>,
}

impl StructType {
    /// Looks up a field by its external name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_collection_root(&self) -> bool {
        self.collection.is_some()
    }
}

/// Symbolic companion of a numeric enum field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumNameType {
    /// Stored name of the backing numeric field
    pub backing: String,
    /// Symbolic name -> backing value
    pub values: BTreeMap<String, i64>,
}

impl EnumNameType {
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(k, _)| k.as_str())
    }
}

/// Read-only string rendering of a sibling field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringCompanionType {
    /// Stored name of the backing field
    pub backing: String,
    /// Type of the backing field, wired at build time
    pub backing_ty: Option<TypeId>,
}

/// Correlation between a local field and another collection's field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinType {
    /// Stored name of the local field holding the reference
    pub on: String,
    /// Stored name of the referenced field in the target collection
    pub ref_on: String,
    /// Target collection
    pub collection: String,
    /// Root struct of the target collection
    pub target: TypeId,
}

/// Field-type combinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QType {
    /// Plain value compared natively
    Scalar,
    /// Big integer persisted in the sortable hex form; the payload is the
    /// length-prefix width in hex digits
    BigUInt(u8),
    Struct(StructType),
    Array(TypeId),
    EnumName(EnumNameType),
    StringCompanion(StringCompanionType),
    Join(JoinType),
    JoinArray(JoinType),
}

impl QType {
    pub fn kind(&self) -> &'static str {
        match self {
            QType::Scalar => "scalar",
            QType::BigUInt(_) => "big_uint",
            QType::Struct(_) => "struct",
            QType::Array(_) => "array",
            QType::EnumName(_) => "enum_name",
            QType::StringCompanion(_) => "string_companion",
            QType::Join(_) => "join",
            QType::JoinArray(_) => "join_array",
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            QType::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_companion(&self) -> bool {
        matches!(self, QType::EnumName(_) | QType::StringCompanion(_))
    }
}

/// Immutable arena of combinators built once at start-up
#[derive(Debug, Clone)]
pub struct SchemaTable {
    pub(crate) types: Vec<QType>,
    pub(crate) names: HashMap<String, TypeId>,
    pub(crate) collections: BTreeMap<String, TypeId>,
}

impl SchemaTable {
    /// Returns the node behind a handle.
    ///
    /// Handles are only minted by the builder of this table, so indexing
    /// cannot go out of bounds for a table that passed `build()`.
    pub fn get(&self, id: TypeId) -> &QType {
        &self.types[id.0]
    }

    /// Returns the struct node behind a handle, if it is one
    pub fn struct_type(&self, id: TypeId) -> Option<&StructType> {
        self.get(id).as_struct()
    }

    /// Root struct handle of a collection
    pub fn collection_root(&self, collection: &str) -> SchemaResult<TypeId> {
        self.collections
            .get(collection)
            .copied()
            .ok_or_else(|| SchemaError::UnknownCollection(collection.to_string()))
    }

    /// Handle of a named type
    pub fn type_named(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    /// Collection names in lexicographic order
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
