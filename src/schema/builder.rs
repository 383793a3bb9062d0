//! Two-pass schema construction
//!
//! Pass one declares named handles so that structs may reference each other
//! before they exist. Pass two (`build`) checks that every handle was
//! defined, wires companion fields to their backing siblings and fills in
//! join targets.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::errors::{SchemaError, SchemaResult};
use super::types::{
    EnumNameType, FieldDef, JoinType, QType, SchemaTable, StringCompanionType, StructType,
    TypeId, ID_FIELD, KEY_FIELD,
};

/// Mutable arena used to assemble a `SchemaTable`
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    slots: Vec<Option<QType>>,
    labels: Vec<String>,
    names: HashMap<String, TypeId>,
    collections: BTreeMap<String, TypeId>,
    scalar: Option<TypeId>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a named handle to be defined later.
    pub fn declare(&mut self, name: impl Into<String>) -> SchemaResult<TypeId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(SchemaError::AlreadyDefined(name));
        }
        let id = self.reserve(name.clone());
        self.names.insert(name, id);
        Ok(id)
    }

    /// Gives a declared handle its definition.
    pub fn define(&mut self, id: TypeId, ty: QType) -> SchemaResult<()> {
        let label = self.label(id)?;
        let slot = &mut self.slots[id.0];
        if slot.is_some() {
            return Err(SchemaError::AlreadyDefined(label));
        }
        *slot = Some(ty);
        Ok(())
    }

    /// Adds an anonymous, already defined node.
    pub fn add(&mut self, ty: QType) -> TypeId {
        let id = self.reserve(format!("#{}", self.slots.len()));
        self.slots[id.0] = Some(ty);
        id
    }

    /// Shared scalar node
    pub fn scalar(&mut self) -> TypeId {
        if let Some(id) = self.scalar {
            return id;
        }
        let id = self.add(QType::Scalar);
        self.scalar = Some(id);
        id
    }

    pub fn big_uint(&mut self, prefix_len: u8) -> TypeId {
        self.add(QType::BigUInt(prefix_len))
    }

    pub fn array(&mut self, item: TypeId) -> TypeId {
        self.add(QType::Array(item))
    }

    /// Enum-name companion of the sibling field `backing`
    pub fn enum_name<I, S>(&mut self, backing: impl Into<String>, values: I) -> TypeId
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        self.add(QType::EnumName(EnumNameType {
            backing: backing.into(),
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }))
    }

    /// String rendering of the sibling field `backing`
    pub fn string_companion(&mut self, backing: impl Into<String>) -> TypeId {
        self.add(QType::StringCompanion(StringCompanionType {
            backing: backing.into(),
            backing_ty: None,
        }))
    }

    /// Single join from local field `on` to `ref_on` of the collection rooted at `target`
    pub fn join(
        &mut self,
        on: impl Into<String>,
        ref_on: impl Into<String>,
        target: TypeId,
    ) -> TypeId {
        self.add(QType::Join(Self::join_type(on.into(), ref_on.into(), target)))
    }

    /// Join from a local array of references
    pub fn join_array(
        &mut self,
        on: impl Into<String>,
        ref_on: impl Into<String>,
        target: TypeId,
    ) -> TypeId {
        self.add(QType::JoinArray(Self::join_type(
            on.into(),
            ref_on.into(),
            target,
        )))
    }

    /// Defines `id` as the root struct of collection `name`.
    pub fn collection(
        &mut self,
        name: impl Into<String>,
        id: TypeId,
        fields: Vec<FieldDef>,
    ) -> SchemaResult<()> {
        let name = name.into();
        if self.collections.contains_key(&name) {
            return Err(SchemaError::DuplicateCollection(name));
        }
        self.define(
            id,
            QType::Struct(StructType {
                fields,
                collection: Some(name.clone()),
            }),
        )?;
        self.collections.insert(name, id);
        Ok(())
    }

    /// Defines `id` as a plain nested struct.
    pub fn structure(&mut self, id: TypeId, fields: Vec<FieldDef>) -> SchemaResult<()> {
        self.define(
            id,
            QType::Struct(StructType {
                fields,
                collection: None,
            }),
        )
    }

    /// Validates and freezes the arena.
    pub fn build(mut self) -> SchemaResult<SchemaTable> {
        for (slot, label) in self.slots.iter().zip(&self.labels) {
            if slot.is_none() {
                return Err(SchemaError::Undefined(label.clone()));
            }
        }
        let scalar = self.scalar();
        let len = self.slots.len();
        let mut types: Vec<QType> = self.slots.into_iter().flatten().collect();
        debug_assert_eq!(types.len(), len);

        let mut wired: HashMap<TypeId, (String, Option<TypeId>)> = HashMap::new();
        for index in 0..types.len() {
            let (owner_fields, is_root) = match &types[index] {
                QType::Struct(s) => (s.fields.clone(), s.is_collection_root()),
                _ => continue,
            };
            let owner = self.labels[index].clone();
            let fields = normalize_fields(&owner, owner_fields, is_root, scalar)?;

            for field in &fields {
                let Some(node) = types.get(field.ty.0).cloned() else {
                    return Err(SchemaError::UnknownType(format!("{}.{}", owner, field.name)));
                };
                match node {
                    QType::Join(join) | QType::JoinArray(join) => {
                        let collection = match types.get(join.target.0) {
                            Some(QType::Struct(StructType {
                                collection: Some(c),
                                ..
                            })) => c.clone(),
                            _ => {
                                return Err(SchemaError::JoinTargetNotCollection {
                                    field: field.name.clone(),
                                    target: self.labels[join.target.0].clone(),
                                })
                            }
                        };
                        if let QType::Join(j) | QType::JoinArray(j) = &mut types[field.ty.0] {
                            j.collection = collection;
                        }
                    }
                    QType::EnumName(e) => {
                        let backing = backing_of(&fields, &field.name, &e.backing)?;
                        check_shared(&mut wired, field.ty, &backing.stored, None)?;
                        if let QType::EnumName(e) = &mut types[field.ty.0] {
                            e.backing = backing.stored.clone();
                        }
                    }
                    QType::StringCompanion(c) => {
                        let backing = backing_of(&fields, &field.name, &c.backing)?;
                        check_shared(&mut wired, field.ty, &backing.stored, Some(backing.ty))?;
                        if let QType::StringCompanion(c) = &mut types[field.ty.0] {
                            c.backing = backing.stored.clone();
                            c.backing_ty = Some(backing.ty);
                        }
                    }
                    QType::Array(item) => {
                        if types.get(item.0).map_or(true, QType::is_companion) {
                            return Err(SchemaError::CompanionInArray(field.name.clone()));
                        }
                    }
                    _ => {}
                }
            }

            if let QType::Struct(s) = &mut types[index] {
                s.fields = fields;
            }
        }

        Ok(SchemaTable {
            types,
            names: self.names,
            collections: self.collections,
        })
    }

    fn join_type(on: String, ref_on: String, target: TypeId) -> JoinType {
        JoinType {
            on,
            ref_on,
            collection: String::new(),
            target,
        }
    }

    fn reserve(&mut self, label: String) -> TypeId {
        let id = TypeId(self.slots.len());
        self.slots.push(None);
        self.labels.push(label);
        id
    }

    fn label(&self, id: TypeId) -> SchemaResult<String> {
        self.labels
            .get(id.0)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownType(format!("#{}", id.0)))
    }
}

/// Rejects duplicates and maps `id` onto the primary key of collection roots.
fn normalize_fields(
    owner: &str,
    fields: Vec<FieldDef>,
    is_root: bool,
    scalar: TypeId,
) -> SchemaResult<Vec<FieldDef>> {
    let mut seen = HashSet::new();
    for field in &fields {
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                owner: owner.to_string(),
                field: field.name.clone(),
            });
        }
    }
    if !is_root {
        return Ok(fields);
    }

    let mut fields = fields;
    match fields.iter_mut().find(|f| f.name == ID_FIELD) {
        Some(id) => id.stored = KEY_FIELD.to_string(),
        None => fields.insert(
            0,
            FieldDef {
                name: ID_FIELD.to_string(),
                stored: KEY_FIELD.to_string(),
                ty: scalar,
            },
        ),
    }
    Ok(fields)
}

fn backing_of<'a>(
    siblings: &'a [FieldDef],
    field: &str,
    backing: &str,
) -> SchemaResult<&'a FieldDef> {
    siblings
        .iter()
        .find(|f| f.name != field && (f.name == backing || f.stored == backing))
        .ok_or_else(|| SchemaError::MissingBackingField {
            field: field.to_string(),
            backing: backing.to_string(),
        })
}

fn check_shared(
    wired: &mut HashMap<TypeId, (String, Option<TypeId>)>,
    node: TypeId,
    stored: &str,
    backing_ty: Option<TypeId>,
) -> SchemaResult<()> {
    match wired.get(&node) {
        Some((s, t)) if s != stored || *t != backing_ty => {
            Err(SchemaError::SharedCompanion(stored.to_string()))
        }
        Some(_) => Ok(()),
        None => {
            wired.insert(node, (stored.to_string(), backing_ty));
            Ok(())
        }
    }
}
