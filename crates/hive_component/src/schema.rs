//! The schema registry: per-type metadata frozen at startup.
//!
//! Every component, relation, and tag type is registered once through a
//! [`SchemaRegistryBuilder`], receiving a stable small-integer index
//! ([`SchemaIndex`] / [`TagIndex`]) in registration order. Building the
//! registry freezes it; stores share the frozen registry behind an `Arc`
//! and only ever read from it, so lookups need no locking.
//!
//! Type-specific behaviour (creating a column, creating a relation store)
//! is captured as plain function pointers at registration time. The set of
//! storable types is therefore closed once `build` runs — there is no open
//! class hierarchy to dispatch through afterwards.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::component::{Component, ComponentTypeId, Relation, Tag, UniqueName};
use crate::relation::{RelationColumn, RelationStore};
use crate::storage::{ChunkedColumn, ColumnStorage, simd_tail_padding};

/// Maximum number of registrable tag types.
pub const TAG_CAPACITY: usize = 256;

/// Stable index of a component or relation type, assigned in registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaIndex(pub u16);

/// Stable index of a tag type, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagIndex(pub u16);

/// Whether a schema entry describes a plain value component or a
/// multi-instance relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Value,
    Relation,
}

/// A fixed-capacity bitset over registered tag indices.
///
/// Tags occupy no storage, so an archetype's tag membership is exactly one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TagSet([u64; TAG_CAPACITY / 64]);

impl TagSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self([0; TAG_CAPACITY / 64])
    }

    /// Inserts a tag.
    pub fn set(&mut self, tag: TagIndex) {
        let i = tag.0 as usize;
        self.0[i / 64] |= 1 << (i % 64);
    }

    /// Removes a tag.
    pub fn clear(&mut self, tag: TagIndex) {
        let i = tag.0 as usize;
        self.0[i / 64] &= !(1 << (i % 64));
    }

    /// Whether the tag is present.
    #[must_use]
    pub fn contains(&self, tag: TagIndex) -> bool {
        let i = tag.0 as usize;
        self.0[i / 64] & (1 << (i % 64)) != 0
    }

    /// Whether every tag in `self` is also in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &TagSet) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| a & !b == 0)
    }

    /// Whether the two sets share at least one tag.
    #[must_use]
    pub fn intersects(&self, other: &TagSet) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    /// Whether no tag is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Iterates the set tags in index order.
    pub fn iter(&self) -> impl Iterator<Item = TagIndex> + '_ {
        (0..TAG_CAPACITY as u16)
            .map(TagIndex)
            .filter(|t| self.contains(*t))
    }
}

/// Metadata and behaviour for one registered component or relation type.
pub struct ComponentSchema {
    /// Registration-order index.
    pub index: SchemaIndex,
    /// The human-readable type name.
    pub name: &'static str,
    /// FNV-1a hash of the name.
    pub type_id: ComponentTypeId,
    /// Value component or relation.
    pub kind: ComponentKind,
    /// Size of one instance in bytes.
    pub item_size: usize,
    /// SIMD tail padding slots per chunk, computed once here.
    pub pad: usize,
    new_column: fn(usize) -> Box<dyn ColumnStorage>,
    new_relation: Option<fn() -> Box<dyn RelationColumn>>,
    validate_json: fn(&serde_json::Value) -> Result<(), String>,
}

impl ComponentSchema {
    /// Checks that a JSON value deserialises as this component type,
    /// without storing anything.
    pub fn validate_json(&self, value: &serde_json::Value) -> Result<(), String> {
        (self.validate_json)(value)
    }
    /// Creates an empty column of this component type, sized with the
    /// registered padding.
    #[must_use]
    pub fn make_column(&self) -> Box<dyn ColumnStorage> {
        (self.new_column)(self.pad)
    }

    /// Creates an empty relation store, or `None` for value components.
    #[must_use]
    pub fn make_relation_store(&self) -> Option<Box<dyn RelationColumn>> {
        self.new_relation.map(|f| f())
    }
}

impl std::fmt::Debug for ComponentSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSchema")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("item_size", &self.item_size)
            .field("pad", &self.pad)
            .finish()
    }
}

/// Metadata for one registered tag type.
#[derive(Debug, Clone)]
pub struct TagSchema {
    /// Registration-order index.
    pub index: TagIndex,
    /// The human-readable tag name.
    pub name: &'static str,
    /// FNV-1a hash of the name.
    pub type_id: ComponentTypeId,
}

fn make_column_of<T: Component>(pad: usize) -> Box<dyn ColumnStorage> {
    Box::new(ChunkedColumn::<T>::new(pad))
}

fn make_relation_store_of<T: Relation>() -> Box<dyn RelationColumn> {
    Box::new(RelationStore::<T>::new())
}

fn validate_json_of<T: Component>(value: &serde_json::Value) -> Result<(), String> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Collects type registrations before the schema is frozen.
///
/// The built-in [`UniqueName`] component is registered automatically.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    components: Vec<ComponentSchema>,
    tags: Vec<TagSchema>,
    component_by_type: HashMap<TypeId, SchemaIndex>,
    component_by_name: HashMap<&'static str, SchemaIndex>,
    tag_by_type: HashMap<TypeId, TagIndex>,
    tag_by_name: HashMap<&'static str, TagIndex>,
}

impl SchemaRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self::default();
        builder.register_component::<UniqueName>();
        builder
    }

    /// Registers a value component type. Re-registering returns the
    /// existing index.
    pub fn register_component<T: Component>(&mut self) -> SchemaIndex {
        self.register_inner::<T>(ComponentKind::Value, None)
    }

    /// Registers a relation type. Re-registering returns the existing
    /// index.
    pub fn register_relation<T: Relation>(&mut self) -> SchemaIndex {
        self.register_inner::<T>(ComponentKind::Relation, Some(make_relation_store_of::<T>))
    }

    /// Registers a tag type. Re-registering returns the existing index.
    pub fn register_tag<T: Tag>(&mut self) -> TagIndex {
        if let Some(&index) = self.tag_by_type.get(&TypeId::of::<T>()) {
            return index;
        }
        assert!(
            self.tags.len() < TAG_CAPACITY,
            "tag capacity ({TAG_CAPACITY}) exhausted"
        );
        let index = TagIndex(self.tags.len() as u16);
        self.tags.push(TagSchema {
            index,
            name: T::tag_name(),
            type_id: ComponentTypeId::from_name(T::tag_name()),
        });
        self.tag_by_type.insert(TypeId::of::<T>(), index);
        self.tag_by_name.insert(T::tag_name(), index);
        index
    }

    fn register_inner<T: Component>(
        &mut self,
        kind: ComponentKind,
        new_relation: Option<fn() -> Box<dyn RelationColumn>>,
    ) -> SchemaIndex {
        if let Some(&index) = self.component_by_type.get(&TypeId::of::<T>()) {
            return index;
        }
        let item_size = std::mem::size_of::<T>();
        let index = SchemaIndex(self.components.len() as u16);
        self.components.push(ComponentSchema {
            index,
            name: T::type_name(),
            type_id: ComponentTypeId::of::<T>(),
            kind,
            item_size,
            pad: simd_tail_padding(item_size),
            new_column: make_column_of::<T>,
            new_relation,
            validate_json: validate_json_of::<T>,
        });
        self.component_by_type.insert(TypeId::of::<T>(), index);
        self.component_by_name.insert(T::type_name(), index);
        index
    }

    /// Freezes the registrations into a shareable registry.
    #[must_use]
    pub fn build(self) -> Arc<SchemaRegistry> {
        debug!(
            components = self.components.len(),
            tags = self.tags.len(),
            "schema registry frozen"
        );
        Arc::new(SchemaRegistry {
            components: self.components,
            tags: self.tags,
            component_by_type: self.component_by_type,
            component_by_name: self.component_by_name,
            tag_by_type: self.tag_by_type,
            tag_by_name: self.tag_by_name,
        })
    }
}

/// The frozen, read-only type registry shared by every store.
#[derive(Debug)]
pub struct SchemaRegistry {
    components: Vec<ComponentSchema>,
    tags: Vec<TagSchema>,
    component_by_type: HashMap<TypeId, SchemaIndex>,
    component_by_name: HashMap<&'static str, SchemaIndex>,
    tag_by_type: HashMap<TypeId, TagIndex>,
    tag_by_name: HashMap<&'static str, TagIndex>,
}

impl SchemaRegistry {
    /// Index of a registered component or relation type.
    #[must_use]
    pub fn component_index_of<T: Component>(&self) -> Option<SchemaIndex> {
        self.component_by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Index of a registered tag type.
    #[must_use]
    pub fn tag_index_of<T: Tag>(&self) -> Option<TagIndex> {
        self.tag_by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Index of a component type by name.
    #[must_use]
    pub fn component_index_by_name(&self, name: &str) -> Option<SchemaIndex> {
        self.component_by_name.get(name).copied()
    }

    /// Index of a tag type by name.
    #[must_use]
    pub fn tag_index_by_name(&self, name: &str) -> Option<TagIndex> {
        self.tag_by_name.get(name).copied()
    }

    /// Schema entry for a component index.
    #[must_use]
    pub fn schema(&self, index: SchemaIndex) -> &ComponentSchema {
        &self.components[index.0 as usize]
    }

    /// Name of a registered tag.
    #[must_use]
    pub fn tag_name(&self, index: TagIndex) -> &'static str {
        self.tags[index.0 as usize].name
    }

    /// All registered component schemas in index order.
    #[must_use]
    pub fn components(&self) -> &[ComponentSchema] {
        &self.components
    }

    /// All registered tag schemas in index order.
    #[must_use]
    pub fn tags(&self) -> &[TagSchema] {
        &self.tags
    }
}
