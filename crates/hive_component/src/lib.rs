//! # hive_component
//!
//! Storage primitives for the hive entity store — defines what a component
//! is, how component data is laid out in memory, and how component types are
//! described at runtime.
//!
//! This crate provides:
//!
//! - [`Component`] / [`Tag`] / [`Relation`] / [`Script`] traits — the
//!   contracts all entity data must satisfy.
//! - [`Entity`] — lightweight `u64` entity identifiers.
//! - [`EntityAllocator`] — ID allocator with free-list recycling.
//! - [`SchemaRegistry`] — per-type metadata and vtables, frozen at startup.
//! - [`ChunkedColumn`] — fixed-chunk columnar storage with SIMD tail padding.
//! - [`Archetype`] — SoA storage grouped by component-and-tag signature.
//! - [`QueryFilter`] — declarative tag and component constraints.
//! - [`RelationStore`] — run-contiguous multi-instance relation storage.

pub mod archetype;
pub mod component;
pub mod entity;
pub mod query;
pub mod relation;
pub mod schema;
pub mod storage;

pub use archetype::{Archetype, ArchetypeId, Signature, move_row};
pub use component::{Component, ComponentTypeId, Relation, Script, Tag, UniqueName};
pub use entity::{Entity, EntityAllocator};
pub use query::QueryFilter;
pub use relation::{RelationColumn, RelationStore};
pub use schema::{
    ComponentKind, ComponentSchema, SchemaIndex, SchemaRegistry, SchemaRegistryBuilder, TagIndex,
    TagSet,
};
pub use storage::{CHUNK_SIZE, ChunkedColumn, ColumnStorage};
