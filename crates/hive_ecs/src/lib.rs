//! # hive_ecs
//!
//! The entity store: archetype-grouped entities with structural mutation,
//! change notifications, batch mutation, typed queries, relation queries,
//! and secondary value indices.
//!
//! This crate provides:
//!
//! - [`EntityStore`] — entity lifecycle, components, tags, scripts,
//!   relations, parent/child links, and persistent-ID lookup.
//! - [`EntityBatch`] — several mutations of one entity applied as a single
//!   structural move with consolidated notifications.
//! - [`Query1`]..[`Query5`] — statically-typed chunk-wise enumeration with
//!   tag and component filters.
//! - [`RelationQuery`] — flattened enumeration of every relation instance,
//!   filtered by owner tags.
//! - [`Indexed`] — opt-in secondary indices with exact-match and ordered
//!   range lookup.

pub mod batch;
pub mod error;
pub mod events;
pub mod index;
pub mod query;
pub mod world;

pub use batch::EntityBatch;
pub use error::StoreError;
pub use events::{ChangeEvent, ChangeKind};
pub use index::{HashValueIndex, Indexed, OrderedValueIndex};
pub use query::{Query1, Query2, Query3, Query4, Query5, RelationQuery};
pub use world::{EntityStore, PidPolicy};
