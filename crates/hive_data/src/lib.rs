//! External entity exchange: a JSON record format for moving entities in
//! and out of an [`hive_ecs::EntityStore`].
//!
//! A file is a JSON array of records. Each record carries an `id` used
//! only to wire up parent and child references *within* the file; on
//! import, entities receive fresh store-assigned IDs and persistent IDs.
//! Import is tolerant: a bad record is reported and skipped, the rest of
//! the file still lands.

pub mod data_entity;
pub mod error;
pub mod exchange;

pub use data_entity::DataEntity;
pub use error::DataError;
pub use exchange::{
    add_data_entities_to, add_json_to, export_data_entities, export_json, parse_data_entities,
};
