//! Entity store error types.

use thiserror::Error;

/// Errors reported by [`EntityStore`](crate::world::EntityStore)
/// operations.
///
/// Plain lookup misses are not errors — they come back as `Option` or
/// `bool`. These variants cover contract violations and data problems,
/// with stable message text.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An explicit entity ID collided with a live entity.
    #[error("entity id {0} already in use")]
    DuplicateId(u64),

    /// The entity does not exist or has been deleted.
    #[error("entity {0} not found")]
    EntityNotFound(u64),

    /// The component type was never registered with the schema.
    #[error("component type `{0}` is not registered")]
    UnknownComponent(String),

    /// The tag type was never registered with the schema.
    #[error("tag type `{0}` is not registered")]
    UnknownTag(String),

    /// No entity carries the requested unique name.
    #[error("unique entity `{0}` not found")]
    UniqueEntityNotFound(String),

    /// More than one entity carries the requested unique name.
    #[error("unique entity `{name}` is ambiguous ({count} matches)")]
    UniqueEntityAmbiguous { name: String, count: usize },

    /// A component payload failed to deserialise.
    #[error("invalid component data for `{name}`: {message}")]
    InvalidComponentData { name: String, message: String },

    /// The operation violates a store contract.
    #[error("{0}")]
    InvalidOperation(String),
}
