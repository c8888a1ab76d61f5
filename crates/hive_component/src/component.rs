//! Core data traits and the string-derived component type identity.
//!
//! Four kinds of entity data exist:
//!
//! - [`Component`] — a plain value stored in a column, at most one instance
//!   per entity.
//! - [`Tag`] — a zero-size marker. Tags occupy no storage; they live purely
//!   in the archetype signature.
//! - [`Relation`] — a component that may have **multiple** instances per
//!   entity and points at a target entity.
//! - [`Script`] — a polymorphic behaviour object attached by reference.
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm, so the identity is deterministic and
//! independent of compilation order.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// A unique identifier for a component or tag type, derived from its string
/// name using the FNV-1a 64-bit hash algorithm.
///
/// The ID is deterministic: any two builds that register a type under the
/// same UTF-8 name produce the same `ComponentTypeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a type's string name using the
    /// FNV-1a 64-bit hash algorithm.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::from_name(T::type_name())
    }
}

/// The core value-component trait.
///
/// Components are stored inline in chunked columns, so they must be
/// `Default` (columns are default-initialised) and `Clone` (entities can be
/// duplicated). Serde bounds allow components to cross the JSON data
/// exchange boundary by name.
///
/// # Examples
///
/// ```rust
/// use serde::{Serialize, Deserialize};
/// use hive_component::Component;
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component:
    Default + Clone + Send + Sync + 'static + Serialize + for<'de> Deserialize<'de>
{
    /// A human-readable name for this component type.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }
}

/// A zero-size marker type. Tags have no column; their presence is recorded
/// only in the archetype signature, so adding or removing one is a pure
/// structural move.
pub trait Tag: Send + Sync + 'static {
    /// A human-readable name for this tag type.
    fn tag_name() -> &'static str;
}

/// A multi-instance component pointing at a target entity.
///
/// Relations do not live in archetype columns; each relation type has its
/// own [`RelationStore`](crate::relation::RelationStore) keeping every
/// owner's instances in one contiguous run.
pub trait Relation: Component {
    /// The entity this relation instance points at, if any.
    fn target(&self) -> Entity;
}

/// A polymorphic behaviour object attached to an entity by reference.
///
/// Scripts are shared `Rc<RefCell<..>>` handles, which makes any store
/// holding them single-threaded by construction. The same handle cannot be
/// attached twice; duplication goes through [`Script::duplicate`] so cloned
/// entities get independent script state.
pub trait Script: 'static {
    /// A human-readable name for this script, used in diagnostics.
    fn script_name(&self) -> &'static str;

    /// Produce an independent copy of this script's state.
    fn duplicate(&self) -> Rc<RefCell<dyn Script>>;
}

/// Built-in component giving an entity a name intended to be unique.
///
/// Uniqueness is not enforced at write time; the lookup reports ambiguity
/// instead, so transient duplicates (e.g. mid-clone) are representable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueName {
    /// The name to look the entity up by.
    pub name: String,
}

impl UniqueName {
    /// Convenience constructor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Component for UniqueName {
    fn type_name() -> &'static str {
        "UniqueName"
    }
}
