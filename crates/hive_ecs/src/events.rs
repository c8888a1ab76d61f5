//! Change notifications fired after structural mutations commit.

use hive_component::{Entity, SchemaIndex, TagSet};

/// How a component's presence or value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The component was not present before.
    Added,
    /// The component is no longer present.
    Removed,
    /// The component was present and only its value was rewritten.
    Updated,
}

/// A single committed change. Listeners observe the store *after* the
/// mutation, so reads from inside a listener see the new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A component was added to, removed from, or rewritten on an entity.
    Component {
        entity: Entity,
        component: SchemaIndex,
        kind: ChangeKind,
    },
    /// The entity's tag set changed. Fired once per structural mutation
    /// regardless of how many tags moved.
    TagsChanged {
        entity: Entity,
        old: TagSet,
        new: TagSet,
    },
}

/// Boxed change listener, invoked in registration order.
pub type ChangeListener = Box<dyn FnMut(&ChangeEvent)>;
