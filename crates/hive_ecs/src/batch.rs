//! Batched structural mutation: many component and tag edits, one move.
//!
//! Adding or removing a component one call at a time moves the entity
//! between archetypes once per call. An [`EntityBatch`] queues the edits,
//! consolidates them so the last write per component or tag wins, and
//! commits with a single archetype move. Events and index maintenance fire
//! only after commit, describing the net effect of the batch.

use std::any::Any;

use hive_component::{Component, Entity, SchemaIndex, Tag, TagIndex};

use crate::error::StoreError;
use crate::events::{ChangeEvent, ChangeKind};
use crate::world::EntityStore;

enum BatchOp {
    SetComponent { index: SchemaIndex, value: Box<dyn Any> },
    RemoveComponent(SchemaIndex),
    AddTag(TagIndex),
    RemoveTag(TagIndex),
}

enum ComponentOp {
    Set(Box<dyn Any>),
    Remove,
}

/// A queue of pending edits against one entity. Dropped without
/// [`EntityBatch::apply`], it changes nothing.
pub struct EntityBatch<'a> {
    store: &'a mut EntityStore,
    entity: Entity,
    ops: Vec<BatchOp>,
}

impl<'a> EntityBatch<'a> {
    /// Queues a component write. Applied to an entity that already carries
    /// the type, it overwrites the value in place.
    pub fn add_component<T: Component>(&mut self, value: T) -> Result<&mut Self, StoreError> {
        let index = self.store.value_component_index::<T>()?;
        self.ops.push(BatchOp::SetComponent {
            index,
            value: Box::new(value),
        });
        Ok(self)
    }

    /// Queues a component removal. Removing an absent component is a no-op
    /// at commit.
    pub fn remove_component<T: Component>(&mut self) -> Result<&mut Self, StoreError> {
        let index = self.store.value_component_index::<T>()?;
        self.ops.push(BatchOp::RemoveComponent(index));
        Ok(self)
    }

    /// Queues a tag addition.
    pub fn add_tag<T: Tag>(&mut self) -> Result<&mut Self, StoreError> {
        let tag = self.store.tag_index::<T>()?;
        self.ops.push(BatchOp::AddTag(tag));
        Ok(self)
    }

    /// Queues a tag removal.
    pub fn remove_tag<T: Tag>(&mut self) -> Result<&mut Self, StoreError> {
        let tag = self.store.tag_index::<T>()?;
        self.ops.push(BatchOp::RemoveTag(tag));
        Ok(self)
    }

    /// Commits the queued edits with at most one archetype move.
    ///
    /// Edits are consolidated first: for each component or tag touched more
    /// than once, only the last edit survives, at the position of the first
    /// touch. Listeners then see one `TagsChanged` (when the tag set
    /// differs) followed by one event per surviving component edit.
    pub fn apply(self) -> Result<(), StoreError> {
        let EntityBatch { store, entity, ops } = self;
        let (archetype, _) = store.location(entity)?;
        let old_signature = store.archetypes()[archetype].signature().clone();

        // Last edit per component or tag wins, keeping first-touch order.
        let mut components: Vec<(SchemaIndex, ComponentOp)> = Vec::new();
        let mut tags: Vec<(TagIndex, bool)> = Vec::new();
        for op in ops {
            match op {
                BatchOp::SetComponent { index, value } => {
                    upsert(&mut components, index, ComponentOp::Set(value));
                }
                BatchOp::RemoveComponent(index) => {
                    upsert(&mut components, index, ComponentOp::Remove);
                }
                BatchOp::AddTag(tag) => upsert(&mut tags, tag, true),
                BatchOp::RemoveTag(tag) => upsert(&mut tags, tag, false),
            }
        }

        let mut signature = old_signature.clone();
        for (index, op) in &components {
            signature = match op {
                ComponentOp::Set(_) => signature.with_component(*index),
                ComponentOp::Remove => signature.without_component(*index),
            };
        }
        for (tag, add) in &tags {
            signature = if *add {
                signature.with_tag(*tag)
            } else {
                signature.without_tag(*tag)
            };
        }

        // Old values of indexed components, captured before the move.
        let mut old_values: Vec<Option<Box<dyn Any>>> = Vec::with_capacity(components.len());
        for (index, _) in &components {
            if old_signature.contains_component(*index) && store.indices.contains_key(index) {
                old_values.push(Some(store.boxed_value(*index, entity)));
            } else {
                old_values.push(None);
            }
        }

        store.move_entity(entity, signature.clone())?;

        if old_signature.tags() != signature.tags() {
            store.emit(ChangeEvent::TagsChanged {
                entity,
                old: *old_signature.tags(),
                new: *signature.tags(),
            });
        }

        for ((index, op), old) in components.into_iter().zip(old_values) {
            let present_before = old_signature.contains_component(index);
            match op {
                ComponentOp::Set(value) => {
                    let (archetype, row) = store.location(entity)?;
                    let column = store
                        .archetype_mut(archetype)
                        .column_mut(index)
                        .expect("column present after move");
                    let stored = column.set_boxed(row, value);
                    assert!(stored, "batched value matches its column type");
                    let kind = if present_before {
                        if let Some(old) = old {
                            store.index_updated(index, entity, old);
                        }
                        ChangeKind::Updated
                    } else {
                        store.index_added(index, entity);
                        ChangeKind::Added
                    };
                    store.emit(ChangeEvent::Component {
                        entity,
                        component: index,
                        kind,
                    });
                }
                ComponentOp::Remove => {
                    if present_before {
                        if let Some(old) = old {
                            store.index_removed(index, entity, old);
                        }
                        store.emit(ChangeEvent::Component {
                            entity,
                            component: index,
                            kind: ChangeKind::Removed,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn upsert<K: PartialEq, V>(slots: &mut Vec<(K, V)>, key: K, value: V) {
    if let Some(slot) = slots.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        slots.push((key, value));
    }
}

impl EntityStore {
    /// Opens a batch of edits against a live entity.
    pub fn batch(&mut self, entity: Entity) -> Result<EntityBatch<'_>, StoreError> {
        self.location(entity)?;
        Ok(EntityBatch {
            store: self,
            entity,
            ops: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use hive_component::SchemaRegistryBuilder;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::index::Indexed;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    impl Component for Velocity {
        fn type_name() -> &'static str {
            "Velocity"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Score {
        points: i64,
    }

    impl Component for Score {
        fn type_name() -> &'static str {
            "Score"
        }
    }

    impl Indexed for Score {
        type Key = i64;

        fn key(&self) -> i64 {
            self.points
        }
    }

    struct Frozen;

    impl Tag for Frozen {
        fn tag_name() -> &'static str {
            "Frozen"
        }
    }

    struct Hidden;

    impl Tag for Hidden {
        fn tag_name() -> &'static str {
            "Hidden"
        }
    }

    fn store() -> EntityStore {
        let mut builder = SchemaRegistryBuilder::new();
        builder.register_component::<Position>();
        builder.register_component::<Velocity>();
        builder.register_component::<Score>();
        builder.register_tag::<Frozen>();
        builder.register_tag::<Hidden>();
        EntityStore::new(builder.build())
    }

    fn recorded_events(store: &mut EntityStore) -> Rc<RefCell<Vec<ChangeEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        store.on_change(move |event| sink.borrow_mut().push(*event));
        events
    }

    #[test]
    fn test_batch_commits_every_edit() {
        let mut store = store();
        let e = store.create_entity();
        store.add_component(e, Position { x: 1.0, y: 1.0 }).unwrap();

        let mut batch = store.batch(e).unwrap();
        batch.add_component(Velocity { dx: 3.0, dy: 0.0 }).unwrap();
        batch.add_tag::<Frozen>().unwrap();
        batch.add_component(Position { x: 2.0, y: 2.0 }).unwrap();
        batch.apply().unwrap();

        assert_eq!(
            store.get_component::<Position>(e),
            Some(Position { x: 2.0, y: 2.0 })
        );
        assert_eq!(
            store.get_component::<Velocity>(e),
            Some(Velocity { dx: 3.0, dy: 0.0 })
        );
        assert!(store.has_tag::<Frozen>(e));
    }

    #[test]
    fn test_batch_fires_tags_changed_then_component_events() {
        let mut store = store();
        let e = store.create_entity();
        store.add_component(e, Position::default()).unwrap();
        let events = recorded_events(&mut store);

        let mut batch = store.batch(e).unwrap();
        batch.add_component(Velocity::default()).unwrap();
        batch.add_tag::<Frozen>().unwrap();
        batch.add_component(Position { x: 5.0, y: 0.0 }).unwrap();
        batch.remove_tag::<Hidden>().unwrap();
        batch.apply().unwrap();

        let velocity = store.component_index::<Velocity>().unwrap();
        let position = store.component_index::<Position>().unwrap();
        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ChangeEvent::TagsChanged { .. }));
        assert_eq!(
            events[1],
            ChangeEvent::Component {
                entity: e,
                component: velocity,
                kind: ChangeKind::Added,
            }
        );
        assert_eq!(
            events[2],
            ChangeEvent::Component {
                entity: e,
                component: position,
                kind: ChangeKind::Updated,
            }
        );
    }

    #[test]
    fn test_last_edit_per_component_wins() {
        let mut store = store();
        let e = store.create_entity();
        let events = recorded_events(&mut store);

        let mut batch = store.batch(e).unwrap();
        batch.add_component(Position { x: 1.0, y: 0.0 }).unwrap();
        batch.add_component(Position { x: 2.0, y: 0.0 }).unwrap();
        batch.apply().unwrap();

        assert_eq!(
            store.get_component::<Position>(e),
            Some(Position { x: 2.0, y: 0.0 })
        );
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_add_then_remove_cancels_out() {
        let mut store = store();
        let e = store.create_entity();
        store.add_component(e, Position::default()).unwrap();
        let before = store.archetype_id_of(e);
        let events = recorded_events(&mut store);

        let mut batch = store.batch(e).unwrap();
        batch.add_component(Velocity::default()).unwrap();
        batch.remove_component::<Velocity>().unwrap();
        batch.apply().unwrap();

        assert!(!store.has_component::<Velocity>(e));
        assert_eq!(store.archetype_id_of(e), before);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_batch_maintains_indices() {
        let mut store = store();
        let e = store.create_entity();
        store.add_component(e, Score { points: 100 }).unwrap();
        store.create_index::<Score>().unwrap();

        let mut batch = store.batch(e).unwrap();
        batch.add_component(Score { points: 200 }).unwrap();
        batch.add_tag::<Frozen>().unwrap();
        batch.apply().unwrap();

        assert!(store.lookup_index::<Score>(&100).unwrap().is_empty());
        assert_eq!(store.lookup_index::<Score>(&200).unwrap(), &[e]);
    }

    #[test]
    fn test_batch_rejects_dead_entity() {
        let mut store = store();
        let e = store.create_entity();
        store.delete_entity(e).unwrap();
        let err = store.batch(e).err().unwrap();
        assert!(matches!(err, StoreError::EntityNotFound(_)));
    }
}
