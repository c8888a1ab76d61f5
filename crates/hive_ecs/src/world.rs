//! The entity store.
//!
//! An [`EntityStore`] owns a set of archetypes, a node table mapping every
//! entity ID to its archetype and row, and the side structures that do not
//! live in columns: scripts, relation stores, secondary indices, the
//! persistent-ID map, and parent/child links.
//!
//! All structural mutation — any change to an entity's component set or tag
//! set — funnels through [`move_entity`](EntityStore), which performs one
//! column-wise move, swap-removes the vacated row, and re-points the node
//! of whichever entity got swapped into the hole. Change listeners fire
//! only after the move has committed.
//!
//! Scripts are `Rc<RefCell<..>>` handles, so a store is single-threaded by
//! construction. The frozen [`SchemaRegistry`] it is built from can be
//! shared by any number of stores across threads.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use hive_component::{
    Archetype, ArchetypeId, ComponentKind, Entity, EntityAllocator, RelationColumn,
    RelationStore, SchemaIndex, SchemaRegistry, Signature, TagIndex, UniqueName, move_row,
};
use hive_component::{Component, Relation, Script, Tag};

use crate::error::StoreError;
use crate::events::{ChangeEvent, ChangeKind, ChangeListener};
use crate::index::AnyIndex;

/// How freshly created entities receive their persistent ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidPolicy {
    /// The persistent ID equals the entity ID.
    #[default]
    EqualsId,
    /// A random positive ID, retried on collision.
    Random,
}

/// Per-entity bookkeeping. Presence in the node map means the entity is
/// alive; sparse explicit IDs cost one map entry each.
#[derive(Debug)]
pub(crate) struct EntityNode {
    pub(crate) archetype: usize,
    pub(crate) row: usize,
    pub(crate) pid: i64,
    pub(crate) parent: Entity,
    pub(crate) children: Vec<Entity>,
}

/// The in-memory entity store.
pub struct EntityStore {
    registry: Arc<SchemaRegistry>,
    nodes: HashMap<u64, EntityNode>,
    allocator: EntityAllocator,
    archetypes: Vec<Archetype>,
    archetype_lookup: HashMap<ArchetypeId, Vec<usize>>,
    empty_archetype: usize,
    live: usize,
    pids: HashMap<i64, Entity>,
    pid_policy: PidPolicy,
    rng: StdRng,
    scripts: HashMap<Entity, Vec<Rc<RefCell<dyn Script>>>>,
    relations: HashMap<SchemaIndex, Box<dyn RelationColumn>>,
    pub(crate) indices: HashMap<SchemaIndex, Box<dyn AnyIndex>>,
    listeners: Vec<ChangeListener>,
}

impl EntityStore {
    /// Creates an empty store over a frozen schema.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let mut store = Self {
            registry,
            nodes: HashMap::new(),
            allocator: EntityAllocator::new(),
            archetypes: Vec::new(),
            archetype_lookup: HashMap::new(),
            empty_archetype: 0,
            live: 0,
            pids: HashMap::new(),
            pid_policy: PidPolicy::default(),
            rng: StdRng::from_entropy(),
            scripts: HashMap::new(),
            relations: HashMap::new(),
            indices: HashMap::new(),
            listeners: Vec::new(),
        };
        store.empty_archetype = store.archetype_index(Signature::empty());
        store
    }

    /// The schema this store was built from.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Changes how future entities receive their persistent ID.
    pub fn set_pid_policy(&mut self, policy: PidPolicy) {
        self.pid_policy = policy;
    }

    /// Reseeds the random persistent-ID generator, for reproducible runs.
    pub fn seed_pid_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.live
    }

    /// Number of archetypes created so far.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Whether the entity exists and is alive.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.location(entity).is_ok()
    }

    /// Registers a change listener. Listeners run in registration order
    /// after each mutation commits.
    pub fn on_change(&mut self, listener: impl FnMut(&ChangeEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ---- entity lifecycle ------------------------------------------------

    /// Creates an entity with no components and no tags.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.admit(entity);
        entity
    }

    /// Creates an entity under an explicit ID.
    pub fn create_entity_with_id(&mut self, id: u64) -> Result<Entity, StoreError> {
        if !self.allocator.reserve(id) {
            return Err(StoreError::DuplicateId(id));
        }
        let entity = Entity(id);
        self.admit(entity);
        Ok(entity)
    }

    fn admit(&mut self, entity: Entity) {
        let archetype = self.empty_archetype;
        let row = self.archetypes[archetype].push_entity(entity);
        self.nodes.insert(
            entity.0,
            EntityNode {
                archetype,
                row,
                pid: 0,
                parent: Entity::INVALID,
                children: Vec::new(),
            },
        );
        self.live += 1;
        self.assign_pid(entity);
    }

    fn assign_pid(&mut self, entity: Entity) {
        let pid = match self.pid_policy {
            PidPolicy::EqualsId => entity.0 as i64,
            PidPolicy::Random => loop {
                let candidate = self.rng.gen_range(1..=i64::MAX);
                if !self.pids.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        self.node_mut(entity).pid = pid;
        self.pids.insert(pid, entity);
    }

    /// Deletes an entity, releasing its row, relations, scripts, index
    /// entries, and persistent ID. Children are detached, not deleted.
    pub fn delete_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        let (archetype, row) = self.location(entity)?;

        let components: Vec<SchemaIndex> =
            self.archetypes[archetype].signature().components().to_vec();
        for index in components {
            if self.indices.contains_key(&index) {
                let old = self.boxed_value(index, entity);
                self.index_removed(index, entity, old);
            }
        }
        for column in self.relations.values_mut() {
            column.remove_all(entity);
        }
        self.scripts.remove(&entity);

        let node = self
            .nodes
            .remove(&entity.0)
            .expect("node exists for a live entity");
        if node.pid != 0 {
            self.pids.remove(&node.pid);
        }
        if node.parent.is_valid() {
            if let Some(parent_node) = self.nodes.get_mut(&node.parent.0) {
                parent_node.children.retain(|c| *c != entity);
            }
        }
        for child in node.children {
            if let Some(child_node) = self.nodes.get_mut(&child.0) {
                child_node.parent = Entity::INVALID;
            }
        }

        if let Some(swapped) = self.archetypes[archetype].swap_remove_row(row) {
            self.node_mut(swapped).row = row;
        }
        self.allocator.release(entity);
        self.live -= 1;
        trace!(entity = entity.0, "entity deleted");
        Ok(())
    }

    /// Duplicates an entity: component values, tags, relations, and scripts
    /// are copied; parent/child links are not. The clone receives its own
    /// persistent ID.
    pub fn clone_entity(&mut self, source: Entity) -> Result<Entity, StoreError> {
        let (archetype, row) = self.location(source)?;
        let clone = self.allocator.allocate();
        let new_row = self.archetypes[archetype].clone_row(row, clone);
        self.nodes.insert(
            clone.0,
            EntityNode {
                archetype,
                row: new_row,
                pid: 0,
                parent: Entity::INVALID,
                children: Vec::new(),
            },
        );
        self.live += 1;
        self.assign_pid(clone);

        for column in self.relations.values_mut() {
            column.clone_owner(source, clone);
        }
        if let Some(list) = self.scripts.get(&source) {
            let duplicates: Vec<Rc<RefCell<dyn Script>>> =
                list.iter().map(|s| s.borrow().duplicate()).collect();
            self.scripts.insert(clone, duplicates);
        }
        let components: Vec<SchemaIndex> =
            self.archetypes[archetype].signature().components().to_vec();
        for index in components {
            self.index_added(index, clone);
        }
        Ok(clone)
    }

    /// Duplicates an entity and, recursively, its children, reproducing the
    /// child structure on the clones.
    pub fn clone_entity_tree(&mut self, source: Entity) -> Result<Entity, StoreError> {
        let root = self.clone_entity(source)?;
        let children = self.children_of(source).to_vec();
        for child in children {
            let cloned_child = self.clone_entity_tree(child)?;
            self.add_child(root, cloned_child)?;
        }
        Ok(root)
    }

    // ---- components ------------------------------------------------------

    /// Adds a component, or silently overwrites the current value when the
    /// entity already carries one (an `Updated` notification instead of
    /// `Added`).
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), StoreError> {
        let index = self.value_component_index::<T>()?;
        let (archetype, row) = self.location(entity)?;
        let present = self.archetypes[archetype].signature().contains_component(index);
        if present {
            let old = if self.indices.contains_key(&index) {
                Some(self.boxed_value(index, entity))
            } else {
                None
            };
            let column = self.archetypes[archetype]
                .column_as_mut::<T>(index)
                .expect("column present in signature");
            column[row] = value;
            if let Some(old) = old {
                self.index_updated(index, entity, old);
            }
            self.emit(ChangeEvent::Component {
                entity,
                component: index,
                kind: ChangeKind::Updated,
            });
        } else {
            let signature = self.archetypes[archetype].signature().with_component(index);
            self.move_entity(entity, signature)?;
            let (archetype, row) = self.location(entity)?;
            let column = self.archetypes[archetype]
                .column_as_mut::<T>(index)
                .expect("column present in signature");
            column[row] = value;
            self.index_added(index, entity);
            self.emit(ChangeEvent::Component {
                entity,
                component: index,
                kind: ChangeKind::Added,
            });
        }
        Ok(())
    }

    /// Removes a component. Returns `false` when the entity did not carry
    /// it.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool, StoreError> {
        let index = self.value_component_index::<T>()?;
        let (archetype, _) = self.location(entity)?;
        if !self.archetypes[archetype].signature().contains_component(index) {
            return Ok(false);
        }
        let old = if self.indices.contains_key(&index) {
            Some(self.boxed_value(index, entity))
        } else {
            None
        };
        let signature = self.archetypes[archetype].signature().without_component(index);
        self.move_entity(entity, signature)?;
        if let Some(old) = old {
            self.index_removed(index, entity, old);
        }
        self.emit(ChangeEvent::Component {
            entity,
            component: index,
            kind: ChangeKind::Removed,
        });
        Ok(true)
    }

    /// Whether the entity carries the component.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.component_ref::<T>(entity).is_some()
    }

    /// Borrows the entity's component value.
    #[must_use]
    pub fn component_ref<T: Component>(&self, entity: Entity) -> Option<&T> {
        let index = self.registry.component_index_of::<T>()?;
        let (archetype, row) = self.location(entity).ok()?;
        self.archetypes[archetype].column_as::<T>(index)?.get(row)
    }

    /// Clones the entity's component value out.
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<T> {
        self.component_ref(entity).cloned()
    }

    // ---- tags ------------------------------------------------------------

    /// Adds a tag. Returns `false` when it was already set.
    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> Result<bool, StoreError> {
        let tag = self.tag_index::<T>()?;
        self.add_tag_index(entity, tag)
    }

    /// Adds a tag resolved by name, for data-driven callers.
    pub fn add_tag_by_name(&mut self, entity: Entity, name: &str) -> Result<bool, StoreError> {
        let tag = self
            .registry
            .tag_index_by_name(name)
            .ok_or_else(|| StoreError::UnknownTag(name.to_string()))?;
        self.add_tag_index(entity, tag)
    }

    fn add_tag_index(&mut self, entity: Entity, tag: TagIndex) -> Result<bool, StoreError> {
        let (archetype, _) = self.location(entity)?;
        let old = *self.archetypes[archetype].signature().tags();
        if old.contains(tag) {
            return Ok(false);
        }
        let signature = self.archetypes[archetype].signature().with_tag(tag);
        let new = *signature.tags();
        self.move_entity(entity, signature)?;
        self.emit(ChangeEvent::TagsChanged { entity, old, new });
        Ok(true)
    }

    /// Removes a tag. Returns `false` when it was not set.
    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> Result<bool, StoreError> {
        let tag = self.tag_index::<T>()?;
        let (archetype, _) = self.location(entity)?;
        let old = *self.archetypes[archetype].signature().tags();
        if !old.contains(tag) {
            return Ok(false);
        }
        let signature = self.archetypes[archetype].signature().without_tag(tag);
        let new = *signature.tags();
        self.move_entity(entity, signature)?;
        self.emit(ChangeEvent::TagsChanged { entity, old, new });
        Ok(true)
    }

    /// Whether the entity carries the tag.
    #[must_use]
    pub fn has_tag<T: Tag>(&self, entity: Entity) -> bool {
        let Some(tag) = self.registry.tag_index_of::<T>() else {
            return false;
        };
        let Ok((archetype, _)) = self.location(entity) else {
            return false;
        };
        self.archetypes[archetype].signature().tags().contains(tag)
    }

    /// Names of every tag set on the entity, in tag-index order.
    #[must_use]
    pub fn tag_names_of(&self, entity: Entity) -> Vec<&'static str> {
        let Ok((archetype, _)) = self.location(entity) else {
            return Vec::new();
        };
        self.archetypes[archetype]
            .signature()
            .tags()
            .iter()
            .map(|t| self.registry.tag_name(t))
            .collect()
    }

    // ---- signatures and archetypes ---------------------------------------

    /// The entity's current signature.
    #[must_use]
    pub fn signature_of(&self, entity: Entity) -> Option<&Signature> {
        let (archetype, _) = self.location(entity).ok()?;
        Some(self.archetypes[archetype].signature())
    }

    /// The identifier of the entity's current archetype. Entities with
    /// structurally equal signatures share one archetype, so their IDs
    /// compare equal.
    #[must_use]
    pub fn archetype_id_of(&self, entity: Entity) -> Option<ArchetypeId> {
        let (archetype, _) = self.location(entity).ok()?;
        Some(self.archetypes[archetype].id())
    }

    // ---- unique names and persistent IDs ---------------------------------

    /// Finds the single entity whose [`UniqueName`] equals `name`.
    pub fn get_unique_entity(&self, name: &str) -> Result<Entity, StoreError> {
        let index = self
            .registry
            .component_index_of::<UniqueName>()
            .ok_or_else(|| StoreError::UnknownComponent("UniqueName".into()))?;
        let mut found = Entity::INVALID;
        let mut count = 0usize;
        for archetype in &self.archetypes {
            let Some(column) = archetype.column_as::<UniqueName>(index) else {
                continue;
            };
            for chunk_index in 0..column.chunk_count() {
                let names = column.chunk(chunk_index);
                let ids = archetype.entities().chunk(chunk_index);
                for (i, unique) in names.iter().enumerate() {
                    if unique.name == name {
                        found = ids[i];
                        count += 1;
                    }
                }
            }
        }
        match count {
            0 => Err(StoreError::UniqueEntityNotFound(name.to_string())),
            1 => Ok(found),
            _ => Err(StoreError::UniqueEntityAmbiguous {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Resolves a persistent ID. Non-positive IDs never match.
    #[must_use]
    pub fn entity_by_pid(&self, pid: i64) -> Option<Entity> {
        if pid <= 0 {
            return None;
        }
        self.pids.get(&pid).copied()
    }

    /// The entity's persistent ID.
    #[must_use]
    pub fn pid_of(&self, entity: Entity) -> Option<i64> {
        let node = self.nodes.get(&entity.0)?;
        if node.pid != 0 { Some(node.pid) } else { None }
    }

    // ---- tree links ------------------------------------------------------

    /// Appends `child` to `parent`'s ordered child list, detaching it from
    /// any previous parent.
    pub fn add_child(&mut self, parent: Entity, child: Entity) -> Result<(), StoreError> {
        if parent == child {
            return Err(StoreError::InvalidOperation(
                "entity cannot be its own child".into(),
            ));
        }
        self.location(parent)?;
        self.location(child)?;
        let old_parent = self.node_mut(child).parent;
        if old_parent == parent {
            return Ok(());
        }
        if old_parent.is_valid() {
            self.node_mut(old_parent).children.retain(|c| *c != child);
        }
        self.node_mut(child).parent = parent;
        self.node_mut(parent).children.push(child);
        Ok(())
    }

    /// Detaches `child` from `parent`. Returns `false` when it was not a
    /// child of `parent`.
    pub fn remove_child(&mut self, parent: Entity, child: Entity) -> Result<bool, StoreError> {
        self.location(parent)?;
        self.location(child)?;
        if self.node_mut(child).parent != parent {
            return Ok(false);
        }
        self.node_mut(child).parent = Entity::INVALID;
        self.node_mut(parent).children.retain(|c| *c != child);
        Ok(true)
    }

    /// The entity's parent, if attached to one.
    #[must_use]
    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        let parent = self.nodes.get(&entity.0)?.parent;
        if parent.is_valid() { Some(parent) } else { None }
    }

    /// The entity's children in attachment order. Empty for unknown
    /// entities.
    #[must_use]
    pub fn children_of(&self, entity: Entity) -> &[Entity] {
        match self.nodes.get(&entity.0) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    // ---- scripts ---------------------------------------------------------

    /// Attaches a script handle. Attaching the same handle twice, to any
    /// entity, is an error.
    pub fn attach_script(
        &mut self,
        entity: Entity,
        script: Rc<RefCell<dyn Script>>,
    ) -> Result<(), StoreError> {
        self.location(entity)?;
        let new_ptr = Rc::as_ptr(&script).cast::<()>();
        for list in self.scripts.values() {
            if list.iter().any(|s| Rc::as_ptr(s).cast::<()>() == new_ptr) {
                return Err(StoreError::InvalidOperation(
                    "component already added to an entity".into(),
                ));
            }
        }
        self.scripts.entry(entity).or_default().push(script);
        Ok(())
    }

    /// The scripts attached to an entity, in attachment order.
    #[must_use]
    pub fn scripts_of(&self, entity: Entity) -> &[Rc<RefCell<dyn Script>>] {
        self.scripts.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Detaches every script from an entity, returning how many there were.
    pub fn detach_scripts(&mut self, entity: Entity) -> usize {
        self.scripts.remove(&entity).map_or(0, |list| list.len())
    }

    // ---- relations -------------------------------------------------------

    /// Appends a relation instance to the entity's run.
    pub fn add_relation<T: Relation>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), StoreError> {
        let index = self.component_index::<T>()?;
        let registry = Arc::clone(&self.registry);
        let schema = registry.schema(index);
        if schema.kind != ComponentKind::Relation {
            return Err(StoreError::InvalidOperation(
                "component is not a relation".into(),
            ));
        }
        self.location(entity)?;
        let column = self.relations.entry(index).or_insert_with(|| {
            schema
                .make_relation_store()
                .expect("relation schema provides a store")
        });
        column
            .as_any_mut()
            .downcast_mut::<RelationStore<T>>()
            .expect("registered relation type")
            .add(entity, value);
        Ok(())
    }

    /// Every relation instance owned by the entity, as one contiguous
    /// slice. Empty when there are none.
    #[must_use]
    pub fn relations_of<T: Relation>(&self, entity: Entity) -> &[T] {
        let Some(index) = self.registry.component_index_of::<T>() else {
            return &[];
        };
        let Some(column) = self.relations.get(&index) else {
            return &[];
        };
        column
            .as_any()
            .downcast_ref::<RelationStore<T>>()
            .map(|store| store.relations_of(entity))
            .unwrap_or(&[])
    }

    /// Removes every instance of one relation type from the entity,
    /// returning how many were dropped.
    pub fn remove_relations<T: Relation>(&mut self, entity: Entity) -> Result<usize, StoreError> {
        let index = self.component_index::<T>()?;
        self.location(entity)?;
        Ok(self
            .relations
            .get_mut(&index)
            .map_or(0, |column| column.remove_all(entity)))
    }

    // ---- JSON component access (data exchange) ---------------------------

    /// Sets a component from a JSON payload, resolving the type by name.
    /// The payload is validated before any structural change happens.
    pub fn add_component_json(
        &mut self,
        entity: Entity,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let index = self
            .registry
            .component_index_by_name(name)
            .ok_or_else(|| StoreError::UnknownComponent(name.to_string()))?;
        let registry = Arc::clone(&self.registry);
        let schema = registry.schema(index);
        if schema.kind == ComponentKind::Relation {
            return Err(StoreError::InvalidOperation(
                "relation component cannot be set from data".into(),
            ));
        }
        schema
            .validate_json(value)
            .map_err(|message| StoreError::InvalidComponentData {
                name: name.to_string(),
                message,
            })?;

        let (archetype, _) = self.location(entity)?;
        let present = self.archetypes[archetype].signature().contains_component(index);
        let old = if present && self.indices.contains_key(&index) {
            Some(self.boxed_value(index, entity))
        } else {
            None
        };
        if !present {
            let signature = self.archetypes[archetype].signature().with_component(index);
            self.move_entity(entity, signature)?;
        }
        let (archetype, row) = self.location(entity)?;
        self.archetypes[archetype]
            .column_mut(index)
            .expect("column present in signature")
            .set_row_from_json(row, value)
            .map_err(|e| StoreError::InvalidComponentData {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        if present {
            if let Some(old) = old {
                self.index_updated(index, entity, old);
            }
        } else {
            self.index_added(index, entity);
        }
        self.emit(ChangeEvent::Component {
            entity,
            component: index,
            kind: if present {
                ChangeKind::Updated
            } else {
                ChangeKind::Added
            },
        });
        Ok(())
    }

    /// Serialises one of the entity's components to JSON.
    pub fn component_json(
        &self,
        entity: Entity,
        index: SchemaIndex,
    ) -> Result<serde_json::Value, StoreError> {
        let (archetype, row) = self.location(entity)?;
        let name = self.registry.schema(index).name;
        let column = self.archetypes[archetype]
            .column(index)
            .ok_or_else(|| StoreError::UnknownComponent(name.to_string()))?;
        column
            .row_to_json(row)
            .map_err(|e| StoreError::InvalidComponentData {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    // ---- schema resolution helpers ---------------------------------------

    /// Index of a registered component type.
    pub fn component_index<T: Component>(&self) -> Result<SchemaIndex, StoreError> {
        self.registry
            .component_index_of::<T>()
            .ok_or_else(|| StoreError::UnknownComponent(T::type_name().to_string()))
    }

    /// Index of a registered tag type.
    pub fn tag_index<T: Tag>(&self) -> Result<TagIndex, StoreError> {
        self.registry
            .tag_index_of::<T>()
            .ok_or_else(|| StoreError::UnknownTag(T::tag_name().to_string()))
    }

    pub(crate) fn value_component_index<T: Component>(&self) -> Result<SchemaIndex, StoreError> {
        let index = self.component_index::<T>()?;
        if self.registry.schema(index).kind == ComponentKind::Relation {
            return Err(StoreError::InvalidOperation(
                "relation component cannot be used as a value component".into(),
            ));
        }
        Ok(index)
    }

    // ---- internals shared with batch / query / index modules -------------

    pub(crate) fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub(crate) fn archetype_mut(&mut self, index: usize) -> &mut Archetype {
        &mut self.archetypes[index]
    }

    pub(crate) fn relation_store<T: Relation>(&self, index: SchemaIndex) -> Option<&RelationStore<T>> {
        self.relations.get(&index)?.as_any().downcast_ref()
    }

    /// Archetype index and row of a live entity.
    pub(crate) fn location(&self, entity: Entity) -> Result<(usize, usize), StoreError> {
        match self.nodes.get(&entity.0) {
            Some(node) => Ok((node.archetype, node.row)),
            None => Err(StoreError::EntityNotFound(entity.0)),
        }
    }

    fn node_mut(&mut self, entity: Entity) -> &mut EntityNode {
        self.nodes
            .get_mut(&entity.0)
            .expect("node exists for a live entity")
    }

    /// Returns the index of the archetype with this signature, creating it
    /// on first use. Hash collisions are resolved by signature equality.
    fn archetype_index(&mut self, signature: Signature) -> usize {
        let id = signature.archetype_id();
        if let Some(list) = self.archetype_lookup.get(&id) {
            for &index in list {
                if self.archetypes[index].signature() == &signature {
                    return index;
                }
            }
        }
        let index = self.archetypes.len();
        let archetype = Archetype::new(&self.registry, signature);
        self.archetypes.push(archetype);
        self.archetype_lookup.entry(id).or_default().push(index);
        index
    }

    /// The single structural-move choke point: re-homes an entity to the
    /// archetype of `signature` and fixes the bookkeeping of whichever
    /// entity got swapped into the vacated row.
    pub(crate) fn move_entity(
        &mut self,
        entity: Entity,
        signature: Signature,
    ) -> Result<(), StoreError> {
        let (source, row) = self.location(entity)?;
        if self.archetypes[source].signature() == &signature {
            return Ok(());
        }
        let destination = self.archetype_index(signature);
        let (new_row, swapped) = {
            let (src, dst) = two_archetypes(&mut self.archetypes, source, destination);
            move_row(src, dst, row)
        };
        trace!(entity = entity.0, from = source, to = destination, "entity moved");
        let node = self.node_mut(entity);
        node.archetype = destination;
        node.row = new_row;
        if let Some(filler) = swapped {
            self.node_mut(filler).row = row;
        }
        Ok(())
    }

    /// Clones an entity's component value out as a boxed `dyn Any`, for
    /// type-erased index maintenance.
    pub(crate) fn boxed_value(&self, index: SchemaIndex, entity: Entity) -> Box<dyn Any> {
        let (archetype, row) = self
            .location(entity)
            .expect("boxed_value called for a live entity");
        self.archetypes[archetype]
            .column(index)
            .expect("column present in signature")
            .get_boxed(row)
    }

    pub(crate) fn index_added(&mut self, index: SchemaIndex, entity: Entity) {
        if !self.indices.contains_key(&index) {
            return;
        }
        let value = self.boxed_value(index, entity);
        if let Some(ix) = self.indices.get_mut(&index) {
            ix.add(entity, &*value);
        }
    }

    pub(crate) fn index_updated(&mut self, index: SchemaIndex, entity: Entity, old: Box<dyn Any>) {
        if !self.indices.contains_key(&index) {
            return;
        }
        let new = self.boxed_value(index, entity);
        if let Some(ix) = self.indices.get_mut(&index) {
            ix.update(entity, &*old, &*new);
        }
    }

    pub(crate) fn index_removed(&mut self, index: SchemaIndex, entity: Entity, old: Box<dyn Any>) {
        if let Some(ix) = self.indices.get_mut(&index) {
            ix.remove(entity, &*old);
        }
    }

    /// Dispatches an event to every listener in registration order.
    /// Listeners registered during dispatch see only later events.
    pub(crate) fn emit(&mut self, event: ChangeEvent) {
        if self.listeners.is_empty() {
            return;
        }
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            listener(&event);
        }
        let added = std::mem::replace(&mut self.listeners, listeners);
        self.listeners.extend(added);
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.live)
            .field("archetypes", &self.archetypes.len())
            .field("indices", &self.indices.len())
            .finish()
    }
}

fn two_archetypes(
    archetypes: &mut [Archetype],
    a: usize,
    b: usize,
) -> (&mut Archetype, &mut Archetype) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
