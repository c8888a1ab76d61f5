//! Archetypes: SoA storage grouped by component-and-tag signature.
//!
//! Every live entity occupies exactly one row of exactly one [`Archetype`].
//! The archetype owns one [`ColumnStorage`] per component in its
//! [`Signature`] plus a parallel entity-ID column; a row index is valid
//! across all of them simultaneously.
//!
//! Adding or removing a component or tag moves the entity to the archetype
//! of the new signature: shared columns are copied over, the vacated row is
//! swap-removed, and the entity that filled the hole is reported back so
//! the caller can fix its bookkeeping. [`move_row`] is the single place
//! this happens.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::debug;

use crate::component::Component;
use crate::entity::Entity;
use crate::schema::{SchemaIndex, SchemaRegistry, TagIndex, TagSet};
use crate::storage::{ChunkedColumn, ColumnStorage};

/// A unique identifier for an archetype, derived by hashing its signature.
///
/// Identity is confirmed by full signature equality on lookup; the hash
/// alone is never trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub u64);

/// The set of component types and tags shared by every entity in an
/// archetype. Component indices are kept sorted, so structurally equal
/// signatures compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    components: Vec<SchemaIndex>,
    tags: TagSet,
}

impl Signature {
    /// Builds a signature, sorting and deduplicating the component list.
    #[must_use]
    pub fn new(mut components: Vec<SchemaIndex>, tags: TagSet) -> Self {
        components.sort_unstable();
        components.dedup();
        Self { components, tags }
    }

    /// The empty signature of a freshly created entity.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The sorted component indices.
    #[must_use]
    pub fn components(&self) -> &[SchemaIndex] {
        &self.components
    }

    /// The tag membership.
    #[must_use]
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Whether the component is part of this signature.
    #[must_use]
    pub fn contains_component(&self, index: SchemaIndex) -> bool {
        self.components.binary_search(&index).is_ok()
    }

    /// Position of a component within the sorted list, hence its column
    /// slot in the archetype.
    #[must_use]
    pub fn component_position(&self, index: SchemaIndex) -> Option<usize> {
        self.components.binary_search(&index).ok()
    }

    /// This signature plus one component.
    #[must_use]
    pub fn with_component(&self, index: SchemaIndex) -> Self {
        let mut components = self.components.clone();
        if let Err(pos) = components.binary_search(&index) {
            components.insert(pos, index);
        }
        Self {
            components,
            tags: self.tags,
        }
    }

    /// This signature minus one component.
    #[must_use]
    pub fn without_component(&self, index: SchemaIndex) -> Self {
        let mut components = self.components.clone();
        if let Ok(pos) = components.binary_search(&index) {
            components.remove(pos);
        }
        Self {
            components,
            tags: self.tags,
        }
    }

    /// This signature plus one tag.
    #[must_use]
    pub fn with_tag(&self, tag: TagIndex) -> Self {
        let mut out = self.clone();
        out.tags.set(tag);
        out
    }

    /// This signature minus one tag.
    #[must_use]
    pub fn without_tag(&self, tag: TagIndex) -> Self {
        let mut out = self.clone();
        out.tags.clear(tag);
        out
    }

    /// Hashes the signature into an [`ArchetypeId`].
    #[must_use]
    pub fn archetype_id(&self) -> ArchetypeId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        ArchetypeId(hasher.finish())
    }
}

/// SoA storage for every entity sharing one signature.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    entities: ChunkedColumn<Entity>,
    /// One column per signature component, in sorted signature order.
    columns: Vec<Box<dyn ColumnStorage>>,
}

impl Archetype {
    /// Creates an empty archetype, building its columns from the registry
    /// vtables.
    #[must_use]
    pub fn new(registry: &SchemaRegistry, signature: Signature) -> Self {
        let columns = signature
            .components()
            .iter()
            .map(|&index| registry.schema(index).make_column())
            .collect();
        let id = signature.archetype_id();
        debug!(archetype = id.0, components = signature.components().len(), "archetype created");
        Self {
            id,
            signature,
            entities: ChunkedColumn::new(0),
            columns,
        }
    }

    #[must_use]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of entities stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity occupying `row`.
    #[must_use]
    pub fn entity_at(&self, row: usize) -> Entity {
        self.entities[row]
    }

    /// The entity-ID column.
    #[must_use]
    pub fn entities(&self) -> &ChunkedColumn<Entity> {
        &self.entities
    }

    /// The erased column for a component, if it is part of the signature.
    #[must_use]
    pub fn column(&self, index: SchemaIndex) -> Option<&dyn ColumnStorage> {
        let pos = self.signature.component_position(index)?;
        Some(self.columns[pos].as_ref())
    }

    /// The erased column for a component, mutably.
    pub fn column_mut(&mut self, index: SchemaIndex) -> Option<&mut dyn ColumnStorage> {
        let pos = self.signature.component_position(index)?;
        Some(self.columns[pos].as_mut())
    }

    /// The typed column for a component.
    #[must_use]
    pub fn column_as<T: Component>(&self, index: SchemaIndex) -> Option<&ChunkedColumn<T>> {
        self.column(index)?.as_any().downcast_ref()
    }

    /// The typed column for a component, mutably.
    pub fn column_as_mut<T: Component>(
        &mut self,
        index: SchemaIndex,
    ) -> Option<&mut ChunkedColumn<T>> {
        self.column_mut(index)?.as_any_mut().downcast_mut()
    }

    /// Borrows the entity column, up to four shared columns, and one
    /// mutable column at once. Used by query execution to lend one
    /// component mutably while reading the rest.
    ///
    /// Returns `None` when `target` is not in the signature or appears in
    /// `shared`.
    pub fn view_with_one_mut(
        &mut self,
        shared: &[SchemaIndex],
        target: SchemaIndex,
    ) -> Option<(
        &ChunkedColumn<Entity>,
        [Option<&dyn ColumnStorage>; 4],
        &mut dyn ColumnStorage,
    )> {
        if shared.contains(&target) || shared.len() > 4 {
            return None;
        }
        let mut out: [Option<&dyn ColumnStorage>; 4] = [None; 4];
        let mut target_col: Option<&mut dyn ColumnStorage> = None;
        for (pos, col) in self.columns.iter_mut().enumerate() {
            let index = self.signature.components[pos];
            if index == target {
                target_col = Some(col.as_mut());
            } else if let Some(slot) = shared.iter().position(|&s| s == index) {
                out[slot] = Some(&**col);
            }
        }
        let target_col = target_col?;
        if shared.iter().enumerate().any(|(i, _)| out[i].is_none()) {
            return None;
        }
        Some((&self.entities, out, target_col))
    }

    /// Appends `entity` with default-initialised component values,
    /// returning its row.
    pub fn push_entity(&mut self, entity: Entity) -> usize {
        for col in &mut self.columns {
            col.push_default();
        }
        self.entities.push(entity)
    }

    /// Appends `entity` carrying a clone of every component value of `row`,
    /// returning the new row.
    pub fn clone_row(&mut self, row: usize, entity: Entity) -> usize {
        for col in &mut self.columns {
            col.clone_row(row);
        }
        self.entities.push(entity)
    }

    /// Swap-removes `row` from every column. Returns the entity that was
    /// moved into the vacated row, or `None` when the removed row was the
    /// last one.
    pub fn swap_remove_row(&mut self, row: usize) -> Option<Entity> {
        for col in &mut self.columns {
            col.remove_row(row);
        }
        let _ = self.entities.swap_remove(row);
        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("len", &self.len())
            .finish()
    }
}

/// Moves `row` of `src` into `dst`: shared columns carry their values over,
/// columns new to `dst` are default-initialised, columns absent from `dst`
/// drop theirs. Returns the entity's new row in `dst` and the entity
/// swapped into the vacated `src` row, if any.
pub fn move_row(src: &mut Archetype, dst: &mut Archetype, row: usize) -> (usize, Option<Entity>) {
    let entity = src.entity_at(row);
    for (dst_pos, &index) in dst.signature.components().iter().enumerate() {
        match src.signature.component_position(index) {
            Some(src_pos) => {
                src.columns[src_pos].move_row_to(row, dst.columns[dst_pos].as_mut());
            }
            None => {
                dst.columns[dst_pos].push_default();
            }
        }
    }
    for (src_pos, &index) in src.signature.components().iter().enumerate() {
        if !dst.signature.contains_component(index) {
            src.columns[src_pos].remove_row(row);
        }
    }
    let new_row = dst.entities.push(entity);
    let _ = src.entities.swap_remove(row);
    let swapped = if row < src.entities.len() {
        Some(src.entities[row])
    } else {
        None
    };
    (new_row, swapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistryBuilder;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }

    impl Component for Pos {
        fn type_name() -> &'static str {
            "Pos"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    impl Component for Vel {
        fn type_name() -> &'static str {
            "Vel"
        }
    }

    fn registry_with_pos_vel() -> (
        std::sync::Arc<SchemaRegistry>,
        SchemaIndex,
        SchemaIndex,
    ) {
        let mut builder = SchemaRegistryBuilder::new();
        let pos = builder.register_component::<Pos>();
        let vel = builder.register_component::<Vel>();
        (builder.build(), pos, vel)
    }

    #[test]
    fn test_signature_identity_is_order_independent() {
        let tags = TagSet::empty();
        let a = Signature::new(vec![SchemaIndex(2), SchemaIndex(1)], tags);
        let b = Signature::new(vec![SchemaIndex(1), SchemaIndex(2), SchemaIndex(2)], tags);
        assert_eq!(a, b);
        assert_eq!(a.archetype_id(), b.archetype_id());
    }

    #[test]
    fn test_signature_with_without_component() {
        let sig = Signature::empty().with_component(SchemaIndex(3));
        assert!(sig.contains_component(SchemaIndex(3)));
        let back = sig.without_component(SchemaIndex(3));
        assert_eq!(back, Signature::empty());
        // Adding an already-present component changes nothing.
        assert_eq!(sig.with_component(SchemaIndex(3)), sig);
    }

    #[test]
    fn test_push_and_swap_remove_report_filler() {
        let (registry, pos, _) = registry_with_pos_vel();
        let sig = Signature::new(vec![pos], TagSet::empty());
        let mut arch = Archetype::new(&registry, sig);
        let e1 = Entity(1);
        let e2 = Entity(2);
        let e3 = Entity(3);
        assert_eq!(arch.push_entity(e1), 0);
        assert_eq!(arch.push_entity(e2), 1);
        assert_eq!(arch.push_entity(e3), 2);
        // Removing the first row pulls the last entity into it.
        assert_eq!(arch.swap_remove_row(0), Some(e3));
        assert_eq!(arch.entity_at(0), e3);
        // Removing the tail reports no filler.
        assert_eq!(arch.swap_remove_row(1), None);
        assert_eq!(arch.len(), 1);
    }

    #[test]
    fn test_move_row_carries_shared_columns() {
        let (registry, pos, vel) = registry_with_pos_vel();
        let mut src = Archetype::new(&registry, Signature::new(vec![pos], TagSet::empty()));
        let mut dst = Archetype::new(&registry, Signature::new(vec![pos, vel], TagSet::empty()));
        let e = Entity(7);
        let row = src.push_entity(e);
        src.column_as_mut::<Pos>(pos).unwrap()[row] = Pos { x: 1.0, y: 2.0 };

        let (new_row, swapped) = move_row(&mut src, &mut dst, row);
        assert_eq!(swapped, None);
        assert_eq!(src.len(), 0);
        assert_eq!(dst.len(), 1);
        assert_eq!(dst.entity_at(new_row), e);
        // The shared column kept its value, the added one is default.
        assert_eq!(
            dst.column_as::<Pos>(pos).unwrap()[new_row],
            Pos { x: 1.0, y: 2.0 }
        );
        assert_eq!(dst.column_as::<Vel>(vel).unwrap()[new_row], Vel::default());
    }

    #[test]
    fn test_move_row_drops_removed_columns() {
        let (registry, pos, vel) = registry_with_pos_vel();
        let mut src = Archetype::new(&registry, Signature::new(vec![pos, vel], TagSet::empty()));
        let mut dst = Archetype::new(&registry, Signature::new(vec![vel], TagSet::empty()));
        let e1 = Entity(1);
        let e2 = Entity(2);
        src.push_entity(e1);
        src.push_entity(e2);
        src.column_as_mut::<Vel>(vel).unwrap()[0] = Vel { dx: 5.0, dy: 0.0 };

        let (new_row, swapped) = move_row(&mut src, &mut dst, 0);
        assert_eq!(swapped, Some(e2));
        assert_eq!(src.entity_at(0), e2);
        assert_eq!(dst.column_as::<Vel>(vel).unwrap()[new_row], Vel { dx: 5.0, dy: 0.0 });
        assert!(dst.column(pos).is_none());
    }

    #[test]
    fn test_view_with_one_mut_splits_columns() {
        let (registry, pos, vel) = registry_with_pos_vel();
        let mut arch = Archetype::new(&registry, Signature::new(vec![pos, vel], TagSet::empty()));
        arch.push_entity(Entity(1));
        let (entities, shared, target) = arch.view_with_one_mut(&[pos], vel).unwrap();
        assert_eq!(entities.len(), 1);
        assert!(shared[0].is_some());
        assert_eq!(target.len(), 1);
        // Target overlapping shared is rejected.
        assert!(arch.view_with_one_mut(&[vel], vel).is_none());
    }
}
