//! Secondary value indices over component keys.
//!
//! Components opt in by implementing [`Indexed`], naming the key extracted
//! from each value. Two index shapes exist:
//!
//! - [`HashValueIndex`] — hash buckets, O(1) exact-match lookup.
//! - [`OrderedValueIndex`] — keys kept sorted, supporting range lookup over
//!   the half-open window `[first key >= min, first key > max)` as well as
//!   exact match.
//!
//! Indices are maintained incrementally from every mutation path of the
//! store, including batches: add inserts into the key's bucket, remove
//! drops the entry (and an emptied bucket), and a value rewrite re-buckets
//! only when the old and new keys differ.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use hive_component::{Component, Entity, SchemaIndex};

use crate::error::StoreError;
use crate::world::EntityStore;

/// A component that can be looked up by a key derived from its value.
pub trait Indexed: Component {
    /// The key extracted from each component value.
    type Key: Clone + Eq + Hash + Ord + 'static;

    /// Extracts the key.
    fn key(&self) -> Self::Key;
}

const NO_ENTITIES: &[Entity] = &[];

/// Hash-bucket index: one bucket of entities per distinct key.
pub struct HashValueIndex<T: Indexed> {
    buckets: HashMap<T::Key, Vec<Entity>>,
}

impl<T: Indexed> HashValueIndex<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Every entity whose key equals `key`, in insertion order. Empty on a
    /// miss, without allocating.
    #[must_use]
    pub fn get(&self, key: &T::Key) -> &[Entity] {
        self.buckets.get(key).map_or(NO_ENTITIES, Vec::as_slice)
    }

    fn insert_key(&mut self, entity: Entity, key: T::Key) {
        self.buckets.entry(key).or_default().push(entity);
    }

    fn remove_key(&mut self, entity: Entity, key: &T::Key) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            if let Some(pos) = bucket.iter().position(|e| *e == entity) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.buckets.remove(key);
            }
        }
    }
}

impl<T: Indexed> Default for HashValueIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorted-key index: supports exact match and half-open range lookup.
pub struct OrderedValueIndex<T: Indexed> {
    keys: Vec<T::Key>,
    buckets: Vec<Vec<Entity>>,
}

impl<T: Indexed> OrderedValueIndex<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            buckets: Vec::new(),
        }
    }

    /// Every entity whose key equals `key`. Empty on a miss.
    #[must_use]
    pub fn get(&self, key: &T::Key) -> &[Entity] {
        match self.keys.binary_search(key) {
            Ok(pos) => &self.buckets[pos],
            Err(_) => NO_ENTITIES,
        }
    }

    /// Every entity whose key lies in `[min, max]`, in key order. The
    /// bounds resolve to the half-open bucket window
    /// `[first key >= min, first key > max)`.
    pub fn range<'a>(&'a self, min: &T::Key, max: &T::Key) -> impl Iterator<Item = Entity> + 'a {
        let lower = self.keys.partition_point(|k| k < min);
        let upper = self.keys.partition_point(|k| k <= max);
        self.buckets[lower..upper].iter().flatten().copied()
    }

    fn insert_key(&mut self, entity: Entity, key: T::Key) {
        match self.keys.binary_search(&key) {
            Ok(pos) => self.buckets[pos].push(entity),
            Err(pos) => {
                self.keys.insert(pos, key);
                self.buckets.insert(pos, vec![entity]);
            }
        }
    }

    fn remove_key(&mut self, entity: Entity, key: &T::Key) {
        if let Ok(pos) = self.keys.binary_search(key) {
            let bucket = &mut self.buckets[pos];
            if let Some(entry) = bucket.iter().position(|e| *e == entity) {
                bucket.remove(entry);
            }
            if bucket.is_empty() {
                self.keys.remove(pos);
                self.buckets.remove(pos);
            }
        }
    }
}

impl<T: Indexed> Default for OrderedValueIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased maintenance hooks the store drives on every mutation path.
pub(crate) trait AnyIndex {
    fn add(&mut self, entity: Entity, value: &dyn Any);
    fn remove(&mut self, entity: Entity, value: &dyn Any);
    fn update(&mut self, entity: Entity, old: &dyn Any, new: &dyn Any);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Indexed> AnyIndex for HashValueIndex<T> {
    fn add(&mut self, entity: Entity, value: &dyn Any) {
        if let Some(value) = value.downcast_ref::<T>() {
            self.insert_key(entity, value.key());
        }
    }

    fn remove(&mut self, entity: Entity, value: &dyn Any) {
        if let Some(value) = value.downcast_ref::<T>() {
            self.remove_key(entity, &value.key());
        }
    }

    fn update(&mut self, entity: Entity, old: &dyn Any, new: &dyn Any) {
        let (Some(old), Some(new)) = (old.downcast_ref::<T>(), new.downcast_ref::<T>()) else {
            return;
        };
        let (old_key, new_key) = (old.key(), new.key());
        // Rewrites that keep the key are a no-op.
        if old_key == new_key {
            return;
        }
        self.remove_key(entity, &old_key);
        self.insert_key(entity, new_key);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Indexed> AnyIndex for OrderedValueIndex<T> {
    fn add(&mut self, entity: Entity, value: &dyn Any) {
        if let Some(value) = value.downcast_ref::<T>() {
            self.insert_key(entity, value.key());
        }
    }

    fn remove(&mut self, entity: Entity, value: &dyn Any) {
        if let Some(value) = value.downcast_ref::<T>() {
            self.remove_key(entity, &value.key());
        }
    }

    fn update(&mut self, entity: Entity, old: &dyn Any, new: &dyn Any) {
        let (Some(old), Some(new)) = (old.downcast_ref::<T>(), new.downcast_ref::<T>()) else {
            return;
        };
        let (old_key, new_key) = (old.key(), new.key());
        if old_key == new_key {
            return;
        }
        self.remove_key(entity, &old_key);
        self.insert_key(entity, new_key);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn populate<T: Indexed>(
    store: &EntityStore,
    index: SchemaIndex,
    mut add: impl FnMut(Entity, &T),
) {
    for archetype in store.archetypes() {
        let Some(column) = archetype.column_as::<T>(index) else {
            continue;
        };
        for chunk_index in 0..column.chunk_count() {
            let values = column.chunk(chunk_index);
            let ids = archetype.entities().chunk(chunk_index);
            for (i, value) in values.iter().enumerate() {
                add(ids[i], value);
            }
        }
    }
}

impl EntityStore {
    /// Creates the hash index for `T`, scanning live entities. A no-op when
    /// an index for `T` already exists.
    pub fn create_index<T: Indexed>(&mut self) -> Result<(), StoreError> {
        let index = self.value_component_index::<T>()?;
        if self.indices.contains_key(&index) {
            return Ok(());
        }
        let mut built = HashValueIndex::<T>::new();
        populate(self, index, |entity, value: &T| {
            built.insert_key(entity, value.key());
        });
        debug!(component = T::type_name(), "hash index created");
        self.indices.insert(index, Box::new(built));
        Ok(())
    }

    /// Creates (or replaces the hash index with) the ordered index for
    /// `T`, scanning live entities.
    pub fn create_ordered_index<T: Indexed>(&mut self) -> Result<(), StoreError> {
        let index = self.value_component_index::<T>()?;
        if let Some(existing) = self.indices.get(&index) {
            if existing.as_any().is::<OrderedValueIndex<T>>() {
                return Ok(());
            }
        }
        let mut built = OrderedValueIndex::<T>::new();
        populate(self, index, |entity, value: &T| {
            built.insert_key(entity, value.key());
        });
        debug!(component = T::type_name(), "ordered index created");
        self.indices.insert(index, Box::new(built));
        Ok(())
    }

    /// Every entity whose `T` key equals `key`. Creates the hash index on
    /// first use; thereafter the lookup is O(1) and allocation-free.
    pub fn lookup_index<T: Indexed>(&mut self, key: &T::Key) -> Result<&[Entity], StoreError> {
        let index = self.value_component_index::<T>()?;
        if !self.indices.contains_key(&index) {
            self.create_index::<T>()?;
        }
        let ix = self.indices.get(&index).expect("index just ensured");
        if let Some(hash) = ix.as_any().downcast_ref::<HashValueIndex<T>>() {
            return Ok(hash.get(key));
        }
        let ordered = ix
            .as_any()
            .downcast_ref::<OrderedValueIndex<T>>()
            .expect("index is hash or ordered");
        Ok(ordered.get(key))
    }

    /// Every entity whose `T` key lies in `[min, max]`, in key order.
    /// Upgrades a hash index to the ordered variant on first use;
    /// allocation is limited to the returned result.
    pub fn lookup_index_range<T: Indexed>(
        &mut self,
        min: &T::Key,
        max: &T::Key,
    ) -> Result<Vec<Entity>, StoreError> {
        let index = self.value_component_index::<T>()?;
        let needs_ordered = self
            .indices
            .get(&index)
            .map_or(true, |ix| !ix.as_any().is::<OrderedValueIndex<T>>());
        if needs_ordered {
            self.create_ordered_index::<T>()?;
        }
        let ordered = self
            .indices
            .get(&index)
            .and_then(|ix| ix.as_any().downcast_ref::<OrderedValueIndex<T>>())
            .expect("ordered index just ensured");
        Ok(ordered.range(min, max).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Score {
        value: i32,
    }

    impl Component for Score {
        fn type_name() -> &'static str {
            "Score"
        }
    }

    impl Indexed for Score {
        type Key = i32;

        fn key(&self) -> i32 {
            self.value
        }
    }

    fn store_with_scores(values: &[i32]) -> (EntityStore, Vec<Entity>) {
        let mut builder = hive_component::SchemaRegistryBuilder::new();
        builder.register_component::<Score>();
        let mut store = EntityStore::new(builder.build());
        let entities = values
            .iter()
            .map(|&value| {
                let e = store.create_entity();
                store.add_component(e, Score { value }).unwrap();
                e
            })
            .collect();
        (store, entities)
    }

    #[test]
    fn test_exact_lookup_hits_and_misses() {
        let (mut store, entities) = store_with_scores(&[100, 200, 300]);
        assert_eq!(store.lookup_index::<Score>(&200).unwrap(), &[entities[1]]);
        assert!(store.lookup_index::<Score>(&150).unwrap().is_empty());
    }

    #[test]
    fn test_range_lookup_is_inclusive_on_both_ends() {
        let (mut store, entities) = store_with_scores(&[100, 200, 300]);
        assert_eq!(
            store.lookup_index_range::<Score>(&100, &200).unwrap(),
            vec![entities[0], entities[1]]
        );
        assert!(store.lookup_index_range::<Score>(&900, &999).unwrap().is_empty());
        assert_eq!(
            store.lookup_index_range::<Score>(&0, &1000).unwrap(),
            vec![entities[0], entities[1], entities[2]]
        );
    }

    #[test]
    fn test_exact_equals_degenerate_range() {
        let (mut store, _) = store_with_scores(&[100, 200, 200, 300]);
        for value in [100, 200, 300, 999] {
            let exact = store.lookup_index::<Score>(&value).unwrap().to_vec();
            let range = store.lookup_index_range::<Score>(&value, &value).unwrap();
            assert_eq!(exact, range, "mismatch for key {value}");
        }
    }

    #[test]
    fn test_index_tracks_value_rewrites() {
        let (mut store, entities) = store_with_scores(&[100, 200]);
        store.create_index::<Score>().unwrap();
        store.add_component(entities[0], Score { value: 200 }).unwrap();
        assert!(store.lookup_index::<Score>(&100).unwrap().is_empty());
        assert_eq!(
            store.lookup_index::<Score>(&200).unwrap(),
            &[entities[1], entities[0]]
        );
        // Rewriting with the same key keeps a single entry.
        store.add_component(entities[0], Score { value: 200 }).unwrap();
        assert_eq!(store.lookup_index::<Score>(&200).unwrap().len(), 2);
    }

    #[test]
    fn test_index_tracks_removal_and_deletion() {
        let (mut store, entities) = store_with_scores(&[100, 200]);
        store.create_index::<Score>().unwrap();
        store.remove_component::<Score>(entities[0]).unwrap();
        assert!(store.lookup_index::<Score>(&100).unwrap().is_empty());
        store.delete_entity(entities[1]).unwrap();
        assert!(store.lookup_index::<Score>(&200).unwrap().is_empty());
    }

    #[test]
    fn test_hash_index_upgrades_to_ordered() {
        let (mut store, entities) = store_with_scores(&[100, 300]);
        // First touch builds the hash index.
        assert_eq!(store.lookup_index::<Score>(&100).unwrap(), &[entities[0]]);
        // The range query upgrades it; exact lookup keeps working after.
        assert_eq!(
            store.lookup_index_range::<Score>(&50, &350).unwrap(),
            vec![entities[0], entities[1]]
        );
        assert_eq!(store.lookup_index::<Score>(&300).unwrap(), &[entities[1]]);
        // Maintenance still applies to the upgraded index.
        let e = store.create_entity();
        store.add_component(e, Score { value: 200 }).unwrap();
        assert_eq!(
            store.lookup_index_range::<Score>(&100, &300).unwrap(),
            vec![entities[0], e, entities[1]]
        );
    }
}
