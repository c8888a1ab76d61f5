//! Run-contiguous storage for multi-instance relation components.
//!
//! Each relation type gets one [`RelationStore`]: a flat value vector in
//! which every owner's instances form one contiguous run, with an owner
//! table mapping entity to run. Runs are never interleaved, so the direct
//! per-owner accessor hands out a plain slice without allocating.
//!
//! Appending to an owner whose run is not at the tail shifts the later runs
//! over. That makes relation insertion a structural operation, like an
//! archetype move, rather than a hot-path one.

use std::any::Any;
use std::collections::HashMap;

use crate::component::Relation;
use crate::entity::Entity;

/// Storage for every instance of one relation type across all owners.
#[derive(Debug)]
pub struct RelationStore<T> {
    values: Vec<T>,
    /// Owner order, matching run order in `values`.
    order: Vec<Entity>,
    /// Owner to `(start, len)` run.
    runs: HashMap<Entity, (usize, usize)>,
}

impl<T: Relation> RelationStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            order: Vec::new(),
            runs: HashMap::new(),
        }
    }

    /// Total number of relation instances across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no instances are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends an instance to `owner`'s run, keeping the run contiguous.
    pub fn add(&mut self, owner: Entity, value: T) {
        if let Some(&(start, len)) = self.runs.get(&owner) {
            let at = start + len;
            self.values.insert(at, value);
            for (s, _) in self.runs.values_mut() {
                if *s > start {
                    *s += 1;
                }
            }
            self.runs.insert(owner, (start, len + 1));
        } else {
            self.runs.insert(owner, (self.values.len(), 1));
            self.values.push(value);
            self.order.push(owner);
        }
    }

    /// All instances owned by `owner`, as one contiguous slice. Empty when
    /// the owner has none.
    #[must_use]
    pub fn relations_of(&self, owner: Entity) -> &[T] {
        match self.runs.get(&owner) {
            Some(&(start, len)) => &self.values[start..start + len],
            None => &[],
        }
    }

    /// Removes every instance owned by `owner`, returning how many were
    /// dropped.
    pub fn remove_all(&mut self, owner: Entity) -> usize {
        let Some((start, len)) = self.runs.remove(&owner) else {
            return 0;
        };
        self.values.drain(start..start + len);
        for (s, _) in self.runs.values_mut() {
            if *s > start {
                *s -= len;
            }
        }
        self.order.retain(|e| *e != owner);
        len
    }

    /// Keeps only the instances of `owner` for which `pred` holds,
    /// returning how many were dropped.
    pub fn retain(&mut self, owner: Entity, mut pred: impl FnMut(&T) -> bool) -> usize {
        let Some(&(start, len)) = self.runs.get(&owner) else {
            return 0;
        };
        let mut removed = 0;
        let mut i = start + len;
        while i > start {
            i -= 1;
            if !pred(&self.values[i]) {
                self.values.remove(i);
                removed += 1;
            }
        }
        if removed > 0 {
            if removed == len {
                self.runs.remove(&owner);
                self.order.retain(|e| *e != owner);
            } else {
                self.runs.insert(owner, (start, len - removed));
            }
            for (s, _) in self.runs.values_mut() {
                if *s > start {
                    *s -= removed;
                }
            }
        }
        removed
    }

    /// Iterates `(owner, run)` pairs in first-insertion owner order.
    pub fn runs(&self) -> impl Iterator<Item = (Entity, &[T])> {
        self.order.iter().map(|&owner| {
            let &(start, len) = &self.runs[&owner];
            (owner, &self.values[start..start + len])
        })
    }

    /// Iterates every `(owner, instance)` pair in run order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.runs()
            .flat_map(|(owner, run)| run.iter().map(move |v| (owner, v)))
    }
}

impl<T: Relation> Default for RelationStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view over a [`RelationStore`], used by the entity store for
/// lifecycle maintenance of relation storage it does not know the type of.
pub trait RelationColumn: Send + Sync {
    /// Drops every instance owned by `owner`.
    fn remove_all(&mut self, owner: Entity) -> usize;

    /// Copies `src`'s run onto `dst`.
    fn clone_owner(&mut self, src: Entity, dst: Entity);

    /// Total number of stored instances.
    fn instance_count(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Relation> RelationColumn for RelationStore<T> {
    fn remove_all(&mut self, owner: Entity) -> usize {
        RelationStore::remove_all(self, owner)
    }

    fn clone_owner(&mut self, src: Entity, dst: Entity) {
        let run: Vec<T> = self.relations_of(src).to_vec();
        for value in run {
            self.add(dst, value);
        }
    }

    fn instance_count(&self) -> usize {
        self.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
