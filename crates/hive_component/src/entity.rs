//! Entity identifiers and ID allocation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A lightweight handle to an entity.
///
/// Entities carry no data themselves — all state lives in the columns of the
/// archetype the entity currently occupies. ID `0` is reserved as the invalid
/// sentinel; live IDs start at `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Entity(pub u64);

impl Entity {
    /// The invalid entity, never allocated.
    pub const INVALID: Entity = Entity(0);

    /// Whether this handle refers to a potentially live entity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Allocates entity IDs, recycling the IDs of deleted entities.
///
/// Freshly allocated IDs are monotonically increasing starting at `1`;
/// released IDs go onto a free list and are handed out again before the
/// monotonic counter advances. Explicit IDs can be reserved, which is how
/// external data with fixed IDs is admitted.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    next_id: u64,
    free: Vec<u64>,
    /// IDs reserved at or above `next_id`. The counter skips them.
    reserved: HashSet<u64>,
}

impl EntityAllocator {
    /// Creates an allocator whose first fresh ID is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            free: Vec::new(),
            reserved: HashSet::new(),
        }
    }

    /// Allocates the next available ID, preferring recycled ones.
    pub fn allocate(&mut self) -> Entity {
        if let Some(id) = self.free.pop() {
            return Entity(id);
        }
        loop {
            let id = self.next_id;
            self.next_id += 1;
            if !self.reserved.remove(&id) {
                return Entity(id);
            }
        }
    }

    /// Reserves a specific ID. Returns `false` when the ID is already in use.
    ///
    /// Reserving past the monotonic counter records only the reserved ID
    /// itself, so sparse explicit IDs cost a constant amount of work and
    /// the skipped IDs stay available to the counter.
    pub fn reserve(&mut self, id: u64) -> bool {
        if id == 0 {
            return false;
        }
        if let Some(pos) = self.free.iter().position(|&f| f == id) {
            self.free.swap_remove(pos);
            return true;
        }
        if id < self.next_id {
            return false;
        }
        self.reserved.insert(id)
    }

    /// Returns an ID to the free list for reuse.
    pub fn release(&mut self, entity: Entity) {
        if entity.is_valid() {
            self.free.push(entity.0);
        }
    }

    /// The next ID the monotonic counter will consider. Explicitly
    /// reserved IDs may lie above it.
    #[must_use]
    pub fn high_water_mark(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_entity_is_zero() {
        assert_eq!(Entity::INVALID, Entity(0));
        assert!(!Entity::INVALID.is_valid());
        assert_eq!(Entity::default(), Entity::INVALID);
    }

    #[test]
    fn test_allocator_starts_at_one() {
        let mut alloc = EntityAllocator::new();
        assert_eq!(alloc.allocate(), Entity(1));
        assert_eq!(alloc.allocate(), Entity(2));
    }

    #[test]
    fn test_released_ids_are_recycled() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let _b = alloc.allocate();
        alloc.release(a);
        assert_eq!(alloc.allocate(), a);
        assert_eq!(alloc.allocate(), Entity(3));
    }

    #[test]
    fn test_reserve_in_use_fails() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        assert!(!alloc.reserve(a.0));
        assert!(!alloc.reserve(0));
    }

    #[test]
    fn test_reserve_ahead_keeps_gap_ids() {
        let mut alloc = EntityAllocator::new();
        assert!(alloc.reserve(5));
        // 1..=4 were skipped and must still be allocatable; the counter
        // steps over the reserved 5.
        let seen: Vec<u64> = (0..4).map(|_| alloc.allocate().0).collect();
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(alloc.allocate(), Entity(6));
    }

    #[test]
    fn test_sparse_reserve_stays_cheap() {
        let mut alloc = EntityAllocator::new();
        // A far-ahead ID must not materialise the gap below it.
        assert!(alloc.reserve(1_000_000_000));
        assert!(alloc.free.is_empty());
        assert_eq!(alloc.reserved.len(), 1);
        assert!(!alloc.reserve(1_000_000_000));
        assert_eq!(alloc.allocate(), Entity(1));

        alloc.release(Entity(1_000_000_000));
        // Released reserved IDs recycle through the free list.
        assert!(alloc.reserve(1_000_000_000));
        assert!(!alloc.reserve(1_000_000_000));
    }

    #[test]
    fn test_reserve_released_id() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        alloc.release(a);
        assert!(alloc.reserve(a.0));
        assert!(!alloc.reserve(a.0));
    }
}
