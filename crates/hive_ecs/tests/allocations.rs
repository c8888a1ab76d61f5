//! Steady-state enumeration must not allocate: the match cache fills on
//! the first pass and later passes only walk chunk slices.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use hive_component::{SchemaRegistryBuilder, UniqueName};
use hive_ecs::{EntityStore, Indexed};
use serde::{Deserialize, Serialize};

struct CountingAllocator;

static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

impl hive_component::Component for Position {
    fn type_name() -> &'static str {
        "Position"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Velocity {
    dx: f32,
    dy: f32,
}

impl hive_component::Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}

struct Active;

impl hive_component::Tag for Active {
    fn tag_name() -> &'static str {
        "Active"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Score {
    points: i64,
}

impl hive_component::Component for Score {
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

#[test]
fn test_steady_state_iteration_does_not_allocate() {
    let mut builder = SchemaRegistryBuilder::new();
    builder.register_component::<Position>();
    builder.register_component::<Velocity>();
    builder.register_component::<Score>();
    builder.register_tag::<Active>();
    let mut store = EntityStore::new(builder.build());

    // Several chunks across two archetypes.
    for i in 0..400u32 {
        let e = store.create_entity();
        store
            .add_component(
                e,
                Position {
                    x: i as f32,
                    y: 0.0,
                },
            )
            .unwrap();
        store
            .add_component(e, Velocity { dx: 1.0, dy: 0.0 })
            .unwrap();
        if i % 2 == 0 {
            store.add_tag::<Active>(e).unwrap();
        }
        store
            .add_component(e, Score { points: i as i64 })
            .unwrap();
    }
    let named = store.create_entity();
    store
        .add_component(named, UniqueName::new("player"))
        .unwrap();

    let mut query = store.query2::<Position, Velocity>().unwrap();

    // Warm up: fills the archetype match cache, the singleton scan, and
    // the hash index.
    let mut warm = 0usize;
    query.for_each(&store, |_, _, _| warm += 1);
    assert_eq!(warm, 400);
    assert_eq!(store.get_unique_entity("player").unwrap(), named);
    assert_eq!(store.lookup_index::<Score>(&7).unwrap().len(), 1);

    let before = ALLOCATIONS.load(Ordering::Relaxed);
    let mut sum = 0.0f32;
    query.for_each(&store, |_, p, v| sum += p.x + v.dx);
    query.for_each_mut(&mut store, |_, p, v| v.dx += p.x * 0.0);
    let unique = store.get_unique_entity("player").unwrap();
    let hits = store.lookup_index::<Score>(&7).unwrap().len();
    let after = ALLOCATIONS.load(Ordering::Relaxed);

    assert!(sum > 0.0);
    assert_eq!(unique, named);
    assert_eq!(hits, 1);
    assert_eq!(after - before, 0, "warm lookups allocated");
}
