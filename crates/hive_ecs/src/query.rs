//! Typed queries: chunk-wise enumeration over matching archetypes.
//!
//! A query names one to five required component types statically and may
//! carry a [`QueryFilter`] of tag and component constraints. Matching
//! archetypes are cached; enumeration walks them in creation order,
//! chunk by chunk, without allocating. Archetypes created after the last
//! enumeration are picked up from a watermark, and any filter change marks
//! the cache dirty so the next enumeration re-evaluates every archetype.
//!
//! `for_each_mut` lends the *last* named component type mutably and the
//! rest shared. Structural mutation during enumeration is ruled out by the
//! borrow on the store.
//!
//! Relation types never appear in archetypes, so they cannot participate
//! in these queries; they are enumerated through [`RelationQuery`], which
//! accepts tag constraints on the owning entity but no component terms.

use std::marker::PhantomData;
use std::sync::Arc;

use hive_component::{
    Archetype, ChunkedColumn, Component, ComponentKind, Entity, QueryFilter, Relation,
    SchemaIndex, SchemaRegistry, Signature, Tag,
};

use crate::error::StoreError;
use crate::world::EntityStore;

fn query_component_index<C: Component>(
    registry: &SchemaRegistry,
) -> Result<SchemaIndex, StoreError> {
    let index = registry
        .component_index_of::<C>()
        .ok_or_else(|| StoreError::UnknownComponent(C::type_name().to_string()))?;
    if registry.schema(index).kind == ComponentKind::Relation {
        return Err(StoreError::InvalidOperation(
            "relation component query cannot have other query components".to_string(),
        ));
    }
    Ok(index)
}

/// Shared state of every query arity: the required set, the filter, and
/// the cached archetype matches.
struct QueryCore {
    registry: Arc<SchemaRegistry>,
    required: Vec<SchemaIndex>,
    filter: QueryFilter,
    matched: Vec<usize>,
    seen: usize,
    dirty: bool,
}

impl QueryCore {
    fn new(registry: Arc<SchemaRegistry>, required: Vec<SchemaIndex>) -> Self {
        Self {
            registry,
            required,
            filter: QueryFilter::new(),
            matched: Vec::new(),
            seen: 0,
            dirty: false,
        }
    }

    fn matches(&self, signature: &Signature) -> bool {
        self.required
            .iter()
            .all(|&c| signature.contains_component(c))
            && self.filter.matches(signature)
    }

    /// Brings the match cache up to date. Cheap when nothing changed.
    fn refresh(&mut self, archetypes: &[Archetype]) {
        if self.dirty {
            self.matched.clear();
            self.seen = 0;
            self.dirty = false;
        }
        while self.seen < archetypes.len() {
            if self.matches(archetypes[self.seen].signature()) {
                self.matched.push(self.seen);
            }
            self.seen += 1;
        }
    }

    fn require_tag<T: Tag>(&mut self) -> Result<(), StoreError> {
        let tag = self
            .registry
            .tag_index_of::<T>()
            .ok_or_else(|| StoreError::UnknownTag(T::tag_name().to_string()))?;
        self.filter.require_tag(tag);
        self.dirty = true;
        Ok(())
    }

    fn require_any_tag<T: Tag>(&mut self) -> Result<(), StoreError> {
        let tag = self
            .registry
            .tag_index_of::<T>()
            .ok_or_else(|| StoreError::UnknownTag(T::tag_name().to_string()))?;
        self.filter.require_any_tag(tag);
        self.dirty = true;
        Ok(())
    }

    fn exclude_tag<T: Tag>(&mut self) -> Result<(), StoreError> {
        let tag = self
            .registry
            .tag_index_of::<T>()
            .ok_or_else(|| StoreError::UnknownTag(T::tag_name().to_string()))?;
        self.filter.exclude_tag(tag);
        self.dirty = true;
        Ok(())
    }

    fn require_component<C: Component>(&mut self) -> Result<(), StoreError> {
        let index = query_component_index::<C>(&self.registry)?;
        self.filter.require_component(index);
        self.dirty = true;
        Ok(())
    }

    fn exclude_component<C: Component>(&mut self) -> Result<(), StoreError> {
        let index = query_component_index::<C>(&self.registry)?;
        self.filter.exclude_component(index);
        self.dirty = true;
        Ok(())
    }
}

macro_rules! query_filter_methods {
    () => {
        /// Narrows the query to entities carrying the tag.
        pub fn require_tag<T: Tag>(&mut self) -> Result<&mut Self, StoreError> {
            self.core.require_tag::<T>()?;
            Ok(self)
        }

        /// Narrows the query to entities carrying at least one of the tags
        /// named across calls.
        pub fn require_any_tag<T: Tag>(&mut self) -> Result<&mut Self, StoreError> {
            self.core.require_any_tag::<T>()?;
            Ok(self)
        }

        /// Excludes entities carrying the tag.
        pub fn exclude_tag<T: Tag>(&mut self) -> Result<&mut Self, StoreError> {
            self.core.exclude_tag::<T>()?;
            Ok(self)
        }

        /// Narrows the query to entities also carrying the component,
        /// without reading its values.
        pub fn require_component<F: Component>(&mut self) -> Result<&mut Self, StoreError> {
            self.core.require_component::<F>()?;
            Ok(self)
        }

        /// Excludes entities carrying the component.
        pub fn exclude_component<F: Component>(&mut self) -> Result<&mut Self, StoreError> {
            self.core.exclude_component::<F>()?;
            Ok(self)
        }
    };
}

/// Query over one component type.
pub struct Query1<A: Component> {
    core: QueryCore,
    a: SchemaIndex,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Component> Query1<A> {
    query_filter_methods!();

    /// Visits every matching entity in archetype-creation order.
    pub fn for_each(&mut self, store: &EntityStore, mut f: impl FnMut(Entity, &A)) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let Some(column) = archetype.column_as::<A>(self.a) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let values = column.chunk(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &values[i]);
                }
            }
        }
    }

    /// Visits matching entities chunk-wise, handing out parallel slices.
    pub fn for_each_chunk(&mut self, store: &EntityStore, mut f: impl FnMut(&[Entity], &[A])) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let Some(column) = archetype.column_as::<A>(self.a) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                f(entities.chunk(chunk_index), column.chunk(chunk_index));
            }
        }
    }

    /// Like [`Query1::for_each`] with the component lent mutably.
    pub fn for_each_mut(&mut self, store: &mut EntityStore, mut f: impl FnMut(Entity, &mut A)) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = store.archetype_mut(ai);
            let Some((entities, _, target)) = archetype.view_with_one_mut(&[], self.a) else {
                continue;
            };
            let Some(column) = target.as_any_mut().downcast_mut::<ChunkedColumn<A>>() else {
                continue;
            };
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let values = column.chunk_mut(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &mut values[i]);
                }
            }
        }
    }
}

/// Query over two component types.
pub struct Query2<A: Component, B: Component> {
    core: QueryCore,
    a: SchemaIndex,
    b: SchemaIndex,
    _marker: PhantomData<fn() -> (A, B)>,
}

impl<A: Component, B: Component> Query2<A, B> {
    query_filter_methods!();

    /// Visits every matching entity in archetype-creation order.
    pub fn for_each(&mut self, store: &EntityStore, mut f: impl FnMut(Entity, &A, &B)) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let (Some(ca), Some(cb)) = (
                archetype.column_as::<A>(self.a),
                archetype.column_as::<B>(self.b),
            ) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i]);
                }
            }
        }
    }

    /// Visits matching entities chunk-wise, handing out parallel slices.
    pub fn for_each_chunk(
        &mut self,
        store: &EntityStore,
        mut f: impl FnMut(&[Entity], &[A], &[B]),
    ) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let (Some(ca), Some(cb)) = (
                archetype.column_as::<A>(self.a),
                archetype.column_as::<B>(self.b),
            ) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                f(
                    entities.chunk(chunk_index),
                    ca.chunk(chunk_index),
                    cb.chunk(chunk_index),
                );
            }
        }
    }

    /// Like [`Query2::for_each`] with the last component lent mutably.
    pub fn for_each_mut(
        &mut self,
        store: &mut EntityStore,
        mut f: impl FnMut(Entity, &A, &mut B),
    ) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = store.archetype_mut(ai);
            let Some((entities, shared, target)) = archetype.view_with_one_mut(&[self.a], self.b)
            else {
                continue;
            };
            let Some(ca) = shared[0].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<A>>())
            else {
                continue;
            };
            let Some(cb) = target.as_any_mut().downcast_mut::<ChunkedColumn<B>>() else {
                continue;
            };
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk_mut(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &mut vb[i]);
                }
            }
        }
    }
}

/// Query over three component types.
pub struct Query3<A: Component, B: Component, C: Component> {
    core: QueryCore,
    a: SchemaIndex,
    b: SchemaIndex,
    c: SchemaIndex,
    _marker: PhantomData<fn() -> (A, B, C)>,
}

impl<A: Component, B: Component, C: Component> Query3<A, B, C> {
    query_filter_methods!();

    /// Visits every matching entity in archetype-creation order.
    pub fn for_each(&mut self, store: &EntityStore, mut f: impl FnMut(Entity, &A, &B, &C)) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let (Some(ca), Some(cb), Some(cc)) = (
                archetype.column_as::<A>(self.a),
                archetype.column_as::<B>(self.b),
                archetype.column_as::<C>(self.c),
            ) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                let vc = cc.chunk(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i], &vc[i]);
                }
            }
        }
    }

    /// Like [`Query3::for_each`] with the last component lent mutably.
    pub fn for_each_mut(
        &mut self,
        store: &mut EntityStore,
        mut f: impl FnMut(Entity, &A, &B, &mut C),
    ) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = store.archetype_mut(ai);
            let Some((entities, shared, target)) =
                archetype.view_with_one_mut(&[self.a, self.b], self.c)
            else {
                continue;
            };
            let (Some(ca), Some(cb)) = (
                shared[0].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<A>>()),
                shared[1].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<B>>()),
            ) else {
                continue;
            };
            let Some(cc) = target.as_any_mut().downcast_mut::<ChunkedColumn<C>>() else {
                continue;
            };
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                let vc = cc.chunk_mut(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i], &mut vc[i]);
                }
            }
        }
    }
}

/// Query over four component types.
pub struct Query4<A: Component, B: Component, C: Component, D: Component> {
    core: QueryCore,
    a: SchemaIndex,
    b: SchemaIndex,
    c: SchemaIndex,
    d: SchemaIndex,
    _marker: PhantomData<fn() -> (A, B, C, D)>,
}

impl<A: Component, B: Component, C: Component, D: Component> Query4<A, B, C, D> {
    query_filter_methods!();

    /// Visits every matching entity in archetype-creation order.
    pub fn for_each(&mut self, store: &EntityStore, mut f: impl FnMut(Entity, &A, &B, &C, &D)) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let (Some(ca), Some(cb), Some(cc), Some(cd)) = (
                archetype.column_as::<A>(self.a),
                archetype.column_as::<B>(self.b),
                archetype.column_as::<C>(self.c),
                archetype.column_as::<D>(self.d),
            ) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                let vc = cc.chunk(chunk_index);
                let vd = cd.chunk(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i], &vc[i], &vd[i]);
                }
            }
        }
    }

    /// Like [`Query4::for_each`] with the last component lent mutably.
    pub fn for_each_mut(
        &mut self,
        store: &mut EntityStore,
        mut f: impl FnMut(Entity, &A, &B, &C, &mut D),
    ) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = store.archetype_mut(ai);
            let Some((entities, shared, target)) =
                archetype.view_with_one_mut(&[self.a, self.b, self.c], self.d)
            else {
                continue;
            };
            let (Some(ca), Some(cb), Some(cc)) = (
                shared[0].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<A>>()),
                shared[1].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<B>>()),
                shared[2].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<C>>()),
            ) else {
                continue;
            };
            let Some(cd) = target.as_any_mut().downcast_mut::<ChunkedColumn<D>>() else {
                continue;
            };
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                let vc = cc.chunk(chunk_index);
                let vd = cd.chunk_mut(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i], &vc[i], &mut vd[i]);
                }
            }
        }
    }
}

/// Query over five component types.
pub struct Query5<A: Component, B: Component, C: Component, D: Component, E: Component> {
    core: QueryCore,
    a: SchemaIndex,
    b: SchemaIndex,
    c: SchemaIndex,
    d: SchemaIndex,
    e: SchemaIndex,
    _marker: PhantomData<fn() -> (A, B, C, D, E)>,
}

impl<A: Component, B: Component, C: Component, D: Component, E: Component> Query5<A, B, C, D, E> {
    query_filter_methods!();

    /// Visits every matching entity in archetype-creation order.
    pub fn for_each(
        &mut self,
        store: &EntityStore,
        mut f: impl FnMut(Entity, &A, &B, &C, &D, &E),
    ) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = &store.archetypes()[ai];
            let (Some(ca), Some(cb), Some(cc), Some(cd), Some(ce)) = (
                archetype.column_as::<A>(self.a),
                archetype.column_as::<B>(self.b),
                archetype.column_as::<C>(self.c),
                archetype.column_as::<D>(self.d),
                archetype.column_as::<E>(self.e),
            ) else {
                continue;
            };
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                let vc = cc.chunk(chunk_index);
                let vd = cd.chunk(chunk_index);
                let ve = ce.chunk(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i], &vc[i], &vd[i], &ve[i]);
                }
            }
        }
    }

    /// Like [`Query5::for_each`] with the last component lent mutably.
    pub fn for_each_mut(
        &mut self,
        store: &mut EntityStore,
        mut f: impl FnMut(Entity, &A, &B, &C, &D, &mut E),
    ) {
        self.core.refresh(store.archetypes());
        for &ai in &self.core.matched {
            let archetype = store.archetype_mut(ai);
            let Some((entities, shared, target)) =
                archetype.view_with_one_mut(&[self.a, self.b, self.c, self.d], self.e)
            else {
                continue;
            };
            let (Some(ca), Some(cb), Some(cc), Some(cd)) = (
                shared[0].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<A>>()),
                shared[1].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<B>>()),
                shared[2].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<C>>()),
                shared[3].and_then(|c| c.as_any().downcast_ref::<ChunkedColumn<D>>()),
            ) else {
                continue;
            };
            let Some(ce) = target.as_any_mut().downcast_mut::<ChunkedColumn<E>>() else {
                continue;
            };
            for chunk_index in 0..entities.chunk_count() {
                let ids = entities.chunk(chunk_index);
                let va = ca.chunk(chunk_index);
                let vb = cb.chunk(chunk_index);
                let vc = cc.chunk(chunk_index);
                let vd = cd.chunk(chunk_index);
                let ve = ce.chunk_mut(chunk_index);
                for i in 0..ids.len() {
                    f(ids[i], &va[i], &vb[i], &vc[i], &vd[i], &mut ve[i]);
                }
            }
        }
    }
}

/// Flattened enumeration of every instance of one relation type, filtered
/// by tags on the owning entity.
pub struct RelationQuery<R: Relation> {
    index: SchemaIndex,
    filter: QueryFilter,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Relation> RelationQuery<R> {
    /// Visits every `(owner, instance)` pair, owners in archetype-then-row
    /// order and each owner's instances in attachment order.
    pub fn for_each(&self, store: &EntityStore, mut f: impl FnMut(Entity, &R)) {
        let Some(relations) = store.relation_store::<R>(self.index) else {
            return;
        };
        for archetype in store.archetypes() {
            if !self.filter.matches(archetype.signature()) {
                continue;
            }
            let entities = archetype.entities();
            for chunk_index in 0..entities.chunk_count() {
                for &owner in entities.chunk(chunk_index) {
                    for value in relations.relations_of(owner) {
                        f(owner, value);
                    }
                }
            }
        }
    }
}

impl EntityStore {
    /// Builds a query over one component type.
    pub fn query<A: Component>(&self) -> Result<Query1<A>, StoreError> {
        let registry = Arc::clone(self.registry());
        let a = query_component_index::<A>(&registry)?;
        Ok(Query1 {
            core: QueryCore::new(registry, vec![a]),
            a,
            _marker: PhantomData,
        })
    }

    /// Builds a query over two component types.
    pub fn query2<A: Component, B: Component>(&self) -> Result<Query2<A, B>, StoreError> {
        let registry = Arc::clone(self.registry());
        let a = query_component_index::<A>(&registry)?;
        let b = query_component_index::<B>(&registry)?;
        Ok(Query2 {
            core: QueryCore::new(registry, vec![a, b]),
            a,
            b,
            _marker: PhantomData,
        })
    }

    /// Builds a query over three component types.
    pub fn query3<A: Component, B: Component, C: Component>(
        &self,
    ) -> Result<Query3<A, B, C>, StoreError> {
        let registry = Arc::clone(self.registry());
        let a = query_component_index::<A>(&registry)?;
        let b = query_component_index::<B>(&registry)?;
        let c = query_component_index::<C>(&registry)?;
        Ok(Query3 {
            core: QueryCore::new(registry, vec![a, b, c]),
            a,
            b,
            c,
            _marker: PhantomData,
        })
    }

    /// Builds a query over four component types.
    pub fn query4<A: Component, B: Component, C: Component, D: Component>(
        &self,
    ) -> Result<Query4<A, B, C, D>, StoreError> {
        let registry = Arc::clone(self.registry());
        let a = query_component_index::<A>(&registry)?;
        let b = query_component_index::<B>(&registry)?;
        let c = query_component_index::<C>(&registry)?;
        let d = query_component_index::<D>(&registry)?;
        Ok(Query4 {
            core: QueryCore::new(registry, vec![a, b, c, d]),
            a,
            b,
            c,
            d,
            _marker: PhantomData,
        })
    }

    /// Builds a query over five component types.
    pub fn query5<A: Component, B: Component, C: Component, D: Component, E: Component>(
        &self,
    ) -> Result<Query5<A, B, C, D, E>, StoreError> {
        let registry = Arc::clone(self.registry());
        let a = query_component_index::<A>(&registry)?;
        let b = query_component_index::<B>(&registry)?;
        let c = query_component_index::<C>(&registry)?;
        let d = query_component_index::<D>(&registry)?;
        let e = query_component_index::<E>(&registry)?;
        Ok(Query5 {
            core: QueryCore::new(registry, vec![a, b, c, d, e]),
            a,
            b,
            c,
            d,
            e,
            _marker: PhantomData,
        })
    }

    /// Builds a relation query. The filter may constrain owner tags only;
    /// component terms are rejected.
    pub fn relation_query<R: Relation>(
        &self,
        filter: QueryFilter,
    ) -> Result<RelationQuery<R>, StoreError> {
        if filter.has_component_terms() {
            return Err(StoreError::InvalidOperation(
                "relation component query cannot have other query components".to_string(),
            ));
        }
        let index = self.component_index::<R>()?;
        if self.registry().schema(index).kind != ComponentKind::Relation {
            return Err(StoreError::InvalidOperation(
                "component is not a relation".to_string(),
            ));
        }
        Ok(RelationQuery {
            index,
            filter,
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_component::SchemaRegistryBuilder;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Marker {
        id: u32,
    }

    impl Component for Marker {
        fn type_name() -> &'static str {
            "Marker"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Speed {
        value: f32,
    }

    impl Component for Speed {
        fn type_name() -> &'static str {
            "Speed"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Follows {
        target: Entity,
    }

    impl Component for Follows {
        fn type_name() -> &'static str {
            "Follows"
        }
    }

    impl Relation for Follows {
        fn target(&self) -> Entity {
            self.target
        }
    }

    macro_rules! test_tag {
        ($name:ident) => {
            struct $name;

            impl Tag for $name {
                fn tag_name() -> &'static str {
                    stringify!($name)
                }
            }
        };
    }

    test_tag!(Tag1);
    test_tag!(Tag2);
    test_tag!(Tag3);
    test_tag!(Tag4);
    test_tag!(Tag5);

    fn store() -> EntityStore {
        let mut builder = SchemaRegistryBuilder::new();
        builder.register_component::<Marker>();
        builder.register_component::<Speed>();
        builder.register_relation::<Follows>();
        builder.register_tag::<Tag1>();
        builder.register_tag::<Tag2>();
        builder.register_tag::<Tag3>();
        builder.register_tag::<Tag4>();
        builder.register_tag::<Tag5>();
        EntityStore::new(builder.build())
    }

    /// Five entities; entity `i` carries tags `Tag1..=Tagi`.
    fn tagged_entities(store: &mut EntityStore) -> Vec<Entity> {
        let mut entities = Vec::new();
        for i in 1..=5u32 {
            let e = store.create_entity();
            store.add_component(e, Marker { id: i }).unwrap();
            store.add_tag::<Tag1>(e).unwrap();
            if i >= 2 {
                store.add_tag::<Tag2>(e).unwrap();
            }
            if i >= 3 {
                store.add_tag::<Tag3>(e).unwrap();
            }
            if i >= 4 {
                store.add_tag::<Tag4>(e).unwrap();
            }
            if i == 5 {
                store.add_tag::<Tag5>(e).unwrap();
            }
            entities.push(e);
        }
        entities
    }

    #[test]
    fn test_all_tags_filter_narrows_incrementally() {
        let mut store = store();
        let entities = tagged_entities(&mut store);

        let mut query = store.query::<Marker>().unwrap();
        query.require_tag::<Tag2>().unwrap();
        let mut ids: Vec<u32> = Vec::new();
        query.for_each(&store, |_, m| ids.push(m.id));
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5]);

        // Narrowing the same query re-evaluates the archetype matches.
        query.require_tag::<Tag5>().unwrap();
        let mut ids: Vec<u32> = Vec::new();
        query.for_each(&store, |_, m| ids.push(m.id));
        assert_eq!(ids, vec![5]);
        assert_eq!(entities.len(), 5);
    }

    #[test]
    fn test_any_and_without_tag_filters() {
        let mut store = store();
        tagged_entities(&mut store);

        let mut query = store.query::<Marker>().unwrap();
        query.require_any_tag::<Tag4>().unwrap();
        query.require_any_tag::<Tag5>().unwrap();
        let mut ids: Vec<u32> = Vec::new();
        query.for_each(&store, |_, m| ids.push(m.id));
        ids.sort_unstable();
        assert_eq!(ids, vec![4, 5]);

        let mut query = store.query::<Marker>().unwrap();
        query.exclude_tag::<Tag3>().unwrap();
        let mut ids: Vec<u32> = Vec::new();
        query.for_each(&store, |_, m| ids.push(m.id));
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_query_picks_up_new_archetypes() {
        let mut store = store();
        let mut query = store.query::<Marker>().unwrap();
        let mut count = 0;
        query.for_each(&store, |_, _| count += 1);
        assert_eq!(count, 0);

        // Created after the first enumeration, in a brand-new archetype.
        let e = store.create_entity();
        store.add_component(e, Marker { id: 9 }).unwrap();
        store.add_tag::<Tag1>(e).unwrap();
        let mut count = 0;
        query.for_each(&store, |_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_query2_visits_shared_archetypes_only() {
        let mut store = store();
        let both = store.create_entity();
        store.add_component(both, Marker { id: 1 }).unwrap();
        store.add_component(both, Speed { value: 2.0 }).unwrap();
        let marker_only = store.create_entity();
        store.add_component(marker_only, Marker { id: 2 }).unwrap();

        let mut query = store.query2::<Marker, Speed>().unwrap();
        let mut seen = Vec::new();
        query.for_each(&store, |e, m, s| seen.push((e, m.id, s.value)));
        assert_eq!(seen, vec![(both, 1, 2.0)]);
    }

    #[test]
    fn test_for_each_mut_writes_through() {
        let mut store = store();
        let e = store.create_entity();
        store.add_component(e, Marker { id: 3 }).unwrap();
        store.add_component(e, Speed { value: 1.0 }).unwrap();

        let mut query = store.query2::<Marker, Speed>().unwrap();
        query.for_each_mut(&mut store, |_, m, s| {
            s.value += m.id as f32;
        });
        assert_eq!(store.get_component::<Speed>(e), Some(Speed { value: 4.0 }));
    }

    #[test]
    fn test_enumeration_follows_archetype_creation_order() {
        let mut store = store();
        // Archetype {Marker, Tag1} is created before {Marker}.
        let tagged = store.create_entity();
        store.add_component(tagged, Marker { id: 1 }).unwrap();
        store.add_tag::<Tag1>(tagged).unwrap();
        let plain = store.create_entity();
        store.add_component(plain, Marker { id: 2 }).unwrap();

        let mut query = store.query::<Marker>().unwrap();
        let mut order = Vec::new();
        query.for_each(&store, |e, _| order.push(e));
        // {Marker} came into being during `tagged`'s moves, before Tag1 was
        // added, so plain entities enumerate first.
        assert_eq!(order, vec![plain, tagged]);
    }

    #[test]
    fn test_relation_type_rejected_in_component_query() {
        let store = store();
        let err = store.query::<Follows>().err().unwrap();
        assert_eq!(
            err.to_string(),
            "relation component query cannot have other query components"
        );
    }

    #[test]
    fn test_relation_query_rejects_component_terms() {
        let store = store();
        let marker = store.component_index::<Marker>().unwrap();
        let mut filter = QueryFilter::new();
        filter.require_component(marker);
        let err = store.relation_query::<Follows>(filter).err().unwrap();
        assert_eq!(
            err.to_string(),
            "relation component query cannot have other query components"
        );
    }

    #[test]
    fn test_relation_enumeration_is_archetype_then_row_ordered() {
        let mut store = store();
        let plain = store.create_entity();
        let tagged = store.create_entity();
        store.add_tag::<Tag1>(tagged).unwrap();
        // Attachment order is the reverse of archetype order; enumeration
        // must follow the archetypes, not the relation store.
        store
            .add_relation(tagged, Follows { target: plain })
            .unwrap();
        store
            .add_relation(plain, Follows { target: tagged })
            .unwrap();

        let query = store.relation_query::<Follows>(QueryFilter::new()).unwrap();
        let mut owners = Vec::new();
        query.for_each(&store, |owner, _| owners.push(owner));
        assert_eq!(owners, vec![plain, tagged]);
    }

    #[test]
    fn test_relation_query_honors_owner_tags() {
        let mut store = store();
        let tagged = store.create_entity();
        store.add_tag::<Tag1>(tagged).unwrap();
        let plain = store.create_entity();
        store
            .add_relation(tagged, Follows { target: plain })
            .unwrap();
        store
            .add_relation(tagged, Follows { target: Entity(99) })
            .unwrap();
        store
            .add_relation(plain, Follows { target: tagged })
            .unwrap();

        let query = store.relation_query::<Follows>(QueryFilter::new()).unwrap();
        let mut count = 0;
        query.for_each(&store, |_, _| count += 1);
        assert_eq!(count, 3);

        let mut filter = QueryFilter::new();
        filter.require_tag(store.tag_index::<Tag1>().unwrap());
        let query = store.relation_query::<Follows>(filter).unwrap();
        let mut owners = Vec::new();
        query.for_each(&store, |owner, follows| owners.push((owner, follows.target)));
        assert_eq!(owners, vec![(tagged, plain), (tagged, Entity(99))]);
    }
}
