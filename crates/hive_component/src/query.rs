//! Declarative tag and component constraints for archetype matching.

use crate::archetype::Signature;
use crate::schema::{SchemaIndex, TagIndex, TagSet};

/// Constraints narrowing which archetypes a query visits.
///
/// All constraint groups are AND-composed: a signature matches only when it
/// satisfies every group. Adding the same constraint twice is a no-op, so
/// filters can be narrowed incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    all_tags: TagSet,
    any_tags: TagSet,
    without_tags: TagSet,
    with_components: Vec<SchemaIndex>,
    without_components: Vec<SchemaIndex>,
}

impl QueryFilter {
    /// A filter matching every signature.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires every one of the given tags.
    pub fn require_tag(&mut self, tag: TagIndex) -> &mut Self {
        self.all_tags.set(tag);
        self
    }

    /// Requires at least one of the given tags.
    pub fn require_any_tag(&mut self, tag: TagIndex) -> &mut Self {
        self.any_tags.set(tag);
        self
    }

    /// Rejects signatures carrying any of the given tags.
    pub fn exclude_tag(&mut self, tag: TagIndex) -> &mut Self {
        self.without_tags.set(tag);
        self
    }

    /// Requires the component to be present.
    pub fn require_component(&mut self, index: SchemaIndex) -> &mut Self {
        if !self.with_components.contains(&index) {
            self.with_components.push(index);
        }
        self
    }

    /// Rejects signatures containing the component.
    pub fn exclude_component(&mut self, index: SchemaIndex) -> &mut Self {
        if !self.without_components.contains(&index) {
            self.without_components.push(index);
        }
        self
    }

    /// Whether any component constraint (required or excluded) is set.
    #[must_use]
    pub fn has_component_terms(&self) -> bool {
        !self.with_components.is_empty() || !self.without_components.is_empty()
    }

    /// Whether the signature satisfies every constraint group.
    #[must_use]
    pub fn matches(&self, signature: &Signature) -> bool {
        let tags = signature.tags();
        if !self.all_tags.is_subset_of(tags) {
            return false;
        }
        if !self.any_tags.is_empty() && !self.any_tags.intersects(tags) {
            return false;
        }
        if self.without_tags.intersects(tags) {
            return false;
        }
        if !self
            .with_components
            .iter()
            .all(|&c| signature.contains_component(c))
        {
            return false;
        }
        !self
            .without_components
            .iter()
            .any(|&c| signature.contains_component(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(components: Vec<SchemaIndex>, tags: &[TagIndex]) -> Signature {
        let mut set = TagSet::empty();
        for &t in tags {
            set.set(t);
        }
        Signature::new(components, set)
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = QueryFilter::new();
        assert!(filter.matches(&Signature::empty()));
        assert!(filter.matches(&sig(vec![SchemaIndex(1)], &[TagIndex(0)])));
    }

    #[test]
    fn test_all_tags_requires_every_tag() {
        let mut filter = QueryFilter::new();
        filter.require_tag(TagIndex(0)).require_tag(TagIndex(1));
        assert!(filter.matches(&sig(vec![], &[TagIndex(0), TagIndex(1), TagIndex(2)])));
        assert!(!filter.matches(&sig(vec![], &[TagIndex(0)])));
    }

    #[test]
    fn test_any_tags_requires_at_least_one() {
        let mut filter = QueryFilter::new();
        filter
            .require_any_tag(TagIndex(0))
            .require_any_tag(TagIndex(1));
        assert!(filter.matches(&sig(vec![], &[TagIndex(1)])));
        assert!(!filter.matches(&sig(vec![], &[TagIndex(2)])));
    }

    #[test]
    fn test_exclude_tag_rejects_carriers() {
        let mut filter = QueryFilter::new();
        filter.exclude_tag(TagIndex(3));
        assert!(filter.matches(&sig(vec![], &[TagIndex(0)])));
        assert!(!filter.matches(&sig(vec![], &[TagIndex(0), TagIndex(3)])));
    }

    #[test]
    fn test_component_terms_compose_with_tags() {
        let mut filter = QueryFilter::new();
        filter
            .require_tag(TagIndex(0))
            .require_component(SchemaIndex(1))
            .exclude_component(SchemaIndex(2));
        assert!(filter.has_component_terms());
        assert!(filter.matches(&sig(vec![SchemaIndex(1)], &[TagIndex(0)])));
        assert!(!filter.matches(&sig(vec![SchemaIndex(1), SchemaIndex(2)], &[TagIndex(0)])));
        assert!(!filter.matches(&sig(vec![SchemaIndex(1)], &[])));
    }

    #[test]
    fn test_narrowing_is_idempotent() {
        let mut a = QueryFilter::new();
        a.require_component(SchemaIndex(1))
            .require_component(SchemaIndex(1))
            .require_tag(TagIndex(2))
            .require_tag(TagIndex(2));
        let mut b = QueryFilter::new();
        b.require_component(SchemaIndex(1)).require_tag(TagIndex(2));
        assert_eq!(a, b);
    }
}
