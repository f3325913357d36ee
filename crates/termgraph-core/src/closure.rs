//! # Closure Caches
//!
//! Memoized ancestor/descendant sets per characteristic type, and the
//! full transitive closure used for cross-release statistics.
//!
//! Memo maps are `DashMap`s so queries only need `&self`. Invalidation is
//! all-or-nothing.

use crate::graph::GraphStore;
use crate::types::{CharacteristicType, ConceptId, GraphError};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Breadth-first reachability over one adjacency view, excluding the start.
fn reach(
    store: &GraphStore,
    start: ConceptId,
    view: CharacteristicType,
    direction: Direction,
) -> BTreeSet<ConceptId> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        let Some(concept) = store.concept(id) else {
            continue;
        };
        let next = match direction {
            Direction::Up => concept.parents(view),
            Direction::Down => concept.children(view),
        };
        for n in next {
            if *n != start && seen.insert(*n) {
                queue.push_back(*n);
            }
        }
    }
    seen
}

// =============================================================================
// CLOSURE CACHE
// =============================================================================

/// Shared, immutable concept set.
pub type ConceptSet = Arc<BTreeSet<ConceptId>>;

/// Lazily computed ancestor/descendant sets for one characteristic type.
#[derive(Debug)]
pub struct ClosureCache {
    characteristic_type: CharacteristicType,
    ancestors: DashMap<ConceptId, ConceptSet>,
    descendants: DashMap<ConceptId, ConceptSet>,
    descendants_or_self: DashMap<ConceptId, ConceptSet>,
}

impl ClosureCache {
    #[must_use]
    pub fn new(characteristic_type: CharacteristicType) -> Self {
        Self {
            characteristic_type,
            ancestors: DashMap::new(),
            descendants: DashMap::new(),
            descendants_or_self: DashMap::new(),
        }
    }

    #[must_use]
    pub fn characteristic_type(&self) -> CharacteristicType {
        self.characteristic_type
    }

    /// All ancestors of an active concept.
    pub fn ancestors(&self, store: &GraphStore, id: ConceptId) -> Result<ConceptSet, GraphError> {
        store.require_active(id)?;
        if let Some(hit) = self.ancestors.get(&id) {
            return Ok(Arc::clone(hit.value()));
        }
        let set = Arc::new(reach(store, id, self.characteristic_type, Direction::Up));
        self.ancestors.insert(id, Arc::clone(&set));
        Ok(set)
    }

    /// All descendants of an active concept.
    pub fn descendants(&self, store: &GraphStore, id: ConceptId) -> Result<ConceptSet, GraphError> {
        store.require_active(id)?;
        if let Some(hit) = self.descendants.get(&id) {
            return Ok(Arc::clone(hit.value()));
        }
        let set = Arc::new(reach(store, id, self.characteristic_type, Direction::Down));
        self.descendants.insert(id, Arc::clone(&set));
        Ok(set)
    }

    /// Descendants plus the concept itself, as a shared read-only view.
    pub fn descendants_or_self(
        &self,
        store: &GraphStore,
        id: ConceptId,
    ) -> Result<ConceptSet, GraphError> {
        store.require_active(id)?;
        if let Some(hit) = self.descendants_or_self.get(&id) {
            return Ok(Arc::clone(hit.value()));
        }
        let mut set = (*self.descendants(store, id)?).clone();
        set.insert(id);
        let set = Arc::new(set);
        self.descendants_or_self.insert(id, Arc::clone(&set));
        Ok(set)
    }

    /// Descendants plus self as a private copy the caller may modify.
    pub fn descendants_or_self_owned(
        &self,
        store: &GraphStore,
        id: ConceptId,
    ) -> Result<BTreeSet<ConceptId>, GraphError> {
        self.descendants_or_self(store, id).map(|set| (*set).clone())
    }

    /// Whether `child` is `parent` or one of its descendants.
    pub fn is_descendant_or_self(
        &self,
        store: &GraphStore,
        child: ConceptId,
        parent: ConceptId,
    ) -> Result<bool, GraphError> {
        Ok(child == parent || self.ancestors(store, child)?.contains(&parent))
    }

    /// Number of memoized entries across all maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ancestors.len() + self.descendants.len() + self.descendants_or_self.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every memoized entry.
    pub fn invalidate(&self) {
        self.ancestors.clear();
        self.descendants.clear();
        self.descendants_or_self.clear();
    }
}

// =============================================================================
// TRANSITIVE CLOSURE
// =============================================================================

/// Change statistics between two transitive closures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosureDiff {
    /// (descendant, ancestor) pairs present now but not before.
    pub gained: usize,
    /// Pairs present before but not now.
    pub lost: usize,
    pub new_concepts: usize,
    pub retired_concepts: usize,
}

/// Ancestor sets of every active concept, computed eagerly.
#[derive(Debug)]
pub struct TransitiveClosure {
    characteristic_type: CharacteristicType,
    ancestors: DashMap<ConceptId, BTreeSet<ConceptId>>,
}

impl TransitiveClosure {
    /// Compute the closure with one independent task per active concept.
    #[must_use]
    pub fn build(store: &GraphStore, characteristic_type: CharacteristicType) -> Self {
        let ids = store.active_ids();
        let ancestors = DashMap::with_capacity(ids.len());
        ids.par_iter().for_each(|id| {
            ancestors.insert(*id, reach(store, *id, characteristic_type, Direction::Up));
        });
        tracing::debug!(
            %characteristic_type,
            concepts = ids.len(),
            "transitive closure built"
        );
        Self {
            characteristic_type,
            ancestors,
        }
    }

    #[must_use]
    pub fn characteristic_type(&self) -> CharacteristicType {
        self.characteristic_type
    }

    #[must_use]
    pub fn is_subsumed_by(&self, child: ConceptId, parent: ConceptId) -> bool {
        self.ancestors
            .get(&child)
            .is_some_and(|set| set.contains(&parent))
    }

    #[must_use]
    pub fn ancestors(&self, id: ConceptId) -> Option<BTreeSet<ConceptId>> {
        self.ancestors.get(&id).map(|set| set.value().clone())
    }

    /// Descendants by reverse lookup over the whole closure.
    #[must_use]
    pub fn descendants(&self, id: ConceptId) -> BTreeSet<ConceptId> {
        self.ancestors
            .iter()
            .filter(|entry| entry.value().contains(&id))
            .map(|entry| *entry.key())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: ConceptId) -> bool {
        self.ancestors.contains_key(&id)
    }

    /// Number of concepts in the closure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// Total number of (descendant, ancestor) pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.ancestors.iter().map(|entry| entry.value().len()).sum()
    }

    /// Pair-level differences against an earlier closure.
    #[must_use]
    pub fn compare(&self, previous: &Self) -> ClosureDiff {
        let mut diff = ClosureDiff::default();
        for entry in &self.ancestors {
            match previous.ancestors.get(entry.key()) {
                Some(before) => {
                    diff.gained += entry.value().difference(before.value()).count();
                    diff.lost += before.value().difference(entry.value()).count();
                }
                None => {
                    diff.new_concepts += 1;
                    diff.gained += entry.value().len();
                }
            }
        }
        for entry in &previous.ancestors {
            if !self.ancestors.contains_key(entry.key()) {
                diff.retired_concepts += 1;
                diff.lost += entry.value().len();
            }
        }
        diff
    }
}

// =============================================================================
// TESTS
// =============================================================================
