//! # Session Module
//!
//! One owned context per loaded graph: the store, its derived caches and
//! the optional remote service. Nothing is global; two sessions never
//! share state.
//!
//! - Derived caches are dropped whenever the store is borrowed mutably
//! - `reset` wipes the graph and re-seeds the anchor concepts
//! - `ready` is only set by a load that passed its integrity check

use crate::closure::{ClosureCache, ConceptSet, TransitiveClosure};
use crate::config::EngineConfig;
use crate::ecl::{EclCache, EclContext, EclSettings};
use crate::graph::{GraphStore, PhantomPolicy, StoreOptions};
use crate::integrity::{self, IntegrityOptions, IntegrityReport};
use crate::primitives;
use crate::remote::TerminologyServer;
use crate::types::{CharacteristicType, ConceptId, GraphError};
use std::sync::Arc;
use tracing::info;

/// A loaded (or loading) graph and everything derived from it.
pub struct Session {
    store: GraphStore,
    stated: ClosureCache,
    inferred: ClosureCache,
    ecl: EclCache,
    previous_closure: Option<TransitiveClosure>,
    server: Option<Arc<dyn TerminologyServer>>,
    ready: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("concepts", &self.store.concept_count())
            .field("ready", &self.ready)
            .field("remote", &self.server.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(StoreOptions::default(), EclSettings::default())
    }
}

impl Session {
    #[must_use]
    pub fn new(options: StoreOptions, ecl: EclSettings) -> Self {
        Self {
            store: GraphStore::new(options),
            stated: ClosureCache::new(CharacteristicType::Stated),
            inferred: ClosureCache::new(CharacteristicType::Inferred),
            ecl: EclCache::new(ecl),
            previous_closure: None,
            server: None,
            ready: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.store_options(), config.ecl_settings())
    }

    /// Attach the remote service used for complex expressions.
    #[must_use]
    pub fn with_server(mut self, server: Arc<dyn TerminologyServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn set_server(&mut self, server: Option<Arc<dyn TerminologyServer>>) {
        self.server = server;
    }

    #[must_use]
    pub fn server(&self) -> Option<&dyn TerminologyServer> {
        self.server.as_deref()
    }

    #[must_use]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Mutable store access. Drops every derived cache and the ready flag.
    pub fn store_mut(&mut self) -> &mut GraphStore {
        self.invalidate_caches();
        self.ready = false;
        &mut self.store
    }

    /// Wipe the graph, every cache and the previous closure.
    pub fn reset(&mut self) {
        self.store.reset();
        self.invalidate_caches();
        self.previous_closure = None;
        self.ready = false;
        info!("session reset");
    }

    fn invalidate_caches(&self) {
        self.stated.invalidate();
        self.inferred.invalidate();
        self.ecl.invalidate();
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// End-of-load passes: phantom resolution, then optional depth.
    pub fn finish_load(&mut self, policy: &PhantomPolicy, populate_depth: bool) -> Result<(), GraphError> {
        let store = self.store_mut();
        store.resolve_phantoms(policy)?;
        if populate_depth {
            store.populate_hierarchy_depth(ConceptId(primitives::ROOT))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn check_integrity(&self, options: &IntegrityOptions) -> IntegrityReport {
        integrity::check(&self.store, options)
    }

    /// Closure cache of a hierarchy view; `None` for Additional.
    #[must_use]
    pub fn closure(&self, characteristic_type: CharacteristicType) -> Option<&ClosureCache> {
        match characteristic_type {
            CharacteristicType::Stated => Some(&self.stated),
            CharacteristicType::Inferred => Some(&self.inferred),
            CharacteristicType::Additional => None,
        }
    }

    fn hierarchy(&self, characteristic_type: CharacteristicType) -> Result<&ClosureCache, GraphError> {
        self.closure(characteristic_type).ok_or_else(|| {
            GraphError::Config(format!("{} relationships carry no hierarchy", characteristic_type))
        })
    }

    pub fn ancestors(
        &self,
        id: ConceptId,
        characteristic_type: CharacteristicType,
    ) -> Result<ConceptSet, GraphError> {
        self.hierarchy(characteristic_type)?.ancestors(&self.store, id)
    }

    pub fn descendants(
        &self,
        id: ConceptId,
        characteristic_type: CharacteristicType,
    ) -> Result<ConceptSet, GraphError> {
        self.hierarchy(characteristic_type)?.descendants(&self.store, id)
    }

    pub fn descendants_or_self(
        &self,
        id: ConceptId,
        characteristic_type: CharacteristicType,
    ) -> Result<ConceptSet, GraphError> {
        self.hierarchy(characteristic_type)?
            .descendants_or_self(&self.store, id)
    }

    pub fn is_subsumed_by(
        &self,
        child: ConceptId,
        parent: ConceptId,
        characteristic_type: CharacteristicType,
    ) -> Result<bool, GraphError> {
        self.hierarchy(characteristic_type)?
            .is_descendant_or_self(&self.store, child, parent)
    }

    /// Resolve an expression on a branch through the expression cache.
    pub fn resolve_ecl(&self, branch: &str, expression: &str) -> Result<ConceptSet, GraphError> {
        let ctx = EclContext {
            store: &self.store,
            closure: &self.inferred,
            server: self.server(),
        };
        self.ecl.resolve(&ctx, branch, expression)
    }

    #[must_use]
    pub fn ecl_cache(&self) -> &EclCache {
        &self.ecl
    }

    /// Full transitive closure of the current graph.
    #[must_use]
    pub fn transitive_closure(&self, characteristic_type: CharacteristicType) -> TransitiveClosure {
        TransitiveClosure::build(&self.store, characteristic_type)
    }

    #[must_use]
    pub fn previous_closure(&self) -> Option<&TransitiveClosure> {
        self.previous_closure.as_ref()
    }

    pub fn set_previous_closure(&mut self, closure: Option<TransitiveClosure>) {
        self.previous_closure = closure;
    }
}

// =============================================================================
// TESTS
// =============================================================================
