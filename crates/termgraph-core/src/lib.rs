//! # termgraph-core
//!
//! The in-memory ontology graph engine for termgraph.
//!
//! This crate ingests RF2 snapshot and delta exports, merges them into one
//! concept graph and serves hierarchy queries from memoized closures.
//!
//! ## Layers
//!
//! - `types`, `rf2`: record model and tab-delimited file parsing
//! - `axiom`: OWL axioms materialized into grouped relationships
//! - `graph`: the store and its merge rules
//! - `closure`, `ecl`: derived caches over the store
//! - `integrity`: post-load invariant checks
//! - `archive`: archive containers, snapshot generation and the load
//!   state machine
//! - `session`: one owned context tying the above together
//!
//! ## Architectural Constraints
//!
//! - No async, no network stack: the authoring service is the
//!   [`remote::TerminologyServer`] trait, implemented by the caller
//! - One writer per load pass (`&mut Session`); queries take `&Session`
//! - Ordered collections everywhere so output is deterministic

// =============================================================================
// MODULES
// =============================================================================

pub mod archive;
pub mod axiom;
pub mod closure;
pub mod config;
pub mod ecl;
pub mod graph;
pub mod integrity;
pub mod primitives;
pub mod remote;
pub mod rf2;
pub mod session;
pub mod storage;
pub mod types;

#[cfg(test)]
mod fixture;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CharacteristicType, Concept, ConceptId, DefinitionStatus, Description, DescriptionId,
    EffectiveTime, GraphError, LoadMode, Relationship, RelationshipId, RelationshipTarget,
    RemoteError,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use axiom::{AxiomRepresentation, Materialized, materialize};
pub use closure::{ClosureCache, ClosureDiff, ConceptSet, TransitiveClosure};
pub use ecl::{EclCache, EclForm, EclSettings};
pub use graph::{GraphStore, LoadStats, Lookup, PhantomPolicy, StoreOptions};
pub use integrity::{IntegrityFailure, IntegrityOptions, IntegrityReport};
pub use rf2::{ComponentFile, RefsetKind, Rf2Reader};
pub use session::Session;

// =============================================================================
// RE-EXPORTS: Orchestration
// =============================================================================

pub use archive::{ArchiveManager, LoadFlags, LoadOutcome, LoadState, ProjectTarget, SnapshotGenerator};
pub use config::EngineConfig;
pub use remote::{BranchMetadata, RetryPolicy, SearchPage, TerminologyServer};
pub use storage::EclCacheStore;
