//! # Persistent Storage
//!
//! The graph itself is never persisted; RF2 archives are the source of
//! truth. The only on-disk engine state is the expression cache, kept in a
//! redb file next to the archives so resolved subsumption sets survive a
//! process restart.

mod ecl_store;

pub use ecl_store::{EclCacheStore, StoredExpression};
