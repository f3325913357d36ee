//! # redb-backed Expression Cache
//!
//! Stores resolved expression results as id-only ("thin") entries keyed by
//! (branch, normalized expression). Entries are rehydrated against the
//! live graph by [`crate::ecl::EclCache`] on first access.
//!
//! - ACID writes: one transaction per `put_many`
//! - Values are postcard-encoded `Vec<u64>`

use crate::types::{ConceptId, GraphError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// (branch, normalized expression) -> postcard `Vec<u64>`
const ECL_RESULTS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("ecl_results");

/// File name inside the cache directory.
pub const ECL_CACHE_FILE: &str = "ecl-cache.redb";

fn storage<E: std::fmt::Display>(e: E) -> GraphError {
    GraphError::Storage(e.to_string())
}

/// One persisted expression result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredExpression {
    pub branch: String,
    pub expression: String,
    pub concepts: Vec<ConceptId>,
}

/// Disk-backed expression result store.
pub struct EclCacheStore {
    db: Database,
}

impl std::fmt::Debug for EclCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EclCacheStore").finish_non_exhaustive()
    }
}

impl EclCacheStore {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let db = Database::create(path.as_ref()).map_err(storage)?;
        {
            let write_txn = db.begin_write().map_err(storage)?;
            let _ = write_txn.open_table(ECL_RESULTS).map_err(storage)?;
            write_txn.commit().map_err(storage)?;
        }
        Ok(Self { db })
    }

    /// Open `ecl-cache.redb` inside a cache directory.
    pub fn open_in(cache_dir: impl AsRef<Path>) -> Result<Self, GraphError> {
        Self::open(cache_dir.as_ref().join(ECL_CACHE_FILE))
    }

    pub fn get(&self, branch: &str, expression: &str) -> Result<Option<Vec<ConceptId>>, GraphError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(ECL_RESULTS).map_err(storage)?;
        table
            .get((branch, expression))
            .map_err(storage)?
            .map(|data| decode(data.value()))
            .transpose()
    }

    /// Write a batch of entries in a single transaction.
    pub fn put_many(&self, entries: &[StoredExpression]) -> Result<(), GraphError> {
        if entries.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = write_txn.open_table(ECL_RESULTS).map_err(storage)?;
            for entry in entries {
                let ids: Vec<u64> = entry.concepts.iter().map(|c| c.0).collect();
                let bytes = postcard::to_allocvec(&ids).map_err(storage)?;
                table
                    .insert(
                        (entry.branch.as_str(), entry.expression.as_str()),
                        bytes.as_slice(),
                    )
                    .map_err(storage)?;
            }
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    pub fn remove(&self, branch: &str, expression: &str) -> Result<bool, GraphError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let removed = {
            let mut table = write_txn.open_table(ECL_RESULTS).map_err(storage)?;
            table.remove((branch, expression)).map_err(storage)?.is_some()
        };
        write_txn.commit().map_err(storage)?;
        Ok(removed)
    }

    /// Every persisted entry, in key order.
    pub fn entries(&self) -> Result<Vec<StoredExpression>, GraphError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(ECL_RESULTS).map_err(storage)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (key, value) = entry.map_err(storage)?;
            let (branch, expression) = key.value();
            out.push(StoredExpression {
                branch: branch.to_string(),
                expression: expression.to_string(),
                concepts: decode(value.value())?,
            });
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, GraphError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(ECL_RESULTS).map_err(storage)?;
        Ok(table.len().map_err(storage)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, GraphError> {
        Ok(self.len()? == 0)
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<(), GraphError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        write_txn.delete_table(ECL_RESULTS).map_err(storage)?;
        let _ = write_txn.open_table(ECL_RESULTS).map_err(storage)?;
        write_txn.commit().map_err(storage)?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<ConceptId>, GraphError> {
    let ids: Vec<u64> = postcard::from_bytes(bytes).map_err(storage)?;
    Ok(ids.into_iter().map(ConceptId).collect())
}
