//! # Remote Authoring Service
//!
//! The engine consumes, but does not implement, a remote terminology
//! service: branch metadata, paged expression search and package export.
//! The binary provides an HTTP implementation; tests provide mocks.

use crate::primitives;
use crate::types::{ConceptId, RemoteError};
use std::time::Duration;
use tracing::warn;

/// Metadata of one branch on the authoring service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchMetadata {
    pub path: String,
    /// Head commit time in milliseconds since the Unix epoch.
    pub head_timestamp: Option<u64>,
    /// Package key of the release this branch builds on.
    pub previous_package: Option<String>,
    /// Package key of the edition an extension depends on.
    pub dependency_package: Option<String>,
}

/// One page of a cursor-paginated concept search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<ConceptId>,
    /// Total matches declared by the service.
    pub total: usize,
    /// Cursor for the next page; `None` on the last page.
    pub search_after: Option<String>,
}

/// Operations the engine needs from the authoring service.
///
/// Implementations block the calling thread.
pub trait TerminologyServer: Send + Sync {
    fn branch_metadata(&self, branch: &str) -> Result<BranchMetadata, RemoteError>;

    fn search_concepts(
        &self,
        branch: &str,
        ecl: &str,
        search_after: Option<&str>,
        limit: usize,
    ) -> Result<SearchPage, RemoteError>;

    /// RF2 delta (zip bytes) of the unpublished changes on a branch.
    fn export_delta(&self, branch: &str) -> Result<Vec<u8>, RemoteError>;

    /// A published release package (zip bytes).
    fn download_package(&self, key: &str) -> Result<Vec<u8>, RemoteError>;
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Fixed attempt count with a fixed pause. Only transient errors retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: primitives::DEFAULT_REMOTE_ATTEMPTS,
            pause: primitives::DEFAULT_RETRY_PAUSE,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            pause,
        }
    }

    /// Run `call`, retrying transient failures.
    pub fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Err(RemoteError::Transient(reason)) if attempt < attempts => {
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        %reason,
                        "transient remote failure, retrying"
                    );
                    std::thread::sleep(self.pause);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// =============================================================================
// BRANCH METADATA LOOKUP
// =============================================================================

/// Parent path of a branch (`MAIN/A/B` → `MAIN/A`).
#[must_use]
pub fn parent_branch(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Walk up the branch path until `has_field` is satisfied.
///
/// Missing branches are skipped on the way up; the metadata of the
/// deepest level providing the field is returned.
pub fn find_branch_metadata(
    server: &dyn TerminologyServer,
    branch: &str,
    retry: &RetryPolicy,
    has_field: impl Fn(&BranchMetadata) -> bool,
) -> Result<BranchMetadata, RemoteError> {
    let mut current = Some(branch);
    let mut last_error = RemoteError::NotFound(branch.to_string());
    while let Some(path) = current {
        match retry.run("branch metadata", || server.branch_metadata(path)) {
            Ok(metadata) if has_field(&metadata) => return Ok(metadata),
            Ok(_) => {}
            Err(RemoteError::NotFound(what)) => last_error = RemoteError::NotFound(what),
            Err(other) => return Err(other),
        }
        current = parent_branch(path);
    }
    Err(last_error)
}
