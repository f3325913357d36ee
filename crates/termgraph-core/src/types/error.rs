//! Error types for the engine.

use super::{CharacteristicType, ConceptId};
use crate::integrity::IntegrityReport;
use thiserror::Error;

/// Errors raised by the remote authoring service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network or pagination hiccup. Retried a fixed number of times.
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// The branch, package or resource does not exist.
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    /// The service answered but refused the request.
    #[error("Remote service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// No remote service is configured for this session.
    #[error("No remote service configured")]
    Unavailable,
}

/// Errors that can occur while loading or querying the graph.
///
/// - Parsing and merge errors abort the whole load
/// - Expected absence (`NotFound`) is a value, not a panic
/// - The engine never panics on bad input
#[derive(Debug, Error)]
pub enum GraphError {
    /// A malformed RF2 row or header.
    #[error("Malformed RF2 input in {source_name} at line {line}: {reason}")]
    Structural {
        source_name: String,
        line: usize,
        reason: String,
    },

    /// An axiom expression that could not be converted into relationships.
    #[error("Cannot convert axiom {axiom} of concept {concept}: {reason}")]
    Conversion {
        concept: ConceptId,
        axiom: String,
        reason: String,
    },

    /// The concept is not registered in the store.
    #[error("Concept not found: {0}")]
    NotFound(ConceptId),

    /// The concept is registered but not active.
    #[error("Concept {0} is inactive")]
    InactiveConcept(ConceptId),

    /// Post-load invariant violation.
    #[error("Integrity check failed: {0}")]
    Integrity(IntegrityReport),

    /// Concepts referenced but never defined.
    #[error("{} phantom concept(s) referenced but never defined: {}", phantoms.len(), format_ids(phantoms))]
    Reference { phantoms: Vec<ConceptId> },

    /// A cycle was found in a hierarchy view.
    #[error("Cycle detected in {characteristic_type} hierarchy involving concept {concept}")]
    CycleDetected {
        concept: ConceptId,
        characteristic_type: CharacteristicType,
    },

    /// The hierarchy is deeper than the fixed ceiling.
    #[error("Concept {concept} exceeds the maximum hierarchy depth of {depth}")]
    DepthExceeded { concept: ConceptId, depth: u32 },

    /// The same concept was returned twice by a paged remote search.
    #[error("Duplicate concept {concept} in paged results for '{expression}'")]
    DuplicateResult {
        expression: String,
        concept: ConceptId,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A load that kept failing after the allowed retry.
    #[error("Load failed after {attempts} attempt(s): {cause}")]
    Unrecoverable {
        attempts: u32,
        cause: Box<GraphError>,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl GraphError {
    /// Build a structural error for one input line.
    pub fn structural(source_name: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::Structural {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }

    /// True for failures that a delete-and-retry may fix.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Integrity(_) | Self::Reference { .. })
    }
}

impl From<std::io::Error> for GraphError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

fn format_ids(ids: &[ConceptId]) -> String {
    const SHOWN: usize = 20;
    let mut out = ids
        .iter()
        .take(SHOWN)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if ids.len() > SHOWN {
        out.push_str(&format!(" (+{} more)", ids.len() - SHOWN));
    }
    out
}
