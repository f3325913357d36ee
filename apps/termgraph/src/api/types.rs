//! # API Request/Response Types
//!
//! JSON structures for the query API.

use serde::{Deserialize, Serialize};
use termgraph_core::{
    CharacteristicType, Concept, ConceptId, GraphError, GraphStore, IntegrityReport,
};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Graph status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Whether the last load passed its integrity check.
    pub ready: bool,
    pub concepts: usize,
    pub active_concepts: usize,
    pub descriptions: usize,
    pub relationships: usize,
    pub cached_expressions: usize,
    pub warnings: usize,
}

// =============================================================================
// CONCEPT RESPONSES
// =============================================================================

/// One concept with its immediate hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptResponse {
    pub id: u64,
    pub active: bool,
    pub phantom: bool,
    pub fully_defined: bool,
    pub module: Option<u64>,
    pub effective_time: Option<String>,
    pub depth: Option<u32>,
    pub fsn: Option<String>,
    pub stated_parents: Vec<u64>,
    pub inferred_parents: Vec<u64>,
    pub descriptions: usize,
}

impl ConceptResponse {
    #[must_use]
    pub fn from_concept(store: &GraphStore, concept: &Concept) -> Self {
        let ids = |view: CharacteristicType| {
            concept
                .parents(view)
                .iter()
                .map(|c: &ConceptId| c.0)
                .collect::<Vec<_>>()
        };
        Self {
            id: concept.id().0,
            active: concept.is_active(),
            phantom: concept.is_phantom(),
            fully_defined: concept
                .definition_status()
                .is_some_and(|s| s == termgraph_core::DefinitionStatus::FullyDefined),
            module: concept.record().map(|r| r.module.0),
            effective_time: concept.effective_time().map(|t| t.to_string()),
            depth: concept.depth(),
            fsn: store.fsn(concept.id()).map(str::to_string),
            stated_parents: ids(CharacteristicType::Stated),
            inferred_parents: ids(CharacteristicType::Inferred),
            descriptions: concept.description_ids().len(),
        }
    }
}

/// Hierarchy view selector for `?form=`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Form {
    Stated,
    #[default]
    Inferred,
}

impl From<Form> for CharacteristicType {
    fn from(form: Form) -> Self {
        match form {
            Form::Stated => Self::Stated,
            Form::Inferred => Self::Inferred,
        }
    }
}

/// Query string of the hierarchy endpoints.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HierarchyQuery {
    #[serde(default)]
    pub form: Form,
    /// Include the concept itself (descendants only).
    #[serde(default, rename = "self")]
    pub include_self: bool,
}

/// A set of concept ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptSetResponse {
    pub concept: u64,
    pub form: Form,
    pub count: usize,
    pub ids: Vec<u64>,
}

// =============================================================================
// EXPRESSION REQUEST/RESPONSE
// =============================================================================

/// Expression resolution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EclRequest {
    pub expression: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "MAIN".to_string()
}

impl EclRequest {
    /// Reject empty or oversized expressions before they reach the engine.
    pub fn validate(&self) -> Result<(), GraphError> {
        const MAX_EXPRESSION_LENGTH: usize = 16 * 1024;
        if self.expression.trim().is_empty() {
            return Err(GraphError::Config("expression must not be empty".into()));
        }
        if self.expression.len() > MAX_EXPRESSION_LENGTH {
            return Err(GraphError::Config(format!(
                "expression length {} exceeds maximum {} bytes",
                self.expression.len(),
                MAX_EXPRESSION_LENGTH
            )));
        }
        if self.branch.is_empty() {
            return Err(GraphError::Config("branch must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EclResponse {
    pub expression: String,
    pub branch: String,
    pub count: usize,
    pub ids: Vec<u64>,
}

// =============================================================================
// INTEGRITY RESPONSE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityResponse {
    pub ok: bool,
    pub concepts_checked: usize,
    pub failures: Vec<String>,
}

impl From<&IntegrityReport> for IntegrityResponse {
    fn from(report: &IntegrityReport) -> Self {
        Self {
            ok: report.is_ok(),
            concepts_checked: report.concepts_checked,
            failures: report.failures.iter().map(ToString::to_string).collect(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
