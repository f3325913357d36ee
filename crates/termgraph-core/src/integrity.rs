//! # Integrity Checks
//!
//! Post-load invariant checks. Every failure names the concept and, where
//! relevant, the characteristic type, so the report can be logged before
//! any delete-and-retry.

use crate::graph::GraphStore;
use crate::primitives;
use crate::types::{CharacteristicType, ConceptId, GraphError};
use std::fmt;

/// Which checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityOptions {
    /// Require an active Stated parent as well as an Inferred one.
    pub check_stated_parents: bool,
    /// Require a depth on every active concept.
    pub check_depth: bool,
    /// Number of leading active concepts sampled for descriptions; 0 disables.
    pub description_sample_size: usize,
    pub root: ConceptId,
}

impl Default for IntegrityOptions {
    fn default() -> Self {
        Self {
            check_stated_parents: true,
            check_depth: false,
            description_sample_size: primitives::DEFAULT_DESCRIPTION_SAMPLE,
            root: ConceptId(primitives::ROOT),
        }
    }
}

/// One invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// Active non-root concept without an active parent in a view.
    MissingParents {
        concept: ConceptId,
        characteristic_type: CharacteristicType,
    },
    /// Inactive concept still linked in a view.
    InactiveWithEdges {
        concept: ConceptId,
        characteristic_type: CharacteristicType,
    },
    /// Active IS-A relationship targets disagree with the adjacency parents.
    IsaMismatch {
        concept: ConceptId,
        characteristic_type: CharacteristicType,
        relationship_targets: usize,
        adjacency_parents: usize,
    },
    DepthMissing {
        concept: ConceptId,
    },
    /// The leading concepts carry fewer descriptions than concepts sampled.
    InsufficientDescriptions {
        sampled: usize,
        found: usize,
    },
    /// Referenced but never defined.
    Phantom {
        concept: ConceptId,
    },
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParents {
                concept,
                characteristic_type,
            } => write!(
                f,
                "active concept {} has no active {} parents",
                concept, characteristic_type
            ),
            Self::InactiveWithEdges {
                concept,
                characteristic_type,
            } => write!(
                f,
                "inactive concept {} still has {} parent/child edges",
                concept, characteristic_type
            ),
            Self::IsaMismatch {
                concept,
                characteristic_type,
                relationship_targets,
                adjacency_parents,
            } => write!(
                f,
                "concept {} has {} active {} IS-A targets but {} parents",
                concept, relationship_targets, characteristic_type, adjacency_parents
            ),
            Self::DepthMissing { concept } => {
                write!(f, "active concept {} has no hierarchy depth", concept)
            }
            Self::InsufficientDescriptions { sampled, found } => write!(
                f,
                "first {} concepts carry only {} descriptions; is this a classification-only export?",
                sampled, found
            ),
            Self::Phantom { concept } => {
                write!(f, "concept {} is referenced but never defined", concept)
            }
        }
    }
}

/// Outcome of one integrity pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub failures: Vec<IntegrityFailure>,
    pub concepts_checked: usize,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self, GraphError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(GraphError::Integrity(self))
        }
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 10;
        write!(
            f,
            "{} failure(s) across {} concepts",
            self.failures.len(),
            self.concepts_checked
        )?;
        for failure in self.failures.iter().take(SHOWN) {
            write!(f, "; {}", failure)?;
        }
        if self.failures.len() > SHOWN {
            write!(f, "; (+{} more)", self.failures.len() - SHOWN)?;
        }
        Ok(())
    }
}

/// Run every enabled check over the store.
#[must_use]
pub fn check(store: &GraphStore, options: &IntegrityOptions) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    let views: &[CharacteristicType] = if options.check_stated_parents {
        &[CharacteristicType::Inferred, CharacteristicType::Stated]
    } else {
        &[CharacteristicType::Inferred]
    };

    for concept in store.concepts() {
        let id = concept.id();
        report.concepts_checked += 1;

        if concept.is_phantom() {
            report.failures.push(IntegrityFailure::Phantom { concept: id });
            continue;
        }

        if !concept.is_active() {
            for view in [CharacteristicType::Stated, CharacteristicType::Inferred] {
                if !concept.adjacency(view).is_empty() {
                    report.failures.push(IntegrityFailure::InactiveWithEdges {
                        concept: id,
                        characteristic_type: view,
                    });
                }
            }
            continue;
        }

        let mut orphaned = false;
        if id != options.root {
            for view in views {
                let has_active_parent = concept
                    .parents(*view)
                    .iter()
                    .any(|p| store.concept(*p).is_some_and(|c| c.is_active()));
                if !has_active_parent {
                    orphaned = true;
                    report.failures.push(IntegrityFailure::MissingParents {
                        concept: id,
                        characteristic_type: *view,
                    });
                }
            }
        }

        for view in [CharacteristicType::Stated, CharacteristicType::Inferred] {
            let targets = concept.isa_targets(view);
            let parents = concept.parents(view);
            if targets != *parents {
                report.failures.push(IntegrityFailure::IsaMismatch {
                    concept: id,
                    characteristic_type: view,
                    relationship_targets: targets.len(),
                    adjacency_parents: parents.len(),
                });
            }
        }

        if options.check_depth && !orphaned && concept.depth().is_none() {
            report.failures.push(IntegrityFailure::DepthMissing { concept: id });
        }
    }

    if options.description_sample_size > 0 {
        let sample: Vec<_> = store
            .active_concepts()
            .take(options.description_sample_size)
            .collect();
        let found: usize = sample.iter().map(|c| c.description_ids().len()).sum();
        if found < sample.len() {
            report.failures.push(IntegrityFailure::InsufficientDescriptions {
                sampled: sample.len(),
                found,
            });
        }
    }

    if report.is_ok() {
        tracing::info!(concepts = report.concepts_checked, "integrity check passed");
    } else {
        tracing::warn!(failures = report.failures.len(), "integrity check failed: {}", report);
    }
    report
}
