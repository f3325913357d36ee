//! # Well-Known Identifiers and Limits
//!
//! Concept ids the engine interprets directly, plus the fixed limits and
//! default timings used by loading, querying and the archive orchestrator.
//!
//! These are compiled into the binary and are immutable at runtime.

use std::time::Duration;

// =============================================================================
// ANCHOR CONCEPTS
// =============================================================================

/// Root of the concept hierarchy.
pub const ROOT: u64 = 138_875_005;

/// The IS-A attribute type.
pub const IS_A: u64 = 116_680_003;

pub const CONCEPT_MODEL_ATTRIBUTE: u64 = 410_662_002;
pub const CONCEPT_MODEL_OBJECT_ATTRIBUTE: u64 = 762_705_008;
pub const CONCEPT_MODEL_DATA_ATTRIBUTE: u64 = 762_706_009;
pub const CLINICAL_FINDING: u64 = 404_684_003;
pub const DISEASE: u64 = 64_572_001;
pub const PROCEDURE: u64 = 71_388_002;
pub const BODY_STRUCTURE: u64 = 123_037_004;
pub const SUBSTANCE: u64 = 105_590_001;

/// Attribute used in OWL axioms to introduce a relationship group.
pub const ROLE_GROUP: u64 = 609_096_000;

/// Concepts re-seeded on every store reset so their identity survives it.
pub const ANCHORS: [u64; 11] = [
    ROOT,
    IS_A,
    CONCEPT_MODEL_ATTRIBUTE,
    CONCEPT_MODEL_OBJECT_ATTRIBUTE,
    CONCEPT_MODEL_DATA_ATTRIBUTE,
    CLINICAL_FINDING,
    DISEASE,
    PROCEDURE,
    BODY_STRUCTURE,
    SUBSTANCE,
    ROLE_GROUP,
];

// =============================================================================
// METADATA CONCEPTS
// =============================================================================

pub const STATED_RELATIONSHIP: u64 = 900_000_000_000_010_007;
pub const INFERRED_RELATIONSHIP: u64 = 900_000_000_000_011_006;
pub const ADDITIONAL_RELATIONSHIP: u64 = 900_000_000_000_227_009;

pub const PRIMITIVE: u64 = 900_000_000_000_074_008;
pub const FULLY_DEFINED: u64 = 900_000_000_000_073_002;

pub const FSN: u64 = 900_000_000_000_003_001;
pub const SYNONYM: u64 = 900_000_000_000_013_009;
pub const TEXT_DEFINITION: u64 = 900_000_000_000_550_004;

pub const PREFERRED: u64 = 900_000_000_000_548_007;
pub const ACCEPTABLE: u64 = 900_000_000_000_549_004;

/// Existential restriction modifier (the only one in use).
pub const EXISTENTIAL_MODIFIER: u64 = 900_000_000_000_451_002;

pub const US_ENGLISH_REFSET: u64 = 900_000_000_000_509_007;
pub const GB_ENGLISH_REFSET: u64 = 900_000_000_000_508_004;

pub const CONCEPT_INACTIVATION_REFSET: u64 = 900_000_000_000_489_007;
pub const DESCRIPTION_INACTIVATION_REFSET: u64 = 900_000_000_000_490_003;

pub const OWL_AXIOM_REFSET: u64 = 733_073_007;

// =============================================================================
// LIMITS
// =============================================================================

/// Ceiling for breadth-first depth assignment from the root.
pub const MAX_HIERARCHY_DEPTH: u32 = 100;

/// A failed load is retried once after deleting the artifact.
pub const MAX_LOAD_RETRIES: u32 = 1;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Page size for remote concept searches.
pub const DEFAULT_ECL_PAGE_SIZE: usize = 10_000;

/// Attempts for a remote call that fails transiently.
pub const DEFAULT_REMOTE_ATTEMPTS: u32 = 3;

/// Pause between transient-failure retries.
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Pause before re-running a remote search that came back empty.
pub const DEFAULT_EMPTY_RESULT_PAUSE: Duration = Duration::from_secs(3);

/// Concepts sampled by the description integrity check.
pub const DEFAULT_DESCRIPTION_SAMPLE: usize = 100;
