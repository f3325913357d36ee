//! # Core Type Definitions
//!
//! This module contains the value types shared by every engine component:
//! - Component identifiers (`ConceptId`, `DescriptionId`, `RelationshipId`, `MemberId`)
//! - RF2 enumerations (`CharacteristicType`, `DefinitionStatus`, `DescriptionType`, ...)
//! - Component records (`Concept`, `Relationship`, `Axiom`, `Description`, refset members)
//! - Error types (`GraphError`, `RemoteError`)
//!
//! ## Determinism Guarantees
//!
//! All identifier and enumeration types implement `Ord` so that every index in
//! the engine can be a `BTreeMap`/`BTreeSet` with stable iteration order.

mod component;
mod error;

pub use component::*;
pub use error::*;

use crate::primitives;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// COMPONENT IDENTIFIERS
// =============================================================================

macro_rules! sctid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }
    };
}

sctid_newtype!(
    /// Identifier of a concept (the numeric SCTID as published in RF2).
    ConceptId
);

sctid_newtype!(
    /// Identifier of a description or text definition.
    DescriptionId
);

sctid_newtype!(
    /// Identifier of a released relationship row.
    RelationshipId
);

/// Identifier of a reference set member (a UUID in RF2).
///
/// OWL axioms are refset members, so an axiom's identity is its member id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axioms are identified by their OWL refset member id.
pub type AxiomId = MemberId;

// =============================================================================
// EFFECTIVE TIME
// =============================================================================

/// An RF2 effective time (`YYYYMMDD`).
///
/// Components that have not been published yet carry no effective time;
/// the engine models that as `Option<EffectiveTime>::None`, which always
/// sorts after any published date (see [`EffectiveTime::compare`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EffectiveTime(pub u32);

impl EffectiveTime {
    /// Parse an RF2 effective time field. Empty text means "unpublished".
    pub fn parse_field(s: &str) -> Result<Option<Self>, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid effective time '{}'", s));
        }
        s.parse::<u32>()
            .map(|v| Some(Self(v)))
            .map_err(|e| format!("invalid effective time '{}': {}", s, e))
    }

    /// Compare two optional effective times, treating `None` (unpublished)
    /// as newer than every published date.
    #[must_use]
    pub fn compare(a: Option<Self>, b: Option<Self>) -> Ordering {
        let rank = |t: Option<Self>| t.map_or(u64::MAX, |t| u64::from(t.0));
        rank(a).cmp(&rank(b))
    }

    /// True when `incoming` is strictly older than `existing`.
    #[must_use]
    pub fn is_older(incoming: Option<Self>, existing: Option<Self>) -> bool {
        Self::compare(incoming, existing) == Ordering::Less
    }
}

impl fmt::Display for EffectiveTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

// =============================================================================
// RF2 ENUMERATIONS
// =============================================================================

/// Characteristic type of a relationship.
///
/// Stated and Inferred each own an adjacency view; Additional relationships
/// are recorded but never contribute to the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CharacteristicType {
    Stated,
    Inferred,
    Additional,
}

impl CharacteristicType {
    /// The two hierarchy views maintained by the store.
    pub const VIEWS: [Self; 2] = [Self::Stated, Self::Inferred];

    pub fn from_sctid(id: ConceptId) -> Option<Self> {
        match id.0 {
            primitives::STATED_RELATIONSHIP => Some(Self::Stated),
            primitives::INFERRED_RELATIONSHIP => Some(Self::Inferred),
            primitives::ADDITIONAL_RELATIONSHIP => Some(Self::Additional),
            _ => None,
        }
    }

    #[must_use]
    pub fn sctid(&self) -> ConceptId {
        ConceptId(match self {
            Self::Stated => primitives::STATED_RELATIONSHIP,
            Self::Inferred => primitives::INFERRED_RELATIONSHIP,
            Self::Additional => primitives::ADDITIONAL_RELATIONSHIP,
        })
    }

    /// Whether this characteristic type owns an adjacency view.
    #[must_use]
    pub fn has_hierarchy(&self) -> bool {
        !matches!(self, Self::Additional)
    }
}

impl fmt::Display for CharacteristicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stated => "Stated",
            Self::Inferred => "Inferred",
            Self::Additional => "Additional",
        })
    }
}

impl FromStr for CharacteristicType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stated" => Ok(Self::Stated),
            "inferred" => Ok(Self::Inferred),
            "additional" => Ok(Self::Additional),
            other => Err(format!("unknown characteristic type '{}'", other)),
        }
    }
}

/// Definition status of a concept or axiom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DefinitionStatus {
    Primitive,
    FullyDefined,
}

impl DefinitionStatus {
    pub fn from_sctid(id: ConceptId) -> Option<Self> {
        match id.0 {
            primitives::PRIMITIVE => Some(Self::Primitive),
            primitives::FULLY_DEFINED => Some(Self::FullyDefined),
            _ => None,
        }
    }
}

/// Type of a description row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DescriptionType {
    Fsn,
    Synonym,
    TextDefinition,
}

impl DescriptionType {
    pub fn from_sctid(id: ConceptId) -> Option<Self> {
        match id.0 {
            primitives::FSN => Some(Self::Fsn),
            primitives::SYNONYM => Some(Self::Synonym),
            primitives::TEXT_DEFINITION => Some(Self::TextDefinition),
            _ => None,
        }
    }
}

/// Acceptability of a description in a language reference set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Acceptability {
    Preferred,
    Acceptable,
}

impl Acceptability {
    pub fn from_sctid(id: ConceptId) -> Option<Self> {
        match id.0 {
            primitives::PREFERRED => Some(Self::Preferred),
            primitives::ACCEPTABLE => Some(Self::Acceptable),
            _ => None,
        }
    }
}

/// How an RF2 file must be merged.
///
/// File type is supplied by the caller; RF2 files are not self-describing
/// in a way the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadMode {
    /// A closed, self-consistent point in time.
    Snapshot,
    /// Changes since a prior point in time.
    Delta,
}

// =============================================================================
// TESTS
// =============================================================================
