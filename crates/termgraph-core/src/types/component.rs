//! Component records: concepts, relationships, axioms, descriptions and
//! reference set members.

use super::{
    Acceptability, AxiomId, CharacteristicType, ConceptId, DefinitionStatus, DescriptionId,
    DescriptionType, EffectiveTime, MemberId, RelationshipId,
};
use crate::primitives;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// CONCEPT
// =============================================================================

/// Attributes carried by a concept once its defining row has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub active: bool,
    pub definition_status: DefinitionStatus,
    pub module: ConceptId,
    /// `None` means not yet published.
    pub effective_time: Option<EffectiveTime>,
    pub released: bool,
    /// Set when the record was changed by the current load pass.
    pub dirty: bool,
}

/// Whether a concept has been defined by its own row.
///
/// Concepts are created on first reference. Until the concept file row is
/// merged the concept is `Unresolved` (a phantom); a phantom surviving the
/// end-of-load pass is a reference error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptState {
    Unresolved,
    Resolved(ConceptRecord),
}

/// One hierarchy view of a concept: its direct parents and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    pub parents: BTreeSet<ConceptId>,
    pub children: BTreeSet<ConceptId>,
}

impl Adjacency {
    pub const fn new() -> Self {
        Self {
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty() && self.children.is_empty()
    }
}

/// Shared empty view returned for characteristic types without a hierarchy.
static NO_HIERARCHY: Adjacency = Adjacency::new();

/// A node of the ontology graph.
#[derive(Debug, Clone)]
pub struct Concept {
    pub(crate) id: ConceptId,
    pub(crate) state: ConceptState,
    pub(crate) stated: Adjacency,
    pub(crate) inferred: Adjacency,
    /// Outgoing relationships of every characteristic type, including the
    /// stated relationships materialized from class axioms.
    pub(crate) relationships: Vec<Relationship>,
    pub(crate) axioms: Vec<Axiom>,
    pub(crate) gcis: Vec<Axiom>,
    pub(crate) descriptions: BTreeSet<DescriptionId>,
    pub(crate) inactivation_indicators: Vec<InactivationIndicator>,
    pub(crate) associations: Vec<Association>,
    pub(crate) depth: Option<u32>,
    pub(crate) issue: Option<String>,
}

impl Concept {
    /// Create an unresolved shell for a concept seen only by reference.
    #[must_use]
    pub fn new(id: ConceptId) -> Self {
        Self {
            id,
            state: ConceptState::Unresolved,
            stated: Adjacency::new(),
            inferred: Adjacency::new(),
            relationships: Vec::new(),
            axioms: Vec::new(),
            gcis: Vec::new(),
            descriptions: BTreeSet::new(),
            inactivation_indicators: Vec::new(),
            associations: Vec::new(),
            depth: None,
            issue: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConceptId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> &ConceptState {
        &self.state
    }

    /// The defining record, if the concept row has been read.
    #[must_use]
    pub fn record(&self) -> Option<&ConceptRecord> {
        match &self.state {
            ConceptState::Resolved(record) => Some(record),
            ConceptState::Unresolved => None,
        }
    }

    /// Referenced but never defined.
    #[must_use]
    pub fn is_phantom(&self) -> bool {
        matches!(self.state, ConceptState::Unresolved)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.record().is_some_and(|r| r.active)
    }

    #[must_use]
    pub fn definition_status(&self) -> Option<DefinitionStatus> {
        self.record().map(|r| r.definition_status)
    }

    #[must_use]
    pub fn effective_time(&self) -> Option<EffectiveTime> {
        self.record().and_then(|r| r.effective_time)
    }

    /// The adjacency view for a characteristic type (empty for Additional).
    #[must_use]
    pub fn adjacency(&self, characteristic_type: CharacteristicType) -> &Adjacency {
        match characteristic_type {
            CharacteristicType::Stated => &self.stated,
            CharacteristicType::Inferred => &self.inferred,
            CharacteristicType::Additional => &NO_HIERARCHY,
        }
    }

    pub(crate) fn adjacency_mut(
        &mut self,
        characteristic_type: CharacteristicType,
    ) -> Option<&mut Adjacency> {
        match characteristic_type {
            CharacteristicType::Stated => Some(&mut self.stated),
            CharacteristicType::Inferred => Some(&mut self.inferred),
            CharacteristicType::Additional => None,
        }
    }

    #[must_use]
    pub fn parents(&self, characteristic_type: CharacteristicType) -> &BTreeSet<ConceptId> {
        &self.adjacency(characteristic_type).parents
    }

    #[must_use]
    pub fn children(&self, characteristic_type: CharacteristicType) -> &BTreeSet<ConceptId> {
        &self.adjacency(characteristic_type).children
    }

    /// All relationships, active and inactive.
    #[must_use]
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Active relationships of one characteristic type.
    pub fn active_relationships(
        &self,
        characteristic_type: CharacteristicType,
    ) -> impl Iterator<Item = &Relationship> + '_ {
        self.relationships
            .iter()
            .filter(move |r| r.active && r.characteristic_type == characteristic_type)
    }

    /// Targets of the active IS-A relationships of one characteristic type.
    #[must_use]
    pub fn isa_targets(&self, characteristic_type: CharacteristicType) -> BTreeSet<ConceptId> {
        self.active_relationships(characteristic_type)
            .filter(|r| r.is_isa())
            .filter_map(|r| r.target.concept())
            .collect()
    }

    /// Class axioms (active and inactive).
    #[must_use]
    pub fn axioms(&self) -> &[Axiom] {
        &self.axioms
    }

    /// General concept inclusion axioms. Never part of ordinary traversal.
    #[must_use]
    pub fn gci_axioms(&self) -> &[Axiom] {
        &self.gcis
    }

    #[must_use]
    pub fn description_ids(&self) -> &BTreeSet<DescriptionId> {
        &self.descriptions
    }

    #[must_use]
    pub fn inactivation_indicators(&self) -> &[InactivationIndicator] {
        &self.inactivation_indicators
    }

    #[must_use]
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Shortest distance from the root in the Inferred view.
    #[must_use]
    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    /// Transient annotation used by analysis passes.
    #[must_use]
    pub fn issue(&self) -> Option<&str> {
        self.issue.as_deref()
    }

    pub fn set_issue(&mut self, issue: impl Into<String>) {
        self.issue = Some(issue.into());
    }

    pub fn clear_issue(&mut self) {
        self.issue = None;
    }
}

// =============================================================================
// RELATIONSHIP
// =============================================================================

/// Discriminator for concrete (data-typed) relationship values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConcreteKind {
    Integer,
    Decimal,
    String,
}

/// A literal relationship value.
///
/// The literal text is kept exactly as supplied: `1.5` and `1.50` are
/// different values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConcreteValue {
    pub kind: ConcreteKind,
    pub literal: String,
}

impl ConcreteValue {
    #[must_use]
    pub fn new(kind: ConcreteKind, literal: impl Into<String>) -> Self {
        Self {
            kind,
            literal: literal.into(),
        }
    }

    /// Parse the RF2 concrete value column: `#12`, `#1.50` or `"text"`.
    pub fn parse_rf2(field: &str) -> Result<Self, String> {
        if let Some(number) = field.strip_prefix('#') {
            let kind = classify_number(number)
                .ok_or_else(|| format!("invalid numeric concrete value '{}'", field))?;
            return Ok(Self::new(kind, number));
        }
        if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
            return Ok(Self::new(
                ConcreteKind::String,
                &field[1..field.len().saturating_sub(1)],
            ));
        }
        Err(format!("invalid concrete value '{}'", field))
    }

    /// Render in the RF2 concrete value column format.
    #[must_use]
    pub fn to_rf2(&self) -> String {
        match self.kind {
            ConcreteKind::String => format!("\"{}\"", self.literal),
            ConcreteKind::Integer | ConcreteKind::Decimal => format!("#{}", self.literal),
        }
    }
}

/// Classify numeric text as integer or decimal without converting it.
fn classify_number(text: &str) -> Option<ConcreteKind> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (digits, None),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match fraction {
        None => Some(ConcreteKind::Integer),
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => {
            Some(ConcreteKind::Decimal)
        }
        Some(_) => None,
    }
}

impl fmt::Display for ConcreteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rf2())
    }
}

/// Destination of a relationship: a concept or a literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationshipTarget {
    Concept(ConceptId),
    Concrete(ConcreteValue),
}

impl RelationshipTarget {
    #[must_use]
    pub fn concept(&self) -> Option<ConceptId> {
        match self {
            Self::Concept(id) => Some(*id),
            Self::Concrete(_) => None,
        }
    }
}

impl fmt::Display for RelationshipTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concept(id) => write!(f, "{}", id),
            Self::Concrete(value) => write!(f, "{}", value),
        }
    }
}

/// Merge identity of a relationship that carries no released id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructuralKey {
    pub source: ConceptId,
    pub type_id: ConceptId,
    pub target: RelationshipTarget,
    pub group: u16,
    pub characteristic_type: CharacteristicType,
}

/// A directed, typed edge from a source concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Released id; `None` for axiom-derived relationships.
    pub id: Option<RelationshipId>,
    pub effective_time: Option<EffectiveTime>,
    pub active: bool,
    pub module: ConceptId,
    pub source: ConceptId,
    pub type_id: ConceptId,
    pub target: RelationshipTarget,
    /// 0 = ungrouped.
    pub group: u16,
    pub characteristic_type: CharacteristicType,
    /// Back-reference to the axiom this relationship was materialized from.
    pub axiom: Option<AxiomId>,
    pub released: bool,
    pub dirty: bool,
}

impl Relationship {
    #[must_use]
    pub fn is_isa(&self) -> bool {
        self.type_id.0 == primitives::IS_A
    }

    /// Source, type, target-or-value, group and characteristic type.
    #[must_use]
    pub fn structural_key(&self) -> StructuralKey {
        StructuralKey {
            source: self.source,
            type_id: self.type_id,
            target: self.target.clone(),
            group: self.group,
            characteristic_type: self.characteristic_type,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {} (group {}, {})",
            self.source, self.type_id, self.target, self.group, self.characteristic_type
        )
    }
}

// =============================================================================
// AXIOM
// =============================================================================

/// A description-logic axiom owned by one concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axiom {
    pub id: AxiomId,
    pub owner: ConceptId,
    pub effective_time: Option<EffectiveTime>,
    pub active: bool,
    pub module: ConceptId,
    pub released: bool,
    pub definition_status: DefinitionStatus,
    /// General concept inclusion: constrains the owner without defining it.
    pub gci: bool,
    /// The OWL functional-syntax text the axiom was read from.
    pub expression: String,
    /// Relationships contributed by this axiom, in group order.
    pub relationships: Vec<Relationship>,
}

// =============================================================================
// DESCRIPTION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub id: DescriptionId,
    pub concept: ConceptId,
    pub effective_time: Option<EffectiveTime>,
    pub active: bool,
    pub module: ConceptId,
    pub language_code: String,
    pub description_type: DescriptionType,
    pub term: String,
    pub case_significance: ConceptId,
    pub released: bool,
    pub inactivation_indicators: Vec<InactivationIndicator>,
}

// =============================================================================
// REFERENCE SET MEMBERS
// =============================================================================

/// Columns shared by every reference set row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHeader {
    pub id: MemberId,
    pub effective_time: Option<EffectiveTime>,
    pub active: bool,
    pub module: ConceptId,
    pub refset: ConceptId,
}

/// Acceptability of one description in one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LangRefsetEntry {
    pub header: MemberHeader,
    pub description: DescriptionId,
    pub acceptability: Acceptability,
}

/// Reason a concept or description was inactivated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactivationIndicator {
    pub header: MemberHeader,
    pub referenced_component: u64,
    pub reason: ConceptId,
}

/// Historical association from an inactive concept to its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub header: MemberHeader,
    pub source: ConceptId,
    pub target: ConceptId,
}

/// Generic member of an "other" reference set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefsetMember {
    pub header: MemberHeader,
    pub referenced_component: String,
    pub additional_fields: Vec<String>,
}

/// MRCM domain row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrcmDomain {
    pub header: MemberHeader,
    pub domain: ConceptId,
    pub domain_constraint: String,
    pub parent_domain: String,
    pub proximal_primitive_constraint: String,
    pub proximal_primitive_refinement: String,
    pub precoordination_template: String,
    pub postcoordination_template: String,
    pub guide_url: String,
}

/// MRCM attribute-domain row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrcmAttributeDomain {
    pub header: MemberHeader,
    pub attribute: ConceptId,
    pub domain: ConceptId,
    pub grouped: bool,
    pub attribute_cardinality: String,
    pub attribute_in_group_cardinality: String,
    pub rule_strength: ConceptId,
    pub content_type: ConceptId,
}

/// MRCM attribute-range row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrcmAttributeRange {
    pub header: MemberHeader,
    pub attribute: ConceptId,
    pub range_constraint: String,
    pub attribute_rule: String,
    pub rule_strength: ConceptId,
    pub content_type: ConceptId,
}

/// MRCM module-scope row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrcmModuleScope {
    pub header: MemberHeader,
    pub module_scope: ConceptId,
    pub rule_refset: ConceptId,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_values_keep_precision() {
        let a = ConcreteValue::parse_rf2("#1.5").expect("parse");
        let b = ConcreteValue::parse_rf2("#1.50").expect("parse");
        assert_eq!(a.kind, ConcreteKind::Decimal);
        assert_ne!(a, b);
        assert_eq!(b.to_rf2(), "#1.50");
    }

    #[test]
    fn concrete_value_kinds() {
        assert_eq!(
            ConcreteValue::parse_rf2("#250").map(|v| v.kind),
            Ok(ConcreteKind::Integer)
        );
        assert_eq!(
            ConcreteValue::parse_rf2("\"tablet\"").map(|v| v.literal),
            Ok("tablet".to_string())
        );
        assert!(ConcreteValue::parse_rf2("#1.").is_err());
        assert!(ConcreteValue::parse_rf2("250").is_err());
    }

    #[test]
    fn shell_concept_is_phantom() {
        let concept = Concept::new(ConceptId(1));
        assert!(concept.is_phantom());
        assert!(!concept.is_active());
        assert!(concept.adjacency(CharacteristicType::Additional).is_empty());
    }
}
