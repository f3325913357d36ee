//! # Graph Store
//!
//! The in-memory ontology graph: concept and description indices, RF2
//! merge semantics, per-characteristic-type adjacency, axiom
//! materialization and phantom resolution.
//!
//! All indices use `BTreeMap`/`BTreeSet` for deterministic ordering.
//!
//! ## Merge Rules
//!
//! - Rows from excluded modules are skipped
//! - A row older than the stored component is ignored (unpublished = newest)
//! - Inactive IS-A rows only remove adjacency in `Delta` mode, and only when
//!   no other active IS-A edge of the same view still links the pair
//! - Two active relationships with the same structure and different ids are
//!   one logical edge; the newest id is kept
//! - Only OWL axiom refset rows of an OWL expression file are merged

use crate::axiom::{self, GroupedRelationships, Materialized, PropertyAxiom};
use crate::primitives;
use crate::rf2::{ComponentFile, RefsetKind, Rf2Reader, Row};
use crate::types::{
    Acceptability, Association, Axiom, AxiomId, CharacteristicType, Concept, ConceptId, ConceptRecord,
    ConceptState, ConcreteValue, DefinitionStatus, Description, DescriptionId, DescriptionType,
    EffectiveTime, GraphError, InactivationIndicator, LangRefsetEntry, LoadMode, MemberHeader, MemberId,
    MrcmAttributeDomain, MrcmAttributeRange, MrcmDomain, MrcmModuleScope, RefsetMember,
    Relationship, RelationshipId, RelationshipTarget,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::BufRead;
use tracing::{debug, warn};

// =============================================================================
// OPTIONS & RESULTS
// =============================================================================

/// The three-way concept lookup contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Return the concept if registered, else `NotFound`.
    Existing,
    /// Return the concept, creating an unresolved shell if absent.
    CreateIfMissing,
    /// The concept must be registered and defined by its own row.
    ValidateExists,
}

/// Store-wide load options.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub excluded_modules: BTreeSet<ConceptId>,
    /// Load reference sets that have no dedicated handling.
    pub load_other_refsets: bool,
}

/// How the end-of-load phantom pass treats undefined concepts.
#[derive(Debug, Clone, Default)]
pub struct PhantomPolicy {
    /// Phantoms removed without error.
    pub whitelist: BTreeSet<ConceptId>,
    /// Tolerate phantoms referenced only by inactive refset members.
    pub load_all_refsets: bool,
}

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows: usize,
    pub merged: usize,
    pub skipped_excluded: usize,
    pub skipped_older: usize,
    /// Rows belonging to a reference set this batch does not merge.
    pub skipped_other_refset: usize,
}

impl LoadStats {
    pub fn absorb(&mut self, other: Self) {
        self.rows += other.rows;
        self.merged += other.merged;
        self.skipped_excluded += other.skipped_excluded;
        self.skipped_older += other.skipped_older;
        self.skipped_other_refset += other.skipped_other_refset;
    }
}

/// Store-level metadata recovered from the active property axioms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMetadata {
    pub transitive: BTreeSet<ConceptId>,
    pub reflexive: BTreeSet<ConceptId>,
    /// (chain, super property)
    pub chains: BTreeSet<(Vec<ConceptId>, ConceptId)>,
}

/// Machine-readable concept model rows, keyed by member id.
#[derive(Debug, Clone, Default)]
pub struct MrcmRefsets {
    pub domains: BTreeMap<MemberId, MrcmDomain>,
    pub attribute_domains: BTreeMap<MemberId, MrcmAttributeDomain>,
    pub attribute_ranges: BTreeMap<MemberId, MrcmAttributeRange>,
    pub module_scopes: BTreeMap<MemberId, MrcmModuleScope>,
}

// =============================================================================
// GRAPH STORE
// =============================================================================

/// The in-memory ontology graph.
#[derive(Debug, Clone)]
pub struct GraphStore {
    concepts: BTreeMap<ConceptId, Concept>,
    descriptions: BTreeMap<DescriptionId, Description>,
    /// (description, language refset) → entries; more than one only for
    /// equal-dated active duplicates.
    lang_entries: BTreeMap<(DescriptionId, ConceptId), Vec<LangRefsetEntry>>,
    duplicate_lang_pairs: BTreeSet<(MemberId, MemberId)>,
    mrcm: MrcmRefsets,
    other_refsets: BTreeMap<ConceptId, BTreeMap<MemberId, RefsetMember>>,
    /// Active property axioms by id; withdrawn with the axiom.
    property_axioms: BTreeMap<AxiomId, PropertyAxiom>,
    options: StoreOptions,
    warnings: Vec<String>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl GraphStore {
    /// Create an empty store seeded with the anchor concepts.
    #[must_use]
    pub fn new(options: StoreOptions) -> Self {
        let mut store = Self {
            concepts: BTreeMap::new(),
            descriptions: BTreeMap::new(),
            lang_entries: BTreeMap::new(),
            duplicate_lang_pairs: BTreeSet::new(),
            mrcm: MrcmRefsets::default(),
            other_refsets: BTreeMap::new(),
            property_axioms: BTreeMap::new(),
            options,
            warnings: Vec::new(),
        };
        store.seed_anchors();
        store
    }

    /// Clear every index and re-seed the anchor concepts.
    pub fn reset(&mut self) {
        self.concepts.clear();
        self.descriptions.clear();
        self.lang_entries.clear();
        self.duplicate_lang_pairs.clear();
        self.mrcm = MrcmRefsets::default();
        self.other_refsets.clear();
        self.property_axioms.clear();
        self.warnings.clear();
        self.seed_anchors();
    }

    fn seed_anchors(&mut self) {
        for id in primitives::ANCHORS {
            self.concepts
                .entry(ConceptId(id))
                .or_insert_with(|| Concept::new(ConceptId(id)));
        }
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: StoreOptions) {
        self.options = options;
    }

    fn is_excluded(&self, module: ConceptId) -> bool {
        self.options.excluded_modules.contains(&module)
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// Three-way concept lookup.
    pub fn get_concept(&mut self, id: ConceptId, lookup: Lookup) -> Result<&mut Concept, GraphError> {
        match lookup {
            Lookup::CreateIfMissing => Ok(self
                .concepts
                .entry(id)
                .or_insert_with(|| Concept::new(id))),
            Lookup::Existing => self.concepts.get_mut(&id).ok_or(GraphError::NotFound(id)),
            Lookup::ValidateExists => match self.concepts.get_mut(&id) {
                Some(concept) if !concept.is_phantom() => Ok(concept),
                _ => Err(GraphError::NotFound(id)),
            },
        }
    }

    #[must_use]
    pub fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    /// The concept, provided it is defined and active.
    pub fn require_active(&self, id: ConceptId) -> Result<&Concept, GraphError> {
        match self.concepts.get(&id) {
            None => Err(GraphError::NotFound(id)),
            Some(concept) if concept.is_phantom() => Err(GraphError::NotFound(id)),
            Some(concept) if !concept.is_active() => Err(GraphError::InactiveConcept(id)),
            Some(concept) => Ok(concept),
        }
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Concept> + '_ {
        self.concepts.values()
    }

    pub fn active_concepts(&self) -> impl Iterator<Item = &Concept> + '_ {
        self.concepts.values().filter(|c| c.is_active())
    }

    /// Ids of all active concepts, ascending.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConceptId> {
        self.active_concepts().map(Concept::id).collect()
    }

    #[must_use]
    pub fn contains(&self, id: ConceptId) -> bool {
        self.concepts.contains_key(&id)
    }

    #[must_use]
    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    #[must_use]
    pub fn active_concept_count(&self) -> usize {
        self.active_concepts().count()
    }

    #[must_use]
    pub fn description_count(&self) -> usize {
        self.descriptions.len()
    }

    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.concepts.values().map(|c| c.relationships.len()).sum()
    }

    /// Direct parents in one view.
    pub fn parents(
        &self,
        id: ConceptId,
        characteristic_type: CharacteristicType,
    ) -> Result<&BTreeSet<ConceptId>, GraphError> {
        self.concepts
            .get(&id)
            .map(|c| c.parents(characteristic_type))
            .ok_or(GraphError::NotFound(id))
    }

    /// Direct children in one view.
    pub fn children(
        &self,
        id: ConceptId,
        characteristic_type: CharacteristicType,
    ) -> Result<&BTreeSet<ConceptId>, GraphError> {
        self.concepts
            .get(&id)
            .map(|c| c.children(characteristic_type))
            .ok_or(GraphError::NotFound(id))
    }

    pub fn relationships(&self, id: ConceptId) -> Result<&[Relationship], GraphError> {
        self.concepts
            .get(&id)
            .map(Concept::relationships)
            .ok_or(GraphError::NotFound(id))
    }

    #[must_use]
    pub fn description(&self, id: DescriptionId) -> Option<&Description> {
        self.descriptions.get(&id)
    }

    /// Descriptions of a concept in id order.
    pub fn descriptions_of(&self, concept: ConceptId) -> Vec<&Description> {
        self.concepts
            .get(&concept)
            .map(|c| {
                c.descriptions
                    .iter()
                    .filter_map(|id| self.descriptions.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Language refset entries for a description, across dialects.
    pub fn lang_entries(&self, description: DescriptionId) -> Vec<&LangRefsetEntry> {
        self.lang_entries
            .range((description, ConceptId(0))..=(description, ConceptId(u64::MAX)))
            .flat_map(|(_, entries)| entries.iter())
            .collect()
    }

    fn is_preferred(&self, description: DescriptionId, dialect: ConceptId) -> bool {
        self.lang_entries
            .get(&(description, dialect))
            .is_some_and(|entries| {
                entries
                    .iter()
                    .any(|e| e.header.active && e.acceptability == Acceptability::Preferred)
            })
    }

    /// Preferred synonym of a concept in a dialect.
    #[must_use]
    pub fn preferred_term(&self, concept: ConceptId, dialect: ConceptId) -> Option<&str> {
        self.descriptions_of(concept)
            .into_iter()
            .filter(|d| d.active && d.description_type == DescriptionType::Synonym)
            .find(|d| self.is_preferred(d.id, dialect))
            .map(|d| d.term.as_str())
    }

    /// Fully specified name; the US-preferred FSN when there are several,
    /// then the GB-preferred one.
    #[must_use]
    pub fn fsn(&self, concept: ConceptId) -> Option<&str> {
        let fsns: Vec<&Description> = self
            .descriptions_of(concept)
            .into_iter()
            .filter(|d| d.active && d.description_type == DescriptionType::Fsn)
            .collect();
        let preferred_in = |dialect: u64| {
            fsns.iter()
                .find(|d| self.is_preferred(d.id, ConceptId(dialect)))
        };
        preferred_in(primitives::US_ENGLISH_REFSET)
            .or_else(|| preferred_in(primitives::GB_ENGLISH_REFSET))
            .or_else(|| fsns.first())
            .map(|d| d.term.as_str())
    }

    /// Pairs of equal-dated active language entries for the same description
    /// and dialect.
    #[must_use]
    pub fn duplicate_lang_pairs(&self) -> &BTreeSet<(MemberId, MemberId)> {
        &self.duplicate_lang_pairs
    }

    #[must_use]
    pub fn mrcm(&self) -> &MrcmRefsets {
        &self.mrcm
    }

    /// Members of an "other" reference set.
    pub fn refset_members(&self, refset: ConceptId) -> impl Iterator<Item = &RefsetMember> + '_ {
        self.other_refsets
            .get(&refset)
            .into_iter()
            .flat_map(|members| members.values())
    }

    /// Transitive, reflexive and chain facts of the active property axioms.
    #[must_use]
    pub fn property_metadata(&self) -> PropertyMetadata {
        let mut metadata = PropertyMetadata::default();
        for property in self.property_axioms.values() {
            match property {
                PropertyAxiom::Transitive(p) => {
                    metadata.transitive.insert(*p);
                }
                PropertyAxiom::Reflexive(p) => {
                    metadata.reflexive.insert(*p);
                }
                PropertyAxiom::Chain { chain, sup } => {
                    metadata.chains.insert((chain.clone(), *sup));
                }
            }
        }
        metadata
    }

    /// Warnings recorded during loading and phantom resolution.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Concepts changed by the loads since the last `clear_dirty`.
    pub fn dirty_concepts(&self) -> impl Iterator<Item = ConceptId> + '_ {
        self.concepts
            .values()
            .filter(|c| {
                c.record().is_some_and(|r| r.dirty) || c.relationships.iter().any(|r| r.dirty)
            })
            .map(Concept::id)
    }

    pub fn clear_dirty(&mut self) {
        for concept in self.concepts.values_mut() {
            if let ConceptState::Resolved(record) = &mut concept.state {
                record.dirty = false;
            }
            for r in &mut concept.relationships {
                r.dirty = false;
            }
        }
    }

    // =========================================================================
    // ADJACENCY
    // =========================================================================

    fn link(&mut self, child: ConceptId, parent: ConceptId, ct: CharacteristicType) {
        if let Some(adjacency) = self
            .concepts
            .entry(child)
            .or_insert_with(|| Concept::new(child))
            .adjacency_mut(ct)
        {
            adjacency.parents.insert(parent);
        }
        if let Some(adjacency) = self
            .concepts
            .entry(parent)
            .or_insert_with(|| Concept::new(parent))
            .adjacency_mut(ct)
        {
            adjacency.children.insert(child);
        }
    }

    /// Remove the pair from the view unless an active IS-A edge still
    /// supports it.
    fn unlink_if_unsupported(&mut self, child: ConceptId, parent: ConceptId, ct: CharacteristicType) {
        let supported = self.concepts.get(&child).is_some_and(|c| {
            c.active_relationships(ct)
                .any(|r| r.is_isa() && r.target.concept() == Some(parent))
        });
        if supported {
            return;
        }
        if let Some(adjacency) = self.concepts.get_mut(&child).and_then(|c| c.adjacency_mut(ct)) {
            adjacency.parents.remove(&parent);
        }
        if let Some(adjacency) = self.concepts.get_mut(&parent).and_then(|c| c.adjacency_mut(ct)) {
            adjacency.children.remove(&child);
        }
    }

    // =========================================================================
    // CONCEPTS
    // =========================================================================

    /// Merge a concept file.
    pub fn load_concept_batch<R: BufRead>(
        &mut self,
        mut reader: Rf2Reader<R>,
        mode: LoadMode,
        released: bool,
    ) -> Result<LoadStats, GraphError> {
        let mut stats = LoadStats::default();
        while let Some(row) = reader.next_row()? {
            stats.rows += 1;
            let id = row.concept(0)?;
            let effective_time = row.effective_time(1)?;
            let active = row.flag(2)?;
            let module = row.concept(3)?;
            let status_id = row.concept(4)?;
            let definition_status = DefinitionStatus::from_sctid(status_id)
                .ok_or_else(|| row.error(format!("unknown definition status {}", status_id)))?;

            if self.is_excluded(module) {
                stats.skipped_excluded += 1;
                continue;
            }
            let concept = self.get_concept(id, Lookup::CreateIfMissing)?;
            if concept
                .record()
                .is_some_and(|r| EffectiveTime::is_older(effective_time, r.effective_time))
            {
                stats.skipped_older += 1;
                continue;
            }
            concept.state = ConceptState::Resolved(ConceptRecord {
                active,
                definition_status,
                module,
                effective_time,
                released: released && effective_time.is_some(),
                dirty: true,
            });
            stats.merged += 1;
        }
        debug!(source = reader.source(), ?mode, ?stats, "concepts merged");
        Ok(stats)
    }

    // =========================================================================
    // DESCRIPTIONS
    // =========================================================================

    /// Merge a description or text definition file.
    pub fn load_description_batch<R: BufRead>(
        &mut self,
        mut reader: Rf2Reader<R>,
        mode: LoadMode,
        released: bool,
    ) -> Result<LoadStats, GraphError> {
        let mut stats = LoadStats::default();
        while let Some(row) = reader.next_row()? {
            stats.rows += 1;
            let id = DescriptionId(row.sctid(0)?);
            let effective_time = row.effective_time(1)?;
            let active = row.flag(2)?;
            let module = row.concept(3)?;
            let concept = row.concept(4)?;
            let type_id = row.concept(6)?;
            let description_type = DescriptionType::from_sctid(type_id)
                .ok_or_else(|| row.error(format!("unknown description type {}", type_id)))?;

            if self.is_excluded(module) {
                stats.skipped_excluded += 1;
                continue;
            }
            if let Some(existing) = self.descriptions.get(&id) {
                if EffectiveTime::is_older(effective_time, existing.effective_time) {
                    stats.skipped_older += 1;
                    continue;
                }
            }
            let indicators = self
                .descriptions
                .remove(&id)
                .map(|d| d.inactivation_indicators)
                .unwrap_or_default();
            self.get_concept(concept, Lookup::CreateIfMissing)?
                .descriptions
                .insert(id);
            self.descriptions.insert(
                id,
                Description {
                    id,
                    concept,
                    effective_time,
                    active,
                    module,
                    language_code: row.text(5)?.to_string(),
                    description_type,
                    term: row.text(7)?.to_string(),
                    case_significance: row.concept(8)?,
                    released: released && effective_time.is_some(),
                    inactivation_indicators: indicators,
                },
            );
            stats.merged += 1;
        }
        debug!(source = reader.source(), ?mode, ?stats, "descriptions merged");
        Ok(stats)
    }

    // =========================================================================
    // RELATIONSHIPS
    // =========================================================================

    /// Merge a relationship file (concept-valued or concrete).
    ///
    /// `characteristic_type` is the type the file carries; a recognised
    /// characteristic type column on the row takes precedence.
    pub fn load_relationship_batch<R: BufRead>(
        &mut self,
        mut reader: Rf2Reader<R>,
        characteristic_type: CharacteristicType,
        mode: LoadMode,
        released: bool,
    ) -> Result<LoadStats, GraphError> {
        let concrete = reader.has_column("value")
            || reader.kind() == ComponentFile::ConcreteRelationship;
        let mut stats = LoadStats::default();
        while let Some(row) = reader.next_row()? {
            stats.rows += 1;
            let relationship = parse_relationship(&row, concrete, characteristic_type, released)?;
            if self.is_excluded(relationship.module) {
                stats.skipped_excluded += 1;
                continue;
            }
            if self.merge_relationship(relationship, mode)? {
                stats.merged += 1;
            } else {
                stats.skipped_older += 1;
            }
        }
        debug!(
            source = reader.source(),
            %characteristic_type,
            ?mode,
            ?stats,
            "relationships merged"
        );
        Ok(stats)
    }

    /// Returns `false` when the row was older than the stored edge.
    fn merge_relationship(
        &mut self,
        incoming: Relationship,
        mode: LoadMode,
    ) -> Result<bool, GraphError> {
        let source = incoming.source;
        let ct = incoming.characteristic_type;
        self.get_concept(incoming.type_id, Lookup::CreateIfMissing)?;
        if let Some(target) = incoming.target.concept() {
            self.get_concept(target, Lookup::CreateIfMissing)?;
        }

        let key = incoming.structural_key();
        let concept = self.get_concept(source, Lookup::CreateIfMissing)?;
        let position = concept
            .relationships
            .iter()
            .position(|r| r.id.is_some() && r.id == incoming.id)
            .or_else(|| {
                if !incoming.active {
                    return None;
                }
                // Id churn: an active edge with the same structure is the same edge.
                concept
                    .relationships
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.active && r.axiom.is_none() && r.structural_key() == key)
                    .max_by(|(_, a), (_, b)| EffectiveTime::compare(a.effective_time, b.effective_time))
                    .map(|(i, _)| i)
            });

        let previous_isa_target = match position {
            Some(i) => {
                let existing = &concept.relationships[i];
                if EffectiveTime::is_older(incoming.effective_time, existing.effective_time) {
                    return Ok(false);
                }
                let previous = (existing.active && existing.is_isa())
                    .then(|| existing.target.concept())
                    .flatten();
                concept.relationships[i] = incoming.clone();
                previous
            }
            None => {
                concept.relationships.push(incoming.clone());
                None
            }
        };

        if incoming.is_isa() && ct.has_hierarchy() {
            let new_target = incoming.target.concept();
            if incoming.active {
                if let Some(parent) = new_target {
                    self.link(source, parent, ct);
                }
            } else if mode == LoadMode::Delta {
                if let Some(parent) = new_target {
                    self.unlink_if_unsupported(source, parent, ct);
                }
            }
            // The same id now points elsewhere: the old pair loses this support.
            if let Some(old) = previous_isa_target.filter(|old| Some(*old) != new_target) {
                self.unlink_if_unsupported(source, old, ct);
            }
        }
        Ok(true)
    }

    // =========================================================================
    // AXIOMS
    // =========================================================================

    /// Merge an OWL axiom reference set file.
    pub fn load_axiom_batch<R: BufRead>(
        &mut self,
        mut reader: Rf2Reader<R>,
        mode: LoadMode,
        released: bool,
    ) -> Result<LoadStats, GraphError> {
        let mut stats = LoadStats::default();
        while let Some(row) = reader.next_row()? {
            stats.rows += 1;
            let header = row.member_header()?;
            if header.refset.0 != primitives::OWL_AXIOM_REFSET {
                // Ontology header rows share the file: Prefix(..), Ontology(..).
                stats.skipped_other_refset += 1;
                continue;
            }
            let owner = row.concept(5)?;
            let expression = row.text(6)?.to_string();
            if self.is_excluded(header.module) {
                stats.skipped_excluded += 1;
                continue;
            }
            let stored = self.get_concept(owner, Lookup::CreateIfMissing)?;
            let older = stored
                .axioms
                .iter()
                .chain(stored.gcis.iter())
                .find(|a| a.id == header.id)
                .is_some_and(|a| EffectiveTime::is_older(header.effective_time, a.effective_time));
            if older {
                stats.skipped_older += 1;
                continue;
            }

            let mut axiom = Axiom {
                id: header.id,
                owner,
                effective_time: header.effective_time,
                active: header.active,
                module: header.module,
                released: released && header.effective_time.is_some(),
                definition_status: DefinitionStatus::Primitive,
                gci: false,
                expression,
                relationships: Vec::new(),
            };
            self.merge_axiom(&mut axiom)?;
            let concept = self.get_concept(owner, Lookup::CreateIfMissing)?;
            if axiom.gci {
                concept.gcis.push(axiom);
            } else {
                concept.axioms.push(axiom);
            }
            stats.merged += 1;
        }
        debug!(source = reader.source(), ?mode, ?stats, "axioms merged");
        Ok(stats)
    }

    /// Withdraw the relationships and property facts of any previous version
    /// of the axiom, then materialize the new version.
    fn merge_axiom(&mut self, axiom: &mut Axiom) -> Result<(), GraphError> {
        let owner = axiom.owner;
        self.property_axioms.remove(&axiom.id);
        let concept = self.get_concept(owner, Lookup::CreateIfMissing)?;

        let mut withdrawn = Vec::new();
        concept.relationships.retain(|r| {
            if r.axiom.as_ref() == Some(&axiom.id) {
                withdrawn.push(r.clone());
                false
            } else {
                true
            }
        });
        concept.axioms.retain(|a| a.id != axiom.id);
        concept.gcis.retain(|a| a.id != axiom.id);
        let previous_groups: GroupedRelationships = axiom::stated_groups(&withdrawn);
        // Group numbers held by the concept's other stated relationships.
        let reserved: BTreeSet<u16> = axiom::stated_groups(&concept.relationships)
            .into_keys()
            .filter(|group| *group != 0)
            .collect();
        for r in withdrawn.iter().filter(|r| r.active && r.is_isa()) {
            if let Some(parent) = r.target.concept() {
                self.unlink_if_unsupported(owner, parent, CharacteristicType::Stated);
            }
        }

        if !axiom.active {
            // Keep the record; classify it without failing on bad text.
            axiom.gci = axiom::materialize(owner, &axiom.id, &axiom.expression)
                .is_ok_and(|m| matches!(m, Materialized::Class(rep) if rep.is_gci()));
            return Ok(());
        }

        match axiom::materialize(owner, &axiom.id, &axiom.expression)? {
            Materialized::Property(property) => {
                self.property_axioms.insert(axiom.id.clone(), property);
                Ok(())
            }
            Materialized::Class(mut representation) => {
                axiom.definition_status = if representation.primitive {
                    DefinitionStatus::Primitive
                } else {
                    DefinitionStatus::FullyDefined
                };
                axiom.gci = representation.is_gci();
                if !axiom.gci {
                    let aligned =
                        axiom::align_groups(representation.groups(), &previous_groups, &reserved);
                    representation.set_groups(aligned);
                }
                axiom.relationships = self.axiom_relationships(axiom, representation.groups())?;
                if axiom.gci {
                    return Ok(());
                }

                let parents: Vec<ConceptId> = axiom
                    .relationships
                    .iter()
                    .filter(|r| r.is_isa())
                    .filter_map(|r| r.target.concept())
                    .collect();
                let relationships = axiom.relationships.clone();
                self.get_concept(owner, Lookup::CreateIfMissing)?
                    .relationships
                    .extend(relationships);
                for parent in parents {
                    self.link(owner, parent, CharacteristicType::Stated);
                }
                Ok(())
            }
        }
    }

    fn axiom_relationships(
        &mut self,
        axiom: &Axiom,
        groups: &GroupedRelationships,
    ) -> Result<Vec<Relationship>, GraphError> {
        let mut relationships = Vec::new();
        for (group, members) in groups {
            for member in members {
                self.get_concept(member.type_id, Lookup::CreateIfMissing)?;
                if let Some(target) = member.target.concept() {
                    self.get_concept(target, Lookup::CreateIfMissing)?;
                }
                relationships.push(Relationship {
                    id: None,
                    effective_time: axiom.effective_time,
                    active: true,
                    module: axiom.module,
                    source: axiom.owner,
                    type_id: member.type_id,
                    target: member.target.clone(),
                    group: *group,
                    characteristic_type: CharacteristicType::Stated,
                    axiom: Some(axiom.id.clone()),
                    released: axiom.released,
                    dirty: true,
                });
            }
        }
        Ok(relationships)
    }

    // =========================================================================
    // REFERENCE SETS
    // =========================================================================

    /// Merge a reference set file of the given kind.
    pub fn load_reference_set_batch<R: BufRead>(
        &mut self,
        mut reader: Rf2Reader<R>,
        kind: RefsetKind,
        mode: LoadMode,
        released: bool,
    ) -> Result<LoadStats, GraphError> {
        let mut stats = LoadStats::default();
        if kind == RefsetKind::Other && !self.options.load_other_refsets {
            debug!(source = reader.source(), "other reference set skipped");
            return Ok(stats);
        }
        while let Some(row) = reader.next_row()? {
            stats.rows += 1;
            let header = row.member_header()?;
            if self.is_excluded(header.module) {
                stats.skipped_excluded += 1;
                continue;
            }
            let merged = match kind {
                RefsetKind::Language => self.merge_lang_entry(LangRefsetEntry {
                    description: DescriptionId(row.sctid(5)?),
                    acceptability: {
                        let id = row.concept(6)?;
                        Acceptability::from_sctid(id)
                            .ok_or_else(|| row.error(format!("unknown acceptability {}", id)))?
                    },
                    header,
                }),
                RefsetKind::InactivationIndicator => self.merge_indicator(
                    InactivationIndicator {
                        referenced_component: row.sctid(5)?,
                        reason: row.concept(6)?,
                        header,
                    },
                    &row,
                )?,
                RefsetKind::Association => self.merge_association(Association {
                    source: row.concept(5)?,
                    target: row.concept(6)?,
                    header,
                })?,
                RefsetKind::MrcmDomain => merge_member(
                    &mut self.mrcm.domains,
                    MrcmDomain {
                        domain: row.concept(5)?,
                        domain_constraint: row.text(6)?.to_string(),
                        parent_domain: row.text(7)?.to_string(),
                        proximal_primitive_constraint: row.text(8)?.to_string(),
                        proximal_primitive_refinement: row.text(9)?.to_string(),
                        precoordination_template: row.text(10)?.to_string(),
                        postcoordination_template: row.text(11)?.to_string(),
                        guide_url: row.text(12)?.to_string(),
                        header,
                    },
                    |m| &m.header,
                ),
                RefsetKind::MrcmAttributeDomain => merge_member(
                    &mut self.mrcm.attribute_domains,
                    MrcmAttributeDomain {
                        attribute: row.concept(5)?,
                        domain: row.concept(6)?,
                        grouped: row.flag(7)?,
                        attribute_cardinality: row.text(8)?.to_string(),
                        attribute_in_group_cardinality: row.text(9)?.to_string(),
                        rule_strength: row.concept(10)?,
                        content_type: row.concept(11)?,
                        header,
                    },
                    |m| &m.header,
                ),
                RefsetKind::MrcmAttributeRange => merge_member(
                    &mut self.mrcm.attribute_ranges,
                    MrcmAttributeRange {
                        attribute: row.concept(5)?,
                        range_constraint: row.text(6)?.to_string(),
                        attribute_rule: row.text(7)?.to_string(),
                        rule_strength: row.concept(8)?,
                        content_type: row.concept(9)?,
                        header,
                    },
                    |m| &m.header,
                ),
                RefsetKind::MrcmModuleScope => merge_member(
                    &mut self.mrcm.module_scopes,
                    MrcmModuleScope {
                        module_scope: row.concept(5)?,
                        rule_refset: row.concept(6)?,
                        header,
                    },
                    |m| &m.header,
                ),
                RefsetKind::Other => {
                    let refset = header.refset;
                    merge_member(
                        self.other_refsets.entry(refset).or_default(),
                        RefsetMember {
                            referenced_component: row.text(5)?.to_string(),
                            additional_fields: row.rest(6),
                            header,
                        },
                        |m| &m.header,
                    )
                }
            };
            if merged {
                stats.merged += 1;
            } else {
                stats.skipped_older += 1;
            }
        }
        debug!(source = reader.source(), ?kind, ?mode, released, ?stats, "reference set merged");
        Ok(stats)
    }

    /// Language refset supersession.
    fn merge_lang_entry(&mut self, incoming: LangRefsetEntry) -> bool {
        let key = (incoming.description, incoming.header.refset);
        let entries = self.lang_entries.entry(key).or_default();

        if let Some(i) = entries.iter().position(|e| e.header.id == incoming.header.id) {
            if EffectiveTime::is_older(incoming.header.effective_time, entries[i].header.effective_time) {
                return false;
            }
            if !incoming.header.active {
                let id = incoming.header.id.clone();
                self.duplicate_lang_pairs
                    .retain(|(a, b)| *a != id && *b != id);
            }
            entries[i] = incoming;
            return true;
        }

        let Some(current) = entries
            .iter()
            .max_by(|a, b| {
                EffectiveTime::compare(a.header.effective_time, b.header.effective_time)
                    .then(a.header.active.cmp(&b.header.active))
            })
            .cloned()
        else {
            entries.push(incoming);
            return true;
        };

        match EffectiveTime::compare(incoming.header.effective_time, current.header.effective_time) {
            Ordering::Less => false,
            Ordering::Greater => {
                *entries = vec![incoming];
                true
            }
            Ordering::Equal => match (current.header.active, incoming.header.active) {
                (true, true) => {
                    let pair = if current.header.id <= incoming.header.id {
                        (current.header.id.clone(), incoming.header.id.clone())
                    } else {
                        (incoming.header.id.clone(), current.header.id.clone())
                    };
                    let message = format!(
                        "Duplicate active language entries {} and {} for description {}",
                        pair.0, pair.1, incoming.description
                    );
                    entries.push(incoming);
                    self.duplicate_lang_pairs.insert(pair);
                    self.warn(message);
                    true
                }
                // An equal-dated inactivation never overrides an active entry.
                (true, false) => false,
                (false, _) => {
                    *entries = vec![incoming];
                    true
                }
            },
        }
    }

    fn merge_indicator(
        &mut self,
        indicator: InactivationIndicator,
        row: &Row,
    ) -> Result<bool, GraphError> {
        match indicator.header.refset.0 {
            primitives::CONCEPT_INACTIVATION_REFSET => {
                self.get_concept(indicator.reason, Lookup::CreateIfMissing)?;
                let concept = self.get_concept(
                    ConceptId(indicator.referenced_component),
                    Lookup::CreateIfMissing,
                )?;
                Ok(merge_vec(&mut concept.inactivation_indicators, indicator, |i| &i.header))
            }
            primitives::DESCRIPTION_INACTIVATION_REFSET => {
                let id = DescriptionId(indicator.referenced_component);
                match self.descriptions.get_mut(&id) {
                    Some(description) => Ok(merge_vec(
                        &mut description.inactivation_indicators,
                        indicator,
                        |i| &i.header,
                    )),
                    None => {
                        self.warn(format!(
                            "{} line {}: inactivation indicator for unknown description {}",
                            row.source(),
                            row.line(),
                            id
                        ));
                        Ok(false)
                    }
                }
            }
            _ if self.options.load_other_refsets => {
                let refset = indicator.header.refset;
                Ok(merge_member(
                    self.other_refsets.entry(refset).or_default(),
                    RefsetMember {
                        referenced_component: indicator.referenced_component.to_string(),
                        additional_fields: vec![indicator.reason.to_string()],
                        header: indicator.header,
                    },
                    |m| &m.header,
                ))
            }
            _ => Ok(false),
        }
    }

    fn merge_association(&mut self, association: Association) -> Result<bool, GraphError> {
        self.get_concept(association.target, Lookup::CreateIfMissing)?;
        let concept = self.get_concept(association.source, Lookup::CreateIfMissing)?;
        Ok(merge_vec(&mut concept.associations, association, |a| &a.header))
    }

    // =========================================================================
    // END-OF-LOAD PASSES
    // =========================================================================

    /// Resolve concepts still undefined after all files are loaded.
    ///
    /// Whitelisted phantoms are removed. With `load_all_refsets`, inactive
    /// refset members that reference phantoms are dropped and phantoms left
    /// without references are removed with a warning. Undefined anchors
    /// nothing refers to are removed silently. Anything else is a
    /// `Reference` error.
    pub fn resolve_phantoms(&mut self, policy: &PhantomPolicy) -> Result<(), GraphError> {
        let mut phantoms: BTreeSet<ConceptId> = self
            .concepts
            .values()
            .filter(|c| c.is_phantom())
            .map(Concept::id)
            .collect();
        if phantoms.is_empty() {
            return Ok(());
        }

        let whitelisted: BTreeSet<ConceptId> =
            phantoms.intersection(&policy.whitelist).copied().collect();
        if !whitelisted.is_empty() {
            self.purge_concepts(&whitelisted);
            phantoms.retain(|id| !whitelisted.contains(id));
        }

        if policy.load_all_refsets {
            self.drop_inactive_members_referencing(&phantoms);
        }

        let references = self.reference_counts(&phantoms);
        let mut unreferenced = BTreeSet::new();
        for id in &phantoms {
            if references.get(id).copied().unwrap_or(0) > 0 {
                continue;
            }
            if !primitives::ANCHORS.contains(&id.0) {
                if !policy.load_all_refsets {
                    continue;
                }
                self.warn(format!(
                    "Phantom concept {} was referenced only by inactive reference set members and has been removed",
                    id
                ));
            }
            unreferenced.insert(*id);
        }
        self.purge_concepts(&unreferenced);

        let remaining: Vec<ConceptId> = phantoms
            .into_iter()
            .filter(|id| !unreferenced.contains(id))
            .collect();
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Reference { phantoms: remaining })
        }
    }

    fn drop_inactive_members_referencing(&mut self, phantoms: &BTreeSet<ConceptId>) {
        let hit = |id: u64| phantoms.contains(&ConceptId(id));
        for concept in self.concepts.values_mut() {
            let owner_is_phantom = phantoms.contains(&concept.id);
            concept.associations.retain(|a| {
                a.header.active || !(owner_is_phantom || hit(a.source.0) || hit(a.target.0))
            });
            concept.inactivation_indicators.retain(|i| {
                i.header.active
                    || !(owner_is_phantom || hit(i.referenced_component) || hit(i.reason.0))
            });
        }
        for members in self.other_refsets.values_mut() {
            members.retain(|_, m| {
                m.header.active
                    || !m
                        .referenced_component
                        .parse::<u64>()
                        .is_ok_and(|id| phantoms.contains(&ConceptId(id)))
            });
        }
    }

    /// How many components still refer to each of the given concepts.
    fn reference_counts(&self, ids: &BTreeSet<ConceptId>) -> BTreeMap<ConceptId, usize> {
        let mut counts: BTreeMap<ConceptId, usize> = BTreeMap::new();
        let mut bump = |id: ConceptId| {
            if ids.contains(&id) {
                *counts.entry(id).or_insert(0) += 1;
            }
        };
        for concept in self.concepts.values() {
            let own = usize::from(ids.contains(&concept.id));
            if own > 0
                && (!concept.relationships.is_empty()
                    || !concept.axioms.is_empty()
                    || !concept.descriptions.is_empty()
                    || !concept.associations.is_empty()
                    || !concept.inactivation_indicators.is_empty())
            {
                bump(concept.id);
            }
            for view in CharacteristicType::VIEWS {
                let adjacency = concept.adjacency(view);
                adjacency.parents.iter().chain(adjacency.children.iter()).for_each(|id| bump(*id));
            }
            for r in concept.relationships.iter().chain(concept.gcis.iter().flat_map(|a| a.relationships.iter())) {
                bump(r.type_id);
                if let RelationshipTarget::Concept(target) = r.target {
                    bump(target);
                }
            }
            for a in &concept.associations {
                bump(a.source);
                bump(a.target);
            }
            for i in &concept.inactivation_indicators {
                bump(ConceptId(i.referenced_component));
                bump(i.reason);
            }
        }
        for members in self.other_refsets.values() {
            for m in members.values() {
                if let Ok(id) = m.referenced_component.parse::<u64>() {
                    bump(ConceptId(id));
                }
            }
        }
        counts
    }

    /// Remove concepts and every adjacency or edge pointing at them.
    fn purge_concepts(&mut self, ids: &BTreeSet<ConceptId>) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.concepts.remove(id);
        }
        for concept in self.concepts.values_mut() {
            for view in CharacteristicType::VIEWS {
                if let Some(adjacency) = concept.adjacency_mut(view) {
                    adjacency.parents.retain(|p| !ids.contains(p));
                    adjacency.children.retain(|c| !ids.contains(c));
                }
            }
            concept.relationships.retain(|r| {
                !ids.contains(&r.type_id)
                    && r.target.concept().is_none_or(|t| !ids.contains(&t))
            });
            concept
                .associations
                .retain(|a| !ids.contains(&a.target) && !ids.contains(&a.source));
        }
    }

    /// Assign shortest-path depth from `root` over Inferred children.
    ///
    /// Fails with `CycleDetected` if the reachable subgraph has a cycle and
    /// with `DepthExceeded` past the fixed ceiling. Depths are only written
    /// when the whole pass succeeds.
    pub fn populate_hierarchy_depth(&mut self, root: ConceptId) -> Result<(), GraphError> {
        let view = CharacteristicType::Inferred;
        if !self.concepts.contains_key(&root) {
            return Err(GraphError::NotFound(root));
        }

        // Reachable subgraph.
        let mut reachable: BTreeSet<ConceptId> = BTreeSet::from([root]);
        let mut queue: VecDeque<ConceptId> = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if let Some(concept) = self.concepts.get(&id) {
                for child in concept.children(view) {
                    if reachable.insert(*child) {
                        queue.push_back(*child);
                    }
                }
            }
        }

        // Kahn check restricted to the reachable subgraph.
        let mut in_degree: BTreeMap<ConceptId, usize> = reachable
            .iter()
            .map(|id| {
                let degree = self
                    .concepts
                    .get(id)
                    .map(|c| c.parents(view).iter().filter(|p| reachable.contains(p)).count())
                    .unwrap_or(0);
                (*id, degree)
            })
            .collect();
        let mut ready: VecDeque<ConceptId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut processed = 0usize;
        while let Some(id) = ready.pop_front() {
            processed += 1;
            if let Some(concept) = self.concepts.get(&id) {
                for child in concept.children(view) {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            ready.push_back(*child);
                        }
                    }
                }
            }
        }
        if processed < reachable.len() {
            let concept = in_degree
                .iter()
                .find(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .unwrap_or(root);
            return Err(GraphError::CycleDetected {
                concept,
                characteristic_type: view,
            });
        }

        // Breadth-first shortest depth.
        let mut depths: BTreeMap<ConceptId, u32> = BTreeMap::from([(root, 0)]);
        let mut queue: VecDeque<ConceptId> = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let depth = depths.get(&id).copied().unwrap_or(0);
            let Some(concept) = self.concepts.get(&id) else {
                continue;
            };
            for child in concept.children(view) {
                if depths.contains_key(child) {
                    continue;
                }
                let next = depth + 1;
                if next > primitives::MAX_HIERARCHY_DEPTH {
                    return Err(GraphError::DepthExceeded {
                        concept: *child,
                        depth: primitives::MAX_HIERARCHY_DEPTH,
                    });
                }
                depths.insert(*child, next);
                queue.push_back(*child);
            }
        }

        for concept in self.concepts.values_mut() {
            concept.depth = depths.get(&concept.id).copied();
        }
        Ok(())
    }
}

// =============================================================================
// ROW PARSING & MEMBER MERGE HELPERS
// =============================================================================

fn parse_relationship(
    row: &Row,
    concrete: bool,
    default_type: CharacteristicType,
    released: bool,
) -> Result<Relationship, GraphError> {
    let target = if concrete {
        RelationshipTarget::Concrete(
            ConcreteValue::parse_rf2(row.text(5)?).map_err(|reason| row.error(reason))?,
        )
    } else {
        RelationshipTarget::Concept(row.concept(5)?)
    };
    let characteristic_type =
        CharacteristicType::from_sctid(row.concept(8)?).unwrap_or(default_type);
    let effective_time = row.effective_time(1)?;
    Ok(Relationship {
        id: Some(RelationshipId(row.sctid(0)?)),
        effective_time,
        active: row.flag(2)?,
        module: row.concept(3)?,
        source: row.concept(4)?,
        type_id: row.concept(7)?,
        target,
        group: row.group(6)?,
        characteristic_type,
        axiom: None,
        released: released && effective_time.is_some(),
        dirty: true,
    })
}

/// Replace-by-member-id unless the incoming row is older.
fn merge_member<T>(
    members: &mut BTreeMap<MemberId, T>,
    incoming: T,
    header: impl Fn(&T) -> &MemberHeader,
) -> bool {
    let id = header(&incoming).id.clone();
    if let Some(existing) = members.get(&id) {
        if EffectiveTime::is_older(header(&incoming).effective_time, header(existing).effective_time) {
            return false;
        }
    }
    members.insert(id, incoming);
    true
}

fn merge_vec<T>(
    members: &mut Vec<T>,
    incoming: T,
    header: impl Fn(&T) -> &MemberHeader,
) -> bool {
    match members.iter().position(|m| header(m).id == header(&incoming).id) {
        Some(i) => {
            if EffectiveTime::is_older(header(&incoming).effective_time, header(&members[i]).effective_time) {
                return false;
            }
            members[i] = incoming;
            true
        }
        None => {
            members.push(incoming);
            true
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CONCEPT_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId";
    const REL_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId";
    const LANG_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\tacceptabilityId";
    const AXIOM_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\towlExpression";
    const DESC_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId";
    const OWL_ONTOLOGY_REFSET: u64 = 762_103_008;
    const MODULE: u64 = 900_000_000_000_207_008;

    fn reader(kind: ComponentFile, header: &str, rows: &[String]) -> Rf2Reader<Cursor<String>> {
        let mut text = String::from(header);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text.push('\n');
        Rf2Reader::new(Cursor::new(text), "test.txt", kind).expect("header")
    }

    fn concept_row(id: u64, et: &str, active: bool) -> String {
        format!("{}\t{}\t{}\t{}\t{}", id, et, u8::from(active), MODULE, primitives::PRIMITIVE)
    }

    fn isa_row(id: u64, et: &str, active: bool, source: u64, target: u64) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t0\t{}\t{}\t{}",
            id,
            et,
            u8::from(active),
            MODULE,
            source,
            target,
            primitives::IS_A,
            primitives::INFERRED_RELATIONSHIP,
            primitives::EXISTENTIAL_MODIFIER
        )
    }

    fn load_concepts(store: &mut GraphStore, ids: &[u64]) {
        let rows: Vec<String> = ids.iter().map(|id| concept_row(*id, "20240101", true)).collect();
        store
            .load_concept_batch(
                reader(ComponentFile::Concept, CONCEPT_HEADER, &rows),
                LoadMode::Snapshot,
                true,
            )
            .expect("concepts");
    }

    fn load_rels(store: &mut GraphStore, rows: &[String], mode: LoadMode) -> LoadStats {
        store
            .load_relationship_batch(
                reader(ComponentFile::Relationship, REL_HEADER, rows),
                CharacteristicType::Inferred,
                mode,
                true,
            )
            .expect("relationships")
    }

    #[test]
    fn lookup_contract() {
        let mut store = GraphStore::default();
        assert!(matches!(
            store.get_concept(ConceptId(5), Lookup::Existing),
            Err(GraphError::NotFound(_))
        ));
        assert!(store.get_concept(ConceptId(5), Lookup::CreateIfMissing).is_ok());
        assert!(store.get_concept(ConceptId(5), Lookup::Existing).is_ok());
        assert!(matches!(
            store.get_concept(ConceptId(5), Lookup::ValidateExists),
            Err(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn older_rows_are_ignored() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[100]);
        let stats = store
            .load_concept_batch(
                reader(ComponentFile::Concept, CONCEPT_HEADER, &[concept_row(100, "20230101", false)]),
                LoadMode::Delta,
                true,
            )
            .expect("delta");
        assert_eq!(stats.skipped_older, 1);
        assert!(store.concept(ConceptId(100)).is_some_and(Concept::is_active));
    }

    #[test]
    fn excluded_modules_are_skipped() {
        let mut store = GraphStore::new(StoreOptions {
            excluded_modules: BTreeSet::from([ConceptId(MODULE)]),
            load_other_refsets: false,
        });
        load_concepts(&mut store, &[100]);
        assert!(store.concept(ConceptId(100)).is_none());
    }

    #[test]
    fn snapshot_inactive_row_keeps_adjacency() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[1, 2]);
        load_rels(&mut store, &[isa_row(11, "20240101", true, 2, 1)], LoadMode::Snapshot);
        load_rels(&mut store, &[isa_row(11, "20240701", false, 2, 1)], LoadMode::Snapshot);
        assert!(store.parents(ConceptId(2), CharacteristicType::Inferred).expect("parents").contains(&ConceptId(1)));

        load_rels(&mut store, &[isa_row(11, "20250101", false, 2, 1)], LoadMode::Delta);
        assert!(store.parents(ConceptId(2), CharacteristicType::Inferred).expect("parents").is_empty());
        assert!(store.children(ConceptId(1), CharacteristicType::Inferred).expect("children").is_empty());
    }

    #[test]
    fn structural_duplicates_merge_into_one_edge() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[1, 2]);
        load_rels(
            &mut store,
            &[isa_row(11, "20240101", true, 2, 1), isa_row(21, "20240101", true, 2, 1)],
            LoadMode::Snapshot,
        );
        let edges = store.relationships(ConceptId(2)).expect("rels");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].id, Some(RelationshipId(21)));
    }

    #[test]
    fn delta_removal_respects_remaining_support() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[1, 2]);
        load_rels(&mut store, &[isa_row(21, "20240101", true, 2, 1)], LoadMode::Snapshot);
        // A retired id for the same pair is inactivated; id 21 still holds it.
        load_rels(&mut store, &[isa_row(11, "20240701", false, 2, 1)], LoadMode::Delta);
        assert!(store.parents(ConceptId(2), CharacteristicType::Inferred).expect("parents").contains(&ConceptId(1)));
        assert_eq!(store.relationships(ConceptId(2)).expect("rels").len(), 2);
    }

    #[test]
    fn stated_and_inferred_are_never_merged() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[1, 2]);
        let stated = isa_row(31, "20240101", true, 2, 1).replace(
            &primitives::INFERRED_RELATIONSHIP.to_string(),
            &primitives::STATED_RELATIONSHIP.to_string(),
        );
        load_rels(&mut store, &[isa_row(11, "20240101", true, 2, 1), stated], LoadMode::Snapshot);
        assert_eq!(store.relationships(ConceptId(2)).expect("rels").len(), 2);
        assert!(store.parents(ConceptId(2), CharacteristicType::Stated).expect("stated").contains(&ConceptId(1)));
    }

    #[test]
    fn language_supersession() {
        let mut store = GraphStore::default();
        let refset = primitives::US_ENGLISH_REFSET;
        let row = |id: &str, et: &str, active: bool, acceptability: u64| {
            format!("{}\t{}\t{}\t{}\t{}\t555\t{}", id, et, u8::from(active), MODULE, refset, acceptability)
        };
        let load = |store: &mut GraphStore, rows: &[String]| {
            store
                .load_reference_set_batch(
                    reader(ComponentFile::Refset(RefsetKind::Language), LANG_HEADER, rows),
                    RefsetKind::Language,
                    LoadMode::Delta,
                    false,
                )
                .expect("lang")
        };

        load(&mut store, &[row("a", "20240101", true, primitives::PREFERRED)]);
        // Equal date, both active, different ids: both kept and flagged.
        load(&mut store, &[row("b", "20240101", true, primitives::ACCEPTABLE)]);
        assert_eq!(store.lang_entries(DescriptionId(555)).len(), 2);
        assert_eq!(store.duplicate_lang_pairs().len(), 1);

        // Equal-dated inactivation never overrides an active entry.
        load(&mut store, &[row("c", "20240101", false, primitives::PREFERRED)]);
        assert_eq!(store.lang_entries(DescriptionId(555)).len(), 2);

        // Later date supersedes.
        load(&mut store, &[row("d", "20240701", true, primitives::ACCEPTABLE)]);
        let entries = store.lang_entries(DescriptionId(555));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header.id.as_str(), "d");
    }

    #[test]
    fn depth_is_breadth_first() {
        let mut store = GraphStore::default();
        let root = primitives::ROOT;
        load_concepts(&mut store, &[root, 2, 3, 4]);
        load_rels(
            &mut store,
            &[
                isa_row(11, "20240101", true, 2, root),
                isa_row(12, "20240101", true, 3, 2),
                isa_row(13, "20240101", true, 4, 3),
                isa_row(14, "20240101", true, 4, root),
            ],
            LoadMode::Snapshot,
        );
        store.populate_hierarchy_depth(ConceptId(root)).expect("depth");
        assert_eq!(store.concept(ConceptId(4)).and_then(Concept::depth), Some(1));
        assert_eq!(store.concept(ConceptId(3)).and_then(Concept::depth), Some(2));
    }

    #[test]
    fn cycles_are_reported() {
        let mut store = GraphStore::default();
        let root = primitives::ROOT;
        load_concepts(&mut store, &[root, 2, 3]);
        load_rels(
            &mut store,
            &[
                isa_row(11, "20240101", true, 2, root),
                isa_row(12, "20240101", true, 3, 2),
                isa_row(13, "20240101", true, 2, 3),
            ],
            LoadMode::Snapshot,
        );
        assert!(matches!(
            store.populate_hierarchy_depth(ConceptId(root)),
            Err(GraphError::CycleDetected { .. })
        ));
        assert_eq!(store.concept(ConceptId(2)).and_then(Concept::depth), None);
    }

    #[test]
    fn reset_reseeds_anchors() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[42]);
        store.reset();
        assert!(store.concept(ConceptId(42)).is_none());
        assert!(store.contains(ConceptId(primitives::ROOT)));
        assert!(store.contains(ConceptId(primitives::IS_A)));
    }

    #[test]
    fn unreferenced_anchors_resolve_silently() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[42]);
        store.resolve_phantoms(&PhantomPolicy::default()).expect("resolve");
        assert!(store.warnings().is_empty());
        assert!(!store.contains(ConceptId(primitives::CLINICAL_FINDING)));
    }

    #[test]
    fn referenced_phantom_is_an_error() {
        let mut store = GraphStore::default();
        load_concepts(&mut store, &[primitives::IS_A, 2]);
        load_rels(&mut store, &[isa_row(11, "20240101", true, 2, 999)], LoadMode::Snapshot);
        let err = store.resolve_phantoms(&PhantomPolicy::default()).expect_err("phantom");
        assert!(matches!(err, GraphError::Reference { ref phantoms } if phantoms == &[ConceptId(999)]));

        let whitelisted = PhantomPolicy {
            whitelist: BTreeSet::from([ConceptId(999)]),
            load_all_refsets: false,
        };
        store.resolve_phantoms(&whitelisted).expect("whitelisted");
        assert!(!store.contains(ConceptId(999)));
        assert!(store.parents(ConceptId(2), CharacteristicType::Inferred).expect("parents").is_empty());
    }

    fn axiom_row(id: &str, et: &str, active: bool, owner: u64, expression: &str) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            id,
            et,
            u8::from(active),
            MODULE,
            primitives::OWL_AXIOM_REFSET,
            owner,
            expression
        )
    }

    fn load_axioms(store: &mut GraphStore, rows: &[String], mode: LoadMode) -> LoadStats {
        store
            .load_axiom_batch(reader(ComponentFile::OwlAxiom, AXIOM_HEADER, rows), mode, true)
            .expect("axioms")
    }

    /// (type, target concept, group, axiom) of the stated relationships.
    fn stated_edges(store: &GraphStore, id: u64) -> Vec<(u64, u64, u16, String)> {
        store
            .relationships(ConceptId(id))
            .expect("relationships")
            .iter()
            .filter(|r| r.characteristic_type == CharacteristicType::Stated)
            .map(|r| {
                (
                    r.type_id.0,
                    r.target.concept().map_or(0, |c| c.0),
                    r.group,
                    r.axiom.as_ref().map_or_else(String::new, |a| a.as_str().to_string()),
                )
            })
            .collect()
    }

    fn stated_parents(store: &GraphStore, id: u64) -> Vec<u64> {
        store
            .parents(ConceptId(id), CharacteristicType::Stated)
            .expect("parents")
            .iter()
            .map(|c| c.0)
            .collect()
    }

    fn grouped(owner: u64, parent: u64, attribute: u64, value: u64) -> String {
        format!(
            "SubClassOf(:{} ObjectIntersectionOf(:{} ObjectSomeValuesFrom(:{} \
             ObjectSomeValuesFrom(:{} :{}))))",
            owner,
            parent,
            primitives::ROLE_GROUP,
            attribute,
            value
        )
    }

    #[test]
    fn ontology_header_rows_are_skipped() {
        let mut store = GraphStore::default();
        let header_row = |id: &str, text: &str| {
            format!(
                "{}\t20240101\t1\t{}\t{}\t734147008\t{}",
                id, MODULE, OWL_ONTOLOGY_REFSET, text
            )
        };
        let rows = [
            header_row("o1", "Prefix(:=<http://snomed.info/id/>)"),
            header_row("o2", "Ontology(<http://snomed.info/sct/900000000000207008>)"),
            axiom_row("a1", "20240101", true, 100, "SubClassOf(:100 :138875005)"),
        ];
        let stats = load_axioms(&mut store, &rows, LoadMode::Snapshot);
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.skipped_other_refset, 2);
        assert_eq!(stated_parents(&store, 100), vec![primitives::ROOT]);
        assert!(store.concept(ConceptId(734_147_008)).is_none());
    }

    #[test]
    fn axiom_replacement_withdraws_only_its_relationships() {
        let mut store = GraphStore::default();
        load_axioms(
            &mut store,
            &[
                axiom_row("a1", "20240101", true, 100, &grouped(100, 50, 200, 300)),
                axiom_row("a2", "20240101", true, 100, "SubClassOf(:100 :60)"),
            ],
            LoadMode::Snapshot,
        );
        assert_eq!(stated_parents(&store, 100), vec![50, 60]);

        // a1 now points at a different parent; a2 is untouched.
        load_axioms(
            &mut store,
            &[axiom_row("a1", "20240701", true, 100, &grouped(100, 70, 200, 300))],
            LoadMode::Delta,
        );
        let mut edges = stated_edges(&store, 100);
        edges.sort();
        assert_eq!(
            edges,
            vec![
                (200, 300, 1, "a1".to_string()),
                (primitives::IS_A, 60, 0, "a2".to_string()),
                (primitives::IS_A, 70, 0, "a1".to_string()),
            ]
        );
        assert_eq!(stated_parents(&store, 100), vec![60, 70]);
        assert!(store.children(ConceptId(50), CharacteristicType::Stated).expect("children").is_empty());
        assert!(store.children(ConceptId(70), CharacteristicType::Stated).expect("children").contains(&ConceptId(100)));

        // Inactivating a2 withdraws its IS-A and the Stated link.
        load_axioms(
            &mut store,
            &[axiom_row("a2", "20250101", false, 100, "SubClassOf(:100 :60)")],
            LoadMode::Delta,
        );
        assert_eq!(stated_parents(&store, 100), vec![70]);
        assert!(stated_edges(&store, 100).iter().all(|(_, _, _, axiom)| axiom == "a1"));
        assert_eq!(store.concept(ConceptId(100)).expect("concept").axioms().len(), 2);
    }

    #[test]
    fn unchanged_groups_keep_their_numbers_on_reload() {
        let mut store = GraphStore::default();
        let two_groups = |second: u64| {
            format!(
                "EquivalentClasses(:100 ObjectIntersectionOf(:50 \
                 ObjectSomeValuesFrom(:609096000 ObjectSomeValuesFrom(:200 :300)) \
                 ObjectSomeValuesFrom(:609096000 ObjectSomeValuesFrom(:201 :{}))))",
                second
            )
        };
        load_axioms(&mut store, &[axiom_row("a1", "20240101", true, 100, &two_groups(301))], LoadMode::Snapshot);
        let group_of = |store: &GraphStore, attribute: u64| {
            stated_edges(store, 100)
                .into_iter()
                .find(|(type_id, ..)| *type_id == attribute)
                .map(|(_, _, group, _)| group)
        };
        let before = (group_of(&store, 200), group_of(&store, 201));
        assert_eq!(before, (Some(1), Some(2)));

        // The second group changes; the first keeps its number.
        load_axioms(&mut store, &[axiom_row("a1", "20240701", true, 100, &two_groups(302))], LoadMode::Delta);
        assert_eq!(group_of(&store, 200), Some(1));
        assert_eq!(group_of(&store, 201), Some(2));
        assert_eq!(stated_edges(&store, 100).len(), 3);
    }

    #[test]
    fn new_groups_avoid_numbers_of_other_axioms() {
        let mut store = GraphStore::default();
        load_axioms(
            &mut store,
            &[
                axiom_row("b1", "20240101", true, 100, &grouped(100, 50, 200, 300)),
                axiom_row("b2", "20240101", true, 100, &grouped(100, 50, 201, 301)),
            ],
            LoadMode::Snapshot,
        );
        let groups = axiom::stated_groups(store.relationships(ConceptId(100)).expect("relationships"));
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);

        // Reloading b1 unchanged keeps group 1; b2 keeps group 2.
        load_axioms(
            &mut store,
            &[axiom_row("b1", "20240701", true, 100, &grouped(100, 50, 200, 300))],
            LoadMode::Delta,
        );
        let edges = stated_edges(&store, 100);
        assert!(edges.contains(&(200, 300, 1, "b1".to_string())));
        assert!(edges.contains(&(201, 301, 2, "b2".to_string())));
    }

    #[test]
    fn stored_relationships_render_back_to_the_same_axiom() {
        let text = "EquivalentClasses(:100 ObjectIntersectionOf(:50 :51 \
                    ObjectSomeValuesFrom(:609096000 ObjectIntersectionOf(\
                      ObjectSomeValuesFrom(:200 :300) ObjectSomeValuesFrom(:201 :301))) \
                    ObjectSomeValuesFrom(:609096000 ObjectSomeValuesFrom(:202 :302))))";
        let mut store = GraphStore::default();
        load_axioms(&mut store, &[axiom_row("a1", "20240101", true, 100, text)], LoadMode::Snapshot);
        let concept = store.concept(ConceptId(100)).expect("concept");
        let stored = &concept.axioms()[0];
        assert_eq!(stored.definition_status, DefinitionStatus::FullyDefined);

        let representation = axiom::AxiomRepresentation {
            left: axiom::AxiomSide::Named(ConceptId(100)),
            right: axiom::AxiomSide::Expression(axiom::group_relationships(&stored.relationships)),
            primitive: false,
            form: axiom::AxiomForm::Class,
        };
        let rendered = representation.to_expression();
        let before = {
            let mut edges = stated_edges(&store, 100);
            edges.sort();
            edges
        };

        load_axioms(&mut store, &[axiom_row("a1", "20240701", true, 100, &rendered)], LoadMode::Delta);
        let mut after = stated_edges(&store, 100);
        after.sort();
        assert_eq!(after, before);
        assert_eq!(stated_parents(&store, 100), vec![50, 51]);
    }

    #[test]
    fn property_facts_follow_their_axiom() {
        let mut store = GraphStore::default();
        let transitive = "TransitiveObjectProperty(:738774007)";
        let chain = "SubObjectPropertyOf(ObjectPropertyChain(:246093002 :738774007) :246093002)";
        load_axioms(
            &mut store,
            &[
                axiom_row("p1", "20240101", true, 738_774_007, transitive),
                axiom_row("p2", "20240101", true, 246_093_002, chain),
            ],
            LoadMode::Snapshot,
        );
        let metadata = store.property_metadata();
        assert!(metadata.transitive.contains(&ConceptId(738_774_007)));
        assert_eq!(metadata.chains.len(), 1);

        load_axioms(
            &mut store,
            &[axiom_row("p1", "20240701", false, 738_774_007, transitive)],
            LoadMode::Delta,
        );
        let metadata = store.property_metadata();
        assert!(metadata.transitive.is_empty());
        assert_eq!(metadata.chains.len(), 1);

        // A replacement swaps the fact rather than adding to it.
        load_axioms(
            &mut store,
            &[axiom_row("p2", "20240701", true, 246_093_002, "ReflexiveObjectProperty(:246093002)")],
            LoadMode::Delta,
        );
        let metadata = store.property_metadata();
        assert!(metadata.chains.is_empty());
        assert_eq!(metadata.reflexive, BTreeSet::from([ConceptId(246_093_002)]));
    }

    #[test]
    fn fsn_prefers_us_then_gb() {
        let mut store = GraphStore::default();
        let fsn = |id: u64, term: &str| {
            format!(
                "{}\t20240101\t1\t{}\t42\ten\t{}\t{}\t900000000000448009",
                id, MODULE, primitives::FSN, term
            )
        };
        store
            .load_description_batch(
                reader(
                    ComponentFile::Description,
                    DESC_HEADER,
                    &[fsn(701, "Color (qualifier value)"), fsn(702, "Colour (qualifier value)")],
                ),
                LoadMode::Snapshot,
                true,
            )
            .expect("descriptions");
        let lang = |id: &str, refset: u64, description: u64| {
            format!(
                "{}\t20240101\t1\t{}\t{}\t{}\t{}",
                id, MODULE, refset, description, primitives::PREFERRED
            )
        };
        let load_lang = |store: &mut GraphStore, rows: &[String]| {
            store
                .load_reference_set_batch(
                    reader(ComponentFile::Refset(RefsetKind::Language), LANG_HEADER, rows),
                    RefsetKind::Language,
                    LoadMode::Snapshot,
                    true,
                )
                .expect("lang");
        };

        load_lang(&mut store, &[lang("g", primitives::GB_ENGLISH_REFSET, 702)]);
        assert_eq!(store.fsn(ConceptId(42)), Some("Colour (qualifier value)"));

        load_lang(&mut store, &[lang("u", primitives::US_ENGLISH_REFSET, 701)]);
        assert_eq!(store.fsn(ConceptId(42)), Some("Color (qualifier value)"));
    }
}
