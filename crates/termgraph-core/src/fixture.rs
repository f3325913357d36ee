//! Small in-crate graph builder for unit tests.
//!
//! Builds RF2 text and loads it through the real batch loaders.

use crate::graph::{GraphStore, PhantomPolicy};
use crate::primitives;
use crate::rf2::{ComponentFile, Rf2Reader};
use crate::types::{CharacteristicType, LoadMode};
use std::collections::BTreeMap;
use std::io::Cursor;

pub const MODULE: u64 = 900_000_000_000_207_008;

const CONCEPT_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId";
const RELATIONSHIP_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId";
const DESCRIPTION_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId";

#[derive(Debug, Default)]
pub struct StoreBuilder {
    concepts: BTreeMap<u64, bool>,
    edges: Vec<(u64, u64, CharacteristicType)>,
    descriptions: Vec<(u64, String)>,
}

impl StoreBuilder {
    /// Root and IS-A are always defined, with IS-A placed under root.
    pub fn new() -> Self {
        Self::default().isa(primitives::IS_A, primitives::ROOT)
    }

    /// IS-A in both the Stated and Inferred views.
    pub fn isa(self, child: u64, parent: u64) -> Self {
        self.edge(child, parent, CharacteristicType::Stated)
            .edge(child, parent, CharacteristicType::Inferred)
    }

    pub fn inferred_isa(self, child: u64, parent: u64) -> Self {
        self.edge(child, parent, CharacteristicType::Inferred)
    }

    fn edge(mut self, child: u64, parent: u64, view: CharacteristicType) -> Self {
        self.concepts.entry(child).or_insert(true);
        self.concepts.entry(parent).or_insert(true);
        self.edges.push((child, parent, view));
        self
    }

    pub fn inactive(mut self, id: u64) -> Self {
        self.concepts.insert(id, false);
        self
    }

    pub fn description(mut self, concept: u64, term: &str) -> Self {
        self.concepts.entry(concept).or_insert(true);
        self.descriptions.push((concept, term.to_string()));
        self
    }

    pub fn build(self) -> GraphStore {
        let mut concepts = String::from(CONCEPT_HEADER);
        for (id, active) in &self.concepts {
            concepts.push_str(&format!(
                "\n{}\t20240101\t{}\t{}\t{}",
                id,
                u8::from(*active),
                MODULE,
                primitives::PRIMITIVE
            ));
        }

        let mut relationships = String::from(RELATIONSHIP_HEADER);
        for (i, (child, parent, view)) in self.edges.iter().enumerate() {
            relationships.push_str(&format!(
                "\n{}\t20240101\t1\t{}\t{}\t{}\t0\t{}\t{}\t{}",
                1_000 + i,
                MODULE,
                child,
                parent,
                primitives::IS_A,
                view.sctid(),
                primitives::EXISTENTIAL_MODIFIER
            ));
        }

        let mut descriptions = String::from(DESCRIPTION_HEADER);
        for (i, (concept, term)) in self.descriptions.iter().enumerate() {
            descriptions.push_str(&format!(
                "\n{}\t20240101\t1\t{}\t{}\ten\t{}\t{}\t900000000000448009",
                5_000 + i,
                MODULE,
                concept,
                primitives::SYNONYM,
                term
            ));
        }

        let mut store = GraphStore::default();
        let reader = |text: String, kind| {
            Rf2Reader::new(Cursor::new(text), "fixture", kind).expect("fixture header")
        };
        store
            .load_concept_batch(
                reader(concepts, ComponentFile::Concept),
                LoadMode::Snapshot,
                true,
            )
            .expect("fixture concepts");
        store
            .load_description_batch(
                reader(descriptions, ComponentFile::Description),
                LoadMode::Snapshot,
                true,
            )
            .expect("fixture descriptions");
        store
            .load_relationship_batch(
                reader(relationships, ComponentFile::Relationship),
                CharacteristicType::Inferred,
                LoadMode::Snapshot,
                true,
            )
            .expect("fixture relationships");
        store
            .resolve_phantoms(&PhantomPolicy::default())
            .expect("fixture phantoms");
        store
    }
}
