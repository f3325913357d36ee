//! Shared fixtures: RF2 release builders and a scripted remote service.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use termgraph_core::primitives::{IS_A, ROOT};
use termgraph_core::{BranchMetadata, ConceptId, RemoteError, SearchPage, TerminologyServer};

pub const MODULE: u64 = 900_000_000_000_207_008;
pub const INFERRED: u64 = 900_000_000_000_011_006;
pub const EXISTENTIAL: u64 = 900_000_000_000_451_002;
pub const PRIMITIVE: u64 = 900_000_000_000_074_008;
pub const FSN: u64 = 900_000_000_000_003_001;
pub const CASE_INSENSITIVE: u64 = 900_000_000_000_448_009;
pub const OWL_REFSET: u64 = 733_073_007;
pub const REPLACED_BY: u64 = 900_000_000_000_526_001;

/// Concept under the root in the base release.
pub const P: u64 = 100_001;
/// Single-parent child of `P`.
pub const X: u64 = 100_002;
/// Added by the standard delta.
pub const Y: u64 = 100_003;

/// Inferred IS-A relationship ids in the base release.
pub const REL_IS_A: u64 = 200_001;
pub const REL_P: u64 = 200_002;
pub const REL_X: u64 = 200_003;

const CONCEPT_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId";
const DESCRIPTION_HEADER: &str =
    "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId";
const RELATIONSHIP_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId";
const AXIOM_HEADER: &str =
    "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\towlExpression";
const ASSOCIATION_HEADER: &str =
    "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\ttargetComponentId";

fn flag(active: bool) -> u8 {
    u8::from(active)
}

/// Rows of one RF2 release, written as a directory or a zip.
#[derive(Debug, Clone, Default)]
pub struct Rf2Builder {
    concepts: Vec<String>,
    descriptions: Vec<String>,
    relationships: Vec<String>,
    axioms: Vec<String>,
    associations: Vec<String>,
}

impl Rf2Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concept(mut self, id: u64, time: &str, active: bool) -> Self {
        self.concepts.push(format!(
            "{}\t{}\t{}\t{}\t{}",
            id,
            time,
            flag(active),
            MODULE,
            PRIMITIVE
        ));
        self
    }

    pub fn description(mut self, id: u64, time: &str, concept: u64, term: &str) -> Self {
        self.descriptions.push(format!(
            "{}\t{}\t1\t{}\t{}\ten\t{}\t{}\t{}",
            id, time, MODULE, concept, FSN, term, CASE_INSENSITIVE
        ));
        self
    }

    /// Inferred IS-A row.
    pub fn isa(mut self, id: u64, time: &str, active: bool, child: u64, parent: u64) -> Self {
        self.relationships.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t0\t{}\t{}\t{}",
            id,
            time,
            flag(active),
            MODULE,
            child,
            parent,
            IS_A,
            INFERRED,
            EXISTENTIAL
        ));
        self
    }

    pub fn axiom(mut self, id: &str, time: &str, concept: u64, expression: &str) -> Self {
        self.axioms.push(format!(
            "{}\t{}\t1\t{}\t{}\t{}\t{}",
            id, time, MODULE, OWL_REFSET, concept, expression
        ));
        self
    }

    pub fn association(mut self, id: &str, active: bool, source: u64, target: u64) -> Self {
        self.associations.push(format!(
            "{}\t20240101\t{}\t{}\t{}\t{}\t{}",
            id,
            flag(active),
            MODULE,
            REPLACED_BY,
            source,
            target
        ));
        self
    }

    /// A concept with its FSN, stated axiom and inferred IS-A row.
    pub fn child(self, id: u64, parent: u64, relationship: u64, time: &str) -> Self {
        self.concept(id, time, true)
            .description(id * 10 + 1, time, id, &format!("Concept {} (thing)", id))
            .axiom(
                &format!("axiom-{}", id),
                time,
                id,
                &format!("SubClassOf(:{} :{})", id, parent),
            )
            .isa(relationship, time, true, id, parent)
    }

    fn files(&self, release: &str) -> Vec<(String, String)> {
        let file = |prefix: &str, suffix: &str, header: &str, rows: &[String]| {
            let mut body = String::from(header);
            for row in rows {
                body.push_str("\r\n");
                body.push_str(row);
            }
            (format!("{}{}{}_INT_20240101.txt", prefix, release, suffix), body)
        };
        vec![
            file("sct2_Concept_", "", CONCEPT_HEADER, &self.concepts),
            file("sct2_Description_", "-en", DESCRIPTION_HEADER, &self.descriptions),
            file("sct2_Relationship_", "", RELATIONSHIP_HEADER, &self.relationships),
            file("der2_sRefset_OWLExpression", "", AXIOM_HEADER, &self.axioms),
            file("der2_cRefset_Association", "", ASSOCIATION_HEADER, &self.associations),
        ]
    }

    /// Write each file into `dir` (created if needed).
    pub fn write_dir(&self, dir: &Path, release: &str) -> PathBuf {
        fs::create_dir_all(dir).expect("create release dir");
        for (name, body) in self.files(release) {
            fs::write(dir.join(name), body).expect("write rf2 file");
        }
        dir.to_path_buf()
    }

    /// The release as zip bytes, files under `<release>/Terminology/`.
    pub fn zip_bytes(&self, release: &str) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, body) in self.files(release) {
            zip.start_file(format!("{}/Terminology/{}", release, name), options)
                .expect("zip entry");
            zip.write_all(body.as_bytes()).expect("zip write");
        }
        zip.finish().expect("zip finish").into_inner()
    }

    pub fn write_zip(&self, path: &Path, release: &str) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create zip dir");
        }
        fs::write(path, self.zip_bytes(release)).expect("write zip");
        path.to_path_buf()
    }
}

/// ROOT <- IS_A (property), ROOT <- P <- X, each described and axiomatized.
pub fn base_release() -> Rf2Builder {
    Rf2Builder::new()
        .concept(ROOT, "20020131", true)
        .description(ROOT * 10 + 1, "20020131", ROOT, "Root concept (root)")
        .concept(IS_A, "20020131", true)
        .description(IS_A * 10 + 1, "20020131", IS_A, "Is a (attribute)")
        .axiom(
            "axiom-isa",
            "20020131",
            IS_A,
            &format!("SubObjectPropertyOf(:{} :{})", IS_A, ROOT),
        )
        .isa(REL_IS_A, "20020131", true, IS_A, ROOT)
        .child(P, ROOT, REL_P, "20240101")
        .child(X, P, REL_X, "20240101")
}

/// Adds `Y` under `P`.
pub fn addition_delta() -> Rf2Builder {
    Rf2Builder::new().child(Y, P, 200_004, "20240301")
}

/// Inactivates the only inferred parent edge of `X`.
pub fn orphaning_delta() -> Rf2Builder {
    Rf2Builder::new().isa(REL_X, "20240301", false, X, P)
}

// =============================================================================
// SCRIPTED REMOTE SERVICE
// =============================================================================

/// In-memory authoring service with call counters.
#[derive(Default)]
pub struct MockServer {
    pub branches: BTreeMap<String, BranchMetadata>,
    pub packages: BTreeMap<String, Vec<u8>>,
    pub deltas: BTreeMap<String, Vec<u8>>,
    pub search_results: Mutex<Vec<SearchPage>>,
    pub searches: AtomicUsize,
    pub downloads: AtomicUsize,
    pub exports: AtomicUsize,
}

impl MockServer {
    /// `MAIN` built on `INT` (the base release) and a project branch
    /// whose head is at `head` and whose delta is `delta`.
    pub fn project(head: u64, delta: &Rf2Builder) -> Self {
        let mut server = Self::default();
        server.branches.insert(
            "MAIN".into(),
            BranchMetadata {
                path: "MAIN".into(),
                head_timestamp: Some(0),
                previous_package: Some("INT_20240101".into()),
                dependency_package: None,
            },
        );
        server.branches.insert(
            "MAIN/PROJ".into(),
            BranchMetadata {
                path: "MAIN/PROJ".into(),
                head_timestamp: Some(head),
                ..BranchMetadata::default()
            },
        );
        server
            .packages
            .insert("INT_20240101".into(), base_release().zip_bytes("Snapshot"));
        server
            .deltas
            .insert("MAIN/PROJ".into(), delta.zip_bytes("Delta"));
        server
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl TerminologyServer for MockServer {
    fn branch_metadata(&self, branch: &str) -> Result<BranchMetadata, RemoteError> {
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(branch.to_string()))
    }

    fn search_concepts(
        &self,
        _branch: &str,
        _ecl: &str,
        _search_after: Option<&str>,
        _limit: usize,
    ) -> Result<SearchPage, RemoteError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let mut pages = self
            .search_results
            .lock()
            .map_err(|_| RemoteError::Unavailable)?;
        Ok(if pages.is_empty() {
            SearchPage::default()
        } else {
            pages.remove(0)
        })
    }

    fn export_delta(&self, branch: &str) -> Result<Vec<u8>, RemoteError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        self.deltas
            .get(branch)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(branch.to_string()))
    }

    fn download_package(&self, key: &str) -> Result<Vec<u8>, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.packages
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }
}

/// Ids of a concept set, for compact assertions.
pub fn ids<'a>(set: impl IntoIterator<Item = &'a ConceptId>) -> Vec<u64> {
    set.into_iter().map(|c| c.0).collect()
}
