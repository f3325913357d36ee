//! A small RF2 release on disk for the application tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use termgraph::config::AppConfig;
use termgraph_core::primitives::{IS_A, ROOT};
use termgraph_core::{ArchiveManager, Session};

const MODULE: u64 = 900_000_000_000_207_008;
const INFERRED: u64 = 900_000_000_000_011_006;
const EXISTENTIAL: u64 = 900_000_000_000_451_002;
const PRIMITIVE: u64 = 900_000_000_000_074_008;
const FSN: u64 = 900_000_000_000_003_001;
const CASE_INSENSITIVE: u64 = 900_000_000_000_448_009;
const OWL_REFSET: u64 = 733_073_007;

pub const P: u64 = 100_001;
pub const X: u64 = 100_002;
pub const Y: u64 = 100_003;

fn file(dir: &Path, name: &str, header: &str, rows: &[String]) {
    let mut body = String::from(header);
    for row in rows {
        body.push_str("\r\n");
        body.push_str(row);
    }
    fs::write(dir.join(name), body).expect("write rf2 file");
}

fn concept(id: u64, time: &str) -> String {
    format!("{}\t{}\t1\t{}\t{}", id, time, MODULE, PRIMITIVE)
}

fn description(concept: u64, time: &str, term: &str) -> String {
    format!(
        "{}\t{}\t1\t{}\t{}\ten\t{}\t{}\t{}",
        concept * 10 + 1,
        time,
        MODULE,
        concept,
        FSN,
        term,
        CASE_INSENSITIVE
    )
}

fn isa(id: u64, time: &str, child: u64, parent: u64) -> String {
    format!(
        "{}\t{}\t1\t{}\t{}\t{}\t0\t{}\t{}\t{}",
        id, time, MODULE, child, parent, IS_A, INFERRED, EXISTENTIAL
    )
}

fn axiom(concept: u64, time: &str, expression: &str) -> String {
    format!(
        "axiom-{}\t{}\t1\t{}\t{}\t{}\t{}",
        concept, time, MODULE, OWL_REFSET, concept, expression
    )
}

/// Write a release whose concepts are `(id, parent, time)` triples under
/// the root; the root and the IS-A attribute are always present.
fn write_release(dir: &Path, release: &str, children: &[(u64, u64, &str)], with_anchors: bool) -> PathBuf {
    fs::create_dir_all(dir).expect("create release dir");
    let mut concepts = Vec::new();
    let mut descriptions = Vec::new();
    let mut relationships = Vec::new();
    let mut axioms = Vec::new();
    if with_anchors {
        concepts.push(concept(ROOT, "20020131"));
        descriptions.push(description(ROOT, "20020131", "Root concept (root)"));
        concepts.push(concept(IS_A, "20020131"));
        descriptions.push(description(IS_A, "20020131", "Is a (attribute)"));
        relationships.push(isa(200_000, "20020131", IS_A, ROOT));
        axioms.push(axiom(
            IS_A,
            "20020131",
            &format!("SubObjectPropertyOf(:{} :{})", IS_A, ROOT),
        ));
    }
    for (id, parent, time) in children {
        concepts.push(concept(*id, time));
        descriptions.push(description(*id, time, &format!("Concept {} (thing)", id)));
        relationships.push(isa(300_000 + id, time, *id, *parent));
        axioms.push(axiom(*id, time, &format!("SubClassOf(:{} :{})", id, parent)));
    }
    let suffix = "_INT_20240101.txt";
    file(
        dir,
        &format!("sct2_Concept_{}{}", release, suffix),
        "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId",
        &concepts,
    );
    file(
        dir,
        &format!("sct2_Description_{}-en{}", release, suffix),
        "id\teffectiveTime\tactive\tmoduleId\tconceptId\tlanguageCode\ttypeId\tterm\tcaseSignificanceId",
        &descriptions,
    );
    file(
        dir,
        &format!("sct2_Relationship_{}{}", release, suffix),
        "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId",
        &relationships,
    );
    file(
        dir,
        &format!("der2_sRefset_OWLExpression{}{}", release, suffix),
        "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\towlExpression",
        &axioms,
    );
    dir.to_path_buf()
}

/// ROOT <- P <- X.
pub fn base_release(dir: &Path) -> PathBuf {
    write_release(
        dir,
        "Snapshot",
        &[(P, ROOT, "20240101"), (X, P, "20240101")],
        true,
    )
}

/// Adds Y under P.
pub fn addition_delta(dir: &Path) -> PathBuf {
    write_release(dir, "Delta", &[(Y, P, "20240301")], false)
}

/// Configuration rooted in `dir` with fast retries.
pub fn config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.cache_dir = dir.join("cache");
    config.engine.retry.attempts = 1;
    config.engine.retry.pause_ms = 0;
    config.engine.empty_result_pause_ms = 0;
    config
}

/// A ready session over the base release.
pub fn loaded_session(dir: &Path) -> Session {
    let config = config(dir);
    let release = base_release(&dir.join("base"));
    let mut session = Session::from_config(&config.engine);
    ArchiveManager::new(config.engine)
        .load_local(&mut session, &release)
        .expect("load base release");
    session
}
