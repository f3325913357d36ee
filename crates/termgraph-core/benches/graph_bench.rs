//! # Graph Benchmarks
//!
//! Load and closure benchmarks for termgraph-core.
//!
//! Run with: `cargo bench -p termgraph-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::io::Cursor;
use termgraph_core::primitives::{IS_A, ROOT};
use termgraph_core::{
    CharacteristicType, ClosureCache, ComponentFile, ConceptId, GraphStore, LoadMode, Rf2Reader,
    Session, StoreOptions, TransitiveClosure,
};

const MODULE: u64 = 900_000_000_000_207_008;

/// Concept and relationship files for a binary tree of `size` concepts
/// under the root. Concept `i` has parent `i / 2` (0 being the root).
fn binary_tree(size: u64) -> (String, String) {
    let id = |i: u64| if i == 0 { ROOT } else { 10_000 + i };
    let mut concepts = String::from("id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\n");
    let mut relationships = String::from(
        "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId\n",
    );
    concepts.push_str(&format!("{}\t20240101\t1\t{}\t900000000000074008\n", IS_A, MODULE));
    for i in 0..=size {
        concepts.push_str(&format!("{}\t20240101\t1\t{}\t900000000000074008\n", id(i), MODULE));
        if i > 0 {
            relationships.push_str(&format!(
                "{}\t20240101\t1\t{}\t{}\t{}\t0\t{}\t900000000000011006\t900000000000451002\n",
                1_000_000 + i,
                MODULE,
                id(i),
                id(i / 2),
                IS_A
            ));
        }
    }
    (concepts, relationships)
}

fn load(concepts: &str, relationships: &str) -> GraphStore {
    let mut store = GraphStore::new(StoreOptions::default());
    let reader = Rf2Reader::new(Cursor::new(concepts), "concepts", ComponentFile::Concept)
        .expect("concept header");
    store
        .load_concept_batch(reader, LoadMode::Snapshot, true)
        .expect("concepts");
    let reader = Rf2Reader::new(
        Cursor::new(relationships),
        "relationships",
        ComponentFile::Relationship,
    )
    .expect("relationship header");
    store
        .load_relationship_batch(reader, CharacteristicType::Inferred, LoadMode::Snapshot, true)
        .expect("relationships");
    store
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_snapshot_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_load");

    for size in [1_000u64, 10_000].iter() {
        let (concepts, relationships) = binary_tree(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(load(&concepts, &relationships)));
        });
    }

    group.finish();
}

fn bench_transitive_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("transitive_closure");

    for size in [1_000u64, 10_000].iter() {
        let (concepts, relationships) = binary_tree(*size);
        let store = load(&concepts, &relationships);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(TransitiveClosure::build(&store, CharacteristicType::Inferred)));
        });
    }

    group.finish();
}

fn bench_descendants(c: &mut Criterion) {
    let mut group = c.benchmark_group("descendants");

    for size in [1_000u64, 10_000].iter() {
        let (concepts, relationships) = binary_tree(*size);
        let store = load(&concepts, &relationships);

        group.bench_with_input(BenchmarkId::new("cold", size), size, |b, _| {
            b.iter(|| {
                let cache = ClosureCache::new(CharacteristicType::Inferred);
                black_box(cache.descendants(&store, ConceptId(ROOT)))
            });
        });

        let warm = ClosureCache::new(CharacteristicType::Inferred);
        let _ = warm.descendants(&store, ConceptId(ROOT));
        group.bench_with_input(BenchmarkId::new("warm", size), size, |b, _| {
            b.iter(|| black_box(warm.descendants(&store, ConceptId(ROOT))));
        });
    }

    group.finish();
}

fn bench_ecl_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("ecl_resolve");

    for size in [1_000u64, 10_000].iter() {
        let (concepts, relationships) = binary_tree(*size);
        let mut session = Session::default();
        *session.store_mut() = load(&concepts, &relationships);
        let expression = format!("<< {} OR < {}", 10_002, 10_003);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(session.resolve_ecl("MAIN", &expression)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_snapshot_load,
    bench_transitive_closure,
    bench_descendants,
    bench_ecl_resolve,
);

criterion_main!(benches);
