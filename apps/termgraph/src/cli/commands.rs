//! # CLI Command Implementations
//!
//! Every engine call blocks, so each command hands its work to tokio's
//! blocking pool. The remote client is created on the async side, where
//! the runtime handle is available.

use super::{Source, SourceArgs};
use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::remote::HttpTerminologyServer;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use termgraph_core::{
    ArchiveManager, CharacteristicType, ConceptId, ConceptSet, EclCacheStore, GraphError,
    LoadOutcome, LoadStats, Session, SnapshotGenerator, TerminologyServer,
};
use tokio::runtime::Handle;

// =============================================================================
// OUTPUT
// =============================================================================

/// Global output switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json_mode: bool,
    pub quiet: bool,
    pub verbose: bool,
}

impl Output {
    fn json(&self, value: &serde_json::Value) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }

    fn line(&self, text: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", text.as_ref());
        }
    }
}

/// Direction of a hierarchy query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    Ancestors,
    Descendants,
    DescendantsOrSelf,
}

fn view(stated: bool) -> CharacteristicType {
    if stated {
        CharacteristicType::Stated
    } else {
        CharacteristicType::Inferred
    }
}

fn ids(set: &ConceptSet) -> Vec<u64> {
    set.iter().map(|c| c.0).collect()
}

// =============================================================================
// SESSION LOADING
// =============================================================================

/// Run blocking engine work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, GraphError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, GraphError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| GraphError::Io(format!("worker task failed: {}", e)))?
}

/// The authoring-service client, when a URL is configured.
fn remote(config: &AppConfig) -> Result<Option<Arc<dyn TerminologyServer>>, GraphError> {
    let server = HttpTerminologyServer::from_config(&config.remote, Handle::current())?;
    Ok(server.map(|s| Arc::new(s) as Arc<dyn TerminologyServer>))
}

/// A loaded session with the outcome of its load and deltas.
#[derive(Debug)]
pub struct Loaded {
    pub session: Session,
    pub outcome: LoadOutcome,
    pub delta: Option<LoadStats>,
}

/// Load a session from the source arguments. Blocking.
pub fn load_session(
    config: &AppConfig,
    source: &SourceArgs,
    server: Option<Arc<dyn TerminologyServer>>,
) -> Result<Loaded, GraphError> {
    let mut manager = ArchiveManager::new(config.engine.clone());
    let mut session = Session::from_config(&config.engine);
    if let Some(server) = &server {
        manager = manager.with_server(Arc::clone(server));
    }
    session.set_server(server);

    let outcome = match source.resolve()? {
        Source::Local(path) => manager.load_local(&mut session, &path)?,
        Source::Target(target) => {
            manager.rebind(&target.project);
            manager.load(&mut session, &target)?
        }
    };
    let delta = if source.deltas.is_empty() {
        None
    } else {
        Some(manager.apply_delta(&mut session, &source.deltas)?)
    };
    Ok(Loaded {
        session,
        outcome,
        delta,
    })
}

async fn load(config: AppConfig, source: SourceArgs) -> Result<(AppConfig, Loaded), GraphError> {
    let server = remote(&config)?;
    blocking(move || {
        let loaded = load_session(&config, &source, server)?;
        Ok((config, loaded))
    })
    .await
}

// =============================================================================
// LOAD AND CHECK
// =============================================================================

/// Load a graph and print a summary.
pub async fn cmd_load(config: AppConfig, source: SourceArgs, out: Output) -> Result<(), GraphError> {
    let (_, loaded) = load(config, source).await?;
    let store = loaded.session.store();
    let outcome = &loaded.outcome;
    let transitions: Vec<String> = outcome.transitions.iter().map(ToString::to_string).collect();

    if out.json_mode {
        out.json(&json!({
            "path": outcome.path.display().to_string(),
            "regenerated": outcome.regenerated,
            "attempts": outcome.attempts,
            "transitions": transitions,
            "rows": outcome.stats.rows,
            "merged": outcome.stats.merged,
            "skipped_older": outcome.stats.skipped_older,
            "skipped_excluded": outcome.stats.skipped_excluded,
            "skipped_other_refset": outcome.stats.skipped_other_refset,
            "delta_rows": loaded.delta.map(|d| d.rows),
            "concepts": store.concept_count(),
            "active_concepts": store.active_concept_count(),
            "descriptions": store.description_count(),
            "relationships": store.relationship_count(),
            "warnings": store.warnings(),
            "ready": loaded.session.is_ready(),
            "closure_diff": outcome.closure_diff.map(|d| json!({
                "gained": d.gained,
                "lost": d.lost,
                "new_concepts": d.new_concepts,
                "retired_concepts": d.retired_concepts,
            })),
        }));
        return Ok(());
    }

    out.line(format!("Loaded {}", outcome.path.display()));
    if out.verbose {
        out.line(format!("  States:        {}", transitions.join(" -> ")));
    }
    out.line(format!(
        "  Attempts:      {}{}",
        outcome.attempts,
        if outcome.regenerated { " (regenerated)" } else { "" }
    ));
    out.line(format!(
        "  Rows:          {} ({} merged, {} older, {} excluded, {} other refset)",
        outcome.stats.rows,
        outcome.stats.merged,
        outcome.stats.skipped_older,
        outcome.stats.skipped_excluded,
        outcome.stats.skipped_other_refset
    ));
    if let Some(delta) = loaded.delta {
        out.line(format!("  Delta rows:    {} ({} merged)", delta.rows, delta.merged));
    }
    out.line(format!(
        "  Concepts:      {} ({} active)",
        store.concept_count(),
        store.active_concept_count()
    ));
    out.line(format!("  Descriptions:  {}", store.description_count()));
    out.line(format!("  Relationships: {}", store.relationship_count()));
    if let Some(diff) = outcome.closure_diff {
        out.line(format!(
            "  Closure diff:  +{} / -{} pairs, {} new, {} retired",
            diff.gained, diff.lost, diff.new_concepts, diff.retired_concepts
        ));
    }
    for warning in store.warnings() {
        out.line(format!("  Warning: {}", warning));
    }
    Ok(())
}

/// Load without the integrity gate, then report every failure.
pub async fn cmd_check(
    mut config: AppConfig,
    source: SourceArgs,
    out: Output,
) -> Result<(), GraphError> {
    let options = config.engine.integrity_options();
    config.engine.run_integrity_check = false;
    let (_, loaded) = load(config, source).await?;
    let report = loaded.session.check_integrity(&options);

    if out.json_mode {
        out.json(&json!({
            "ok": report.is_ok(),
            "concepts_checked": report.concepts_checked,
            "failures": report.failures.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }));
    } else {
        out.line(format!(
            "Integrity: {} ({} concepts checked)",
            if report.is_ok() { "OK" } else { "FAILED" },
            report.concepts_checked
        ));
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }
    report.into_result().map(|_| ())
}

// =============================================================================
// QUERIES
// =============================================================================

/// Ancestors or descendants of one concept.
pub async fn cmd_hierarchy(
    config: AppConfig,
    source: SourceArgs,
    out: Output,
    direction: Hierarchy,
    id: u64,
    stated: bool,
) -> Result<(), GraphError> {
    let (_, loaded) = load(config, source).await?;
    let session = &loaded.session;
    let concept = ConceptId(id);
    let set = match direction {
        Hierarchy::Ancestors => session.ancestors(concept, view(stated))?,
        Hierarchy::Descendants => session.descendants(concept, view(stated))?,
        Hierarchy::DescendantsOrSelf => session.descendants_or_self(concept, view(stated))?,
    };

    if out.json_mode {
        out.json(&json!({
            "concept": id,
            "form": view(stated).to_string(),
            "count": set.len(),
            "ids": ids(&set),
        }));
        return Ok(());
    }
    out.line(format!("{} {:?} of {}: {}", view(stated), direction, id, set.len()));
    for member in set.iter() {
        if out.verbose {
            let term = session.store().fsn(*member).unwrap_or("");
            println!("{}\t{}", member, term);
        } else {
            println!("{}", member);
        }
    }
    Ok(())
}

/// Resolve an expression through the on-disk expression cache.
pub async fn cmd_ecl(
    config: AppConfig,
    source: SourceArgs,
    out: Output,
    expression: String,
    on_branch: String,
) -> Result<(), GraphError> {
    let server = remote(&config)?;
    let set = blocking(move || {
        let loaded = load_session(&config, &source, server)?;
        let disk = EclCacheStore::open_in(&config.engine.cache_dir)?;
        let cache = loaded.session.ecl_cache();
        let restored = cache.load_thin(&disk)?;
        tracing::debug!(restored, "expression cache restored");
        let set = loaded.session.resolve_ecl(&on_branch, &expression)?;
        cache.persist(&disk)?;
        Ok((expression, on_branch, set))
    })
    .await?;
    let (expression, branch, set) = set;

    if out.json_mode {
        out.json(&json!({
            "expression": expression,
            "branch": branch,
            "count": set.len(),
            "ids": ids(&set),
        }));
        return Ok(());
    }
    out.line(format!("{} on {}: {} concept(s)", expression, branch, set.len()));
    for member in set.iter() {
        println!("{}", member);
    }
    Ok(())
}

/// Closure size, optionally compared with a previous release archive.
pub async fn cmd_closure(
    config: AppConfig,
    source: SourceArgs,
    out: Output,
    stated: bool,
    previous: Option<PathBuf>,
) -> Result<(), GraphError> {
    let server = remote(&config)?;
    let (pairs, concepts, diff) = blocking(move || {
        let loaded = load_session(&config, &source, server)?;
        let closure = loaded.session.transitive_closure(view(stated));
        let diff = match previous {
            Some(path) => {
                let mut session = Session::from_config(&config.engine);
                ArchiveManager::new(config.engine.clone()).load_local(&mut session, &path)?;
                Some(closure.compare(&session.transitive_closure(view(stated))))
            }
            None => None,
        };
        Ok((closure.pair_count(), closure.len(), diff))
    })
    .await?;

    if out.json_mode {
        out.json(&json!({
            "form": view(stated).to_string(),
            "concepts": concepts,
            "pairs": pairs,
            "diff": diff.map(|d| json!({
                "gained": d.gained,
                "lost": d.lost,
                "new_concepts": d.new_concepts,
                "retired_concepts": d.retired_concepts,
            })),
        }));
        return Ok(());
    }
    out.line(format!(
        "{} closure: {} concepts, {} ancestor pairs",
        view(stated),
        concepts,
        pairs
    ));
    if let Some(d) = diff {
        out.line(format!(
            "  vs previous: +{} / -{} pairs, {} new, {} retired",
            d.gained, d.lost, d.new_concepts, d.retired_concepts
        ));
    }
    Ok(())
}

// =============================================================================
// GENERATE
// =============================================================================

/// Merge layers into one snapshot archive.
pub async fn cmd_generate(
    layers: Vec<PathBuf>,
    output: PathBuf,
    tag: String,
    out: Output,
) -> Result<(), GraphError> {
    let target = output.clone();
    let stats = blocking(move || {
        layers
            .into_iter()
            .fold(SnapshotGenerator::new(), |generator, layer| generator.layer(layer))
            .generate(&target, &tag)
    })
    .await?;

    if out.json_mode {
        out.json(&json!({
            "output": output.display().to_string(),
            "files": stats.files,
            "rows": stats.rows,
            "superseded": stats.superseded,
        }));
    } else {
        out.line(format!(
            "Wrote {}: {} files, {} rows ({} superseded)",
            output.display(),
            stats.files,
            stats.rows,
            stats.superseded
        ));
    }
    Ok(())
}

// =============================================================================
// SERVE
// =============================================================================

/// Load a graph, then serve the query API over it.
pub async fn cmd_serve(
    config: AppConfig,
    source: SourceArgs,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), GraphError> {
    let (config, loaded) = load(config, source).await?;
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", host, port);

    tracing::info!(
        concepts = loaded.session.store().concept_count(),
        ready = loaded.session.is_ready(),
        "graph loaded, starting server"
    );
    let state = AppState::new(loaded.session)
        .with_api_key(config.server.api_key.as_deref())
        .with_integrity(config.engine.integrity_options());
    api::run_server(&addr, state).await
}
