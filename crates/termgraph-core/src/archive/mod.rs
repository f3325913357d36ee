//! # Archive Orchestrator
//!
//! Decides which archive backs a session, regenerates stale or missing
//! snapshots, loads the result and checks it before marking the session
//! ready.
//!
//! ```text
//! Start -> DetermineArchive -> LoadLocal ----------------------> IntegrityCheck -> Ready
//!                          \-> Regenerate -> LoadGenerated ---/          |
//!                                                                         v
//!                               DetermineArchive <- DeleteAndRetry (once) -> Fatal
//! ```
//!
//! Cache layout under `cache_dir`:
//! - `releases/<key>.zip`: immutable release packages, never deleted
//! - `snapshots/<project>_<task>_<environment>.zip`: generated snapshots
//! - `deltas/`: transient branch exports

mod generator;
mod reader;

pub use generator::{GenerationStats, SnapshotGenerator};
pub use reader::{Archive, ArchiveEntry, load_archive, load_component};

use crate::closure::{ClosureDiff, TransitiveClosure};
use crate::config::EngineConfig;
use crate::graph::{GraphStore, LoadStats};
use crate::integrity::IntegrityReport;
use crate::primitives;
use crate::remote::{self, TerminologyServer};
use crate::session::Session;
use crate::types::{CharacteristicType, GraphError, LoadMode, RemoteError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

/// Per-owner load switches. Cleared whenever the owner changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadFlags {
    /// Include the dependency (edition) package as a layer when
    /// regenerating an extension snapshot.
    pub load_dependency_plus_extension: bool,
    /// Load the dependency package into the store before the archive.
    pub load_edition_archive: bool,
    /// Mark published rows as released.
    pub populate_release_flag: bool,
    /// Compute the previous release's transitive closure before loading.
    pub populate_previous_transitive_closure: bool,
}

/// What to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTarget {
    pub project: String,
    /// `None` for the project branch itself.
    pub task: Option<String>,
    pub branch: String,
    /// Load this immutable release package instead of a branch snapshot.
    pub release: Option<String>,
}

impl ProjectTarget {
    #[must_use]
    pub fn branch(project: impl Into<String>, task: Option<String>, branch: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            task,
            branch: branch.into(),
            release: None,
        }
    }

    #[must_use]
    pub fn release(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            project: key.clone(),
            task: None,
            branch: String::new(),
            release: Some(key),
        }
    }
}

/// States of one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Start,
    DetermineArchive,
    LoadLocal,
    Regenerate,
    LoadGenerated,
    IntegrityCheck,
    DeleteAndRetry,
    Ready,
    Fatal,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::DetermineArchive => "DETERMINE_ARCHIVE",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::Regenerate => "REGENERATE",
            Self::LoadGenerated => "LOAD_GENERATED",
            Self::IntegrityCheck => "INTEGRITY_CHECK",
            Self::DeleteAndRetry => "DELETE_AND_RETRY",
            Self::Ready => "READY",
            Self::Fatal => "FATAL",
        })
    }
}

/// Report of a finished load.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub path: PathBuf,
    pub regenerated: bool,
    /// Archive determinations performed (1, or 2 after a retry).
    pub attempts: u32,
    pub transitions: Vec<LoadState>,
    pub stats: LoadStats,
    pub integrity: Option<IntegrityReport>,
    /// Change against the previous release, when requested.
    pub closure_diff: Option<ClosureDiff>,
}

#[derive(Debug, Clone, Default)]
struct ArchivePlan {
    path: PathBuf,
    edition: Option<PathBuf>,
    immutable: bool,
}

/// Drives archive selection, regeneration and loading for one owner.
pub struct ArchiveManager {
    config: EngineConfig,
    server: Option<Arc<dyn TerminologyServer>>,
    owner: Option<String>,
    flags: LoadFlags,
    pending_reset: bool,
}

impl fmt::Debug for ArchiveManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveManager")
            .field("owner", &self.owner)
            .field("flags", &self.flags)
            .field("pending_reset", &self.pending_reset)
            .field("remote", &self.server.is_some())
            .finish_non_exhaustive()
    }
}

impl ArchiveManager {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            server: None,
            owner: None,
            flags: LoadFlags::default(),
            pending_reset: false,
        }
    }

    #[must_use]
    pub fn with_server(mut self, server: Arc<dyn TerminologyServer>) -> Self {
        self.server = Some(server);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn flags(&self) -> LoadFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: LoadFlags) {
        self.flags = flags;
    }

    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether the owning session must be reloaded before further deltas.
    #[must_use]
    pub fn needs_reset(&self) -> bool {
        self.pending_reset
    }

    /// Switch to a new owner. A different owner clears the load flags and
    /// schedules a session reset.
    pub fn rebind(&mut self, owner: &str) {
        if self.owner.as_deref() == Some(owner) {
            return;
        }
        info!(previous = ?self.owner, owner, "archive manager rebound");
        self.owner = Some(owner.to_string());
        self.flags = LoadFlags::default();
        self.pending_reset = true;
    }

    #[must_use]
    pub fn release_path(&self, key: &str) -> PathBuf {
        self.config
            .releases_dir()
            .join(format!("{}.zip", sanitize(key)))
    }

    #[must_use]
    pub fn snapshot_path(&self, target: &ProjectTarget) -> PathBuf {
        self.config.snapshots_dir().join(format!(
            "{}_{}_{}.zip",
            sanitize(&target.project),
            sanitize(target.task.as_deref().unwrap_or("MAIN")),
            sanitize(&self.config.environment)
        ))
    }

    fn server(&self) -> Result<&dyn TerminologyServer, GraphError> {
        self.server
            .as_deref()
            .ok_or(GraphError::Remote(RemoteError::Unavailable))
    }

    // =========================================================================
    // STATE MACHINE
    // =========================================================================

    /// Load `target` into the session, regenerating and retrying as needed.
    pub fn load(&mut self, session: &mut Session, target: &ProjectTarget) -> Result<LoadOutcome, GraphError> {
        let mut outcome = LoadOutcome::default();
        let mut plan = ArchivePlan::default();
        let mut previous: Option<TransitiveClosure> = None;
        let mut failure: Option<GraphError> = None;
        let mut state = LoadState::Start;

        loop {
            info!(state = %state, project = %target.project, "archive load state");
            outcome.transitions.push(state);
            state = match state {
                LoadState::Start => {
                    session.reset();
                    self.pending_reset = false;
                    if self.flags.populate_previous_transitive_closure {
                        previous = Some(self.previous_release_closure(target)?);
                    }
                    LoadState::DetermineArchive
                }
                LoadState::DetermineArchive => {
                    outcome.attempts += 1;
                    plan = self.determine_archive(target)?;
                    outcome.path = plan.path.clone();
                    if plan.immutable || (plan.path.exists() && !self.is_stale(&plan.path, &target.branch)?) {
                        LoadState::LoadLocal
                    } else {
                        LoadState::Regenerate
                    }
                }
                LoadState::Regenerate => {
                    self.regenerate(target, &plan.path)?;
                    outcome.regenerated = true;
                    LoadState::LoadGenerated
                }
                LoadState::LoadLocal | LoadState::LoadGenerated => {
                    match self.load_plan(session, &plan) {
                        Ok(stats) => {
                            outcome.stats = stats;
                            LoadState::IntegrityCheck
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!(error = %e, path = %plan.path.display(), "load failed");
                            failure = Some(e);
                            LoadState::DeleteAndRetry
                        }
                        Err(e) => return Err(e),
                    }
                }
                LoadState::IntegrityCheck => {
                    if self.config.run_integrity_check {
                        let report = session.check_integrity(&self.config.integrity_options());
                        outcome.integrity = Some(report.clone());
                        match report.into_result() {
                            Ok(_) => LoadState::Ready,
                            Err(e) => {
                                failure = Some(e);
                                LoadState::DeleteAndRetry
                            }
                        }
                    } else {
                        LoadState::Ready
                    }
                }
                LoadState::DeleteAndRetry => {
                    session.reset();
                    if outcome.attempts > primitives::MAX_LOAD_RETRIES {
                        LoadState::Fatal
                    } else {
                        if plan.immutable {
                            info!(path = %plan.path.display(), "release package preserved");
                        } else if plan.path.exists() {
                            fs::remove_file(&plan.path)?;
                            info!(path = %plan.path.display(), "failed archive deleted");
                        }
                        LoadState::DetermineArchive
                    }
                }
                LoadState::Ready => {
                    if let Some(previous) = previous.take() {
                        let current = session.transitive_closure(CharacteristicType::Inferred);
                        outcome.closure_diff = Some(current.compare(&previous));
                        session.set_previous_closure(Some(previous));
                    }
                    session.mark_ready();
                    info!(
                        path = %outcome.path.display(),
                        concepts = session.store().active_concept_count(),
                        attempts = outcome.attempts,
                        "session ready"
                    );
                    return Ok(outcome);
                }
                LoadState::Fatal => {
                    let cause = failure
                        .take()
                        .unwrap_or_else(|| GraphError::Archive("load failed".to_string()));
                    tracing::error!(error = %cause, attempts = outcome.attempts, "load is unrecoverable");
                    return Err(GraphError::Unrecoverable {
                        attempts: outcome.attempts,
                        cause: Box::new(cause),
                    });
                }
            };
        }
    }

    fn determine_archive(&self, target: &ProjectTarget) -> Result<ArchivePlan, GraphError> {
        let edition = if self.flags.load_edition_archive {
            Some(self.dependency_package(&target.branch)?)
        } else {
            None
        };
        match &target.release {
            Some(key) => Ok(ArchivePlan {
                path: self.ensure_release(key)?,
                edition,
                immutable: true,
            }),
            None => Ok(ArchivePlan {
                path: self.snapshot_path(target),
                edition,
                immutable: false,
            }),
        }
    }

    /// Load the edition package (when planned) and then the archive, both as
    /// snapshots.
    ///
    /// Inactive IS-A rows only unlink adjacency in delta mode, so an archive
    /// that inactivates an edition IS-A leaves the pair linked. The integrity
    /// check then reports it as an `IsaMismatch` for that view.
    fn load_plan(&self, session: &mut Session, plan: &ArchivePlan) -> Result<LoadStats, GraphError> {
        let released = plan.immutable || self.flags.populate_release_flag;
        let store = session.store_mut();
        let mut stats = LoadStats::default();
        if let Some(edition) = &plan.edition {
            stats.absorb(load_archive(store, edition, LoadMode::Snapshot, true)?);
        }
        stats.absorb(load_archive(store, &plan.path, LoadMode::Snapshot, released)?);
        session.finish_load(&self.config.phantom_policy(), self.config.populate_depth)?;
        Ok(stats)
    }

    // =========================================================================
    // STALENESS AND REGENERATION
    // =========================================================================

    /// True when the branch head is newer than the artifact.
    pub fn is_stale(&self, path: &Path, branch: &str) -> Result<bool, GraphError> {
        if self.config.allow_stale {
            return Ok(false);
        }
        let Some(server) = self.server.as_deref() else {
            warn!(path = %path.display(), "no remote service, staleness not checked");
            return Ok(false);
        };
        let metadata = remote::find_branch_metadata(server, branch, &self.config.retry_policy(), |m| {
            m.head_timestamp.is_some()
        })?;
        let head = metadata.head_timestamp.unwrap_or(0);
        let created = artifact_time_ms(path)?;
        if head > created {
            warn!(
                path = %path.display(),
                branch,
                head,
                created,
                "cached snapshot is older than the branch head"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn dependency_package(&self, branch: &str) -> Result<PathBuf, GraphError> {
        let server = self.server()?;
        let metadata = remote::find_branch_metadata(server, branch, &self.config.retry_policy(), |m| {
            m.dependency_package.is_some()
        })?;
        let key = metadata
            .dependency_package
            .ok_or_else(|| GraphError::Archive(format!("no dependency package for {}", branch)))?;
        self.ensure_release(&key)
    }

    /// Local copy of a release package, downloading it if absent.
    pub fn ensure_release(&self, key: &str) -> Result<PathBuf, GraphError> {
        let path = self.release_path(key);
        if path.exists() {
            return Ok(path);
        }
        let server = self.server()?;
        let bytes = self
            .config
            .retry_policy()
            .run("download package", || server.download_package(key))?;
        write_atomically(&path, &bytes)?;
        info!(key, path = %path.display(), bytes = bytes.len(), "release package downloaded");
        Ok(path)
    }

    /// Build a snapshot from the previous release, the optional dependency
    /// package and the branch delta.
    pub fn regenerate(&self, target: &ProjectTarget, output: &Path) -> Result<GenerationStats, GraphError> {
        let server = self.server()?;
        let retry = self.config.retry_policy();
        let metadata = remote::find_branch_metadata(server, &target.branch, &retry, |m| {
            m.previous_package.is_some()
        })?;
        let previous_key = metadata.previous_package.ok_or_else(|| {
            GraphError::Archive(format!("no previous release for {}", target.branch))
        })?;

        let mut generator = SnapshotGenerator::new();
        if self.flags.load_dependency_plus_extension {
            generator = generator.layer(self.dependency_package(&target.branch)?);
        }
        generator = generator.layer(self.ensure_release(&previous_key)?);

        let delta = self
            .config
            .cache_dir
            .join("deltas")
            .join(format!("{}.zip", sanitize(&target.branch)));
        let bytes = retry.run("export delta", || server.export_delta(&target.branch))?;
        write_atomically(&delta, &bytes)?;
        generator = generator.layer(&delta);

        let tag = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| sanitize(&target.project));
        let stats = generator.generate(output, &tag);
        if let Err(e) = fs::remove_file(&delta) {
            warn!(path = %delta.display(), error = %e, "could not remove delta export");
        }
        stats
    }

    /// Inferred closure of the previous release, built in a scratch store.
    fn previous_release_closure(&self, target: &ProjectTarget) -> Result<TransitiveClosure, GraphError> {
        let server = self.server()?;
        let metadata = remote::find_branch_metadata(server, &target.branch, &self.config.retry_policy(), |m| {
            m.previous_package.is_some()
        })?;
        let key = metadata.previous_package.ok_or_else(|| {
            GraphError::Archive(format!("no previous release for {}", target.branch))
        })?;
        let path = self.ensure_release(&key)?;
        let mut store = GraphStore::new(self.config.store_options());
        load_archive(&mut store, &path, LoadMode::Snapshot, true)?;
        store.resolve_phantoms(&self.config.phantom_policy())?;
        Ok(TransitiveClosure::build(&store, CharacteristicType::Inferred))
    }

    // =========================================================================
    // DIRECT LOADS
    // =========================================================================

    /// Load an explicit archive path, without regeneration or retry.
    pub fn load_local(&mut self, session: &mut Session, path: &Path) -> Result<LoadOutcome, GraphError> {
        session.reset();
        self.pending_reset = false;
        let plan = ArchivePlan {
            path: path.to_path_buf(),
            edition: None,
            immutable: false,
        };
        let mut outcome = LoadOutcome {
            path: plan.path.clone(),
            attempts: 1,
            transitions: vec![LoadState::Start, LoadState::LoadLocal],
            ..LoadOutcome::default()
        };
        outcome.stats = self.load_plan(session, &plan)?;
        if self.config.run_integrity_check {
            outcome.transitions.push(LoadState::IntegrityCheck);
            let report = session.check_integrity(&self.config.integrity_options());
            outcome.integrity = Some(report.clone().into_result()?);
        }
        outcome.transitions.push(LoadState::Ready);
        session.mark_ready();
        Ok(outcome)
    }

    /// Merge delta archives onto a loaded session and re-check it.
    pub fn apply_delta(&self, session: &mut Session, paths: &[PathBuf]) -> Result<LoadStats, GraphError> {
        if self.pending_reset {
            return Err(GraphError::Config(
                "owner changed since the last load; reload before applying deltas".into(),
            ));
        }
        let released = self.flags.populate_release_flag;
        let mut stats = LoadStats::default();
        {
            let store = session.store_mut();
            for path in paths {
                stats.absorb(load_archive(store, path, LoadMode::Delta, released)?);
            }
        }
        session.finish_load(&self.config.phantom_policy(), self.config.populate_depth)?;
        if self.config.run_integrity_check {
            session
                .check_integrity(&self.config.integrity_options())
                .into_result()?;
        }
        session.mark_ready();
        Ok(stats)
    }
}

/// Keep a key usable as a single path component.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), GraphError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("partial");
    fs::write(&partial, bytes)?;
    fs::rename(&partial, path)?;
    Ok(())
}

/// Creation time in ms since the epoch, falling back to modification time.
fn artifact_time_ms(path: &Path) -> Result<u64, GraphError> {
    let metadata = fs::metadata(path)?;
    let time = metadata.created().or_else(|_| metadata.modified())?;
    Ok(time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}
