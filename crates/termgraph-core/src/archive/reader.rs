//! Archive containers and file dispatch.
//!
//! An archive is an expanded directory, a `.zip` package or a single RF2
//! `.txt` file. Entries are classified by file name and merged in load
//! order through the graph store's batch loaders.

use crate::graph::{GraphStore, LoadStats};
use crate::rf2::{ComponentFile, Rf2Reader};
use crate::types::{CharacteristicType, GraphError, LoadMode};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

fn archive_error<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> GraphError + '_ {
    move |e| GraphError::Archive(format!("{}: {}", path.display(), e))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Zip(usize),
    File(PathBuf),
}

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the container, `/`-separated.
    pub name: String,
    pub kind: Option<ComponentFile>,
    location: Location,
}

/// An opened archive container.
pub struct Archive {
    path: PathBuf,
    zip: Option<ZipArchive<BufReader<File>>>,
    entries: Vec<ArchiveEntry>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Archive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref().to_path_buf();
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let name = entry
                    .path()
                    .strip_prefix(&path)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                entries.push(ArchiveEntry {
                    kind: ComponentFile::classify(&name),
                    name,
                    location: Location::File(entry.path().to_path_buf()),
                });
            }
            return Ok(Self {
                path,
                zip: None,
                entries,
            });
        }

        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            let file = File::open(&path).map_err(archive_error(&path))?;
            let zip = ZipArchive::new(BufReader::new(file)).map_err(archive_error(&path))?;
            let entries = (0..zip.len())
                .filter_map(|index| {
                    let name = zip.name_for_index(index)?.to_string();
                    (!name.ends_with('/')).then(|| ArchiveEntry {
                        kind: ComponentFile::classify(&name),
                        name,
                        location: Location::Zip(index),
                    })
                })
                .collect();
            return Ok(Self {
                path,
                zip: Some(zip),
                entries,
            });
        }

        if path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(Self {
                entries: vec![ArchiveEntry {
                    kind: ComponentFile::classify(&name),
                    name,
                    location: Location::File(path.clone()),
                }],
                path,
                zip: None,
            });
        }

        Err(GraphError::Archive(format!(
            "{}: not a directory, zip package or RF2 file",
            path.display()
        )))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Classified entries in merge order, as (entry index, kind).
    #[must_use]
    pub fn components(&self) -> Vec<(usize, ComponentFile)> {
        let mut components: Vec<(usize, ComponentFile)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.kind.map(|kind| (i, kind)))
            .collect();
        components.sort_by(|a, b| {
            a.1.load_order()
                .cmp(&b.1.load_order())
                .then_with(|| self.entries[a.0].name.cmp(&self.entries[b.0].name))
        });
        components
    }

    /// Run `read` over the contents of one entry.
    pub fn read_entry<T>(
        &mut self,
        index: usize,
        read: impl FnOnce(&mut dyn BufRead) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| GraphError::Archive(format!("no entry {} in {}", index, self.path.display())))?;
        match &entry.location {
            Location::File(path) => {
                let file = File::open(path).map_err(archive_error(path))?;
                read(&mut BufReader::new(file))
            }
            Location::Zip(zip_index) => {
                let zip = self.zip.as_mut().ok_or_else(|| {
                    GraphError::Archive(format!("{} is not a zip package", self.path.display()))
                })?;
                let file = zip.by_index(*zip_index).map_err(archive_error(&self.path))?;
                read(&mut BufReader::new(file))
            }
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

/// Merge one component stream into the store.
pub fn load_component<R: BufRead>(
    store: &mut GraphStore,
    input: R,
    source: &str,
    kind: ComponentFile,
    mode: LoadMode,
    released: bool,
) -> Result<LoadStats, GraphError> {
    let reader = Rf2Reader::new(input, source, kind)?;
    match kind {
        ComponentFile::Concept => store.load_concept_batch(reader, mode, released),
        ComponentFile::Description | ComponentFile::TextDefinition => {
            store.load_description_batch(reader, mode, released)
        }
        ComponentFile::Relationship | ComponentFile::ConcreteRelationship => {
            store.load_relationship_batch(reader, CharacteristicType::Inferred, mode, released)
        }
        ComponentFile::StatedRelationship => Ok(LoadStats::default()),
        ComponentFile::OwlAxiom => store.load_axiom_batch(reader, mode, released),
        ComponentFile::Refset(refset) => {
            store.load_reference_set_batch(reader, refset, mode, released)
        }
    }
}

/// Merge every recognised file of an archive into the store.
///
/// Stated relationship files are classified but skipped; the Stated view
/// comes from OWL axioms.
pub fn load_archive(
    store: &mut GraphStore,
    path: impl AsRef<Path>,
    mode: LoadMode,
    released: bool,
) -> Result<LoadStats, GraphError> {
    let mut archive = Archive::open(path)?;
    let mut stats = LoadStats::default();
    let mut files = 0usize;
    for (index, kind) in archive.components() {
        let name = archive.entries()[index].name.clone();
        if kind.is_skipped() {
            debug!(file = %name, "skipping stated relationship file");
            continue;
        }
        debug!(file = %name, ?kind, ?mode, "loading component file");
        let batch = archive.read_entry(index, |input| {
            load_component(store, input, &name, kind, mode, released)
        })?;
        stats.absorb(batch);
        files += 1;
    }
    info!(
        archive = %archive.path().display(),
        files,
        rows = stats.rows,
        ?mode,
        "archive loaded"
    );
    Ok(stats)
}
