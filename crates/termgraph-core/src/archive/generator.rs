//! Snapshot generation.
//!
//! Layers (dependency package, previous release, exported delta) are
//! merged file by file: rows are keyed by their id column and the row with
//! the newest effective time wins; on equal times the later layer wins.
//! The result is written as a single zip of `Snapshot` files.

use super::reader::Archive;
use crate::types::{EffectiveTime, GraphError};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const RELEASE_MARKERS: [&str; 3] = ["Snapshot", "Delta", "Full"];

/// Split an RF2 file name around its release-type marker:
/// `der2_cRefset_LanguageDelta-en_INT_20240301.txt` →
/// (`der2_cRefset_Language`, `-en`).
fn split_release_marker(file_name: &str) -> Option<(String, String)> {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    let stem = base.strip_suffix(".txt")?;
    RELEASE_MARKERS.iter().find_map(|marker| {
        let at = stem.find(marker)?;
        let rest = &stem[at + marker.len()..];
        let suffix = rest.split('_').next().unwrap_or_default();
        Some((stem[..at].to_string(), suffix.to_string()))
    })
}

#[derive(Debug, Default)]
struct MergedFile {
    header: String,
    columns: usize,
    rows: BTreeMap<String, (Option<EffectiveTime>, String)>,
}

/// Counters for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub files: usize,
    pub rows: usize,
    /// Rows replaced by a newer row with the same id.
    pub superseded: usize,
}

/// Builds a snapshot archive from ordered layers.
#[derive(Debug, Clone, Default)]
pub struct SnapshotGenerator {
    layers: Vec<PathBuf>,
}

impl SnapshotGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer; later layers take precedence on ties.
    #[must_use]
    pub fn layer(mut self, path: impl Into<PathBuf>) -> Self {
        self.layers.push(path.into());
        self
    }

    /// Merge every layer and write `output`, naming each file
    /// `{prefix}Snapshot{suffix}_{tag}.txt`.
    pub fn generate(&self, output: &Path, tag: &str) -> Result<GenerationStats, GraphError> {
        let mut merged: BTreeMap<(String, String), MergedFile> = BTreeMap::new();
        let mut stats = GenerationStats::default();

        for layer in &self.layers {
            let mut archive = Archive::open(layer)?;
            for (index, _) in archive.components() {
                let name = archive.entries()[index].name.clone();
                let Some(key) = split_release_marker(&name) else {
                    continue;
                };
                let file = merged.entry(key).or_default();
                archive.read_entry(index, |input| merge_rows(input, &name, file, &mut stats))?;
            }
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = output.with_extension("zip.partial");
        {
            let sink = File::create(&partial)?;
            let mut zip = ZipWriter::new(sink);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            for ((prefix, suffix), file) in &merged {
                let entry = format!("{}Snapshot{}_{}.txt", prefix, suffix, tag);
                zip.start_file(entry, options)
                    .map_err(|e| GraphError::Archive(e.to_string()))?;
                zip.write_all(file.header.as_bytes())?;
                zip.write_all(b"\r\n")?;
                for (_, line) in file.rows.values() {
                    zip.write_all(line.as_bytes())?;
                    zip.write_all(b"\r\n")?;
                }
                stats.rows += file.rows.len();
                stats.files += 1;
            }
            zip.finish().map_err(|e| GraphError::Archive(e.to_string()))?;
        }
        fs::rename(&partial, output)?;

        info!(
            output = %output.display(),
            files = stats.files,
            rows = stats.rows,
            superseded = stats.superseded,
            "snapshot generated"
        );
        Ok(stats)
    }
}

fn merge_rows(
    input: &mut dyn BufRead,
    source: &str,
    file: &mut MergedFile,
    stats: &mut GenerationStats,
) -> Result<(), GraphError> {
    let mut lines = input.lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(GraphError::structural(source, 1, "missing header line")),
    };
    let header = header
        .trim_start_matches('\u{feff}')
        .trim_end_matches('\r')
        .to_string();
    let columns = header.split('\t').count();
    if file.header.is_empty() {
        file.header = header;
        file.columns = columns;
    } else if file.columns != columns {
        return Err(GraphError::structural(
            source,
            1,
            format!("expected {} columns as in earlier layers, found {}", file.columns, columns),
        ));
    }

    for (offset, line) in lines.enumerate() {
        let line_no = offset + 2;
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(id), Some(time)) = (fields.next(), fields.next()) else {
            return Err(GraphError::structural(source, line_no, "row has fewer than two fields"));
        };
        let time = EffectiveTime::parse_field(time)
            .map_err(|reason| GraphError::structural(source, line_no, reason))?;
        match file.rows.get(id) {
            Some((existing, _)) if EffectiveTime::is_older(time, *existing) => {}
            Some(_) => {
                stats.superseded += 1;
                file.rows.insert(id.to_string(), (time, line.to_string()));
            }
            None => {
                file.rows.insert(id.to_string(), (time, line.to_string()));
            }
        }
    }
    Ok(())
}
