//! # RF2 Files
//!
//! Classification of RF2 release files and a tab-delimited row reader.
//!
//! File kinds form a closed enumeration resolved through a single dispatch
//! table of filename patterns. Snapshot vs Delta and released vs unreleased
//! are supplied by the caller; the files themselves do not say.

use crate::types::{ConceptId, EffectiveTime, GraphError, MemberHeader, MemberId};
use std::io::BufRead;
use std::sync::Arc;

// =============================================================================
// FILE KINDS
// =============================================================================

/// Kind of a reference set file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefsetKind {
    Language,
    /// Attribute-value refsets; concept and description inactivation
    /// indicators are recognised by refset id.
    InactivationIndicator,
    Association,
    MrcmDomain,
    MrcmAttributeDomain,
    MrcmAttributeRange,
    MrcmModuleScope,
    /// Any other reference set (only loaded when enabled).
    Other,
}

/// Kind of an RF2 content file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentFile {
    Concept,
    Description,
    TextDefinition,
    Relationship,
    /// Classified but never loaded: stated semantics come from axioms.
    StatedRelationship,
    ConcreteRelationship,
    OwlAxiom,
    Refset(RefsetKind),
}

/// Filename fragment → file kind. First match wins, so more specific
/// patterns must precede the ones they share a prefix with.
const DISPATCH: &[(&str, ComponentFile)] = &[
    ("sct2_Concept_", ComponentFile::Concept),
    ("sct2_Description_", ComponentFile::Description),
    ("sct2_TextDefinition_", ComponentFile::TextDefinition),
    ("sct2_StatedRelationship_", ComponentFile::StatedRelationship),
    (
        "sct2_RelationshipConcreteValues_",
        ComponentFile::ConcreteRelationship,
    ),
    ("sct2_Relationship_", ComponentFile::Relationship),
    ("der2_sRefset_OWLExpression", ComponentFile::OwlAxiom),
    ("der2_sRefset_OWLAxiom", ComponentFile::OwlAxiom),
    (
        "der2_cRefset_Language",
        ComponentFile::Refset(RefsetKind::Language),
    ),
    (
        "der2_cRefset_AttributeValue",
        ComponentFile::Refset(RefsetKind::InactivationIndicator),
    ),
    (
        "der2_cRefset_Association",
        ComponentFile::Refset(RefsetKind::Association),
    ),
    (
        "der2_sssssssRefset_MRCMDomain",
        ComponentFile::Refset(RefsetKind::MrcmDomain),
    ),
    (
        "der2_cissccRefset_MRCMAttributeDomain",
        ComponentFile::Refset(RefsetKind::MrcmAttributeDomain),
    ),
    (
        "der2_ssccRefset_MRCMAttributeRange",
        ComponentFile::Refset(RefsetKind::MrcmAttributeRange),
    ),
    (
        "der2_cRefset_MRCMModuleScope",
        ComponentFile::Refset(RefsetKind::MrcmModuleScope),
    ),
    ("der2_", ComponentFile::Refset(RefsetKind::Other)),
];

/// Number of leading columns shared by every reference set file.
pub const REFSET_HEADER_COLUMNS: usize = 6;

impl ComponentFile {
    /// Classify a file by name. Only `.txt` files are RF2 content.
    #[must_use]
    pub fn classify(file_name: &str) -> Option<Self> {
        let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
        if !base.ends_with(".txt") {
            return None;
        }
        DISPATCH
            .iter()
            .find(|(pattern, _)| base.contains(pattern))
            .map(|(_, kind)| *kind)
    }

    /// Required number of header columns (`None` = variable, at least the
    /// refset header).
    #[must_use]
    pub fn expected_columns(&self) -> Option<usize> {
        match self {
            Self::Concept => Some(5),
            Self::Description | Self::TextDefinition => Some(9),
            Self::Relationship | Self::StatedRelationship | Self::ConcreteRelationship => {
                Some(10)
            }
            Self::OwlAxiom => Some(7),
            Self::Refset(kind) => match kind {
                RefsetKind::Language
                | RefsetKind::InactivationIndicator
                | RefsetKind::Association
                | RefsetKind::MrcmModuleScope => Some(7),
                RefsetKind::MrcmDomain => Some(13),
                RefsetKind::MrcmAttributeDomain => Some(12),
                RefsetKind::MrcmAttributeRange => Some(10),
                RefsetKind::Other => None,
            },
        }
    }

    /// Order in which files of an archive are merged. Concepts come first so
    /// that most references resolve immediately; axioms before relationships
    /// so stated adjacency exists before inferred rows arrive.
    #[must_use]
    pub fn load_order(&self) -> u8 {
        match self {
            Self::Concept => 0,
            Self::Description => 1,
            Self::TextDefinition => 2,
            Self::OwlAxiom => 3,
            Self::Relationship => 4,
            Self::ConcreteRelationship => 5,
            Self::StatedRelationship => 6,
            Self::Refset(RefsetKind::Language) => 7,
            Self::Refset(RefsetKind::InactivationIndicator) => 8,
            Self::Refset(RefsetKind::Association) => 9,
            Self::Refset(
                RefsetKind::MrcmDomain
                | RefsetKind::MrcmAttributeDomain
                | RefsetKind::MrcmAttributeRange
                | RefsetKind::MrcmModuleScope,
            ) => 10,
            Self::Refset(RefsetKind::Other) => 11,
        }
    }

    /// Whether files of this kind are skipped on ingest.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::StatedRelationship)
    }
}

// =============================================================================
// ROW READER
// =============================================================================

/// Reader over one RF2 file: validates the header, then yields rows.
pub struct Rf2Reader<R> {
    inner: R,
    source: Arc<str>,
    kind: ComponentFile,
    columns: Vec<String>,
    line: usize,
    buf: String,
}

impl<R> std::fmt::Debug for Rf2Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rf2Reader")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

impl<R: BufRead> Rf2Reader<R> {
    /// Read and validate the header line.
    pub fn new(mut inner: R, source: &str, kind: ComponentFile) -> Result<Self, GraphError> {
        let mut buf = String::new();
        let read = inner
            .read_line(&mut buf)
            .map_err(|e| GraphError::structural(source, 1, e.to_string()))?;
        if read == 0 {
            return Err(GraphError::structural(source, 1, "missing header line"));
        }
        let header = buf.trim_start_matches('\u{feff}').trim_end_matches(['\r', '\n']);
        let columns: Vec<String> = header.split('\t').map(str::to_string).collect();

        match kind.expected_columns() {
            Some(expected) if columns.len() != expected => {
                return Err(GraphError::structural(
                    source,
                    1,
                    format!(
                        "expected {} header columns for {:?}, found {}",
                        expected,
                        kind,
                        columns.len()
                    ),
                ));
            }
            None if columns.len() < REFSET_HEADER_COLUMNS => {
                return Err(GraphError::structural(
                    source,
                    1,
                    format!(
                        "reference set header has {} columns, need at least {}",
                        columns.len(),
                        REFSET_HEADER_COLUMNS
                    ),
                ));
            }
            _ => {}
        }

        Ok(Self {
            inner,
            source: Arc::from(source),
            kind,
            columns,
            line: 1,
            buf: String::new(),
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn kind(&self) -> ComponentFile {
        self.kind
    }

    /// Header column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Next data row, skipping blank lines. `Ok(None)` at end of input.
    pub fn next_row(&mut self) -> Result<Option<Row>, GraphError> {
        loop {
            self.buf.clear();
            self.line += 1;
            let read = self
                .inner
                .read_line(&mut self.buf)
                .map_err(|e| GraphError::structural(&self.source, self.line, e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            let text = self.buf.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }
            let fields: Vec<String> = text.split('\t').map(str::to_string).collect();
            if fields.len() != self.columns.len() {
                return Err(GraphError::structural(
                    &self.source,
                    self.line,
                    format!(
                        "expected {} fields, found {}",
                        self.columns.len(),
                        fields.len()
                    ),
                ));
            }
            return Ok(Some(Row {
                source: Arc::clone(&self.source),
                line: self.line,
                fields,
            }));
        }
    }
}

/// One data row with typed field accessors.
#[derive(Debug, Clone)]
pub struct Row {
    source: Arc<str>,
    line: usize,
    fields: Vec<String>,
}

impl Row {
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Structural error at this row.
    pub fn error(&self, reason: impl Into<String>) -> GraphError {
        GraphError::structural(&self.source, self.line, reason)
    }

    pub fn text(&self, index: usize) -> Result<&str, GraphError> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.error(format!("missing column {}", index)))
    }

    pub fn sctid(&self, index: usize) -> Result<u64, GraphError> {
        let field = self.text(index)?;
        field
            .parse::<u64>()
            .map_err(|_| self.error(format!("column {}: '{}' is not an SCTID", index, field)))
    }

    pub fn concept(&self, index: usize) -> Result<ConceptId, GraphError> {
        self.sctid(index).map(ConceptId)
    }

    /// `1` / `0` activity flag.
    pub fn flag(&self, index: usize) -> Result<bool, GraphError> {
        match self.text(index)? {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(self.error(format!("column {}: invalid flag '{}'", index, other))),
        }
    }

    pub fn effective_time(&self, index: usize) -> Result<Option<EffectiveTime>, GraphError> {
        EffectiveTime::parse_field(self.text(index)?).map_err(|reason| self.error(reason))
    }

    pub fn group(&self, index: usize) -> Result<u16, GraphError> {
        let field = self.text(index)?;
        field
            .parse::<u16>()
            .map_err(|_| self.error(format!("column {}: invalid group '{}'", index, field)))
    }

    /// The standard leading refset columns
    /// (id, effectiveTime, active, moduleId, refsetId).
    pub fn member_header(&self) -> Result<MemberHeader, GraphError> {
        Ok(MemberHeader {
            id: MemberId::new(self.text(0)?),
            effective_time: self.effective_time(1)?,
            active: self.flag(2)?,
            module: self.concept(3)?,
            refset: self.concept(4)?,
        })
    }

    /// Fields after `start`, as owned strings.
    #[must_use]
    pub fn rest(&self, start: usize) -> Vec<String> {
        self.fields.iter().skip(start).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn dispatch_prefers_specific_patterns() {
        assert_eq!(
            ComponentFile::classify("sct2_RelationshipConcreteValues_Snapshot_INT_20240101.txt"),
            Some(ComponentFile::ConcreteRelationship)
        );
        assert_eq!(
            ComponentFile::classify("Snapshot/Terminology/sct2_Relationship_Snapshot_INT_20240101.txt"),
            Some(ComponentFile::Relationship)
        );
        assert_eq!(
            ComponentFile::classify("sct2_StatedRelationship_Delta_INT.txt"),
            Some(ComponentFile::StatedRelationship)
        );
        assert_eq!(
            ComponentFile::classify("der2_Refset_SimpleSnapshot_INT.txt"),
            Some(ComponentFile::Refset(RefsetKind::Other))
        );
        assert_eq!(ComponentFile::classify("readme.md"), None);
        assert_eq!(ComponentFile::classify("sct2_Concept_Snapshot.json"), None);
    }

    #[test]
    fn header_column_count_is_validated() {
        let data = "id\teffectiveTime\tactive\n1\t20240101\t1\n";
        let err = Rf2Reader::new(Cursor::new(data), "concepts.txt", ComponentFile::Concept)
            .expect_err("short header");
        assert!(matches!(err, GraphError::Structural { line: 1, .. }));
    }

    #[test]
    fn rows_carry_line_numbers() {
        let data = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\r\n\
                    1\t20240101\t1\t2\t3\r\n\
                    \r\n\
                    4\t20240101\tX\t2\t3\r\n";
        let mut reader = Rf2Reader::new(Cursor::new(data), "c.txt", ComponentFile::Concept)
            .expect("header");
        let first = reader.next_row().expect("row").expect("some");
        assert_eq!(first.line(), 2);
        assert!(first.flag(2).expect("flag"));

        let second = reader.next_row().expect("row").expect("some");
        assert_eq!(second.line(), 4);
        let err = second.flag(2).expect_err("bad flag");
        assert!(err.to_string().contains("line 4"));
        assert!(reader.next_row().expect("eof").is_none());
    }

    #[test]
    fn wrong_field_count_is_structural() {
        let data = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId\n1\t20240101\n";
        let mut reader = Rf2Reader::new(Cursor::new(data), "c.txt", ComponentFile::Concept)
            .expect("header");
        assert!(reader.next_row().is_err());
    }
}
