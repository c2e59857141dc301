//! Core domain types for Articulator runs.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the per-school manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one driver run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Catalog records
// ---------------------------------------------------------------------------

/// An institution known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub id: u32,
    /// Display name (the first name the catalog lists).
    pub name: String,
    /// Two-year institution flag.
    pub is_community_college: bool,
}

/// One partner relationship of a receiving institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementEndpoint {
    /// Partner (sending) institution.
    pub institution_id: u32,
    /// Most recent academic year the partner has agreements for.
    pub year_id: u32,
}

/// A subject entry published for a receiving/sending pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub label: String,
    /// Opaque artifact key; absent when there is no agreement that year.
    pub key: Option<String>,
}

/// A document key resolved for one partner and one subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedKey {
    pub institution_id: u32,
    pub key: String,
}

/// The combined document for one (receiving institution, subject) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedArtifact {
    pub school: String,
    pub receiving_id: u32,
    pub subject_code: String,
    /// Location of the combined file.
    pub path: PathBuf,
    /// Number of part files merged.
    pub parts_merged: usize,
    /// Dropped downloads: (document key, diagnostic).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<(String, String)>,
    /// SHA-256 of the combined file.
    pub sha256: String,
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// InstitutionDirectory
// ---------------------------------------------------------------------------

/// All institutions loaded at process start, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct InstitutionDirectory {
    by_id: HashMap<u32, Institution>,
}

impl InstitutionDirectory {
    pub fn get(&self, id: u32) -> Option<&Institution> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Institution> {
        self.by_id.values()
    }

    /// Split into (two-year, four-year) institutions, each sorted by name.
    pub fn split_by_type(&self) -> (Vec<Institution>, Vec<Institution>) {
        let (mut colleges, mut universities): (Vec<_>, Vec<_>) = self
            .by_id
            .values()
            .cloned()
            .partition(|i| i.is_community_college);
        colleges.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        universities.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        (colleges, universities)
    }
}

impl FromIterator<Institution> for InstitutionDirectory {
    fn from_iter<T: IntoIterator<Item = Institution>>(iter: T) -> Self {
        Self {
            by_id: iter.into_iter().map(|i| (i.id, i)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// SchoolManifest
// ---------------------------------------------------------------------------

/// The `manifest.json` written at the root of each school directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolManifest {
    pub schema_version: u32,
    pub run_id: RunId,
    pub school: String,
    pub receiving_id: u32,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Number of partner institutions consulted.
    pub partner_count: usize,
    pub subjects: Vec<SubjectEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedSubject>,
}

/// A subject that produced a merged artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectEntry {
    pub label: String,
    pub code: String,
    /// Merged file name, relative to the school directory.
    pub file: String,
    pub parts_merged: usize,
    pub failed_downloads: usize,
    pub sha256: String,
    pub size_bytes: u64,
}

/// A subject that produced nothing, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedSubject {
    pub label: String,
    pub code: String,
    pub reason: String,
}
