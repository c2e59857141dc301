//! Per-school `manifest.json`.
//!
//! Records what a run produced for one school: every merged subject with its
//! checksum, and every subject that was skipped with the reason.

use std::path::{Path, PathBuf};

use tracing::debug;

use articulator_shared::{
    ArticulatorError, MergedArtifact, Result, SchoolManifest, SubjectEntry,
};

/// File name of the manifest inside a school directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest entry for a merged subject.
pub fn subject_entry(label: &str, merged: &MergedArtifact) -> SubjectEntry {
    let file = merged
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    SubjectEntry {
        label: label.to_string(),
        code: merged.subject_code.clone(),
        file,
        parts_merged: merged.parts_merged,
        failed_downloads: merged.failures.len(),
        sha256: merged.sha256.clone(),
        size_bytes: merged.size_bytes,
    }
}

/// Write `manifest.json` into `school_dir` (write to temp, then rename).
pub fn write_manifest(school_dir: &Path, manifest: &SchoolManifest) -> Result<PathBuf> {
    std::fs::create_dir_all(school_dir).map_err(|e| ArticulatorError::io(school_dir, e))?;

    let json = serde_json::to_string_pretty(manifest).map_err(|e| {
        ArticulatorError::validation(format!("JSON serialization failed: {e}"))
    })?;

    let target = school_dir.join(MANIFEST_FILE);
    let temp = school_dir.join(format!(".{MANIFEST_FILE}.tmp"));

    std::fs::write(&temp, json).map_err(|e| ArticulatorError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| ArticulatorError::io(&target, e))?;

    debug!(path = %target.display(), subjects = manifest.subjects.len(), "wrote manifest");
    Ok(target)
}
