//! Concurrent artifact retrieval and per-subject merging.
//!
//! For one subject at one school, every resolved key is downloaded into a
//! staging file. Downloads run as a bounded stream; a failed download is
//! logged and dropped without touching its siblings. Once all downloads have
//! settled, the staged parts are merged into a single file and removed.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use articulator_catalog::CatalogClient;
use articulator_shared::{ArticulatorError, MergedArtifact, ResolvedKey, Result, RunConfig};

use crate::pdf::PdfMerger;

/// Extension given to staged and merged files.
const ARTIFACT_EXT: &str = "pdf";

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Combines staged part files into one output file.
pub trait ArtifactMerger: Send + Sync {
    /// Write the merge of `parts`, in the given order, to `target`.
    fn merge(&self, parts: &[PathBuf], target: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// RetrievalEngine
// ---------------------------------------------------------------------------

/// Settings for [`RetrievalEngine`].
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Directory that receives one sub-directory per school.
    pub output_root: PathBuf,
    /// Maximum in-flight downloads.
    pub concurrency: usize,
}

impl From<&RunConfig> for RetrievalOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            output_root: config.output_dir.clone(),
            concurrency: config.download_concurrency,
        }
    }
}

/// Downloads resolved artifacts and merges them per subject.
pub struct RetrievalEngine {
    client: CatalogClient,
    options: RetrievalOptions,
    merger: Box<dyn ArtifactMerger>,
}

impl RetrievalEngine {
    /// Create an engine that merges with [`PdfMerger`].
    pub fn new(client: CatalogClient, options: RetrievalOptions) -> Self {
        Self {
            client,
            options,
            merger: Box::new(PdfMerger),
        }
    }

    /// Replace the merge strategy.
    pub fn with_merger(mut self, merger: impl ArtifactMerger + 'static) -> Self {
        self.merger = Box::new(merger);
        self
    }

    /// Staging and output directory for a school.
    pub fn school_dir(&self, school: &str) -> PathBuf {
        self.options.output_root.join(sanitize_component(school))
    }

    /// Download every key, merge the successes into one artifact, and delete
    /// the staged parts.
    ///
    /// Fails with [`ArticulatorError::NoArtifactsRetrieved`] when no download
    /// succeeded; in that case nothing is merged.
    #[instrument(skip_all, fields(school = %school, receiving_id = receiving_id, subject = %subject_code))]
    pub async fn retrieve_and_merge(
        &self,
        school: &str,
        receiving_id: u32,
        subject_code: &str,
        keys: &[ResolvedKey],
    ) -> Result<MergedArtifact> {
        let dir = self.school_dir(school);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ArticulatorError::io(&dir, e))?;

        let keys = unique_by_partner(keys);
        let total = keys.len();

        let outcomes: Vec<std::result::Result<PathBuf, (String, String)>> = stream::iter(keys)
            .map(|resolved| {
                let path = dir.join(part_file_name(
                    receiving_id,
                    resolved.institution_id,
                    subject_code,
                ));
                self.download_part(resolved, path)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut staged = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(path) => staged.push(path),
                Err(failure) => failures.push(failure),
            }
        }

        if staged.is_empty() {
            warn!(
                attempted = total,
                failed = failures.len(),
                "no artifacts retrieved"
            );
            return Err(ArticulatorError::NoArtifactsRetrieved {
                school: school.to_string(),
                subject: subject_code.to_string(),
            });
        }

        staged.sort();

        let file_name = merged_file_name(school, subject_code);
        let target = dir.join(&file_name);
        let temp = dir.join(format!(".{file_name}.tmp"));

        let outcome = self.merge_parts(&staged, &temp, &target);

        // Parts are transient whether or not the merge landed.
        for part in &staged {
            remove_quietly(part);
        }

        let (sha256, size_bytes) = match outcome {
            Ok(digest) => digest,
            Err(e) => {
                remove_quietly(&temp);
                warn!(target = %target.display(), error = %e, "merge failed, parts discarded");
                return Err(e);
            }
        };

        info!(
            merged = staged.len(),
            failed = failures.len(),
            path = %target.display(),
            "artifacts merged"
        );

        Ok(MergedArtifact {
            school: school.to_string(),
            receiving_id,
            subject_code: subject_code.to_string(),
            path: target,
            parts_merged: staged.len(),
            failures,
            sha256,
            size_bytes,
        })
    }

    /// Fetch one artifact and write it to `path`. Errors are reported as
    /// `(key, diagnostic)` so the caller can record and skip them.
    async fn download_part(
        &self,
        resolved: ResolvedKey,
        path: PathBuf,
    ) -> std::result::Result<PathBuf, (String, String)> {
        let bytes = match self.client.fetch_artifact(&resolved.key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    partner = resolved.institution_id,
                    key = %resolved.key,
                    error = %e,
                    "artifact download failed, skipping"
                );
                return Err((resolved.key, e.to_string()));
            }
        };

        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!(path = %path.display(), error = %e, "failed to stage artifact, skipping");
            if path.is_file() {
                remove_quietly(&path);
            }
            return Err((resolved.key, format!("{}: {e}", path.display())));
        }

        debug!(
            partner = resolved.institution_id,
            bytes = bytes.len(),
            path = %path.display(),
            "artifact staged"
        );
        Ok(path)
    }

    /// Merge into `temp`, digest it, then move it onto `target`.
    fn merge_parts(
        &self,
        staged: &[PathBuf],
        temp: &Path,
        target: &Path,
    ) -> Result<(String, u64)> {
        self.merger.merge(staged, temp)?;
        let digest = digest_file(temp)?;
        std::fs::rename(temp, target).map_err(|e| ArticulatorError::io(target, e))?;
        Ok(digest)
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Staging file for one partner's document.
pub fn part_file_name(receiving_id: u32, partner_id: u32, subject_code: &str) -> String {
    format!(
        "report_{receiving_id}_{partner_id}_{}.{ARTIFACT_EXT}",
        sanitize_component(subject_code)
    )
}

/// Merged file for one subject at one school.
pub fn merged_file_name(school: &str, subject_code: &str) -> String {
    format!(
        "combined_{}_{}.{ARTIFACT_EXT}",
        sanitize_component(school),
        sanitize_component(subject_code)
    )
}

/// Make a free-text name safe to use as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let c = if c.is_alphanumeric() || matches!(c, '-' | '.') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn unique_by_partner(keys: &[ResolvedKey]) -> Vec<ResolvedKey> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|k| seen.insert(k.institution_id))
        .cloned()
        .collect()
}

/// Delete a transient file. A file that is already gone is not an error.
fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove transient file"),
    }
}

/// SHA-256 (hex) and size of a file.
fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path).map_err(|e| ArticulatorError::io(path, e))?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher).map_err(|e| ArticulatorError::io(path, e))?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use articulator_catalog::CatalogOptions;

    use crate::pdf::sample_pdf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("articulator-{tag}-{}", uuid::Uuid::now_v7()))
    }

    fn engine_for(server: &MockServer, root: &Path) -> RetrievalEngine {
        let client = CatalogClient::new(&CatalogOptions {
            base_url: server.uri(),
            timeout_secs: 5,
            category_code: "major".into(),
        })
        .unwrap();
        RetrievalEngine::new(
            client,
            RetrievalOptions {
                output_root: root.to_path_buf(),
                concurrency: 2,
            },
        )
    }

    fn concat_engine_for(server: &MockServer, root: &Path) -> RetrievalEngine {
        engine_for(server, root).with_merger(ConcatMerger)
    }

    /// Byte-for-byte concatenation, so plain-text parts show merge order.
    struct ConcatMerger;

    impl ArtifactMerger for ConcatMerger {
        fn merge(&self, parts: &[PathBuf], target: &Path) -> Result<()> {
            let mut out = Vec::new();
            for part in parts {
                out.extend(std::fs::read(part).map_err(|e| ArticulatorError::io(part, e))?);
            }
            std::fs::write(target, out).map_err(|e| ArticulatorError::io(target, e))
        }
    }

    fn key(institution_id: u32, key: &str) -> ResolvedKey {
        ResolvedKey {
            institution_id,
            key: key.into(),
        }
    }

    async fn mount_artifact(server: &MockServer, key: &str, status: u16, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(format!("/artifacts/{key}")))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn file_names_encode_ids_and_code() {
        assert_eq!(part_file_name(120, 113, "CS"), "report_120_113_CS.pdf");
        assert_eq!(merged_file_name("UCI", "GDIM"), "combined_UCI_GDIM.pdf");
        assert_eq!(
            merged_file_name("University of California, Irvine", "CS"),
            "combined_University_of_California_Irvine_CS.pdf"
        );
    }

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize_component("../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_component("  Cal Poly: SLO "), "Cal_Poly_SLO");
        assert_eq!(sanitize_component("///"), "unnamed");
    }

    #[tokio::test]
    async fn default_merger_builds_one_pdf() {
        let server = MockServer::start().await;
        mount_artifact(&server, "k113", 200, &sample_pdf(1, 113)).await;
        mount_artifact(&server, "k51", 200, &sample_pdf(2, 51)).await;

        let root = temp_root("pdf");
        let engine = engine_for(&server, &root);

        let merged = engine
            .retrieve_and_merge("UCI", 120, "CS", &[key(51, "k51"), key(113, "k113")])
            .await
            .unwrap();

        assert_eq!(merged.parts_merged, 2);
        let doc = lopdf::Document::load(&merged.path).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        assert_eq!(files_in(&engine.school_dir("UCI")), vec!["combined_UCI_CS.pdf"]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_merge_leaves_no_transient_files() {
        let server = MockServer::start().await;
        mount_artifact(&server, "k113", 200, &sample_pdf(1, 113)).await;

        let root = temp_root("blocked");
        let engine = engine_for(&server, &root);
        let dir = engine.school_dir("UCI");
        std::fs::create_dir_all(dir.join("combined_UCI_ART.pdf")).unwrap();

        let result = engine
            .retrieve_and_merge("UCI", 120, "ART", &[key(113, "k113")])
            .await;

        assert!(matches!(result, Err(ArticulatorError::Io { .. })));
        assert_eq!(files_in(&dir), vec!["combined_UCI_ART.pdf"]);
        assert!(dir.join("combined_UCI_ART.pdf").is_dir());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unparseable_part_fails_merge_and_is_cleaned_up() {
        let server = MockServer::start().await;
        mount_artifact(&server, "k113", 200, b"<html>maintenance</html>").await;

        let root = temp_root("garbage");
        let engine = engine_for(&server, &root);

        let result = engine
            .retrieve_and_merge("UCI", 120, "CS", &[key(113, "k113")])
            .await;

        assert!(matches!(result, Err(ArticulatorError::Parse { .. })));
        assert!(files_in(&engine.school_dir("UCI")).is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unstageable_part_is_recorded_as_failure() {
        let server = MockServer::start().await;
        mount_artifact(&server, "k7", 200, b"[7]").await;
        mount_artifact(&server, "k51", 200, b"[51]").await;

        let root = temp_root("stage");
        let engine = concat_engine_for(&server, &root);
        let dir = engine.school_dir("UCI");
        std::fs::create_dir_all(dir.join(part_file_name(120, 7, "CS"))).unwrap();

        let merged = engine
            .retrieve_and_merge("UCI", 120, "CS", &[key(7, "k7"), key(51, "k51")])
            .await
            .unwrap();

        assert_eq!(merged.parts_merged, 1);
        assert_eq!(merged.failures.len(), 1);
        assert_eq!(merged.failures[0].0, "k7");
        assert_eq!(std::fs::read(&merged.path).unwrap(), b"[51]");
        assert_eq!(
            files_in(&dir),
            vec!["combined_UCI_CS.pdf", "report_120_7_CS.pdf"]
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn merges_successes_and_removes_parts() {
        let server = MockServer::start().await;
        mount_artifact(&server, "k113", 200, b"[113]").await;
        mount_artifact(&server, "k51", 200, b"[51]").await;
        mount_artifact(&server, "k7", 404, b"").await;

        let root = temp_root("merge");
        let engine = concat_engine_for(&server, &root);
        let keys = vec![key(51, "k51"), key(7, "k7"), key(113, "k113")];

        let merged = engine
            .retrieve_and_merge("UCI", 120, "CS", &keys)
            .await
            .unwrap();

        assert_eq!(merged.parts_merged, 2);
        assert_eq!(merged.failures.len(), 1);
        assert_eq!(merged.failures[0].0, "k7");
        assert_eq!(merged.size_bytes, 9);
        assert_eq!(merged.sha256.len(), 64);

        // Parts are merged in filename order: report_120_113 < report_120_51.
        assert_eq!(std::fs::read(&merged.path).unwrap(), b"[113][51]");

        let dir = engine.school_dir("UCI");
        assert_eq!(files_in(&dir), vec!["combined_UCI_CS.pdf"]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn all_failures_is_no_artifacts_retrieved() {
        let server = MockServer::start().await;
        mount_artifact(&server, "k1", 500, b"").await;
        mount_artifact(&server, "k2", 404, b"").await;

        let root = temp_root("allfail");
        let engine = engine_for(&server, &root);

        let result = engine
            .retrieve_and_merge("UCI", 120, "CS", &[key(1, "k1"), key(2, "k2")])
            .await;

        match result {
            Err(ArticulatorError::NoArtifactsRetrieved { school, subject }) => {
                assert_eq!(school, "UCI");
                assert_eq!(subject, "CS");
            }
            other => panic!("expected NoArtifactsRetrieved, got {other:?}"),
        }

        let dir = engine.school_dir("UCI");
        assert!(files_in(&dir).is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn empty_key_list_is_no_artifacts_retrieved() {
        let server = MockServer::start().await;
        let root = temp_root("empty");
        let engine = engine_for(&server, &root);

        let result = engine.retrieve_and_merge("UCI", 120, "CS", &[]).await;
        assert!(matches!(
            result,
            Err(ArticulatorError::NoArtifactsRetrieved { .. })
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn duplicate_partner_downloads_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/k1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"one".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let root = temp_root("dup");
        let engine = concat_engine_for(&server, &root);

        let merged = engine
            .retrieve_and_merge("UCI", 120, "CS", &[key(1, "k1"), key(1, "k1-again")])
            .await
            .unwrap();
        assert_eq!(merged.parts_merged, 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    /// Records the parts it was handed.
    struct RecordingMerger {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ArtifactMerger for RecordingMerger {
        fn merge(&self, parts: &[PathBuf], target: &Path) -> Result<()> {
            let names = parts
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().to_string());
            self.seen.lock().unwrap().extend(names);
            std::fs::write(target, b"merged").map_err(|e| ArticulatorError::io(target, e))
        }
    }

    #[tokio::test]
    async fn custom_merger_receives_sorted_parts() {
        let server = MockServer::start().await;
        for id in [9, 30, 12] {
            mount_artifact(&server, &format!("k{id}"), 200, b"x").await;
        }

        let root = temp_root("custom");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let engine = engine_for(&server, &root).with_merger(RecordingMerger {
            seen: Arc::clone(&seen),
        });

        let keys = vec![key(30, "k30"), key(9, "k9"), key(12, "k12")];
        let merged = engine
            .retrieve_and_merge("UCSC", 132, "GDIM", &keys)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&merged.path).unwrap(), b"merged");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "report_132_12_GDIM.pdf",
                "report_132_30_GDIM.pdf",
                "report_132_9_GDIM.pdf",
            ]
        );

        let _ = std::fs::remove_dir_all(&root);
    }
}
