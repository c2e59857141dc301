//! End-to-end driver: institution → partners → subjects → keys → merged
//! artifacts, once per receiving institution.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use articulator_catalog::{CatalogClient, CatalogOptions};
use articulator_shared::{
    ArticulatorError, CURRENT_SCHEMA_VERSION, Institution, MergedArtifact, Result, RunConfig,
    RunId, SchoolManifest, SkippedSubject,
};

use crate::label;
use crate::manifest;
use crate::resolver;
use crate::retrieval::{RetrievalEngine, RetrievalOptions};

/// Outcome of running the pipeline for one receiving institution.
#[derive(Debug)]
pub struct InstitutionRun {
    pub run_id: RunId,
    pub institution: Institution,
    /// Two-year partners consulted.
    pub partner_count: usize,
    /// Merged subjects as `(label, artifact)`.
    pub merged: Vec<(String, MergedArtifact)>,
    /// Subjects that produced nothing.
    pub skipped: Vec<SkippedSubject>,
    pub manifest_path: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a subject is resolved and retrieved.
    fn subject_started(&self, label: &str, code: &str, current: usize, total: usize);
    /// Called when an institution run completes.
    fn done(&self, run: &InstitutionRun);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn subject_started(&self, _label: &str, _code: &str, _current: usize, _total: usize) {}
    fn done(&self, _run: &InstitutionRun) {}
}

/// Sequences key resolution and retrieval for each subject of an institution.
pub struct Pipeline {
    config: RunConfig,
    client: CatalogClient,
    engine: RetrievalEngine,
}

impl Pipeline {
    /// Build a pipeline (and its HTTP client) from runtime configuration.
    pub fn new(config: RunConfig) -> Result<Self> {
        let client = CatalogClient::new(&CatalogOptions::from(&config))?;
        let engine = RetrievalEngine::new(client.clone(), RetrievalOptions::from(&config));
        Ok(Self {
            config,
            client,
            engine,
        })
    }

    pub fn client(&self) -> &CatalogClient {
        &self.client
    }

    /// Look up one institution by id.
    pub async fn find_institution(&self, id: u32) -> Result<Institution> {
        let directory = self.client.directory().await?;
        directory
            .get(id)
            .cloned()
            .ok_or_else(|| ArticulatorError::validation(format!("unknown institution id {id}")))
    }

    /// Every subject offered to `receiving_id` by any partner, as sorted
    /// `(label, code)` pairs with codes unique within the list.
    pub async fn subjects(&self, receiving_id: u32) -> Result<Vec<(String, String)>> {
        let partners = self.client.list_agreement_partners(receiving_id).await?;
        let labels = resolver::discover_subjects(
            &self.client,
            receiving_id,
            &partners,
            self.config.resolve_concurrency,
        )
        .await;
        label::normalize_all(&labels)
    }

    /// Run the pipeline for one receiving institution.
    ///
    /// When `only` is empty every subject offered by any partner is processed;
    /// otherwise just the given labels. A subject that yields no artifact, or
    /// whose merge fails, is recorded as skipped and the run moves on.
    #[instrument(skip_all, fields(institution = %institution.name, id = institution.id))]
    pub async fn run_institution(
        &self,
        institution: &Institution,
        only: &[String],
        progress: &dyn ProgressReporter,
    ) -> Result<InstitutionRun> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = RunId::new();

        info!(%run_id, "starting institution run");

        progress.phase("Listing partner institutions");
        let partners = self.client.list_agreement_partners(institution.id).await?;

        let labels = if only.is_empty() {
            progress.phase("Discovering subjects");
            resolver::discover_subjects(
                &self.client,
                institution.id,
                &partners,
                self.config.resolve_concurrency,
            )
            .await
        } else {
            only.to_vec()
        };

        let subjects = label::normalize_all(&labels)?;
        let total = subjects.len();
        info!(partners = partners.len(), subjects = total, "subjects selected");

        let mut merged = Vec::new();
        let mut skipped = Vec::new();

        for (i, (subject_label, code)) in subjects.into_iter().enumerate() {
            if i > 0 {
                self.courtesy_delay().await;
            }
            progress.subject_started(&subject_label, &code, i + 1, total);

            let keys = resolver::resolve(
                &self.client,
                institution.id,
                &subject_label,
                &partners,
                self.config.resolve_concurrency,
            )
            .await;

            if keys.is_empty() {
                info!(subject = %subject_label, "no partner publishes this subject, skipping");
                skipped.push(SkippedSubject {
                    label: subject_label,
                    code,
                    reason: "no matching agreements".into(),
                });
                continue;
            }

            match self
                .engine
                .retrieve_and_merge(&institution.name, institution.id, &code, &keys)
                .await
            {
                Ok(artifact) => merged.push((subject_label, artifact)),
                Err(e) => {
                    warn!(subject = %subject_label, %code, error = %e, "subject skipped");
                    skipped.push(SkippedSubject {
                        label: subject_label,
                        code,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let school_manifest = SchoolManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: run_id.clone(),
            school: institution.name.clone(),
            receiving_id: institution.id,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            completed_at: Utc::now(),
            partner_count: partners.len(),
            subjects: merged
                .iter()
                .map(|(label, artifact)| manifest::subject_entry(label, artifact))
                .collect(),
            skipped: skipped.clone(),
        };
        let manifest_path = manifest::write_manifest(
            &self.engine.school_dir(&institution.name),
            &school_manifest,
        )?;

        let run = InstitutionRun {
            run_id,
            institution: institution.clone(),
            partner_count: partners.len(),
            merged,
            skipped,
            manifest_path,
            elapsed: start.elapsed(),
        };

        progress.done(&run);

        info!(
            merged = run.merged.len(),
            skipped = run.skipped.len(),
            elapsed_ms = run.elapsed.as_millis(),
            "institution run complete"
        );

        Ok(run)
    }

    /// Run the pipeline for every four-year institution, in name order.
    ///
    /// An institution whose run fails is logged and skipped. Failing to list
    /// institutions at all is fatal.
    #[instrument(skip_all)]
    pub async fn run_all(&self, progress: &dyn ProgressReporter) -> Result<Vec<InstitutionRun>> {
        progress.phase("Listing institutions");
        let directory = self.client.directory().await?;
        let (_, universities) = directory.split_by_type();

        info!(
            institutions = directory.len(),
            universities = universities.len(),
            "starting full run"
        );

        let mut runs = Vec::with_capacity(universities.len());
        for (i, university) in universities.iter().enumerate() {
            if i > 0 {
                self.courtesy_delay().await;
            }
            match self.run_institution(university, &[], progress).await {
                Ok(run) => runs.push(run),
                Err(e) => {
                    warn!(institution = %university.name, id = university.id, error = %e, "institution skipped");
                }
            }
        }

        Ok(runs)
    }

    async fn courtesy_delay(&self) {
        if self.config.request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
        }
    }
}
