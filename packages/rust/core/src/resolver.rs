//! Partner fan-out: finding document keys and subject labels across every
//! partner institution of a receiving institution.
//!
//! Each partner lookup is an independent task. A semaphore caps how many
//! lookups are in flight, and results flow back over a channel to a single
//! collector, so no task ever touches the result list.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument};

use articulator_catalog::CatalogClient;
use articulator_shared::{AgreementEndpoint, ResolvedKey, SubjectReport};

/// Find the document key for `subject_label` at every partner.
///
/// Partners with no matching report, a report with a null key, or a failed
/// request contribute nothing. At most one key is returned per partner.
/// The order of the result is unspecified.
#[instrument(skip_all, fields(receiving_id = receiving_id, subject = %subject_label))]
pub async fn resolve(
    client: &CatalogClient,
    receiving_id: u32,
    subject_label: &str,
    partners: &[AgreementEndpoint],
    concurrency: usize,
) -> Vec<ResolvedKey> {
    let partners = unique_partners(partners);
    let partner_count = partners.len();
    let label: Arc<str> = Arc::from(subject_label);

    let keys = fan_out(partners, concurrency, |partner| {
        let client = client.clone();
        let label = Arc::clone(&label);
        async move {
            let reports = client
                .fetch_subject_reports(receiving_id, partner.institution_id, partner.year_id)
                .await;

            let key = matching_key(&reports, &label)?;
            debug!(partner = partner.institution_id, %key, "key resolved");
            Some(ResolvedKey {
                institution_id: partner.institution_id,
                key,
            })
        }
    })
    .await;

    info!(
        partners = partner_count,
        resolved = keys.len(),
        "key resolution complete"
    );

    keys
}

/// Collect every subject label offered by any partner, sorted and
/// de-duplicated.
#[instrument(skip_all, fields(receiving_id = receiving_id, partners = partners.len()))]
pub async fn discover_subjects(
    client: &CatalogClient,
    receiving_id: u32,
    partners: &[AgreementEndpoint],
    concurrency: usize,
) -> Vec<String> {
    let per_partner = fan_out(unique_partners(partners), concurrency, |partner| {
        let client = client.clone();
        async move {
            let reports = client
                .fetch_subject_reports(receiving_id, partner.institution_id, partner.year_id)
                .await;
            Some(reports.into_iter().map(|r| r.label).collect::<Vec<_>>())
        }
    })
    .await;

    let labels: BTreeSet<String> = per_partner
        .into_iter()
        .flatten()
        .filter(|label| !label.trim().is_empty())
        .collect();

    info!(subjects = labels.len(), "subject discovery complete");
    labels.into_iter().collect()
}

/// The key of the first report whose label matches exactly and whose key is
/// present.
fn matching_key(reports: &[SubjectReport], label: &str) -> Option<String> {
    reports
        .iter()
        .filter(|r| r.label == label)
        .find_map(|r| r.key.clone())
}

/// Drop repeated partner ids, keeping the first endpoint seen.
fn unique_partners(partners: &[AgreementEndpoint]) -> Vec<AgreementEndpoint> {
    let mut seen = HashSet::new();
    partners
        .iter()
        .filter(|p| seen.insert(p.institution_id))
        .copied()
        .collect()
}

/// Run `work` once per partner with at most `concurrency` units in flight and
/// gather the `Some` results. Returns once every unit has settled.
async fn fan_out<T, F, Fut>(
    partners: Vec<AgreementEndpoint>,
    concurrency: usize,
    work: F,
) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(AgreementEndpoint) -> Fut,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<T>(partners.len().max(1));

    for partner in partners {
        let unit = work(partner);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            if let Some(item) = unit.await {
                let _ = tx.send(item).await;
            }
        });
    }

    // The channel closes once every worker has dropped its sender.
    drop(tx);

    let mut results = Vec::new();
    while let Some(item) = rx.recv().await {
        results.push(item);
    }
    results
}
