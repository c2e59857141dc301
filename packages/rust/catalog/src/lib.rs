//! HTTP client for the articulation catalog service.
//!
//! This is the only crate that talks to the network. Every call issues a
//! single GET and decodes the JSON body into the domain records from
//! `articulator-shared`. Nothing here retries; callers decide whether an
//! absence is fatal.

mod wire;

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use articulator_shared::{
    AgreementEndpoint, ArticulatorError, Institution, InstitutionDirectory, Result, RunConfig,
    SubjectReport,
};

use wire::{RawAgreement, RawInstitution, RawReports};

/// User-Agent string for catalog requests.
const USER_AGENT: &str = concat!("Articulator/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// CatalogOptions
// ---------------------------------------------------------------------------

/// Connection settings for [`CatalogClient`].
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// API root, e.g. `https://assist.org/api`.
    pub base_url: String,
    /// Timeout for each request in seconds.
    pub timeout_secs: u64,
    /// Category requested from `/agreements`.
    pub category_code: String,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            base_url: "https://assist.org/api".into(),
            timeout_secs: 30,
            category_code: "major".into(),
        }
    }
}

impl From<&RunConfig> for CatalogOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
            category_code: config.category_code.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CatalogClient
// ---------------------------------------------------------------------------

/// Read-only client for the catalog API. Cheap to clone; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    category_code: String,
}

impl CatalogClient {
    /// Build a client for the given options.
    pub fn new(opts: &CatalogOptions) -> Result<Self> {
        let base = Url::parse(&opts.base_url).map_err(|e| {
            ArticulatorError::config(format!("invalid catalog URL {:?}: {e}", opts.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| ArticulatorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            category_code: opts.category_code.clone(),
        })
    }

    /// The API root this client talks to, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List every institution the catalog knows about.
    #[instrument(skip_all)]
    pub async fn list_institutions(&self) -> Result<Vec<Institution>> {
        let url = format!("{}/institutions", self.base_url);
        let raw: Vec<RawInstitution> = self.get_json(&url).await?;
        debug!(count = raw.len(), "institutions listed");
        Ok(raw.into_iter().map(Institution::from).collect())
    }

    /// Load all institutions into a directory keyed by id.
    pub async fn directory(&self) -> Result<InstitutionDirectory> {
        Ok(self.list_institutions().await?.into_iter().collect())
    }

    /// List the two-year partners of a receiving institution, each with its
    /// most recent sending year.
    #[instrument(skip(self))]
    pub async fn list_agreement_partners(
        &self,
        institution_id: u32,
    ) -> Result<Vec<AgreementEndpoint>> {
        let url = format!("{}/institutions/{institution_id}/agreements", self.base_url);
        let raw: Vec<RawAgreement> = self.get_json(&url).await?;
        let total = raw.len();

        let partners: Vec<AgreementEndpoint> =
            raw.into_iter().filter_map(RawAgreement::into_endpoint).collect();

        debug!(total, partners = partners.len(), "agreement partners listed");
        Ok(partners)
    }

    /// Fetch the subject reports for one receiving/sending pair and year.
    ///
    /// Failures are logged and yield an empty list: a missing partner must not
    /// stop the rest of the run.
    pub async fn fetch_subject_reports(
        &self,
        receiving_id: u32,
        sending_id: u32,
        year_id: u32,
    ) -> Vec<SubjectReport> {
        let url = match self.reports_url(receiving_id, sending_id, year_id) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "could not build agreements URL");
                return Vec::new();
            }
        };

        match self.get_json::<RawReports>(url.as_str()).await {
            Ok(raw) => raw.reports.into_iter().map(SubjectReport::from).collect(),
            Err(e) => {
                warn!(%url, error = %e, "failed to fetch subject reports");
                Vec::new()
            }
        }
    }

    /// Download the raw bytes of one artifact.
    pub async fn fetch_artifact(&self, key: &str) -> Result<Vec<u8>> {
        let url = format!("{}/artifacts/{key}", self.base_url);
        debug!(%url, "fetching artifact");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArticulatorError::artifact_fetch(key, format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArticulatorError::artifact_fetch(
                key,
                format!("{url}: HTTP {status}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| {
                ArticulatorError::artifact_fetch(key, format!("{url}: body read failed: {e}"))
            })?;

        Ok(body.to_vec())
    }

    fn reports_url(&self, receiving_id: u32, sending_id: u32, year_id: u32) -> Result<Url> {
        let base = format!("{}/agreements", self.base_url);
        Url::parse_with_params(
            &base,
            &[
                ("receivingInstitutionId", receiving_id.to_string()),
                ("sendingInstitutionId", sending_id.to_string()),
                ("academicYearId", year_id.to_string()),
                ("categoryCode", self.category_code.clone()),
            ],
        )
        .map_err(|e| ArticulatorError::validation(format!("{base}: {e}")))
    }

    /// GET a URL and decode its JSON body. Non-success statuses become
    /// [`ArticulatorError::RemoteUnavailable`].
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ArticulatorError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArticulatorError::RemoteUnavailable {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ArticulatorError::parse(format!("{url}: {e}")))
    }
}
