//! JSON shapes returned by the catalog API and their conversion into
//! domain records.

use serde::Deserialize;

use articulator_shared::{AgreementEndpoint, Institution, SubjectReport};

/// `GET /institutions` element.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawInstitution {
    pub id: u32,
    #[serde(default)]
    pub names: Vec<RawName>,
    #[serde(default)]
    pub is_community_college: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawName {
    pub name: String,
}

impl From<RawInstitution> for Institution {
    fn from(raw: RawInstitution) -> Self {
        let name = raw
            .names
            .into_iter()
            .next()
            .map(|n| n.name)
            .unwrap_or_else(|| format!("institution-{}", raw.id));

        Self {
            id: raw.id,
            name,
            is_community_college: raw.is_community_college,
        }
    }
}

/// `GET /institutions/{id}/agreements` element.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawAgreement {
    pub institution_parent_id: u32,
    #[serde(default)]
    pub is_community_college: bool,
    /// Ordered oldest to newest.
    #[serde(default)]
    pub sending_year_ids: Vec<u32>,
}

impl RawAgreement {
    /// Two-year partners with at least one sending year become endpoints.
    pub fn into_endpoint(self) -> Option<AgreementEndpoint> {
        if !self.is_community_college {
            return None;
        }
        let year_id = *self.sending_year_ids.last()?;
        Some(AgreementEndpoint {
            institution_id: self.institution_parent_id,
            year_id,
        })
    }
}

/// `GET /agreements` body.
#[derive(Debug, Deserialize)]
pub(crate) struct RawReports {
    #[serde(default)]
    pub reports: Vec<RawReport>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawReport {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl From<RawReport> for SubjectReport {
    fn from(raw: RawReport) -> Self {
        Self {
            label: raw.label,
            key: raw.key,
        }
    }
}
