// 📄 Source Records - the common intermediate schema
// One SourceRecord = one provider's view of one species at fetch time.
//
// Records are immutable once built: the builder enforces the invariants
// (non-empty scientific name, observations sorted newest-first and capped).

use crate::error::SchemaError;
use crate::provider::{ConservationStatus, ProviderId, StatusGranularity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum observations kept per record and per merged profile
pub const MAX_OBSERVATIONS: usize = 5;

// ============================================================================
// RAW RECORD (input envelope)
// ============================================================================

/// RawRecord - one untouched provider payload, tagged by the fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub provider: ProviderId,

    /// When the fetcher retrieved the payload (falls back to payload fields)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_at: Option<DateTime<Utc>>,

    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(provider: ProviderId, payload: serde_json::Value) -> Self {
        RawRecord {
            provider,
            retrieved_at: None,
            payload,
        }
    }

    /// Builder pattern: set fetch time
    pub fn retrieved_at(mut self, at: DateTime<Utc>) -> Self {
        self.retrieved_at = Some(at);
        self
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// A dated sighting or specimen location reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub location: String,
}

impl Observation {
    pub fn new(date: NaiveDate, location: impl Into<String>) -> Self {
        Observation {
            date,
            location: location.into(),
        }
    }
}

// ============================================================================
// SPECIES DETAILS
// ============================================================================

/// Descriptive extras some providers collect alongside the status.
///
/// The same shape is used per record and, merged, per profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threats: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub habitats: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conservation_measures: Vec<String>,

    /// IUCN wording: "decreasing", "stable", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_trend: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endemic_to_europe: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endemic_to_eu27: Option<bool>,

    /// GBIF occurrence records for the species
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_count: Option<u64>,

    /// iNaturalist observations for the species
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_count: Option<u64>,

    /// Marked extinct in the provider's taxonomy
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extinct: bool,
}

impl SpeciesDetails {
    pub fn is_empty(&self) -> bool {
        *self == SpeciesDetails::default()
    }

    /// Trim, drop blanks, sort and dedup the text lists
    fn tidy(mut self) -> Self {
        for list in [&mut self.threats, &mut self.habitats, &mut self.conservation_measures] {
            let mut items: Vec<String> = list
                .iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            items.sort();
            items.dedup();
            *list = items;
        }
        self.population_trend = non_blank(self.population_trend);
        self
    }
}

// ============================================================================
// SOURCE RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    provider_id: ProviderId,
    scientific_name: String,
    common_name: Option<String>,
    family_name: Option<String>,
    conservation_status: ConservationStatus,
    status_granularity: StatusGranularity,
    /// Provider's own status string, kept for audit
    raw_status: Option<String>,
    last_observed: Vec<Observation>,
    profile_url: Option<String>,
    retrieved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "SpeciesDetails::is_empty")]
    details: SpeciesDetails,
}

impl SourceRecord {
    /// Create a record with required fields; status defaults to Unknown/Global.
    pub fn new(
        provider_id: ProviderId,
        scientific_name: &str,
        retrieved_at: DateTime<Utc>,
    ) -> Result<Self, SchemaError> {
        let scientific_name = scientific_name.split_whitespace().collect::<Vec<_>>().join(" ");

        if scientific_name.is_empty() {
            return Err(SchemaError::MissingField {
                provider: provider_id,
                field: "scientific_name".to_string(),
            });
        }

        if !scientific_name.chars().any(|c| c.is_alphabetic()) {
            return Err(SchemaError::InvalidField {
                provider: provider_id,
                field: "scientific_name".to_string(),
                reason: format!("`{}` contains no letters", scientific_name),
            });
        }

        Ok(SourceRecord {
            provider_id,
            scientific_name,
            common_name: None,
            family_name: None,
            conservation_status: ConservationStatus::Unknown,
            status_granularity: StatusGranularity::Global,
            raw_status: None,
            last_observed: Vec::new(),
            profile_url: None,
            retrieved_at,
            details: SpeciesDetails::default(),
        })
    }

    /// Builder pattern: add common name (blank values are ignored)
    pub fn with_common_name(mut self, name: Option<String>) -> Self {
        self.common_name = non_blank(name);
        self
    }

    /// Builder pattern: add family name (blank values are ignored)
    pub fn with_family(mut self, family: Option<String>) -> Self {
        self.family_name = non_blank(family);
        self
    }

    /// Builder pattern: add status and its geographic scope
    pub fn with_status(mut self, status: ConservationStatus, granularity: StatusGranularity) -> Self {
        self.conservation_status = status;
        self.status_granularity = granularity;
        self
    }

    pub fn with_raw_status(mut self, raw: Option<String>) -> Self {
        self.raw_status = non_blank(raw);
        self
    }

    pub fn with_profile_url(mut self, url: Option<String>) -> Self {
        self.profile_url = non_blank(url);
        self
    }

    pub fn with_details(mut self, details: SpeciesDetails) -> Self {
        self.details = details.tidy();
        self
    }

    /// Builder pattern: set observations. Exact duplicates are dropped, the
    /// rest sorted newest first and capped at MAX_OBSERVATIONS.
    pub fn with_observations(mut self, mut observations: Vec<Observation>) -> Self {
        observations.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.location.cmp(&b.location)));
        observations.dedup();
        observations.truncate(MAX_OBSERVATIONS);
        self.last_observed = observations;
        self
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    pub fn scientific_name(&self) -> &str {
        &self.scientific_name
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn family_name(&self) -> Option<&str> {
        self.family_name.as_deref()
    }

    pub fn conservation_status(&self) -> ConservationStatus {
        self.conservation_status
    }

    pub fn status_granularity(&self) -> StatusGranularity {
        self.status_granularity
    }

    pub fn raw_status(&self) -> Option<&str> {
        self.raw_status.as_deref()
    }

    pub fn last_observed(&self) -> &[Observation] {
        &self.last_observed
    }

    pub fn profile_url(&self) -> Option<&str> {
        self.profile_url.as_deref()
    }

    pub fn retrieved_at(&self) -> DateTime<Utc> {
        self.retrieved_at
    }

    pub fn details(&self) -> &SpeciesDetails {
        &self.details
    }

    /// Stable content hash over every field: ordering key and audit row identity.
    /// Two fetches of the same provider page at different times differ.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{:?}|{}|{}|{}|{}",
            self.provider_id.code(),
            self.scientific_name,
            self.retrieved_at.to_rfc3339(),
            self.conservation_status.code(),
            self.status_granularity,
            self.raw_status.as_deref().unwrap_or(""),
            self.profile_url.as_deref().unwrap_or(""),
            self.family_name.as_deref().unwrap_or(""),
            self.common_name.as_deref().unwrap_or(""),
        ));
        for observation in &self.last_observed {
            hasher.update(format!("|{}@{}", observation.date, observation.location));
        }
        hasher.update(format!("|{:?}", self.details));
        format!("{:x}", hasher.finalize())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
