// 🐝 Bee Profile - the merged, per-species output
// Recomputed wholesale each run; never patched in place.

use crate::provider::{ConservationStatus, ProviderId, StatusConfidence, StatusGranularity};
use crate::record::{SourceRecord, SpeciesDetails};
use crate::species::SpeciesKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A merged observation, attributed to the provider that reported it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProfileObservation {
    pub date: NaiveDate,
    pub location: String,
    pub source_provider: ProviderId,
}

/// Conflict markers left on the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MergeFlag {
    /// Reported a family other than the profile's
    FamilyConflict,
    /// Reported a status other than the one selected
    StatusNotSelected,
    /// Own name differs from the profile key; joined through a synonym link
    SynonymResolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingRecord {
    pub fingerprint: String,
    pub record: SourceRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<MergeFlag>,
}

impl ContributingRecord {
    pub fn has_flag(&self, flag: MergeFlag) -> bool {
        self.flags.contains(&flag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeeProfile {
    pub species_key: SpeciesKey,
    pub scientific_name: String,
    pub family: Option<String>,
    pub common_names: BTreeSet<String>,

    pub conservation_status: ConservationStatus,
    pub status_granularity: StatusGranularity,
    pub status_source_provider: ProviderId,
    pub status_confidence: StatusConfidence,

    /// Most recent first, at most MAX_OBSERVATIONS
    pub observations: Vec<ProfileObservation>,

    pub source_profiles: BTreeMap<ProviderId, String>,

    /// Threats, habitats, trend, endemism and counts pooled across providers
    #[serde(default, skip_serializing_if = "SpeciesDetails::is_empty")]
    pub details: SpeciesDetails,

    /// Every record that fed this profile
    pub contributing_records: Vec<ContributingRecord>,
}

impl BeeProfile {
    pub fn providers(&self) -> BTreeSet<ProviderId> {
        self.contributing_records
            .iter()
            .map(|c| c.record.provider_id())
            .collect()
    }

    /// Providers with no record for this species in the run
    pub fn missing_providers(&self) -> Vec<ProviderId> {
        let present = self.providers();
        ProviderId::ALL
            .into_iter()
            .filter(|p| !present.contains(p))
            .collect()
    }

    /// Fraction of all providers that contributed (0.0 - 1.0)
    pub fn completeness(&self) -> f64 {
        self.providers().len() as f64 / ProviderId::ALL.len() as f64
    }

    pub fn has_conflicts(&self) -> bool {
        self.contributing_records
            .iter()
            .any(|c| c.has_flag(MergeFlag::FamilyConflict) || c.has_flag(MergeFlag::StatusNotSelected))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {} ({:?}, {:?} via {}), {} records, {:.0}% complete",
            self.scientific_name,
            self.family.as_deref().unwrap_or("?"),
            self.conservation_status.code(),
            self.status_granularity,
            self.status_confidence,
            self.status_source_provider,
            self.contributing_records.len(),
            self.completeness() * 100.0
        )
    }
}
