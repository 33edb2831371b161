// 🔄 Aggregation Run - Normalizer → Resolver → Merger over one input snapshot
// The run is the unit a store persists: profiles, review list and rejections together.

use crate::error::AggregationError;
use crate::merger::merge;
use crate::normalizer::{normalize_batch, RejectedRecord};
use crate::profile::BeeProfile;
use crate::provider::StatusConfidence;
use crate::record::RawRecord;
use crate::resolver::{EntityResolver, ReviewEntry};
use crate::species::SynonymTable;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub raw_records: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub synonym_merges: usize,
    pub profiles: usize,
    pub needs_review: usize,
    pub high_confidence: usize,
    /// Profiles per status code
    pub by_status: BTreeMap<String, usize>,
}

/// Run metadata without the payload (what `last_run` returns)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Ordered by species key
    pub profiles: Vec<BeeProfile>,
    pub needs_review: Vec<ReviewEntry>,
    pub rejected: Vec<RejectedRecord>,
    pub summary: RunSummary,
}

impl AggregationRun {
    pub fn info(&self) -> RunInfo {
        RunInfo {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            summary: self.summary.clone(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} raw records, {} normalized, {} rejected, {} profiles ({} high confidence), {} need review",
            self.run_id,
            self.summary.raw_records,
            self.summary.normalized,
            self.summary.rejected,
            self.summary.profiles,
            self.summary.high_confidence,
            self.summary.needs_review
        )
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator {
    resolver: EntityResolver,
}

impl Aggregator {
    pub fn new(synonyms: Arc<SynonymTable>) -> Self {
        Aggregator {
            resolver: EntityResolver::new(synonyms),
        }
    }

    /// Run the whole pipeline over one snapshot of raw records.
    ///
    /// Only a run with zero valid records fails; bad records are reported.
    pub fn run(&self, raws: &[RawRecord]) -> Result<AggregationRun, AggregationError> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(run_id = %run_id, raw_records = raws.len(), "aggregation run started");

        let batch = normalize_batch(raws);
        if batch.records.is_empty() {
            return Err(AggregationError::NoValidRecords {
                rejected: batch.rejected.len(),
            });
        }
        let normalized = batch.records.len();

        let resolution = self.resolver.resolve(batch.records);
        let synonym_merges = resolution.synonym_merges;

        let groups: Vec<_> = resolution.groups.into_iter().collect();
        let profiles: Vec<BeeProfile> = groups
            .par_iter()
            .map(|(key, group)| merge(key, group))
            .collect::<Result<_, _>>()?;

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for profile in &profiles {
            *by_status
                .entry(profile.conservation_status.code().to_string())
                .or_default() += 1;
        }

        let summary = RunSummary {
            raw_records: raws.len(),
            normalized,
            rejected: batch.rejected.len(),
            synonym_merges,
            profiles: profiles.len(),
            needs_review: resolution.needs_review.len(),
            high_confidence: profiles
                .iter()
                .filter(|p| p.status_confidence == StatusConfidence::High)
                .count(),
            by_status,
        };

        let run = AggregationRun {
            run_id,
            started_at,
            completed_at: Utc::now(),
            profiles,
            needs_review: resolution.needs_review,
            rejected: batch.rejected,
            summary,
        };

        info!("{}", run.summary());
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ConservationStatus, ProviderId};
    use crate::species::SpeciesKey;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(provider: ProviderId, payload: serde_json::Value) -> RawRecord {
        RawRecord::new(provider, payload).retrieved_at(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    fn sample_batch() -> Vec<RawRecord> {
        vec![
            raw(
                ProviderId::Iucn,
                json!({"scientific_name": "Bombus affinis", "iucn_category": "CR", "family": "Apidae"}),
            ),
            raw(
                ProviderId::Gbif,
                json!({"scientific_name": "Bombus affinis Cresson, 1863", "iucn_category": "CRITICALLY_ENDANGERED"}),
            ),
            raw(
                ProviderId::NatureServe,
                json!({"scientific_name": "Psithyrus ashtoni", "global_rank": "G3"}),
            ),
            raw(
                ProviderId::INaturalist,
                json!({"scientific_name": "Bombus bohemicus", "iucn_status": "LC"}),
            ),
            raw(ProviderId::Gbif, json!({"family": "Apidae"})),
        ]
    }

    #[test]
    fn test_run_end_to_end() {
        let synonyms = SynonymTable::from_pairs([("Psithyrus ashtoni", "Bombus bohemicus")]);
        let run = Aggregator::new(Arc::new(synonyms)).run(&sample_batch()).unwrap();

        assert_eq!(run.summary.raw_records, 5);
        assert_eq!(run.summary.normalized, 4);
        assert_eq!(run.summary.rejected, 1);
        assert_eq!(run.rejected[0].index, 4);
        assert_eq!(run.summary.synonym_merges, 1);
        assert_eq!(run.profiles.len(), 2);
        assert_eq!(run.summary.high_confidence, 1);

        // Ordered by key
        assert_eq!(run.profiles[0].species_key, SpeciesKey::from_scientific_name("Bombus affinis"));
        assert_eq!(run.profiles[0].conservation_status, ConservationStatus::CriticallyEndangered);
        assert_eq!(run.profiles[1].conservation_status, ConservationStatus::Vulnerable);
        assert_eq!(run.profiles[1].contributing_records.len(), 2);

        assert_eq!(run.summary.by_status.get("CR"), Some(&1));
        assert!(run.summary().contains("2 profiles"));
    }

    #[test]
    fn test_run_with_no_valid_records_fails() {
        let raws = vec![
            raw(ProviderId::Gbif, json!({"family": "Apidae"})),
            raw(ProviderId::Iucn, json!(null)),
        ];

        let err = Aggregator::new(Arc::new(SynonymTable::new())).run(&raws).unwrap_err();
        assert!(matches!(err, AggregationError::NoValidRecords { rejected: 2 }));
    }

    #[test]
    fn test_empty_input_fails() {
        let err = Aggregator::new(Arc::new(SynonymTable::new())).run(&[]).unwrap_err();
        assert!(matches!(err, AggregationError::NoValidRecords { rejected: 0 }));
    }
}
