// ⚖️ Conflict Resolver / Merger - one canonical profile per species group
//
// Status policy, in order:
//   1. Global > National > Regional granularity
//   2. Most severe status
//   3. Most recent retrieved_at
//   4. Provider order, then record fingerprint
// Unknown statuses only compete when nothing in the group is mapped.

use crate::error::AggregationError;
use crate::profile::{BeeProfile, ContributingRecord, MergeFlag, ProfileObservation};
use crate::provider::{ConservationStatus, ProviderId, StatusConfidence, StatusGranularity};
use crate::record::{SourceRecord, SpeciesDetails, MAX_OBSERVATIONS};
use crate::species::SpeciesKey;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// STATUS SELECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSelection {
    pub status: ConservationStatus,
    pub granularity: StatusGranularity,
    pub provider: ProviderId,
    pub confidence: StatusConfidence,
    /// Fingerprint of the winning record
    pub winner: String,
}

/// Pick the profile status from a non-empty set of records.
pub fn select_status(records: &[SourceRecord]) -> Option<StatusSelection> {
    let any_known = records.iter().any(|r| r.conservation_status().is_known());

    let winner = records
        .iter()
        .filter(|r| !any_known || r.conservation_status().is_known())
        .max_by(|a, b| compare_status(a, b))?;

    let status = winner.conservation_status();
    let granularity = winner.status_granularity();

    let agreeing: BTreeSet<ProviderId> = records
        .iter()
        .filter(|r| r.conservation_status() == status && r.status_granularity() == granularity)
        .map(SourceRecord::provider_id)
        .collect();

    let confidence = if status.is_known() && agreeing.len() >= 2 {
        StatusConfidence::High
    } else {
        StatusConfidence::Low
    };

    Some(StatusSelection {
        status,
        granularity,
        provider: winner.provider_id(),
        confidence,
        winner: winner.fingerprint(),
    })
}

/// Greater = preferred
fn compare_status(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    a.status_granularity()
        .precedence()
        .cmp(&b.status_granularity().precedence())
        .then_with(|| a.conservation_status().severity().cmp(&b.conservation_status().severity()))
        .then_with(|| a.retrieved_at().cmp(&b.retrieved_at()))
        .then_with(|| b.provider_id().cmp(&a.provider_id()))
        .then_with(|| b.fingerprint().cmp(&a.fingerprint()))
}

// ============================================================================
// MERGE
// ============================================================================

/// Merge one resolved group into a profile. Deterministic: the same group in
/// any order yields the same profile.
pub fn merge(key: &SpeciesKey, group: &[SourceRecord]) -> Result<BeeProfile, AggregationError> {
    let selection =
        select_status(group).ok_or_else(|| AggregationError::EmptyGroup(key.to_string()))?;

    // Fingerprints cover every field, so equal keys mean identical records
    let mut records: Vec<(String, &SourceRecord)> =
        group.iter().map(|r| (r.fingerprint(), r)).collect();
    records.sort_by(|(fa, a), (fb, b)| {
        a.provider_id()
            .cmp(&b.provider_id())
            .then_with(|| a.retrieved_at().cmp(&b.retrieved_at()))
            .then_with(|| fa.cmp(fb))
    });

    let family = select_family(records.iter().map(|(_, r)| *r));
    let family_key = family.as_ref().map(|f| f.to_lowercase());

    let contributing_records = records
        .iter()
        .map(|(fingerprint, record)| {
            let mut flags = Vec::new();

            if let (Some(own), Some(chosen)) = (record.family_name(), family_key.as_deref()) {
                if own.to_lowercase() != chosen {
                    flags.push(MergeFlag::FamilyConflict);
                }
            }

            if record.conservation_status() != selection.status
                || record.status_granularity() != selection.granularity
            {
                flags.push(MergeFlag::StatusNotSelected);
            }

            if &SpeciesKey::from_scientific_name(record.scientific_name()) != key {
                flags.push(MergeFlag::SynonymResolved);
            }

            ContributingRecord {
                fingerprint: fingerprint.clone(),
                record: (*record).clone(),
                flags,
            }
        })
        .collect();

    // Later retrievals overwrite earlier ones per provider
    let source_profiles: BTreeMap<ProviderId, String> = records
        .iter()
        .filter_map(|(_, r)| r.profile_url().map(|url| (r.provider_id(), url.to_string())))
        .collect();

    Ok(BeeProfile {
        species_key: key.clone(),
        scientific_name: select_scientific_name(key, records.iter().map(|(_, r)| *r)),
        family,
        common_names: merge_common_names(records.iter().map(|(_, r)| *r)),
        conservation_status: selection.status,
        status_granularity: selection.granularity,
        status_source_provider: selection.provider,
        status_confidence: selection.confidence,
        observations: merge_observations(group),
        source_profiles,
        details: merge_details(records.iter().map(|(_, r)| *r)),
        contributing_records,
    })
}

/// Union of (date, location, provider) triples, newest first, capped
pub fn merge_observations(records: &[SourceRecord]) -> Vec<ProfileObservation> {
    let unique: BTreeSet<ProfileObservation> = records
        .iter()
        .flat_map(|r| {
            r.last_observed().iter().map(move |o| ProfileObservation {
                date: o.date,
                location: o.location.clone(),
                source_provider: r.provider_id(),
            })
        })
        .collect();

    let mut observations: Vec<ProfileObservation> = unique.into_iter().collect();
    observations.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.source_provider.cmp(&b.source_provider))
            .then_with(|| a.location.cmp(&b.location))
    });
    observations.truncate(MAX_OBSERVATIONS);
    observations
}

/// Pool per-record details. Lists are unioned, counts take the largest report,
/// endemism is true if any provider says so, the trend comes from the most
/// recent retrieval that has one.
pub fn merge_details<'a>(records: impl Iterator<Item = &'a SourceRecord>) -> SpeciesDetails {
    let mut merged = SpeciesDetails::default();
    let mut trend: Option<(chrono::DateTime<chrono::Utc>, &str)> = None;

    for record in records {
        let details = record.details();

        merged.threats.extend(details.threats.iter().cloned());
        merged.habitats.extend(details.habitats.iter().cloned());
        merged.conservation_measures.extend(details.conservation_measures.iter().cloned());

        if let Some(reported) = details.population_trend.as_deref() {
            if trend.map_or(true, |(at, _)| record.retrieved_at() >= at) {
                trend = Some((record.retrieved_at(), reported));
            }
        }

        merged.endemic_to_europe = merge_flag(merged.endemic_to_europe, details.endemic_to_europe);
        merged.endemic_to_eu27 = merge_flag(merged.endemic_to_eu27, details.endemic_to_eu27);
        merged.occurrence_count = merged.occurrence_count.max(details.occurrence_count);
        merged.observation_count = merged.observation_count.max(details.observation_count);
        merged.extinct |= details.extinct;
    }

    for list in [&mut merged.threats, &mut merged.habitats, &mut merged.conservation_measures] {
        list.sort();
        list.dedup();
    }
    merged.population_trend = trend.map(|(_, reported)| reported.to_string());
    merged
}

fn merge_flag(current: Option<bool>, reported: Option<bool>) -> Option<bool> {
    match (current, reported) {
        (Some(a), Some(b)) => Some(a || b),
        (a, b) => a.or(b),
    }
}

/// Most frequent family (case-insensitive); ties go to the alphabetically first
fn select_family<'a>(records: impl Iterator<Item = &'a SourceRecord>) -> Option<String> {
    // lowercase → (count, first spelling seen)
    let mut counts: BTreeMap<String, (usize, String)> = BTreeMap::new();
    for family in records.filter_map(SourceRecord::family_name) {
        let entry = counts
            .entry(family.to_lowercase())
            .or_insert_with(|| (0, family.to_string()));
        entry.0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(ka, (ca, _)), (kb, (cb, _))| ca.cmp(cb).then_with(|| kb.cmp(ka)))
        .map(|(_, (_, spelling))| spelling)
}

/// Case-insensitive union; the first spelling seen wins
fn merge_common_names<'a>(records: impl Iterator<Item = &'a SourceRecord>) -> BTreeSet<String> {
    let mut by_lower: BTreeMap<String, String> = BTreeMap::new();
    for name in records.filter_map(SourceRecord::common_name) {
        by_lower
            .entry(name.to_lowercase())
            .or_insert_with(|| name.to_string());
    }
    by_lower.into_values().collect()
}

/// Most frequent spelling among records keyed exactly on the group key,
/// falling back to the key itself when every record came in via a synonym
fn select_scientific_name<'a>(
    key: &SpeciesKey,
    records: impl Iterator<Item = &'a SourceRecord>,
) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        if &SpeciesKey::from_scientific_name(record.scientific_name()) == key {
            *counts.entry(record.scientific_name()).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(na, ca), (nb, cb)| ca.cmp(cb).then_with(|| nb.cmp(na)))
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| key.display_name())
}

// ============================================================================
// TESTS
// ============================================================================
