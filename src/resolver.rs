// 🔗 Entity Resolver - group records that describe the same species
// Exact key match first, then explicit synonym links. Nothing else ever merges.

use crate::provider::ProviderId;
use crate::record::SourceRecord;
use crate::species::{SpeciesKey, SynonymResolution, SynonymTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// REVIEW ENTRY
// ============================================================================

/// A name the resolver refused to merge (AmbiguousEntity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    /// Key the records were left under
    pub species_key: SpeciesKey,

    /// Distinct scientific names seen for this key
    pub scientific_names: Vec<String>,

    pub providers: BTreeSet<ProviderId>,

    pub record_count: usize,

    /// Accepted keys the synonym table points at
    pub candidates: Vec<SpeciesKey>,

    /// Human-readable reason
    pub reason: String,
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Ordered so reruns produce identical groupings
    pub groups: BTreeMap<SpeciesKey, Vec<SourceRecord>>,
    pub needs_review: Vec<ReviewEntry>,
    /// Records moved under another key by a synonym link
    pub synonym_merges: usize,
}

impl Resolution {
    pub fn record_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

// ============================================================================
// ENTITY RESOLVER
// ============================================================================

pub struct EntityResolver {
    synonyms: Arc<SynonymTable>,
}

impl EntityResolver {
    pub fn new(synonyms: Arc<SynonymTable>) -> Self {
        EntityResolver { synonyms }
    }

    /// Resolver with an empty synonym table (exact keys only)
    pub fn exact_only() -> Self {
        EntityResolver::new(Arc::new(SynonymTable::new()))
    }

    pub fn synonyms(&self) -> &SynonymTable {
        &self.synonyms
    }

    /// Group records by species.
    ///
    /// Ambiguous names stay under their own key and are reported, never
    /// folded into any candidate.
    pub fn resolve(&self, records: Vec<SourceRecord>) -> Resolution {
        // Pass 1: exact key
        let mut by_key: BTreeMap<SpeciesKey, Vec<SourceRecord>> = BTreeMap::new();
        for record in records {
            let key = SpeciesKey::from_scientific_name(record.scientific_name());
            by_key.entry(key).or_default().push(record);
        }

        debug!(keys = by_key.len(), "grouped records by exact key");

        // Pass 2: synonym links
        let mut resolution = Resolution::default();
        for (key, group) in by_key {
            let target = match self.synonyms.resolve(&key) {
                SynonymResolution::Accepted(accepted) => accepted,
                SynonymResolution::Synonym(accepted) => {
                    debug!(synonym = %key, accepted = %accepted, "resolved synonym");
                    resolution.synonym_merges += group.len();
                    accepted
                }
                SynonymResolution::Ambiguous(candidates) => {
                    let entry = review_entry(&key, &group, candidates);
                    warn!(species = %key, reason = %entry.reason, "ambiguous entity");
                    resolution.needs_review.push(entry);
                    key
                }
            };

            resolution.groups.entry(target).or_default().extend(group);
        }

        info!(
            groups = resolution.groups.len(),
            synonym_merges = resolution.synonym_merges,
            needs_review = resolution.needs_review.len(),
            "entity resolution complete"
        );
        resolution
    }
}

fn review_entry(key: &SpeciesKey, group: &[SourceRecord], candidates: Vec<SpeciesKey>) -> ReviewEntry {
    let scientific_names: BTreeSet<String> = group
        .iter()
        .map(|r| r.scientific_name().to_string())
        .collect();

    let reason = if candidates.contains(key) {
        "synonym chain loops back on itself".to_string()
    } else {
        format!("name maps to {} accepted species", candidates.len())
    };

    ReviewEntry {
        species_key: key.clone(),
        scientific_names: scientific_names.into_iter().collect(),
        providers: group.iter().map(SourceRecord::provider_id).collect(),
        record_count: group.len(),
        candidates,
        reason,
    }
}

// ============================================================================
// TESTS
// ============================================================================
