// 🏗️ Record Normalizer - one normalizer per provider
// Maps each provider's raw JSON shape onto SourceRecord. Pure: no I/O, no clock.

use crate::error::SchemaError;
use crate::provider::{ConservationStatus, ProviderId, StatusGranularity};
use crate::record::{Observation, RawRecord, SourceRecord, SpeciesDetails};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

// ============================================================================
// COMPOSABLE TRAITS
// ============================================================================

/// ProviderNormalizer - core trait (required)
///
/// Adding a provider = adding a variant to ProviderId plus one impl here.
pub trait ProviderNormalizer: Send + Sync {
    /// Map one raw payload object onto the shared schema
    fn normalize(
        &self,
        payload: &Map<String, Value>,
        retrieved_at: DateTime<Utc>,
    ) -> Result<SourceRecord, SchemaError>;

    /// Provider this normalizer handles
    fn provider(&self) -> ProviderId;

    /// Normalizer version (for provenance tracking)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// StatusMapper - provider status vocabulary → shared enum + scope
///
/// Returns the mapped status, its granularity and the raw provider string.
pub trait StatusMapper {
    fn map_status(
        &self,
        payload: &Map<String, Value>,
    ) -> (ConservationStatus, StatusGranularity, Option<String>);
}

/// ObservationExtractor - optional capability for providers that report sightings
pub trait ObservationExtractor {
    fn extract_observations(&self, payload: &Map<String, Value>) -> Vec<Observation>;
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Get the normalizer for a provider (factory, dispatched by ProviderId)
pub fn get_normalizer(provider: ProviderId) -> Box<dyn ProviderNormalizer> {
    match provider {
        ProviderId::Gbif => Box::new(GbifNormalizer::new()),
        ProviderId::Iucn => Box::new(IucnNormalizer::new()),
        ProviderId::INaturalist => Box::new(INaturalistNormalizer::new()),
        ProviderId::NatureServe => Box::new(NatureServeNormalizer::new()),
    }
}

/// Normalize one tagged raw record.
///
/// Fetch time comes from the envelope, then the payload's `retrieved_at`,
/// then `collection_date`; without any, the Unix epoch is used so the record
/// loses every recency tie-break.
pub fn normalize(raw: &RawRecord) -> Result<SourceRecord, SchemaError> {
    let payload = raw
        .payload
        .as_object()
        .ok_or(SchemaError::NotAnObject { provider: raw.provider })?;

    let retrieved_at = raw
        .retrieved_at
        .or_else(|| timestamp_field(payload, &["retrieved_at", "collection_date"]))
        .unwrap_or_default();

    get_normalizer(raw.provider).normalize(payload, retrieved_at)
}

/// A record excluded from a run, kept for the run report
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    /// Position in the input batch
    pub index: usize,
    pub provider: ProviderId,
    pub error: SchemaError,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    /// Accepted records, in input order
    pub records: Vec<SourceRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Normalize a whole batch in parallel. Failures are logged and collected,
/// never fatal.
pub fn normalize_batch(raws: &[RawRecord]) -> NormalizedBatch {
    let results: Vec<(usize, ProviderId, Result<SourceRecord, SchemaError>)> = raws
        .par_iter()
        .enumerate()
        .map(|(index, raw)| (index, raw.provider, normalize(raw)))
        .collect();

    let mut batch = NormalizedBatch::default();
    for (index, provider, result) in results {
        match result {
            Ok(record) => batch.records.push(record),
            Err(error) => {
                warn!(index, %provider, %error, "rejected raw record");
                batch.rejected.push(RejectedRecord {
                    index,
                    provider,
                    error,
                });
            }
        }
    }

    debug!(
        accepted = batch.records.len(),
        rejected = batch.rejected.len(),
        "normalized batch"
    );
    batch
}

// ============================================================================
// GBIF
// ============================================================================

/// GBIF occurrence-search species summaries
pub struct GbifNormalizer;

impl GbifNormalizer {
    pub fn new() -> Self {
        GbifNormalizer
    }
}

impl ProviderNormalizer for GbifNormalizer {
    fn normalize(
        &self,
        payload: &Map<String, Value>,
        retrieved_at: DateTime<Utc>,
    ) -> Result<SourceRecord, SchemaError> {
        let name = scientific_name(payload, self.provider(), &["scientific_name", "scientificName"])?;
        let (status, granularity, raw_status) = self.map_status(payload);

        let url = id_field(payload, &["species_key", "speciesKey", "taxonKey"])
            .and_then(|id| self.provider().profile_url(&id));

        Ok(SourceRecord::new(self.provider(), &name, retrieved_at)?
            .with_common_name(str_field(payload, &["vernacular_name", "vernacularName"]))
            .with_family(str_field(payload, &["family"]))
            .with_status(status, granularity)
            .with_raw_status(raw_status)
            .with_profile_url(url)
            .with_details(SpeciesDetails {
                occurrence_count: count_field(payload, &["total_occurrences", "occurrence_count"]),
                ..SpeciesDetails::default()
            })
            .with_observations(self.extract_observations(payload)))
    }

    fn provider(&self) -> ProviderId {
        ProviderId::Gbif
    }
}

impl StatusMapper for GbifNormalizer {
    fn map_status(
        &self,
        payload: &Map<String, Value>,
    ) -> (ConservationStatus, StatusGranularity, Option<String>) {
        // GBIF republishes the global IUCN category
        let raw = str_field(payload, &["iucn_category", "iucnRedListCategory"]);
        let status = raw
            .as_deref()
            .map_or(ConservationStatus::Unknown, ConservationStatus::from_vocabulary);
        (status, StatusGranularity::Global, raw)
    }
}

impl ObservationExtractor for GbifNormalizer {
    fn extract_observations(&self, payload: &Map<String, Value>) -> Vec<Observation> {
        array_field(payload, &["recent_occurrences", "occurrences"])
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|occ| {
                let date = observation_date(occ, &["date", "eventDate"], &["year"])?;
                let location = compose_location(
                    occ,
                    &[
                        &["locality"][..],
                        &["state_province", "stateProvince"][..],
                        &["country"][..],
                    ],
                    &["latitude", "decimalLatitude"],
                    &["longitude", "decimalLongitude"],
                );
                Some(Observation::new(date, location))
            })
            .collect()
    }
}

// ============================================================================
// IUCN
// ============================================================================

/// IUCN Red List species assessments (global, or regional Red Lists via `scope`)
pub struct IucnNormalizer;

impl IucnNormalizer {
    pub fn new() -> Self {
        IucnNormalizer
    }
}

impl ProviderNormalizer for IucnNormalizer {
    fn normalize(
        &self,
        payload: &Map<String, Value>,
        retrieved_at: DateTime<Utc>,
    ) -> Result<SourceRecord, SchemaError> {
        let name = scientific_name(payload, self.provider(), &["scientific_name", "scientificName"])?;
        let (status, granularity, raw_status) = self.map_status(payload);

        let url = str_field(payload, &["url"]).or_else(|| {
            id_field(payload, &["taxonid", "taxon_id", "sis_id"])
                .and_then(|id| self.provider().profile_url(&id))
        });

        let assessment = payload.get("assessment").and_then(Value::as_object);
        let details = SpeciesDetails {
            threats: text_list(payload, "threats", &["title", "name", "description"]),
            habitats: text_list(payload, "habitats", &["habitat", "title", "name"]),
            conservation_measures: text_list(payload, "conservation_measures", &["title", "name"]),
            population_trend: str_field(payload, &["population_trend"])
                .or_else(|| assessment.and_then(|a| str_field(a, &["population_trend"]))),
            endemic_to_europe: bool_field(payload, &["endemic_to_europe"]),
            endemic_to_eu27: bool_field(payload, &["endemic_to_eu27"]),
            ..SpeciesDetails::default()
        };

        Ok(SourceRecord::new(self.provider(), &name, retrieved_at)?
            .with_common_name(str_field(payload, &["main_common_name", "common_name"]))
            .with_family(str_field(payload, &["family", "family_name"]))
            .with_status(status, granularity)
            .with_raw_status(raw_status)
            .with_profile_url(url)
            .with_details(details))
    }

    fn provider(&self) -> ProviderId {
        ProviderId::Iucn
    }
}

impl StatusMapper for IucnNormalizer {
    fn map_status(
        &self,
        payload: &Map<String, Value>,
    ) -> (ConservationStatus, StatusGranularity, Option<String>) {
        let assessment = payload.get("assessment").and_then(Value::as_object);

        let (status, raw) = status_field(
            payload,
            &["iucn_category", "iucn_status", "category", "red_list_category"],
        );
        let (status, raw) = match raw {
            Some(raw) => (status, Some(raw)),
            None => match assessment {
                Some(assessment) => status_field(assessment, &["category", "red_list_category"]),
                None => (status, None),
            },
        };
        if raw.is_some() {
            return (status, scope_granularity(payload), raw);
        }

        // European Red List rows: the Europe assessment first, then EU 27
        let (status, raw) = status_field(payload, &["iucn_europe_status", "iucn_eu_27_status"]);
        if raw.is_some() {
            return (status, StatusGranularity::Regional, raw);
        }

        (ConservationStatus::Unknown, scope_granularity(payload), None)
    }
}

/// IUCN `scope` (or a dump's `geographic_scope`): absent/Global → Global,
/// national → National, anything else ("Europe", "EU 27") → Regional
fn scope_granularity(payload: &Map<String, Value>) -> StatusGranularity {
    match str_field(payload, &["scope", "geographic_scope"]) {
        None => StatusGranularity::Global,
        Some(scope) => {
            let scope = scope.to_lowercase();
            if scope == "global" {
                StatusGranularity::Global
            } else if scope.starts_with("national") {
                StatusGranularity::National
            } else {
                StatusGranularity::Regional
            }
        }
    }
}

// ============================================================================
// INATURALIST
// ============================================================================

/// iNaturalist taxa with research-grade observations
pub struct INaturalistNormalizer;

impl INaturalistNormalizer {
    pub fn new() -> Self {
        INaturalistNormalizer
    }
}

impl ProviderNormalizer for INaturalistNormalizer {
    fn normalize(
        &self,
        payload: &Map<String, Value>,
        retrieved_at: DateTime<Utc>,
    ) -> Result<SourceRecord, SchemaError> {
        let name = scientific_name(payload, self.provider(), &["scientific_name", "name"])?;
        let (status, granularity, raw_status) = self.map_status(payload);

        let url = id_field(payload, &["inat_taxon_id", "taxon_id"])
            .and_then(|id| self.provider().profile_url(&id))
            .or_else(|| str_field(payload, &["url", "uri"]));

        Ok(SourceRecord::new(self.provider(), &name, retrieved_at)?
            .with_common_name(str_field(payload, &["common_name", "preferred_common_name"]))
            .with_family(str_field(payload, &["family"]))
            .with_status(status, granularity)
            .with_raw_status(raw_status)
            .with_profile_url(url)
            .with_details(SpeciesDetails {
                observation_count: count_field(payload, &["observations_count"]),
                extinct: bool_field(payload, &["extinct"]).unwrap_or(false),
                ..SpeciesDetails::default()
            })
            .with_observations(self.extract_observations(payload)))
    }

    fn provider(&self) -> ProviderId {
        ProviderId::INaturalist
    }
}

impl StatusMapper for INaturalistNormalizer {
    fn map_status(
        &self,
        payload: &Map<String, Value>,
    ) -> (ConservationStatus, StatusGranularity, Option<String>) {
        let nested = payload.get("conservation_status").and_then(Value::as_object);

        let raw = str_field(payload, &["iucn_status", "inat_status"])
            .or_else(|| nested.and_then(|cs| str_field(cs, &["status", "status_name"])));

        let status = raw
            .as_deref()
            .map_or(ConservationStatus::Unknown, ConservationStatus::from_vocabulary);

        // A status attached to a place is a regional listing
        let has_place = str_field(payload, &["status_place"]).is_some()
            || nested
                .and_then(|cs| cs.get("place"))
                .map_or(false, |place| !place.is_null());

        let granularity = if has_place {
            StatusGranularity::Regional
        } else {
            StatusGranularity::Global
        };

        (status, granularity, raw)
    }
}

impl ObservationExtractor for INaturalistNormalizer {
    fn extract_observations(&self, payload: &Map<String, Value>) -> Vec<Observation> {
        object_list(
            payload,
            &["observations", "most_recent_observation", "recent_observations"],
        )
        .into_iter()
        .filter_map(|obs| {
            let date = observation_date(obs, &["date", "observed_on"], &[])?;
            let location = compose_location(
                obs,
                &[&["place_guess", "location"][..]],
                &["latitude"],
                &["longitude"],
            );
            Some(Observation::new(date, location))
        })
        .collect()
    }
}

// ============================================================================
// NATURESERVE
// ============================================================================

/// NatureServe Explorer taxa with G/N/S conservation ranks
pub struct NatureServeNormalizer;

impl NatureServeNormalizer {
    pub fn new() -> Self {
        NatureServeNormalizer
    }
}

impl ProviderNormalizer for NatureServeNormalizer {
    fn normalize(
        &self,
        payload: &Map<String, Value>,
        retrieved_at: DateTime<Utc>,
    ) -> Result<SourceRecord, SchemaError> {
        let name = scientific_name(payload, self.provider(), &["scientific_name", "scientificName"])?;
        let (status, granularity, raw_status) = self.map_status(payload);

        let url = str_field(payload, &["ns_url"]).or_else(|| {
            str_field(payload, &["nsxUrl"])
                .map(|path| format!("https://explorer.natureserve.org{}", path))
        });

        Ok(SourceRecord::new(self.provider(), &name, retrieved_at)?
            .with_common_name(str_field(payload, &["common_name", "primaryCommonName"]))
            .with_family(str_field(payload, &["family"]))
            .with_status(status, granularity)
            .with_raw_status(raw_status)
            .with_profile_url(url))
    }

    fn provider(&self) -> ProviderId {
        ProviderId::NatureServe
    }
}

impl StatusMapper for NatureServeNormalizer {
    fn map_status(
        &self,
        payload: &Map<String, Value>,
    ) -> (ConservationStatus, StatusGranularity, Option<String>) {
        let global = str_field(payload, &["global_rank", "roundedGRank", "grank", "global_rank_full"]);

        if let Some(rank) = &global {
            let status = parse_natureserve_rank(rank, 'G');
            if status.is_known() {
                return (status, StatusGranularity::Global, Some(rank.clone()));
            }
        }

        // No usable global rank: fall back to the most severe national, then subnational
        let scoped = [
            (&["national_ranks", "elementNationals"][..], 'N', StatusGranularity::National),
            (&["subnational_ranks", "elementSubnationals"][..], 'S', StatusGranularity::Regional),
        ];
        for (fields, prefix, granularity) in scoped {
            let best = array_field(payload, fields)
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|entry| str_field(entry, &["rank", "roundedNRank", "roundedSRank", "nrank", "srank"]))
                .map(|rank| (parse_natureserve_rank(&rank, prefix), rank))
                .filter(|(status, _)| status.is_known())
                .max_by(|(a, ra), (b, rb)| a.severity().cmp(&b.severity()).then_with(|| rb.cmp(ra)));

            if let Some((status, rank)) = best {
                return (status, granularity, Some(rank));
            }
        }

        // Pre-mapped IUCN-style code from the fetcher dump
        if let Some(raw) = str_field(payload, &["conservation_status"]) {
            let status = ConservationStatus::from_vocabulary(&raw);
            if status.is_known() {
                return (status, StatusGranularity::Global, Some(raw));
            }
        }

        (ConservationStatus::Unknown, StatusGranularity::Global, global)
    }
}

/// Map a NatureServe rank (`G2`, `G2G3`, `G3T1`, `N1?`, `SX`) onto the shared enum.
///
/// Range ranks use the first (more severe) value. GNR/GNA/mismatched prefixes → Unknown.
pub fn parse_natureserve_rank(rank: &str, prefix: char) -> ConservationStatus {
    let rank = rank.trim().to_uppercase();
    let mut chars = rank.chars();

    if chars.next() != Some(prefix) {
        return ConservationStatus::Unknown;
    }

    match chars.next() {
        Some('X') => ConservationStatus::Extinct,
        Some('H') => ConservationStatus::ExtinctInWild,
        Some('1') => ConservationStatus::CriticallyEndangered,
        Some('2') => ConservationStatus::Endangered,
        Some('3') => ConservationStatus::Vulnerable,
        Some('4') => ConservationStatus::NearThreatened,
        Some('5') => ConservationStatus::LeastConcern,
        Some('U') => ConservationStatus::DataDeficient,
        _ => ConservationStatus::Unknown,
    }
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

/// Required scientific name: absent/null → MissingField, wrong type → InvalidField
fn scientific_name(
    payload: &Map<String, Value>,
    provider: ProviderId,
    keys: &[&str],
) -> Result<String, SchemaError> {
    for key in keys {
        match payload.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(name)) => return Ok(name.clone()),
            Some(other) => {
                return Err(SchemaError::InvalidField {
                    provider,
                    field: key.to_string(),
                    reason: format!("expected a string, got {}", other),
                })
            }
        }
    }

    Err(SchemaError::MissingField {
        provider,
        field: keys.first().copied().unwrap_or("scientific_name").to_string(),
    })
}

/// First non-blank string under any of the keys
fn str_field(payload: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .filter_map(Value::as_str)
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifier that may arrive as a number or a string
fn id_field(payload: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|key| payload.get(*key)).find_map(|value| match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn array_field<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find_map(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Objects under the first key holding an array of objects or a single object
fn object_list<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> Vec<&'a Map<String, Value>> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find_map(|value| match value {
            Value::Array(items) => Some(items.iter().filter_map(Value::as_object).collect()),
            Value::Object(object) => Some(vec![object]),
            _ => None,
        })
        .unwrap_or_default()
}

/// First mapped status under any of the keys, else Unknown with the first raw string
fn status_field(payload: &Map<String, Value>, keys: &[&str]) -> (ConservationStatus, Option<String>) {
    let mut first_raw = None;
    for key in keys {
        if let Some(raw) = str_field(payload, &[*key]) {
            let status = ConservationStatus::from_vocabulary(&raw);
            if status.is_known() {
                return (status, Some(raw));
            }
            first_raw.get_or_insert(raw);
        }
    }
    (ConservationStatus::Unknown, first_raw)
}

fn bool_field(payload: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().filter_map(|key| payload.get(*key)).find_map(|value| match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "true" => Some(true),
            "no" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Non-negative count that may arrive as a number or a numeric string
fn count_field(payload: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().filter_map(|key| payload.get(*key)).find_map(|value| match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Strings from an array of strings or of objects (text under the first present key)
fn text_list(payload: &Map<String, Value>, key: &str, object_keys: &[&str]) -> Vec<String> {
    array_field(payload, &[key])
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(object) => str_field(object, object_keys),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn timestamp_field(payload: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    str_field(payload, keys).and_then(|s| parse_timestamp(&s))
}

/// RFC 3339, or a naive ISO date-time/date (treated as UTC)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Accepts `YYYY-MM-DD`, ISO date-times and intervals (first date wins),
/// `YYYY-MM` (day 1) and bare years (Jan 1).
pub fn parse_observation_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Some(day) = s.get(..10).and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()) {
        return Some(day);
    }

    if let Some(month) = s
        .get(..7)
        .and_then(|head| NaiveDate::parse_from_str(&format!("{}-01", head), "%Y-%m-%d").ok())
    {
        return Some(month);
    }

    s.get(..4)
        .filter(|head| head.chars().all(|c| c.is_ascii_digit()))
        .and_then(|head| head.parse::<i32>().ok())
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
}

fn observation_date(
    obs: &Map<String, Value>,
    date_keys: &[&str],
    year_keys: &[&str],
) -> Option<NaiveDate> {
    str_field(obs, date_keys)
        .and_then(|s| parse_observation_date(&s))
        .or_else(|| {
            id_field(obs, year_keys).and_then(|year| parse_observation_date(&year))
        })
}

/// Place text joined with ", ", else "lat, lon", else "unknown location"
fn compose_location(
    obs: &Map<String, Value>,
    place_keys: &[&[&str]],
    lat_keys: &[&str],
    lon_keys: &[&str],
) -> String {
    let parts: Vec<String> = place_keys
        .iter()
        .filter_map(|keys| str_field(obs, keys))
        .collect();

    if !parts.is_empty() {
        return parts.join(", ");
    }

    match (id_field(obs, lat_keys), id_field(obs, lon_keys)) {
        (Some(lat), Some(lon)) => format!("{}, {}", lat, lon),
        _ => "unknown location".to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fetched() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn raw(provider: ProviderId, payload: Value) -> RawRecord {
        RawRecord::new(provider, payload).retrieved_at(fetched())
    }

    // ========================================================================
    // Dispatch & schema errors
    // ========================================================================

    #[test]
    fn test_get_normalizer_dispatches_by_provider() {
        for provider in ProviderId::ALL {
            let normalizer = get_normalizer(provider);
            assert_eq!(normalizer.provider(), provider);
            assert!(!normalizer.version().is_empty());
        }
    }

    #[test]
    fn test_missing_scientific_name_is_schema_error() {
        let err = normalize(&raw(ProviderId::Gbif, json!({"family": "Apidae"}))).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { provider: ProviderId::Gbif, .. }));
    }

    #[test]
    fn test_non_string_scientific_name_is_schema_error() {
        let err = normalize(&raw(ProviderId::Iucn, json!({"scientific_name": 42}))).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { .. }));
    }

    #[test]
    fn test_non_object_payload_is_schema_error() {
        let err = normalize(&raw(ProviderId::NatureServe, json!(["Bombus affinis"]))).unwrap_err();
        assert_eq!(err, SchemaError::NotAnObject { provider: ProviderId::NatureServe });
    }

    #[test]
    fn test_unmapped_status_still_produces_record() {
        let record = normalize(&raw(
            ProviderId::INaturalist,
            json!({"scientific_name": "Bombus affinis", "inat_status": "special concern"}),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::Unknown);
        assert_eq!(record.raw_status(), Some("special concern"));
    }

    #[test]
    fn test_retrieved_at_falls_back_to_payload_then_epoch() {
        let payload = json!({"scientific_name": "Bombus affinis", "collection_date": "2023-11-02T09:15:00.123456"});
        let record = normalize(&RawRecord::new(ProviderId::Iucn, payload)).unwrap();
        assert_eq!(record.retrieved_at(), Utc.with_ymd_and_hms(2023, 11, 2, 9, 15, 0).unwrap() + chrono::Duration::microseconds(123456));

        let bare = normalize(&RawRecord::new(ProviderId::Iucn, json!({"scientific_name": "Bombus affinis"}))).unwrap();
        assert_eq!(bare.retrieved_at(), DateTime::<Utc>::default());
    }

    // ========================================================================
    // GBIF
    // ========================================================================

    #[test]
    fn test_gbif_record() {
        let record = normalize(&raw(
            ProviderId::Gbif,
            json!({
                "scientific_name": "Bombus affinis Cresson, 1863",
                "species_key": 1340503,
                "iucn_category": "CR",
                "family": "Apidae",
                "total_occurrences": 31,
                "recent_occurrences": [
                    {"date": "2019-07-14T10:00:00", "locality": "Madison", "state_province": "Wisconsin", "country": "United States of America"},
                    {"eventDate": "2021-08", "latitude": 44.9, "longitude": -93.2},
                    {"year": 2015, "country": "Canada"},
                    {"locality": "no date"}
                ]
            }),
        ))
        .unwrap();

        assert_eq!(record.provider_id(), ProviderId::Gbif);
        assert_eq!(record.scientific_name(), "Bombus affinis Cresson, 1863");
        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Global);
        assert_eq!(record.family_name(), Some("Apidae"));
        assert_eq!(record.profile_url(), Some("https://www.gbif.org/species/1340503"));

        let observed = record.last_observed();
        assert_eq!(observed.len(), 3);
        assert_eq!(observed[0].date, NaiveDate::from_ymd_opt(2021, 8, 1).unwrap());
        assert_eq!(observed[0].location, "44.9, -93.2");
        assert_eq!(observed[1].location, "Madison, Wisconsin, United States of America");
        assert_eq!(observed[2].date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
        assert_eq!(record.details().occurrence_count, Some(31));
    }

    #[test]
    fn test_gbif_enum_category_name() {
        let record = normalize(&raw(
            ProviderId::Gbif,
            json!({"scientificName": "Bombus franklini", "iucnRedListCategory": "CRITICALLY_ENDANGERED"}),
        ))
        .unwrap();
        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
    }

    // ========================================================================
    // IUCN
    // ========================================================================

    #[test]
    fn test_iucn_global_record() {
        let record = normalize(&raw(
            ProviderId::Iucn,
            json!({
                "scientific_name": "Bombus affinis",
                "main_common_name": "Rusty-patched Bumble Bee",
                "family": "Apidae",
                "iucn_category": "CR",
                "taxonid": 44937399
            }),
        ))
        .unwrap();

        assert_eq!(record.common_name(), Some("Rusty-patched Bumble Bee"));
        assert_eq!(record.status_granularity(), StatusGranularity::Global);
        assert_eq!(record.profile_url(), Some("https://www.iucnredlist.org/species/44937399"));
    }

    #[test]
    fn test_iucn_regional_scope_and_nested_assessment() {
        let record = normalize(&raw(
            ProviderId::Iucn,
            json!({
                "scientific_name": "Bombus cullumanus",
                "scope": "Europe",
                "assessment": {"category": "CR"}
            }),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Regional);
    }

    #[test]
    fn test_iucn_status_field_from_combined_dump() {
        let record = normalize(&raw(
            ProviderId::Iucn,
            json!({
                "scientific_name": "Bombus franklini",
                "common_name": "Franklin's Bumble Bee",
                "iucn_status": "CR",
                "taxonid": 135295,
                "population_trend": "decreasing"
            }),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Global);
        assert_eq!(record.raw_status(), Some("CR"));
        assert_eq!(record.details().population_trend.as_deref(), Some("decreasing"));
    }

    #[test]
    fn test_european_red_list_row_is_regional() {
        let record = normalize(&raw(
            ProviderId::Iucn,
            json!({
                "scientific_name": "Bombus cullumanus",
                "family": "Apidae",
                "iucn_europe_status": "CR",
                "iucn_eu_27_status": "CR",
                "endemic_to_europe": false,
                "endemic_to_eu27": false,
                "scope": "Europe"
            }),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Regional);
        assert_eq!(record.raw_status(), Some("CR"));
        assert_eq!(record.details().endemic_to_europe, Some(false));
        assert_eq!(record.details().endemic_to_eu27, Some(false));

        // Unusable Europe assessment: the EU 27 one is used, still Regional without any scope
        let eu27 = normalize(&raw(
            ProviderId::Iucn,
            json!({
                "scientific_name": "Andrena tridentata",
                "iucn_europe_status": "nan",
                "iucn_eu_27_status": "EN",
                "endemic_to_europe": true
            }),
        ))
        .unwrap();

        assert_eq!(eu27.conservation_status(), ConservationStatus::Endangered);
        assert_eq!(eu27.status_granularity(), StatusGranularity::Regional);
        assert_eq!(eu27.details().endemic_to_europe, Some(true));
    }

    #[test]
    fn test_iucn_threats_habitats_and_measures() {
        let record = normalize(&raw(
            ProviderId::Iucn,
            json!({
                "scientific_name": "Bombus affinis",
                "iucn_category": "CR",
                "threats": [
                    {"code": "9.3.3", "title": "Herbicides and pesticides"},
                    {"code": "2.1", "title": "Annual & perennial non-timber crops"}
                ],
                "habitats": [{"code": "4.4", "habitat": "Grassland - Temperate"}],
                "conservation_measures": ["Habitat restoration", ""],
                "assessment": {"population_trend": "decreasing"}
            }),
        ))
        .unwrap();

        let details = record.details();
        assert_eq!(
            details.threats,
            vec!["Annual & perennial non-timber crops", "Herbicides and pesticides"]
        );
        assert_eq!(details.habitats, vec!["Grassland - Temperate"]);
        assert_eq!(details.conservation_measures, vec!["Habitat restoration"]);
        assert_eq!(details.population_trend.as_deref(), Some("decreasing"));
    }

    // ========================================================================
    // iNaturalist
    // ========================================================================

    #[test]
    fn test_inaturalist_counts_extinct_flag_and_single_observation() {
        let record = normalize(&raw(
            ProviderId::INaturalist,
            json!({
                "scientific_name": "Bombus franklini",
                "iucn_status": "CR",
                "inat_status": "critically imperiled",
                "observations_count": 43,
                "extinct": true,
                "most_recent_observation": {
                    "date": "2006-08-09",
                    "location": "Mt. Ashland, OR, USA",
                    "latitude": "42.08",
                    "longitude": "-122.71"
                }
            }),
        ))
        .unwrap();

        assert_eq!(record.details().observation_count, Some(43));
        assert!(record.details().extinct);
        assert_eq!(record.last_observed().len(), 1);
        assert_eq!(record.last_observed()[0].location, "Mt. Ashland, OR, USA");
    }

    #[test]
    fn test_inaturalist_record_with_observations() {
        let record = normalize(&raw(
            ProviderId::INaturalist,
            json!({
                "scientific_name": "Bombus terricola",
                "common_name": "Yellow-banded Bumble Bee",
                "family": "Apidae",
                "iucn_status": "VU",
                "inat_status": "vulnerable",
                "inat_taxon_id": 121519,
                "most_recent_observation": [
                    {"date": "2024-06-02", "location": "Algonquin Park, ON, Canada", "latitude": "45.5", "longitude": "-78.3"}
                ]
            }),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::Vulnerable);
        assert_eq!(record.raw_status(), Some("VU"));
        assert_eq!(record.profile_url(), Some("https://www.inaturalist.org/taxa/121519"));
        assert_eq!(record.last_observed()[0].location, "Algonquin Park, ON, Canada");
    }

    #[test]
    fn test_inaturalist_place_status_is_regional() {
        let record = normalize(&raw(
            ProviderId::INaturalist,
            json!({
                "name": "Bombus occidentalis",
                "conservation_status": {"status": "critically imperiled", "place": {"id": 14, "name": "California"}}
            }),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Regional);
    }

    // ========================================================================
    // NatureServe
    // ========================================================================

    #[test]
    fn test_parse_natureserve_rank() {
        assert_eq!(parse_natureserve_rank("GX", 'G'), ConservationStatus::Extinct);
        assert_eq!(parse_natureserve_rank("GH", 'G'), ConservationStatus::ExtinctInWild);
        assert_eq!(parse_natureserve_rank("G1", 'G'), ConservationStatus::CriticallyEndangered);
        assert_eq!(parse_natureserve_rank("G2G3", 'G'), ConservationStatus::Endangered);
        assert_eq!(parse_natureserve_rank("G3T1", 'G'), ConservationStatus::Vulnerable);
        assert_eq!(parse_natureserve_rank("g4?", 'G'), ConservationStatus::NearThreatened);
        assert_eq!(parse_natureserve_rank("G5", 'G'), ConservationStatus::LeastConcern);
        assert_eq!(parse_natureserve_rank("GU", 'G'), ConservationStatus::DataDeficient);
        assert_eq!(parse_natureserve_rank("GNR", 'G'), ConservationStatus::Unknown);
        assert_eq!(parse_natureserve_rank("N2", 'G'), ConservationStatus::Unknown);
    }

    #[test]
    fn test_natureserve_global_rank() {
        let record = normalize(&raw(
            ProviderId::NatureServe,
            json!({
                "scientific_name": "Bombus affinis",
                "common_name": "Rusty-patched Bumble Bee",
                "global_rank": "G1",
                "global_rank_full": "G1",
                "conservation_status": "CR",
                "ns_url": "https://explorer.natureserve.org/Taxon/ELEMENT_GLOBAL.2.745329/Bombus_affinis"
            }),
        ))
        .unwrap();

        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Global);
        assert_eq!(record.raw_status(), Some("G1"));
        assert!(record.profile_url().unwrap().starts_with("https://explorer.natureserve.org/"));
    }

    #[test]
    fn test_natureserve_falls_back_to_national_then_subnational() {
        let national = normalize(&raw(
            ProviderId::NatureServe,
            json!({
                "scientific_name": "Bombus pensylvanicus",
                "global_rank": "GNR",
                "national_ranks": [
                    {"nation": "Canada", "rank": "N3"},
                    {"nation": "United States", "rank": "N2"}
                ]
            }),
        ))
        .unwrap();
        assert_eq!(national.conservation_status(), ConservationStatus::Endangered);
        assert_eq!(national.status_granularity(), StatusGranularity::National);
        assert_eq!(national.raw_status(), Some("N2"));

        let regional = normalize(&raw(
            ProviderId::NatureServe,
            json!({
                "scientific_name": "Bombus pensylvanicus",
                "subnational_ranks": [{"subnation": "Maine", "rank": "SH"}]
            }),
        ))
        .unwrap();
        assert_eq!(regional.conservation_status(), ConservationStatus::ExtinctInWild);
        assert_eq!(regional.status_granularity(), StatusGranularity::Regional);
    }

    #[test]
    fn test_natureserve_without_any_rank_is_unknown() {
        let record = normalize(&raw(
            ProviderId::NatureServe,
            json!({"scientific_name": "Bombus vagans", "global_rank": "GNR"}),
        ))
        .unwrap();
        assert_eq!(record.conservation_status(), ConservationStatus::Unknown);
        assert_eq!(record.raw_status(), Some("GNR"));
    }

    // ========================================================================
    // Batch
    // ========================================================================

    #[test]
    fn test_normalize_batch_collects_rejections_in_order() {
        let raws = vec![
            raw(ProviderId::Gbif, json!({"scientific_name": "Bombus affinis"})),
            raw(ProviderId::Iucn, json!({"category": "EN"})),
            raw(ProviderId::NatureServe, json!({"scientific_name": "Bombus terricola"})),
            raw(ProviderId::INaturalist, json!("not an object")),
        ];

        let batch = normalize_batch(&raws);

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].scientific_name(), "Bombus affinis");
        assert_eq!(batch.records[1].scientific_name(), "Bombus terricola");
        assert_eq!(batch.rejected.len(), 2);
        assert_eq!(batch.rejected[0].index, 1);
        assert_eq!(batch.rejected[0].provider, ProviderId::Iucn);
        assert_eq!(batch.rejected[1].index, 3);
    }

    #[test]
    fn test_parse_observation_date_formats() {
        let d = |y, m, dd| NaiveDate::from_ymd_opt(y, m, dd);
        assert_eq!(parse_observation_date("2020-05-17"), d(2020, 5, 17));
        assert_eq!(parse_observation_date("2020-05-17T08:00:00Z"), d(2020, 5, 17));
        assert_eq!(parse_observation_date("2020-05-17/2020-05-30"), d(2020, 5, 17));
        assert_eq!(parse_observation_date("2020-05"), d(2020, 5, 1));
        assert_eq!(parse_observation_date("1998"), d(1998, 1, 1));
        assert_eq!(parse_observation_date("sometime"), None);
    }
}
