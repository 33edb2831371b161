// 📥 Input Loader - fetcher dumps and RawRecord envelopes → Vec<RawRecord>
//
// Accepted shapes:
//   [ {provider, retrieved_at?, payload}, ... ]        envelopes
//   { collection_date, data_source, species: [...] }   one provider dump
//   [ {collection_date, data_source, species}, ... ]   several dumps
//
// A dump without a recognizable source (the combined `endangered_bees.json`)
// is classified per species entry; a nested `inat_data` observation becomes its
// own iNaturalist record.

use crate::normalizer::parse_timestamp;
use crate::provider::ProviderId;
use crate::record::RawRecord;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Load raw records from a JSON file
pub fn load_raw_records<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {:?}", path))?;

    let file_name = path.file_name().and_then(|n| n.to_str());
    let records = parse_raw_records(&content, file_name)
        .with_context(|| format!("Failed to load raw records from {:?}", path))?;

    debug!(path = %path.display(), records = records.len(), "loaded raw records");
    Ok(records)
}

/// Parse raw records from JSON text. `file_name` is the provider hint for dumps
/// that carry no usable `data_source`.
pub fn parse_raw_records(content: &str, file_name: Option<&str>) -> Result<Vec<RawRecord>> {
    let value: Value = serde_json::from_str(content).context("Failed to parse input JSON")?;

    match value {
        Value::Array(items) => {
            let mut records = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                records.extend(
                    parse_item(item, file_name).with_context(|| format!("Invalid input item {}", i))?,
                );
            }
            Ok(records)
        }
        Value::Object(_) => parse_item(value, file_name),
        _ => bail!("Expected a JSON object or array of records"),
    }
}

fn parse_item(item: Value, file_name: Option<&str>) -> Result<Vec<RawRecord>> {
    let object = item
        .as_object()
        .ok_or_else(|| anyhow!("Expected a JSON object, got {}", item))?;

    if object.contains_key("species") {
        return parse_dump(object, file_name);
    }

    if object.contains_key("provider") && object.contains_key("payload") {
        let record: RawRecord =
            serde_json::from_value(item).context("Invalid RawRecord envelope")?;
        return Ok(vec![record]);
    }

    bail!("Unrecognized record: expected a provider dump or a {{provider, payload}} envelope")
}

fn parse_dump(dump: &Map<String, Value>, file_name: Option<&str>) -> Result<Vec<RawRecord>> {
    let data_source = dump.get("data_source").and_then(Value::as_str);

    let retrieved_at = dump
        .get("collection_date")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    let species = dump
        .get("species")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("`species` must be an array"))?;

    // Dump-wide scope ("Europe") travels with each entry
    let scope = dump.get("geographic_scope").filter(|v| v.is_string());

    let payloads = species.iter().map(|payload| match (payload, scope) {
        (Value::Object(entry), Some(scope)) if !entry.contains_key("scope") => {
            let mut entry = entry.clone();
            entry.insert("scope".to_string(), scope.clone());
            Value::Object(entry)
        }
        _ => payload.clone(),
    });

    if let Some(provider) = detect_provider(data_source, file_name) {
        return Ok(payloads
            .map(|payload| RawRecord {
                provider,
                retrieved_at,
                payload,
            })
            .collect());
    }

    if species.is_empty() {
        bail!(
            "Cannot detect provider (data_source: {:?}, file: {:?})",
            data_source,
            file_name
        );
    }

    let mut records = Vec::new();
    for (i, payload) in payloads.enumerate() {
        let entry = match payload {
            Value::Object(entry) => entry,
            other => bail!("Species entry {} is not an object: {}", i, other),
        };
        records.extend(split_combined_entry(entry, retrieved_at).ok_or_else(|| {
            anyhow!(
                "Cannot detect provider of species entry {} (data_source: {:?}, file: {:?})",
                i,
                data_source,
                file_name
            )
        })?);
    }

    debug!(records = records.len(), "split combined dump");
    Ok(records)
}

/// One entry of a combined dump → its provider's record, plus an iNaturalist
/// record for a nested `inat_data` observation
fn split_combined_entry(
    mut entry: Map<String, Value>,
    retrieved_at: Option<DateTime<Utc>>,
) -> Option<Vec<RawRecord>> {
    let provider = classify_entry(&entry)?;

    let observed = entry.remove("inat_data").filter(|v| v.is_object()).map(|observation| {
        let mut inat: Map<String, Value> = ["scientific_name", "common_name", "family"]
            .into_iter()
            .filter_map(|key| entry.get(key).map(|value| (key.to_string(), value.clone())))
            .collect();
        inat.insert("observations".to_string(), Value::Array(vec![observation]));

        RawRecord {
            provider: ProviderId::INaturalist,
            retrieved_at,
            payload: Value::Object(inat),
        }
    });

    let record = RawRecord {
        provider,
        retrieved_at,
        payload: Value::Object(entry),
    };
    Some(std::iter::once(record).chain(observed).collect())
}

/// iNaturalist taxon fields win; otherwise IUCN fields make it an IUCN entry
fn classify_entry(entry: &Map<String, Value>) -> Option<ProviderId> {
    let has = |keys: &[&str]| keys.iter().any(|key| entry.contains_key(*key));

    if has(&["inat_taxon_id", "inat_status"]) {
        Some(ProviderId::INaturalist)
    } else if has(&["taxonid", "iucn_status", "iucn_category", "inat_data"]) {
        Some(ProviderId::Iucn)
    } else {
        None
    }
}

/// Detect the provider of a dump: `data_source` first, then the file name
pub fn detect_provider(data_source: Option<&str>, file_name: Option<&str>) -> Option<ProviderId> {
    data_source
        .and_then(match_provider)
        .or_else(|| file_name.and_then(match_provider))
}

fn match_provider(text: &str) -> Option<ProviderId> {
    let text = text.to_lowercase();

    // Pattern matching on name
    if text.contains("gbif") {
        return Some(ProviderId::Gbif);
    }

    if text.contains("iucn")
        || text.contains("red_list")
        || text.contains("red list")
        || text.contains("redlist")
    {
        return Some(ProviderId::Iucn);
    }

    if text.contains("inat") {
        return Some(ProviderId::INaturalist);
    }

    if text.contains("natureserve") || text.contains("nature_serve") {
        return Some(ProviderId::NatureServe);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use crate::provider::{ConservationStatus, StatusGranularity};
    use chrono::TimeZone;

    #[test]
    fn test_detect_provider_prefers_data_source() {
        assert_eq!(detect_provider(Some("GBIF"), Some("natureserve_bees.json")), Some(ProviderId::Gbif));
        assert_eq!(detect_provider(Some("IUCN Red List"), None), Some(ProviderId::Iucn));
        assert_eq!(detect_provider(Some("iNaturalist"), None), Some(ProviderId::INaturalist));
        assert_eq!(detect_provider(Some("NatureServe"), None), Some(ProviderId::NatureServe));
    }

    #[test]
    fn test_detect_provider_falls_back_to_file_name() {
        assert_eq!(detect_provider(Some("unknown"), Some("gbif_bees.json")), Some(ProviderId::Gbif));
        assert_eq!(detect_provider(None, Some("inat_bees.json")), Some(ProviderId::INaturalist));
        assert_eq!(detect_provider(None, Some("bees.json")), None);
    }

    #[test]
    fn test_parse_single_dump() {
        let content = r#"{
            "collection_date": "2024-03-05T10:20:30.123456",
            "data_source": "IUCN Red List",
            "species": [
                {"scientific_name": "Bombus affinis", "iucn_category": "CR"},
                {"scientific_name": "Bombus terricola", "iucn_category": "VU"}
            ]
        }"#;

        let records = parse_raw_records(content, None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.provider == ProviderId::Iucn));
        assert_eq!(
            records[0].retrieved_at.map(|t| t.date_naive()),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap().date_naive())
        );
    }

    #[test]
    fn test_parse_envelopes_and_dump_arrays() {
        let envelopes = r#"[
            {"provider": "gbif", "retrieved_at": "2024-01-01T00:00:00Z", "payload": {"scientific_name": "Bombus affinis"}},
            {"provider": "natureserve", "payload": {"scientific_name": "Bombus affinis", "global_rank": "G1"}}
        ]"#;
        let records = parse_raw_records(envelopes, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].provider, ProviderId::NatureServe);
        assert!(records[1].retrieved_at.is_none());

        let dumps = r#"[
            {"data_source": "GBIF", "species": [{"scientific_name": "Bombus affinis"}]},
            {"data_source": "iNaturalist", "species": [{"scientific_name": "Bombus affinis"}]}
        ]"#;
        let records = parse_raw_records(dumps, None).unwrap();
        assert_eq!(records[0].provider, ProviderId::Gbif);
        assert_eq!(records[1].provider, ProviderId::INaturalist);
    }

    #[test]
    fn test_european_red_list_dump_carries_scope() {
        let content = r#"{
            "data_source": "European Red List of Bees - Appendix 1",
            "collection_date": "2024-03-05T10:20:30.123456",
            "geographic_scope": "Europe",
            "species": [
                {"scientific_name": "Bombus cullumanus", "family": "APIDAE", "iucn_europe_status": "CR",
                 "iucn_eu_27_status": "CR", "endemic_to_europe": false, "endemic_to_eu27": false}
            ]
        }"#;

        let records = parse_raw_records(content, Some("european_redlist_conservation_concern.json")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provider, ProviderId::Iucn);
        assert_eq!(records[0].payload["scope"], "Europe");

        let record = normalize(&records[0]).unwrap();
        assert_eq!(record.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(record.status_granularity(), StatusGranularity::Regional);
    }

    #[test]
    fn test_combined_dump_splits_inat_data() {
        let content = r#"{
            "collection_date": "2024-03-05T10:20:30",
            "total_species": 2,
            "species": [
                {
                    "scientific_name": "Bombus affinis",
                    "common_name": "Rusty-patched Bumble Bee",
                    "iucn_status": "CR",
                    "taxonid": 44937399,
                    "population_trend": "decreasing",
                    "inat_data": {"date": "2024-07-01", "location": "Madison, WI", "observer": "x"}
                },
                {
                    "scientific_name": "Bombus terricola",
                    "iucn_status": "VU",
                    "inat_status": "vulnerable",
                    "inat_taxon_id": 121519,
                    "observations_count": 9000
                }
            ]
        }"#;

        let records = parse_raw_records(content, Some("endangered_bees.json")).unwrap();
        let providers: Vec<ProviderId> = records.iter().map(|r| r.provider).collect();
        assert_eq!(
            providers,
            vec![ProviderId::Iucn, ProviderId::INaturalist, ProviderId::INaturalist]
        );
        assert!(records.iter().all(|r| r.retrieved_at.is_some()));
        assert!(records[0].payload.get("inat_data").is_none());

        let iucn = normalize(&records[0]).unwrap();
        assert_eq!(iucn.conservation_status(), ConservationStatus::CriticallyEndangered);
        assert_eq!(iucn.status_granularity(), StatusGranularity::Global);

        let observed = normalize(&records[1]).unwrap();
        assert_eq!(observed.scientific_name(), "Bombus affinis");
        assert_eq!(observed.last_observed()[0].location, "Madison, WI");

        let terricola = normalize(&records[2]).unwrap();
        assert_eq!(terricola.conservation_status(), ConservationStatus::Vulnerable);
        assert_eq!(terricola.details().observation_count, Some(9000));
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        assert!(parse_raw_records("42", None).is_err());
        assert!(parse_raw_records(r#"[{"name": "x"}]"#, None).is_err());
        assert!(parse_raw_records(r#"{"species": []}"#, Some("bees.json")).is_err());
        assert!(parse_raw_records(r#"{"species": [{"scientific_name": "Bombus affinis"}]}"#, Some("bees.json")).is_err());
        assert!(parse_raw_records("not json", None).is_err());
    }
}
