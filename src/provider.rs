// 🐝 Provider & Status Vocabulary
// The closed set of data providers and the shared conservation vocabulary
// every provider-specific status string is mapped onto.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// PROVIDER ID
// ============================================================================

/// ProviderId - which external data provider a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gbif,
    Iucn,
    INaturalist,
    NatureServe,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Gbif,
        ProviderId::Iucn,
        ProviderId::INaturalist,
        ProviderId::NatureServe,
    ];

    /// Human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Gbif => "GBIF",
            ProviderId::Iucn => "IUCN Red List",
            ProviderId::INaturalist => "iNaturalist",
            ProviderId::NatureServe => "NatureServe",
        }
    }

    /// Short code used in serialization, the CLI and the store
    pub fn code(&self) -> &'static str {
        match self {
            ProviderId::Gbif => "gbif",
            ProviderId::Iucn => "iucn",
            ProviderId::INaturalist => "inaturalist",
            ProviderId::NatureServe => "natureserve",
        }
    }

    pub fn from_code(code: &str) -> Option<ProviderId> {
        let code = code.trim().to_lowercase();
        ProviderId::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Public species page for a provider-specific identifier.
    /// NatureServe ships full URLs in its payload, so it has no template.
    pub fn profile_url(&self, id: &str) -> Option<String> {
        match self {
            ProviderId::Gbif => Some(format!("https://www.gbif.org/species/{}", id)),
            ProviderId::Iucn => Some(format!("https://www.iucnredlist.org/species/{}", id)),
            ProviderId::INaturalist => Some(format!("https://www.inaturalist.org/taxa/{}", id)),
            ProviderId::NatureServe => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self {
            ProviderId::Gbif => "GBIF",
            ProviderId::Iucn => "IUCN",
            ProviderId::INaturalist => "iNaturalist",
            ProviderId::NatureServe => "NatureServe",
        };
        f.write_str(short)
    }
}

// ============================================================================
// CONSERVATION STATUS
// ============================================================================

/// IUCN-style extinction-risk category, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConservationStatus {
    Extinct,
    ExtinctInWild,
    CriticallyEndangered,
    Endangered,
    Vulnerable,
    NearThreatened,
    LeastConcern,
    DataDeficient,
    Unknown,
}

impl ConservationStatus {
    /// Most severe first
    pub const BY_SEVERITY: [ConservationStatus; 9] = [
        ConservationStatus::Extinct,
        ConservationStatus::ExtinctInWild,
        ConservationStatus::CriticallyEndangered,
        ConservationStatus::Endangered,
        ConservationStatus::Vulnerable,
        ConservationStatus::NearThreatened,
        ConservationStatus::LeastConcern,
        ConservationStatus::DataDeficient,
        ConservationStatus::Unknown,
    ];

    /// Higher = more severe. Unknown is 0.
    pub fn severity(&self) -> u8 {
        match self {
            ConservationStatus::Extinct => 8,
            ConservationStatus::ExtinctInWild => 7,
            ConservationStatus::CriticallyEndangered => 6,
            ConservationStatus::Endangered => 5,
            ConservationStatus::Vulnerable => 4,
            ConservationStatus::NearThreatened => 3,
            ConservationStatus::LeastConcern => 2,
            ConservationStatus::DataDeficient => 1,
            ConservationStatus::Unknown => 0,
        }
    }

    pub fn is_more_severe_than(&self, other: &ConservationStatus) -> bool {
        self.severity() > other.severity()
    }

    pub fn is_known(&self) -> bool {
        *self != ConservationStatus::Unknown
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConservationStatus::Extinct => "EX",
            ConservationStatus::ExtinctInWild => "EW",
            ConservationStatus::CriticallyEndangered => "CR",
            ConservationStatus::Endangered => "EN",
            ConservationStatus::Vulnerable => "VU",
            ConservationStatus::NearThreatened => "NT",
            ConservationStatus::LeastConcern => "LC",
            ConservationStatus::DataDeficient => "DD",
            ConservationStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConservationStatus::Extinct => "Extinct",
            ConservationStatus::ExtinctInWild => "Extinct in the Wild",
            ConservationStatus::CriticallyEndangered => "Critically Endangered",
            ConservationStatus::Endangered => "Endangered",
            ConservationStatus::Vulnerable => "Vulnerable",
            ConservationStatus::NearThreatened => "Near Threatened",
            ConservationStatus::LeastConcern => "Least Concern",
            ConservationStatus::DataDeficient => "Data Deficient",
            ConservationStatus::Unknown => "Unknown",
        }
    }

    /// Map any provider's status wording onto the shared vocabulary.
    ///
    /// Accepts IUCN codes (`EN`), IUCN/GBIF enum names in any case with
    /// spaces or underscores (`CRITICALLY_ENDANGERED`, `Near Threatened`) and
    /// iNaturalist wording (`critically imperiled`). Anything else is Unknown.
    pub fn from_vocabulary(raw: &str) -> ConservationStatus {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "ex" | "extinct" | "re" | "regionally extinct" => ConservationStatus::Extinct,
            "ew" | "extinct in the wild" => ConservationStatus::ExtinctInWild,
            "cr" | "critically endangered" | "critically imperiled" => {
                ConservationStatus::CriticallyEndangered
            }
            "en" | "endangered" | "imperiled" => ConservationStatus::Endangered,
            "vu" | "vulnerable" | "threatened" => ConservationStatus::Vulnerable,
            "nt" | "near threatened" | "lr/nt" => ConservationStatus::NearThreatened,
            "lc" | "least concern" | "lr/lc" | "secure" => ConservationStatus::LeastConcern,
            "dd" | "data deficient" => ConservationStatus::DataDeficient,
            _ => ConservationStatus::Unknown,
        }
    }

    /// Strict lookup for user input: any `from_vocabulary` spelling, plus the
    /// literal `UNKNOWN`. Unmapped text is `None` instead of Unknown.
    pub fn from_code(raw: &str) -> Option<ConservationStatus> {
        match ConservationStatus::from_vocabulary(raw) {
            ConservationStatus::Unknown if !raw.trim().eq_ignore_ascii_case("unknown") => None,
            status => Some(status),
        }
    }
}

impl fmt::Display for ConservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// GRANULARITY & CONFIDENCE
// ============================================================================

/// Geographic scope a status applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusGranularity {
    Global,
    National,
    Regional,
}

impl StatusGranularity {
    /// Higher = preferred when resolving a profile's status
    pub fn precedence(&self) -> u8 {
        match self {
            StatusGranularity::Global => 2,
            StatusGranularity::National => 1,
            StatusGranularity::Regional => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusConfidence {
    /// At least two independent providers agree on the winning status
    High,
    Low,
}
