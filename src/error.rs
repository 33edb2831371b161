// ⚠️ Error Types - one enum per stage
// Record-level errors are non-fatal and collected per run; only an empty run aborts.

use crate::provider::ProviderId;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// NORMALIZER
// ============================================================================

/// Raised when a raw provider record cannot become a SourceRecord.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail")]
pub enum SchemaError {
    #[error("{provider}: required field `{field}` is missing")]
    MissingField { provider: ProviderId, field: String },

    #[error("{provider}: field `{field}` is unparseable: {reason}")]
    InvalidField {
        provider: ProviderId,
        field: String,
        reason: String,
    },

    #[error("{provider}: raw record is not a JSON object")]
    NotAnObject { provider: ProviderId },
}

impl SchemaError {
    pub fn provider(&self) -> ProviderId {
        match self {
            SchemaError::MissingField { provider, .. } => *provider,
            SchemaError::InvalidField { provider, .. } => *provider,
            SchemaError::NotAnObject { provider } => *provider,
        }
    }
}

// ============================================================================
// SYNONYM TABLE
// ============================================================================

#[derive(Error, Debug)]
pub enum SynonymError {
    #[error("failed to read synonym table: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid synonym JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid synonym CSV: {0}")]
    Csv(#[from] csv::Error),
}

// ============================================================================
// PROFILE STORE
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

// ============================================================================
// AGGREGATION RUN
// ============================================================================

#[derive(Error, Debug)]
pub enum AggregationError {
    /// Nothing survived normalization, so there is nothing to merge.
    #[error("no valid source records to aggregate ({rejected} rejected)")]
    NoValidRecords { rejected: usize },

    #[error("cannot merge an empty record group for `{0}`")]
    EmptyGroup(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_message_names_provider_and_field() {
        let err = SchemaError::MissingField {
            provider: ProviderId::Gbif,
            field: "scientific_name".to_string(),
        };

        assert_eq!(err.provider(), ProviderId::Gbif);
        assert_eq!(
            err.to_string(),
            "GBIF: required field `scientific_name` is missing"
        );
    }

    #[test]
    fn test_store_error_not_found() {
        let err = StoreError::NotFound("bombus affinis".to_string());
        assert!(err.is_not_found());
        assert!(!StoreError::Poisoned.is_not_found());
    }
}
