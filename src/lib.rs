// Bee Profile Aggregator - Core Library
// Exposes all modules for use in CLI, API server, and tests
//
// Pipeline: Normalizer → Entity Resolver → Merger → Profile Store

pub mod error;
pub mod provider;
pub mod record;
pub mod species;
pub mod normalizer;
pub mod resolver;
pub mod profile;
pub mod merger;
pub mod aggregator;
pub mod store;
pub mod config;
pub mod input;
pub mod logging;

// Re-export commonly used types
pub use error::{AggregationError, SchemaError, StoreError, SynonymError};
pub use provider::{ConservationStatus, ProviderId, StatusConfidence, StatusGranularity};
pub use record::{Observation, RawRecord, SourceRecord, SpeciesDetails, MAX_OBSERVATIONS};
pub use species::{normalize_scientific_name, SpeciesKey, SynonymEntry, SynonymResolution, SynonymTable};
pub use normalizer::{
    ProviderNormalizer, StatusMapper, ObservationExtractor,
    NormalizedBatch, RejectedRecord,
    get_normalizer, normalize, normalize_batch,
    GbifNormalizer, IucnNormalizer, INaturalistNormalizer, NatureServeNormalizer,
};
pub use resolver::{EntityResolver, Resolution, ReviewEntry};
pub use profile::{BeeProfile, ContributingRecord, MergeFlag, ProfileObservation};
pub use merger::{merge, merge_details, select_status, StatusSelection};
pub use aggregator::{AggregationRun, Aggregator, RunInfo, RunSummary};
pub use store::{InMemoryProfileStore, ProfileIter, ProfileStore, SqliteProfileStore};
pub use config::AppConfig;
pub use input::{detect_provider, load_raw_records};
pub use logging::init_logging;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
