//! Data loading, history and feature engineering modules

pub mod archive;
pub mod features;
pub mod history;
pub mod parser;

// Re-export commonly used types
pub use archive::{ArchiveRow, ArchiveSpec, HistoricalArchive, REQUIRED_COLUMNS};
pub use features::{
    CircuitEncoding, FeatureBuilder, FeatureConfig, BASE_FEATURE_NAMES, QUALIFYING_FALLBACK_MARGIN,
    QUALIFYING_SENTINEL, WEATHER_FEATURE_NAMES,
};
pub use history::{compute_form, EntityKind, HistoricalLedger, RaceMeta, DEFAULT_FORM, FORM_WINDOW};
pub use parser::{best_lap_time, parse_date, parse_lap_time};
