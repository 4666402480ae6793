//! F1 Predict - Formula 1 finishing-order prediction
//!
//! This library provides:
//! - Historical race archives merged into one chronological ledger
//! - Per-driver feature derivation (qualifying pace, rolling form, grid advantage)
//! - Pluggable finishing-position predictors and podium classifiers
//! - Race simulation against live or archived results, with season backtests
//!
//! # Example
//!
//! ```no_run
//! use f1predict::data::{ArchiveSpec, HistoricalLedger};
//! use f1predict::predictor::HeuristicPredictor;
//! use f1predict::simulation::{RaceSimulator, SimulationConfig};
//! use f1predict::source::{ErgastClient, ErgastConfig};
//!
//! let ledger = HistoricalLedger::load(&[
//!     ArchiveSpec::new("data/f1_features_2024.csv").with_season(2024),
//!     ArchiveSpec::new("data/f1_features_2025.csv").with_season(2025),
//! ])?;
//! let source = ErgastClient::new(ErgastConfig::default())?;
//!
//! let mut config = SimulationConfig::default();
//! config.features.include_weather = false;
//! let simulator = RaceSimulator::new(config);
//!
//! let outcome = simulator.run(&source, &ledger, &HeuristicPredictor::new(), 2025, 5)?;
//! for result in &outcome.results {
//!     println!("P{} {}", result.simulated_finish, result.driver);
//! }
//! # Ok::<(), f1predict::PipelineError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod predictor;
pub mod simulation;
pub mod source;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use data::{FeatureBuilder, FeatureConfig, HistoricalLedger};
pub use error::PipelineError;
pub use models::{
    Classification, DriverEntry, FeatureVector, QualifyingEntry, RaceInput, RaceRecord,
    RaceResults, SessionKey, SimulationResult, WeatherSample,
};
pub use predictor::{Classifier, HeuristicPredictor, Predictor, UnifiedPredictor};
pub use simulation::{RaceSimulator, SimulationOutcome};
pub use source::RawRecordSource;
