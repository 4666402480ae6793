//! Feature Engineering
//!
//! Derive the model input for every driver of a race from grid, qualifying,
//! weather and rolling form.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::data::history::{EntityKind, HistoricalLedger, DEFAULT_FORM};
use crate::data::parser::best_lap_time;
use crate::error::PipelineError;
use crate::models::{FeatureVector, QualifyingEntry, RaceInput};

/// Added to the slowest valid time for drivers without one
pub const QUALIFYING_FALLBACK_MARGIN: f64 = 2.0;
/// Used for everyone when nobody in the race set a valid time
pub const QUALIFYING_SENTINEL: f64 = 100.0;

/// Model feature columns without weather (6 features)
pub const BASE_FEATURE_NAMES: [&str; 6] = [
    "grid",
    "driver_form",
    "constructor_form",
    "circuit_encoded",
    "grid_advantage",
    "qualifying_time",
];

/// Weather feature columns (3 features)
pub const WEATHER_FEATURE_NAMES: [&str; 3] = ["air_temp", "track_temp", "humidity"];

/// How a circuit is turned into an integer feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitEncoding {
    /// The round number stands in for the circuit
    #[default]
    Round,
    /// Index into the sorted list of known circuit names; unknown is -1
    Categorical,
}

/// Which features a model expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub circuit_encoding: CircuitEncoding,
    pub include_weather: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            circuit_encoding: CircuitEncoding::Round,
            include_weather: true,
        }
    }
}

impl FeatureConfig {
    /// Column names in model input order
    pub fn feature_names(&self) -> Vec<&'static str> {
        let mut names = BASE_FEATURE_NAMES.to_vec();
        if self.include_weather {
            names.extend(WEATHER_FEATURE_NAMES);
        }
        names
    }
}

/// Circuit-to-integer mapping resolved once per pipeline
#[derive(Debug, Clone)]
enum CircuitEncoder {
    Round,
    Categorical(Vec<String>),
}

impl CircuitEncoder {
    fn encode(&self, circuit: &str, round: u32) -> i32 {
        match self {
            CircuitEncoder::Round => round as i32,
            CircuitEncoder::Categorical(circuits) => circuits
                .binary_search_by(|c| c.as_str().cmp(circuit))
                .map(|idx| idx as i32)
                .unwrap_or(-1),
        }
    }
}

/// Builds feature vectors for a race
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
    encoder: CircuitEncoder,
}

impl FeatureBuilder {
    /// Create a builder; categorical encoding takes its circuit list from the ledger
    pub fn new(config: FeatureConfig, ledger: &HistoricalLedger) -> Self {
        let encoder = match config.circuit_encoding {
            CircuitEncoding::Round => CircuitEncoder::Round,
            CircuitEncoding::Categorical => CircuitEncoder::Categorical(ledger.circuits()),
        };
        Self { config, encoder }
    }

    /// Create a builder with an explicit circuit list (as the model was trained on)
    pub fn with_circuits(config: FeatureConfig, mut circuits: Vec<String>) -> Self {
        circuits.sort();
        circuits.dedup();
        let encoder = match config.circuit_encoding {
            CircuitEncoding::Round => CircuitEncoder::Round,
            CircuitEncoding::Categorical => CircuitEncoder::Categorical(circuits),
        };
        Self { config, encoder }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Circuit encoding for a circuit name / round
    pub fn encode_circuit(&self, circuit: &str, round: u32) -> i32 {
        self.encoder.encode(circuit, round)
    }

    /// Build one feature vector per driver, in grid-data order
    ///
    /// Form is taken from ledger records strictly before the race date.
    pub fn build(
        &self,
        race: &RaceInput,
        ledger: &HistoricalLedger,
    ) -> Result<Vec<FeatureVector>, PipelineError> {
        let weather = if self.config.include_weather {
            Some(race.weather.ok_or_else(|| {
                PipelineError::unavailable(race.season, race.round, "no weather sample for race")
            })?)
        } else {
            None
        };

        let best_times = Self::best_qualifying_times(race);
        let fallback_time = Self::fallback_qualifying_time(&best_times);
        let circuit_encoded = self.encoder.encode(&race.circuit, race.round);

        let features = race
            .drivers
            .iter()
            .zip(best_times)
            .map(|(entry, best)| {
                let constructor = entry
                    .constructor
                    .clone()
                    .or_else(|| {
                        ledger
                            .constructor_of(&entry.driver, race.date)
                            .map(str::to_string)
                    });

                let driver_form = ledger.form(EntityKind::Driver, &entry.driver, race.date);
                let constructor_form = constructor
                    .as_deref()
                    .map(|c| ledger.form(EntityKind::Constructor, c, race.date))
                    .unwrap_or(DEFAULT_FORM);

                if constructor.is_none() {
                    debug!("No constructor resolved for {}, using default form", entry.driver);
                }

                let qualifying_time = best.unwrap_or(fallback_time);

                FeatureVector {
                    driver: entry.driver.clone(),
                    constructor,
                    grid: entry.grid,
                    qualifying_time,
                    driver_form,
                    constructor_form,
                    // After form is final
                    grid_advantage: entry.grid as f64 - driver_form,
                    circuit_encoded,
                    weather,
                }
            })
            .collect();

        Ok(features)
    }

    /// Best valid time per driver, aligned with `race.drivers`
    fn best_qualifying_times(race: &RaceInput) -> Vec<Option<f64>> {
        let by_id: HashMap<&str, &QualifyingEntry> = race
            .qualifying
            .iter()
            .filter_map(|q| q.driver_id.as_deref().map(|id| (id, q)))
            .collect();
        let by_name: HashMap<&str, &QualifyingEntry> = race
            .qualifying
            .iter()
            .map(|q| (q.driver.as_str(), q))
            .collect();

        race.drivers
            .iter()
            .map(|entry| {
                let quali = entry
                    .driver_id
                    .as_deref()
                    .and_then(|id| by_id.get(id))
                    .or_else(|| by_name.get(entry.driver.as_str()))?;

                let best = best_lap_time(&quali.times);
                if best.is_none() && !quali.times.is_empty() {
                    debug!("No valid qualifying time for {}: {:?}", entry.driver, quali.times);
                }
                best
            })
            .collect()
    }

    /// Slowest valid time plus margin, or the sentinel if nobody has a time
    fn fallback_qualifying_time(times: &[Option<f64>]) -> f64 {
        times
            .iter()
            .flatten()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
            .map(|max| max + QUALIFYING_FALLBACK_MARGIN)
            .unwrap_or(QUALIFYING_SENTINEL)
    }
}
