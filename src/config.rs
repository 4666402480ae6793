//! Pipeline configuration
//!
//! Read from a TOML file, then overridden by environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `F1_MODEL_PATH` | `model.path` |
//! | `F1_PROVIDER_URL` | `provider.base_url` |
//! | `F1_CIRCUIT_ENCODING` | `features.circuit_encoding` (`round` or `categorical`) |
//!
//! # Example
//!
//! ```toml
//! cache_dir = "data/cache"
//!
//! [[archives]]
//! path = "data/f1_features_2024.csv"
//! season = 2024
//!
//! [model]
//! path = "models/finish_position.json"
//!
//! [features]
//! circuit_encoding = "round"
//! include_weather = false
//! history_scope = "all_seasons"
//!
//! [provider]
//! base_url = "https://api.jolpi.ca/ergast/f1"
//! delay_ms = 500
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::data::archive::ArchiveSpec;
use crate::data::features::{CircuitEncoding, FeatureConfig};
use crate::error::PipelineError;
use crate::simulation::{HistoryScope, SimulationConfig};
use crate::source::ErgastConfig;

pub const ENV_MODEL_PATH: &str = "F1_MODEL_PATH";
pub const ENV_PROVIDER_URL: &str = "F1_PROVIDER_URL";
pub const ENV_CIRCUIT_ENCODING: &str = "F1_CIRCUIT_ENCODING";

/// Trained model locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelConfig {
    /// Finishing-position model (`.json` or `.onnx`); heuristic when unset
    pub path: Option<PathBuf>,
    /// Podium classifier (`.json`); heuristic when unset
    pub podium_path: Option<PathBuf>,
}

/// Feature derivation and history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub circuit_encoding: CircuitEncoding,
    pub include_weather: bool,
    pub history_scope: HistoryScope,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        let features = FeatureConfig::default();
        Self {
            circuit_encoding: features.circuit_encoding,
            include_weather: features.include_weather,
            history_scope: HistoryScope::default(),
        }
    }
}

impl FeatureSettings {
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            features: FeatureConfig {
                circuit_encoding: self.circuit_encoding.clone(),
                include_weather: self.include_weather,
            },
            history_scope: self.history_scope,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Historical archives, merged into one ledger
    pub archives: Vec<ArchiveSpec>,
    pub model: ModelConfig,
    pub features: FeatureSettings,
    pub provider: ErgastConfig,
    /// On-disk provider cache; no caching when unset
    pub cache_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Read a config file, or defaults when `path` is None, then apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("failed to read {:?}: {}", path, e))
                })?;
                debug!("Loaded configuration from {:?}", path);
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_MODEL_PATH).filter(|v| !v.is_empty()) {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup(ENV_PROVIDER_URL).filter(|v| !v.is_empty()) {
            self.provider.base_url = url;
        }
        if let Some(encoding) = lookup(ENV_CIRCUIT_ENCODING).filter(|v| !v.is_empty()) {
            self.features.circuit_encoding = parse_circuit_encoding(&encoding)?;
        }
        Ok(())
    }
}

/// `round` or `categorical`, case-insensitive
pub fn parse_circuit_encoding(value: &str) -> Result<CircuitEncoding, PipelineError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "round" => Ok(CircuitEncoding::Round),
        "categorical" => Ok(CircuitEncoding::Categorical),
        other => Err(PipelineError::Config(format!(
            "unknown circuit encoding '{}' (expected round or categorical)",
            other
        ))),
    }
}
