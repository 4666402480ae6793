use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Race data cannot be fetched or has not been published yet
    #[error("data unavailable for {season} round {round}: {reason}")]
    DataUnavailable {
        season: i32,
        round: u32,
        reason: String,
    },

    /// An archive lacks a column the pipeline requires
    #[error("schema mismatch in {archive}: missing required column '{column}'")]
    SchemaMismatch { archive: String, column: String },

    #[error("failed to read archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    /// Provider answered with a payload we cannot interpret
    #[error("unexpected provider response: {0}")]
    ResponseFormat(String),

    #[error("prediction error: {0}")]
    Prediction(String),

    #[error("failed to load model {path:?}: {reason}")]
    Model { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn unavailable(season: i32, round: u32, reason: impl Into<String>) -> Self {
        PipelineError::DataUnavailable {
            season,
            round,
            reason: reason.into(),
        }
    }

    /// Whether a caller may retry later or pick another race
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::DataUnavailable { .. })
    }
}

/// Validation functions
pub fn validate_round(round: u32) -> Result<(), PipelineError> {
    if round == 0 {
        return Err(PipelineError::Config(
            "Round numbers are 1-based, got 0".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_round_range(from: u32, to: u32) -> Result<(), PipelineError> {
    validate_round(from)?;
    if to < from {
        return Err(PipelineError::Config(format!(
            "Round range is empty: {}..={}",
            from, to
        )));
    }
    Ok(())
}

pub fn validate_probability(prob: f64) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(PipelineError::Prediction(format!(
            "Probability must be between 0 and 1, got {}",
            prob
        )));
    }
    Ok(())
}
