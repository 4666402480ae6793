//! Raw record sources
//!
//! A source answers three questions about a race: the classified results
//! (grid and, once run, finishing positions), the qualifying lap times, and a
//! weather reading for a session. Network and publication failures surface
//! as [`PipelineError::DataUnavailable`].

pub mod archive;
pub mod cache;
pub mod ergast;

pub use archive::ArchiveSource;
pub use cache::{CachedSource, DirCache, MemoryCache, SessionCache};
pub use ergast::{ErgastClient, ErgastConfig, DEFAULT_BASE_URL};

use crate::error::PipelineError;
use crate::models::{QualifyingEntry, RaceResults, SessionKey, WeatherSample};

/// Provider of per-race raw records
pub trait RawRecordSource {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Grid (and finishing positions when available) for a race
    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError>;

    /// Qualifying segment times for a race
    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError>;

    /// First weather reading of a session, if the source has one
    fn weather(&self, session: SessionKey) -> Result<Option<WeatherSample>, PipelineError>;
}

impl<S: RawRecordSource + ?Sized> RawRecordSource for &S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        (**self).race_results(season, round)
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        (**self).qualifying(season, round)
    }

    fn weather(&self, session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        (**self).weather(session)
    }
}

impl<S: RawRecordSource + ?Sized> RawRecordSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        (**self).race_results(season, round)
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        (**self).qualifying(season, round)
    }

    fn weather(&self, session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        (**self).weather(session)
    }
}

/// Results and qualifying from one source, weather from another
pub struct WithWeather<S, W> {
    records: S,
    weather: W,
}

impl<S, W> WithWeather<S, W>
where
    S: RawRecordSource,
    W: RawRecordSource,
{
    pub fn new(records: S, weather: W) -> Self {
        Self { records, weather }
    }
}

impl<S, W> RawRecordSource for WithWeather<S, W>
where
    S: RawRecordSource,
    W: RawRecordSource,
{
    fn name(&self) -> &str {
        self.records.name()
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        self.records.race_results(season, round)
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        self.records.qualifying(season, round)
    }

    fn weather(&self, session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        self.weather.weather(session)
    }
}
