//! Record source backed by precomputed archive files
//!
//! Serves the grid, finishing positions, best qualifying time and weather
//! columns of an archive as if they came from the live provider.

use std::collections::BTreeMap;
use tracing::debug;

use super::RawRecordSource;
use crate::data::archive::ArchiveRow;
use crate::error::PipelineError;
use crate::models::{DriverEntry, QualifyingEntry, RaceResults, SessionKey, WeatherSample};

/// Archive-backed source, rows grouped by (season, round)
#[derive(Debug, Clone, Default)]
pub struct ArchiveSource {
    races: BTreeMap<(i32, u32), Vec<ArchiveRow>>,
}

impl ArchiveSource {
    /// Group rows by race
    ///
    /// A driver appearing twice in one race (overlapping archives) keeps the
    /// first row.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ArchiveRow>,
    {
        let mut races: BTreeMap<(i32, u32), Vec<ArchiveRow>> = BTreeMap::new();
        let mut duplicates = 0usize;

        for row in rows {
            let field = races
                .entry((row.record.season, row.record.round))
                .or_default();
            if field.iter().any(|r| r.record.driver == row.record.driver) {
                duplicates += 1;
                continue;
            }
            field.push(row);
        }

        if duplicates > 0 {
            debug!("Dropped {} duplicate archive rows", duplicates);
        }
        Self { races }
    }

    /// (season, round) pairs available, ascending
    pub fn races(&self) -> impl Iterator<Item = (i32, u32)> + '_ {
        self.races.keys().copied()
    }

    fn rows(&self, season: i32, round: u32) -> Result<&[ArchiveRow], PipelineError> {
        self.races
            .get(&(season, round))
            .map(Vec::as_slice)
            .ok_or_else(|| PipelineError::unavailable(season, round, "race not in archive"))
    }
}

impl RawRecordSource for ArchiveSource {
    fn name(&self) -> &str {
        "archive"
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        let rows = self.rows(season, round)?;
        // rows() never yields an empty race
        let first = &rows[0].record;

        Ok(RaceResults {
            season,
            round,
            date: first.date,
            circuit: first.circuit.clone(),
            race_name: first.circuit.clone(),
            entries: rows
                .iter()
                .map(|row| DriverEntry {
                    driver: row.record.driver.clone(),
                    driver_id: None,
                    constructor: Some(row.record.constructor.clone()),
                    grid: row.record.grid,
                    finish: Some(row.record.position),
                })
                .collect(),
        })
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        let rows = self.rows(season, round)?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                row.qualifying_time.map(|t| QualifyingEntry {
                    driver: row.record.driver.clone(),
                    driver_id: None,
                    times: vec![format!("{:.3}", t)],
                })
            })
            .collect())
    }

    /// Archives carry one reading per race weekend, served for any session
    fn weather(&self, session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        Ok(self
            .races
            .get(&(session.season, session.round))
            .and_then(|rows| rows.iter().find_map(|row| row.weather)))
    }
}
