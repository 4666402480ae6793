//! CSV loading for historical race archives

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::data::parser::{parse_date, parse_lap_time};
use crate::error::PipelineError;
use crate::models::{RaceRecord, WeatherSample};

/// Columns every archive must provide (`season` may come from [`ArchiveSpec`] instead)
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "date",
    "season",
    "round",
    "circuit",
    "driver",
    "constructor",
    "grid",
    "position",
];

const WEATHER_COLUMNS: [&str; 3] = ["air_temp", "track_temp", "humidity"];

/// Where to find an archive, and the season to stamp onto it if it has none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub season: Option<i32>,
}

impl ArchiveSpec {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            season: None,
        }
    }

    pub fn with_season(mut self, season: i32) -> Self {
        self.season = Some(season);
        self
    }
}

/// One archive row: the race record plus the optional engineered columns
/// that an archive-backed record source can serve
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRow {
    pub record: RaceRecord,
    pub qualifying_time: Option<f64>,
    pub weather: Option<WeatherSample>,
}

/// A parsed archive file
#[derive(Debug, Clone)]
pub struct HistoricalArchive {
    source: String,
    rows: Vec<ArchiveRow>,
}

impl HistoricalArchive {
    /// Load and validate an archive CSV
    ///
    /// A missing required column is fatal. Rows with null or out-of-range
    /// required values are skipped with a warning.
    pub fn load(spec: &ArchiveSpec) -> Result<Self, PipelineError> {
        let path = spec.path.as_path();
        let source = path.display().to_string();

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish())
            .map_err(|e| archive_error(path, e))?;

        Self::check_schema(&df, &source, spec.season.is_some())?;

        let rows = Self::dataframe_to_rows(&df, spec.season).map_err(|e| archive_error(path, e))?;
        debug!("Loaded {} rows from {}", rows.len(), source);

        Ok(Self { source, rows })
    }

    fn check_schema(
        df: &DataFrame,
        source: &str,
        has_season_override: bool,
    ) -> Result<(), PipelineError> {
        for column in REQUIRED_COLUMNS {
            if column == "season" && has_season_override {
                continue;
            }
            if df.column(column).is_err() {
                return Err(PipelineError::SchemaMismatch {
                    archive: source.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Convert DataFrame to typed rows
    fn dataframe_to_rows(
        df: &DataFrame,
        season_override: Option<i32>,
    ) -> Result<Vec<ArchiveRow>, PolarsError> {
        let dates = str_values(df, "date")?;
        let seasons = match season_override {
            Some(season) => vec![Some(season as i64); df.height()],
            None => i64_values(df, "season")?,
        };
        let rounds = i64_values(df, "round")?;
        let circuits = str_values(df, "circuit")?;
        let drivers = str_values(df, "driver")?;
        let constructors = str_values(df, "constructor")?;
        let grids = i64_values(df, "grid")?;
        let positions = i64_values(df, "position")?;

        let quali_times = if df.column("qualifying_time").is_ok() {
            Some(str_values(df, "qualifying_time")?)
        } else {
            None
        };

        let weather_cols = if WEATHER_COLUMNS.iter().all(|c| df.column(c).is_ok()) {
            Some((
                f64_values(df, "air_temp")?,
                f64_values(df, "track_temp")?,
                f64_values(df, "humidity")?,
            ))
        } else {
            None
        };

        let mut rows = Vec::with_capacity(df.height());
        let mut skipped = 0usize;

        for i in 0..df.height() {
            let parsed = (
                dates[i].as_deref().and_then(parse_date),
                seasons[i],
                rounds[i].filter(|&r| r >= 1),
                circuits[i].clone().filter(|s| !s.trim().is_empty()),
                drivers[i].clone().filter(|s| !s.trim().is_empty()),
                constructors[i].clone().filter(|s| !s.trim().is_empty()),
                grids[i].filter(|&g| g >= 0),
                positions[i].filter(|&p| p >= 1),
            );

            let (
                Some(date),
                Some(season),
                Some(round),
                Some(circuit),
                Some(driver),
                Some(constructor),
                Some(grid),
                Some(position),
            ) = parsed
            else {
                skipped += 1;
                continue;
            };

            let qualifying_time = quali_times
                .as_ref()
                .and_then(|q| q[i].as_deref())
                .and_then(parse_lap_time);

            let weather = weather_cols.as_ref().and_then(|(air, track, hum)| {
                match (air[i], track[i], hum[i]) {
                    (Some(air_temp), Some(track_temp), Some(humidity)) => Some(WeatherSample {
                        air_temp,
                        track_temp,
                        humidity,
                    }),
                    _ => None,
                }
            });

            rows.push(ArchiveRow {
                record: RaceRecord {
                    date,
                    season: season as i32,
                    round: round as u32,
                    circuit: circuit.trim().to_string(),
                    driver: driver.trim().to_string(),
                    constructor: constructor.trim().to_string(),
                    grid: grid as u32,
                    position: position as u32,
                },
                qualifying_time,
                weather,
            });
        }

        if skipped > 0 {
            warn!("Skipped {} archive rows with missing or invalid values", skipped);
        }

        normalize_archive_grid(&mut rows);
        Ok(rows)
    }

    /// Archive path as given
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn rows(&self) -> &[ArchiveRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ArchiveRow> {
        self.rows
    }

    /// Race records without the engineered columns
    pub fn records(&self) -> impl Iterator<Item = &RaceRecord> {
        self.rows.iter().map(|r| &r.record)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pit-lane starters (grid 0) go to the back of their race's field
fn normalize_archive_grid(rows: &mut [ArchiveRow]) {
    let mut field_sizes: HashMap<(i32, u32), u32> = HashMap::new();
    for row in rows.iter() {
        *field_sizes
            .entry((row.record.season, row.record.round))
            .or_default() += 1;
    }

    for row in rows.iter_mut().filter(|r| r.record.grid == 0) {
        if let Some(&size) = field_sizes.get(&(row.record.season, row.record.round)) {
            row.record.grid = size;
        }
    }
}

fn archive_error(path: &Path, source: PolarsError) -> PipelineError {
    PipelineError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, PolarsError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, PolarsError> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.into_iter().collect())
}

fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, PolarsError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}
