//! End-to-end pipeline tests: archives, ledger, features, simulation

use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

use f1predict::data::{
    ArchiveRow, ArchiveSpec, FeatureBuilder, FeatureConfig, HistoricalArchive, HistoricalLedger,
};
use f1predict::predictor::HeuristicPredictor;
use f1predict::simulation::{HistoryScope, RaceSimulator, SimulationConfig};
use f1predict::source::{ArchiveSource, CachedSource, MemoryCache, WithWeather};
use f1predict::{
    DriverEntry, FeatureVector, PipelineError, Predictor, QualifyingEntry, RaceInput, RaceRecord,
    RaceResults, RawRecordSource, SessionKey, WeatherSample,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn record(d: NaiveDate, round: u32, driver: &str, constructor: &str, position: u32) -> RaceRecord {
    RaceRecord {
        date: d,
        season: 2024,
        round,
        circuit: format!("Circuit {}", round),
        driver: driver.to_string(),
        constructor: constructor.to_string(),
        grid: position,
        position,
    }
}

fn entry(driver: &str, constructor: &str, grid: u32, finish: Option<u32>) -> DriverEntry {
    DriverEntry {
        driver: driver.to_string(),
        driver_id: None,
        constructor: Some(constructor.to_string()),
        grid,
        finish,
    }
}

/// Source serving a fixed set of races
#[derive(Default)]
struct MemorySource {
    races: HashMap<(i32, u32), RaceResults>,
    qualifying: HashMap<(i32, u32), Vec<QualifyingEntry>>,
}

impl MemorySource {
    fn with_race(mut self, race: RaceResults, qualifying: Vec<QualifyingEntry>) -> Self {
        self.qualifying.insert((race.season, race.round), qualifying);
        self.races.insert((race.season, race.round), race);
        self
    }
}

impl RawRecordSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        self.races
            .get(&(season, round))
            .cloned()
            .ok_or_else(|| PipelineError::unavailable(season, round, "not published"))
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        Ok(self.qualifying.get(&(season, round)).cloned().unwrap_or_default())
    }

    fn weather(&self, _session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        Ok(None)
    }
}

/// Predicts every driver at the same position
struct FlatPredictor;

impl Predictor for FlatPredictor {
    fn name(&self) -> &str {
        "flat"
    }

    fn predict(&self, _features: &FeatureVector) -> Result<f64, PipelineError> {
        Ok(5.0)
    }
}

fn history() -> HistoricalLedger {
    HistoricalLedger::from_records(vec![
        // Out of date order on purpose
        record(date(2024, 3, 24), 3, "Driver A", "Team X", 3),
        record(date(2024, 3, 2), 1, "Driver A", "Team X", 1),
        record(date(2024, 3, 9), 2, "Driver A", "Team X", 2),
        record(date(2024, 3, 9), 2, "Driver B", "Team Y", 7),
    ])
}

fn no_weather() -> SimulationConfig {
    SimulationConfig {
        features: FeatureConfig {
            include_weather: false,
            ..FeatureConfig::default()
        },
        history_scope: HistoryScope::AllSeasons,
    }
}

fn round_four() -> RaceResults {
    RaceResults {
        season: 2024,
        round: 4,
        date: date(2024, 4, 7),
        circuit: "Suzuka Circuit".to_string(),
        race_name: "Japanese Grand Prix".to_string(),
        entries: vec![
            entry("Driver A", "Team X", 2, Some(1)),
            entry("Driver B", "Team Y", 1, Some(2)),
        ],
    }
}

#[test]
fn test_form_from_history_feeds_features() {
    let ledger = history();
    let race = RaceInput::from_results(round_four(), vec![], None);

    let builder = FeatureBuilder::new(no_weather().features, &ledger);
    let features = builder.build(&race, &ledger).unwrap();

    let a = &features[0];
    assert_eq!(a.driver, "Driver A");
    assert_eq!(a.driver_form, 2.0);
    assert_eq!(a.grid_advantage, 0.0);

    let b = &features[1];
    assert_eq!(b.driver_form, 10.0);
    assert_eq!(b.grid_advantage, 1.0 - 10.0);
    // Team Y has one prior result
    assert_eq!(b.constructor_form, 10.0);
}

#[test]
fn test_run_scores_against_actuals() {
    let source = MemorySource::default().with_race(
        round_four(),
        vec![
            QualifyingEntry {
                driver: "Driver A".to_string(),
                driver_id: None,
                times: vec!["1:29.100".to_string()],
            },
            QualifyingEntry {
                driver: "Driver B".to_string(),
                driver_id: None,
                times: vec!["1:28.900".to_string(), "".to_string()],
            },
        ],
    );
    let simulator = RaceSimulator::new(no_weather());

    let outcome = simulator
        .run(&source, &history(), &HeuristicPredictor::new(), 2024, 4)
        .unwrap();

    assert_eq!(outcome.race_name, "Japanese Grand Prix");
    assert_eq!(outcome.results.len(), 2);
    // Driver A: strong form outweighs the grid slot
    assert_eq!(outcome.results[0].driver, "Driver A");
    assert_eq!(outcome.results[0].simulated_finish, 1);
    assert_eq!(outcome.results[0].error, Some(0));

    let metrics = outcome.metrics.unwrap();
    assert_eq!(metrics.scored, 2);
    assert_eq!(metrics.mae, 0.0);
    assert!(metrics.winner_correct);
}

#[test]
fn test_ties_keep_input_order() {
    let mut race = round_four();
    race.entries.push(entry("Driver C", "Team Z", 3, None));
    let source = MemorySource::default().with_race(race, vec![]);

    let outcome = RaceSimulator::new(no_weather())
        .run(&source, &history(), &FlatPredictor, 2024, 4)
        .unwrap();

    let order: Vec<(&str, u32)> = outcome
        .results
        .iter()
        .map(|r| (r.driver.as_str(), r.simulated_finish))
        .collect();
    assert_eq!(order, vec![("Driver A", 1), ("Driver B", 2), ("Driver C", 3)]);
    assert!(outcome.results[2].actual_position.is_none());
    assert!(outcome.results[2].error.is_none());
}

#[test]
fn test_unpublished_round_is_unavailable() {
    let source = MemorySource::default().with_race(round_four(), vec![]);
    let simulator = RaceSimulator::new(no_weather());

    let err = simulator
        .run(&source, &history(), &HeuristicPredictor::new(), 2024, 23)
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::DataUnavailable {
            season: 2024,
            round: 23,
            ..
        }
    ));
    assert!(err.is_recoverable());
}

#[test]
fn test_weather_required_but_missing() {
    let source = MemorySource::default().with_race(round_four(), vec![]);
    let simulator = RaceSimulator::default();

    // FlatPredictor keeps the default: it may read weather
    let err = simulator
        .run(&source, &history(), &FlatPredictor, 2024, 4)
        .unwrap_err();
    assert!(err.is_recoverable());

    // The heuristic never reads weather, so none is needed
    let outcome = simulator
        .run(&source, &history(), &HeuristicPredictor::new(), 2024, 4)
        .unwrap();
    assert_eq!(outcome.results.len(), 2);
}

#[test]
fn test_backtest_skips_unpublished_rounds() {
    let source = MemorySource::default().with_race(round_four(), vec![]);
    let simulator = RaceSimulator::new(no_weather());

    let report = simulator
        .backtest(&source, &history(), &HeuristicPredictor::new(), 2024, 3..=5)
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].round, 4);
    let skipped: Vec<u32> = report.skipped.iter().map(|s| s.round).collect();
    assert_eq!(skipped, vec![3, 5]);
    assert_eq!(report.metrics.races, 1);
}

fn write_csv(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const ARCHIVE: &str = "\
date,round,circuit,driver,constructor,grid,position,qualifying_time,air_temp,track_temp,humidity
2024-03-02,1,Bahrain International Circuit,Max Verstappen,Red Bull,1,1,1:29.179,18.5,27.1,46.0
2024-03-02,1,Bahrain International Circuit,Charles Leclerc,Ferrari,2,4,1:29.407,18.5,27.1,46.0
2024-03-02,1,Bahrain International Circuit,Lando Norris,McLaren,0,6,,18.5,27.1,46.0
03/09/2024,2,Jeddah Corniche Circuit,Max Verstappen,Red Bull,1,1,1:27.472,26.0,30.2,60.0
03/09/2024,2,Jeddah Corniche Circuit,Charles Leclerc,Ferrari,2,3,1:27.791,26.0,30.2,60.0
03/09/2024,2,Jeddah Corniche Circuit,Lando Norris,McLaren,3,8,1:28.132,26.0,30.2,60.0
";

#[test]
fn test_archive_end_to_end() {
    let file = write_csv(ARCHIVE);
    let spec = ArchiveSpec::new(file.path()).with_season(2024);

    let archive = HistoricalArchive::load(&spec).unwrap();
    assert_eq!(archive.len(), 6);

    let ledger = HistoricalLedger::from_records(archive.records().cloned());
    assert_eq!(ledger.seasons(), vec![2024]);
    assert_eq!(ledger.len(), 6);

    let source = ArchiveSource::from_rows(archive.into_rows());
    let simulator = RaceSimulator::default();

    let outcome = simulator
        .run(&source, &ledger, &HeuristicPredictor::new(), 2024, 1)
        .unwrap();
    assert_eq!(outcome.circuit, "Bahrain International Circuit");
    assert_eq!(outcome.results.len(), 3);

    // Pit-lane start moved to the back of a three-car field
    let norris = outcome
        .results
        .iter()
        .find(|r| r.driver == "Lando Norris")
        .unwrap();
    assert_eq!(norris.grid, 3);
    assert!(outcome.metrics.is_some());

    let features = simulator.features_for(&source, &ledger, 2024, 2).unwrap();
    assert!(features.iter().all(|f| f.weather.is_some()));
    // Slash dates read month-first
    assert_eq!(ledger.race(2024, 2).unwrap().date, date(2024, 3, 9));
    assert_eq!(features[0].driver_form, 10.0);
}

/// Load archives the way the CLI does: one row set feeds ledger and source
fn load_shared(specs: &[ArchiveSpec]) -> (HistoricalLedger, ArchiveSource) {
    let rows: Vec<ArchiveRow> = specs
        .iter()
        .flat_map(|spec| HistoricalArchive::load(spec).unwrap().into_rows())
        .collect();
    let ledger = HistoricalLedger::from_records(rows.iter().map(|r| r.record.clone()));
    (ledger, ArchiveSource::from_rows(rows))
}

#[test]
fn test_overlapping_archives_simulate_each_driver_once() {
    let first = write_csv(ARCHIVE);
    let second = write_csv(ARCHIVE);
    let (ledger, source) = load_shared(&[
        ArchiveSpec::new(first.path()).with_season(2024),
        ArchiveSpec::new(second.path()).with_season(2024),
    ]);
    assert_eq!(ledger.len(), 6);

    let outcome = RaceSimulator::default()
        .run(&source, &ledger, &HeuristicPredictor::new(), 2024, 2)
        .unwrap();

    let mut drivers: Vec<&str> = outcome.results.iter().map(|r| r.driver.as_str()).collect();
    drivers.sort_unstable();
    assert_eq!(drivers, vec!["Charles Leclerc", "Lando Norris", "Max Verstappen"]);

    let finishes: Vec<u32> = outcome.results.iter().map(|r| r.simulated_finish).collect();
    assert_eq!(finishes, vec![1, 2, 3]);
    for r in &outcome.results {
        let actual = r.actual_position.unwrap();
        assert_eq!(r.error, Some(r.simulated_finish as i32 - actual as i32));
    }
}

#[test]
fn test_backtest_without_weather_columns_scores_heuristic() {
    let file = write_csv(
        "date,round,circuit,driver,constructor,grid,position\n\
         2025-05-25,8,Circuit de Monaco,Lando Norris,McLaren,1,1\n\
         2025-05-25,8,Circuit de Monaco,Charles Leclerc,Ferrari,2,2\n",
    );
    let (ledger, source) = load_shared(&[ArchiveSpec::new(file.path()).with_season(2025)]);

    let report = RaceSimulator::default()
        .backtest(&source, &ledger, &HeuristicPredictor::new(), 2025, 8..=8)
        .unwrap();
    assert_eq!(report.metrics.races, 1);
    assert!(report.skipped.is_empty());
}

#[test]
fn test_archive_supplies_weather_for_live_records() {
    let file = write_csv(ARCHIVE);
    let (_, weather) = load_shared(&[ArchiveSpec::new(file.path()).with_season(2024)]);

    let mut live = round_four();
    live.round = 2;
    let source = WithWeather::new(MemorySource::default().with_race(live, vec![]), weather);

    let features = RaceSimulator::default()
        .features_for(&source, &history(), 2024, 2)
        .unwrap();
    let w = features[0].weather.unwrap();
    assert_eq!(w.air_temp, 26.0);
    assert_eq!(w.humidity, 60.0);
}

#[test]
fn test_cached_source_serves_repeat_requests() {
    let source = CachedSource::new(
        MemorySource::default().with_race(round_four(), vec![]),
        Box::new(MemoryCache::new()),
    );
    let simulator = RaceSimulator::new(no_weather());
    let predictor = HeuristicPredictor::new();

    let first = simulator.run(&source, &history(), &predictor, 2024, 4).unwrap();
    let second = simulator.run(&source, &history(), &predictor, 2024, 4).unwrap();
    assert_eq!(first.results, second.results);
}

#[test]
fn test_archive_missing_column() {
    let file = write_csv(
        "date,season,round,circuit,driver,grid,position\n\
         2024-03-02,2024,1,Bahrain,Max Verstappen,1,1\n",
    );

    let err = HistoricalArchive::load(&ArchiveSpec::new(file.path())).unwrap_err();
    match err {
        PipelineError::SchemaMismatch { column, .. } => assert_eq!(column, "constructor"),
        other => panic!("expected SchemaMismatch, got {:?}", other),
    }
    assert!(!HistoricalLedger::load(&[ArchiveSpec::new(file.path())])
        .unwrap_err()
        .is_recoverable());
}
