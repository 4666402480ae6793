//! Race Simulator
//!
//! Build features for a race, predict every driver, rank the field and,
//! when the race has been run, score the ranking against the real result.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};

use super::metrics::{aggregate, calculate_metrics, AggregateMetrics, SimulationMetrics};
use crate::data::features::{FeatureBuilder, FeatureConfig};
use crate::data::history::HistoricalLedger;
use crate::error::{validate_probability, validate_round, validate_round_range, PipelineError};
use crate::models::{Classification, FeatureVector, RaceInput, SessionKey, SimulationResult};
use crate::predictor::{Classifier, Predictor};
use crate::source::RawRecordSource;

/// Which history feeds form for a simulated race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    /// Every archived season before the race date
    #[default]
    AllSeasons,
    /// Only the race's own season
    SameSeason,
}

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    pub features: FeatureConfig,
    pub history_scope: HistoryScope,
}

/// One simulated race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub season: i32,
    pub round: u32,
    pub race_name: String,
    pub circuit: String,
    pub date: NaiveDate,
    /// Ordered by simulated finish
    pub results: Vec<SimulationResult>,
    /// None when the race has no actual results yet
    pub metrics: Option<SimulationMetrics>,
}

/// A round left out of a backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRound {
    pub round: u32,
    pub reason: String,
}

/// Backtest over a range of rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonReport {
    pub season: i32,
    pub outcomes: Vec<SimulationOutcome>,
    pub skipped: Vec<SkippedRound>,
    pub metrics: AggregateMetrics,
}

impl SeasonReport {
    pub fn new(season: i32) -> Self {
        Self {
            season,
            outcomes: Vec::new(),
            skipped: Vec::new(),
            metrics: AggregateMetrics::default(),
        }
    }

    /// Recompute aggregate metrics from the outcomes
    pub fn finalize(&mut self) {
        let per_race: Vec<SimulationMetrics> = self
            .outcomes
            .iter()
            .filter_map(|o| o.metrics.clone())
            .collect();
        self.metrics = aggregate(&per_race);
    }
}

/// 1-based finishing slot for each input index
///
/// Ascending by prediction; equal predictions keep input order.
pub fn rank_by_prediction(predictions: &[f64]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..predictions.len()).collect();
    // sort_by is stable
    order.sort_by(|&a, &b| predictions[a].total_cmp(&predictions[b]));

    let mut finish = vec![0u32; predictions.len()];
    for (rank, &idx) in order.iter().enumerate() {
        finish[idx] = rank as u32 + 1;
    }
    finish
}

/// Fill `actual_position` and `error` from (driver, position) pairs
///
/// Drivers without a match keep `None` for both.
pub fn attach_actuals<'a, I>(results: &mut [SimulationResult], actuals: I)
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let actuals: HashMap<&str, u32> = actuals.into_iter().collect();
    for result in results.iter_mut() {
        result.actual_position = actuals.get(result.driver.as_str()).copied();
        result.error = result
            .actual_position
            .map(|actual| result.simulated_finish as i32 - actual as i32);
    }
}

/// Single-race simulator and season backtester
#[derive(Debug, Clone, Default)]
pub struct RaceSimulator {
    pub config: SimulationConfig,
}

impl RaceSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// This simulator with weather dropped unless the model reads it
    pub fn for_model(&self, uses_weather: bool) -> Self {
        let mut config = self.config.clone();
        config.features.include_weather &= uses_weather;
        Self { config }
    }

    /// Simulate a race from already-fetched raw records
    pub fn simulate<P: Predictor + ?Sized>(
        &self,
        race: &RaceInput,
        ledger: &HistoricalLedger,
        predictor: &P,
    ) -> Result<Vec<SimulationResult>, PipelineError> {
        let features = self.for_model(predictor.uses_weather()).config.features;
        let builder = FeatureBuilder::new(features, ledger);
        Self::simulate_with(&builder, race, ledger, predictor)
    }

    fn simulate_with<P: Predictor + ?Sized>(
        builder: &FeatureBuilder,
        race: &RaceInput,
        ledger: &HistoricalLedger,
        predictor: &P,
    ) -> Result<Vec<SimulationResult>, PipelineError> {
        let features = builder.build(race, ledger)?;
        let predictions = predictor.predict_batch(&features)?;

        if predictions.len() != features.len() {
            return Err(PipelineError::Prediction(format!(
                "{} returned {} predictions for {} drivers",
                predictor.name(),
                predictions.len(),
                features.len()
            )));
        }
        if let Some((f, p)) = features
            .iter()
            .zip(&predictions)
            .find(|(_, p)| !p.is_finite())
        {
            return Err(PipelineError::Prediction(format!(
                "non-finite prediction {} for {}",
                p, f.driver
            )));
        }

        let finish = rank_by_prediction(&predictions);

        let mut results: Vec<SimulationResult> = features
            .into_iter()
            .zip(predictions)
            .zip(finish)
            .map(|((f, predicted), simulated_finish)| SimulationResult {
                driver: f.driver,
                constructor: f.constructor,
                grid: f.grid,
                predicted_position: predicted,
                simulated_finish,
                actual_position: None,
                error: None,
            })
            .collect();

        attach_actuals(
            &mut results,
            race.drivers
                .iter()
                .filter_map(|d| d.finish.map(|p| (d.driver.as_str(), p))),
        );
        results.sort_by_key(|r| r.simulated_finish);

        debug!(
            "Simulated {} round {}: {} drivers with {}",
            race.season,
            race.round,
            results.len(),
            predictor.name()
        );
        Ok(results)
    }

    /// Fetch a race and apply the configured history scope
    fn prepare<S: RawRecordSource + ?Sized>(
        &self,
        source: &S,
        ledger: &HistoricalLedger,
        season: i32,
        round: u32,
    ) -> Result<(RaceInput, String), PipelineError> {
        validate_round(round)?;

        let mut results = source.race_results(season, round)?;
        let qualifying = source.qualifying(season, round)?;
        let weather = if self.config.features.include_weather {
            source.weather(SessionKey::qualifying(season, round))?
        } else {
            None
        };

        if results.circuit.is_empty() {
            if let Some(meta) = ledger.race(season, round) {
                results.circuit = meta.circuit;
            }
        }
        let race_name = results.race_name.clone();

        Ok((RaceInput::from_results(results, qualifying, weather), race_name))
    }

    fn scoped<'a>(&self, ledger: &'a HistoricalLedger, season: i32) -> Cow<'a, HistoricalLedger> {
        match self.config.history_scope {
            HistoryScope::AllSeasons => Cow::Borrowed(ledger),
            HistoryScope::SameSeason => Cow::Owned(ledger.for_season(season)),
        }
    }

    /// Feature vectors for a race as the simulator would build them
    pub fn features_for<S: RawRecordSource + ?Sized>(
        &self,
        source: &S,
        ledger: &HistoricalLedger,
        season: i32,
        round: u32,
    ) -> Result<Vec<FeatureVector>, PipelineError> {
        let (race, _) = self.prepare(source, ledger, season, round)?;
        let builder = FeatureBuilder::new(self.config.features.clone(), ledger);
        builder.build(&race, &self.scoped(ledger, season))
    }

    /// Fetch, simulate and score one race
    pub fn run<S, P>(
        &self,
        source: &S,
        ledger: &HistoricalLedger,
        predictor: &P,
        season: i32,
        round: u32,
    ) -> Result<SimulationOutcome, PipelineError>
    where
        S: RawRecordSource + ?Sized,
        P: Predictor + ?Sized,
    {
        if self.config.features.include_weather && !predictor.uses_weather() {
            debug!("{} reads no weather, skipping weather lookup", predictor.name());
            return self
                .for_model(false)
                .run(source, ledger, predictor, season, round);
        }

        info!("Simulating {} round {} from {}", season, round, source.name());
        let (race, race_name) = self.prepare(source, ledger, season, round)?;
        if !race.has_actuals() {
            debug!("{} round {} is not fully classified yet", season, round);
        }

        // Circuit categories come from the full ledger whatever the scope
        let builder = FeatureBuilder::new(self.config.features.clone(), ledger);
        let scoped = self.scoped(ledger, season);
        let results = Self::simulate_with(&builder, &race, &scoped, predictor)?;
        let metrics = calculate_metrics(&results);

        Ok(SimulationOutcome {
            season,
            round,
            race_name,
            circuit: race.circuit,
            date: race.date,
            results,
            metrics,
        })
    }

    /// Single yes/no query for one driver (e.g. podium)
    pub fn predict_single<C: Classifier + ?Sized>(
        &self,
        features: &FeatureVector,
        classifier: &C,
    ) -> Result<Classification, PipelineError> {
        let result = classifier.classify(features)?;
        validate_probability(result.probability)?;
        Ok(result)
    }

    /// Simulate every round in `rounds`, skipping unavailable ones
    pub fn backtest<S, P>(
        &self,
        source: &S,
        ledger: &HistoricalLedger,
        predictor: &P,
        season: i32,
        rounds: RangeInclusive<u32>,
    ) -> Result<SeasonReport, PipelineError>
    where
        S: RawRecordSource + ?Sized,
        P: Predictor + ?Sized,
    {
        self.backtest_with_progress(source, ledger, predictor, season, rounds, |_| {})
    }

    /// As [`RaceSimulator::backtest`], calling `on_round` after each round
    pub fn backtest_with_progress<S, P, F>(
        &self,
        source: &S,
        ledger: &HistoricalLedger,
        predictor: &P,
        season: i32,
        rounds: RangeInclusive<u32>,
        mut on_round: F,
    ) -> Result<SeasonReport, PipelineError>
    where
        S: RawRecordSource + ?Sized,
        P: Predictor + ?Sized,
        F: FnMut(u32),
    {
        validate_round_range(*rounds.start(), *rounds.end())?;
        let mut report = SeasonReport::new(season);

        for round in rounds {
            match self.run(source, ledger, predictor, season, round) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping {} round {}: {}", season, round, e);
                    report.skipped.push(SkippedRound {
                        round,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
            on_round(round);
        }

        report.finalize();
        if report.outcomes.is_empty() && !report.skipped.is_empty() {
            warn!(
                "No round of {} could be simulated; first skip: {}",
                season, report.skipped[0].reason
            );
        }
        info!(
            "Backtest {}: {} races simulated, {} skipped",
            season,
            report.outcomes.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriverEntry, QualifyingEntry, RaceRecord, RaceResults, WeatherSample};
    use crate::predictor::HeuristicPredictor;
    use crate::source::testing::StaticSource;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Predicts the grid slot
    struct GridPredictor;

    impl Predictor for GridPredictor {
        fn name(&self) -> &str {
            "grid"
        }

        fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
            Ok(features.grid as f64)
        }
    }

    /// Same prediction for everyone
    struct ConstantPredictor(f64);

    impl Predictor for ConstantPredictor {
        fn name(&self) -> &str {
            "constant"
        }

        fn predict(&self, _features: &FeatureVector) -> Result<f64, PipelineError> {
            Ok(self.0)
        }
    }

    fn entry(driver: &str, grid: u32, finish: Option<u32>) -> DriverEntry {
        DriverEntry {
            driver: driver.to_string(),
            driver_id: None,
            constructor: Some("Williams".to_string()),
            grid,
            finish,
        }
    }

    fn race(drivers: Vec<DriverEntry>) -> RaceInput {
        RaceInput {
            season: 2025,
            round: 5,
            date: date(2025, 4, 20),
            circuit: "Jeddah Corniche Circuit".to_string(),
            drivers,
            qualifying: Vec::new(),
            weather: None,
        }
    }

    fn simulator() -> RaceSimulator {
        RaceSimulator::new(SimulationConfig {
            features: FeatureConfig {
                include_weather: false,
                ..Default::default()
            },
            history_scope: HistoryScope::AllSeasons,
        })
    }

    fn ledger() -> HistoricalLedger {
        let mut records = Vec::new();
        for (i, (season, month)) in [(2024, 11), (2025, 3), (2025, 4)].iter().enumerate() {
            for (driver, position) in [("Alex Albon", 4 + i as u32), ("Carlos Sainz", 10)] {
                records.push(RaceRecord {
                    date: date(*season, *month, 1),
                    season: *season,
                    round: i as u32 + 1,
                    circuit: format!("Circuit {}", i),
                    driver: driver.to_string(),
                    constructor: "Williams".to_string(),
                    grid: position,
                    position,
                });
            }
        }
        HistoricalLedger::from_records(records)
    }

    #[test]
    fn test_rank_by_prediction() {
        assert_eq!(rank_by_prediction(&[3.2, 1.1, 2.5]), vec![3, 1, 2]);
        assert!(rank_by_prediction(&[]).is_empty());
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        assert_eq!(rank_by_prediction(&[5.0, 5.0]), vec![1, 2]);
        assert_eq!(rank_by_prediction(&[2.0, 5.0, 1.0, 5.0]), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_simulate_orders_by_prediction() {
        let input = race(vec![
            entry("Alex Albon", 3, Some(2)),
            entry("Carlos Sainz", 1, Some(1)),
            entry("Franco Colapinto", 2, None),
        ]);
        let results = simulator().simulate(&input, &ledger(), &GridPredictor).unwrap();

        let order: Vec<&str> = results.iter().map(|r| r.driver.as_str()).collect();
        assert_eq!(order, vec!["Carlos Sainz", "Franco Colapinto", "Alex Albon"]);

        let finishes: Vec<u32> = results.iter().map(|r| r.simulated_finish).collect();
        assert_eq!(finishes, vec![1, 2, 3]);

        assert_eq!(results[0].error, Some(0));
        assert_eq!(results[1].actual_position, None);
        assert_eq!(results[1].error, None);
        // simulated 3rd, finished 2nd
        assert_eq!(results[2].error, Some(1));
    }

    #[test]
    fn test_simulate_ties_follow_grid_data_order() {
        let input = race(vec![entry("X", 7, None), entry("Y", 2, None)]);
        let results = simulator()
            .simulate(&input, &ledger(), &ConstantPredictor(5.0))
            .unwrap();
        assert_eq!(results[0].driver, "X");
        assert_eq!(results[0].simulated_finish, 1);
        assert_eq!(results[1].driver, "Y");
        assert_eq!(results[1].simulated_finish, 2);
    }

    #[test]
    fn test_non_finite_prediction_is_an_error() {
        let input = race(vec![entry("X", 1, None)]);
        let err = simulator()
            .simulate(&input, &ledger(), &ConstantPredictor(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Prediction(_)));
    }

    #[test]
    fn test_simulate_empty_field() {
        let results = simulator()
            .simulate(&race(Vec::new()), &ledger(), &GridPredictor)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_attach_actuals_by_driver() {
        let mut results = vec![SimulationResult {
            driver: "Alex Albon".to_string(),
            constructor: None,
            grid: 4,
            predicted_position: 4.2,
            simulated_finish: 4,
            actual_position: None,
            error: None,
        }];
        attach_actuals(&mut results, vec![("Alex Albon", 9), ("Someone Else", 1)]);
        assert_eq!(results[0].actual_position, Some(9));
        assert_eq!(results[0].error, Some(-5));
    }

    fn source() -> StaticSource {
        let mut source = StaticSource::default();
        source.results.insert(
            (2025, 5),
            RaceResults {
                season: 2025,
                round: 5,
                date: date(2025, 4, 20),
                circuit: "Jeddah Corniche Circuit".to_string(),
                race_name: "Saudi Arabian Grand Prix".to_string(),
                entries: vec![
                    entry("Alex Albon", 2, Some(2)),
                    entry("Carlos Sainz", 1, Some(1)),
                ],
            },
        );
        source.qualifying.insert(
            (2025, 5),
            vec![QualifyingEntry {
                driver: "Carlos Sainz".to_string(),
                driver_id: None,
                times: vec!["1:27.500".to_string()],
            }],
        );
        source
    }

    #[test]
    fn test_run_scores_against_actuals() {
        let outcome = simulator()
            .run(&source(), &ledger(), &GridPredictor, 2025, 5)
            .unwrap();

        assert_eq!(outcome.race_name, "Saudi Arabian Grand Prix");
        assert_eq!(outcome.results.len(), 2);
        let metrics = outcome.metrics.unwrap();
        assert_eq!(metrics.exact, 2);
        assert!(metrics.winner_correct);
    }

    #[test]
    fn test_run_unpublished_round_is_unavailable() {
        let err = simulator()
            .run(&source(), &ledger(), &GridPredictor, 2025, 30)
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_run_requires_weather_when_configured() {
        let sim = RaceSimulator::default();
        assert!(sim.config.features.include_weather);

        let err = sim
            .run(&source(), &ledger(), &GridPredictor, 2025, 5)
            .unwrap_err();
        assert!(err.is_recoverable());

        let mut with_weather = source();
        with_weather.weather.insert(
            SessionKey::qualifying(2025, 5),
            WeatherSample {
                air_temp: 26.0,
                track_temp: 31.0,
                humidity: 60.0,
            },
        );
        let outcome = sim
            .run(&with_weather, &ledger(), &GridPredictor, 2025, 5)
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
    }

    #[test]
    fn test_weather_not_required_by_models_that_ignore_it() {
        let sim = RaceSimulator::default();
        let heuristic = HeuristicPredictor::new();

        let outcome = sim.run(&source(), &ledger(), &heuristic, 2025, 5).unwrap();
        assert_eq!(outcome.results.len(), 2);

        let report = sim.backtest(&source(), &ledger(), &heuristic, 2025, 5..=5).unwrap();
        assert_eq!(report.metrics.races, 1);
        assert!(report.skipped.is_empty());

        let results = sim.simulate(&race(vec![entry("X", 1, None)]), &ledger(), &heuristic);
        assert!(results.is_ok());
    }

    #[test]
    fn test_for_model_only_narrows() {
        let sim = RaceSimulator::default();
        assert!(sim.for_model(true).config.features.include_weather);
        assert!(!sim.for_model(false).config.features.include_weather);
        assert!(!simulator().for_model(true).config.features.include_weather);
    }

    #[test]
    fn test_history_scope_same_season() {
        let all = simulator();
        let mut same = simulator();
        same.config.history_scope = HistoryScope::SameSeason;

        let src = source();
        let all_features = all.features_for(&src, &ledger(), 2025, 5).unwrap();
        let same_features = same.features_for(&src, &ledger(), 2025, 5).unwrap();

        // Albon: three prior races across seasons (4, 5, 6), two in 2025
        assert!((all_features[0].driver_form - 5.0).abs() < 1e-9);
        assert_eq!(same_features[0].driver_form, 10.0);
    }

    #[test]
    fn test_predict_single() {
        let features = simulator()
            .features_for(&source(), &ledger(), 2025, 5)
            .unwrap();
        let result = simulator()
            .predict_single(&features[1], &HeuristicPredictor::new())
            .unwrap();
        assert!((0.0..=1.0).contains(&result.probability));
    }

    #[test]
    fn test_backtest_skips_unavailable_rounds() {
        let mut rounds = Vec::new();
        let report = simulator()
            .backtest_with_progress(&source(), &ledger(), &GridPredictor, 2025, 4..=6, |r| {
                rounds.push(r)
            })
            .unwrap();

        assert_eq!(rounds, vec![4, 5, 6]);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].round, 5);
        let skipped: Vec<u32> = report.skipped.iter().map(|s| s.round).collect();
        assert_eq!(skipped, vec![4, 6]);
        assert_eq!(report.metrics.races, 1);
        assert_eq!(report.metrics.drivers, 2);
    }

    #[test]
    fn test_backtest_rejects_empty_range() {
        #[allow(clippy::reversed_empty_ranges)]
        let result = simulator().backtest(&source(), &ledger(), &GridPredictor, 2025, 5..=4);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_backtest_aborts_on_fatal_error() {
        let err = simulator()
            .backtest(&source(), &ledger(), &ConstantPredictor(f64::INFINITY), 2025, 5..=5)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Prediction(_)));
    }
}
