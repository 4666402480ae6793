//! Ergast-compatible results API client
//!
//! Fetches race results and qualifying from `{base}/{season}/{round}/...json`.
//! Requests are rate limited and retried with exponential backoff. The API
//! has no weather data, so [`RawRecordSource::weather`] always answers `None`.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::RawRecordSource;
use crate::data::parser::parse_date;
use crate::error::PipelineError;
use crate::models::{
    normalize_pit_lane_starts, DriverEntry, QualifyingEntry, RaceResults, SessionKey,
    WeatherSample,
};

/// Public Ergast mirror
pub const DEFAULT_BASE_URL: &str = "https://api.jolpi.ca/ergast/f1";

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErgastConfig {
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Max retry attempts after the first request
    pub max_retries: u32,
    /// Minimum delay between requests in milliseconds
    pub delay_ms: u64,
    pub user_agent: String,
}

impl Default for ErgastConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            delay_ms: 250,
            user_agent: concat!("f1predict/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErgastResponse {
    #[serde(rename = "MRData")]
    mr_data: MrData,
}

#[derive(Debug, Deserialize)]
struct MrData {
    #[serde(rename = "RaceTable")]
    race_table: RaceTable,
}

#[derive(Debug, Deserialize)]
struct RaceTable {
    #[serde(rename = "Races", default)]
    races: Vec<ErgastRace>,
}

#[derive(Debug, Deserialize)]
struct ErgastRace {
    #[serde(rename = "raceName", default)]
    race_name: String,
    #[serde(rename = "Circuit")]
    circuit: ErgastCircuit,
    date: String,
    #[serde(rename = "Results", default)]
    results: Vec<ErgastResult>,
    #[serde(rename = "QualifyingResults", default)]
    qualifying_results: Vec<ErgastQualifying>,
}

#[derive(Debug, Deserialize)]
struct ErgastCircuit {
    #[serde(rename = "circuitName")]
    circuit_name: String,
}

#[derive(Debug, Deserialize)]
struct ErgastDriver {
    #[serde(rename = "driverId")]
    driver_id: String,
    #[serde(rename = "givenName")]
    given_name: String,
    #[serde(rename = "familyName")]
    family_name: String,
}

impl ErgastDriver {
    fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
    }
}

#[derive(Debug, Deserialize)]
struct ErgastConstructor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErgastResult {
    position: String,
    grid: String,
    #[serde(rename = "Driver")]
    driver: ErgastDriver,
    #[serde(rename = "Constructor")]
    constructor: Option<ErgastConstructor>,
}

#[derive(Debug, Deserialize)]
struct ErgastQualifying {
    #[serde(rename = "Driver")]
    driver: ErgastDriver,
    #[serde(rename = "Q1")]
    q1: Option<String>,
    #[serde(rename = "Q2")]
    q2: Option<String>,
    #[serde(rename = "Q3")]
    q3: Option<String>,
}

/// Blocking client for an Ergast-compatible API
pub struct ErgastClient {
    client: reqwest::blocking::Client,
    config: ErgastConfig,
    last_request: Mutex<Option<Instant>>,
}

impl ErgastClient {
    pub fn new(config: ErgastConfig) -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ErgastConfig {
        &self.config
    }

    fn results_url(&self, season: i32, round: u32) -> String {
        format!(
            "{}/{}/{}/results.json?limit=100",
            self.config.base_url.trim_end_matches('/'),
            season,
            round
        )
    }

    fn qualifying_url(&self, season: i32, round: u32) -> String {
        format!(
            "{}/{}/{}/qualifying.json?limit=100",
            self.config.base_url.trim_end_matches('/'),
            season,
            round
        )
    }

    /// Sleep until `delay_ms` has passed since the previous request
    fn wait_for_rate_limit(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let delay = Duration::from_millis(self.config.delay_ms);

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < delay {
                std::thread::sleep(delay - elapsed);
            }
        }

        *last = Some(Instant::now());
    }

    /// GET a JSON body with rate limiting and retry
    ///
    /// Every transport failure maps to `DataUnavailable` for the race.
    fn fetch_body(&self, url: &str, season: i32, round: u32) -> Result<String, PipelineError> {
        let base_delay = Duration::from_millis(self.config.delay_ms.max(1));
        let mut last_reason = String::from("no request made");

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                std::thread::sleep(backoff_delay(base_delay, attempt));
            }
            self.wait_for_rate_limit();
            debug!("GET {} (attempt {})", url, attempt + 1);

            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status();

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(PipelineError::unavailable(
                            season,
                            round,
                            format!("{} returned 404", url),
                        ));
                    }

                    if status.is_success() {
                        return response.text().map_err(|e| {
                            PipelineError::unavailable(season, round, e.to_string())
                        });
                    }

                    warn!(
                        "Request failed with status {} (attempt {}/{})",
                        status,
                        attempt + 1,
                        self.config.max_retries + 1
                    );
                    last_reason = format!("HTTP {}", status);
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        e
                    );
                    last_reason = e.to_string();
                }
            }
        }

        Err(PipelineError::unavailable(
            season,
            round,
            format!(
                "{} failed after {} attempts: {}",
                url,
                self.config.max_retries + 1,
                last_reason
            ),
        ))
    }

    fn first_race(
        body: &str,
        season: i32,
        round: u32,
    ) -> Result<Option<ErgastRace>, PipelineError> {
        let response: ErgastResponse = serde_json::from_str(body).map_err(|e| {
            PipelineError::ResponseFormat(format!("{} round {}: {}", season, round, e))
        })?;
        Ok(response.mr_data.race_table.races.into_iter().next())
    }

    /// Parse a `results.json` payload
    pub fn parse_results(
        body: &str,
        season: i32,
        round: u32,
    ) -> Result<RaceResults, PipelineError> {
        let race = Self::first_race(body, season, round)?.ok_or_else(|| {
            PipelineError::unavailable(season, round, "race not run or not published")
        })?;

        if race.results.is_empty() {
            return Err(PipelineError::unavailable(
                season,
                round,
                "race has no classified results",
            ));
        }

        let date = parse_date(&race.date).ok_or_else(|| {
            PipelineError::ResponseFormat(format!("invalid race date '{}'", race.date))
        })?;

        let mut entries = race
            .results
            .into_iter()
            .map(|r| {
                let grid = r.grid.trim().parse::<u32>().map_err(|_| {
                    PipelineError::ResponseFormat(format!(
                        "invalid grid '{}' for {}",
                        r.grid, r.driver.driver_id
                    ))
                })?;
                let finish = r.position.trim().parse::<u32>().map_err(|_| {
                    PipelineError::ResponseFormat(format!(
                        "invalid position '{}' for {}",
                        r.position, r.driver.driver_id
                    ))
                })?;

                Ok(DriverEntry {
                    driver: r.driver.full_name(),
                    driver_id: Some(r.driver.driver_id),
                    constructor: r.constructor.map(|c| c.name),
                    grid,
                    finish: Some(finish),
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        normalize_pit_lane_starts(&mut entries);

        Ok(RaceResults {
            season,
            round,
            date,
            circuit: race.circuit.circuit_name,
            race_name: race.race_name,
            entries,
        })
    }

    /// Parse a `qualifying.json` payload; an empty table yields no entries
    pub fn parse_qualifying(
        body: &str,
        season: i32,
        round: u32,
    ) -> Result<Vec<QualifyingEntry>, PipelineError> {
        let Some(race) = Self::first_race(body, season, round)? else {
            debug!("No qualifying published for {} round {}", season, round);
            return Ok(Vec::new());
        };

        Ok(race
            .qualifying_results
            .into_iter()
            .map(|q| QualifyingEntry {
                driver: q.driver.full_name(),
                driver_id: Some(q.driver.driver_id),
                times: [q.q1, q.q2, q.q3].into_iter().flatten().collect(),
            })
            .collect())
    }
}

impl RawRecordSource for ErgastClient {
    fn name(&self) -> &str {
        "ergast"
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        let url = self.results_url(season, round);
        info!("Fetching results: {}", url);
        let body = self.fetch_body(&url, season, round)?;
        Self::parse_results(&body, season, round)
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        let url = self.qualifying_url(season, round);
        info!("Fetching qualifying: {}", url);
        let body = self.fetch_body(&url, season, round)?;
        Self::parse_qualifying(&body, season, round)
    }

    fn weather(&self, _session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        Ok(None)
    }
}

/// Longest wait between retries
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// `base * 2^(attempt - 1)`, capped at [`MAX_BACKOFF`]
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}
