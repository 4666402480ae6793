use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One driver's result in one past race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    pub date: NaiveDate,
    pub season: i32,
    pub round: u32,
    pub circuit: String,
    pub driver: String,
    pub constructor: String,
    pub grid: u32,
    pub position: u32,
}

/// First weather reading of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub air_temp: f64,
    pub track_temp: f64,
    pub humidity: f64,
}

/// Which session of a race weekend a query refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Qualifying,
    Race,
}

/// Identifies a single session: (season, round, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub season: i32,
    pub round: u32,
    pub kind: SessionKind,
}

impl SessionKey {
    pub fn qualifying(season: i32, round: u32) -> Self {
        Self {
            season,
            round,
            kind: SessionKind::Qualifying,
        }
    }

    pub fn race(season: i32, round: u32) -> Self {
        Self {
            season,
            round,
            kind: SessionKind::Race,
        }
    }
}

/// A driver's row in the race being simulated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverEntry {
    /// Full name; the identity used to join history and actual results
    pub driver: String,
    /// Provider-specific id (e.g. "max_verstappen"), used to join qualifying rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,
    pub grid: u32,
    /// Actual finishing position, when the race has been run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<u32>,
}

/// Raw qualifying lap times for one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifyingEntry {
    pub driver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    /// One string per segment the driver took part in (Q1, Q2, Q3)
    pub times: Vec<String>,
}

/// Race-level payload returned by a record source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResults {
    pub season: i32,
    pub round: u32,
    pub date: NaiveDate,
    pub circuit: String,
    pub race_name: String,
    pub entries: Vec<DriverEntry>,
}

/// Everything the feature builder needs for one race
#[derive(Debug, Clone, PartialEq)]
pub struct RaceInput {
    pub season: i32,
    pub round: u32,
    pub date: NaiveDate,
    pub circuit: String,
    pub drivers: Vec<DriverEntry>,
    pub qualifying: Vec<QualifyingEntry>,
    pub weather: Option<WeatherSample>,
}

impl RaceInput {
    /// Assemble an input from a results payload
    pub fn from_results(
        results: RaceResults,
        qualifying: Vec<QualifyingEntry>,
        weather: Option<WeatherSample>,
    ) -> Self {
        Self {
            season: results.season,
            round: results.round,
            date: results.date,
            circuit: results.circuit,
            drivers: results.entries,
            qualifying,
            weather,
        }
    }

    /// True when every driver carries an actual finishing position
    pub fn has_actuals(&self) -> bool {
        !self.drivers.is_empty() && self.drivers.iter().all(|d| d.finish.is_some())
    }
}

/// Model-ready input for one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub driver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,
    pub grid: u32,
    pub qualifying_time: f64,
    pub driver_form: f64,
    pub constructor_form: f64,
    pub grid_advantage: f64,
    pub circuit_encoded: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherSample>,
}

impl FeatureVector {
    /// Look up a model feature by column name
    pub fn value(&self, name: &str) -> Option<f64> {
        match name {
            "grid" => Some(self.grid as f64),
            "driver_form" => Some(self.driver_form),
            "constructor_form" => Some(self.constructor_form),
            "circuit_encoded" => Some(self.circuit_encoded as f64),
            "grid_advantage" => Some(self.grid_advantage),
            "qualifying_time" => Some(self.qualifying_time),
            "air_temp" => self.weather.map(|w| w.air_temp),
            "track_temp" => self.weather.map(|w| w.track_temp),
            "humidity" => self.weather.map(|w| w.humidity),
            _ => None,
        }
    }

    /// Flatten to model input order
    ///
    /// Order: grid, driver_form, constructor_form, circuit_encoded,
    /// grid_advantage, qualifying_time [, air_temp, track_temp, humidity]
    pub fn to_vec(&self) -> Vec<f64> {
        let mut features = vec![
            self.grid as f64,
            self.driver_form,
            self.constructor_form,
            self.circuit_encoded as f64,
            self.grid_advantage,
            self.qualifying_time,
        ];

        if let Some(w) = self.weather {
            features.extend([w.air_temp, w.track_temp, w.humidity]);
        }

        features
    }
}

/// One row of the simulated finishing order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub driver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,
    pub grid: u32,
    pub predicted_position: f64,
    pub simulated_finish: u32,
    pub actual_position: Option<u32>,
    pub error: Option<i32>,
}

/// Binary classification output (e.g. podium yes/no)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: bool,
    pub probability: f64,
}

/// Move pit-lane starters (grid 0) to the back of the field
pub fn normalize_pit_lane_starts(entries: &mut [DriverEntry]) {
    let field_size = entries.len() as u32;
    for entry in entries.iter_mut().filter(|e| e.grid == 0) {
        entry.grid = field_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vector(weather: Option<WeatherSample>) -> FeatureVector {
        FeatureVector {
            driver: "Max Verstappen".to_string(),
            constructor: Some("Red Bull".to_string()),
            grid: 2,
            qualifying_time: 78.576,
            driver_form: 4.0,
            constructor_form: 3.0,
            grid_advantage: -2.0,
            circuit_encoded: 11,
            weather,
        }
    }

    #[test]
    fn test_feature_vector_to_vec_without_weather() {
        let vec = sample_vector(None).to_vec();
        assert_eq!(vec, vec![2.0, 4.0, 3.0, 11.0, -2.0, 78.576]);
    }

    #[test]
    fn test_feature_vector_to_vec_with_weather() {
        let vec = sample_vector(Some(WeatherSample {
            air_temp: 21.5,
            track_temp: 38.0,
            humidity: 55.0,
        }))
        .to_vec();

        assert_eq!(vec.len(), 9);
        assert!((vec[6] - 21.5).abs() < 1e-9);
        assert!((vec[8] - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_vector_value_lookup() {
        let fv = sample_vector(None);
        assert_eq!(fv.value("grid"), Some(2.0));
        assert_eq!(fv.value("grid_advantage"), Some(-2.0));
        assert_eq!(fv.value("air_temp"), None);
        assert_eq!(fv.value("nonsense"), None);
    }

    #[test]
    fn test_normalize_pit_lane_starts() {
        let mut entries: Vec<DriverEntry> = (0..3)
            .map(|i| DriverEntry {
                driver: format!("Driver {}", i),
                driver_id: None,
                constructor: None,
                grid: i,
                finish: None,
            })
            .collect();

        normalize_pit_lane_starts(&mut entries);

        assert_eq!(entries[0].grid, 3);
        assert_eq!(entries[1].grid, 1);
        assert_eq!(entries[2].grid, 2);
    }

    #[test]
    fn test_race_input_has_actuals() {
        let input = RaceInput {
            season: 2025,
            round: 8,
            date: NaiveDate::from_ymd_opt(2025, 5, 25).unwrap(),
            circuit: "Circuit de Monaco".to_string(),
            drivers: vec![DriverEntry {
                driver: "Lando Norris".to_string(),
                driver_id: None,
                constructor: None,
                grid: 1,
                finish: Some(1),
            }],
            qualifying: Vec::new(),
            weather: None,
        };
        assert!(input.has_actuals());
    }

    #[test]
    fn test_simulation_result_serialization() {
        let result = SimulationResult {
            driver: "Charles Leclerc".to_string(),
            constructor: None,
            grid: 2,
            predicted_position: 2.4,
            simulated_finish: 2,
            actual_position: None,
            error: None,
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: SimulationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.simulated_finish, 2);
        assert!(back.error.is_none());
    }
}
