//! Simulation Metrics
//!
//! Accuracy of a simulated finishing order against the actual classification:
//! position error, hit rates, winner/podium agreement and rank correlation.

use serde::{Deserialize, Serialize};

use crate::models::SimulationResult;

/// Coarse grading of one driver's position error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Off by at most one place
    Accurate,
    /// Off by at most three places
    Close,
    Off,
}

impl ErrorClass {
    pub fn from_error(error: i32) -> Self {
        match error.unsigned_abs() {
            0..=1 => ErrorClass::Accurate,
            2..=3 => ErrorClass::Close,
            _ => ErrorClass::Off,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Accurate => "Accurate",
            ErrorClass::Close => "Close",
            ErrorClass::Off => "Off",
        }
    }
}

/// Per-race evaluation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    /// Drivers with an actual finishing position
    pub scored: usize,
    pub mae: f64,
    pub rmse: f64,
    pub exact: usize,
    pub within_1: usize,
    pub within_3: usize,
    pub winner_correct: bool,
    /// |predicted top 3 ∩ actual top 3|
    pub podium_overlap: usize,
    /// Spearman rank correlation; None with fewer than two scored drivers
    pub spearman: Option<f64>,
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self {
            scored: 0,
            mae: 0.0,
            rmse: 0.0,
            exact: 0,
            within_1: 0,
            within_3: 0,
            winner_correct: false,
            podium_overlap: 0,
            spearman: None,
        }
    }
}

impl SimulationMetrics {
    pub fn within_1_rate(&self) -> f64 {
        rate(self.within_1, self.scored)
    }

    pub fn within_3_rate(&self) -> f64 {
        rate(self.within_3, self.scored)
    }
}

/// Calculate metrics from one simulated race
///
/// Returns None when no driver has an actual result.
pub fn calculate_metrics(results: &[SimulationResult]) -> Option<SimulationMetrics> {
    let scored: Vec<(&SimulationResult, i32)> = results
        .iter()
        .filter_map(|r| r.error.map(|e| (r, e)))
        .collect();

    if scored.is_empty() {
        return None;
    }

    let n = scored.len();
    let abs_errors: Vec<f64> = scored.iter().map(|(_, e)| e.unsigned_abs() as f64).collect();
    let mae = abs_errors.iter().sum::<f64>() / n as f64;
    let rmse = (abs_errors.iter().map(|e| e * e).sum::<f64>() / n as f64).sqrt();

    let exact = scored.iter().filter(|(_, e)| *e == 0).count();
    let within_1 = scored.iter().filter(|(_, e)| e.abs() <= 1).count();
    let within_3 = scored.iter().filter(|(_, e)| e.abs() <= 3).count();

    let winner_correct = results
        .iter()
        .find(|r| r.simulated_finish == 1)
        .and_then(|r| r.actual_position)
        == Some(1);

    let podium_overlap = results
        .iter()
        .filter(|r| r.simulated_finish <= 3 && matches!(r.actual_position, Some(p) if p <= 3))
        .count();

    let simulated: Vec<f64> = scored
        .iter()
        .map(|(r, _)| r.simulated_finish as f64)
        .collect();
    let actual: Vec<f64> = scored
        .iter()
        .filter_map(|(r, _)| r.actual_position.map(|p| p as f64))
        .collect();
    let spearman = spearman_correlation(&simulated, &actual);

    Some(SimulationMetrics {
        scored: n,
        mae,
        rmse,
        exact,
        within_1,
        within_3,
        winner_correct,
        podium_overlap,
        spearman,
    })
}

/// Metrics aggregated over several races
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub races: usize,
    pub drivers: usize,
    /// Mean absolute error over every scored driver
    pub mae: f64,
    pub rmse: f64,
    pub exact_rate: f64,
    pub within_1_rate: f64,
    pub within_3_rate: f64,
    pub winners_correct: usize,
    pub avg_podium_overlap: f64,
    /// Mean of the per-race correlations that exist
    pub avg_spearman: Option<f64>,
}

impl Default for AggregateMetrics {
    fn default() -> Self {
        Self {
            races: 0,
            drivers: 0,
            mae: 0.0,
            rmse: 0.0,
            exact_rate: 0.0,
            within_1_rate: 0.0,
            within_3_rate: 0.0,
            winners_correct: 0,
            avg_podium_overlap: 0.0,
            avg_spearman: None,
        }
    }
}

impl AggregateMetrics {
    pub fn winner_rate(&self) -> f64 {
        rate(self.winners_correct, self.races)
    }
}

/// Combine per-race metrics, weighting error terms by driver count
pub fn aggregate(races: &[SimulationMetrics]) -> AggregateMetrics {
    let drivers: usize = races.iter().map(|m| m.scored).sum();
    if races.is_empty() || drivers == 0 {
        return AggregateMetrics::default();
    }

    let abs_sum: f64 = races.iter().map(|m| m.mae * m.scored as f64).sum();
    let sq_sum: f64 = races.iter().map(|m| m.rmse.powi(2) * m.scored as f64).sum();

    let correlations: Vec<f64> = races.iter().filter_map(|m| m.spearman).collect();
    let avg_spearman = if correlations.is_empty() {
        None
    } else {
        Some(correlations.iter().sum::<f64>() / correlations.len() as f64)
    };

    AggregateMetrics {
        races: races.len(),
        drivers,
        mae: abs_sum / drivers as f64,
        rmse: (sq_sum / drivers as f64).sqrt(),
        exact_rate: rate(races.iter().map(|m| m.exact).sum(), drivers),
        within_1_rate: rate(races.iter().map(|m| m.within_1).sum(), drivers),
        within_3_rate: rate(races.iter().map(|m| m.within_3).sum(), drivers),
        winners_correct: races.iter().filter(|m| m.winner_correct).count(),
        avg_podium_overlap: races.iter().map(|m| m.podium_overlap as f64).sum::<f64>()
            / races.len() as f64,
        avg_spearman,
    }
}

/// Error class counts over a set of results, in Accurate/Close/Off order
pub fn error_class_counts(results: &[SimulationResult]) -> [(ErrorClass, usize); 3] {
    let mut counts = [
        (ErrorClass::Accurate, 0),
        (ErrorClass::Close, 0),
        (ErrorClass::Off, 0),
    ];
    for class in results.iter().filter_map(|r| r.error.map(ErrorClass::from_error)) {
        if let Some(slot) = counts.iter_mut().find(|(c, _)| *c == class) {
            slot.1 += 1;
        }
    }
    counts
}

fn rate(hits: usize, total: usize) -> f64 {
    if total > 0 {
        hits as f64 / total as f64
    } else {
        0.0
    }
}

/// 1-based ranks with ties sharing their average rank
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman correlation as Pearson correlation of the ranks
pub fn spearman_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }

    let ra = average_ranks(a);
    let rb = average_ranks(b);
    let n = ra.len() as f64;
    let mean_a = ra.iter().sum::<f64>() / n;
    let mean_b = rb.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in ra.iter().zip(&rb) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}
