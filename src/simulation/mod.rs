//! Race simulation and backtesting modules

pub mod metrics;
pub mod simulator;

pub use metrics::{
    aggregate, calculate_metrics, error_class_counts, spearman_correlation, AggregateMetrics,
    ErrorClass, SimulationMetrics,
};
pub use simulator::{
    attach_actuals, rank_by_prediction, HistoryScope, RaceSimulator, SeasonReport,
    SimulationConfig, SimulationOutcome, SkippedRound,
};
