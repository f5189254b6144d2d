pub mod automaton;
pub mod dataset;
pub mod drift;
pub mod experiments;
pub mod features;
pub mod metrics;
pub mod model;
pub mod monitoring;
pub mod submission;

// Re-export the types most callers need
pub use automaton::{BinaryRule, ContinuousRule, Grid, GridSimulator, SnapshotPolicy, UpdateRule};
pub use drift::{detect_drift, ks_2samp, DriftReport};
pub use metrics::{calculate_metrics, EvaluationMetrics};
pub use model::{build_model, GradientBoostedRegressor, RandomForestRegressor, Regressor};
