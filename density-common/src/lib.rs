pub mod config;
pub mod snapshot;

// Re-export key types for easier use by dependent crates
pub use config::{
    BinaryRuleConfig, BoostedParams, ContinuousRuleConfig, DriftConfig, EngineConfig, ForestParams,
    GridConfig, ModelConfig, ModelKind, OutputConfig, PipelineConfig, RunMode, SimulationRunConfig,
};
pub use snapshot::GridSnapshot;
