use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Configuration for the simulation grid dimensions
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GridConfig {
    pub height: u32,
    pub width: u32,
}

// Parameters for the binary (0/1) automaton rule, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BinaryRuleConfig {
    #[serde(default = "default_p_growth")]
    pub p_growth: f64,
    #[serde(default = "default_p_decay")]
    pub p_decay: f64,
    #[serde(default = "default_initial_density")]
    pub initial_density: f64,
}

// Parameters for the continuous ([0,1]) automaton rule, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ContinuousRuleConfig {
    /// Configuration knob carried over from the source rule set. The observed
    /// transition never reads it; kept so existing configs keep parsing.
    #[serde(default = "default_growth_threshold")]
    pub growth_threshold: f64,
    #[serde(default = "default_decay_probability")]
    pub decay_probability: f64,
    #[serde(default = "default_perturbation_sigma")]
    pub perturbation_sigma: f64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Binary,
    Continuous,
    Drift,
}

// Configuration for the run itself: which mode, how long, which seed
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationRunConfig {
    pub mode: RunMode,
    pub steps: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Forest,
    Boosted,
}

// Configuration for the forecasting pipeline (drift mode)
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default = "default_lags")]
    pub lags: Vec<usize>,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_model_kind")]
    pub model: ModelKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_path: default_data_path(),
            lags: default_lags(),
            rolling_window: default_rolling_window(),
            test_fraction: default_test_fraction(),
            model: default_model_kind(),
        }
    }
}

// Hyperparameters for the random-forest backend
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForestParams {
    #[serde(default = "default_forest_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_forest_depth")]
    pub max_depth: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_estimators: default_forest_estimators(),
            max_depth: default_forest_depth(),
        }
    }
}

// Hyperparameters for the gradient-boosted backend
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BoostedParams {
    #[serde(default = "default_boosted_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_boosted_depth")]
    pub max_depth: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl Default for BoostedParams {
    fn default() -> Self {
        BoostedParams {
            n_estimators: default_boosted_estimators(),
            max_depth: default_boosted_depth(),
            learning_rate: default_learning_rate(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ModelConfig {
    #[serde(default)]
    pub forest: ForestParams,
    #[serde(default)]
    pub boosted: BoostedParams,
}

// Configuration for the drift simulation (perturbation + KS test thresholds)
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DriftConfig {
    #[serde(default = "default_noise_level")]
    pub noise_level: f64,
    #[serde(default = "default_threshold_p_value")]
    pub threshold_p_value: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        DriftConfig {
            noise_level: default_noise_level(),
            threshold_p_value: default_threshold_p_value(),
        }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_output_directory")]
    pub directory: String,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default = "default_save_history")]
    pub save_history: bool,
    #[serde(default = "default_save_activity")]
    pub save_activity: bool,
}

// Main engine configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    pub grid: GridConfig,
    pub simulation: SimulationRunConfig,
    #[serde(default = "default_binary_rule")]
    pub binary_rule: BinaryRuleConfig,
    #[serde(default = "default_continuous_rule")]
    pub continuous_rule: ContinuousRuleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Loads the engine configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: EngineConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a configuration from an in-memory TOML string.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.grid.height == 0 || self.grid.width == 0 {
            anyhow::bail!(
                "invalid configuration: grid dimensions must be positive (got {}x{})",
                self.grid.height,
                self.grid.width
            );
        }
        for (name, p) in [
            ("binary_rule.p_growth", self.binary_rule.p_growth),
            ("binary_rule.p_decay", self.binary_rule.p_decay),
            ("binary_rule.initial_density", self.binary_rule.initial_density),
            (
                "continuous_rule.decay_probability",
                self.continuous_rule.decay_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("invalid configuration: {} must be in [0, 1] (got {})", name, p);
            }
        }
        if self.continuous_rule.perturbation_sigma < 0.0 {
            anyhow::bail!(
                "invalid configuration: continuous_rule.perturbation_sigma must be non-negative (got {})",
                self.continuous_rule.perturbation_sigma
            );
        }
        if !(self.pipeline.test_fraction > 0.0 && self.pipeline.test_fraction < 1.0) {
            anyhow::bail!(
                "invalid configuration: pipeline.test_fraction must be in (0, 1) (got {})",
                self.pipeline.test_fraction
            );
        }
        if self.model.forest.n_estimators == 0 || self.model.boosted.n_estimators == 0 {
            anyhow::bail!("invalid configuration: n_estimators must be positive");
        }
        if self.model.boosted.learning_rate <= 0.0 {
            anyhow::bail!(
                "invalid configuration: model.boosted.learning_rate must be positive (got {})",
                self.model.boosted.learning_rate
            );
        }
        if !(0.0..=1.0).contains(&self.drift.threshold_p_value) {
            anyhow::bail!(
                "invalid configuration: drift.threshold_p_value must be in [0, 1] (got {})",
                self.drift.threshold_p_value
            );
        }
        if self.drift.noise_level < 0.0 {
            anyhow::bail!(
                "invalid configuration: drift.noise_level must be non-negative (got {})",
                self.drift.noise_level
            );
        }
        Ok(())
    }
}

fn default_p_growth() -> f64 {
    0.05
}

fn default_p_decay() -> f64 {
    0.01
}

fn default_initial_density() -> f64 {
    0.1
}

fn default_growth_threshold() -> f64 {
    0.6
}

fn default_decay_probability() -> f64 {
    0.02
}

fn default_perturbation_sigma() -> f64 {
    0.05
}

fn default_seed() -> u64 {
    42
}

fn default_data_path() -> String {
    "data/train.csv".to_string()
}

fn default_lags() -> Vec<usize> {
    vec![1, 2, 3, 6, 12]
}

fn default_rolling_window() -> usize {
    3
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_model_kind() -> ModelKind {
    ModelKind::Forest
}

fn default_forest_estimators() -> usize {
    100
}

fn default_forest_depth() -> usize {
    10
}

fn default_boosted_estimators() -> usize {
    100
}

fn default_boosted_depth() -> usize {
    6
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_noise_level() -> f64 {
    0.1
}

fn default_threshold_p_value() -> f64 {
    0.01
}

fn default_output_directory() -> String {
    "outputs".to_string()
}

fn default_save_history() -> bool {
    true
}

fn default_save_activity() -> bool {
    true
}

fn default_binary_rule() -> BinaryRuleConfig {
    BinaryRuleConfig {
        p_growth: default_p_growth(),
        p_decay: default_p_decay(),
        initial_density: default_initial_density(),
    }
}

fn default_continuous_rule() -> ContinuousRuleConfig {
    ContinuousRuleConfig {
        growth_threshold: default_growth_threshold(),
        decay_probability: default_decay_probability(),
        perturbation_sigma: default_perturbation_sigma(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [grid]
        height = 20
        width = 30

        [simulation]
        mode = "binary"
        steps = 10

        [output]
        base_filename = "density"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = EngineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.grid.height, 20);
        assert_eq!(config.simulation.mode, RunMode::Binary);
        assert_eq!(config.simulation.seed, 42);
        assert_eq!(config.binary_rule.p_growth, 0.05);
        assert_eq!(config.continuous_rule.growth_threshold, 0.6);
        assert_eq!(config.pipeline.lags, vec![1, 2, 3, 6, 12]);
        assert_eq!(config.model.forest.n_estimators, 100);
        assert_eq!(config.model.boosted.learning_rate, 0.1);
        assert_eq!(config.drift.threshold_p_value, 0.01);
        assert!(config.output.save_history);
    }

    #[test]
    fn zero_grid_dimension_is_rejected() {
        let bad = MINIMAL.replace("height = 20", "height = 0");
        assert!(EngineConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let bad = format!("{}\n[binary_rule]\np_growth = 1.5\n", MINIMAL);
        assert!(EngineConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn drift_overrides_parse_and_validate() {
        let config = EngineConfig::from_toml_str(&format!(
            "{}\n[drift]\nnoise_level = 0.3\nthreshold_p_value = 0.05\n",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(config.drift.noise_level, 0.3);
        assert_eq!(config.drift.threshold_p_value, 0.05);

        let bad = format!("{}\n[drift]\nthreshold_p_value = 1.5\n", MINIMAL);
        assert!(EngineConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn negative_sigma_is_rejected() {
        let bad = format!("{}\n[continuous_rule]\nperturbation_sigma = -0.1\n", MINIMAL);
        assert!(EngineConfig::from_toml_str(&bad).is_err());
    }
}
