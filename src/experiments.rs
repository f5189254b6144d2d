use crate::drift::{detect_drift, DriftReport};
use crate::features::FeatureMatrix;
use crate::metrics::{calculate_metrics, EvaluationMetrics};
use crate::model::Regressor;
use anyhow::Result;
use density_common::DriftConfig;
use log::{info, warn};
use rand::prelude::*;
use rand_distr::Normal;

/// Result of one drift-and-retrain cycle.
#[derive(Debug, Clone)]
pub struct RetrainOutcome {
    pub report: DriftReport,
    /// Accuracy of the incumbent model on the drifted batch.
    pub degraded: EvaluationMetrics,
    /// Accuracy of the freshly trained model, present only when drift fired.
    pub retrained: Option<EvaluationMetrics>,
}

/// Perturbs a held-out batch with Gaussian noise, checks the first feature
/// column for distribution drift, and retrains a fresh model when drift is
/// detected.
///
/// Mirrors the production monitoring loop: the incumbent `model` is evaluated
/// on the drifted batch either way, and `make_model` supplies the replacement
/// candidate trained on the drifted features with the original labels.
pub fn simulate_drift_and_retrain(
    model: &dyn Regressor,
    holdout: &FeatureMatrix,
    config: &DriftConfig,
    seed: u64,
    make_model: impl Fn() -> Box<dyn Regressor>,
) -> Result<RetrainOutcome> {
    if holdout.is_empty() {
        anyhow::bail!("cannot simulate drift over an empty holdout batch");
    }
    info!(
        "Starting drift simulation over {} rows (noise level {}).",
        holdout.len(),
        config.noise_level
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, config.noise_level)?;
    let drifted_rows: Vec<Vec<f64>> = holdout
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v + rng.sample(noise)).collect())
        .collect();

    // KS test on the first feature column as the drift proxy.
    let reference = holdout.column(0);
    let candidate: Vec<f64> = drifted_rows.iter().map(|row| row[0]).collect();
    let report = detect_drift(&reference, &candidate, config.threshold_p_value)?;

    let degraded_preds = model.predict(&drifted_rows)?;
    let degraded = calculate_metrics(&holdout.targets, &degraded_preds)?;

    let retrained = if report.drift_detected {
        warn!(
            "Drift detected (p={:.4}); retraining on the drifted batch...",
            report.p_value
        );
        let mut replacement = make_model();
        replacement.fit(&drifted_rows, &holdout.targets)?;
        let preds = replacement.predict(&drifted_rows)?;
        Some(calculate_metrics(&holdout.targets, &preds)?)
    } else {
        info!("No significant drift detected; keeping the incumbent model.");
        None
    };

    Ok(RetrainOutcome {
        report,
        degraded,
        retrained,
    })
}

/// Applies a temporary multiplicative shock to a window of the series.
///
/// The window start is drawn uniformly; every value in it is scaled by
/// `1 + magnitude` (so a magnitude of -0.2 is a 20% drop).
pub fn apply_shock(
    series: &[f64],
    magnitude: f64,
    duration: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    if duration == 0 || duration >= series.len() {
        anyhow::bail!(
            "shock duration {} does not fit a series of length {}",
            duration,
            series.len()
        );
    }
    let start = rng.random_range(0..series.len() - duration);
    info!(
        "Applying shock of magnitude {} at index {} for {} steps.",
        magnitude, start, duration
    );

    let mut shocked = series.to_vec();
    for value in &mut shocked[start..start + duration] {
        *value *= 1.0 + magnitude;
    }
    Ok(shocked)
}

/// Simulates a future density trajectory as a multiplicative random walk with
/// occasional negative shocks.
pub fn simulate_trajectory(
    last_value: f64,
    steps: usize,
    shock_probability: f64,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    if !(0.0..=1.0).contains(&shock_probability) {
        anyhow::bail!(
            "invalid configuration: shock_probability must be in [0, 1] (got {})",
            shock_probability
        );
    }
    let drift = Normal::new(0.0, 0.05)?;
    let mut trajectory = Vec::with_capacity(steps);
    let mut current = last_value;
    for step in 0..steps {
        current *= 1.0 + rng.sample(drift);
        if rng.random::<f64>() < shock_probability {
            current *= 0.8;
            info!("Shock applied at step {}.", step);
        }
        trajectory.push(current);
    }
    Ok(trajectory)
}
