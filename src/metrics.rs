use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};

/// Regression accuracy metrics for a prediction batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub rmse: f64,
    pub mae: f64,
    /// Symmetric mean absolute percentage error on the 0..200 scale.
    pub smape: f64,
}

/// Computes RMSE, MAE, and SMAPE over paired true/predicted values.
pub fn calculate_metrics(y_true: &[f64], y_pred: &[f64]) -> Result<EvaluationMetrics> {
    if y_true.is_empty() {
        anyhow::bail!("cannot compute metrics over an empty prediction batch");
    }
    if y_true.len() != y_pred.len() {
        anyhow::bail!(
            "prediction batch length mismatch: {} true values vs {} predictions",
            y_true.len(),
            y_pred.len()
        );
    }

    let n = y_true.len() as f64;
    let mut sq_sum = 0.0;
    let mut abs_sum = 0.0;
    let mut smape_sum = 0.0;

    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        let err = t - p;
        sq_sum += err * err;
        abs_sum += err.abs();

        // Pairs where both values are zero contribute nothing rather than NaN.
        let denominator = (t.abs() + p.abs()) / 200.0;
        if denominator > 0.0 {
            smape_sum += err.abs() / denominator;
        }
    }

    let metrics = EvaluationMetrics {
        rmse: (sq_sum / n).sqrt(),
        mae: abs_sum / n,
        smape: smape_sum / n,
    };
    info!(
        "Evaluation metrics: RMSE={:.6} MAE={:.6} SMAPE={:.4}",
        metrics.rmse, metrics.mae, metrics.smape
    );
    Ok(metrics)
}
