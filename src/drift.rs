use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Outcome of a two-sample drift check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftReport {
    /// Kolmogorov-Smirnov statistic: the maximum distance between the two
    /// empirical distribution functions.
    pub statistic: f64,
    /// Asymptotic two-sided p-value for the statistic.
    pub p_value: f64,
    pub drift_detected: bool,
}

/// Two-sample Kolmogorov-Smirnov test.
///
/// Returns the KS statistic and its asymptotic two-sided p-value. Both
/// samples must be non-empty and free of NaN.
pub fn ks_2samp(sample_a: &[f64], sample_b: &[f64]) -> Result<(f64, f64)> {
    if sample_a.is_empty() || sample_b.is_empty() {
        anyhow::bail!("KS test requires two non-empty samples");
    }
    if sample_a.iter().chain(sample_b.iter()).any(|v| v.is_nan()) {
        anyhow::bail!("KS test samples must not contain NaN");
    }

    let mut a = sample_a.to_vec();
    let mut b = sample_b.to_vec();
    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let n_a = a.len() as f64;
    let n_b = b.len() as f64;
    let (mut i, mut j) = (0usize, 0usize);
    let mut statistic = 0.0f64;

    // Walk both sorted samples, tracking the ECDF gap at every data point.
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        let gap = (i as f64 / n_a - j as f64 / n_b).abs();
        if gap > statistic {
            statistic = gap;
        }
    }

    let effective_n = (n_a * n_b / (n_a + n_b)).sqrt();
    let lambda = (effective_n + 0.12 + 0.11 / effective_n) * statistic;
    Ok((statistic, ks_significance(lambda)))
}

/// Asymptotic KS significance Q(lambda) = 2 * sum_{k>=1} (-1)^{k-1} exp(-2 k^2 lambda^2).
fn ks_significance(lambda: f64) -> f64 {
    if lambda < 1e-8 {
        return 1.0;
    }
    let exponent = -2.0 * lambda * lambda;
    let mut sum = 0.0;
    let mut sign = 1.0;
    let mut previous_term = 0.0;
    for k in 1..=100 {
        let k = k as f64;
        let term = sign * 2.0 * (exponent * k * k).exp();
        sum += term;
        if term.abs() <= 1e-12 || term.abs() <= 1e-10 * previous_term {
            return sum.clamp(0.0, 1.0);
        }
        previous_term = term.abs();
        sign = -sign;
    }
    // Series failed to converge; report no significance.
    1.0
}

/// Compares a reference distribution against new data and flags drift when the
/// KS p-value falls below `alpha`.
pub fn detect_drift(reference: &[f64], candidate: &[f64], alpha: f64) -> Result<DriftReport> {
    if !(0.0..=1.0).contains(&alpha) {
        anyhow::bail!("invalid configuration: alpha must be in [0, 1] (got {})", alpha);
    }
    info!("Performing KS test for drift detection...");
    let (statistic, p_value) = ks_2samp(reference, candidate)?;
    let drift_detected = p_value < alpha;

    if drift_detected {
        warn!("Drift DETECTED! p-value: {:.5} < alpha: {}", p_value, alpha);
    } else {
        info!("No drift detected. p-value: {:.5}", p_value);
    }

    Ok(DriftReport {
        statistic,
        p_value,
        drift_detected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_samples_show_no_drift() {
        let sample: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        let report = detect_drift(&sample, &sample, 0.05).unwrap();
        assert_eq!(report.statistic, 0.0);
        assert!(report.p_value > 0.99);
        assert!(!report.drift_detected);
    }

    #[test]
    fn disjoint_samples_show_maximal_drift() {
        let low: Vec<f64> = (0..80).map(|i| i as f64 * 0.01).collect();
        let high: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 0.01).collect();
        let report = detect_drift(&low, &high, 0.05).unwrap();
        assert_eq!(report.statistic, 1.0);
        assert!(report.p_value < 1e-6);
        assert!(report.drift_detected);
    }

    #[test]
    fn statistic_matches_a_hand_computed_case() {
        // ECDF gap peaks at 0.5 (e.g. just past x=2: 2/4 vs 0/4).
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.5, 3.5, 4.5, 5.5];
        let (stat, _) = ks_2samp(&a, &b).unwrap();
        assert!((stat - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_samples_are_rejected() {
        assert!(ks_2samp(&[], &[1.0]).is_err());
        assert!(ks_2samp(&[1.0], &[]).is_err());
    }

    #[test]
    fn nan_samples_are_rejected() {
        assert!(ks_2samp(&[f64::NAN], &[1.0]).is_err());
    }
}
