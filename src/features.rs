use crate::dataset::DensityRecord;
use anyhow::Result;
use log::info;
use rand::prelude::*;

/// A dense feature matrix with aligned targets and row identifiers.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub row_ids: Vec<String>,
}

impl FeatureMatrix {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Copies the selected rows into a new matrix.
    pub fn select(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            feature_names: self.feature_names.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
            row_ids: indices.iter().map(|&i| self.row_ids[i].clone()).collect(),
        }
    }

    /// Values of one feature column across all rows.
    pub fn column(&self, feature: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[feature]).collect()
    }
}

/// Builds lag and rolling-mean features for the density target, per county.
///
/// Records must already be sorted by (cfips, date), which
/// `dataset::clean_records` guarantees. For each observation the features are
/// the density `k` months back for every `k` in `lags`, the mean of the previous
/// `rolling_window` densities (the 1-shifted rolling mean), and the
/// observation's year and month. Rows missing the target or any feature are
/// dropped so the resulting matrix is dense.
pub fn build_feature_matrix(
    records: &[DensityRecord],
    lags: &[usize],
    rolling_window: usize,
) -> Result<FeatureMatrix> {
    if lags.is_empty() {
        anyhow::bail!("invalid configuration: at least one lag is required");
    }
    if lags.contains(&0) {
        anyhow::bail!("invalid configuration: lag 0 would leak the target");
    }
    if rolling_window == 0 {
        anyhow::bail!("invalid configuration: rolling_window must be positive");
    }

    let mut feature_names: Vec<String> = lags.iter().map(|k| format!("mbd_lag_{}", k)).collect();
    feature_names.push(format!("mbd_roll_mean_{}", rolling_window));
    feature_names.push("year".to_string());
    feature_names.push("month".to_string());

    let mut rows = Vec::new();
    let mut targets = Vec::new();
    let mut row_ids = Vec::new();

    let mut group_start = 0;
    while group_start < records.len() {
        let cfips = records[group_start].cfips;
        let mut group_end = group_start;
        while group_end < records.len() && records[group_end].cfips == cfips {
            group_end += 1;
        }
        let group = &records[group_start..group_end];

        for (offset, record) in group.iter().enumerate() {
            let Some(target) = record.density else {
                continue;
            };
            let Some(features) = row_features(group, offset, lags, rolling_window) else {
                continue;
            };
            let mut row = features;
            row.push(record.date.year as f64);
            row.push(record.date.month as f64);
            rows.push(row);
            targets.push(target);
            row_ids.push(record.row_id.clone());
        }
        group_start = group_end;
    }

    info!(
        "Feature engineering completed: {} usable rows, {} features.",
        rows.len(),
        feature_names.len()
    );
    Ok(FeatureMatrix {
        feature_names,
        rows,
        targets,
        row_ids,
    })
}

/// Lag and rolling-mean values for one observation, or `None` when the group
/// history is too short or has gaps.
fn row_features(
    group: &[DensityRecord],
    offset: usize,
    lags: &[usize],
    rolling_window: usize,
) -> Option<Vec<f64>> {
    let mut features = Vec::with_capacity(lags.len() + 1);
    for &lag in lags {
        let idx = offset.checked_sub(lag)?;
        features.push(group[idx].density?);
    }

    // Rolling mean over the window ending one observation back.
    let window_end = offset.checked_sub(1)?;
    let window_start = window_end.checked_sub(rolling_window - 1)?;
    let mut sum = 0.0;
    for record in &group[window_start..=window_end] {
        sum += record.density?;
    }
    features.push(sum / rolling_window as f64);
    Some(features)
}

/// Deterministic shuffled split of `n` row indices into (train, test).
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        anyhow::bail!(
            "invalid configuration: test_fraction must be in (0, 1) (got {})",
            test_fraction
        );
    }
    if n < 2 {
        anyhow::bail!("cannot split {} rows into train and test sets", n);
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_size = (((n as f64) * test_fraction).round() as usize).clamp(1, n - 1);
    let test = indices[..test_size].to_vec();
    let train = indices[test_size..].to_vec();
    Ok((train, test))
}
