use anyhow::Result;
use density_common::{BoostedParams, ForestParams, ModelConfig, ModelKind};
use log::info;
use rand::prelude::*;
use rayon::prelude::*;

/// Opaque regressor contract: fit on a feature matrix, predict on another.
pub trait Regressor {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()>;
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>>;
    /// Normalized per-feature split-gain importances; `None` before fitting.
    fn feature_importances(&self) -> Option<Vec<f64>>;
}

/// Builds the configured backend with its hyperparameters.
pub fn build_model(kind: ModelKind, config: &ModelConfig, seed: u64) -> Box<dyn Regressor> {
    match kind {
        ModelKind::Forest => Box::new(RandomForestRegressor::from_params(&config.forest, seed)),
        ModelKind::Boosted => Box::new(GradientBoostedRegressor::from_params(&config.boosted)),
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Copy)]
struct TreeParams {
    max_depth: usize,
    min_samples_leaf: usize,
}

/// A variance-reduction regression tree over a dense feature matrix.
#[derive(Debug, Clone)]
struct RegressionTree {
    root: Node,
    /// Accumulated SSE reduction per feature, for importance reporting.
    split_gains: Vec<f64>,
}

impl RegressionTree {
    fn fit(x: &[Vec<f64>], y: &[f64], indices: Vec<usize>, n_features: usize, params: TreeParams) -> Self {
        let mut split_gains = vec![0.0; n_features];
        let root = grow(x, y, indices, 0, params, &mut split_gains);
        Self { root, split_gains }
    }

    fn predict_one(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

/// Recursively grows a tree node, splitting on the threshold with the largest
/// sum-of-squared-error reduction.
fn grow(
    x: &[Vec<f64>],
    y: &[f64],
    indices: Vec<usize>,
    depth: usize,
    params: TreeParams,
    split_gains: &mut Vec<f64>,
) -> Node {
    let node_mean = mean_of(y, &indices);
    if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf {
        return Node::Leaf { value: node_mean };
    }

    let n = indices.len() as f64;
    let node_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let node_sum_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let node_sse = node_sum_sq - node_sum * node_sum / n;
    if node_sse <= 1e-12 {
        return Node::Leaf { value: node_mean };
    }

    let n_features = x[0].len();
    let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, reduction)

    for feature in 0..n_features {
        let mut ordered: Vec<(f64, f64)> = indices.iter().map(|&i| (x[i][feature], y[i])).collect();
        ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut left_sum = 0.0;
        let mut left_sum_sq = 0.0;
        for split in 1..ordered.len() {
            let (value, target) = ordered[split - 1];
            left_sum += target;
            left_sum_sq += target * target;

            // Thresholds only between distinct feature values.
            if ordered[split].0 <= value {
                continue;
            }
            if split < params.min_samples_leaf || ordered.len() - split < params.min_samples_leaf {
                continue;
            }

            let n_left = split as f64;
            let n_right = (ordered.len() - split) as f64;
            let right_sum = node_sum - left_sum;
            let right_sum_sq = node_sum_sq - left_sum_sq;
            let left_sse = left_sum_sq - left_sum * left_sum / n_left;
            let right_sse = right_sum_sq - right_sum * right_sum / n_right;
            let reduction = node_sse - left_sse - right_sse;

            if reduction > best.map_or(1e-12, |(_, _, r)| r) {
                let threshold = (value + ordered[split].0) / 2.0;
                best = Some((feature, threshold, reduction));
            }
        }
    }

    let Some((feature, threshold, reduction)) = best else {
        return Node::Leaf { value: node_mean };
    };
    split_gains[feature] += reduction;

    let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| x[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(x, y, left_indices, depth + 1, params, split_gains)),
        right: Box::new(grow(x, y, right_indices, depth + 1, params, split_gains)),
    }
}

fn validate_training_batch(x: &[Vec<f64>], y: &[f64]) -> Result<usize> {
    if x.is_empty() {
        anyhow::bail!("cannot fit a model on an empty feature matrix");
    }
    if x.len() != y.len() {
        anyhow::bail!(
            "feature matrix has {} rows but {} targets were provided",
            x.len(),
            y.len()
        );
    }
    let n_features = x[0].len();
    if n_features == 0 {
        anyhow::bail!("feature matrix must have at least one column");
    }
    if x.iter().any(|row| row.len() != n_features) {
        anyhow::bail!("feature matrix rows have inconsistent widths");
    }
    Ok(n_features)
}

/// Bagged ensemble of regression trees (bootstrap sample per tree).
///
/// Defaults follow the source pipeline: 100 trees, max depth 10.
pub struct RandomForestRegressor {
    n_estimators: usize,
    tree_params: TreeParams,
    seed: u64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(n_estimators: usize, max_depth: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            tree_params: TreeParams {
                max_depth,
                min_samples_leaf: 1,
            },
            seed,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn from_params(params: &ForestParams, seed: u64) -> Self {
        Self::new(params.n_estimators, params.max_depth, seed)
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let n_features = validate_training_batch(x, y)?;
        let n_samples = x.len();
        let tree_params = self.tree_params;
        let seed = self.seed;

        info!(
            "Training random forest: {} trees, {} samples, {} features.",
            self.n_estimators, n_samples, n_features
        );

        // Trees are independent; train them in parallel with a deterministic
        // per-tree RNG derived from the base seed.
        self.trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(tree_idx as u64));
                let bootstrap: Vec<usize> =
                    (0..n_samples).map(|_| rng.random_range(0..n_samples)).collect();
                RegressionTree::fit(x, y, bootstrap, n_features, tree_params)
            })
            .collect();
        self.n_features = n_features;
        info!("Random forest training completed.");
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        if self.trees.is_empty() {
            anyhow::bail!("model has not been trained yet");
        }
        let inv = 1.0 / self.trees.len() as f64;
        Ok(x.iter()
            .map(|row| self.trees.iter().map(|t| t.predict_one(row)).sum::<f64>() * inv)
            .collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if self.trees.is_empty() {
            return None;
        }
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (total, gain) in totals.iter_mut().zip(tree.split_gains.iter()) {
                *total += gain;
            }
        }
        Some(normalize_importances(totals))
    }
}

/// Gradient-boosted regression trees fit to residuals with shrinkage.
///
/// Defaults follow the source pipeline: 100 rounds, max depth 6, learning
/// rate 0.1, mean-of-targets baseline.
pub struct GradientBoostedRegressor {
    n_estimators: usize,
    tree_params: TreeParams,
    learning_rate: f64,
    n_features: usize,
    baseline: f64,
    trees: Vec<RegressionTree>,
    fitted: bool,
}

impl GradientBoostedRegressor {
    pub fn new(n_estimators: usize, max_depth: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            tree_params: TreeParams {
                max_depth,
                min_samples_leaf: 1,
            },
            learning_rate,
            n_features: 0,
            baseline: 0.0,
            trees: Vec::new(),
            fitted: false,
        }
    }

    pub fn from_params(params: &BoostedParams) -> Self {
        Self::new(params.n_estimators, params.max_depth, params.learning_rate)
    }
}

impl Regressor for GradientBoostedRegressor {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let n_features = validate_training_batch(x, y)?;
        let n_samples = x.len();

        info!(
            "Training gradient-boosted trees: {} rounds, {} samples, {} features.",
            self.n_estimators, n_samples, n_features
        );

        self.baseline = y.iter().sum::<f64>() / n_samples as f64;
        self.trees = Vec::with_capacity(self.n_estimators);
        let mut current: Vec<f64> = vec![self.baseline; n_samples];

        for round in 0..self.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(current.iter()).map(|(t, p)| t - p).collect();
            if residuals.iter().all(|r| r.abs() < 1e-12) {
                info!("Residuals vanished after {} rounds; stopping early.", round);
                break;
            }
            let tree = RegressionTree::fit(
                x,
                &residuals,
                (0..n_samples).collect(),
                n_features,
                self.tree_params,
            );
            for (prediction, row) in current.iter_mut().zip(x.iter()) {
                *prediction += self.learning_rate * tree.predict_one(row);
            }
            self.trees.push(tree);
        }
        self.n_features = n_features;
        self.fitted = true;
        info!("Boosted training completed with {} trees.", self.trees.len());
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        if !self.fitted {
            anyhow::bail!("model has not been trained yet");
        }
        Ok(x.iter()
            .map(|row| {
                self.baseline
                    + self
                        .trees
                        .iter()
                        .map(|t| self.learning_rate * t.predict_one(row))
                        .sum::<f64>()
            })
            .collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.fitted {
            return None;
        }
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (total, gain) in totals.iter_mut().zip(tree.split_gains.iter()) {
                *total += gain;
            }
        }
        Some(normalize_importances(totals))
    }
}

fn normalize_importances(mut totals: Vec<f64>) -> Vec<f64> {
    let sum: f64 = totals.iter().sum();
    if sum > 0.0 {
        for v in totals.iter_mut() {
            *v /= sum;
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::calculate_metrics;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // Two clean plateaus split by a single threshold near 9.5.
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn predict_before_fit_is_an_error() {
        let forest = RandomForestRegressor::new(10, 4, 0);
        assert!(forest.predict(&[vec![1.0]]).is_err());
        let boosted = GradientBoostedRegressor::new(10, 2, 0.1);
        assert!(boosted.predict(&[vec![1.0]]).is_err());
    }

    #[test]
    fn mismatched_training_batches_are_rejected() {
        let mut forest = RandomForestRegressor::new(5, 3, 0);
        assert!(forest.fit(&[], &[]).is_err());
        assert!(forest.fit(&[vec![1.0]], &[1.0, 2.0]).is_err());
        assert!(forest.fit(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn forest_recovers_a_step_function() {
        let (x, y) = step_data();
        let mut forest = RandomForestRegressor::new(30, 4, 42);
        forest.fit(&x, &y).unwrap();
        let preds = forest.predict(&[vec![2.0], vec![17.0]]).unwrap();
        assert!((preds[0] - 1.0).abs() < 0.5);
        assert!((preds[1] - 5.0).abs() < 0.5);
    }

    #[test]
    fn forest_fits_are_reproducible_for_a_fixed_seed() {
        let (x, y) = step_data();
        let fit_and_predict = || {
            let mut forest = RandomForestRegressor::new(15, 4, 7);
            forest.fit(&x, &y).unwrap();
            forest.predict(&x).unwrap()
        };
        assert_eq!(fit_and_predict(), fit_and_predict());
    }

    #[test]
    fn boosting_beats_the_mean_baseline_on_training_data() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| 0.5 * i as f64 + 3.0).collect();
        let mut boosted = GradientBoostedRegressor::new(80, 3, 0.1);
        boosted.fit(&x, &y).unwrap();
        let preds = boosted.predict(&x).unwrap();

        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let baseline: Vec<f64> = vec![mean; y.len()];
        let model_rmse = calculate_metrics(&y, &preds).unwrap().rmse;
        let baseline_rmse = calculate_metrics(&y, &baseline).unwrap().rmse;
        assert!(model_rmse < baseline_rmse * 0.5);
    }

    #[test]
    fn constant_targets_produce_constant_predictions() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![2.5; 10];
        let mut boosted = GradientBoostedRegressor::new(20, 3, 0.1);
        boosted.fit(&x, &y).unwrap();
        let preds = boosted.predict(&[vec![3.0]]).unwrap();
        assert!((preds[0] - 2.5).abs() < 1e-9);
    }

    #[test]
    fn importances_favor_the_informative_feature() {
        // Target depends on feature 0 only; feature 1 is constant.
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { 10.0 }).collect();
        let mut forest = RandomForestRegressor::new(20, 3, 5);
        forest.fit(&x, &y).unwrap();
        let importances = forest.feature_importances().unwrap();
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
