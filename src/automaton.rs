use anyhow::Result;
use density_common::{BinaryRuleConfig, ContinuousRuleConfig, GridSnapshot};
use log::{debug, info};
use rand::prelude::*;
use rand_distr::Normal;

/// A 2D grid of scalar cell values with fixed dimensions, stored row-major.
///
/// Binary-rule simulations keep cells in {0.0, 1.0}; continuous-rule
/// simulations keep them clamped to [0.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<f64>,
}

impl Grid {
    /// Creates an all-zero grid. Fails on non-positive dimensions.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            anyhow::bail!(
                "invalid configuration: grid dimensions must be positive (got {}x{})",
                rows,
                cols
            );
        }
        Ok(Self {
            rows,
            cols,
            cells: vec![0.0; rows * cols],
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    #[inline(always)]
    fn idx(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[self.idx(row, col)]
    }

    #[inline(always)]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let idx = self.idx(row, col);
        self.cells[idx] = value;
    }

    /// Sum of all cell values (the activity series metric).
    pub fn total_activity(&self) -> f64 {
        self.cells.iter().sum()
    }

    /// Counts active (value > 0) cells in the 3x3 Moore neighborhood, excluding
    /// the center. The window is truncated at grid edges; no wraparound.
    pub fn active_neighbors(&self, row: usize, col: usize) -> u32 {
        let row_start = row.saturating_sub(1);
        let row_end = (row + 1).min(self.rows - 1);
        let col_start = col.saturating_sub(1);
        let col_end = (col + 1).min(self.cols - 1);

        let mut count = 0u32;
        for r in row_start..=row_end {
            for c in col_start..=col_end {
                if (r, c) != (row, col) && self.get(r, c) > 0.0 {
                    count += 1;
                }
            }
        }
        count
    }

    /// Sums the 8 Moore neighbors with toroidal wraparound at the edges,
    /// excluding the center cell.
    pub fn wrapped_neighbor_sum(&self, row: usize, col: usize) -> f64 {
        let up = (row + self.rows - 1) % self.rows;
        let down = (row + 1) % self.rows;
        let left = (col + self.cols - 1) % self.cols;
        let right = (col + 1) % self.cols;

        self.get(up, left)
            + self.get(up, col)
            + self.get(up, right)
            + self.get(row, left)
            + self.get(row, right)
            + self.get(down, left)
            + self.get(down, col)
            + self.get(down, right)
    }

    /// Converts the grid into a serializable snapshot for the given step index.
    pub fn to_snapshot(&self, step: u32) -> GridSnapshot {
        GridSnapshot {
            step,
            rows: self.rows as u32,
            cols: self.cols as u32,
            cells: self.cells.clone(),
            total_activity: self.total_activity(),
        }
    }
}

/// Where the simulator records a history entry relative to each transition.
///
/// The binary rule records the state *before* each step (a run of S steps
/// yields S entries and the final grid stays unrecorded, matching the source
/// behavior). The continuous rule records *after* each step, so a run yields
/// one entry per step on top of whatever initialization recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    BeforeStep,
    AfterStep,
}

/// A local cell-update rule: maps a grid snapshot to the next grid state.
///
/// All cell updates within one application are computed from the prior state
/// only; sibling updates from the same step are never observed.
pub trait UpdateRule {
    fn apply(&self, grid: &Grid, rng: &mut StdRng) -> Grid;
    fn snapshot_policy(&self) -> SnapshotPolicy;
}

/// Stochastic growth/decay rule over {0, 1} cells with truncated boundaries.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRule {
    p_growth: f64,
    p_decay: f64,
}

impl BinaryRule {
    pub fn new(p_growth: f64, p_decay: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&p_growth) || !(0.0..=1.0).contains(&p_decay) {
            anyhow::bail!(
                "invalid configuration: rule probabilities must be in [0, 1] (got p_growth={}, p_decay={})",
                p_growth,
                p_decay
            );
        }
        Ok(Self { p_growth, p_decay })
    }

    pub fn from_config(config: &BinaryRuleConfig) -> Result<Self> {
        Self::new(config.p_growth, config.p_decay)
    }
}

impl UpdateRule for BinaryRule {
    fn apply(&self, grid: &Grid, rng: &mut StdRng) -> Grid {
        let mut next = grid.clone();
        for row in 0..grid.rows() {
            for col in 0..grid.cols() {
                let neighbors = grid.active_neighbors(row, col);
                if grid.get(row, col) == 0.0 {
                    // Growth chance rises with active neighbors; the small base
                    // term lets isolated cells appear. The product is uncapped:
                    // values >= 1 always trigger since draws come from [0, 1).
                    let chance = self.p_growth * (neighbors as f64 + 0.1);
                    if rng.random::<f64>() < chance {
                        next.set(row, col, 1.0);
                    }
                } else if rng.random::<f64>() < self.p_decay {
                    next.set(row, col, 0.0);
                }
            }
        }
        next
    }

    fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::BeforeStep
    }
}

/// Additive growth rule over [0, 1] cells with toroidal boundaries, Gaussian
/// perturbation, and Bernoulli decay that halves selected cells.
#[derive(Debug, Clone, Copy)]
pub struct ContinuousRule {
    /// Inert knob carried over from the source rule set; the transition does
    /// not read it.
    #[allow(dead_code)]
    growth_threshold: f64,
    decay_probability: f64,
    noise: Normal<f64>,
}

impl ContinuousRule {
    pub fn new(growth_threshold: f64, decay_probability: f64, perturbation_sigma: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&decay_probability) {
            anyhow::bail!(
                "invalid configuration: decay_probability must be in [0, 1] (got {})",
                decay_probability
            );
        }
        if perturbation_sigma < 0.0 {
            anyhow::bail!(
                "invalid configuration: perturbation_sigma must be non-negative (got {})",
                perturbation_sigma
            );
        }
        let noise = Normal::new(0.0, perturbation_sigma)?;
        Ok(Self {
            growth_threshold,
            decay_probability,
            noise,
        })
    }

    pub fn from_config(config: &ContinuousRuleConfig) -> Result<Self> {
        Self::new(
            config.growth_threshold,
            config.decay_probability,
            config.perturbation_sigma,
        )
    }
}

impl UpdateRule for ContinuousRule {
    fn apply(&self, grid: &Grid, rng: &mut StdRng) -> Grid {
        let mut next = grid.clone();
        for row in 0..grid.rows() {
            for col in 0..grid.cols() {
                let neighbor_sum = grid.wrapped_neighbor_sum(row, col);
                let mut value =
                    grid.get(row, col) + (neighbor_sum / 8.0) * 0.1 + rng.sample(self.noise);
                if rng.random::<f64>() < self.decay_probability {
                    value *= 0.5;
                }
                next.set(row, col, value.clamp(0.0, 1.0));
            }
        }
        next
    }

    fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::AfterStep
    }
}

/// Owns a grid, its update rule, a seeded RNG, and the recorded history.
///
/// Each instance carries its own `StdRng` so parallel runs and tests never
/// share ambient random state; identical seeds reproduce identical runs.
pub struct GridSimulator<R: UpdateRule> {
    grid: Grid,
    rule: R,
    rng: StdRng,
    history: Vec<Grid>,
}

impl<R: UpdateRule> GridSimulator<R> {
    /// Creates a simulator over an all-zero `rows x cols` grid.
    pub fn new(rows: usize, cols: usize, rule: R, seed: u64) -> Result<Self> {
        Ok(Self {
            grid: Grid::new(rows, cols)?,
            rule,
            rng: StdRng::seed_from_u64(seed),
            history: Vec::new(),
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn history(&self) -> &[Grid] {
        &self.history
    }

    /// Sets each cell to 1 independently with probability `density`.
    pub fn initialize_random(&mut self, density: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&density) {
            anyhow::bail!(
                "invalid configuration: initial density must be in [0, 1] (got {})",
                density
            );
        }
        for row in 0..self.grid.rows() {
            for col in 0..self.grid.cols() {
                let active = self.rng.random::<f64>() < density;
                self.grid.set(row, col, if active { 1.0 } else { 0.0 });
            }
        }
        info!("Grid initialized randomly with density {}.", density);
        Ok(())
    }

    /// Maps an external value sequence onto the grid.
    ///
    /// Values are min-max normalized to [0, 1] and written row-major up to the
    /// grid length; remaining cells keep their previous value. The resulting
    /// state is recorded as a history entry. An empty sequence leaves the grid
    /// untouched.
    pub fn initialize_from_data(&mut self, values: &[f64]) {
        if !values.is_empty() {
            let cell_count = self.grid.rows() * self.grid.cols();
            let take = values.len().min(cell_count);
            let normalized = min_max_normalize(&values[..take]);
            for (i, v) in normalized.into_iter().enumerate() {
                let row = i / self.grid.cols();
                let col = i % self.grid.cols();
                self.grid.set(row, col, v);
            }
        }
        self.history.push(self.grid.clone());
        info!("Grid initialized from {} data values.", values.len());
    }

    /// Applies the update rule once without touching the history.
    pub fn step(&mut self) {
        self.grid = self.rule.apply(&self.grid, &mut self.rng);
    }

    /// Advances the simulation by `steps` transitions, recording history per
    /// the rule's snapshot policy, and returns the full recorded history.
    pub fn run(&mut self, steps: u32) -> &[Grid] {
        for step in 0..steps {
            match self.rule.snapshot_policy() {
                SnapshotPolicy::BeforeStep => {
                    self.history.push(self.grid.clone());
                    self.step();
                }
                SnapshotPolicy::AfterStep => {
                    self.step();
                    self.history.push(self.grid.clone());
                }
            }
            debug!("Automaton step {}/{} applied.", step + 1, steps);
        }
        info!("Simulation completed for {} steps.", steps);
        &self.history
    }

    /// Total activity of every recorded history entry, in order.
    pub fn activity_series(&self) -> Vec<f64> {
        self.history.iter().map(Grid::total_activity).collect()
    }

    /// Converts the recorded history into serializable snapshots.
    pub fn snapshots(&self) -> Vec<GridSnapshot> {
        self.history
            .iter()
            .enumerate()
            .map(|(i, grid)| grid.to_snapshot(i as u32))
            .collect()
    }
}

/// Min-max normalizes `values` into [0, 1].
///
/// The divisor is floored at a small epsilon so a constant sequence maps to
/// all zeros instead of NaN; non-degenerate ranges divide exactly.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = (max - min).max(1e-9);
    values.iter().map(|v| (v - min) / range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_ones(sim: &mut GridSimulator<BinaryRule>) {
        for row in 0..sim.grid.rows() {
            for col in 0..sim.grid.cols() {
                sim.grid.set(row, col, 1.0);
            }
        }
    }

    #[test]
    fn zero_dimension_grid_is_rejected() {
        assert!(Grid::new(0, 5).is_err());
        assert!(Grid::new(5, 0).is_err());
    }

    #[test]
    fn density_outside_unit_interval_is_rejected() {
        let rule = BinaryRule::new(0.05, 0.01).unwrap();
        let mut sim = GridSimulator::new(4, 4, rule, 1).unwrap();
        assert!(sim.initialize_random(1.5).is_err());
        assert!(sim.initialize_random(-0.1).is_err());
    }

    #[test]
    fn dimensions_are_invariant_across_a_run() {
        let rule = BinaryRule::new(0.2, 0.1).unwrap();
        let mut sim = GridSimulator::new(7, 5, rule, 9).unwrap();
        sim.initialize_random(0.4).unwrap();
        sim.run(20);
        assert_eq!(sim.grid().rows(), 7);
        assert_eq!(sim.grid().cols(), 5);
        for grid in sim.history() {
            assert_eq!(grid.rows(), 7);
            assert_eq!(grid.cols(), 5);
        }
    }

    #[test]
    fn binary_grid_is_invariant_under_disabled_rules() {
        let rule = BinaryRule::new(0.0, 0.0).unwrap();
        let mut sim = GridSimulator::new(6, 6, rule, 3).unwrap();
        sim.initialize_random(0.5).unwrap();
        let before = sim.grid().clone();
        sim.run(25);
        assert_eq!(sim.grid(), &before);
    }

    #[test]
    fn binary_cells_stay_zero_or_one() {
        let rule = BinaryRule::new(0.3, 0.2).unwrap();
        let mut sim = GridSimulator::new(8, 8, rule, 17).unwrap();
        sim.initialize_random(0.3).unwrap();
        sim.run(30);
        for &cell in sim.grid().cells() {
            assert!(cell == 0.0 || cell == 1.0);
        }
    }

    #[test]
    fn binary_history_length_equals_steps() {
        let rule = BinaryRule::new(0.1, 0.1).unwrap();
        let mut sim = GridSimulator::new(4, 4, rule, 5).unwrap();
        sim.initialize_random(0.5).unwrap();
        let history = sim.run(12);
        assert_eq!(history.len(), 12);
    }

    #[test]
    fn full_decay_empties_a_saturated_grid_in_one_step() {
        for seed in [0u64, 1, 42, 12345] {
            let rule = BinaryRule::new(0.0, 1.0).unwrap();
            let mut sim = GridSimulator::new(3, 3, rule, seed).unwrap();
            all_ones(&mut sim);
            sim.run(1);
            assert!(sim.grid().cells().iter().all(|&c| c == 0.0));
        }
    }

    #[test]
    fn continuous_cells_stay_in_unit_interval() {
        let rule = ContinuousRule::new(0.6, 0.05, 0.3).unwrap();
        let mut sim = GridSimulator::new(6, 6, rule, 11).unwrap();
        let data: Vec<f64> = (0..36).map(|i| i as f64).collect();
        sim.initialize_from_data(&data);
        sim.run(40);
        for grid in sim.history() {
            for &cell in grid.cells() {
                assert!((0.0..=1.0).contains(&cell));
            }
        }
    }

    #[test]
    fn continuous_history_includes_initial_snapshot() {
        let rule = ContinuousRule::new(0.6, 0.02, 0.05).unwrap();
        let mut sim = GridSimulator::new(5, 5, rule, 2).unwrap();
        sim.initialize_from_data(&[0.1, 0.7, 0.3]);
        let history = sim.run(9);
        assert_eq!(history.len(), 10);
    }

    #[test]
    fn zero_grid_without_noise_or_decay_stays_zero() {
        let rule = ContinuousRule::new(0.6, 0.0, 0.0).unwrap();
        let mut sim = GridSimulator::new(2, 2, rule, 7).unwrap();
        sim.run(15);
        assert!(sim.grid().cells().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn empty_data_sequence_is_a_noop_on_the_grid() {
        let rule = ContinuousRule::new(0.6, 0.02, 0.05).unwrap();
        let mut sim = GridSimulator::new(3, 3, rule, 1).unwrap();
        sim.initialize_from_data(&[]);
        assert!(sim.grid().cells().iter().all(|&c| c == 0.0));
        // The zero state is still recorded as the first history entry.
        assert_eq!(sim.history().len(), 1);
    }

    #[test]
    fn normalization_front_fills_the_grid() {
        let rule = ContinuousRule::new(0.6, 0.0, 0.0).unwrap();
        let mut sim = GridSimulator::new(2, 2, rule, 1).unwrap();
        sim.initialize_from_data(&[0.0, 5.0, 10.0]);
        let cells = sim.grid().cells();
        assert_eq!(cells[0], 0.0);
        assert_eq!(cells[1], 0.5);
        assert_eq!(cells[2], 1.0);
        // Fourth cell is beyond the data slice and keeps its previous value.
        assert_eq!(cells[3], 0.0);
    }

    #[test]
    fn constant_sequence_normalizes_to_zeros() {
        let normalized = min_max_normalize(&[3.5, 3.5, 3.5, 3.5]);
        assert!(normalized.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn identical_seeds_reproduce_identical_runs() {
        let run = |seed: u64| {
            let rule = BinaryRule::new(0.2, 0.1).unwrap();
            let mut sim = GridSimulator::new(5, 5, rule, seed).unwrap();
            sim.initialize_random(0.4).unwrap();
            sim.run(10);
            sim.grid().cells().to_vec()
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn truncated_neighbor_count_at_corners_and_interior() {
        let mut grid = Grid::new(3, 3).unwrap();
        for row in 0..3 {
            for col in 0..3 {
                grid.set(row, col, 1.0);
            }
        }
        assert_eq!(grid.active_neighbors(0, 0), 3);
        assert_eq!(grid.active_neighbors(0, 1), 5);
        assert_eq!(grid.active_neighbors(1, 1), 8);
    }

    #[test]
    fn wrapped_neighbor_sum_sees_opposite_edges() {
        let mut grid = Grid::new(3, 3).unwrap();
        grid.set(2, 2, 1.0);
        // (0, 0) wraps to reach (2, 2) diagonally.
        assert_eq!(grid.wrapped_neighbor_sum(0, 0), 1.0);
        // The center never wraps to itself.
        assert_eq!(grid.wrapped_neighbor_sum(2, 2), 0.0);
    }
}
