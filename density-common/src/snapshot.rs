use serde::{Deserialize, Serialize};

/// A snapshot of the automaton grid at a specific step.
#[derive(Debug, Clone, Serialize, Deserialize)] // Derive traits for easy saving/loading
pub struct GridSnapshot {
    /// The step index this snapshot belongs to within the recorded history.
    pub step: u32,
    /// Grid height in cells.
    pub rows: u32,
    /// Grid width in cells.
    pub cols: u32,
    /// Cell values in row-major order, length `rows * cols`.
    /// Binary-rule grids hold 0.0/1.0; continuous-rule grids hold values in [0, 1].
    pub cells: Vec<f64>,
    /// Sum of all cell values, the per-step activity metric plotted downstream.
    pub total_activity: f64,
}
