//! Free-variable vector layout.
//!
//! ```text
//!   [ x_1(t_0 … t_{N−1}) | … | x_n(…) | u_1(t_0 … t_{N−1}) | … | u_q(…) | p_1 … p_r ]
//!     └──────── n·N ────────────────┘ └──────────── q·N ─────────────┘ └─── r ──┘
//! ```
//!
//! Every evaluator and the bound assignment go through these offsets.

use crate::types::{CollocationError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeLayout {
    pub num_states: usize,
    pub num_unknown_trajectories: usize,
    pub num_unknown_parameters: usize,
    pub num_nodes: usize,
}

/// Structured view of a flat free vector (owned copies).
#[derive(Debug, Clone, PartialEq)]
pub struct FreeView {
    /// `n × N`
    pub states: Array2<f64>,
    /// `q × N`, `0 × N` when there are no unknown trajectories.
    pub unknown_trajectories: Array2<f64>,
    /// `r`
    pub unknown_parameters: Array1<f64>,
}

impl FreeLayout {
    pub fn new(
        num_states: usize,
        num_unknown_trajectories: usize,
        num_unknown_parameters: usize,
        num_nodes: usize,
    ) -> Self {
        Self { num_states, num_unknown_trajectories, num_unknown_parameters, num_nodes }
    }

    /// `n·N + q·N + r`
    pub fn len(&self) -> usize {
        (self.num_states + self.num_unknown_trajectories) * self.num_nodes + self.num_unknown_parameters
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn state_index(&self, state: usize, node: usize) -> usize {
        state * self.num_nodes + node
    }

    #[inline]
    pub fn trajectory_index(&self, trajectory: usize, node: usize) -> usize {
        (self.num_states + trajectory) * self.num_nodes + node
    }

    #[inline]
    pub fn parameter_index(&self, parameter: usize) -> usize {
        (self.num_states + self.num_unknown_trajectories) * self.num_nodes + parameter
    }

    pub fn state_block(&self, state: usize) -> Range<usize> {
        let start = self.state_index(state, 0);
        start..start + self.num_nodes
    }

    pub fn trajectory_block(&self, trajectory: usize) -> Range<usize> {
        let start = self.trajectory_index(trajectory, 0);
        start..start + self.num_nodes
    }

    pub fn parameter_block(&self) -> Range<usize> {
        let start = self.parameter_index(0);
        start..start + self.num_unknown_parameters
    }

    fn check_len(&self, free: &[f64]) -> Result<()> {
        if free.len() != self.len() {
            return Err(CollocationError::Shape(format!(
                "free vector has length {}, expected {} (n={}, q={}, r={}, N={})",
                free.len(),
                self.len(),
                self.num_states,
                self.num_unknown_trajectories,
                self.num_unknown_parameters,
                self.num_nodes
            )));
        }
        Ok(())
    }

    /// Split a flat free vector into states, unknown trajectories and
    /// unknown parameters.
    pub fn parse(&self, free: &[f64]) -> Result<FreeView> {
        self.check_len(free)?;
        let nn = self.num_nodes;
        let n_state = self.num_states * nn;
        let n_traj = self.num_unknown_trajectories * nn;

        let to_shape = |rows: usize, data: &[f64]| {
            Array2::from_shape_vec((rows, nn), data.to_vec())
                .map_err(|e| CollocationError::Shape(e.to_string()))
        };
        Ok(FreeView {
            states: to_shape(self.num_states, &free[..n_state])?,
            unknown_trajectories: to_shape(self.num_unknown_trajectories, &free[n_state..n_state + n_traj])?,
            unknown_parameters: Array1::from(free[n_state + n_traj..].to_vec()),
        })
    }

    /// Inverse of [`parse`](Self::parse).
    pub fn pack(
        &self,
        states: ArrayView2<f64>,
        unknown_trajectories: ArrayView2<f64>,
        unknown_parameters: ArrayView1<f64>,
    ) -> Result<Vec<f64>> {
        let nn = self.num_nodes;
        if states.dim() != (self.num_states, nn) {
            return Err(CollocationError::Shape(format!(
                "states have shape {:?}, expected ({}, {nn})",
                states.dim(),
                self.num_states
            )));
        }
        // An empty trajectory block may come in as (0, anything).
        let traj_ok = unknown_trajectories.dim() == (self.num_unknown_trajectories, nn)
            || (self.num_unknown_trajectories == 0 && unknown_trajectories.nrows() == 0);
        if !traj_ok {
            return Err(CollocationError::Shape(format!(
                "unknown trajectories have shape {:?}, expected ({}, {nn})",
                unknown_trajectories.dim(),
                self.num_unknown_trajectories
            )));
        }
        if unknown_parameters.len() != self.num_unknown_parameters {
            return Err(CollocationError::Shape(format!(
                "{} unknown parameters given, expected {}",
                unknown_parameters.len(),
                self.num_unknown_parameters
            )));
        }

        let mut free = Vec::with_capacity(self.len());
        free.extend(states.iter());
        free.extend(unknown_trajectories.iter());
        free.extend(unknown_parameters.iter());
        Ok(free)
    }
}

// ─────────────────────────────────────────────────────────────
//  Merging known and free values
// ─────────────────────────────────────────────────────────────

/// Build the full `m × N` trajectory array in `order`, taking rows of
/// `known` for names in `known_names` and consuming rows of `free` in order
/// for every other name.
pub fn merge_trajectories(
    order: &[String],
    known_names: &[String],
    known: ArrayView2<f64>,
    free: ArrayView2<f64>,
    num_nodes: usize,
) -> Result<Array2<f64>> {
    let mut merged = Array2::zeros((order.len(), num_nodes));
    let mut next_free = 0;
    for (row, name) in order.iter().enumerate() {
        let source = match known_names.iter().position(|k| k == name) {
            Some(i) => known.row(i),
            None => {
                if next_free >= free.nrows() {
                    return Err(CollocationError::Shape(format!(
                        "no free values left for trajectory `{name}`"
                    )));
                }
                next_free += 1;
                free.row(next_free - 1)
            }
        };
        if source.len() != num_nodes {
            return Err(CollocationError::Shape(format!(
                "trajectory `{name}` has {} samples, expected {num_nodes}",
                source.len()
            )));
        }
        merged.row_mut(row).assign(&source);
    }
    if next_free != free.nrows() {
        return Err(CollocationError::Shape(format!(
            "{} free trajectories given, {} used",
            free.nrows(),
            next_free
        )));
    }
    Ok(merged)
}

/// Build the full parameter array in `order` from known values and free
/// values (consumed in order).
pub fn merge_parameters(
    order: &[String],
    known_names: &[String],
    known: &[f64],
    free: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    let mut merged = Array1::zeros(order.len());
    let mut next_free = 0;
    for (i, name) in order.iter().enumerate() {
        merged[i] = match known_names.iter().position(|k| k == name) {
            Some(k) => known[k],
            None => {
                let v = *free.get(next_free).ok_or_else(|| {
                    CollocationError::Shape(format!("no free value left for parameter `{name}`"))
                })?;
                next_free += 1;
                v
            }
        };
    }
    if next_free != free.len() {
        return Err(CollocationError::Shape(format!(
            "{} free parameters given, {} used",
            free.len(),
            next_free
        )));
    }
    Ok(merged)
}
