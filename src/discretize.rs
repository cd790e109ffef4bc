//! Discretization of the continuous equations of motion.
//!
//! The stencil is chosen once at construction.  Both stencils relate a
//! *current* and an *adjacent* node:
//!
//! ```text
//!   backward Euler   ẋ ≈ (x_i − x_{i−1}) / h     x ≈ x_i              u ≈ u_i
//!                    constraint nodes i = 1 … N−1, adjacent = i−1
//!
//!   midpoint         ẋ ≈ (x_{i+1} − x_i) / h     x ≈ (x_i + x_{i+1})/2  u ≈ (u_i + u_{i+1})/2
//!                    constraint nodes i = 0 … N−2, adjacent = i+1
//! ```
//!
//! The discrete residual is the continuous [`Residual`] composed with these
//! substitutions; its partials follow from the continuous Jacobian by the
//! chain rule, so no further differentiation is needed.

use crate::residual::{Residual, Variable};
use crate::symbols::Classification;
use crate::types::{CollocationError, Result};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────
//  Stencil
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stencil {
    #[default]
    BackwardEuler,
    Midpoint,
}

impl FromStr for Stencil {
    type Err = CollocationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backward euler" | "backward_euler" => Ok(Self::BackwardEuler),
            "midpoint" => Ok(Self::Midpoint),
            _ => Err(CollocationError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Stencil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackwardEuler => write!(f, "backward euler"),
            Self::Midpoint => write!(f, "midpoint"),
        }
    }
}

impl Stencil {
    /// Grid node playing the "current" role for constraint index `c`
    /// (`0 ≤ c < N−1`).
    pub fn current_node(self, c: usize) -> usize {
        match self {
            Self::BackwardEuler => c + 1,
            Self::Midpoint => c,
        }
    }

    /// Grid node playing the "adjacent" role for constraint index `c`.
    pub fn adjacent_node(self, c: usize) -> usize {
        match self {
            Self::BackwardEuler => c,
            Self::Midpoint => c + 1,
        }
    }

    /// Whether trajectories are also sampled at the adjacent node.
    pub fn averages_trajectories(self) -> bool {
        matches!(self, Self::Midpoint)
    }

    /// Length of the `wrt` list: partial derivatives per state row.
    pub fn partials_per_state(self, n: usize, q: usize, r: usize) -> usize {
        match self {
            Self::BackwardEuler => 2 * n + q + r,
            Self::Midpoint => 2 * n + 2 * q + r,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Discrete residual
// ─────────────────────────────────────────────────────────────

/// Where a continuous variable gets its value from.  Indices are into the
/// state list and the full (known ++ unknown) trajectory / parameter orders.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Derivative(usize),
    State(usize),
    Trajectory(usize),
    Parameter(usize),
}

#[derive(Debug)]
struct Scratch {
    args: Vec<f64>,
    jac: Vec<f64>,
}

/// The equations of motion rewritten over one pair of grid nodes.
///
/// Declared argument order:
///
/// ```text
/// [x_cur (n), x_adj (n), u_cur (m), u_next (m, midpoint only), p (p), h]
/// ```
///
/// Partial derivative (`wrt`) order:
///
/// ```text
/// [x_cur (n), x_adj (n), u_cur unknown (q), u_next unknown (q, midpoint only), p unknown (r)]
/// ```
#[derive(Debug)]
pub struct DiscreteResidual {
    eom: Box<dyn Residual>,
    slots: Vec<Slot>,
    stencil: Stencil,
    num_states: usize,
    num_trajectories: usize,
    num_known_trajectories: usize,
    num_parameters: usize,
    num_known_parameters: usize,
    num_unknown_trajectories: usize,
    num_unknown_parameters: usize,
    scratch: RefCell<Scratch>,
}

impl DiscreteResidual {
    pub fn new(eom: Box<dyn Residual>, classes: &Classification, stencil: Stencil) -> Result<Self> {
        let mut slots = Vec::with_capacity(eom.variables().len());
        for var in eom.variables() {
            let missing = || {
                CollocationError::Validation(format!("{var} was not classified; classify the same equations"))
            };
            let slot = match var {
                Variable::Derivative(name) => {
                    Slot::Derivative(classes.state_index(name).ok_or_else(missing)?)
                }
                Variable::Function(name) => match classes.state_index(name) {
                    Some(j) => Slot::State(j),
                    None => Slot::Trajectory(classes.trajectory_position(name).ok_or_else(missing)?),
                },
                Variable::Constant(name) => {
                    Slot::Parameter(classes.parameter_position(name).ok_or_else(missing)?)
                }
                Variable::Instant { .. } => return Err(missing()),
            };
            slots.push(slot);
        }

        let num_vars = slots.len();
        let num_states = classes.num_states();
        Ok(Self {
            scratch: RefCell::new(Scratch {
                args: vec![0.0; num_vars],
                jac: vec![0.0; num_states * num_vars],
            }),
            eom,
            slots,
            stencil,
            num_states,
            num_trajectories: classes.num_trajectories(),
            num_known_trajectories: classes.known_trajectories.len(),
            num_parameters: classes.num_parameters(),
            num_known_parameters: classes.known_parameters.len(),
            num_unknown_trajectories: classes.unknown_trajectories.len(),
            num_unknown_parameters: classes.unknown_parameters.len(),
        })
    }

    pub fn stencil(&self) -> Stencil {
        self.stencil
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Length of the declared argument list.
    pub fn num_args(&self) -> usize {
        let traj_blocks = if self.stencil.averages_trajectories() { 2 } else { 1 };
        2 * self.num_states + traj_blocks * self.num_trajectories + self.num_parameters + 1
    }

    /// Length of the `wrt` list.
    pub fn num_partials(&self) -> usize {
        self.stencil.partials_per_state(
            self.num_states,
            self.num_unknown_trajectories,
            self.num_unknown_parameters,
        )
    }

    fn parameter_offset(&self) -> usize {
        let traj_blocks = if self.stencil.averages_trajectories() { 2 } else { 1 };
        2 * self.num_states + traj_blocks * self.num_trajectories
    }

    /// Fill `buf` (len `num_args()`) with the declared arguments for
    /// constraint index `c`.  `trajectories` and `parameters` are in full
    /// (known, then unknown) order.
    pub fn node_args(
        &self,
        states: ArrayView2<f64>,
        trajectories: ArrayView2<f64>,
        parameters: ArrayView1<f64>,
        h: f64,
        c: usize,
        buf: &mut [f64],
    ) {
        let cur = self.stencil.current_node(c);
        let adj = self.stencil.adjacent_node(c);
        let mut k = 0;
        for node in [cur, adj] {
            for v in states.column(node) {
                buf[k] = *v;
                k += 1;
            }
        }
        let sampled = match (self.num_trajectories, self.stencil.averages_trajectories()) {
            (0, _) => 0,
            (_, true) => 2,
            (_, false) => 1,
        };
        for &node in &[cur, adj][..sampled] {
            for v in trajectories.column(node) {
                buf[k] = *v;
                k += 1;
            }
        }
        for v in parameters {
            buf[k] = *v;
            k += 1;
        }
        buf[k] = h;
    }

    /// Substitute the stencil into the continuous argument list.
    fn continuous_args(&self, args: &[f64], cont: &mut [f64]) {
        let n = self.num_states;
        let m = self.num_trajectories;
        let p0 = self.parameter_offset();
        let h = args[p0 + self.num_parameters];
        let x_cur = &args[..n];
        let x_adj = &args[n..2 * n];
        let u_cur = &args[2 * n..2 * n + m];

        for (c, slot) in cont.iter_mut().zip(&self.slots) {
            *c = match (self.stencil, *slot) {
                (Stencil::BackwardEuler, Slot::Derivative(j)) => (x_cur[j] - x_adj[j]) / h,
                (Stencil::BackwardEuler, Slot::State(j)) => x_cur[j],
                (Stencil::BackwardEuler, Slot::Trajectory(k)) => u_cur[k],
                (Stencil::Midpoint, Slot::Derivative(j)) => (x_adj[j] - x_cur[j]) / h,
                (Stencil::Midpoint, Slot::State(j)) => 0.5 * (x_cur[j] + x_adj[j]),
                (Stencil::Midpoint, Slot::Trajectory(k)) => 0.5 * (u_cur[k] + args[2 * n + m + k]),
                (_, Slot::Parameter(k)) => args[p0 + k],
            };
        }
    }

    /// Residuals of all n equations at one node pair.
    pub fn evaluate(&self, args: &[f64], out: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        self.continuous_args(args, &mut scratch.args);
        self.eom.evaluate(&scratch.args, out);
    }

    /// Dense `n × num_partials()` row-major partial derivatives at one node
    /// pair, in `wrt` order.
    pub fn partials(&self, args: &[f64], out: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        let Scratch { args: cont, jac } = &mut *scratch;
        self.continuous_args(args, cont);
        self.eom.jacobian(cont, jac);

        let n = self.num_states;
        let q = self.num_unknown_trajectories;
        let h = args[self.parameter_offset() + self.num_parameters];
        let width = self.num_partials();
        let nv = self.slots.len();
        let traj_cols = if self.stencil.averages_trajectories() { 2 * q } else { q };
        let par0 = 2 * n + traj_cols;

        out.fill(0.0);
        for e in 0..n {
            let row = &mut out[e * width..(e + 1) * width];
            for (v, slot) in self.slots.iter().enumerate() {
                let d = jac[e * nv + v];
                if d == 0.0 {
                    continue;
                }
                match (self.stencil, *slot) {
                    (Stencil::BackwardEuler, Slot::Derivative(j)) => {
                        row[j] += d / h;
                        row[n + j] -= d / h;
                    }
                    (Stencil::BackwardEuler, Slot::State(j)) => row[j] += d,
                    (Stencil::Midpoint, Slot::Derivative(j)) => {
                        row[j] -= d / h;
                        row[n + j] += d / h;
                    }
                    (Stencil::Midpoint, Slot::State(j)) => {
                        row[j] += 0.5 * d;
                        row[n + j] += 0.5 * d;
                    }
                    (stencil, Slot::Trajectory(k)) => {
                        // Known trajectories are not free variables.
                        if k < self.num_known_trajectories {
                            continue;
                        }
                        let ku = k - self.num_known_trajectories;
                        if stencil.averages_trajectories() {
                            row[2 * n + ku] += 0.5 * d;
                            row[2 * n + q + ku] += 0.5 * d;
                        } else {
                            row[2 * n + ku] += d;
                        }
                    }
                    (_, Slot::Parameter(k)) => {
                        if k >= self.num_known_parameters {
                            row[par0 + k - self.num_known_parameters] += d;
                        }
                    }
                }
            }
        }
    }
}
