use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Construction-time errors (classification, discretization, pattern
/// generation, instance-constraint resolution) are fatal: no partially
/// built problem is ever returned.  Evaluation-time shape errors are fatal
/// per call.
#[derive(Debug, Error)]
pub enum CollocationError {
    /// Malformed known data, grid, bounds or objective references.
    #[error("validation error: {0}")]
    Validation(String),
    /// Integration method name that is neither backward Euler nor midpoint.
    #[error("unsupported integration method: {0}")]
    UnsupportedMethod(String),
    /// Flat free vector or packed block of the wrong length.
    #[error("shape error: {0}")]
    Shape(String),
    /// Structured array shapes that disagree with the problem at evaluation time.
    #[error("dimension error: {0}")]
    Dimension(String),
    /// Instance constraint referencing an unsupported symbol or time.
    #[error("instance constraint error: {0}")]
    Constraint(String),
    /// Declared and produced Jacobian sizes disagree.  Always a bug in the
    /// formulation, never recoverable.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The reference solver driver failed.
    #[error("solver error: {0}")]
    Solver(String),
}

impl From<argmin::core::Error> for CollocationError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollocationError>;

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

pub const DEFAULT_BARRIER_SHARPNESS: f64 = 10.0;

// ─────────────────────────────────────────────────────────────
//  Bounds
// ─────────────────────────────────────────────────────────────

/// Lower / upper bounds on the flat free vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(num_free: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; num_free],
            upper: vec![f64::INFINITY; num_free],
        }
    }

    /// Overwrite `range` of both vectors with `(lower, upper)`.
    pub fn set_block(&mut self, range: std::ops::Range<usize>, lower: f64, upper: f64) {
        self.lower[range.clone()].fill(lower);
        self.upper[range].fill(upper);
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver options  (reference driver only)
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Iteration cap for each inner L-BFGS solve.
    pub max_iterations: usize,
    /// Number of L-BFGS correction pairs.
    pub lbfgs_memory: usize,
    /// Gradient-norm tolerance for the inner solves.
    pub gradient_tolerance: f64,
    pub barrier_weight: f64,
    pub barrier_sharpness: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            lbfgs_memory: 10,
            gradient_tolerance: 1e-8,
            barrier_weight: 1.0,
            barrier_sharpness: DEFAULT_BARRIER_SHARPNESS,
        }
    }
}

/// Settings for the augmented Lagrangian outer loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ALSettings {
    /// Initial penalty parameter μ.
    pub mu_init: f64,
    /// Multiplicative growth factor for μ each outer iteration.
    pub mu_factor: f64,
    /// Maximum value of μ.
    pub mu_max: f64,
    /// Maximum number of outer iterations.
    pub max_outer_iters: usize,
    /// Stop when max|c_k| < tol.
    pub constraint_tol: f64,
}

impl Default for ALSettings {
    fn default() -> Self {
        Self {
            mu_init: 10.0,
            mu_factor: 5.0,
            mu_max: 1e8,
            max_outer_iters: 20,
            constraint_tol: 1e-6,
        }
    }
}

/// Multiplier state carried between outer iterations.
#[derive(Debug, Clone)]
pub struct ALState {
    /// One multiplier per equality constraint.
    pub lambdas: Vec<f64>,
    pub mu: f64,
}

impl ALState {
    pub fn new(num_constraints: usize, settings: &ALSettings) -> Self {
        Self {
            lambdas: vec![0.0; num_constraints],
            mu: settings.mu_init,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver result
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Best free vector found.
    pub free: Vec<f64>,
    /// Objective value at `free` (without penalty or barrier terms).
    pub objective: f64,
    /// max|c_k(free)| over all equality constraints.
    pub constraint_max_violation: f64,
    /// Objective value after every outer iteration.
    pub objective_trace: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}
