//! Reference NLP driver: augmented Lagrangian around `argmin` L-BFGS.
//!
//! Any [`NlpProblem`] can be handed to an external interior-point solver; this
//! driver exists so a problem can be solved end to end without one.
//!
//! ```text
//!   L(θ) = f(θ) + Σ_k λ_k c_k(θ) + (μ/2) Σ_k c_k(θ)² + w · barrier(θ)
//!   ∇L   = ∇f + Jᵀ(λ + μ c) + w · ∇barrier
//! ```
//!
//! Variable bounds enter through a softplus barrier on the finite entries.
//! Uses `Vec<f64>` as the argmin parameter type to avoid ndarray version
//! conflicts between our ndarray 0.16 and argmin-math's bundled ndarray.

use crate::problem::NlpProblem;
use crate::types::{ALSettings, ALState, CollocationError, Result, SolverOptions, SolverResult};
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use log::{debug, info};
use std::cell::RefCell;

// ─────────────────────────────────────────────────────────────
//  Softplus barrier
// ─────────────────────────────────────────────────────────────

/// Numerically stable log(1 + exp(z)).
#[inline]
fn log1pexp(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Smooth one-sided barrier.
/// `k < 0` ⟹  penalise x < b  (lower bound).
/// `k > 0` ⟹  penalise x > b  (upper bound).
#[inline]
pub fn softplus(x: f64, b: f64, k: f64) -> f64 {
    log1pexp(-k * (b - x) - 1.0)
}

/// d/dx softplus = k · σ(z)  where z = −k(b−x)−1.
#[inline]
pub fn softplus_grad(x: f64, b: f64, k: f64) -> f64 {
    let z = -k * (b - x) - 1.0;
    k / (1.0 + (-z).exp())
}

fn finite_indices(v: &[f64]) -> Vec<usize> {
    v.iter().enumerate().filter(|(_, x)| x.is_finite()).map(|(i, _)| i).collect()
}

// ─────────────────────────────────────────────────────────────
//  argmin problem wrapper
// ─────────────────────────────────────────────────────────────

/// The augmented Lagrangian of an [`NlpProblem`] for one inner solve.
///
/// argmin calls `cost(θ)` and `gradient(θ)` separately at the same θ; the
/// last `(θ, L, ∇L)` is cached so the constraint and Jacobian evaluations run
/// once per unique θ.
struct Lagrangian<'a> {
    problem: &'a dyn NlpProblem,
    al: ALState,
    options: &'a SolverOptions,
    lb_idx: Vec<usize>,
    ub_idx: Vec<usize>,
    last_eval: RefCell<Option<(Vec<f64>, f64, Vec<f64>)>>,
}

impl<'a> Lagrangian<'a> {
    fn new(problem: &'a dyn NlpProblem, al: ALState, options: &'a SolverOptions) -> Self {
        let (lower, upper) = problem.variable_bounds();
        Self {
            problem,
            al,
            options,
            lb_idx: finite_indices(lower),
            ub_idx: finite_indices(upper),
            last_eval: RefCell::new(None),
        }
    }

    fn value_and_gradient(&self, theta: &[f64]) -> Result<(f64, Vec<f64>)> {
        let p = self.problem;
        let mut value = p.objective(theta)?;
        let mut grad = p.gradient(theta)?;

        let c = p.constraints(theta)?;
        let weights: Vec<f64> = c
            .iter()
            .zip(&self.al.lambdas)
            .map(|(ck, lk)| lk + self.al.mu * ck)
            .collect();
        value += c
            .iter()
            .zip(&self.al.lambdas)
            .map(|(ck, lk)| lk * ck + 0.5 * self.al.mu * ck * ck)
            .sum::<f64>();

        let (rows, cols) = p.jacobian_structure();
        let jac = p.jacobian_values(theta)?;
        for ((&i, &j), v) in rows.iter().zip(cols).zip(&jac) {
            grad[j] += v * weights[i];
        }

        let (lower, upper) = p.variable_bounds();
        let (w, k) = (self.options.barrier_weight, self.options.barrier_sharpness);
        for &i in &self.lb_idx {
            value += w * softplus(theta[i], lower[i], -k);
            grad[i] += w * softplus_grad(theta[i], lower[i], -k);
        }
        for &i in &self.ub_idx {
            value += w * softplus(theta[i], upper[i], k);
            grad[i] += w * softplus_grad(theta[i], upper[i], k);
        }
        Ok((value, grad))
    }

    /// Ensure the cache holds results for `theta`.
    fn ensure_evaluated(&self, theta: &[f64]) -> std::result::Result<(), argmin::core::Error> {
        if let Some((t, _, _)) = self.last_eval.borrow().as_ref() {
            if t == theta {
                return Ok(());
            }
        }
        let (value, grad) = self
            .value_and_gradient(theta)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        *self.last_eval.borrow_mut() = Some((theta.to_vec(), value, grad));
        Ok(())
    }

    fn cached<T>(&self, pick: impl FnOnce(&(Vec<f64>, f64, Vec<f64>)) -> T) -> std::result::Result<T, argmin::core::Error> {
        self.last_eval
            .borrow()
            .as_ref()
            .map(pick)
            .ok_or_else(|| argmin::core::Error::msg("augmented Lagrangian cache is empty"))
    }
}

impl CostFunction for Lagrangian<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.ensure_evaluated(theta)?;
        self.cached(|e| e.1)
    }
}

impl Gradient for Lagrangian<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.ensure_evaluated(theta)?;
        self.cached(|e| e.2.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Inner L-BFGS solve
// ─────────────────────────────────────────────────────────────

/// One L-BFGS solve of the augmented Lagrangian at fixed `(λ, μ)`.
/// Returns the best parameters and the iteration count.
fn inner_lbfgs(
    problem: &dyn NlpProblem,
    init_param: Vec<f64>,
    al: ALState,
    options: &SolverOptions,
) -> Result<(Vec<f64>, usize)> {
    let lagrangian = Lagrangian::new(problem, al, options);

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, options.lbfgs_memory)
        .with_tolerance_grad(options.gradient_tolerance)?;

    let result = Executor::new(lagrangian, solver)
        .configure(|config| {
            config
                .param(init_param)
                .max_iters(options.max_iterations as u64)
                .target_cost(f64::NEG_INFINITY)
        })
        .run()?;

    let iterations = result.state().get_iter() as usize;
    let best = result
        .state()
        .get_best_param()
        .cloned()
        .ok_or_else(|| CollocationError::Solver("L-BFGS returned no best parameters".into()))?;
    Ok((best, iterations))
}

fn max_violation(c: &[f64]) -> f64 {
    c.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

// ─────────────────────────────────────────────────────────────
//  Outer loop
// ─────────────────────────────────────────────────────────────

/// Solve `min f(θ)  s.t.  c(θ) = 0,  lb ≤ θ ≤ ub` from `initial`.
///
/// After each inner solve:
///
///   λ_k ← λ_k + μ · c_k
///   μ   ← min(μ_max, α · μ)
///
/// Terminates when max|c_k| < constraint_tol or after `max_outer_iters`.
pub fn optimize(
    problem: &dyn NlpProblem,
    initial: &[f64],
    settings: &ALSettings,
    options: &SolverOptions,
) -> Result<SolverResult> {
    if initial.len() != problem.num_variables() {
        return Err(CollocationError::Dimension(format!(
            "initial guess has length {}, problem has {} variables",
            initial.len(),
            problem.num_variables()
        )));
    }

    let mut al = ALState::new(problem.num_constraints(), settings);
    let mut theta = initial.to_vec();
    let mut trace = Vec::new();
    let mut total_iters = 0usize;
    let mut viol = max_violation(&problem.constraints(&theta)?);
    let outer_iters = if problem.num_constraints() == 0 { 1 } else { settings.max_outer_iters };

    for outer in 0..outer_iters {
        let (best, iters) = inner_lbfgs(problem, theta, al.clone(), options)?;
        theta = best;
        total_iters += iters;

        let c = problem.constraints(&theta)?;
        viol = max_violation(&c);
        let f = problem.objective(&theta)?;
        trace.push(f);

        info!(
            "AL outer {}: f={:.6e}, μ={:.2e}, max_violation={:.4e}, |λ|_max={:.4e}",
            outer + 1,
            f,
            al.mu,
            viol,
            max_violation(&al.lambdas),
        );

        if viol < settings.constraint_tol {
            debug!("AL converged: constraints satisfied to {viol:.2e}");
            break;
        }

        for (l, ck) in al.lambdas.iter_mut().zip(&c) {
            *l += al.mu * ck;
        }
        al.mu = (al.mu * settings.mu_factor).min(settings.mu_max);
    }

    Ok(SolverResult {
        objective: problem.objective(&theta)?,
        free: theta,
        constraint_max_violation: viol,
        objective_trace: trace,
        iterations: total_iters,
        converged: viol < settings.constraint_tol,
    })
}
