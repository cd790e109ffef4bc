//! NLP assembly: the callback surface a gradient-based NLP solver drives.
//!
//! ```text
//!   eom, states, known data ──► classify ──► layout
//!                                  │
//!                                  ├─► DiscreteResidual ──► ConstraintEvaluator ──► JacobianEvaluator
//!                                  ├─► InstanceConstraints (rows after the dynamics block)
//!                                  └─► bounds, objective
//! ```

use crate::constraints::ConstraintEvaluator;
use crate::discretize::{DiscreteResidual, Stencil};
use crate::instance::InstanceConstraints;
use crate::jacobian::{JacobianEvaluator, JacobianPattern};
use crate::layout::{merge_parameters, merge_trajectories, FreeLayout, FreeView};
use crate::objective::{Objective, ObjectiveContext, Zero};
use crate::residual::Residual;
use crate::symbols::{classify, Classification};
use crate::types::{Bounds, CollocationError, Result};
use log::debug;
use ndarray::{Array1, Array2};
use sprs::CsMat;
use std::rc::Rc;

// ─────────────────────────────────────────────────────────────
//  Callback contract
// ─────────────────────────────────────────────────────────────

/// The fixed set of callbacks an NLP solver needs.  All vectors are indexed
/// by the free-vector layout (variables) or by constraint row.
pub trait NlpProblem {
    fn num_variables(&self) -> usize;
    fn num_constraints(&self) -> usize;
    fn num_jacobian_nonzeros(&self) -> usize;

    fn objective(&self, free: &[f64]) -> Result<f64>;
    fn gradient(&self, free: &[f64]) -> Result<Vec<f64>>;
    fn constraints(&self, free: &[f64]) -> Result<Vec<f64>>;

    /// `(rows, cols)` of every Jacobian entry, fixed for the problem's lifetime.
    fn jacobian_structure(&self) -> (&[usize], &[usize]);
    /// Values in the order of [`jacobian_structure`](Self::jacobian_structure).
    fn jacobian_values(&self, free: &[f64]) -> Result<Vec<f64>>;

    fn variable_bounds(&self) -> (&[f64], &[f64]);
    /// Every constraint is an equality `c(free) = 0`.
    fn constraint_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let m = self.num_constraints();
        (vec![0.0; m], vec![0.0; m])
    }
}

// ─────────────────────────────────────────────────────────────
//  Builder
// ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ProblemBuilder {
    eom: Box<dyn Residual>,
    states: Vec<String>,
    num_nodes: usize,
    interval: f64,
    known_parameters: Vec<(String, f64)>,
    known_trajectories: Vec<(String, Vec<f64>)>,
    instance_constraints: Vec<Box<dyn Residual>>,
    stencil: Stencil,
    bounds: Vec<(String, f64, f64)>,
    objective: Option<Box<dyn Objective>>,
}

impl ProblemBuilder {
    pub fn new(
        eom: impl Residual + 'static,
        states: &[&str],
        num_nodes: usize,
        interval: f64,
    ) -> Self {
        Self {
            eom: Box::new(eom),
            states: states.iter().map(|s| s.to_string()).collect(),
            num_nodes,
            interval,
            known_parameters: Vec::new(),
            known_trajectories: Vec::new(),
            instance_constraints: Vec::new(),
            stencil: Stencil::default(),
            bounds: Vec::new(),
            objective: None,
        }
    }

    pub fn known_parameter(mut self, name: &str, value: f64) -> Self {
        self.known_parameters.push((name.to_string(), value));
        self
    }

    /// Specified trajectory sampled at every node.
    pub fn known_trajectory(mut self, name: &str, values: Vec<f64>) -> Self {
        self.known_trajectories.push((name.to_string(), values));
        self
    }

    pub fn instance_constraint(mut self, constraint: impl Residual + 'static) -> Self {
        self.instance_constraints.push(Box::new(constraint));
        self
    }

    pub fn stencil(mut self, stencil: Stencil) -> Self {
        self.stencil = stencil;
        self
    }

    /// `"backward euler"` or `"midpoint"`.
    pub fn integration_method(self, name: &str) -> Result<Self> {
        let stencil = name.parse()?;
        Ok(self.stencil(stencil))
    }

    /// Bound a state or unknown trajectory over all nodes, or an unknown
    /// parameter.
    pub fn bound(mut self, name: &str, lower: f64, upper: f64) -> Self {
        self.bounds.push((name.to_string(), lower, upper));
        self
    }

    pub fn objective(mut self, objective: impl Objective + 'static) -> Self {
        self.objective = Some(Box::new(objective));
        self
    }

    pub fn build(self) -> Result<CollocationProblem> {
        if self.num_nodes < 2 {
            return Err(CollocationError::Validation(format!(
                "at least 2 nodes are required, got {}",
                self.num_nodes
            )));
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(CollocationError::Validation(format!(
                "node interval must be positive and finite, got {}",
                self.interval
            )));
        }

        let classification = classify(
            self.eom.as_ref(),
            &self.states,
            &self.known_parameters,
            &self.known_trajectories,
            self.num_nodes,
        )?;
        let n = classification.num_states();
        let q = classification.unknown_trajectories.len();
        let r = classification.unknown_parameters.len();
        let layout = FreeLayout::new(n, q, r, self.num_nodes);

        let residual = Rc::new(DiscreteResidual::new(self.eom, &classification, self.stencil)?);
        let constraints = Rc::new(ConstraintEvaluator::new(
            residual,
            classification.num_trajectories(),
            classification.num_parameters(),
        ));
        let mut pattern = JacobianPattern::generate(self.stencil, n, q, r, self.num_nodes);
        let jacobian = JacobianEvaluator::new(Rc::clone(&constraints), pattern.nnz());

        let num_dynamics = n * (self.num_nodes - 1);
        let instance = InstanceConstraints::resolve(
            self.instance_constraints,
            &classification,
            &layout,
            self.interval,
            num_dynamics,
        )?;
        let (rows, cols) = instance.pattern();
        pattern.extend(rows, cols);

        let bounds = resolve_bounds(&self.bounds, &classification, &layout)?;

        let mut objective: Box<dyn Objective> = self.objective.unwrap_or_else(|| Box::new(Zero));
        objective.prepare(&ObjectiveContext {
            layout: &layout,
            interval: self.interval,
            classification: &classification,
        })?;

        debug!(
            "collocation problem: {} stencil, {} nodes, {} free variables, {} constraints, {} Jacobian nonzeros",
            self.stencil,
            self.num_nodes,
            layout.len(),
            num_dynamics + instance.len(),
            pattern.nnz()
        );

        Ok(CollocationProblem {
            classification,
            layout,
            stencil: self.stencil,
            interval: self.interval,
            constraints,
            jacobian,
            instance,
            pattern,
            bounds,
            objective,
        })
    }
}

fn resolve_bounds(
    requested: &[(String, f64, f64)],
    classes: &Classification,
    layout: &FreeLayout,
) -> Result<Bounds> {
    let mut bounds = Bounds::unbounded(layout.len());
    for (name, lo, hi) in requested {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(CollocationError::Validation(format!(
                "invalid bounds ({lo}, {hi}) on `{name}`"
            )));
        }
        let range = if let Some(j) = classes.state_index(name) {
            layout.state_block(j)
        } else if let Some(k) = classes.unknown_trajectory_index(name) {
            layout.trajectory_block(k)
        } else if let Some(k) = classes.unknown_parameter_index(name) {
            let i = layout.parameter_index(k);
            i..i + 1
        } else if classes.known_parameters.contains(name) || classes.known_trajectories.contains(name) {
            return Err(CollocationError::Validation(format!(
                "`{name}` is known and cannot be bounded"
            )));
        } else {
            return Err(CollocationError::Validation(format!(
                "bound on `{name}`, which does not appear in the equations of motion"
            )));
        };
        bounds.set_block(range, *lo, *hi);
    }
    Ok(bounds)
}

// ─────────────────────────────────────────────────────────────
//  Assembled problem
// ─────────────────────────────────────────────────────────────

/// Structured values at one free vector, with known data merged back in.
#[derive(Debug, Clone)]
pub struct Trajectories {
    pub free: FreeView,
    /// All trajectories in full (known, then unknown) order, `m × N`.
    pub trajectories: Array2<f64>,
    /// All parameters in full order.
    pub parameters: Array1<f64>,
}

#[derive(Debug)]
pub struct CollocationProblem {
    classification: Classification,
    layout: FreeLayout,
    stencil: Stencil,
    interval: f64,
    constraints: Rc<ConstraintEvaluator>,
    jacobian: JacobianEvaluator,
    instance: InstanceConstraints,
    pattern: JacobianPattern,
    bounds: Bounds,
    objective: Box<dyn Objective>,
}

impl CollocationProblem {
    pub fn layout(&self) -> &FreeLayout {
        &self.layout
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn stencil(&self) -> Stencil {
        self.stencil
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn instance_constraints(&self) -> &InstanceConstraints {
        &self.instance
    }

    pub fn jacobian_pattern(&self) -> &JacobianPattern {
        &self.pattern
    }

    /// `t_i = i·h`, `i = 0 … N−1`.
    pub fn node_times(&self) -> Vec<f64> {
        (0..self.layout.num_nodes).map(|i| i as f64 * self.interval).collect()
    }

    pub fn parse(&self, free: &[f64]) -> Result<FreeView> {
        self.layout.parse(free)
    }

    /// Parse `free` and merge known trajectories and parameters back in.
    pub fn trajectories(&self, free: &[f64]) -> Result<Trajectories> {
        let view = self.layout.parse(free)?;
        let classes = &self.classification;
        let trajectories = merge_trajectories(
            &classes.trajectories(),
            &classes.known_trajectories,
            classes.known_trajectory_values.view(),
            view.unknown_trajectories.view(),
            self.layout.num_nodes,
        )?;
        let parameters = merge_parameters(
            &classes.parameters(),
            &classes.known_parameters,
            &classes.known_parameter_values,
            view.unknown_parameters.view(),
        )?;
        Ok(Trajectories { free: view, trajectories, parameters })
    }

    /// The full constraint Jacobian as a sparse matrix.
    pub fn jacobian_matrix(&self, free: &[f64]) -> Result<CsMat<f64>> {
        let values = self.jacobian_values(free)?;
        self.pattern.to_csr(&values, (self.num_constraints(), self.num_variables()))
    }

    fn context(&self) -> ObjectiveContext<'_> {
        ObjectiveContext {
            layout: &self.layout,
            interval: self.interval,
            classification: &self.classification,
        }
    }

    fn check_len(&self, free: &[f64]) -> Result<()> {
        if free.len() != self.layout.len() {
            return Err(CollocationError::Shape(format!(
                "free vector has length {}, expected {}",
                free.len(),
                self.layout.len()
            )));
        }
        Ok(())
    }
}

impl NlpProblem for CollocationProblem {
    fn num_variables(&self) -> usize {
        self.layout.len()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_states * (self.layout.num_nodes - 1) + self.instance.len()
    }

    fn num_jacobian_nonzeros(&self) -> usize {
        self.pattern.nnz()
    }

    fn objective(&self, free: &[f64]) -> Result<f64> {
        self.check_len(free)?;
        Ok(self.objective.value(free, &self.context()))
    }

    fn gradient(&self, free: &[f64]) -> Result<Vec<f64>> {
        self.check_len(free)?;
        let mut grad = vec![0.0; free.len()];
        self.objective.gradient(free, &self.context(), &mut grad);
        Ok(grad)
    }

    fn constraints(&self, free: &[f64]) -> Result<Vec<f64>> {
        let t = self.trajectories(free)?;
        let mut out = self.constraints.evaluate(
            t.free.states.view(),
            t.trajectories.view(),
            t.parameters.view(),
            self.interval,
        )?;
        let start = out.len();
        out.resize(start + self.instance.len(), 0.0);
        self.instance.evaluate(free, &mut out[start..])?;
        Ok(out)
    }

    fn jacobian_structure(&self) -> (&[usize], &[usize]) {
        (self.pattern.rows(), self.pattern.cols())
    }

    fn jacobian_values(&self, free: &[f64]) -> Result<Vec<f64>> {
        let t = self.trajectories(free)?;
        let mut out = self.jacobian.values(
            t.free.states.view(),
            t.trajectories.view(),
            t.parameters.view(),
            self.interval,
        )?;
        let start = out.len();
        out.resize(start + self.instance.nnz(), 0.0);
        self.instance.jacobian_values(free, &mut out[start..])?;
        if out.len() != self.pattern.nnz() {
            return Err(CollocationError::InvariantViolation(format!(
                "produced {} Jacobian values, pattern declares {}",
                out.len(),
                self.pattern.nnz()
            )));
        }
        Ok(out)
    }

    fn variable_bounds(&self) -> (&[f64], &[f64]) {
        (&self.bounds.lower, &self.bounds.upper)
    }
}
