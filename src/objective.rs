//! Objective functions over the free vector.
//!
//! Each objective returns a scalar and writes its full gradient.  Custom
//! objectives implement [`Objective`] directly or wrap closures in
//! [`FnObjective`].

use crate::layout::FreeLayout;
use crate::symbols::Classification;
use crate::types::{CollocationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::ops::Range;

/// Everything an objective may need besides the free vector.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveContext<'a> {
    pub layout: &'a FreeLayout,
    pub interval: f64,
    pub classification: &'a Classification,
}

/// Trait implemented by all objective types.
pub trait Objective: Debug + Send + Sync {
    /// Scalar value.
    fn value(&self, free: &[f64], ctx: &ObjectiveContext) -> f64;

    /// Overwrite `grad` (same length as `free`) with the gradient.
    fn gradient(&self, free: &[f64], ctx: &ObjectiveContext, grad: &mut [f64]);

    /// Called once when the problem is built, before any evaluation.  Name
    /// lookups belong here.
    fn prepare(&mut self, _ctx: &ObjectiveContext) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Targets
// ─────────────────────────────────────────────────────────────

/// A free quantity selected by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Target {
    State(String),
    Trajectory(String),
    Parameter(String),
}

impl Target {
    /// Free-vector slots covered by this target.
    pub fn indices(&self, ctx: &ObjectiveContext) -> Result<Vec<usize>> {
        let classes = ctx.classification;
        let found: Option<Vec<usize>> = match self {
            Self::State(name) => classes.state_index(name).map(|j| ctx.layout.state_block(j).collect()),
            Self::Trajectory(name) => classes
                .unknown_trajectory_index(name)
                .map(|k| ctx.layout.trajectory_block(k).collect()),
            Self::Parameter(name) => classes
                .unknown_parameter_index(name)
                .map(|k| vec![ctx.layout.parameter_index(k)]),
        };
        found.ok_or_else(|| CollocationError::Validation(format!("objective target {self} is not a free quantity")))
    }

    fn is_parameter(&self) -> bool {
        matches!(self, Self::Parameter(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(n) => write!(f, "state `{n}`"),
            Self::Trajectory(n) => write!(f, "trajectory `{n}`"),
            Self::Parameter(n) => write!(f, "parameter `{n}`"),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Built-in objectives
// ─────────────────────────────────────────────────────────────

/// `w·h·Σ v_i²` over a state or unknown trajectory, `w·v²` for an unknown
/// parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedSquare {
    pub weight: f64,
    pub target: Target,
    #[serde(skip)]
    indices: Vec<usize>,
}

impl IntegratedSquare {
    pub fn new(weight: f64, target: Target) -> Self {
        Self { weight, target, indices: Vec::new() }
    }

    fn scale(&self, ctx: &ObjectiveContext) -> f64 {
        if self.target.is_parameter() {
            self.weight
        } else {
            self.weight * ctx.interval
        }
    }
}

impl Objective for IntegratedSquare {
    fn value(&self, free: &[f64], ctx: &ObjectiveContext) -> f64 {
        self.scale(ctx) * self.indices.iter().map(|&i| free[i] * free[i]).sum::<f64>()
    }

    fn gradient(&self, free: &[f64], ctx: &ObjectiveContext, grad: &mut [f64]) {
        grad.fill(0.0);
        let s = 2.0 * self.scale(ctx);
        for &i in &self.indices {
            grad[i] = s * free[i];
        }
    }

    fn prepare(&mut self, ctx: &ObjectiveContext) -> Result<()> {
        self.indices = self.target.indices(ctx)?;
        Ok(())
    }
}

/// `w·h·Σ (x_i − ref_i)²` for one state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingError {
    pub weight: f64,
    pub state: String,
    pub reference: Vec<f64>,
    #[serde(skip)]
    block: Range<usize>,
}

impl TrackingError {
    pub fn new(weight: f64, state: &str, reference: Vec<f64>) -> Self {
        Self { weight, state: state.to_string(), reference, block: 0..0 }
    }
}

impl Objective for TrackingError {
    fn value(&self, free: &[f64], ctx: &ObjectiveContext) -> f64 {
        let ss: f64 = free[self.block.clone()]
            .iter()
            .zip(&self.reference)
            .map(|(x, r)| (x - r).powi(2))
            .sum();
        self.weight * ctx.interval * ss
    }

    fn gradient(&self, free: &[f64], ctx: &ObjectiveContext, grad: &mut [f64]) {
        grad.fill(0.0);
        let s = 2.0 * self.weight * ctx.interval;
        for (i, r) in self.block.clone().zip(&self.reference) {
            grad[i] = s * (free[i] - r);
        }
    }

    fn prepare(&mut self, ctx: &ObjectiveContext) -> Result<()> {
        let j = ctx.classification.state_index(&self.state).ok_or_else(|| {
            CollocationError::Validation(format!("tracking target `{}` is not a state", self.state))
        })?;
        if self.reference.len() != ctx.layout.num_nodes {
            return Err(CollocationError::Validation(format!(
                "tracking reference for `{}` has length {}, expected {}",
                self.state,
                self.reference.len(),
                ctx.layout.num_nodes
            )));
        }
        self.block = ctx.layout.state_block(j);
        Ok(())
    }
}

/// Sum of objectives.
#[derive(Debug, Default)]
pub struct Sum(pub Vec<Box<dyn Objective>>);

impl Objective for Sum {
    fn value(&self, free: &[f64], ctx: &ObjectiveContext) -> f64 {
        self.0.iter().map(|o| o.value(free, ctx)).sum()
    }

    fn gradient(&self, free: &[f64], ctx: &ObjectiveContext, grad: &mut [f64]) {
        grad.fill(0.0);
        let mut part = vec![0.0; grad.len()];
        for o in &self.0 {
            o.gradient(free, ctx, &mut part);
            for (g, p) in grad.iter_mut().zip(&part) {
                *g += p;
            }
        }
    }

    fn prepare(&mut self, ctx: &ObjectiveContext) -> Result<()> {
        self.0.iter_mut().try_for_each(|o| o.prepare(ctx))
    }
}

type ValueFn = dyn Fn(&[f64]) -> f64 + Send + Sync;
type GradientFn = dyn Fn(&[f64], &mut [f64]) + Send + Sync;

/// Closure adapter.
pub struct FnObjective {
    value: Box<ValueFn>,
    gradient: Box<GradientFn>,
}

impl FnObjective {
    pub fn new(
        value: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
        gradient: impl Fn(&[f64], &mut [f64]) + Send + Sync + 'static,
    ) -> Self {
        Self { value: Box::new(value), gradient: Box::new(gradient) }
    }
}

impl Debug for FnObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnObjective")
    }
}

impl Objective for FnObjective {
    fn value(&self, free: &[f64], _ctx: &ObjectiveContext) -> f64 {
        (self.value)(free)
    }

    fn gradient(&self, free: &[f64], _ctx: &ObjectiveContext, grad: &mut [f64]) {
        grad.fill(0.0);
        (self.gradient)(free, grad)
    }
}

/// Constant zero, for pure feasibility problems.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zero;

impl Objective for Zero {
    fn value(&self, _free: &[f64], _ctx: &ObjectiveContext) -> f64 {
        0.0
    }

    fn gradient(&self, _free: &[f64], _ctx: &ObjectiveContext, grad: &mut [f64]) {
        grad.fill(0.0);
    }
}
