//! Contract with the differentiation engine.
//!
//! The formulation engine never manipulates expression trees.  It only sees
//! a compiled [`Residual`]: an ordered variable list, a value evaluator and a
//! dense partial-derivative evaluator over that same list.  Any backend (the
//! bundled [`crate::expr`] engine, generated code, hand-written closures) can
//! sit behind it.

use std::cmp::Ordering;
use std::fmt;

/// A scalar symbol appearing in a residual expression.
///
/// Variant order is significant: it is the canonical sort order used by
/// [`crate::expr::compile`].  Instant times compare by `f64::total_cmp`, so
/// every instant (a NaN one included) equals itself.
#[derive(Debug, Clone)]
pub enum Variable {
    /// `d name(t) / dt`.  Only valid for states.
    Derivative(String),
    /// `name(t)`: a state if `name` is declared as one, otherwise a trajectory.
    Function(String),
    /// A time-invariant parameter.
    Constant(String),
    /// `name(time)`: a function evaluated at a fixed instant.  Only valid in
    /// instance constraints.
    Instant { name: String, time: f64 },
}

impl Variable {
    pub fn name(&self) -> &str {
        match self {
            Self::Derivative(n) | Self::Function(n) | Self::Constant(n) => n,
            Self::Instant { name, .. } => name,
        }
    }
}

impl Variable {
    fn rank(&self) -> u8 {
        match self {
            Self::Derivative(_) => 0,
            Self::Function(_) => 1,
            Self::Constant(_) => 2,
            Self::Instant { .. } => 3,
        }
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Instant { name: a, time: s }, Self::Instant { name: b, time: t }) => {
                a.cmp(b).then_with(|| s.total_cmp(t))
            }
            _ => self.rank().cmp(&other.rank()).then_with(|| self.name().cmp(other.name())),
        }
    }
}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Variable {}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Derivative(n) => write!(f, "{n}'(t)"),
            Self::Function(n) => write!(f, "{n}(t)"),
            Self::Constant(n) => write!(f, "{n}"),
            Self::Instant { name, time } => write!(f, "{name}({time})"),
        }
    }
}

/// A compiled vector-valued function of an ordered variable list.
pub trait Residual: fmt::Debug {
    /// Ordered argument list.  `args` slices passed to the evaluators follow
    /// this order exactly.
    fn variables(&self) -> &[Variable];

    /// Number of scalar outputs.
    fn num_outputs(&self) -> usize;

    /// Write the outputs into `out` (`len == num_outputs()`).
    fn evaluate(&self, args: &[f64], out: &mut [f64]);

    /// Write the dense `num_outputs × variables().len()` partial derivative
    /// matrix, row-major, into `out`.
    fn jacobian(&self, args: &[f64], out: &mut [f64]);
}
