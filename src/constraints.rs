//! Collocation defect evaluation.

use crate::discretize::DiscreteResidual;
use crate::types::{CollocationError, Result};
use ndarray::{ArrayView1, ArrayView2};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
struct Buffers {
    args: Vec<f64>,
    node_out: Vec<f64>,
}

/// Evaluates the `n·(N−1)` dynamics defects for a full trajectory.
///
/// Output is state-major: the defect of state `j` at constraint node `c`
/// lands at `j·(N−1) + c`.
#[derive(Debug)]
pub struct ConstraintEvaluator {
    residual: Rc<DiscreteResidual>,
    num_trajectories: usize,
    num_parameters: usize,
    buffers: RefCell<Buffers>,
}

impl ConstraintEvaluator {
    pub fn new(residual: Rc<DiscreteResidual>, num_trajectories: usize, num_parameters: usize) -> Self {
        let buffers = Buffers {
            args: vec![0.0; residual.num_args()],
            node_out: vec![0.0; residual.num_states()],
        };
        Self { residual, num_trajectories, num_parameters, buffers: RefCell::new(buffers) }
    }

    pub fn residual(&self) -> &DiscreteResidual {
        &self.residual
    }

    /// Shape checks shared with the Jacobian evaluator.  Returns `N`.
    pub(crate) fn check_shapes(
        &self,
        states: ArrayView2<f64>,
        trajectories: ArrayView2<f64>,
        parameters: ArrayView1<f64>,
    ) -> Result<usize> {
        let (n, nn) = states.dim();
        if n != self.residual.num_states() {
            return Err(CollocationError::Dimension(format!(
                "states have {n} rows, expected {}",
                self.residual.num_states()
            )));
        }
        if nn < 2 {
            return Err(CollocationError::Dimension(format!(
                "states have {nn} node columns, at least 2 are required"
            )));
        }
        if trajectories.nrows() != self.num_trajectories
            || (self.num_trajectories > 0 && trajectories.ncols() != nn)
        {
            return Err(CollocationError::Dimension(format!(
                "trajectories have shape {:?}, expected ({}, {nn})",
                trajectories.dim(),
                self.num_trajectories
            )));
        }
        if parameters.len() != self.num_parameters {
            return Err(CollocationError::Dimension(format!(
                "{} parameters given, expected {}",
                parameters.len(),
                self.num_parameters
            )));
        }
        Ok(nn)
    }

    /// Defects of every state equation at every constraint node.
    pub fn evaluate(
        &self,
        states: ArrayView2<f64>,
        trajectories: ArrayView2<f64>,
        parameters: ArrayView1<f64>,
        h: f64,
    ) -> Result<Vec<f64>> {
        let nn = self.check_shapes(states, trajectories, parameters)?;
        let n = self.residual.num_states();
        let nc = nn - 1;
        let mut out = vec![0.0; n * nc];

        let mut buffers = self.buffers.borrow_mut();
        let Buffers { args, node_out } = &mut *buffers;
        for c in 0..nc {
            self.residual.node_args(states, trajectories, parameters, h, c, args);
            self.residual.evaluate(args, node_out);
            for (j, v) in node_out.iter().enumerate() {
                out[j * nc + c] = *v;
            }
        }
        Ok(out)
    }
}
