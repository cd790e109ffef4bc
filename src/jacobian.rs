//! Sparsity pattern and values of the constraint Jacobian.
//!
//! The pattern is pure integer arithmetic on `(stencil, n, q, r, N)`; the
//! evaluator emits values in exactly the pattern's order.  For constraint
//! node `c` and state `j` the row is `j·(N−1) + c` and the columns run over
//!
//! ```text
//!   x_1..x_n @ current | x_1..x_n @ adjacent | u_1..u_q @ current
//!   | u_1..u_q @ adjacent (midpoint only) | p_1..p_r
//! ```

use crate::constraints::ConstraintEvaluator;
use crate::discretize::Stencil;
use crate::layout::FreeLayout;
use crate::types::{CollocationError, Result};
use ndarray::{ArrayView1, ArrayView2};
use sprs::{CsMat, TriMat};
use std::cell::RefCell;
use std::rc::Rc;

// ─────────────────────────────────────────────────────────────
//  Pattern
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JacobianPattern {
    rows: Vec<usize>,
    cols: Vec<usize>,
    num_dynamics: usize,
}

impl JacobianPattern {
    pub fn generate(stencil: Stencil, n: usize, q: usize, r: usize, num_nodes: usize) -> Self {
        let layout = FreeLayout::new(n, q, r, num_nodes);
        let nc = num_nodes.saturating_sub(1);
        let width = stencil.partials_per_state(n, q, r);
        let mut rows = Vec::with_capacity(nc * n * width);
        let mut cols = Vec::with_capacity(nc * n * width);

        for c in 0..nc {
            let cur = stencil.current_node(c);
            let adj = stencil.adjacent_node(c);
            let mut wrt = Vec::with_capacity(width);
            wrt.extend((0..n).map(|j| layout.state_index(j, cur)));
            wrt.extend((0..n).map(|j| layout.state_index(j, adj)));
            wrt.extend((0..q).map(|k| layout.trajectory_index(k, cur)));
            if stencil.averages_trajectories() {
                wrt.extend((0..q).map(|k| layout.trajectory_index(k, adj)));
            }
            wrt.extend((0..r).map(|k| layout.parameter_index(k)));

            for j in 0..n {
                rows.extend(std::iter::repeat(j * nc + c).take(width));
                cols.extend_from_slice(&wrt);
            }
        }
        let num_dynamics = rows.len();
        Self { rows, cols, num_dynamics }
    }

    /// Append entries (instance constraint rows).
    pub fn extend(&mut self, rows: &[usize], cols: &[usize]) {
        self.rows.extend_from_slice(rows);
        self.cols.extend_from_slice(cols);
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    /// Entries belonging to the dynamics block.
    pub fn num_dynamics_nnz(&self) -> usize {
        self.num_dynamics
    }

    /// Assemble a CSR matrix.  Repeated `(row, col)` pairs are summed.
    pub fn to_csr(&self, values: &[f64], shape: (usize, usize)) -> Result<CsMat<f64>> {
        if values.len() != self.nnz() {
            return Err(CollocationError::InvariantViolation(format!(
                "{} Jacobian values for {} pattern entries",
                values.len(),
                self.nnz()
            )));
        }
        let mut tri = TriMat::with_capacity(shape, self.nnz());
        for ((&i, &j), &v) in self.rows.iter().zip(&self.cols).zip(values) {
            if i >= shape.0 || j >= shape.1 {
                return Err(CollocationError::Shape(format!(
                    "Jacobian entry ({i}, {j}) outside a {shape:?} matrix"
                )));
            }
            tri.add_triplet(i, j, v);
        }
        Ok(tri.to_csr())
    }
}

// ─────────────────────────────────────────────────────────────
//  Values
// ─────────────────────────────────────────────────────────────

/// Produces Jacobian values of the dynamics block, node by node, each node's
/// `n × width` partial matrix flattened row-major.
#[derive(Debug)]
pub struct JacobianEvaluator {
    constraints: Rc<ConstraintEvaluator>,
    expected_nnz: usize,
    buffers: RefCell<(Vec<f64>, Vec<f64>)>,
}

impl JacobianEvaluator {
    pub fn new(constraints: Rc<ConstraintEvaluator>, expected_nnz: usize) -> Self {
        let residual = constraints.residual();
        let buffers = (
            vec![0.0; residual.num_args()],
            vec![0.0; residual.num_states() * residual.num_partials()],
        );
        Self { constraints, expected_nnz, buffers: RefCell::new(buffers) }
    }

    pub fn values(
        &self,
        states: ArrayView2<f64>,
        trajectories: ArrayView2<f64>,
        parameters: ArrayView1<f64>,
        h: f64,
    ) -> Result<Vec<f64>> {
        let nn = self.constraints.check_shapes(states, trajectories, parameters)?;
        let residual = self.constraints.residual();
        let mut buffers = self.buffers.borrow_mut();
        let (args, partials) = &mut *buffers;

        let mut out = Vec::with_capacity(self.expected_nnz);
        for c in 0..nn - 1 {
            residual.node_args(states, trajectories, parameters, h, c, args);
            residual.partials(args, partials);
            out.extend_from_slice(partials);
        }
        if out.len() != self.expected_nnz {
            return Err(CollocationError::InvariantViolation(format!(
                "produced {} Jacobian values, pattern declares {}",
                out.len(),
                self.expected_nnz
            )));
        }
        Ok(out)
    }
}
