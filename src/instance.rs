//! Instance constraints: scalar equalities over states sampled at fixed
//! times, e.g. boundary conditions `x(0) = 0` or `x(T) − v(T) = 1`.
//!
//! Each instant is snapped to the nearest grid node and bound to a single
//! free-vector slot at construction.  Rows are appended after the dynamics
//! block.

use crate::layout::FreeLayout;
use crate::residual::{Residual, Variable};
use crate::symbols::Classification;
use crate::types::{CollocationError, Result};
use log::debug;
use std::cell::RefCell;

/// One `name(time)` reference after snapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInstant {
    pub constraint: usize,
    pub state: String,
    pub time: f64,
    pub node: usize,
    pub free_index: usize,
}

#[derive(Debug)]
struct Bound {
    residual: Box<dyn Residual>,
    /// Argument values with known constants already filled in.
    template: Vec<f64>,
    /// `(argument position, free index)` for every instant.
    slots: Vec<(usize, usize)>,
}

#[derive(Debug)]
pub struct InstanceConstraints {
    bound: Vec<Bound>,
    resolved: Vec<ResolvedInstant>,
    rows: Vec<usize>,
    cols: Vec<usize>,
    row_offset: usize,
    num_free: usize,
    args: RefCell<Vec<f64>>,
    jac: RefCell<Vec<f64>>,
}

/// Nearest grid node to `time`; ties go to the lower index.
fn snap(time: f64, h: f64, num_nodes: usize) -> Result<usize> {
    let duration = h * (num_nodes - 1) as f64;
    if !time.is_finite() || time < -0.5 * h || time > duration + 0.5 * h {
        return Err(CollocationError::Constraint(format!(
            "time {time} lies outside the grid [0, {duration}]"
        )));
    }
    let lo = ((time / h).floor().max(0.0) as usize).min(num_nodes - 1);
    let hi = (lo + 1).min(num_nodes - 1);
    let dist = |i: usize| (i as f64 * h - time).abs();
    Ok(if dist(hi) < dist(lo) { hi } else { lo })
}

impl InstanceConstraints {
    /// An empty set over a free vector of length `num_free`.
    pub fn none(num_free: usize, row_offset: usize) -> Self {
        Self {
            bound: Vec::new(),
            resolved: Vec::new(),
            rows: Vec::new(),
            cols: Vec::new(),
            row_offset,
            num_free,
            args: RefCell::new(Vec::new()),
            jac: RefCell::new(Vec::new()),
        }
    }

    pub fn resolve(
        constraints: Vec<Box<dyn Residual>>,
        classes: &Classification,
        layout: &FreeLayout,
        h: f64,
        row_offset: usize,
    ) -> Result<Self> {
        let mut set = Self::none(layout.len(), row_offset);
        let mut max_vars = 0;

        for (k, residual) in constraints.into_iter().enumerate() {
            if residual.num_outputs() != 1 {
                return Err(CollocationError::Constraint(format!(
                    "instance constraint {k} has {} outputs, expected 1",
                    residual.num_outputs()
                )));
            }
            let mut template = vec![0.0; residual.variables().len()];
            let mut slots = Vec::new();
            for (a, var) in residual.variables().iter().enumerate() {
                match var {
                    Variable::Instant { name, time } => {
                        let j = classes.state_index(name).ok_or_else(|| {
                            CollocationError::Constraint(format!(
                                "instance constraint {k}: `{name}` is not a state"
                            ))
                        })?;
                        let node = snap(*time, h, layout.num_nodes)
                            .map_err(|e| CollocationError::Constraint(format!("instance constraint {k}: {e}")))?;
                        let free_index = layout.state_index(j, node);
                        slots.push((a, free_index));
                        set.rows.push(row_offset + k);
                        set.cols.push(free_index);
                        set.resolved.push(ResolvedInstant {
                            constraint: k,
                            state: name.clone(),
                            time: *time,
                            node,
                            free_index,
                        });
                    }
                    Variable::Constant(name) => {
                        template[a] = classes.known_parameter_value(name).ok_or_else(|| {
                            CollocationError::Constraint(format!(
                                "instance constraint {k}: `{name}` is not a known parameter"
                            ))
                        })?;
                    }
                    other => {
                        return Err(CollocationError::Constraint(format!(
                            "instance constraint {k} may only reference states at fixed times, found {other}"
                        )));
                    }
                }
            }
            max_vars = max_vars.max(template.len());
            set.bound.push(Bound { residual, template, slots });
        }

        set.args = RefCell::new(vec![0.0; max_vars]);
        set.jac = RefCell::new(vec![0.0; max_vars]);
        debug!(
            "resolved {} instance constraints ({} Jacobian entries)",
            set.bound.len(),
            set.rows.len()
        );
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    /// `(rows, cols)` of the Jacobian entries, in the order of
    /// [`jacobian_values`](Self::jacobian_values).
    pub fn pattern(&self) -> (&[usize], &[usize]) {
        (&self.rows, &self.cols)
    }

    pub fn resolved(&self) -> &[ResolvedInstant] {
        &self.resolved
    }

    fn load<'a>(&self, b: &Bound, free: &[f64], args: &'a mut [f64]) -> &'a [f64] {
        let args = &mut args[..b.template.len()];
        args.copy_from_slice(&b.template);
        for &(a, idx) in &b.slots {
            args[a] = free[idx];
        }
        args
    }

    fn check_lengths(&self, free: &[f64], out: &[f64], expected: usize) -> Result<()> {
        if free.len() != self.num_free {
            return Err(CollocationError::Dimension(format!(
                "free vector has length {}, expected {}",
                free.len(),
                self.num_free
            )));
        }
        if out.len() != expected {
            return Err(CollocationError::Dimension(format!(
                "output buffer has length {}, expected {expected}",
                out.len()
            )));
        }
        Ok(())
    }

    /// Residual of each constraint; `out.len() == self.len()`.
    pub fn evaluate(&self, free: &[f64], out: &mut [f64]) -> Result<()> {
        self.check_lengths(free, out, self.len())?;
        let mut args = self.args.borrow_mut();
        for (b, o) in self.bound.iter().zip(out.iter_mut()) {
            let a = self.load(b, free, &mut args);
            b.residual.evaluate(a, std::slice::from_mut(o));
        }
        Ok(())
    }

    /// Partial derivatives wrt each resolved instant; `out.len() == self.nnz()`.
    pub fn jacobian_values(&self, free: &[f64], out: &mut [f64]) -> Result<()> {
        self.check_lengths(free, out, self.nnz())?;
        let mut args = self.args.borrow_mut();
        let mut jac = self.jac.borrow_mut();
        let mut e = 0;
        for b in &self.bound {
            let a = self.load(b, free, &mut args);
            let nv = a.len();
            b.residual.jacobian(a, &mut jac[..nv]);
            for &(pos, _) in &b.slots {
                out[e] = jac[pos];
                e += 1;
            }
        }
        Ok(())
    }
}
