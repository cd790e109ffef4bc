//! Variable classification.
//!
//! Splits the symbols of the equations of motion into states, known and
//! unknown parameters, and known and unknown trajectories, and fixes their
//! canonical order:
//!
//!   * states keep the caller's order,
//!   * known symbols keep the caller's order,
//!   * unknown symbols are sorted by name,
//!   * the full order of a category is known first, then unknown.

use crate::residual::{Residual, Variable};
use crate::types::{CollocationError, Result};
use log::{debug, warn};
use ndarray::Array2;

/// Output of [`classify`].  Immutable once built.
#[derive(Debug, Clone)]
pub struct Classification {
    pub states: Vec<String>,
    pub known_parameters: Vec<String>,
    /// Values of `known_parameters`, same order.
    pub known_parameter_values: Vec<f64>,
    pub unknown_parameters: Vec<String>,
    pub known_trajectories: Vec<String>,
    /// Rows of `known_trajectories`, shape `(known, N)`.
    pub known_trajectory_values: Array2<f64>,
    pub unknown_trajectories: Vec<String>,
    pub num_nodes: usize,
}

impl Classification {
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.known_parameters.len() + self.unknown_parameters.len()
    }

    pub fn num_trajectories(&self) -> usize {
        self.known_trajectories.len() + self.unknown_trajectories.len()
    }

    /// Full parameter order: known, then unknown.
    pub fn parameters(&self) -> Vec<String> {
        self.known_parameters.iter().chain(&self.unknown_parameters).cloned().collect()
    }

    /// Full trajectory order: known, then unknown.
    pub fn trajectories(&self) -> Vec<String> {
        self.known_trajectories.iter().chain(&self.unknown_trajectories).cloned().collect()
    }

    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s == name)
    }

    pub fn unknown_parameter_index(&self, name: &str) -> Option<usize> {
        self.unknown_parameters.iter().position(|s| s == name)
    }

    pub fn unknown_trajectory_index(&self, name: &str) -> Option<usize> {
        self.unknown_trajectories.iter().position(|s| s == name)
    }

    pub fn known_parameter_value(&self, name: &str) -> Option<f64> {
        self.known_parameters
            .iter()
            .position(|s| s == name)
            .map(|i| self.known_parameter_values[i])
    }

    /// Position of a parameter in the full order.
    pub fn parameter_position(&self, name: &str) -> Option<usize> {
        self.known_parameters
            .iter()
            .position(|s| s == name)
            .or_else(|| {
                self.unknown_parameter_index(name).map(|k| self.known_parameters.len() + k)
            })
    }

    /// Position of a trajectory in the full order.
    pub fn trajectory_position(&self, name: &str) -> Option<usize> {
        self.known_trajectories
            .iter()
            .position(|s| s == name)
            .or_else(|| {
                self.unknown_trajectory_index(name).map(|k| self.known_trajectories.len() + k)
            })
    }
}

/// Split `all` into (known, unknown).  `known` is a filtered copy of the
/// caller's list restricted to names present in `all`; `unknown` is the rest
/// of `all`, sorted by name.
fn partition<'a>(all: &[String], known: impl Iterator<Item = &'a str>) -> (Vec<String>, Vec<String>) {
    let known: Vec<String> = known
        .filter(|k| {
            let present = all.iter().any(|a| a.as_str() == *k);
            if !present {
                warn!("ignoring known symbol `{k}`: it does not appear in the equations of motion");
            }
            present
        })
        .map(str::to_string)
        .collect();
    let mut unknown: Vec<String> = all.iter().filter(|a| !known.contains(*a)).cloned().collect();
    unknown.sort();
    (known, unknown)
}

fn check_unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for n in names {
        if seen.contains(&n) {
            return Err(CollocationError::Validation(format!("{what} `{n}` is given more than once")));
        }
        seen.push(n);
    }
    Ok(())
}

/// Classify the symbols of `eom` given the state names and known data.
pub fn classify(
    eom: &dyn Residual,
    states: &[String],
    known_parameters: &[(String, f64)],
    known_trajectories: &[(String, Vec<f64>)],
    num_nodes: usize,
) -> Result<Classification> {
    if states.is_empty() {
        return Err(CollocationError::Validation("at least one state is required".into()));
    }
    check_unique("state", states.iter().map(String::as_str))?;
    check_unique("known parameter", known_parameters.iter().map(|(n, _)| n.as_str()))?;
    check_unique("known trajectory", known_trajectories.iter().map(|(n, _)| n.as_str()))?;

    if eom.num_outputs() != states.len() {
        return Err(CollocationError::Validation(format!(
            "{} equations of motion for {} states",
            eom.num_outputs(),
            states.len()
        )));
    }

    for (name, values) in known_trajectories {
        if values.len() != num_nodes {
            return Err(CollocationError::Validation(format!(
                "known trajectory `{name}` has length {}, expected {num_nodes}",
                values.len()
            )));
        }
    }

    let mut parameters: Vec<String> = Vec::new();
    let mut trajectories: Vec<String> = Vec::new();
    for var in eom.variables() {
        match var {
            Variable::Constant(name) => {
                if !parameters.contains(name) {
                    parameters.push(name.clone());
                }
            }
            Variable::Function(name) => {
                if !states.contains(name) && !trajectories.contains(name) {
                    trajectories.push(name.clone());
                }
            }
            Variable::Derivative(name) => {
                if !states.contains(name) {
                    return Err(CollocationError::Validation(format!(
                        "equations of motion contain the derivative of `{name}`, which is not a state"
                    )));
                }
            }
            Variable::Instant { .. } => {
                return Err(CollocationError::Validation(format!(
                    "equations of motion may not contain the instant {var}"
                )));
            }
        }
    }

    let (known_pars, unknown_pars) =
        partition(&parameters, known_parameters.iter().map(|(n, _)| n.as_str()));
    let (known_trajs, unknown_trajs) =
        partition(&trajectories, known_trajectories.iter().map(|(n, _)| n.as_str()));

    let known_parameter_values = known_pars
        .iter()
        .filter_map(|k| known_parameters.iter().find(|(n, _)| n == k).map(|(_, v)| *v))
        .collect();

    let mut known_trajectory_values = Array2::zeros((known_trajs.len(), num_nodes));
    for (row, k) in known_trajs.iter().enumerate() {
        if let Some((_, values)) = known_trajectories.iter().find(|(n, _)| n == k) {
            for (i, v) in values.iter().enumerate() {
                known_trajectory_values[[row, i]] = *v;
            }
        }
    }

    debug!(
        "classified {} states, {}+{} parameters (known+unknown), {}+{} trajectories",
        states.len(),
        known_pars.len(),
        unknown_pars.len(),
        known_trajs.len(),
        unknown_trajs.len()
    );

    Ok(Classification {
        states: states.to_vec(),
        known_parameters: known_pars,
        known_parameter_values,
        unknown_parameters: unknown_pars,
        known_trajectories: known_trajs,
        known_trajectory_values,
        unknown_trajectories: unknown_trajs,
        num_nodes,
    })
}
