//! Low-level evaluators driven directly: defect values, shape checks on the
//! structured inputs and the nonzero-count invariant of the Jacobian.

use dircol::constraints::ConstraintEvaluator;
use dircol::discretize::DiscreteResidual;
use dircol::expr::{compile, constant, deriv, func};
use dircol::jacobian::{JacobianEvaluator, JacobianPattern};
use dircol::symbols::{classify, Classification};
use dircol::{CollocationError, Stencil};
use ndarray::{array, Array1, Array2};
use std::rc::Rc;

const NODES: usize = 4;
const H: f64 = 0.5;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// x' + k·x − u = 0 with k an unknown parameter and u an unknown trajectory.
fn evaluator(stencil: Stencil) -> (Rc<ConstraintEvaluator>, Classification) {
    let eom = compile(&[deriv("x") + constant("k") * func("x") - func("u")]).unwrap();
    let classes = classify(&eom, &["x".to_string()], &[], &[], NODES).unwrap();
    let residual = Rc::new(DiscreteResidual::new(Box::new(eom), &classes, stencil).unwrap());
    let constraints = Rc::new(ConstraintEvaluator::new(
        residual,
        classes.num_trajectories(),
        classes.num_parameters(),
    ));
    (constraints, classes)
}

fn pattern(stencil: Stencil) -> JacobianPattern {
    JacobianPattern::generate(stencil, 1, 1, 1, NODES)
}

// ─────────────────────────────────────────────────────────────
//  Defects
// ─────────────────────────────────────────────────────────────

#[test]
fn backward_euler_defects() {
    let (constraints, classes) = evaluator(Stencil::BackwardEuler);
    assert_eq!(classes.num_trajectories(), 1);
    assert_eq!(classes.num_parameters(), 1);

    let states = array![[1.0, 2.0, 4.0, 4.0]];
    let trajectories = array![[0.0, 1.0, 0.0, 3.0]];
    let parameters = array![2.0];
    let defects = constraints
        .evaluate(states.view(), trajectories.view(), parameters.view(), H)
        .unwrap();

    // (x[c+1] − x[c]) / h + k·x[c+1] − u[c+1]
    assert_eq!(defects, vec![2.0 + 4.0 - 1.0, 4.0 + 8.0, 0.0 + 8.0 - 3.0]);
}

// ─────────────────────────────────────────────────────────────
//  Shape checks
// ─────────────────────────────────────────────────────────────

#[test]
fn malformed_inputs_are_dimension_errors() {
    for stencil in [Stencil::BackwardEuler, Stencil::Midpoint] {
        let (constraints, _) = evaluator(stencil);
        let jacobian = JacobianEvaluator::new(Rc::clone(&constraints), pattern(stencil).nnz());

        let states = Array2::<f64>::ones((1, NODES));
        let trajectories = Array2::<f64>::zeros((1, NODES));
        let parameters = Array1::<f64>::ones(1);
        let cases = [
            // A single node column leaves no node pair.
            (Array2::<f64>::ones((1, 1)), trajectories.clone(), parameters.clone()),
            // Two state rows for one state equation.
            (Array2::<f64>::ones((2, NODES)), trajectories.clone(), parameters.clone()),
            // Trajectory rows do not match the trajectory count.
            (states.clone(), Array2::<f64>::zeros((2, NODES)), parameters.clone()),
            // Trajectory columns do not match the node count.
            (states.clone(), Array2::<f64>::zeros((1, NODES - 1)), parameters.clone()),
            (states.clone(), trajectories.clone(), Array1::<f64>::ones(2)),
        ];
        for (s, t, p) in &cases {
            assert!(matches!(
                constraints.evaluate(s.view(), t.view(), p.view(), H),
                Err(CollocationError::Dimension(_))
            ));
            assert!(matches!(
                jacobian.values(s.view(), t.view(), p.view(), H),
                Err(CollocationError::Dimension(_))
            ));
        }

        let values = jacobian
            .values(states.view(), trajectories.view(), parameters.view(), H)
            .unwrap();
        assert_eq!(values.len(), pattern(stencil).nnz());
    }
}

// ─────────────────────────────────────────────────────────────
//  Nonzero-count invariant
// ─────────────────────────────────────────────────────────────

#[test]
fn evaluator_checks_declared_nonzeros() {
    let (constraints, _) = evaluator(Stencil::BackwardEuler);
    let declared = pattern(Stencil::BackwardEuler).nnz();
    let jacobian = JacobianEvaluator::new(constraints, declared + 1);

    let states = Array2::<f64>::ones((1, NODES));
    let trajectories = Array2::<f64>::zeros((1, NODES));
    let parameters = Array1::<f64>::ones(1);
    let res = jacobian.values(states.view(), trajectories.view(), parameters.view(), H);
    assert!(matches!(res, Err(CollocationError::InvariantViolation(_))));
}

#[test]
fn csr_assembly_checks_value_count() {
    let pattern = pattern(Stencil::BackwardEuler);
    let shape = (NODES - 1, 2 * NODES + 1);

    assert!(matches!(pattern.to_csr(&[1.0], shape), Err(CollocationError::InvariantViolation(_))));
    let too_many = vec![1.0; pattern.nnz() + 1];
    assert!(matches!(pattern.to_csr(&too_many, shape), Err(CollocationError::InvariantViolation(_))));

    let values = vec![1.0; pattern.nnz()];
    let csr = pattern.to_csr(&values, shape).unwrap();
    assert_eq!(csr.shape(), shape);

    // A matrix too small for the pattern.
    assert!(matches!(pattern.to_csr(&values, (1, 1)), Err(CollocationError::Shape(_))));
}
