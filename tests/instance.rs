//! Instance constraint resolution: time snapping, free indices, row
//! placement and rejected symbols.

use dircol::expr::{at, compile, constant, deriv, func, num, Expr};
use dircol::{CollocationError, NlpProblem, ProblemBuilder};

/// x' = v, v' = −x on N = 5 nodes with h = 1.
fn builder() -> ProblemBuilder {
    let eom = compile(&[deriv("x") - func("v"), deriv("v") + func("x")]).unwrap();
    ProblemBuilder::new(eom, &["x", "v"], 5, 1.0)
}

fn with_constraint(e: Expr) -> dircol::Result<dircol::CollocationProblem> {
    builder().instance_constraint(compile(&[e]).unwrap()).build()
}

#[test]
fn snapping_and_free_indices() {
    let problem = builder()
        .instance_constraint(compile(&[at("x", 0.0)]).unwrap())
        .instance_constraint(compile(&[at("x", 4.0)]).unwrap())
        .instance_constraint(compile(&[at("x", 2.1)]).unwrap())
        .instance_constraint(compile(&[at("x", 2.5)]).unwrap())
        .instance_constraint(compile(&[at("v", 1.0) - num(3.0)]).unwrap())
        .build()
        .unwrap();

    let resolved = problem.instance_constraints().resolved();
    let nodes: Vec<usize> = resolved.iter().map(|r| r.node).collect();
    let indices: Vec<usize> = resolved.iter().map(|r| r.free_index).collect();
    assert_eq!(nodes, vec![0, 4, 2, 2, 1]);
    assert_eq!(indices, vec![0, 4, 2, 2, 6]);

    // Dynamics rows: 2 states × 4 constraint nodes.
    assert_eq!(problem.num_constraints(), 8 + 5);
    let (rows, cols) = problem.instance_constraints().pattern();
    assert_eq!(rows, &[8, 9, 10, 11, 12]);
    assert_eq!(cols, &[0, 4, 2, 2, 6]);

    let (all_rows, _) = problem.jacobian_structure();
    assert_eq!(&all_rows[all_rows.len() - 5..], &[8, 9, 10, 11, 12]);
}

#[test]
fn values_and_partials() {
    let problem = builder()
        .known_parameter("dummy", 0.0)
        .instance_constraint(compile(&[at("x", 0.0) * at("v", 4.0) - num(1.0)]).unwrap())
        .build()
        .unwrap();

    let free: Vec<f64> = (0..problem.num_variables()).map(|i| i as f64).collect();
    // x(0) = free[0] = 0, v(4) = free[9] = 9
    let c = problem.constraints(&free).unwrap();
    assert_eq!(*c.last().unwrap(), -1.0);

    // Instants are ordered by name: v(4) before x(0).
    let jac = problem.jacobian_values(&free).unwrap();
    let tail = &jac[jac.len() - 2..];
    assert_eq!(tail, &[0.0, 9.0]);
    let (_, cols) = problem.instance_constraints().pattern();
    assert_eq!(cols, &[9, 0]);
}

#[test]
fn known_constants_are_bound() {
    let eom = compile(&[deriv("x") + constant("a") * func("x")]).unwrap();
    let problem = ProblemBuilder::new(eom, &["x"], 3, 0.5)
        .known_parameter("a", 2.0)
        .instance_constraint(compile(&[at("x", 0.0) - constant("a")]).unwrap())
        .build()
        .unwrap();
    let c = problem.constraints(&[5.0, 0.0, 0.0]).unwrap();
    assert_eq!(c[2], 3.0);
}

#[test]
fn half_interval_tolerance() {
    let problem = with_constraint(at("x", -0.5)).unwrap();
    assert_eq!(problem.instance_constraints().resolved()[0].node, 0);
    let problem = with_constraint(at("x", 4.5)).unwrap();
    assert_eq!(problem.instance_constraints().resolved()[0].node, 4);

    assert!(matches!(with_constraint(at("x", -0.6)), Err(CollocationError::Constraint(_))));
    assert!(matches!(with_constraint(at("x", 4.6)), Err(CollocationError::Constraint(_))));
    assert!(matches!(with_constraint(at("x", f64::NAN)), Err(CollocationError::Constraint(_))));
    assert!(matches!(with_constraint(at("x", f64::INFINITY)), Err(CollocationError::Constraint(_))));
}

#[test]
fn unsupported_symbols() {
    // Not a state.
    assert!(matches!(with_constraint(at("w", 1.0)), Err(CollocationError::Constraint(_))));
    // Function of time rather than an instant.
    assert!(matches!(with_constraint(func("x")), Err(CollocationError::Constraint(_))));
    // Derivative.
    assert!(matches!(with_constraint(deriv("x")), Err(CollocationError::Constraint(_))));
    // Parameter that is not known.
    assert!(matches!(
        with_constraint(at("x", 0.0) - constant("b")),
        Err(CollocationError::Constraint(_))
    ));

    // Unknown parameter of the equations of motion.
    let eom = compile(&[deriv("x") + constant("a") * func("x")]).unwrap();
    let res = ProblemBuilder::new(eom, &["x"], 3, 0.5)
        .instance_constraint(compile(&[at("x", 0.0) - constant("a")]).unwrap())
        .build();
    assert!(matches!(res, Err(CollocationError::Constraint(_))));
}

#[test]
fn multi_output_constraint_is_rejected() {
    let two = compile(&[at("x", 0.0), at("v", 0.0)]).unwrap();
    let res = builder().instance_constraint(two).build();
    assert!(matches!(res, Err(CollocationError::Constraint(_))));
}

#[test]
fn direct_evaluation_checks_lengths() {
    let problem = builder()
        .instance_constraint(compile(&[at("x", 0.0) - num(1.0)]).unwrap())
        .instance_constraint(compile(&[at("v", 4.0)]).unwrap())
        .build()
        .unwrap();
    let set = problem.instance_constraints();
    let free = vec![0.5; problem.num_variables()];

    let mut out = vec![0.0; set.len()];
    set.evaluate(&free, &mut out).unwrap();
    assert_eq!(out, vec![-0.5, 0.5]);
    let mut partials = vec![0.0; set.nnz()];
    set.jacobian_values(&free, &mut partials).unwrap();
    assert_eq!(partials, vec![1.0, 1.0]);

    let short = &free[..free.len() - 1];
    assert!(matches!(set.evaluate(short, &mut out), Err(CollocationError::Dimension(_))));
    assert!(matches!(set.jacobian_values(short, &mut partials), Err(CollocationError::Dimension(_))));

    let mut wrong = vec![0.0; set.len() + 1];
    assert!(matches!(set.evaluate(&free, &mut wrong), Err(CollocationError::Dimension(_))));
    let mut wrong = vec![0.0; set.nnz() - 1];
    assert!(matches!(set.jacobian_values(&free, &mut wrong), Err(CollocationError::Dimension(_))));
}
