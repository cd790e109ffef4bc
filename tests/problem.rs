//! NLP assembly: constraint values on hand-checked scenarios, bounds,
//! objectives, configuration and construction errors.

use approx::assert_relative_eq;
use dircol::expr::{compile, constant, deriv, func};
use dircol::objective::{FnObjective, IntegratedSquare, Objective, ObjectiveContext, Sum, Target, TrackingError};
use dircol::types::{ALSettings, SolverOptions};
use dircol::{CollocationError, NlpProblem, ProblemBuilder, Stencil};

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// ẋ = u with u known.
fn integrator(stencil: Stencil, u: Vec<f64>) -> dircol::CollocationProblem {
    let n = u.len();
    let eom = compile(&[deriv("x") - func("u")]).unwrap();
    ProblemBuilder::new(eom, &["x"], n, 1.0)
        .known_trajectory("u", u)
        .stencil(stencil)
        .build()
        .unwrap()
}

/// x' = v, v' = u − c v with u unknown, c unknown.
fn double_integrator() -> ProblemBuilder {
    let eom = compile(&[deriv("x") - func("v"), deriv("v") - func("u") + constant("c") * func("v")]).unwrap();
    ProblemBuilder::new(eom, &["x", "v"], 4, 0.25)
}

// ─────────────────────────────────────────────────────────────
//  Constraint values
// ─────────────────────────────────────────────────────────────

#[test]
fn backward_euler_defects() {
    let problem = integrator(Stencil::BackwardEuler, vec![0.0, 0.0, 0.0]);
    assert_eq!(problem.num_variables(), 3);
    assert_eq!(problem.constraints(&[0.0, 1.0, 1.0]).unwrap(), vec![1.0, 0.0]);
}

#[test]
fn backward_euler_samples_current_node() {
    // Defect c uses u at node c+1.
    let problem = integrator(Stencil::BackwardEuler, vec![10.0, 1.0, 2.0]);
    assert_eq!(problem.constraints(&[0.0, 1.0, 1.0]).unwrap(), vec![0.0, -2.0]);
}

#[test]
fn midpoint_averages() {
    let problem = integrator(Stencil::Midpoint, vec![1.0, 3.0, 5.0]);
    // (x1 − x0) − (u0 + u1)/2 = 1 − 2,  (x2 − x1) − (u1 + u2)/2 = 0 − 4
    assert_eq!(problem.constraints(&[0.0, 1.0, 1.0]).unwrap(), vec![-1.0, -4.0]);
}

#[test]
fn midpoint_state_average_and_step() {
    // x' + a x = 0 with h = 0.5: (x1 − x0)/h + a (x0 + x1)/2.
    let eom = compile(&[deriv("x") + constant("a") * func("x")]).unwrap();
    let problem = ProblemBuilder::new(eom, &["x"], 2, 0.5)
        .known_parameter("a", 4.0)
        .integration_method("midpoint")
        .unwrap()
        .build()
        .unwrap();
    let c = problem.constraints(&[1.0, 2.0]).unwrap();
    assert_relative_eq!(c[0], 2.0 + 4.0 * 1.5);
}

#[test]
fn state_major_ordering() {
    let problem = double_integrator().known_parameter("c", 0.0).build().unwrap();
    let layout = *problem.layout();
    let mut free = vec![0.0; problem.num_variables()];
    // v = 1 everywhere, x = 0: x-defects are −1, v-defects are 0 − u = 0.
    for i in layout.state_block(1) {
        free[i] = 1.0;
    }
    let c = problem.constraints(&free).unwrap();
    assert_eq!(c, vec![-1.0, -1.0, -1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn trajectories_merge_known_data() {
    let eom = compile(&[deriv("x") - func("u") * func("f") - constant("k")]).unwrap();
    let problem = ProblemBuilder::new(eom, &["x"], 3, 1.0)
        .known_trajectory("f", vec![1.0, 2.0, 3.0])
        .build()
        .unwrap();
    let free = [0.0, 0.0, 0.0, 4.0, 5.0, 6.0, 7.0];
    let t = problem.trajectories(&free).unwrap();
    assert_eq!(problem.classification().trajectories(), vec!["f", "u"]);
    assert_eq!(t.trajectories.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
    assert_eq!(t.trajectories.row(1).to_vec(), vec![4.0, 5.0, 6.0]);
    assert_eq!(t.parameters.to_vec(), vec![7.0]);
    assert_eq!(problem.parse(&free).unwrap().unknown_parameters.to_vec(), vec![7.0]);
}

#[test]
fn node_times() {
    let problem = integrator(Stencil::BackwardEuler, vec![0.0; 4]);
    assert_eq!(problem.node_times(), vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn constraint_bounds_are_equalities() {
    let problem = double_integrator().build().unwrap();
    let (lo, hi) = problem.constraint_bounds();
    assert_eq!(lo.len(), problem.num_constraints());
    assert!(lo.iter().chain(&hi).all(|&v| v == 0.0));
}

// ─────────────────────────────────────────────────────────────
//  Bounds
// ─────────────────────────────────────────────────────────────

#[test]
fn state_bound_covers_its_block() {
    let problem = double_integrator().bound("x", -1.0, 1.0).build().unwrap();
    let (lo, hi) = problem.variable_bounds();
    assert_eq!(lo.len(), problem.num_variables());
    for i in 0..lo.len() {
        if i < 4 {
            assert_eq!((lo[i], hi[i]), (-1.0, 1.0));
        } else {
            assert_eq!((lo[i], hi[i]), (f64::NEG_INFINITY, f64::INFINITY));
        }
    }
}

#[test]
fn trajectory_and_parameter_bounds() {
    let problem = double_integrator().bound("u", -2.0, 2.0).bound("c", 0.0, 5.0).build().unwrap();
    let layout = *problem.layout();
    let (lo, hi) = problem.variable_bounds();
    for i in layout.trajectory_block(0) {
        assert_eq!((lo[i], hi[i]), (-2.0, 2.0));
    }
    let p = layout.parameter_index(0);
    assert_eq!((lo[p], hi[p]), (0.0, 5.0));
    assert_eq!(lo.iter().filter(|v| v.is_finite()).count(), 5);
}

#[test]
fn bad_bounds_are_rejected() {
    let res = double_integrator().bound("x", 1.0, -1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
    let res = double_integrator().bound("nope", -1.0, 1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
    let res = double_integrator().known_parameter("c", 1.0).bound("c", -1.0, 1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
}

// ─────────────────────────────────────────────────────────────
//  Objectives
// ─────────────────────────────────────────────────────────────

#[test]
fn objective_gradient_matches_finite_differences() {
    let reference = vec![0.0, 0.5, 1.0, 1.5];
    let objective = Sum(vec![
        Box::new(IntegratedSquare::new(2.0, Target::Trajectory("u".into()))),
        Box::new(IntegratedSquare::new(0.5, Target::Parameter("c".into()))),
        Box::new(TrackingError::new(3.0, "x", reference)),
        Box::new(FnObjective::new(|f| f[0].powi(3), |f, g| g[0] = 3.0 * f[0] * f[0])),
    ]);
    let problem = double_integrator().objective(objective).build().unwrap();
    let free: Vec<f64> = (0..problem.num_variables()).map(|i| (i as f64 * 0.37).sin()).collect();
    let grad = problem.gradient(&free).unwrap();

    let eps = 1e-6;
    for j in 0..free.len() {
        let mut theta = free.clone();
        theta[j] += eps;
        let plus = problem.objective(&theta).unwrap();
        theta[j] -= 2.0 * eps;
        let minus = problem.objective(&theta).unwrap();
        assert_relative_eq!(grad[j], (plus - minus) / (2.0 * eps), epsilon = 1e-6, max_relative = 1e-5);
    }
}

#[test]
fn integrated_square_value() {
    let problem = double_integrator()
        .objective(IntegratedSquare::new(1.0, Target::State("v".into())))
        .build()
        .unwrap();
    let mut free = vec![0.0; problem.num_variables()];
    for i in problem.layout().state_block(1) {
        free[i] = 2.0;
    }
    assert_relative_eq!(problem.objective(&free).unwrap(), 0.25 * 4.0 * 4.0);
}

#[test]
fn objective_targets_are_checked() {
    let res = double_integrator()
        .objective(IntegratedSquare::new(1.0, Target::Trajectory("x".into())))
        .build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));

    let res = double_integrator()
        .objective(TrackingError::new(1.0, "x", vec![0.0; 3]))
        .build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
}

#[test]
fn objective_targets_resolve_at_build() {
    // Resolved slots are not serialized, so a deserialized objective starts
    // unresolved and is bound by the builder.
    let json = r#"{ "weight": 1.0, "target": { "kind": "state", "name": "v" } }"#;
    let objective: IntegratedSquare = serde_json::from_str(json).unwrap();
    let problem = double_integrator().objective(objective).build().unwrap();
    let mut free = vec![0.0; problem.num_variables()];
    for i in problem.layout().state_block(1) {
        free[i] = 2.0;
    }
    assert_relative_eq!(problem.objective(&free).unwrap(), 0.25 * 4.0 * 4.0);

    let ctx = ObjectiveContext {
        layout: problem.layout(),
        interval: problem.interval(),
        classification: problem.classification(),
    };
    let mut bad = IntegratedSquare::new(1.0, Target::Parameter("x".into()));
    assert!(matches!(bad.prepare(&ctx), Err(CollocationError::Validation(_))));
    let mut bad = TrackingError::new(1.0, "u", vec![0.0; 4]);
    assert!(matches!(bad.prepare(&ctx), Err(CollocationError::Validation(_))));

    let mut tracking = TrackingError::new(2.0, "x", vec![1.0; 4]);
    tracking.prepare(&ctx).unwrap();
    let zeros = vec![0.0; problem.num_variables()];
    assert_relative_eq!(tracking.value(&zeros, &ctx), 2.0 * 0.25 * 4.0);
    let mut grad = vec![1.0; zeros.len()];
    tracking.gradient(&zeros, &ctx, &mut grad);
    let block = problem.layout().state_block(0);
    for (i, g) in grad.iter().enumerate() {
        let expected = if block.contains(&i) { -2.0 * 2.0 * 0.25 } else { 0.0 };
        assert_relative_eq!(*g, expected);
    }
}

// ─────────────────────────────────────────────────────────────
//  Construction errors
// ─────────────────────────────────────────────────────────────

#[test]
fn grid_validation() {
    let eom = || compile(&[deriv("x") - func("u")]).unwrap();
    let res = ProblemBuilder::new(eom(), &["x"], 1, 1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
    let res = ProblemBuilder::new(eom(), &["x"], 3, 0.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
    let res = ProblemBuilder::new(eom(), &["x"], 3, f64::NAN).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
    let res = ProblemBuilder::new(eom(), &["x"], 3, 1.0).known_trajectory("u", vec![0.0; 2]).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
}

#[test]
fn classification_errors() {
    // Two equations, one state.
    let eom = compile(&[deriv("x") - func("u"), func("x")]).unwrap();
    let res = ProblemBuilder::new(eom, &["x"], 3, 1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));

    // Derivative of a non-state.
    let eom = compile(&[deriv("x") - deriv("u")]).unwrap();
    let res = ProblemBuilder::new(eom, &["x"], 3, 1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));

    let eom = compile(&[deriv("x") - func("u")]).unwrap();
    let res = ProblemBuilder::new(eom, &[], 3, 1.0).build();
    assert!(matches!(res, Err(CollocationError::Validation(_))));
}

#[test]
fn extraneous_known_symbols_are_dropped() {
    let problem = double_integrator()
        .known_parameter("unused", 1.0)
        .known_trajectory("w", vec![0.0; 4])
        .build()
        .unwrap();
    let classes = problem.classification();
    assert!(classes.known_parameters.is_empty());
    assert!(classes.known_trajectories.is_empty());
    assert_eq!(classes.unknown_parameters, vec!["c"]);
}

#[test]
fn wrong_free_length() {
    let problem = double_integrator().build().unwrap();
    let res = problem.constraints(&[0.0; 3]);
    assert!(matches!(res, Err(CollocationError::Shape(_))));
    let res = problem.objective(&[0.0; 3]);
    assert!(matches!(res, Err(CollocationError::Shape(_))));
}

#[test]
fn integration_method_names() {
    assert_eq!("Backward Euler".parse::<Stencil>().unwrap(), Stencil::BackwardEuler);
    assert_eq!("backward_euler".parse::<Stencil>().unwrap(), Stencil::BackwardEuler);
    assert_eq!("MIDPOINT".parse::<Stencil>().unwrap(), Stencil::Midpoint);
    let res = double_integrator().integration_method("runge kutta");
    assert!(matches!(res, Err(CollocationError::UnsupportedMethod(_))));
}

// ─────────────────────────────────────────────────────────────
//  Configuration
// ─────────────────────────────────────────────────────────────

#[test]
fn settings_serde() {
    let options = SolverOptions { max_iterations: 42, ..SolverOptions::default() };
    let json = serde_json::to_string(&options).unwrap();
    let back: SolverOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back, options);

    let partial: ALSettings = serde_json::from_str(r#"{ "mu_init": 3.0 }"#).unwrap();
    assert_eq!(partial.mu_init, 3.0);
    assert_eq!(partial.max_outer_iters, ALSettings::default().max_outer_iters);

    let stencil: Stencil = serde_json::from_str(r#""midpoint""#).unwrap();
    assert_eq!(stencil, Stencil::Midpoint);
    assert_eq!(serde_json::to_string(&Stencil::BackwardEuler).unwrap(), r#""backward_euler""#);

    let target: Target = serde_json::from_str(r#"{ "kind": "state", "name": "x" }"#).unwrap();
    assert_eq!(target, Target::State("x".into()));
}
