//! End-to-end integration of small physical models

use nalgebra::DMatrix;
use ode_core::autodiff::AutoDiffFunction;
use ode_core::functions::{FunctionRef, NonlinearFunction};
use ode_core::integrate::{build_stepper, solve_ode, Method};
use ode_core::newton::NewtonSettings;
use std::rc::Rc;

mod common;
use common::{distance, final_state, Pendulum, RcCircuit};

const RC_END: f64 = 0.01;
const RC_STEPS: usize = 1000;

fn rc_final(method: Method, steps: usize) -> Vec<f64> {
    final_state(method, Rc::new(RcCircuit::standard()), &[0.0, 0.0], RC_END, steps)
}

#[test]
fn rc_reference_matches_closed_form() {
    let circuit = RcCircuit::standard();
    let reference = rc_final(Method::RungeKutta4, 20 * RC_STEPS);
    assert!((reference[0] - circuit.exact_voltage(RC_END)).abs() < 1e-9);
    assert!((reference[1] - RC_END).abs() < 1e-12);
}

#[test]
fn rc_circuit_methods_agree_with_reference() {
    let reference = rc_final(Method::RungeKutta4, 20 * RC_STEPS);

    for (method, tolerance) in [
        (Method::ExplicitEuler, 1e-3),
        (Method::ImplicitEuler, 1e-3),
        (Method::CrankNicolson, 1e-5),
        (Method::Gauss { stages: 2 }, 1e-7),
    ] {
        let state = rc_final(method, RC_STEPS);
        let error = (state[0] - reference[0]).abs();
        println!("{method:?}: |U_C - reference| = {error:e}");
        assert!(error < tolerance, "{method:?} error {error}");
        assert!((state[1] - RC_END).abs() < 1e-10);
    }

    let explicit = rc_final(Method::ExplicitEuler, RC_STEPS);
    let implicit = rc_final(Method::ImplicitEuler, RC_STEPS);
    let crank_nicolson = rc_final(Method::CrankNicolson, RC_STEPS);
    assert!((explicit[0] - implicit[0]).abs() < 2e-4);
    assert!((explicit[0] - crank_nicolson[0]).abs() < 1e-4);
    assert!((implicit[0] - crank_nicolson[0]).abs() < 1e-4);
}

#[test]
fn rc_trajectory_is_reported_at_every_step() {
    let mut stepper = build_stepper(
        Method::CrankNicolson,
        Rc::new(RcCircuit::standard()),
        NewtonSettings::default(),
    )
    .expect("builds");
    let circuit = RcCircuit::standard();
    let mut state = [0.0, 0.0];
    let mut worst = 0.0_f64;
    let mut samples = 0;
    solve_ode(stepper.as_mut(), &mut state, RC_END, RC_STEPS, |t, y| {
        samples += 1;
        // Skip the initial transient, where the step is comparable to RC.
        if t > 10.0 * circuit.time_constant() {
            worst = worst.max((y[0] - circuit.exact_voltage(t)).abs());
        }
    })
    .expect("integrates");
    assert_eq!(samples, RC_STEPS + 1);
    assert!(worst < 1e-5, "worst error {worst}");
}

/// y' = λ (y - cos t) - sin t with state (y, t); solution y = cos t for y(0) = 1.
struct StiffRelaxation {
    lambda: f64,
}

impl NonlinearFunction for StiffRelaxation {
    fn dim_x(&self) -> usize {
        2
    }

    fn dim_f(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        f[0] = self.lambda * (x[0] - x[1].cos()) - x[1].sin();
        f[1] = 1.0;
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        df[(0, 0)] = self.lambda;
        df[(0, 1)] = self.lambda * x[1].sin() - x[1].cos();
        df[(1, 0)] = 0.0;
        df[(1, 1)] = 0.0;
    }
}

#[test]
fn stiff_problem_needs_implicit_methods() {
    let rhs: FunctionRef = Rc::new(StiffRelaxation { lambda: -1000.0 });
    let exact = [1.0_f64.cos(), 1.0];

    // τλ = -10: explicit Euler amplifies every step by 9.
    let explicit = final_state(Method::ExplicitEuler, rhs.clone(), &[1.0, 0.0], 1.0, 100);
    assert!(!(distance(&explicit, &exact) < 1.0));

    for method in [
        Method::ImplicitEuler,
        Method::Radau { stages: 2 },
        Method::Radau { stages: 3 },
    ] {
        let state = final_state(method, rhs.clone(), &[1.0, 0.0], 1.0, 100);
        let error = distance(&state, &exact);
        assert!(error < 1e-3, "{method:?} error {error}");
    }
}

#[test]
fn gauss_keeps_pendulum_energy() {
    let model = Pendulum { g_over_l: 9.81 };
    let initial = [1.0, 0.0];
    let energy0 = model.energy(&initial);
    let rhs: FunctionRef =
        Rc::new(AutoDiffFunction::<_, 2>::new(Pendulum { g_over_l: 9.81 }).expect("2-dimensional"));
    let mut stepper =
        build_stepper(Method::Gauss { stages: 3 }, rhs, NewtonSettings::default()).expect("builds");

    let mut state = initial;
    let mut drift = 0.0_f64;
    solve_ode(stepper.as_mut(), &mut state, 10.0, 200, |_, y| {
        drift = drift.max((model.energy(y) - energy0).abs());
    })
    .expect("integrates");
    assert!(drift < 1e-6, "energy drift {drift}");
}
