//! Common models and helpers for integration tests

#![allow(dead_code)]

use nalgebra::DMatrix;
use ode_core::functions::{FunctionRef, NonlinearFunction};
use ode_core::integrate::{build_stepper, solve_ode, Method};
use ode_core::newton::NewtonSettings;
use ode_core::traits::{Scalar, VectorField};
use std::f64::consts::PI;
use std::rc::Rc;

/// Undamped mass on a spring: x' = v, v' = -(k/m) x.
pub struct MassSpring {
    pub mass: f64,
    pub stiffness: f64,
}

impl MassSpring {
    pub fn unit() -> FunctionRef {
        Rc::new(Self {
            mass: 1.0,
            stiffness: 1.0,
        })
    }
}

impl NonlinearFunction for MassSpring {
    fn dim_x(&self) -> usize {
        2
    }

    fn dim_f(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        f[0] = x[1];
        f[1] = -self.stiffness / self.mass * x[0];
    }

    fn evaluate_deriv(&self, _x: &[f64], df: &mut DMatrix<f64>) {
        df.fill(0.0);
        df[(0, 1)] = 1.0;
        df[(1, 0)] = -self.stiffness / self.mass;
    }
}

/// RC low-pass driven by U₀(t) = cos(100πt). State is (U_C, t) so the
/// system stays autonomous.
pub struct RcCircuit {
    pub resistance: f64,
    pub capacitance: f64,
}

impl RcCircuit {
    pub const OMEGA: f64 = 100.0 * PI;

    pub fn standard() -> Self {
        Self {
            resistance: 100.0,
            capacitance: 1e-6,
        }
    }

    pub fn time_constant(&self) -> f64 {
        self.resistance * self.capacitance
    }

    /// Closed-form U_C(t) for U_C(0) = 0.
    pub fn exact_voltage(&self, t: f64) -> f64 {
        let wrc = Self::OMEGA * self.time_constant();
        let forced = (Self::OMEGA * t).cos() + wrc * (Self::OMEGA * t).sin();
        (forced - (-t / self.time_constant()).exp()) / (1.0 + wrc * wrc)
    }
}

impl NonlinearFunction for RcCircuit {
    fn dim_x(&self) -> usize {
        2
    }

    fn dim_f(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        let rc = self.time_constant();
        f[0] = ((Self::OMEGA * x[1]).cos() - x[0]) / rc;
        f[1] = 1.0;
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        let rc = self.time_constant();
        df[(0, 0)] = -1.0 / rc;
        df[(0, 1)] = -Self::OMEGA * (Self::OMEGA * x[1]).sin() / rc;
        df[(1, 0)] = 0.0;
        df[(1, 1)] = 0.0;
    }
}

/// Mathematical pendulum θ'' = -(g/L) sin θ, written once for any scalar.
pub struct Pendulum {
    pub g_over_l: f64,
}

impl Pendulum {
    pub fn energy(&self, state: &[f64]) -> f64 {
        0.5 * state[1] * state[1] - self.g_over_l * state[0].cos()
    }
}

impl<T: Scalar> VectorField<T> for Pendulum {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, x: &[T], out: &mut [T]) {
        let g_over_l = T::from_f64(self.g_over_l).unwrap();
        out[0] = x[1];
        out[1] = -g_over_l * x[0].sin();
    }
}

/// Integrates from t = 0 to `t_end` and returns the final state.
pub fn final_state(
    method: Method,
    rhs: FunctionRef,
    initial: &[f64],
    t_end: f64,
    steps: usize,
) -> Vec<f64> {
    let mut stepper =
        build_stepper(method, rhs, NewtonSettings::default()).expect("method should build");
    let mut state = initial.to_vec();
    solve_ode(stepper.as_mut(), &mut state, t_end, steps, |_, _| {})
        .expect("integration should succeed");
    state
}

pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Ratios error[i] / error[i + 1] for successive halvings of the step.
pub fn convergence_ratios(errors: &[f64]) -> Vec<f64> {
    errors.windows(2).map(|w| w[0] / w[1]).collect()
}
