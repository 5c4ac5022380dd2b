//! Fixed-step one-step methods for autonomous systems y' = f(y).
//!
//! Explicit steppers evaluate the right-hand side a fixed number of times.
//! Implicit steppers build their residual once from [`crate::functions`]
//! combinators and rebind the old state and step size before each solve.

use crate::error::{ensure_dim, OdeError};
use crate::functions::{
    compose, difference, scale, sum, Constant, FunctionRef, Identity, NonlinearFunction,
    Parameter,
};
use crate::newton::{NewtonSettings, NewtonSolver};
use crate::traits::TimeStepper;
use log::trace;
use std::rc::Rc;

/// Checks that `rhs` maps ℝⁿ → ℝⁿ and returns n.
pub(crate) fn state_dimension(rhs: &dyn NonlinearFunction) -> Result<usize, OdeError> {
    ensure_dim("right-hand side", rhs.dim_x(), rhs.dim_f())?;
    Ok(rhs.dim_x())
}

/// y ← y + τ f(y)
pub struct ExplicitEuler {
    rhs: FunctionRef,
    slope: Vec<f64>,
}

impl ExplicitEuler {
    pub fn new(rhs: FunctionRef) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        Ok(Self {
            rhs,
            slope: vec![0.0; dim],
        })
    }
}

impl TimeStepper for ExplicitEuler {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        ensure_dim("explicit Euler state", self.slope.len(), state.len())?;
        self.rhs.evaluate(state, &mut self.slope);
        for (y, k) in state.iter_mut().zip(&self.slope) {
            *y += tau * k;
        }
        Ok(())
    }
}

/// Midpoint predictor: ỹ = y + τ/2 · k, then y ← y + τ f(ỹ).
///
/// By default k = f(y), which makes the method identical to [`RungeKutta2`].
/// [`ImprovedEuler::with_carried_slope`] instead reuses f(ỹ) from the previous
/// step as k (zero before the first step).
pub struct ImprovedEuler {
    rhs: FunctionRef,
    slope: Vec<f64>,
    predictor: Vec<f64>,
    carry_slope: bool,
}

impl ImprovedEuler {
    pub fn new(rhs: FunctionRef) -> Result<Self, OdeError> {
        Self::build(rhs, false)
    }

    pub fn with_carried_slope(rhs: FunctionRef) -> Result<Self, OdeError> {
        Self::build(rhs, true)
    }

    fn build(rhs: FunctionRef, carry_slope: bool) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        Ok(Self {
            rhs,
            slope: vec![0.0; dim],
            predictor: vec![0.0; dim],
            carry_slope,
        })
    }
}

impl TimeStepper for ImprovedEuler {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        ensure_dim("improved Euler state", self.slope.len(), state.len())?;
        if !self.carry_slope {
            self.rhs.evaluate(state, &mut self.slope);
        }
        for i in 0..state.len() {
            self.predictor[i] = state[i] + 0.5 * tau * self.slope[i];
        }
        self.rhs.evaluate(&self.predictor, &mut self.slope);
        for (y, k) in state.iter_mut().zip(&self.slope) {
            *y += tau * k;
        }
        Ok(())
    }
}

/// Explicit midpoint rule.
pub struct RungeKutta2 {
    rhs: FunctionRef,
    k1: Vec<f64>,
    k2: Vec<f64>,
    tmp: Vec<f64>,
}

impl RungeKutta2 {
    pub fn new(rhs: FunctionRef) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        Ok(Self {
            rhs,
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            tmp: vec![0.0; dim],
        })
    }
}

impl TimeStepper for RungeKutta2 {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        ensure_dim("RK2 state", self.k1.len(), state.len())?;

        // k1 = f(y)
        self.rhs.evaluate(state, &mut self.k1);

        // k2 = f(y + tau*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + 0.5 * tau * self.k1[i];
        }
        self.rhs.evaluate(&self.tmp, &mut self.k2);

        for (y, k) in state.iter_mut().zip(&self.k2) {
            *y += tau * k;
        }
        Ok(())
    }
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RungeKutta4 {
    rhs: FunctionRef,
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RungeKutta4 {
    pub fn new(rhs: FunctionRef) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        Ok(Self {
            rhs,
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        })
    }
}

impl TimeStepper for RungeKutta4 {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        ensure_dim("RK4 state", self.k1.len(), state.len())?;
        let half = 0.5 * tau;

        // k1 = f(y)
        self.rhs.evaluate(state, &mut self.k1);

        // k2 = f(y + tau*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k1[i];
        }
        self.rhs.evaluate(&self.tmp, &mut self.k2);

        // k3 = f(y + tau*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k2[i];
        }
        self.rhs.evaluate(&self.tmp, &mut self.k3);

        // k4 = f(y + tau*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + tau * self.k3[i];
        }
        self.rhs.evaluate(&self.tmp, &mut self.k4);

        // y_next = y + tau/6 * (k1 + 2k2 + 2k3 + k4)
        let sixth = tau / 6.0;
        for i in 0..state.len() {
            state[i] += sixth * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }
        Ok(())
    }
}

/// Residual, bound quantities and Newton workspace shared by the one-stage
/// implicit methods.
struct ImplicitStep {
    residual: FunctionRef,
    y_old: Rc<Constant>,
    newton: NewtonSolver,
}

impl ImplicitStep {
    fn solve(&mut self, name: &str, state: &mut [f64]) -> Result<(), OdeError> {
        match self.newton.solve(self.residual.as_ref(), state) {
            Ok(report) => {
                trace!("{name} step converged in {} iterations", report.iterations);
                Ok(())
            }
            Err(err) => {
                self.y_old.copy_value_into(state);
                Err(err)
            }
        }
    }
}

/// Solves y_new − y_old − τ f(y_new) = 0 with y_old as the initial guess.
pub struct ImplicitEuler {
    inner: ImplicitStep,
    tau: Rc<Parameter>,
}

impl ImplicitEuler {
    pub fn new(rhs: FunctionRef) -> Result<Self, OdeError> {
        Self::with_settings(rhs, NewtonSettings::default())
    }

    pub fn with_settings(rhs: FunctionRef, settings: NewtonSettings) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        let y_old = Constant::shared(dim);
        let tau = Parameter::shared(0.0);

        let increment = difference(Identity::shared(dim), y_old.clone())?;
        let residual = difference(increment, scale(tau.clone(), rhs))?;

        Ok(Self {
            inner: ImplicitStep {
                residual,
                y_old,
                newton: NewtonSolver::new(dim, settings)?,
            },
            tau,
        })
    }

    /// The residual y ↦ y − y_old − τ f(y) for the currently bound y_old and τ.
    pub fn residual(&self) -> &dyn NonlinearFunction {
        self.inner.residual.as_ref()
    }
}

impl TimeStepper for ImplicitEuler {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        self.inner.y_old.set(state)?;
        self.tau.set(tau);
        self.inner.solve("implicit Euler", state)
    }
}

/// Solves y_new − y_old − τ/2 (f(y_old) + f(y_new)) = 0.
pub struct CrankNicolson {
    inner: ImplicitStep,
    half_tau: Rc<Parameter>,
}

impl CrankNicolson {
    pub fn new(rhs: FunctionRef) -> Result<Self, OdeError> {
        Self::with_settings(rhs, NewtonSettings::default())
    }

    pub fn with_settings(rhs: FunctionRef, settings: NewtonSettings) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        let y_old = Constant::shared(dim);
        let half_tau = Parameter::shared(0.0);

        // f(y_old) is constant in y, so its Jacobian contribution vanishes.
        let old_slope = compose(rhs.clone(), y_old.clone())?;
        let slopes = sum(old_slope, rhs)?;
        let increment = difference(Identity::shared(dim), y_old.clone())?;
        let residual = difference(increment, scale(half_tau.clone(), slopes))?;

        Ok(Self {
            inner: ImplicitStep {
                residual,
                y_old,
                newton: NewtonSolver::new(dim, settings)?,
            },
            half_tau,
        })
    }

    pub fn residual(&self) -> &dyn NonlinearFunction {
        self.inner.residual.as_ref()
    }
}

impl TimeStepper for CrankNicolson {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        self.inner.y_old.set(state)?;
        self.half_tau.set(0.5 * tau);
        self.inner.solve("Crank-Nicolson", state)
    }
}
