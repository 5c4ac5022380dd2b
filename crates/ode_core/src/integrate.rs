use crate::error::OdeError;
use crate::functions::FunctionRef;
use crate::irk::ImplicitRungeKutta;
use crate::newton::NewtonSettings;
use crate::steppers::{
    CrankNicolson, ExplicitEuler, ImplicitEuler, ImprovedEuler, RungeKutta2, RungeKutta4,
};
use crate::tableau::ButcherTableau;
use crate::traits::TimeStepper;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Time-stepping scheme selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Method {
    ExplicitEuler,
    ImprovedEuler,
    ImprovedEulerCarriedSlope,
    RungeKutta2,
    RungeKutta4,
    ImplicitEuler,
    CrankNicolson,
    Gauss { stages: usize },
    Radau { stages: usize },
}

impl Method {
    /// Whether each step solves a nonlinear system.
    pub fn is_implicit(&self) -> bool {
        matches!(
            self,
            Method::ImplicitEuler
                | Method::CrankNicolson
                | Method::Gauss { .. }
                | Method::Radau { .. }
        )
    }
}

/// Builds a stepper for `rhs`. `settings` only affects implicit methods.
pub fn build_stepper(
    method: Method,
    rhs: FunctionRef,
    settings: NewtonSettings,
) -> Result<Box<dyn TimeStepper>, OdeError> {
    let stepper: Box<dyn TimeStepper> = match method {
        Method::ExplicitEuler => Box::new(ExplicitEuler::new(rhs)?),
        Method::ImprovedEuler => Box::new(ImprovedEuler::new(rhs)?),
        Method::ImprovedEulerCarriedSlope => Box::new(ImprovedEuler::with_carried_slope(rhs)?),
        Method::RungeKutta2 => Box::new(RungeKutta2::new(rhs)?),
        Method::RungeKutta4 => Box::new(RungeKutta4::new(rhs)?),
        Method::ImplicitEuler => Box::new(ImplicitEuler::with_settings(rhs, settings)?),
        Method::CrankNicolson => Box::new(CrankNicolson::with_settings(rhs, settings)?),
        Method::Gauss { stages } => {
            let tableau = match stages {
                2 => ButcherTableau::gauss2().clone(),
                3 => ButcherTableau::gauss3().clone(),
                _ => ButcherTableau::gauss_legendre(stages)?,
            };
            Box::new(ImplicitRungeKutta::with_settings(rhs, tableau, settings)?)
        }
        Method::Radau { stages } => {
            let tableau = ButcherTableau::gauss_radau(stages)?;
            Box::new(ImplicitRungeKutta::with_settings(rhs, tableau, settings)?)
        }
    };
    Ok(stepper)
}

/// Advances `state` from t = 0 to `t_end` in `steps` equal steps.
///
/// `observer` sees the initial state and the state after every step. On a
/// failed step `state` holds the last accepted value.
pub fn solve_ode<F>(
    stepper: &mut dyn TimeStepper,
    state: &mut [f64],
    t_end: f64,
    steps: usize,
    mut observer: F,
) -> Result<()>
where
    F: FnMut(f64, &[f64]),
{
    if state.is_empty() {
        bail!("Initial state must have positive dimension.");
    }
    if steps == 0 {
        bail!("ODE integration requires at least one step.");
    }
    if !(t_end.is_finite() && t_end > 0.0) {
        bail!("End time must be positive and finite, got {t_end}.");
    }

    let tau = t_end / steps as f64;
    observer(0.0, state);
    for i in 0..steps {
        let t = i as f64 * tau;
        stepper
            .step(tau, state)
            .with_context(|| format!("Step {} of {} failed at t = {t}.", i + 1, steps))?;
        observer((i + 1) as f64 * tau, state);
    }
    Ok(())
}
