use crate::error::{ensure_dim, OdeError};
use crate::functions::NonlinearFunction;
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 100,
            tolerance: 1e-10,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> Result<(), OdeError> {
        if self.max_steps == 0 {
            return Err(OdeError::InvalidSettings(
                "max_steps must be greater than zero.".into(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(OdeError::InvalidSettings(format!(
                "tolerance must be positive and finite, got {}.",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonReport {
    /// Number of Newton updates applied to the initial guess.
    pub iterations: usize,
    /// ‖F(x)‖₂ at the returned iterate.
    pub residual_norm: f64,
}

/// Solves the linear system of one Newton iteration.
///
/// Residual and Jacobian assembly never depend on the implementor, so a
/// different factorisation can be swapped in without touching the equations.
pub trait LinearSolver {
    /// Overwrites `rhs` with the solution of `matrix * Δ = rhs`.
    /// Returns `false` if the matrix could not be factored.
    fn solve_in_place(&mut self, matrix: &DMatrix<f64>, rhs: &mut DVector<f64>) -> bool;
}

/// Dense LU with partial pivoting.
///
/// nalgebra's `LU` owns its storage, so every call copies the matrix and
/// allocates once.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve_in_place(&mut self, matrix: &DMatrix<f64>, rhs: &mut DVector<f64>) -> bool {
        matrix.clone().lu().solve_mut(rhs)
    }
}

/// Full-step Newton iteration x ← x − J(x)⁻¹F(x) with a reusable workspace.
pub struct NewtonSolver<L: LinearSolver = DenseLu> {
    settings: NewtonSettings,
    residual: DVector<f64>,
    delta: DVector<f64>,
    jacobian: DMatrix<f64>,
    linear: L,
}

impl NewtonSolver<DenseLu> {
    pub fn new(dim: usize, settings: NewtonSettings) -> Result<Self, OdeError> {
        Self::with_linear_solver(dim, settings, DenseLu)
    }
}

impl<L: LinearSolver> NewtonSolver<L> {
    pub fn with_linear_solver(
        dim: usize,
        settings: NewtonSettings,
        linear: L,
    ) -> Result<Self, OdeError> {
        settings.validate()?;
        Ok(Self {
            settings,
            residual: DVector::zeros(dim),
            delta: DVector::zeros(dim),
            jacobian: DMatrix::zeros(dim, dim),
            linear,
        })
    }

    pub fn dimension(&self) -> usize {
        self.residual.len()
    }

    /// Drives `x` to a root of `equ`. `x` is the initial guess on entry and
    /// the converged solution on success; after a failure it holds the last
    /// iterate and must not be used as a solution.
    pub fn solve(
        &mut self,
        equ: &dyn NonlinearFunction,
        x: &mut [f64],
    ) -> Result<NewtonReport, OdeError> {
        let dim = self.dimension();
        ensure_dim("Newton equation dim_x", dim, equ.dim_x())?;
        ensure_dim("Newton equation dim_f", dim, equ.dim_f())?;
        ensure_dim("Newton initial guess", dim, x.len())?;

        let max_steps = self.settings.max_steps;
        let mut iterations = 0usize;

        loop {
            equ.evaluate(x, self.residual.as_mut_slice());
            let residual_norm = self.residual.norm();
            trace!("Newton iteration {iterations}: ‖F(x)‖ = {residual_norm:e}");

            if !residual_norm.is_finite() {
                warn!("Newton residual became non-finite after {iterations} iterations");
                return Err(OdeError::NonConvergence {
                    iterations,
                    residual_norm,
                });
            }

            if residual_norm < self.settings.tolerance {
                debug!("Newton converged in {iterations} iterations (‖F(x)‖ = {residual_norm:e})");
                return Ok(NewtonReport {
                    iterations,
                    residual_norm,
                });
            }

            if iterations >= max_steps {
                warn!("Newton failed to converge in {max_steps} steps (‖F(x)‖ = {residual_norm:e})");
                return Err(OdeError::NonConvergence {
                    iterations,
                    residual_norm,
                });
            }

            equ.evaluate_deriv(x, &mut self.jacobian);
            self.delta.copy_from(&self.residual);
            let solved = self.linear.solve_in_place(&self.jacobian, &mut self.delta);
            if !solved || self.delta.iter().any(|v| !v.is_finite()) {
                warn!("Jacobian is singular at Newton iteration {iterations}");
                return Err(OdeError::SingularJacobian {
                    iteration: iterations,
                });
            }

            for (xi, di) in x.iter_mut().zip(self.delta.iter()) {
                *xi -= di;
            }
            iterations += 1;
        }
    }
}

/// One-off solve with a freshly allocated workspace.
pub fn solve_newton(
    equ: &dyn NonlinearFunction,
    x: &mut [f64],
    settings: NewtonSettings,
) -> Result<NewtonReport, OdeError> {
    NewtonSolver::new(equ.dim_x(), settings)?.solve(equ, x)
}
