//! Implicit Runge-Kutta stepping on the stacked stage vector.
//!
//! For an s-stage tableau and state dimension n the unknown is
//! Y = (Y_1, ..., Y_s) ∈ ℝ^{sn} and the stage residual is
//!
//! G_i(Y) = Y_i − y_old − τ Σ_j A_ij f(Y_j),
//!
//! whose Jacobian has the block structure δ_ij I − τ A_ij J_f(Y_j).

use crate::error::{ensure_dim, OdeError};
use crate::functions::{Constant, FunctionRef, NonlinearFunction, Parameter};
use crate::newton::{NewtonSettings, NewtonSolver};
use crate::steppers::state_dimension;
use crate::tableau::ButcherTableau;
use crate::traits::TimeStepper;
use log::trace;
use nalgebra::DMatrix;
use std::cell::RefCell;
use std::rc::Rc;

struct StageScratch {
    y_old: Vec<f64>,
    slopes: Vec<f64>,
    jac: DMatrix<f64>,
}

/// The stage residual G of an implicit Runge-Kutta step.
///
/// `y_old` and `tau` are shared with the owning stepper and read at every call.
pub struct StageSystem {
    rhs: FunctionRef,
    a: DMatrix<f64>,
    y_old: Rc<Constant>,
    tau: Rc<Parameter>,
    dim: usize,
    scratch: RefCell<StageScratch>,
}

impl StageSystem {
    pub fn new(
        rhs: FunctionRef,
        a: DMatrix<f64>,
        y_old: Rc<Constant>,
        tau: Rc<Parameter>,
    ) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        let stages = a.nrows();
        if stages == 0 || a.ncols() != stages {
            return Err(OdeError::InvalidTableau(format!(
                "Stage matrix must be square and non-empty, got {}x{}",
                a.nrows(),
                a.ncols()
            )));
        }
        ensure_dim("stage system y_old", dim, y_old.dimension())?;

        let scratch = StageScratch {
            y_old: vec![0.0; dim],
            slopes: vec![0.0; stages * dim],
            jac: DMatrix::zeros(dim, dim),
        };
        Ok(Self {
            rhs,
            a,
            y_old,
            tau,
            dim,
            scratch: RefCell::new(scratch),
        })
    }

    pub fn stages(&self) -> usize {
        self.a.nrows()
    }
}

impl NonlinearFunction for StageSystem {
    fn dim_x(&self) -> usize {
        self.stages() * self.dim
    }

    fn dim_f(&self) -> usize {
        self.stages() * self.dim
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        let n = self.dim;
        let s = self.stages();
        let tau = self.tau.get();
        let mut scratch = self.scratch.borrow_mut();
        let StageScratch { y_old, slopes, .. } = &mut *scratch;

        self.y_old.copy_value_into(y_old);
        for (stage, slope) in x.chunks_exact(n).zip(slopes.chunks_exact_mut(n)) {
            self.rhs.evaluate(stage, slope);
        }

        for i in 0..s {
            for r in 0..n {
                let mut increment = 0.0;
                for j in 0..s {
                    increment += self.a[(i, j)] * slopes[j * n + r];
                }
                f[i * n + r] = x[i * n + r] - y_old[r] - tau * increment;
            }
        }
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        let n = self.dim;
        let s = self.stages();
        let tau = self.tau.get();
        let mut scratch = self.scratch.borrow_mut();
        let jac = &mut scratch.jac;

        for j in 0..s {
            self.rhs.evaluate_deriv(&x[j * n..(j + 1) * n], jac);
            for i in 0..s {
                let coeff = -tau * self.a[(i, j)];
                let mut block = df.view_mut((i * n, j * n), (n, n));
                block.copy_from(jac);
                block *= coeff;
                if i == j {
                    for d in 0..n {
                        block[(d, d)] += 1.0;
                    }
                }
            }
        }
    }
}

/// Implicit Runge-Kutta method for an arbitrary Butcher tableau.
///
/// All stages start from y_old; y is only updated once Newton has converged,
/// so a failed step leaves the state untouched.
pub struct ImplicitRungeKutta {
    rhs: FunctionRef,
    tableau: ButcherTableau,
    system: StageSystem,
    y_old: Rc<Constant>,
    tau: Rc<Parameter>,
    newton: NewtonSolver,
    stage_values: Vec<f64>,
    slope: Vec<f64>,
}

impl ImplicitRungeKutta {
    pub fn new(rhs: FunctionRef, tableau: ButcherTableau) -> Result<Self, OdeError> {
        Self::with_settings(rhs, tableau, NewtonSettings::default())
    }

    pub fn with_settings(
        rhs: FunctionRef,
        tableau: ButcherTableau,
        settings: NewtonSettings,
    ) -> Result<Self, OdeError> {
        let dim = state_dimension(rhs.as_ref())?;
        let y_old = Constant::shared(dim);
        let tau = Parameter::shared(0.0);
        let system = StageSystem::new(rhs.clone(), tableau.a().clone(), y_old.clone(), tau.clone())?;
        let stacked = system.dim_x();

        Ok(Self {
            rhs,
            tableau,
            system,
            y_old,
            tau,
            newton: NewtonSolver::new(stacked, settings)?,
            stage_values: vec![0.0; stacked],
            slope: vec![0.0; dim],
        })
    }

    pub fn tableau(&self) -> &ButcherTableau {
        &self.tableau
    }

    pub fn stage_system(&self) -> &StageSystem {
        &self.system
    }

    /// Stage values Y_1, ..., Y_s of the most recent solve. After a failed
    /// step they hold the last Newton iterate, not a valid stage solution.
    pub fn stage_values(&self) -> &[f64] {
        &self.stage_values
    }
}

impl TimeStepper for ImplicitRungeKutta {
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError> {
        let n = self.slope.len();
        ensure_dim("IRK state", n, state.len())?;
        self.y_old.set(state)?;
        self.tau.set(tau);

        for stage in self.stage_values.chunks_exact_mut(n) {
            stage.copy_from_slice(state);
        }
        let report = self.newton.solve(&self.system, &mut self.stage_values)?;
        trace!(
            "IRK step ({} stages) converged in {} iterations",
            self.tableau.stages(),
            report.iterations
        );

        // y_new = y_old + τ Σ_i b_i f(Y_i)
        let b = self.tableau.b();
        for (i, stage) in self.stage_values.chunks_exact(n).enumerate() {
            self.rhs.evaluate(stage, &mut self.slope);
            for (y, k) in state.iter_mut().zip(&self.slope) {
                *y += tau * b[i] * k;
            }
        }
        Ok(())
    }
}
