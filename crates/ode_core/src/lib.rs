/// The `ode_core` crate provides fixed-step integrators for systems y' = f(y).
/// Right-hand sides and implicit-step residuals are differentiable function
/// graphs, so every implicit method reduces to one Newton solve per step.
///
/// Key components:
/// - **Functions**: `NonlinearFunction` trait with composable leaves and combinators.
/// - **Newton**: Full-step Newton solver with a reusable workspace.
/// - **Steppers**: Explicit Euler, improved Euler, RK2, RK4, implicit Euler, Crank-Nicolson.
/// - **IRK**: Collocation Runge-Kutta methods built from Gauss-Legendre and Radau nodes.
/// - **Autodiff**: Forward-mode `AutoDiff<N>` numbers for Jacobians of generic models.
pub mod autodiff;
pub mod error;
pub mod functions;
pub mod integrate;
pub mod irk;
pub mod newton;
pub mod quadrature;
pub mod steppers;
pub mod tableau;
pub mod traits;

pub use error::OdeError;
