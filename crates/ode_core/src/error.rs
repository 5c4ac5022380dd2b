use thiserror::Error;

/// Failures surfaced by function construction, Newton solves and time steps.
///
/// None of these are retried inside the crate. A stepper that returns an
/// error has restored (or never touched) the caller's state vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OdeError {
    #[error("Dimension mismatch in {context}: expected {expected}, got {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Jacobian is singular at Newton iteration {iteration}.")]
    SingularJacobian { iteration: usize },

    /// Iteration cap reached, or the residual became non-finite.
    #[error("Newton solver stopped after {iterations} iterations without converging (‖F(x)‖ = {residual_norm:e}).")]
    NonConvergence { iterations: usize, residual_norm: f64 },

    #[error("Invalid tableau: {0}")]
    InvalidTableau(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl OdeError {
    pub(crate) fn mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        OdeError::DimensionMismatch {
            context,
            expected,
            found,
        }
    }
}

/// Returns `DimensionMismatch` unless `found == expected`.
pub(crate) fn ensure_dim(
    context: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), OdeError> {
    if expected == found {
        Ok(())
    } else {
        Err(OdeError::mismatch(context, expected, found))
    }
}
