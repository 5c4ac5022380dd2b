use crate::error::OdeError;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in vector field models.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// An autonomous vector field written once for any scalar type, so the same
/// model can be evaluated with `f64` or with `AutoDiff` to obtain its Jacobian.
pub trait VectorField<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates f(x) into `out`.
    fn apply(&self, x: &[T], out: &mut [T]);
}

/// A one-step method that advances a state vector in place.
pub trait TimeStepper {
    /// Performs one step of size `tau`.
    /// state: current state (overwritten with the state after the step)
    ///
    /// On error the state holds its value from before the call.
    fn step(&mut self, tau: f64, state: &mut [f64]) -> Result<(), OdeError>;
}
