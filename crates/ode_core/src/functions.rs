//! Differentiable vector functions that compose into residual equations.
//!
//! Leaves (`Identity`, `Constant`, user models) and combinators (`Compose`,
//! `Sum`, `Scale`) all implement [`NonlinearFunction`]. Combinators hold their
//! operands through `Rc`, so one node may appear in several graphs. `Constant`
//! and [`Parameter`] use interior mutability: rebinding them between time steps
//! changes every graph that refers to them without rebuilding anything.

use crate::error::{ensure_dim, OdeError};
use nalgebra::DMatrix;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A map F: ℝ^dim_x → ℝ^dim_f with a Jacobian.
pub trait NonlinearFunction {
    fn dim_x(&self) -> usize;

    fn dim_f(&self) -> usize;

    /// Writes F(x) into `f` (length `dim_f()`).
    fn evaluate(&self, x: &[f64], f: &mut [f64]);

    /// Writes the `dim_f() × dim_x()` Jacobian at x into `df`.
    /// Every entry of `df` is overwritten.
    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>);
}

/// Shared handle to a node of a function graph.
pub type FunctionRef = Rc<dyn NonlinearFunction>;

// --- Leaves ---

/// F(x) = x.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    dim: usize,
}

impl Identity {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn shared(dim: usize) -> Rc<Self> {
        Rc::new(Self::new(dim))
    }
}

impl NonlinearFunction for Identity {
    fn dim_x(&self) -> usize {
        self.dim
    }

    fn dim_f(&self) -> usize {
        self.dim
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        f.copy_from_slice(x);
    }

    fn evaluate_deriv(&self, _x: &[f64], df: &mut DMatrix<f64>) {
        df.fill_with_identity();
    }
}

/// F(x) = v for a stored vector v that can be rebound with [`Constant::set`].
#[derive(Debug)]
pub struct Constant {
    value: RefCell<Vec<f64>>,
}

impl Constant {
    /// A zero-valued constant of dimension `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            value: RefCell::new(vec![0.0; dim]),
        }
    }

    pub fn from_value(value: &[f64]) -> Self {
        Self {
            value: RefCell::new(value.to_vec()),
        }
    }

    pub fn shared(dim: usize) -> Rc<Self> {
        Rc::new(Self::new(dim))
    }

    /// Copies `value` into the stored vector. The length is fixed at construction.
    pub fn set(&self, value: &[f64]) -> Result<(), OdeError> {
        let mut stored = self.value.borrow_mut();
        ensure_dim("Constant::set", stored.len(), value.len())?;
        stored.copy_from_slice(value);
        Ok(())
    }

    /// Writes the stored vector into `out` without allocating.
    pub fn copy_value_into(&self, out: &mut [f64]) {
        out.copy_from_slice(&self.value.borrow());
    }

    pub fn dimension(&self) -> usize {
        self.value.borrow().len()
    }
}

impl NonlinearFunction for Constant {
    fn dim_x(&self) -> usize {
        self.value.borrow().len()
    }

    fn dim_f(&self) -> usize {
        self.value.borrow().len()
    }

    fn evaluate(&self, _x: &[f64], f: &mut [f64]) {
        f.copy_from_slice(&self.value.borrow());
    }

    fn evaluate_deriv(&self, _x: &[f64], df: &mut DMatrix<f64>) {
        df.fill(0.0);
    }
}

/// A scalar coefficient shared between graphs, e.g. the step size.
#[derive(Debug, Default)]
pub struct Parameter {
    value: Cell<f64>,
}

impl Parameter {
    pub fn new(value: f64) -> Self {
        Self {
            value: Cell::new(value),
        }
    }

    pub fn shared(value: f64) -> Rc<Self> {
        Rc::new(Self::new(value))
    }

    pub fn set(&self, value: f64) {
        self.value.set(value);
    }

    pub fn get(&self) -> f64 {
        self.value.get()
    }
}

// --- Combinators ---

struct ComposeScratch {
    inner_value: Vec<f64>,
    inner_jac: DMatrix<f64>,
    outer_jac: DMatrix<f64>,
}

/// F(x) = outer(inner(x)). Built with [`compose`].
pub struct Compose {
    outer: FunctionRef,
    inner: FunctionRef,
    scratch: RefCell<ComposeScratch>,
}

impl NonlinearFunction for Compose {
    fn dim_x(&self) -> usize {
        self.inner.dim_x()
    }

    fn dim_f(&self) -> usize {
        self.outer.dim_f()
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        self.inner.evaluate(x, &mut scratch.inner_value);
        self.outer.evaluate(&scratch.inner_value, f);
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        let mut scratch = self.scratch.borrow_mut();
        let ComposeScratch {
            inner_value,
            inner_jac,
            outer_jac,
        } = &mut *scratch;

        self.inner.evaluate(x, inner_value);
        self.inner.evaluate_deriv(x, inner_jac);
        self.outer.evaluate_deriv(inner_value, outer_jac);
        // Chain rule: J = J_outer(inner(x)) * J_inner(x)
        outer_jac.mul_to(inner_jac, df);
    }
}

struct SumScratch {
    value: Vec<f64>,
    jac: DMatrix<f64>,
}

/// F(x) = a(x) + sign * b(x). Built with [`sum`] or [`difference`].
pub struct Sum {
    a: FunctionRef,
    b: FunctionRef,
    sign: f64,
    scratch: RefCell<SumScratch>,
}

impl NonlinearFunction for Sum {
    fn dim_x(&self) -> usize {
        self.a.dim_x()
    }

    fn dim_f(&self) -> usize {
        self.a.dim_f()
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        self.a.evaluate(x, f);
        self.b.evaluate(x, &mut scratch.value);
        for (out, v) in f.iter_mut().zip(scratch.value.iter()) {
            *out += self.sign * v;
        }
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        let mut scratch = self.scratch.borrow_mut();
        self.a.evaluate_deriv(x, df);
        self.b.evaluate_deriv(x, &mut scratch.jac);
        df.zip_apply(&scratch.jac, |out, v| *out += self.sign * v);
    }
}

/// F(x) = p * a(x) with p read from a shared [`Parameter`] at every call.
pub struct Scale {
    factor: Rc<Parameter>,
    inner: FunctionRef,
}

impl NonlinearFunction for Scale {
    fn dim_x(&self) -> usize {
        self.inner.dim_x()
    }

    fn dim_f(&self) -> usize {
        self.inner.dim_f()
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        self.inner.evaluate(x, f);
        let p = self.factor.get();
        for v in f.iter_mut() {
            *v *= p;
        }
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        self.inner.evaluate_deriv(x, df);
        *df *= self.factor.get();
    }
}

// --- Factories ---

/// outer ∘ inner. Fails unless `outer.dim_x() == inner.dim_f()`.
pub fn compose(outer: FunctionRef, inner: FunctionRef) -> Result<FunctionRef, OdeError> {
    ensure_dim("compose", outer.dim_x(), inner.dim_f())?;
    let scratch = ComposeScratch {
        inner_value: vec![0.0; inner.dim_f()],
        inner_jac: DMatrix::zeros(inner.dim_f(), inner.dim_x()),
        outer_jac: DMatrix::zeros(outer.dim_f(), outer.dim_x()),
    };
    Ok(Rc::new(Compose {
        outer,
        inner,
        scratch: RefCell::new(scratch),
    }))
}

/// a + b. Both operands must have the same `dim_x` and `dim_f`.
pub fn sum(a: FunctionRef, b: FunctionRef) -> Result<FunctionRef, OdeError> {
    combine("sum", a, b, 1.0)
}

/// a - b. Both operands must have the same `dim_x` and `dim_f`.
pub fn difference(a: FunctionRef, b: FunctionRef) -> Result<FunctionRef, OdeError> {
    combine("difference", a, b, -1.0)
}

/// factor * inner, where `factor` may be rebound later.
pub fn scale(factor: Rc<Parameter>, inner: FunctionRef) -> FunctionRef {
    Rc::new(Scale { factor, inner })
}

/// value * inner with a private coefficient.
pub fn scale_by(value: f64, inner: FunctionRef) -> FunctionRef {
    scale(Parameter::shared(value), inner)
}

/// -inner.
pub fn negate(inner: FunctionRef) -> FunctionRef {
    scale_by(-1.0, inner)
}

fn combine(
    context: &'static str,
    a: FunctionRef,
    b: FunctionRef,
    sign: f64,
) -> Result<FunctionRef, OdeError> {
    ensure_dim(context, a.dim_x(), b.dim_x())?;
    ensure_dim(context, a.dim_f(), b.dim_f())?;
    let scratch = SumScratch {
        value: vec![0.0; b.dim_f()],
        jac: DMatrix::zeros(b.dim_f(), b.dim_x()),
    };
    Ok(Rc::new(Sum {
        a,
        b,
        sign,
        scratch: RefCell::new(scratch),
    }))
}

/// Central-difference approximation of the Jacobian of `func` at `x`.
///
/// Intended for models without an analytic derivative and for checking
/// analytic ones. Allocates its own work vectors.
pub fn central_difference_jacobian(
    func: &dyn NonlinearFunction,
    x: &[f64],
    step: f64,
    df: &mut DMatrix<f64>,
) {
    let mut xl = x.to_vec();
    let mut xr = x.to_vec();
    let mut fl = vec![0.0; func.dim_f()];
    let mut fr = vec![0.0; func.dim_f()];

    for j in 0..func.dim_x() {
        xl[j] = x[j] - step;
        xr[j] = x[j] + step;
        func.evaluate(&xl, &mut fl);
        func.evaluate(&xr, &mut fr);
        for i in 0..func.dim_f() {
            df[(i, j)] = (fr[i] - fl[i]) / (2.0 * step);
        }
        xl[j] = x[j];
        xr[j] = x[j];
    }
}
