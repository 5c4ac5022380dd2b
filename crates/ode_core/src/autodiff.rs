use crate::error::{ensure_dim, OdeError};
use crate::functions::NonlinearFunction;
use crate::traits::VectorField;
use nalgebra::DMatrix;
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::fmt;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Forward-mode AD number carrying the gradient with respect to `N`
/// independent variables.
/// value: real part
/// deriv: ∂value/∂x_i for i in 0..N
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct AutoDiff<const N: usize> {
    value: f64,
    deriv: [f64; N],
}

impl<const N: usize> AutoDiff<N> {
    /// A value that does not depend on any variable.
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            deriv: [0.0; N],
        }
    }

    /// The independent variable number `index`, seeded with ∂x_index/∂x_index = 1.
    pub fn variable(value: f64, index: usize) -> Self {
        let mut deriv = [0.0; N];
        deriv[index] = 1.0;
        Self { value, deriv }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn deriv(&self) -> &[f64; N] {
        &self.deriv
    }

    /// Result of applying a scalar function with derivative `slope` at `self`.
    fn chain(self, value: f64, slope: f64) -> Self {
        let mut deriv = self.deriv;
        for d in &mut deriv {
            *d *= slope;
        }
        Self { value, deriv }
    }

    /// Result of a binary function with partial derivatives `da` and `db`.
    fn combine(self, other: Self, value: f64, da: f64, db: f64) -> Self {
        let mut deriv = [0.0; N];
        for i in 0..N {
            deriv[i] = da * self.deriv[i] + db * other.deriv[i];
        }
        Self { value, deriv }
    }

    fn is_constant(&self) -> bool {
        self.deriv.iter().all(|d| *d == 0.0)
    }
}

impl<const N: usize> fmt::Display for AutoDiff<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value: {}, Deriv: [", self.value)?;
        for (i, d) in self.deriv.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl<const N: usize> From<f64> for AutoDiff<N> {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

// Implement generic traits for AutoDiff to satisfy Scalar (Float)

impl<const N: usize> Zero for AutoDiff<N> {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.is_constant()
    }
}

impl<const N: usize> One for AutoDiff<N> {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl<const N: usize> Add for AutoDiff<N> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.combine(rhs, self.value + rhs.value, 1.0, 1.0)
    }
}

impl<const N: usize> Sub for AutoDiff<N> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.combine(rhs, self.value - rhs.value, 1.0, -1.0)
    }
}

impl<const N: usize> Mul for AutoDiff<N> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.combine(rhs, self.value * rhs.value, rhs.value, self.value)
    }
}

impl<const N: usize> Div for AutoDiff<N> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.value;
        self.combine(
            rhs,
            self.value * inv,
            inv,
            -self.value * inv * inv,
        )
    }
}

impl<const N: usize> Rem for AutoDiff<N> {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // a % b = a - trunc(a / b) * b
        let q = (self.value / rhs.value).trunc();
        self.combine(rhs, self.value % rhs.value, 1.0, -q)
    }
}

impl<const N: usize> Neg for AutoDiff<N> {
    type Output = Self;
    fn neg(self) -> Self {
        self.chain(-self.value, -1.0)
    }
}

impl<const N: usize> Add<f64> for AutoDiff<N> {
    type Output = Self;
    fn add(self, rhs: f64) -> Self {
        self.chain(self.value + rhs, 1.0)
    }
}

impl<const N: usize> Sub<f64> for AutoDiff<N> {
    type Output = Self;
    fn sub(self, rhs: f64) -> Self {
        self.chain(self.value - rhs, 1.0)
    }
}

impl<const N: usize> Mul<f64> for AutoDiff<N> {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        self.chain(self.value * rhs, rhs)
    }
}

impl<const N: usize> Div<f64> for AutoDiff<N> {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        self.chain(self.value / rhs, 1.0 / rhs)
    }
}

impl<const N: usize> Add<AutoDiff<N>> for f64 {
    type Output = AutoDiff<N>;
    fn add(self, rhs: AutoDiff<N>) -> AutoDiff<N> {
        rhs + self
    }
}

impl<const N: usize> Sub<AutoDiff<N>> for f64 {
    type Output = AutoDiff<N>;
    fn sub(self, rhs: AutoDiff<N>) -> AutoDiff<N> {
        rhs.chain(self - rhs.value, -1.0)
    }
}

impl<const N: usize> Mul<AutoDiff<N>> for f64 {
    type Output = AutoDiff<N>;
    fn mul(self, rhs: AutoDiff<N>) -> AutoDiff<N> {
        rhs * self
    }
}

impl<const N: usize> Div<AutoDiff<N>> for f64 {
    type Output = AutoDiff<N>;
    fn div(self, rhs: AutoDiff<N>) -> AutoDiff<N> {
        let inv = 1.0 / rhs.value;
        rhs.chain(self * inv, -self * inv * inv)
    }
}

impl<const N: usize> AddAssign for AutoDiff<N> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl<const N: usize> SubAssign for AutoDiff<N> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl<const N: usize> MulAssign for AutoDiff<N> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl<const N: usize> DivAssign for AutoDiff<N> {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}
impl<const N: usize> RemAssign for AutoDiff<N> {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl<const N: usize> Num for AutoDiff<N> {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix).map(Self::constant)
    }
}

impl<const N: usize> ToPrimitive for AutoDiff<N> {
    fn to_i64(&self) -> Option<i64> {
        self.value.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.value.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.value)
    }
}

impl<const N: usize> FromPrimitive for AutoDiff<N> {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl<const N: usize> NumCast for AutoDiff<N> {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl<const N: usize> Float for AutoDiff<N> {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::constant(-0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.value.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.value.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.value.is_finite()
    }
    fn is_normal(self) -> bool {
        self.value.is_normal()
    }
    fn classify(self) -> std::num::FpCategory {
        self.value.classify()
    }

    // Piecewise-constant functions have zero derivative almost everywhere.
    fn floor(self) -> Self {
        self.chain(self.value.floor(), 0.0)
    }
    fn ceil(self) -> Self {
        self.chain(self.value.ceil(), 0.0)
    }
    fn round(self) -> Self {
        self.chain(self.value.round(), 0.0)
    }
    fn trunc(self) -> Self {
        self.chain(self.value.trunc(), 0.0)
    }
    fn fract(self) -> Self {
        self.chain(self.value.fract(), 1.0)
    }
    fn abs(self) -> Self {
        let slope = if self.value >= 0.0 { 1.0 } else { -1.0 };
        self.chain(self.value.abs(), slope)
    }
    fn signum(self) -> Self {
        self.chain(self.value.signum(), 0.0)
    }
    fn is_sign_positive(self) -> bool {
        self.value.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.value.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        let inv = 1.0 / self.value;
        self.chain(inv, -inv * inv)
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        let slope = n as f64 * self.value.powi(n - 1);
        self.chain(self.value.powi(n), slope)
    }

    fn powf(self, n: Self) -> Self {
        let value = self.value.powf(n.value);
        if n.is_constant() {
            return self.chain(value, n.value * self.value.powf(n.value - 1.0));
        }
        // x^y = exp(y * ln(x))
        self.combine(
            n,
            value,
            n.value * self.value.powf(n.value - 1.0),
            value * self.value.ln(),
        )
    }

    fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s)
    }

    fn exp(self) -> Self {
        let e = self.value.exp();
        self.chain(e, e)
    }

    fn exp2(self) -> Self {
        let e = self.value.exp2();
        self.chain(e, e * std::f64::consts::LN_2)
    }
    fn ln(self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.value.log2(), 1.0 / (self.value * std::f64::consts::LN_2))
    }
    fn log10(self) -> Self {
        self.chain(self.value.log10(), 1.0 / (self.value * std::f64::consts::LN_10))
    }

    fn max(self, other: Self) -> Self {
        if self.value > other.value {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.value < other.value {
            self
        } else {
            other
        }
    }

    fn abs_sub(self, other: Self) -> Self {
        if self.value > other.value {
            self - other
        } else {
            Self::zero()
        }
    }

    fn cbrt(self) -> Self {
        let c = self.value.cbrt();
        self.chain(c, 1.0 / (3.0 * c * c))
    }
    fn hypot(self, other: Self) -> Self {
        let h = self.value.hypot(other.value);
        self.combine(other, h, self.value / h, other.value / h)
    }

    fn sin(self) -> Self {
        self.chain(self.value.sin(), self.value.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.value.cos(), -self.value.sin())
    }
    fn tan(self) -> Self {
        let t = self.value.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn asin(self) -> Self {
        let slope = 1.0 / (1.0 - self.value * self.value).sqrt();
        self.chain(self.value.asin(), slope)
    }
    fn acos(self) -> Self {
        let slope = -1.0 / (1.0 - self.value * self.value).sqrt();
        self.chain(self.value.acos(), slope)
    }
    fn atan(self) -> Self {
        self.chain(self.value.atan(), 1.0 / (1.0 + self.value * self.value))
    }
    fn atan2(self, other: Self) -> Self {
        // self = y, other = x
        let r2 = self.value * self.value + other.value * other.value;
        self.combine(
            other,
            self.value.atan2(other.value),
            other.value / r2,
            -self.value / r2,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn exp_m1(self) -> Self {
        self.chain(self.value.exp_m1(), self.value.exp())
    }
    fn ln_1p(self) -> Self {
        self.chain(self.value.ln_1p(), 1.0 / (1.0 + self.value))
    }
    fn sinh(self) -> Self {
        self.chain(self.value.sinh(), self.value.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.value.cosh(), self.value.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.value.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        let slope = 1.0 / (self.value * self.value + 1.0).sqrt();
        self.chain(self.value.asinh(), slope)
    }
    fn acosh(self) -> Self {
        let slope = 1.0 / (self.value * self.value - 1.0).sqrt();
        self.chain(self.value.acosh(), slope)
    }
    fn atanh(self) -> Self {
        self.chain(self.value.atanh(), 1.0 / (1.0 - self.value * self.value))
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.value.integer_decode()
    }
}

// --- Jacobian adapter ---

/// Exposes a [`VectorField`] model as a [`NonlinearFunction`] whose Jacobian
/// is obtained from a single `AutoDiff<N>` evaluation with all N directions
/// seeded at once.
pub struct AutoDiffFunction<M, const N: usize> {
    model: M,
}

impl<M, const N: usize> AutoDiffFunction<M, N>
where
    M: VectorField<f64> + VectorField<AutoDiff<N>>,
{
    pub fn new(model: M) -> Result<Self, OdeError> {
        ensure_dim(
            "AutoDiffFunction model",
            N,
            <M as VectorField<f64>>::dimension(&model),
        )?;
        ensure_dim(
            "AutoDiffFunction model",
            N,
            <M as VectorField<AutoDiff<N>>>::dimension(&model),
        )?;
        Ok(Self { model })
    }
}

impl<M, const N: usize> NonlinearFunction for AutoDiffFunction<M, N>
where
    M: VectorField<f64> + VectorField<AutoDiff<N>>,
{
    fn dim_x(&self) -> usize {
        N
    }

    fn dim_f(&self) -> usize {
        N
    }

    fn evaluate(&self, x: &[f64], f: &mut [f64]) {
        <M as VectorField<f64>>::apply(&self.model, x, f);
    }

    fn evaluate_deriv(&self, x: &[f64], df: &mut DMatrix<f64>) {
        let ad_x: [AutoDiff<N>; N] = std::array::from_fn(|i| AutoDiff::variable(x[i], i));
        let mut ad_out = [AutoDiff::<N>::zero(); N];
        <M as VectorField<AutoDiff<N>>>::apply(&self.model, &ad_x, &mut ad_out);

        for (i, row) in ad_out.iter().enumerate() {
            for (j, d) in row.deriv().iter().enumerate() {
                df[(i, j)] = *d;
            }
        }
    }
}
