//! Butcher tableaux for collocation Runge-Kutta methods.

use crate::error::OdeError;
use crate::quadrature::{gauss_legendre, gauss_radau};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const CONSISTENCY_TOL: f64 = 1e-10;

/// Coefficients (A, b, c) of an s-stage Runge-Kutta method.
///
/// Every constructor checks `Σ_j A_ij = c_i` and `Σ_i b_i = 1`, and so does
/// deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTableau")]
pub struct ButcherTableau {
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
}

/// Unchecked wire form of [`ButcherTableau`].
#[derive(Deserialize)]
struct RawTableau {
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
}

impl TryFrom<RawTableau> for ButcherTableau {
    type Error = OdeError;

    fn try_from(raw: RawTableau) -> Result<Self, Self::Error> {
        ButcherTableau::new(raw.a, raw.b, raw.c)
    }
}

static GAUSS2: LazyLock<ButcherTableau> = LazyLock::new(|| {
    let r3 = 3.0_f64.sqrt();
    ButcherTableau {
        a: DMatrix::from_row_slice(
            2,
            2,
            &[0.25, 0.25 - r3 / 6.0, 0.25 + r3 / 6.0, 0.25],
        ),
        b: DVector::from_vec(vec![0.5, 0.5]),
        c: DVector::from_vec(vec![0.5 - r3 / 6.0, 0.5 + r3 / 6.0]),
    }
});

static GAUSS3: LazyLock<ButcherTableau> = LazyLock::new(|| {
    let r15 = 15.0_f64.sqrt();
    ButcherTableau {
        a: DMatrix::from_row_slice(
            3,
            3,
            &[
                5.0 / 36.0,
                2.0 / 9.0 - r15 / 15.0,
                5.0 / 36.0 - r15 / 30.0,
                5.0 / 36.0 + r15 / 24.0,
                2.0 / 9.0,
                5.0 / 36.0 - r15 / 24.0,
                5.0 / 36.0 + r15 / 30.0,
                2.0 / 9.0 + r15 / 15.0,
                5.0 / 36.0,
            ],
        ),
        b: DVector::from_vec(vec![5.0 / 18.0, 4.0 / 9.0, 5.0 / 18.0]),
        c: DVector::from_vec(vec![0.5 - r15 / 10.0, 0.5, 0.5 + r15 / 10.0]),
    }
});

impl ButcherTableau {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>, c: DVector<f64>) -> Result<Self, OdeError> {
        let s = c.len();
        if s == 0 {
            return Err(OdeError::InvalidTableau("Tableau needs at least one stage".into()));
        }
        if a.nrows() != s || a.ncols() != s || b.len() != s {
            return Err(OdeError::InvalidTableau(format!(
                "Inconsistent shapes: A is {}x{}, b has {} entries, c has {}",
                a.nrows(),
                a.ncols(),
                b.len(),
                s
            )));
        }
        if a.iter().chain(b.iter()).chain(c.iter()).any(|v| !v.is_finite()) {
            return Err(OdeError::InvalidTableau("Entries must be finite".into()));
        }
        for i in 0..s {
            let row_sum: f64 = a.row(i).sum();
            if (row_sum - c[i]).abs() > CONSISTENCY_TOL {
                return Err(OdeError::InvalidTableau(format!(
                    "Row {i} of A sums to {row_sum}, expected c[{i}] = {}",
                    c[i]
                )));
            }
        }
        let weight_sum = b.sum();
        if (weight_sum - 1.0).abs() > CONSISTENCY_TOL {
            return Err(OdeError::InvalidTableau(format!(
                "Weights sum to {weight_sum}, expected 1"
            )));
        }
        Ok(Self { a, b, c })
    }

    /// Collocation method with the given nodes.
    pub fn from_nodes(nodes: &[f64]) -> Result<Self, OdeError> {
        let (a, b) = collocation_coefficients(nodes)?;
        Self::new(a, b, DVector::from_column_slice(nodes))
    }

    /// s-stage Gauss-Legendre collocation, order 2s.
    pub fn gauss_legendre(stages: usize) -> Result<Self, OdeError> {
        let mut nodes = vec![0.0; stages];
        let mut weights = vec![0.0; stages];
        gauss_legendre(&mut nodes, &mut weights)?;
        Self::from_nodes(&nodes)
    }

    /// s-stage Radau IIA collocation, order 2s − 1.
    pub fn gauss_radau(stages: usize) -> Result<Self, OdeError> {
        let mut nodes = vec![0.0; stages];
        let mut weights = vec![0.0; stages];
        gauss_radau(&mut nodes, &mut weights)?;
        Self::from_nodes(&nodes)
    }

    /// Closed-form 2-stage Gauss-Legendre tableau.
    pub fn gauss2() -> &'static ButcherTableau {
        &GAUSS2
    }

    /// Closed-form 3-stage Gauss-Legendre tableau.
    pub fn gauss3() -> &'static ButcherTableau {
        &GAUSS3
    }

    pub fn stages(&self) -> usize {
        self.c.len()
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn c(&self) -> &DVector<f64> {
        &self.c
    }
}

/// Computes the collocation matrix A and weights b for distinct nodes c:
/// A_ij = ∫₀^{c_i} ℓ_j(t) dt and b_j = ∫₀¹ ℓ_j(t) dt, where ℓ_j is the
/// Lagrange basis polynomial of node j.
pub fn collocation_coefficients(nodes: &[f64]) -> Result<(DMatrix<f64>, DVector<f64>), OdeError> {
    let s = nodes.len();
    if s == 0 {
        return Err(OdeError::InvalidTableau(
            "Collocation needs at least one node".into(),
        ));
    }
    if nodes.iter().any(|c| !c.is_finite()) {
        return Err(OdeError::InvalidTableau("Nodes must be finite".into()));
    }
    for i in 0..s {
        for j in (i + 1)..s {
            if (nodes[i] - nodes[j]).abs() < 1e-12 {
                return Err(OdeError::InvalidTableau(format!(
                    "Nodes {i} and {j} coincide ({})",
                    nodes[i]
                )));
            }
        }
    }

    let mut a = DMatrix::zeros(s, s);
    let mut b = DVector::zeros(s);
    let mut basis = vec![0.0; s];
    for j in 0..s {
        lagrange_basis(nodes, j, &mut basis);
        b[j] = integrate_polynomial(&basis, 1.0);
        for i in 0..s {
            a[(i, j)] = integrate_polynomial(&basis, nodes[i]);
        }
    }

    debug!("Derived {s}-stage collocation tableau for nodes {nodes:?}");
    Ok((a, b))
}

/// Monomial coefficients (ascending degree) of ℓ_j(t) = Π_{k≠j} (t − c_k)/(c_j − c_k).
fn lagrange_basis(nodes: &[f64], j: usize, coeffs: &mut [f64]) {
    coeffs.fill(0.0);
    coeffs[0] = 1.0;
    let cj = nodes[j];
    let mut degree = 0;
    for (k, &ck) in nodes.iter().enumerate() {
        if k == j {
            continue;
        }
        let denom = cj - ck;
        // Multiply by (t - c_k) / denom, highest degree first.
        for d in (0..=degree).rev() {
            coeffs[d + 1] += coeffs[d] / denom;
            coeffs[d] *= -ck / denom;
        }
        degree += 1;
    }
}

fn integrate_polynomial(coeffs: &[f64], upper: f64) -> f64 {
    let mut sum = 0.0;
    for (deg, &c) in coeffs.iter().enumerate() {
        let power = upper.powi((deg + 1) as i32);
        sum += c * power / ((deg + 1) as f64);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_diff(lhs: &DMatrix<f64>, rhs: &DMatrix<f64>) -> f64 {
        (lhs - rhs).amax()
    }

    fn assert_same_tableau(derived: &ButcherTableau, reference: &ButcherTableau) {
        assert_eq!(derived.stages(), reference.stages());
        assert!(max_diff(derived.a(), reference.a()) < 1e-12);
        assert!((derived.b() - reference.b()).amax() < 1e-12);
        assert!((derived.c() - reference.c()).amax() < 1e-12);
    }

    #[test]
    fn derived_gauss_tableaux_match_closed_forms() {
        let gauss2 = ButcherTableau::gauss_legendre(2).expect("2 stages");
        assert_same_tableau(&gauss2, ButcherTableau::gauss2());

        let gauss3 = ButcherTableau::gauss_legendre(3).expect("3 stages");
        assert_same_tableau(&gauss3, ButcherTableau::gauss3());
    }

    #[test]
    fn one_stage_rules_are_midpoint_and_implicit_euler() {
        let midpoint = ButcherTableau::gauss_legendre(1).expect("1 stage");
        assert!((midpoint.a()[(0, 0)] - 0.5).abs() < 1e-15);
        assert!((midpoint.b()[0] - 1.0).abs() < 1e-15);
        assert!((midpoint.c()[0] - 0.5).abs() < 1e-15);

        let euler = ButcherTableau::gauss_radau(1).expect("1 stage");
        assert!((euler.a()[(0, 0)] - 1.0).abs() < 1e-15);
        assert!((euler.b()[0] - 1.0).abs() < 1e-15);
        assert_eq!(euler.c()[0], 1.0);
    }

    #[test]
    fn radau_two_stage_is_radau_iia() {
        let radau = ButcherTableau::gauss_radau(2).expect("2 stages");
        let expected_a =
            DMatrix::from_row_slice(2, 2, &[5.0 / 12.0, -1.0 / 12.0, 0.75, 0.25]);
        assert!(max_diff(radau.a(), &expected_a) < 1e-12);
        assert!((radau.b()[0] - 0.75).abs() < 1e-12);
        assert!((radau.b()[1] - 0.25).abs() < 1e-12);
        // Stiffly accurate: last row of A equals b.
        for j in 0..2 {
            assert!((radau.a()[(1, j)] - radau.b()[j]).abs() < 1e-12);
        }
    }

    #[test]
    fn derived_tableaux_are_consistent() {
        for s in 1..=4 {
            for tableau in [
                ButcherTableau::gauss_legendre(s).expect("gauss"),
                ButcherTableau::gauss_radau(s).expect("radau"),
            ] {
                for i in 0..s {
                    assert!((tableau.a().row(i).sum() - tableau.c()[i]).abs() < 1e-12);
                }
                assert!((tableau.b().sum() - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn gauss_tableau_satisfies_collocation_conditions() {
        // C(s): Σ_j a_ij c_j^{k-1} = c_i^k / k for k = 1..s.
        // B(2s): Σ_i b_i c_i^{k-1} = 1 / k for k = 1..2s.
        let s = 3;
        let tableau = ButcherTableau::gauss_legendre(s).expect("3 stages");
        let (a, b, c) = (tableau.a(), tableau.b(), tableau.c());
        for k in 1..=s {
            for i in 0..s {
                let lhs: f64 = (0..s).map(|j| a[(i, j)] * c[j].powi(k as i32 - 1)).sum();
                assert!((lhs - c[i].powi(k as i32) / k as f64).abs() < 1e-12);
            }
        }
        for k in 1..=2 * s {
            let lhs: f64 = (0..s).map(|i| b[i] * c[i].powi(k as i32 - 1)).sum();
            assert!((lhs - 1.0 / k as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn collocation_rejects_bad_nodes() {
        assert!(collocation_coefficients(&[]).is_err());
        assert!(collocation_coefficients(&[0.2, 0.2]).is_err());
        assert!(collocation_coefficients(&[0.1, f64::NAN]).is_err());
    }

    #[test]
    fn new_rejects_inconsistent_tableaux() {
        let a = DMatrix::from_row_slice(1, 1, &[0.5]);
        let b = DVector::from_vec(vec![1.0]);

        let wrong_c = DVector::from_vec(vec![0.4]);
        let err = ButcherTableau::new(a.clone(), b.clone(), wrong_c).expect_err("row sum");
        assert!(matches!(err, OdeError::InvalidTableau(_)));

        let c = DVector::from_vec(vec![0.5]);
        let wrong_b = DVector::from_vec(vec![0.9]);
        assert!(ButcherTableau::new(a.clone(), wrong_b, c.clone()).is_err());

        let short_b = DVector::from_vec(vec![0.5, 0.5]);
        assert!(ButcherTableau::new(a.clone(), short_b, c.clone()).is_err());

        let nan_a = DMatrix::from_row_slice(1, 1, &[f64::NAN]);
        assert!(ButcherTableau::new(nan_a, b.clone(), c.clone()).is_err());

        assert!(ButcherTableau::new(a, b, c).is_ok());
    }

    #[test]
    fn deserialization_validates_tableau() {
        let json = serde_json::to_string(ButcherTableau::gauss2()).expect("serialize");
        let restored: ButcherTableau = serde_json::from_str(&json).expect("valid tableau");
        assert_same_tableau(&restored, ButcherTableau::gauss2());

        let mut value: serde_json::Value = serde_json::from_str(&json).expect("json");
        value["b"] = serde_json::to_value(DVector::from_vec(vec![1.0])).expect("b");
        value["a"] = serde_json::to_value(DMatrix::from_element(2, 2, 0.9)).expect("a");
        let err = serde_json::from_value::<ButcherTableau>(value).expect_err("short b");
        assert!(err.to_string().contains("Invalid tableau"), "{err}");

        let mut value: serde_json::Value = serde_json::from_str(&json).expect("json");
        value["a"] = serde_json::to_value(DMatrix::from_element(2, 2, 0.9)).expect("a");
        let err = serde_json::from_value::<ButcherTableau>(value).expect_err("row sums");
        assert!(err.to_string().contains("Row 0 of A sums to 1.8"), "{err}");
    }

    #[test]
    fn reference_tableaux_are_shared() {
        assert!(std::ptr::eq(ButcherTableau::gauss2(), ButcherTableau::gauss2()));
        assert_eq!(ButcherTableau::gauss3().stages(), 3);
    }
}
