//! Quadrature rules on [0, 1] used as collocation nodes.

use crate::error::OdeError;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::f64::consts::PI;

/// Fills `nodes` and `weights` with the s-point Gauss-Legendre rule on [0, 1],
/// where s is the common length of both slices. Nodes are ascending and the
/// rule integrates polynomials of degree 2s − 1 exactly.
pub fn gauss_legendre(nodes: &mut [f64], weights: &mut [f64]) -> Result<(), OdeError> {
    let n = rule_size(nodes, weights)?;
    let m = (n + 1) / 2;
    for i in 0..m {
        // i-th largest root of P_n on [-1, 1]
        let mut x = f64::cos(PI * (i as f64 + 0.75) / (n as f64 + 0.5));
        for _ in 0..100 {
            let (p, dp) = legendre_eval(n, x);
            let dx = -p / dp;
            x += dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_eval(n, x);
        // Half of the [-1, 1] weight 2 / ((1 - x²) P_n'(x)²).
        let w = 1.0 / ((1.0 - x * x) * dp * dp);

        nodes[i] = 0.5 * (1.0 - x);
        nodes[n - 1 - i] = 0.5 * (1.0 + x);
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    Ok(())
}

/// Fills `nodes` and `weights` with the s-point right Gauss-Radau rule on
/// [0, 1] (last node fixed at 1, as in Radau IIA). Exact for degree 2s − 2.
///
/// Nodes and weights are the eigenvalues and first eigenvector components of
/// the Legendre Jacobi matrix whose last diagonal entry is modified so that
/// +1 becomes an eigenvalue.
pub fn gauss_radau(nodes: &mut [f64], weights: &mut [f64]) -> Result<(), OdeError> {
    let n = rule_size(nodes, weights)?;

    let mut jacobi = DMatrix::zeros(n, n);
    for k in 1..n {
        let beta = legendre_recurrence_beta(k);
        jacobi[(k, k - 1)] = beta;
        jacobi[(k - 1, k)] = beta;
    }

    if n == 1 {
        jacobi[(0, 0)] = 1.0;
    } else {
        // Solve (J_{n-1} - I) δ = β_{n-1}² e_{n-1}, then α_n = 1 + δ_{n-1}.
        let beta = legendre_recurrence_beta(n - 1);
        let leading = jacobi.view((0, 0), (n - 1, n - 1)).into_owned();
        let shifted = leading - DMatrix::identity(n - 1, n - 1);
        let mut rhs = DVector::zeros(n - 1);
        rhs[n - 2] = beta * beta;
        let delta = shifted.lu().solve(&rhs).ok_or_else(|| {
            OdeError::InvalidTableau("Failed to modify Jacobi matrix for Radau nodes".into())
        })?;
        jacobi[(n - 1, n - 1)] = 1.0 + delta[n - 2];
    }

    let eigen = SymmetricEigen::new(jacobi);
    let mut pairs: Vec<(f64, f64)> = (0..n)
        .map(|k| {
            let v0 = eigen.eigenvectors[(0, k)];
            (0.5 * (eigen.eigenvalues[k] + 1.0), v0 * v0)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    for (i, (node, weight)) in pairs.into_iter().enumerate() {
        nodes[i] = node;
        weights[i] = weight;
    }
    // The fixed node is exact by construction.
    nodes[n - 1] = 1.0;
    Ok(())
}

fn rule_size(nodes: &[f64], weights: &[f64]) -> Result<usize, OdeError> {
    if nodes.is_empty() {
        return Err(OdeError::InvalidTableau(
            "Quadrature rule needs at least one node".into(),
        ));
    }
    if nodes.len() != weights.len() {
        return Err(OdeError::InvalidTableau(format!(
            "Node and weight arrays differ in length ({} vs {})",
            nodes.len(),
            weights.len()
        )));
    }
    Ok(nodes.len())
}

/// Off-diagonal entry k of the Legendre Jacobi matrix.
fn legendre_recurrence_beta(k: usize) -> f64 {
    let k = k as f64;
    k / (4.0 * k * k - 1.0).sqrt()
}

/// Returns (P_n(x), P_n'(x)) for |x| < 1.
fn legendre_eval(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p0 = 1.0;
    let mut p1 = x;
    if n == 1 {
        return (p1, 1.0);
    }
    for k in 2..=n {
        let kf = k as f64;
        let pn = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        p0 = p1;
        p1 = pn;
    }
    let dp = (n as f64) * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}
