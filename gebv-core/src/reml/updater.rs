//! Variance-component update rules.
//!
//! Score vector and information matrix for the Newton-type updates
//! (Average Information, Newton-Raphson, Fisher scoring), plus the
//! expectation-maximization step used to open the iteration from
//! rough starting values.

use gebv_linalg::DenseMatrix;

use crate::error::{ModelError, Result};
use crate::reml::projector::{Projection, RemlWorkspace};

/// Which second-order update rule drives the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemlMethod {
    /// Average Information: fast, the default.
    Ai,
    /// Newton-Raphson on the observed information.
    NewtonRaphson,
    /// Fisher scoring on the expected information.
    Fisher,
}

impl RemlMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ai" => Ok(RemlMethod::Ai),
            "nr" | "newton-raphson" => Ok(RemlMethod::NewtonRaphson),
            "fisher" => Ok(RemlMethod::Fisher),
            other => Err(ModelError::Value(format!(
                "unknown REML method '{}', expected one of: ai, nr, fisher",
                other
            ))),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RemlMethod::Ai => "AI",
            RemlMethod::NewtonRaphson => "NR",
            RemlMethod::Fisher => "Fisher",
        }
    }
}

/// REML score: s_k = -1/2 (tr(P D_k) - y' P D_k P y).
pub fn score_vector(ws: &RemlWorkspace, proj: &Projection) -> Vec<f64> {
    proj.pdv
        .iter()
        .map(|pdv_k| {
            let quad = DenseMatrix::dot(&ws.y, &pdv_k.mat_vec(&proj.proj_y));
            -0.5 * (pdv_k.trace() - quad)
        })
        .collect()
}

/// Information matrix for the chosen update rule. Symmetric.
pub fn information_matrix(
    method: RemlMethod,
    ws: &RemlWorkspace,
    proj: &Projection,
) -> DenseMatrix {
    let k = ws.n_components();
    let mut info = DenseMatrix::zeros(k, k);
    for i in 0..k {
        for j in i..k {
            let element = match method {
                RemlMethod::Ai => {
                    let t = proj.pdv[j].mat_vec(&proj.proj_y);
                    let s = proj.pdv[i].mat_vec(&t);
                    -0.5 * DenseMatrix::dot(&ws.y, &s)
                }
                RemlMethod::NewtonRaphson => {
                    let t = proj.pdv[j].mat_vec(&proj.proj_y);
                    let s = proj.pdv[i].mat_vec(&t);
                    0.5 * proj.pdv[i].trace_product(&proj.pdv[j])
                        - DenseMatrix::dot(&ws.y, &s)
                }
                RemlMethod::Fisher => -0.5 * proj.pdv[i].trace_product(&proj.pdv[j]),
            };
            info.set(i, j, element);
            if i != j {
                info.set(j, i, element);
            }
        }
    }
    info
}

/// One EM-REML step:
///   sigma_k <- sigma_k + sigma_k^2 (y'P D_k P y - tr(P D_k)) / n
///
/// Slower than the Newton-type updates but moves monotonically from
/// poor starting values.
pub fn em_step(ws: &RemlWorkspace, proj: &Projection, sigma: &[f64]) -> Vec<f64> {
    let n = ws.n_obs() as f64;
    sigma
        .iter()
        .zip(ws.d.iter().zip(proj.pdv.iter()))
        .map(|(&s, (d_k, pdv_k))| {
            let quad = DenseMatrix::dot(&proj.proj_y, &d_k.mat_vec(&proj.proj_y));
            let updated = s + s * s * (quad - pdv_k.trace()) / n;
            updated.max(1e-10)
        })
        .collect()
}

/// Relative change between consecutive variance-component vectors.
pub fn variance_diff(current: &[f64], previous: &[f64]) -> f64 {
    let diff: f64 = current
        .iter()
        .zip(previous.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    let norm: f64 = current.iter().map(|a| a * a).sum::<f64>().sqrt();
    if norm > 0.0 {
        diff / norm
    } else {
        diff
    }
}
