//! Per-iteration projection quantities for the REML loop.
//!
//! The solver works in the V-matrix parameterization: with covariance
//! bases D_k (Z_k K_k Z_k' per genetic term, Z_g Z_g' per grouped
//! term, identity for the residual),
//!
//!   V = sum_k sigma_k D_k
//!   P = V^{-1} - V^{-1} X (X'V^{-1}X)^{-1} X'V^{-1}
//!
//! and every score/information quantity is a trace or quadratic form
//! in P*D_k. All bases are built once; the projection is recomputed
//! from the current variance components each iteration.

use gebv_linalg::decomposition::CholeskyDecomp;
use gebv_linalg::DenseMatrix;

use crate::error::{ModelError, Result};
use crate::model::spec::{GeneticBasis, ModelSpec};

/// Immutable per-fit quantities: response, fixed design, covariance
/// basis per variance component (residual last).
pub struct RemlWorkspace {
    pub y: Vec<f64>,
    pub x: DenseMatrix,
    pub d: Vec<DenseMatrix>,
    /// Component names, residual last.
    pub names: Vec<String>,
}

impl RemlWorkspace {
    /// Build covariance bases from an assembled model.
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        let n = spec.n_obs();
        let mut d = Vec::new();
        let mut names = Vec::new();

        for grouped in &spec.grouped {
            let map = grouped.incidence.row_map();
            let mut basis = DenseMatrix::zeros(n, n);
            for i in 0..n {
                for j in 0..n {
                    if map[i] == map[j] {
                        basis.set(i, j, 1.0);
                    }
                }
            }
            d.push(basis);
            names.push(grouped.name.clone());
        }

        for genetic in &spec.genetic {
            let k = match &genetic.basis {
                GeneticBasis::Relationship(k) => k,
                GeneticBasis::Markers { .. } => {
                    return Err(ModelError::Value(format!(
                        "genetic term '{}' supplies marker dosages; the REML solver \
                         needs a relationship matrix (build one with the GRM builder)",
                        genetic.name
                    )))
                }
            };
            let map = genetic.incidence.row_map();
            let mut basis = DenseMatrix::zeros(n, n);
            for i in 0..n {
                for j in 0..n {
                    basis.set(i, j, k.get(map[i], map[j]));
                }
            }
            if let Some(env) = &genetic.env_design {
                // GxE covariance: (Z K Z') element-wise with the
                // environment Gram matrix.
                for i in 0..n {
                    for j in 0..n {
                        let e = DenseMatrix::dot(&env.row(i), &env.row(j));
                        basis.set(i, j, basis.get(i, j) * e);
                    }
                }
            }
            d.push(basis);
            names.push(genetic.name.clone());
        }

        d.push(DenseMatrix::identity(n));
        names.push("residual".to_string());

        Ok(Self {
            y: spec.response.clone(),
            x: spec.fixed_design.clone(),
            d,
            names,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_components(&self) -> usize {
        self.d.len()
    }
}

/// Everything derived from one set of variance components.
#[derive(Debug)]
pub struct Projection {
    pub vi: DenseMatrix,
    pub txvx: DenseMatrix,
    pub proj_y: Vec<f64>,
    /// P * D_k per component.
    pub pdv: Vec<DenseMatrix>,
    pub log_likelihood: f64,
}

/// Recompute the projection for the given variance components.
pub fn project(ws: &RemlWorkspace, sigma: &[f64]) -> Result<Projection> {
    assert_eq!(sigma.len(), ws.n_components());
    let n = ws.n_obs();

    let mut v = DenseMatrix::zeros(n, n);
    for (s, d) in sigma.iter().zip(ws.d.iter()) {
        v.axpy(*s, d);
    }

    let chol_v = CholeskyDecomp::new(&v).map_err(|_| {
        ModelError::Runtime(
            "phenotypic covariance matrix is not positive definite; \
             a variance component may have collapsed"
                .into(),
        )
    })?;
    let logdet_v = chol_v.log_det();
    let vi = chol_v.inverse();

    let vx = vi.mat_mul(&ws.x);
    let txvx = ws.x.transpose().mat_mul(&vx);
    let chol_t = CholeskyDecomp::new(&txvx).map_err(|_| {
        ModelError::Runtime("fixed-effect system X'V^{-1}X is singular".into())
    })?;
    let logdet_txvx = chol_t.log_det();

    // P = Vi - Vi X (X'ViX)^{-1} X'Vi
    let t_inv = chol_t.inverse();
    let vx_tinv = vx.mat_mul(&t_inv);
    let correction = vx_tinv.mat_mul(&vx.transpose());
    let mut p = vi.clone();
    p.axpy(-1.0, &correction);

    let proj_y = p.mat_vec(&ws.y);
    let pdv: Vec<DenseMatrix> = ws.d.iter().map(|d| p.mat_mul(d)).collect();

    let y_p_y = DenseMatrix::dot(&ws.y, &proj_y);
    let log_likelihood = -0.5 * (logdet_v + logdet_txvx + y_p_y);

    Ok(Projection {
        vi,
        txvx,
        proj_y,
        pdv,
        log_likelihood,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gebv_geno::PhenoTable;

    use crate::align::GeneticData;
    use crate::grm::{Grm, GrmMethod};
    use crate::model::spec::make_model;

    fn toy_spec() -> ModelSpec {
        let pheno = PhenoTable::from_columns(
            vec!["a".into(), "a".into(), "b".into(), "c".into()],
            vec![(
                "y".into(),
                vec![
                    Some("1.0".into()),
                    Some("2.0".into()),
                    Some("3.0".into()),
                    Some("4.0".into()),
                ],
            )],
        );
        let grm = Grm {
            method: GrmMethod::Additive,
            matrix: DenseMatrix::identity(3),
            individual_ids: vec!["a".into(), "b".into(), "c".into()],
            p_major: vec![0.5],
            scale_factor: 1.0,
        };
        make_model(
            "y ~ 1 + {g}",
            &pheno,
            vec![("g".into(), GeneticData::Relationship(grm))],
        )
        .unwrap()
    }

    #[test]
    fn test_workspace_shapes() {
        let ws = RemlWorkspace::from_spec(&toy_spec()).unwrap();
        assert_eq!(ws.n_obs(), 4);
        assert_eq!(ws.n_components(), 2);
        assert_eq!(ws.names, vec!["g", "residual"]);

        // Z K Z' with identity K: 1 where observations share an
        // individual.
        let d0 = &ws.d[0];
        assert_eq!(d0.get(0, 1), 1.0);
        assert_eq!(d0.get(0, 0), 1.0);
        assert_eq!(d0.get(0, 2), 0.0);
    }

    #[test]
    fn test_projection_annihilates_fixed_design() {
        let ws = RemlWorkspace::from_spec(&toy_spec()).unwrap();
        let proj = project(&ws, &[1.0, 1.0]).unwrap();
        // P X = 0, so X' proj_y = X' P y = 0.
        let xt_py = ws.x.t_mat_vec(&proj.proj_y);
        for v in xt_py {
            assert!(v.abs() < 1e-8, "X'Py entry not annihilated: {}", v);
        }
    }

    #[test]
    fn test_projection_loglik_finite() {
        let ws = RemlWorkspace::from_spec(&toy_spec()).unwrap();
        let proj = project(&ws, &[0.5, 0.5]).unwrap();
        assert!(proj.log_likelihood.is_finite());
        assert_eq!(proj.pdv.len(), 2);
    }

    #[test]
    fn test_zero_residual_variance_fails() {
        let ws = RemlWorkspace::from_spec(&toy_spec()).unwrap();
        let err = project(&ws, &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ModelError::Runtime(_)));
    }
}
