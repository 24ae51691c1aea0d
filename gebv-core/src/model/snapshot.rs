//! Fitted-model parameter snapshot.
//!
//! Persists everything a predictor needs to score new individuals
//! without the training phenotypes or GRMs in memory: fixed-effect
//! estimates, variance components, the GLS-projected response, the
//! per-observation individual IDs, and the formula text.
//!
//! Format: magic bytes (GBLP) + version + bincode payload, with an
//! optional JSON sidecar for human inspection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Magic bytes: "GBLP".
pub const PARAMS_MAGIC: [u8; 4] = *b"GBLP";
/// Current snapshot version.
pub const PARAMS_VERSION: u32 = 1;

/// Snapshot of a fitted GBLUP model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub magic: [u8; 4],
    pub version: u32,
    /// Response name (left-hand side of the formula).
    pub response_name: String,
    /// Fixed-effect formula text ("1" when intercept-only).
    pub fixed_formula: String,
    /// Fixed-effect column labels, matching `beta`.
    pub fixed_labels: Vec<String>,
    /// Fixed-effect estimates (BLUE).
    pub beta: Vec<f64>,
    /// Variance components in registration order, residual last.
    pub sigma: Vec<f64>,
    /// GLS-projected response P*y, one entry per training observation.
    pub proj_y: Vec<f64>,
    /// Individual ID of each training observation row.
    pub obs_ids: Vec<String>,
    /// Distinct aligned training individuals (matrix axis order).
    pub train_ids: Vec<String>,
    /// Random-effect names in registration order (residual excluded).
    pub random_effect_names: Vec<String>,
    /// Phenotype individuals dropped at alignment time.
    pub dropped_ids: Vec<String>,
}

impl ModelParams {
    /// Adjoint vector for one random term: sigma_k * Z_k' * proj_y,
    /// indexed by `train_ids`. Multiplying a cross-relationship block
    /// by this vector yields the term's predicted contribution.
    pub fn blup_adjoint(&self, term_index: usize) -> Vec<f64> {
        let sigma_k = self.sigma[term_index];
        let mut adjoint = vec![0.0; self.train_ids.len()];
        for (obs, id) in self.obs_ids.iter().enumerate() {
            let k = self
                .train_ids
                .iter()
                .position(|t| t == id)
                .expect("obs_ids are a subset of train_ids");
            adjoint[k] += sigma_k * self.proj_y[obs];
        }
        adjoint
    }
}

/// Save a parameter snapshot.
pub fn save_params(params: &ModelParams, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(params)
        .map_err(|e| ModelError::Format(format!("failed to encode model snapshot: {}", e)))?;
    std::fs::write(path, encoded)?;
    Ok(())
}

/// Save a JSON sidecar for debugging.
pub fn save_params_json(params: &ModelParams, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(params)
        .map_err(|e| ModelError::Format(format!("failed to encode JSON sidecar: {}", e)))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a parameter snapshot.
pub fn load_params(path: &Path) -> Result<ModelParams> {
    if !path.exists() {
        return Err(ModelError::FileNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path)?;
    let params: ModelParams = bincode::deserialize(&data).map_err(|e| {
        ModelError::Format(format!(
            "failed to decode model snapshot {}: {}",
            path.display(),
            e
        ))
    })?;
    if params.magic != PARAMS_MAGIC {
        return Err(ModelError::Format(format!(
            "invalid model snapshot {}: expected magic {:?}, got {:?}",
            path.display(),
            PARAMS_MAGIC,
            params.magic
        )));
    }
    if params.version != PARAMS_VERSION {
        return Err(ModelError::Format(format!(
            "unsupported model snapshot version {} in {}",
            params.version,
            path.display()
        )));
    }
    if params.proj_y.len() != params.obs_ids.len() {
        return Err(ModelError::Format(format!(
            "inconsistent model snapshot {}: {} proj_y entries for {} observations",
            path.display(),
            params.proj_y.len(),
            params.obs_ids.len()
        )));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> ModelParams {
        ModelParams {
            magic: PARAMS_MAGIC,
            version: PARAMS_VERSION,
            response_name: "yield".into(),
            fixed_formula: "1".into(),
            fixed_labels: vec!["intercept".into()],
            beta: vec![3.5],
            sigma: vec![0.8, 0.2],
            proj_y: vec![0.1, -0.2, 0.3],
            obs_ids: vec!["s1".into(), "s1".into(), "s2".into()],
            train_ids: vec!["s1".into(), "s2".into()],
            random_effect_names: vec!["g".into()],
            dropped_ids: vec!["s9".into()],
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.model");
        let params = sample_params();
        save_params(&params, &path).unwrap();
        let loaded = load_params(&path).unwrap();

        assert_eq!(loaded.beta, params.beta);
        assert_eq!(loaded.sigma, params.sigma);
        assert_eq!(loaded.proj_y, params.proj_y);
        assert_eq!(loaded.dropped_ids, params.dropped_ids);
        assert_eq!(loaded.response_name, "yield");
        assert_eq!(loaded.fixed_formula, "1");
    }

    #[test]
    fn test_blup_adjoint_sums_repeated_observations() {
        let params = sample_params();
        let adjoint = params.blup_adjoint(0);
        // s1 has two observations: 0.8 * (0.1 - 0.2); s2 one: 0.8 * 0.3.
        assert!((adjoint[0] - 0.8 * (0.1 - 0.2)).abs() < 1e-12);
        assert!((adjoint[1] - 0.8 * 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_missing_snapshot() {
        let err = load_params(Path::new("/nonexistent/fit.model")).unwrap_err();
        assert!(matches!(err, ModelError::FileNotFound(_)));
    }
}
