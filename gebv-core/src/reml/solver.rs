//! The REML fitting loop.
//!
//! Iterates projection -> score/information -> variance update until
//! the variance components and the restricted log-likelihood settle.
//! Non-convergence at the iteration cap is reported, not fatal; a
//! variance component that cannot be kept non-negative even after
//! step halving is a hard runtime failure, as is a singular system.

use gebv_linalg::decomposition::{solve_general, CholeskyDecomp, LinalgError};
use gebv_linalg::DenseMatrix;
use tracing::{debug, info, warn};

use crate::error::{ModelError, Result};
use crate::model::snapshot::{ModelParams, PARAMS_MAGIC, PARAMS_VERSION};
use crate::model::spec::{GeneticBasis, ModelSpec};
use crate::reml::projector::{project, Projection, RemlWorkspace};
use crate::reml::updater::{
    em_step, information_matrix, score_vector, variance_diff, RemlMethod,
};

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct RemlConfig {
    pub method: RemlMethod,
    /// Run one EM step before the Newton-type iteration.
    pub em_init: bool,
    pub max_iteration: usize,
    pub tolerance: f64,
}

impl Default for RemlConfig {
    fn default() -> Self {
        Self {
            method: RemlMethod::Ai,
            em_init: false,
            max_iteration: 100,
            tolerance: 1e-6,
        }
    }
}

/// Terminal state of a fit. Both states carry usable estimates;
/// callers decide whether MaxIterReached is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemlStatus {
    Converged,
    MaxIterReached,
}

/// A fitted GBLUP model.
#[derive(Debug, Clone)]
pub struct GblupFit {
    /// Fixed-effect estimates (BLUE).
    pub beta: Vec<f64>,
    /// Variance components in registration order, residual last.
    pub sigma: Vec<f64>,
    /// Component names matching `sigma`.
    pub sigma_names: Vec<String>,
    /// BLUP solutions per distinct individual, one column per genetic
    /// term.
    pub u: DenseMatrix,
    /// Grouped random-effect solutions per level.
    pub group_effects: Vec<(String, Vec<f64>)>,
    /// GLS-projected response, retained for prediction.
    pub proj_y: Vec<f64>,
    pub status: RemlStatus,
    pub iterations: usize,
    pub log_likelihood: f64,
}

/// A model specification bound to a solver configuration.
///
/// Fitting is deterministic: `reset()` followed by `fit()` reproduces
/// the same estimates from the same inputs.
pub struct GblupModel {
    spec: ModelSpec,
    config: RemlConfig,
    fit: Option<GblupFit>,
}

impl GblupModel {
    pub fn new(spec: ModelSpec, config: RemlConfig) -> Self {
        Self {
            spec,
            config,
            fit: None,
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn fitted(&self) -> Option<&GblupFit> {
        self.fit.as_ref()
    }

    /// Discard fitted state; the next `fit()` re-solves from scratch.
    pub fn reset(&mut self) {
        self.fit = None;
    }

    /// Run the REML loop and keep the result.
    pub fn fit(&mut self) -> Result<&GblupFit> {
        if self.fit.is_none() {
            let fitted = run_reml(&self.spec, &self.config)?;
            self.fit = Some(fitted);
        }
        Ok(self.fit.as_ref().expect("fit stored above"))
    }

    /// Snapshot the fitted parameters for later prediction.
    pub fn to_params(&self) -> Result<ModelParams> {
        let fit = self.fit.as_ref().ok_or_else(|| {
            ModelError::Value("model has not been fitted; call fit() first".into())
        })?;
        Ok(ModelParams {
            magic: PARAMS_MAGIC,
            version: PARAMS_VERSION,
            response_name: self.spec.response_name.clone(),
            fixed_formula: self.spec.fixed_formula.clone(),
            fixed_labels: self.spec.fixed_labels.clone(),
            beta: fit.beta.clone(),
            sigma: fit.sigma.clone(),
            proj_y: fit.proj_y.clone(),
            obs_ids: self.spec.obs_ids.clone(),
            train_ids: self.spec.common_order.clone(),
            random_effect_names: self.spec.random_effect_names(),
            dropped_ids: self.spec.dropped_ids.clone(),
        })
    }
}

/// Equal split of the phenotypic variance across all components.
fn initial_sigma(y: &[f64], n_components: usize) -> Vec<f64> {
    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    let var = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0).max(1.0);
    vec![var.max(1e-8) / n_components as f64; n_components]
}

/// Propose sigma - step * delta, halving the step until every
/// component stays non-negative. Returns None when no admissible step
/// exists.
fn halved_step(sigma: &[f64], delta: &[f64]) -> Option<Vec<f64>> {
    let mut step = 1.0;
    for _ in 0..30 {
        let candidate: Vec<f64> = sigma
            .iter()
            .zip(delta.iter())
            .map(|(s, d)| s - step * d)
            .collect();
        if candidate.iter().all(|&v| v >= 0.0) {
            return Some(candidate);
        }
        step *= 0.5;
    }
    None
}

fn has_converged(var_diff: f64, log_diff: f64, tolerance: f64) -> bool {
    if var_diff >= tolerance {
        return false;
    }
    let abs_log = log_diff.abs();
    abs_log < 1e-4 || (abs_log < 1e-2 && log_diff < 0.0)
}

fn run_reml(spec: &ModelSpec, config: &RemlConfig) -> Result<GblupFit> {
    let ws = RemlWorkspace::from_spec(spec)?;
    let n_comp = ws.n_components();

    let mut sigma = initial_sigma(&ws.y, n_comp);
    let mut proj = project(&ws, &sigma)?;
    let mut logl = proj.log_likelihood;

    info!(
        "REML ({}) on {} observations, {} variance components",
        config.method.tag(),
        ws.n_obs(),
        n_comp
    );

    let mut iteration = 1usize;
    if config.em_init {
        sigma = em_step(&ws, &proj, &sigma);
        proj = project(&ws, &sigma)?;
        logl = proj.log_likelihood;
        debug!("iter {:>3} [EM]  logL = {:.6}  sigma = {:?}", iteration, logl, sigma);
        iteration += 1;
    }

    let mut status = RemlStatus::MaxIterReached;
    while iteration < config.max_iteration {
        let score = score_vector(&ws, &proj);
        let info_matrix = information_matrix(config.method, &ws, &proj);

        let delta = solve_general(&info_matrix, &score).map_err(|e| match e {
            LinalgError::SingularMatrix => ModelError::Runtime(format!(
                "information matrix is singular at iteration {}; the model may be \
                 over-parameterized",
                iteration
            )),
            other => ModelError::from(other),
        })?;

        let previous = sigma.clone();
        sigma = halved_step(&sigma, &delta).ok_or_else(|| {
            let worst = sigma
                .iter()
                .zip(delta.iter())
                .enumerate()
                .filter(|(_, (s, d))| **s - **d < 0.0)
                .map(|(k, _)| ws.names[k].as_str())
                .next()
                .unwrap_or("unknown");
            ModelError::Runtime(format!(
                "variance component '{}' diverged to a negative value at iteration {}",
                worst, iteration
            ))
        })?;

        proj = project(&ws, &sigma)?;
        let new_logl = proj.log_likelihood;
        let log_diff = new_logl - logl;
        logl = new_logl;

        let var_diff = variance_diff(&sigma, &previous);
        debug!(
            "iter {:>3} [{}]  logL = {:.6}  vardiff = {:.3e}  sigma = {:?}",
            iteration,
            config.method.tag(),
            logl,
            var_diff,
            sigma
        );

        iteration += 1;
        if has_converged(var_diff, log_diff, config.tolerance) {
            status = RemlStatus::Converged;
            break;
        }
    }

    match status {
        RemlStatus::Converged => info!("REML converged after {} iterations", iteration - 1),
        RemlStatus::MaxIterReached => warn!(
            "REML did not converge within {} iterations; reporting last estimates",
            config.max_iteration
        ),
    }

    finalize(spec, &ws, &proj, sigma, status, iteration - 1, logl)
}

/// BLUE, BLUP and the retained projection at the final estimates.
fn finalize(
    spec: &ModelSpec,
    ws: &RemlWorkspace,
    proj: &Projection,
    sigma: Vec<f64>,
    status: RemlStatus,
    iterations: usize,
    log_likelihood: f64,
) -> Result<GblupFit> {
    // beta = (X'ViX)^{-1} X'Vi y
    let vi_y = proj.vi.mat_vec(&ws.y);
    let xt_vi_y = ws.x.t_mat_vec(&vi_y);
    let chol_t = CholeskyDecomp::new(&proj.txvx)
        .map_err(|_| ModelError::Runtime("fixed-effect system X'V^{-1}X is singular".into()))?;
    let beta = chol_t.solve(&xt_vi_y);

    // Vi * (y - X beta)
    let fitted = ws.x.mat_vec(&beta);
    let residual: Vec<f64> = ws.y.iter().zip(fitted.iter()).map(|(y, f)| y - f).collect();
    let vi_res = proj.vi.mat_vec(&residual);

    let n_grouped = spec.grouped.len();
    let n_ind = spec.n_individuals();

    let mut group_effects = Vec::with_capacity(n_grouped);
    for (k, grouped) in spec.grouped.iter().enumerate() {
        let zt = grouped.incidence.t_mat_vec(&vi_res);
        let u_g: Vec<f64> = zt.iter().map(|v| sigma[k] * v).collect();
        group_effects.push((grouped.name.clone(), u_g));
    }

    // u_k = sigma_k * K_k * Z_k' * Vi * (y - X beta)
    let mut u = DenseMatrix::zeros(n_ind, spec.genetic.len());
    for (g, genetic) in spec.genetic.iter().enumerate() {
        let k_matrix = match &genetic.basis {
            GeneticBasis::Relationship(k) => k,
            GeneticBasis::Markers { .. } => unreachable!("rejected by RemlWorkspace::from_spec"),
        };
        let sigma_k = sigma[n_grouped + g];
        let zt = genetic.incidence.t_mat_vec(&vi_res);
        let ku = k_matrix.mat_vec(&zt);
        let col: Vec<f64> = ku.iter().map(|v| sigma_k * v).collect();
        u.set_col(g, &col);
    }

    let sigma_names = ws.names.clone();
    debug_assert_eq!(sigma_names.len(), sigma.len());

    Ok(GblupFit {
        beta,
        sigma,
        sigma_names,
        u,
        group_effects,
        proj_y: proj.proj_y.clone(),
        status,
        iterations,
        log_likelihood,
    })
}
