//! Gibbs update kernels.
//!
//! One full sweep updates, in order: fixed effects (flat prior),
//! grouped random effects (ridge), each genetic term's marker effects
//! under its prior rule, and the residual variance. Every marker
//! update is a column dot/axpy against the dense column-major design
//! and maintains the adjusted residual y_adj = y - (all current
//! effects) incrementally.

use rand::Rng;
use rand::distributions::Distribution;
use statrs::distribution::Normal;

use gebv_linalg::DenseMatrix;

use crate::bayes::model::{BayesMethod, BayesModel, GroupedBlock, MarkerBlock};
use crate::bayes::prior::sample_inclusion_probability;

/// Mutable residual state shared by every kernel.
pub struct ResidualState {
    pub y_adj: Vec<f64>,
    pub variance: f64,
}

/// State of one genetic term.
pub struct MarkerState {
    pub coeffs: Vec<f64>,
    /// Current genetic values per observation (design * coeffs).
    pub u: Vec<f64>,
    /// Per-marker variance (length 1 for the shared-variance rules).
    pub marker_variance: Vec<f64>,
    /// Inclusion indicator per marker (indicator rules only).
    pub indicators: Vec<u8>,
    /// [excluded, included] mixing proportions.
    pub pi: [f64; 2],
    /// Variance of the current genetic values, for reporting.
    pub genetic_variance: f64,
}

impl MarkerState {
    pub fn new(block: &MarkerBlock, n_obs: usize, init_variance: f64, pi_init: f64) -> Self {
        let m = block.n_markers();
        let shared = matches!(
            block.method,
            BayesMethod::RidgeRegression | BayesMethod::C
        );
        Self {
            coeffs: vec![0.0; m],
            u: vec![0.0; n_obs],
            marker_variance: if shared {
                vec![init_variance]
            } else {
                vec![init_variance; m]
            },
            indicators: vec![0; m],
            pi: [1.0 - pi_init, pi_init],
            genetic_variance: 0.0,
        }
    }
}

/// State of one grouped term.
pub struct GroupedState {
    pub coeffs: Vec<f64>,
    pub variance: f64,
}

/// Gaussian update for the fixed effects (flat prior).
pub fn sample_fixed<R: Rng>(
    design: &DenseMatrix,
    col_norms: &[f64],
    coeffs: &mut [f64],
    residual: &mut ResidualState,
    rng: &mut R,
) {
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    for j in 0..coeffs.len() {
        let norm = col_norms[j];
        if norm < 1e-12 {
            continue;
        }
        let old = coeffs[j];
        let rhs = design.col_dot(j, &residual.y_adj) + norm * old;
        let post_mean = rhs / norm;
        let post_sd = (residual.variance / norm).sqrt();
        let new = normal.sample(rng) * post_sd + post_mean;
        coeffs[j] = new;
        design.col_axpy(j, old - new, &mut residual.y_adj);
    }
}

/// Ridge update for a grouped random effect, then its variance.
pub fn sample_grouped<R: Rng>(
    block: &GroupedBlock,
    state: &mut GroupedState,
    residual: &mut ResidualState,
    rng: &mut R,
) {
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    for (level, rows) in block.rows_per_level.iter().enumerate() {
        let norm = rows.len() as f64;
        if norm == 0.0 {
            continue;
        }
        let old = state.coeffs[level];
        let mut rhs = norm * old;
        for &row in rows {
            rhs += residual.y_adj[row];
        }
        let v = norm + residual.variance / state.variance.max(1e-12);
        let post_mean = rhs / v;
        let post_sd = (residual.variance / v).sqrt();
        let new = normal.sample(rng) * post_sd + post_mean;
        state.coeffs[level] = new;
        let diff = old - new;
        for &row in rows {
            residual.y_adj[row] += diff;
        }
    }
    let sum_sq: f64 = state.coeffs.iter().map(|c| c * c).sum();
    state.variance = block.prior.sample(sum_sq, state.coeffs.len() as f64, rng);
}

/// Sweep one genetic term under its prior rule.
pub fn sample_markers<R: Rng>(
    block: &MarkerBlock,
    state: &mut MarkerState,
    residual: &mut ResidualState,
    rng: &mut R,
) {
    match block.method {
        BayesMethod::RidgeRegression => sweep_ridge(block, state, residual, rng),
        BayesMethod::A => sweep_per_marker_variance(block, state, residual, rng),
        BayesMethod::B => sweep_indicator(block, state, residual, rng, true),
        BayesMethod::C => sweep_indicator(block, state, residual, rng, false),
    }
    state.genetic_variance = population_variance(&state.u);
}

/// Shared-variance ridge sweep (SNP-BLUP).
fn sweep_ridge<R: Rng>(
    block: &MarkerBlock,
    state: &mut MarkerState,
    residual: &mut ResidualState,
    rng: &mut R,
) {
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    let marker_variance = state.marker_variance[0];
    let ratio = residual.variance / marker_variance.max(1e-300);
    let sqrt_res = residual.variance.sqrt();

    for j in 0..block.n_markers() {
        if block.monomorphic[j] {
            continue;
        }
        let old = state.coeffs[j];
        let norm = block.col_norms[j];
        let v = norm + ratio;
        let rhs = block.design.col_dot(j, &residual.y_adj) + norm * old;
        let post_mean = rhs / v;
        let post_sd = sqrt_res / v.sqrt();
        let new = normal.sample(rng) * post_sd + post_mean;
        state.coeffs[j] = new;
        update_residual_and_value(block, j, old, new, residual, &mut state.u);
    }

    let sum_sq: f64 = state.coeffs.iter().map(|c| c * c).sum();
    state.marker_variance[0] =
        block
            .prior
            .sample(sum_sq, block.n_polymorphic() as f64, rng);
}

/// Per-marker variance sweep (method A).
fn sweep_per_marker_variance<R: Rng>(
    block: &MarkerBlock,
    state: &mut MarkerState,
    residual: &mut ResidualState,
    rng: &mut R,
) {
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    for j in 0..block.n_markers() {
        if block.monomorphic[j] {
            continue;
        }
        let old = state.coeffs[j];
        let norm = block.col_norms[j];
        let v = norm + residual.variance / state.marker_variance[j].max(1e-300);
        let rhs = block.design.col_dot(j, &residual.y_adj) + norm * old;
        let post_mean = rhs / v;
        let post_sd = (residual.variance / v).sqrt();
        let new = normal.sample(rng) * post_sd + post_mean;
        state.coeffs[j] = new;
        state.marker_variance[j] = block.prior.sample(new * new, 1.0, rng);
        update_residual_and_value(block, j, old, new, residual, &mut state.u);
    }
}

/// Spike-and-slab sweep with an inclusion indicator; `per_marker`
/// selects between per-marker (B) and shared (C) slab variances.
fn sweep_indicator<R: Rng>(
    block: &MarkerBlock,
    state: &mut MarkerState,
    residual: &mut ResidualState,
    rng: &mut R,
    per_marker: bool,
) {
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    let log_pi = [state.pi[0].ln(), state.pi[1].ln()];
    let mut included = 0usize;
    let mut sum_sq_included = 0.0;

    for j in 0..block.n_markers() {
        if block.monomorphic[j] {
            continue;
        }
        let old = state.coeffs[j];
        let norm = block.col_norms[j];
        let slab_variance = if per_marker {
            state.marker_variance[j]
        } else {
            state.marker_variance[0]
        }
        .max(1e-300);

        let mut rhs = block.design.col_dot(j, &residual.y_adj);
        if old != 0.0 {
            rhs += norm * old;
        }

        let v = norm + residual.variance / slab_variance;
        let post_mean = rhs / v;
        let post_sd = (residual.variance / v).sqrt();

        // log p(delta=1)/p(delta=0), flat over the data term:
        //   0.5 ln(sigma_e^2 / (v * slab)) + rhs^2 / (2 sigma_e^2 v)
        let log_like = 0.5 * (residual.variance / (v * slab_variance)).ln()
            + rhs * rhs / (2.0 * residual.variance * v)
            + log_pi[1]
            - log_pi[0];
        let prob_excluded = 1.0 / (1.0 + log_like.exp());

        let include = rng.gen::<f64>() >= prob_excluded;
        state.indicators[j] = u8::from(include);

        let new = if include {
            let draw = normal.sample(rng) * post_sd + post_mean;
            if per_marker {
                state.marker_variance[j] = block.prior.sample(draw * draw, 1.0, rng);
            }
            included += 1;
            sum_sq_included += draw * draw;
            draw
        } else {
            0.0
        };

        if new != old {
            update_residual_and_value(block, j, old, new, residual, &mut state.u);
        }
        state.coeffs[j] = new;
    }

    let excluded = block.n_polymorphic() - included;
    let pi_included = sample_inclusion_probability(included, excluded, rng);
    state.pi = [1.0 - pi_included, pi_included];

    if !per_marker {
        state.marker_variance[0] = block.prior.sample(sum_sq_included, included as f64, rng);
    }
}

/// Residual variance draw from the adjusted residual sum of squares.
pub fn sample_residual<R: Rng>(model: &BayesModel, residual: &mut ResidualState, rng: &mut R) {
    let sum_sq: f64 = residual.y_adj.iter().map(|r| r * r).sum();
    residual.variance = model
        .residual_prior
        .sample(sum_sq, model.n_obs() as f64, rng);
}

#[inline]
fn update_residual_and_value(
    block: &MarkerBlock,
    j: usize,
    old: f64,
    new: f64,
    residual: &mut ResidualState,
    u: &mut [f64],
) {
    block.design.col_axpy(j, old - new, &mut residual.y_adj);
    block.design.col_axpy(j, new - old, u);
}

pub(crate) fn population_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}
