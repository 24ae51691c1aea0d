//! Sampler-ready model blocks.
//!
//! Converts an assembled `ModelSpec` whose genetic terms carry marker
//! dosages into dense, column-major design blocks with precomputed
//! column norms, monomorphism flags, and priors. The marker design is
//! the centered dosage matrix expanded to observation rows through the
//! genetic incidence map, so every Gibbs update is a column dot/axpy
//! against contiguous memory.

use gebv_linalg::DenseMatrix;
use tracing::info;

use crate::bayes::prior::ScaledInvChiSq;
use crate::error::{ModelError, Result};
use crate::model::spec::{GeneticBasis, ModelSpec};

/// Prior/update rule for one genetic term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayesMethod {
    /// Single shared marker variance (ridge regression / SNP-BLUP).
    RidgeRegression,
    /// Per-marker variance.
    A,
    /// Per-marker variance plus an inclusion indicator.
    B,
    /// Shared variance plus an inclusion indicator.
    C,
}

impl BayesMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rr" | "ridge" => Ok(BayesMethod::RidgeRegression),
            "a" => Ok(BayesMethod::A),
            "b" => Ok(BayesMethod::B),
            "c" => Ok(BayesMethod::C),
            other => Err(ModelError::Value(format!(
                "unknown Bayesian method '{}', expected one of: rr, a, b, c",
                other
            ))),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            BayesMethod::RidgeRegression => "RR",
            BayesMethod::A => "A",
            BayesMethod::B => "B",
            BayesMethod::C => "C",
        }
    }

    /// Whether the rule samples a per-marker inclusion indicator.
    pub fn has_indicator(&self) -> bool {
        matches!(self, BayesMethod::B | BayesMethod::C)
    }
}

/// Sampler configuration.
#[derive(Debug, Clone)]
pub struct BayesConfig {
    pub iterations: usize,
    pub burn_in: usize,
    pub seed: u64,
    /// Prior degrees of freedom for every variance component.
    pub df: f64,
    /// Prior share of phenotypic variance attributed to the genetic
    /// terms; drives the prior scales.
    pub r_squared: f64,
    /// Initial inclusion probability for the indicator methods.
    pub pi_init: f64,
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            iterations: 3000,
            burn_in: 1000,
            seed: 42,
            df: 5.0,
            r_squared: 0.5,
            pi_init: 0.05,
        }
    }
}

impl BayesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.burn_in >= self.iterations {
            return Err(ModelError::Value(format!(
                "burn-in ({}) must be smaller than the iteration count ({})",
                self.burn_in, self.iterations
            )));
        }
        if !(0.0 < self.r_squared && self.r_squared < 1.0) {
            return Err(ModelError::Value(format!(
                "prior r-squared must be in (0, 1), got {}",
                self.r_squared
            )));
        }
        if !(0.0 < self.pi_init && self.pi_init < 1.0) {
            return Err(ModelError::Value(format!(
                "initial inclusion probability must be in (0, 1), got {}",
                self.pi_init
            )));
        }
        Ok(())
    }
}

/// One genetic term's marker design, ready for sweeping.
#[derive(Debug, Clone)]
pub struct MarkerBlock {
    pub name: String,
    /// Centered dosages, observation rows (obs x markers).
    pub design: DenseMatrix,
    pub col_norms: Vec<f64>,
    pub monomorphic: Vec<bool>,
    pub marker_ids: Vec<String>,
    /// Training allele frequencies; predict-time centering reuses them.
    pub p_major: Vec<f64>,
    pub method: BayesMethod,
    pub prior: ScaledInvChiSq,
}

impl MarkerBlock {
    pub fn n_markers(&self) -> usize {
        self.marker_ids.len()
    }

    pub fn n_polymorphic(&self) -> usize {
        self.monomorphic.iter().filter(|m| !**m).count()
    }
}

/// One grouped random-effect block.
#[derive(Debug, Clone)]
pub struct GroupedBlock {
    pub name: String,
    pub levels: Vec<String>,
    /// Observation rows of each level.
    pub rows_per_level: Vec<Vec<usize>>,
    pub prior: ScaledInvChiSq,
}

/// The sampler's immutable view of the model.
#[derive(Debug)]
pub struct BayesModel {
    pub response: Vec<f64>,
    pub response_name: String,
    pub fixed_formula: String,
    pub fixed_design: DenseMatrix,
    pub fixed_labels: Vec<String>,
    pub fixed_col_norms: Vec<f64>,
    pub grouped: Vec<GroupedBlock>,
    pub markers: Vec<MarkerBlock>,
    pub residual_prior: ScaledInvChiSq,
    /// Phenotypic variance of the response; variance initialization.
    pub var_y: f64,
    pub common_order: Vec<String>,
    pub dropped_ids: Vec<String>,
}

impl BayesModel {
    pub fn n_obs(&self) -> usize {
        self.response.len()
    }

    /// Build sampler blocks from an assembled model, one method per
    /// genetic term (in the spec's term order).
    pub fn from_spec(
        spec: &ModelSpec,
        methods: &[BayesMethod],
        config: &BayesConfig,
    ) -> Result<Self> {
        config.validate()?;
        if methods.len() != spec.genetic.len() {
            return Err(ModelError::Value(format!(
                "{} Bayesian methods supplied for {} genetic terms",
                methods.len(),
                spec.genetic.len()
            )));
        }

        let n = spec.n_obs();
        let var_y = sample_variance(&spec.response);

        let fixed_col_norms: Vec<f64> = (0..spec.fixed_design.ncols())
            .map(|j| spec.fixed_design.col_norm_sq(j))
            .collect();

        let mut grouped = Vec::new();
        for g in &spec.grouped {
            let map = g.incidence.row_map();
            let mut rows_per_level: Vec<Vec<usize>> = vec![Vec::new(); g.levels.len()];
            for (row, &level) in map.iter().enumerate() {
                rows_per_level[level].push(row);
            }
            grouped.push(GroupedBlock {
                name: g.name.clone(),
                levels: g.levels.clone(),
                rows_per_level,
                prior: ScaledInvChiSq::new(config.df, var_y * 0.25)?,
            });
        }

        let mut markers = Vec::new();
        for (term, &method) in spec.genetic.iter().zip(methods.iter()) {
            let (matrix, marker_ids) = match &term.basis {
                GeneticBasis::Markers {
                    matrix, marker_ids, ..
                } => (matrix, marker_ids),
                GeneticBasis::Relationship(_) => {
                    return Err(ModelError::Value(format!(
                        "genetic term '{}' supplies a relationship matrix; the Bayesian \
                         sampler needs marker dosages",
                        term.name
                    )))
                }
            };
            if term.env_design.is_some() {
                return Err(ModelError::Value(format!(
                    "genetic term '{}' declares a GxE interaction; use the REML solver \
                     for interaction variance structures",
                    term.name
                )));
            }

            let map = term.incidence.row_map();
            let m = marker_ids.len();
            let mut design = DenseMatrix::zeros(n, m);
            let mut p_major = Vec::with_capacity(m);
            let mut monomorphic = Vec::with_capacity(m);

            for j in 0..m {
                let col = matrix.col(j);
                let valid: Vec<f64> = col.iter().copied().filter(|d| !d.is_nan()).collect();
                let mean = if valid.is_empty() {
                    0.0
                } else {
                    valid.iter().sum::<f64>() / valid.len() as f64
                };
                let p = (mean / 2.0).clamp(0.0, 1.0);
                p_major.push(p);

                let centered: Vec<f64> = col
                    .iter()
                    .map(|&d| if d.is_nan() { 0.0 } else { d - mean })
                    .collect();
                let var = centered.iter().map(|c| c * c).sum::<f64>() / centered.len() as f64;
                monomorphic.push(var < 1e-10);

                let expanded: Vec<f64> = map.iter().map(|&ind| centered[ind]).collect();
                design.set_col(j, &expanded);
            }

            let col_norms: Vec<f64> = (0..m).map(|j| design.col_norm_sq(j)).collect();
            let n_poly = monomorphic.iter().filter(|x| !**x).count();
            if n_poly == 0 {
                return Err(ModelError::Value(format!(
                    "genetic term '{}' has no polymorphic markers",
                    term.name
                )));
            }

            // Prior marker-effect variance from the heritability split:
            // r2 * var(y) spread over the polymorphic marker dosage
            // variance.
            let mean_2pq = p_major
                .iter()
                .zip(monomorphic.iter())
                .filter(|(_, mono)| !**mono)
                .map(|(&p, _)| 2.0 * p * (1.0 - p))
                .sum::<f64>()
                / n_poly as f64;
            let scale = if mean_2pq > 0.0 {
                config.r_squared * var_y / (n_poly as f64 * mean_2pq)
            } else {
                config.r_squared * var_y / n_poly as f64
            };

            info!(
                "Bayes{} term '{}': {} markers ({} polymorphic), prior scale {:.3e}",
                method.tag(),
                term.name,
                m,
                n_poly,
                scale
            );

            markers.push(MarkerBlock {
                name: term.name.clone(),
                design,
                col_norms,
                monomorphic,
                marker_ids: marker_ids.clone(),
                p_major,
                method,
                prior: ScaledInvChiSq::new(config.df, scale)?,
            });
        }

        Ok(Self {
            response: spec.response.clone(),
            response_name: spec.response_name.clone(),
            fixed_formula: spec.fixed_formula.clone(),
            fixed_design: spec.fixed_design.clone(),
            fixed_labels: spec.fixed_labels.clone(),
            fixed_col_norms,
            grouped,
            markers,
            residual_prior: ScaledInvChiSq::new(config.df, (1.0 - config.r_squared) * var_y)?,
            var_y,
            common_order: spec.common_order.clone(),
            dropped_ids: spec.dropped_ids.clone(),
        })
    }
}

pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0)
}
