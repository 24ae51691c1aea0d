//! Assembled model specification.
//!
//! `make_model` runs the full front half of the pipeline: parse the
//! formula, drop rows with a missing response, align samples, and
//! build every design matrix the solvers need. The result is immutable
//! input to the REML solver and the Gibbs sampler.

use gebv_linalg::{DenseMatrix, SparseMatrix};
use gebv_geno::PhenoTable;
use tracing::info;

use crate::align::{align, GeneticData};
use crate::error::{ModelError, Result};
use crate::model::design;
use crate::model::formula::Formula;

/// What a genetic term's covariance is built from.
#[derive(Debug, Clone)]
pub enum GeneticBasis {
    /// An aligned n x n relationship matrix (GBLUP path).
    Relationship(DenseMatrix),
    /// Aligned per-individual dosages (Bayesian marker path).
    Markers {
        matrix: DenseMatrix,
        marker_ids: Vec<String>,
        p_major: Vec<f64>,
    },
}

/// One genetic random-effect term.
#[derive(Debug, Clone)]
pub struct GeneticEffect {
    pub name: String,
    pub key: String,
    /// Observation -> distinct individual incidence (one 1 per row).
    pub incidence: SparseMatrix,
    pub basis: GeneticBasis,
    /// Environment design for GxE terms.
    pub env_design: Option<DenseMatrix>,
}

/// One grouped (non-genetic) random-effect term.
#[derive(Debug, Clone)]
pub struct GroupedEffect {
    pub name: String,
    pub incidence: SparseMatrix,
    pub levels: Vec<String>,
}

/// The assembled model, ready for fitting.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub response_name: String,
    /// Fixed-effect formula text ("1" when intercept-only).
    pub fixed_formula: String,
    pub response: Vec<f64>,
    pub fixed_design: DenseMatrix,
    pub fixed_labels: Vec<String>,
    pub grouped: Vec<GroupedEffect>,
    pub genetic: Vec<GeneticEffect>,
    /// Distinct aligned individuals (genetic matrix axis order).
    pub common_order: Vec<String>,
    /// Individual per observation row.
    pub obs_ids: Vec<String>,
    pub dropped_ids: Vec<String>,
}

impl ModelSpec {
    pub fn n_obs(&self) -> usize {
        self.response.len()
    }

    pub fn n_individuals(&self) -> usize {
        self.common_order.len()
    }

    /// Random-effect names in registration order (grouped first, then
    /// genetic); the solver's variance components follow this order,
    /// with the residual appended last.
    pub fn random_effect_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.grouped.iter().map(|g| g.name.clone()).collect();
        names.extend(self.genetic.iter().map(|g| g.name.clone()));
        names
    }
}

/// Assemble a model from a formula, a phenotype table, and named
/// genetic sources.
pub fn make_model(
    formula_text: &str,
    pheno: &PhenoTable,
    sources: Vec<(String, GeneticData)>,
) -> Result<ModelSpec> {
    let keys: Vec<String> = sources.iter().map(|(k, _)| k.clone()).collect();
    let formula = Formula::parse(formula_text, &keys)?;

    // Drop rows with a missing response before alignment.
    let keep = pheno.rows_with_value(&formula.response).ok_or_else(|| {
        ModelError::Value(format!(
            "response column '{}' not found in phenotype table (columns: {})",
            formula.response,
            pheno.column_names().join(", ")
        ))
    })?;
    let pheno = pheno.subset_rows(&keep);

    let aligned = align(&pheno, sources)?;
    let n_obs = aligned.phenotype.n_rows();
    info!(
        "Assembling model '{}': {} observations, {} individuals, {} dropped",
        formula_text,
        n_obs,
        aligned.common_order.len(),
        aligned.dropped_ids.len()
    );

    let response = aligned
        .phenotype
        .numeric(&formula.response)
        .ok_or_else(|| {
            ModelError::Value(format!(
                "response column '{}' is not numeric",
                formula.response
            ))
        })?;

    let (fixed_design, fixed_labels) =
        design::build_fixed_design(&aligned.phenotype, &formula.fixed)?;

    let mut grouped = Vec::new();
    for name in &formula.grouped {
        let (incidence, levels) = design::build_group_incidence(&aligned.phenotype, name)?;
        grouped.push(GroupedEffect {
            name: format!("({})", name),
            incidence,
            levels,
        });
    }

    let obs_ids = aligned.phenotype.ids().to_vec();
    let incidence_template = design::build_genetic_incidence(&obs_ids, &aligned.common_order)?;

    let mut genetic = Vec::new();
    for term in &formula.genetic {
        let data = aligned
            .genetic
            .iter()
            .find(|(k, _)| k == &term.key)
            .map(|(_, d)| d)
            .expect("parsed genetic key always has a source");

        let basis = match data {
            GeneticData::Relationship(grm) => GeneticBasis::Relationship(grm.matrix.clone()),
            GeneticData::Dosages {
                matrix,
                marker_ids,
                p_major,
                ..
            } => GeneticBasis::Markers {
                matrix: matrix.clone(),
                marker_ids: marker_ids.clone(),
                p_major: p_major.clone(),
            },
        };

        let env_design = match &term.env {
            Some(env_col) => Some(design::build_env_design(&aligned.phenotype, env_col)?),
            None => None,
        };

        genetic.push(GeneticEffect {
            name: term.name.clone(),
            key: term.key.clone(),
            incidence: incidence_template.clone(),
            basis,
            env_design,
        });
    }

    Ok(ModelSpec {
        response_name: formula.response.clone(),
        fixed_formula: formula.fixed_rhs(),
        response,
        fixed_design,
        fixed_labels,
        grouped,
        genetic,
        common_order: aligned.common_order,
        obs_ids,
        dropped_ids: aligned.dropped_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grm::{Grm, GrmMethod};

    fn toy_grm(ids: &[&str]) -> Grm {
        let n = ids.len();
        Grm {
            method: GrmMethod::Additive,
            matrix: DenseMatrix::identity(n),
            individual_ids: ids.iter().map(|s| s.to_string()).collect(),
            p_major: vec![0.5],
            scale_factor: 1.0,
        }
    }

    fn toy_pheno() -> PhenoTable {
        PhenoTable::from_columns(
            vec!["s1".into(), "s1".into(), "s2".into(), "s3".into()],
            vec![
                (
                    "y".into(),
                    vec![
                        Some("1.0".into()),
                        Some("1.5".into()),
                        Some("2.0".into()),
                        None,
                    ],
                ),
                (
                    "age".into(),
                    vec![
                        Some("4".into()),
                        Some("5".into()),
                        Some("6".into()),
                        Some("7".into()),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_make_model_shapes() {
        let pheno = toy_pheno();
        let grm = toy_grm(&["s1", "s2", "s3"]);
        let spec = make_model(
            "y ~ 1 + age + {g}",
            &pheno,
            vec![("g".into(), GeneticData::Relationship(grm))],
        )
        .unwrap();

        // Row 4 dropped for missing response; s3 still aligned but has
        // no surviving observation.
        assert_eq!(spec.n_obs(), 3);
        assert_eq!(spec.response, vec![1.0, 1.5, 2.0]);
        assert_eq!(spec.common_order, vec!["s1", "s2", "s3"]);
        assert_eq!(spec.fixed_design.ncols(), 2);
        assert_eq!(spec.genetic.len(), 1);
        assert_eq!(spec.genetic[0].incidence.nrows(), 3);
        assert_eq!(spec.genetic[0].incidence.ncols(), 3);
        assert_eq!(spec.fixed_formula, "1 + age");
        assert_eq!(spec.random_effect_names(), vec!["g"]);
    }

    #[test]
    fn test_incidence_maps_repeated_rows() {
        let pheno = toy_pheno();
        let grm = toy_grm(&["s1", "s2", "s3"]);
        let spec = make_model(
            "y ~ 1 + {g}",
            &pheno,
            vec![("g".into(), GeneticData::Relationship(grm))],
        )
        .unwrap();
        let z = &spec.genetic[0].incidence;
        assert_eq!(z.dense_row(0), vec![1.0, 0.0, 0.0]);
        assert_eq!(z.dense_row(1), vec![1.0, 0.0, 0.0]);
        assert_eq!(z.dense_row(2), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_response_column() {
        let pheno = toy_pheno();
        let grm = toy_grm(&["s1", "s2"]);
        let err = make_model(
            "weight ~ 1 + {g}",
            &pheno,
            vec![("g".into(), GeneticData::Relationship(grm))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("'weight'"));
    }
}
