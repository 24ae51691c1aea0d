//! Prediction for new genotyped individuals.
//!
//! Two paths share one output shape:
//! - GBLUP: stream a cross-relationship block per genetic term and
//!   combine it with the snapshot's variance component and projected
//!   response (the BLUP cross-covariance formula).
//! - Bayesian: center newly decoded dosages with the training allele
//!   frequencies and apply the posterior-mean marker weights.
//!
//! The output decomposes every prediction into the fixed contribution
//! plus one column per random term; the columns sum to the total.

use std::path::Path;

use tracing::info;

use gebv_geno::{GenotypeSource, PhenoTable};

use crate::bayes::mcmc::BayesFit;
use crate::error::{ModelError, Result};
use crate::grm::{CrossGrm, Grm};
use crate::model::design::build_fixed_for_new;
use crate::model::snapshot::ModelParams;

/// Decomposed predictions: one row per new individual.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub ids: Vec<String>,
    pub total: Vec<f64>,
    pub fixed: Vec<f64>,
    /// Per-term contributions, in term order.
    pub contributions: Vec<(String, Vec<f64>)>,
}

impl Prediction {
    /// Render as a tab-separated table with a header row.
    pub fn to_tsv(&self) -> String {
        let mut header = vec!["id".to_string(), "total".to_string(), "fixed".to_string()];
        header.extend(self.contributions.iter().map(|(n, _)| n.clone()));
        let mut out = header.join("\t");
        out.push('\n');
        for (i, id) in self.ids.iter().enumerate() {
            let mut row = vec![id.clone(), format!("{:.6}", self.total[i]), format!("{:.6}", self.fixed[i])];
            for (_, values) in &self.contributions {
                row.push(format!("{:.6}", values[i]));
            }
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }
}

/// Predictor over a fitted GBLUP parameter snapshot.
///
/// Holds the snapshot and one streaming cross-GRM per genetic term;
/// never mutates or re-fits the original model.
pub struct GblupPredictor {
    params: ModelParams,
    terms: Vec<(String, CrossGrm)>,
}

impl GblupPredictor {
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            terms: Vec::new(),
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Register the cross-GRM state for one fitted random term.
    pub fn add_cross_grm(
        &mut self,
        name: &str,
        train_bed: &Path,
        grm: &Grm,
        chunk_size: usize,
    ) -> Result<()> {
        if !self.params.random_effect_names.iter().any(|n| n == name) {
            return Err(ModelError::Value(format!(
                "random effect '{}' is not part of the fitted model; available: [{}]",
                name,
                self.params.random_effect_names.join(", ")
            )));
        }
        let cross = CrossGrm::new(train_bed, grm, self.params.train_ids.clone(), chunk_size);
        self.terms.push((name.to_string(), cross));
        Ok(())
    }

    /// Predict new individuals from their BED prefix. A covariate
    /// table is required unless the fitted fixed formula is
    /// intercept-only.
    pub fn predict(&self, test_bed: &Path, data: Option<&PhenoTable>) -> Result<Prediction> {
        if self.terms.is_empty() {
            return Err(ModelError::Value(
                "no cross-GRM registered; call add_cross_grm for each fitted term".into(),
            ));
        }

        let mut ids: Option<Vec<String>> = None;
        let mut contributions = Vec::new();

        for (name, cross) in &self.terms {
            let (block, test_ids) = cross.compute(test_bed)?;
            match &ids {
                None => ids = Some(test_ids),
                Some(existing) => {
                    if existing != &test_ids {
                        return Err(ModelError::Format(
                            "cross-GRM sources disagree on the test individual order".into(),
                        ));
                    }
                }
            }
            let index = self
                .params
                .random_effect_names
                .iter()
                .position(|n| n == name)
                .expect("validated in add_cross_grm");
            let adjoint = self.params.blup_adjoint(index);
            contributions.push((name.clone(), block.mat_vec(&adjoint)));
        }

        let ids = ids.expect("at least one term computed");
        let fixed = fixed_contribution(
            &self.params.fixed_formula,
            &self.params.fixed_labels,
            &self.params.beta,
            &ids,
            data,
        )?;

        info!(
            "Predicted {} individuals across {} random terms",
            ids.len(),
            contributions.len()
        );
        Ok(assemble_prediction(ids, fixed, contributions))
    }
}

/// Apply posterior-mean marker weights to newly decoded genotypes.
pub fn predict_bayes(
    fit: &BayesFit,
    source: &mut dyn GenotypeSource,
    data: Option<&PhenoTable>,
) -> Result<Prediction> {
    let ids = source.sample_ids().to_vec();
    let dosages = source.read_dense()?;

    let mut contributions = Vec::new();
    for term in &fit.terms {
        if source.marker_ids() != term.marker_ids.as_slice() {
            return Err(ModelError::Format(format!(
                "markers of the new genotypes do not match those the term '{}' was fitted on",
                term.name
            )));
        }
        let mut values = vec![0.0; ids.len()];
        for (j, &w) in term.weights.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let center = 2.0 * term.p_major[j];
            for (i, v) in values.iter_mut().enumerate() {
                let d = dosages.get(i, j);
                let c = if d.is_nan() { 0.0 } else { d - center };
                *v += w * c;
            }
        }
        contributions.push((term.name.clone(), values));
    }

    let fixed = fixed_contribution(
        &fit.fixed_formula,
        &fit.fixed_labels,
        &fit.beta,
        &ids,
        data,
    )?;
    Ok(assemble_prediction(ids, fixed, contributions))
}

/// Fixed-effect contribution for the given individuals.
fn fixed_contribution(
    fixed_formula: &str,
    fixed_labels: &[String],
    beta: &[f64],
    ids: &[String],
    data: Option<&PhenoTable>,
) -> Result<Vec<f64>> {
    if fixed_formula == "1" {
        let intercept = beta.first().copied().unwrap_or(0.0);
        return Ok(vec![intercept; ids.len()]);
    }

    let table = data.ok_or_else(|| {
        ModelError::Value(format!(
            "the fixed-effect formula is '{}', but no covariate table was provided",
            fixed_formula
        ))
    })?;

    // Every new individual must be present; first occurrence wins.
    let mut rows = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    for id in ids {
        match table.ids().iter().position(|t| t == id) {
            Some(row) => rows.push(row),
            None => missing.push(id.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ModelError::Value(format!(
            "individuals missing from the covariate table: {}",
            missing.join(", ")
        )));
    }

    let subset = table.subset_rows(&rows);
    let design = build_fixed_for_new(&subset, fixed_labels)?;
    Ok(design.mat_vec(beta))
}

fn assemble_prediction(
    ids: Vec<String>,
    fixed: Vec<f64>,
    contributions: Vec<(String, Vec<f64>)>,
) -> Prediction {
    let mut total = fixed.clone();
    for (_, values) in &contributions {
        for (t, v) in total.iter_mut().zip(values.iter()) {
            *t += v;
        }
    }
    Prediction {
        ids,
        total,
        fixed,
        contributions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::snapshot::{PARAMS_MAGIC, PARAMS_VERSION};
    use gebv_linalg::DenseMatrix;

    fn params() -> ModelParams {
        ModelParams {
            magic: PARAMS_MAGIC,
            version: PARAMS_VERSION,
            response_name: "y".into(),
            fixed_formula: "1 + age".into(),
            fixed_labels: vec!["intercept".into(), "age".into()],
            beta: vec![1.0, 0.5],
            sigma: vec![0.8, 0.2],
            proj_y: vec![0.1, 0.2],
            obs_ids: vec!["t1".into(), "t2".into()],
            train_ids: vec!["t1".into(), "t2".into()],
            random_effect_names: vec!["g".into()],
            dropped_ids: vec![],
        }
    }

    #[test]
    fn test_unknown_term_rejected() {
        let mut predictor = GblupPredictor::new(params());
        let grm = Grm {
            method: crate::grm::GrmMethod::Additive,
            matrix: DenseMatrix::identity(2),
            individual_ids: vec!["t1".into(), "t2".into()],
            p_major: vec![0.5],
            scale_factor: 1.0,
        };
        let err = predictor
            .add_cross_grm("h", Path::new("/tmp/none"), &grm, 0)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'h'"));
        assert!(msg.contains("g"));
    }

    #[test]
    fn test_fixed_contribution_requires_table() {
        let err = fixed_contribution(
            "1 + age",
            &["intercept".into(), "age".into()],
            &[1.0, 0.5],
            &["n1".to_string()],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("1 + age"));
    }

    #[test]
    fn test_fixed_contribution_missing_individual() {
        let table = PhenoTable::from_columns(
            vec!["n1".into()],
            vec![("age".into(), vec![Some("4".into())])],
        );
        let err = fixed_contribution(
            "1 + age",
            &["intercept".into(), "age".into()],
            &[1.0, 0.5],
            &["n1".to_string(), "n2".to_string()],
            Some(&table),
        )
        .unwrap_err();
        assert!(err.to_string().contains("n2"));
    }

    #[test]
    fn test_intercept_only_needs_no_table() {
        let fixed = fixed_contribution("1", &["intercept".into()], &[3.0], &["a".to_string()], None)
            .unwrap();
        assert_eq!(fixed, vec![3.0]);
    }

    #[test]
    fn test_total_is_sum_of_columns() {
        let pred = assemble_prediction(
            vec!["a".into(), "b".into()],
            vec![1.0, 1.0],
            vec![
                ("g".into(), vec![0.5, -0.5]),
                ("d".into(), vec![0.25, 0.0]),
            ],
        );
        for i in 0..2 {
            let sum: f64 = pred.fixed[i]
                + pred
                    .contributions
                    .iter()
                    .map(|(_, v)| v[i])
                    .sum::<f64>();
            assert!((pred.total[i] - sum).abs() < 1e-12);
        }
    }

    #[test]
    fn test_tsv_shape() {
        let pred = assemble_prediction(
            vec!["a".into()],
            vec![1.0],
            vec![("g".into(), vec![0.5])],
        );
        let tsv = pred.to_tsv();
        let mut lines = tsv.lines();
        assert_eq!(lines.next().unwrap(), "id\ttotal\tfixed\tg");
        assert!(lines.next().unwrap().starts_with("a\t1.5"));
    }
}
