//! Design-matrix construction from phenotype tables.
//!
//! Fixed effects become a dense column-major matrix (intercept,
//! covariates, dummy-coded factors). Grouped random effects and
//! genetic terms become sparse 0/1 incidence matrices. Missing values
//! in any fixed or grouped column are hard errors naming the column;
//! genetic-side missingness is handled by the aligner.

use gebv_linalg::{DenseMatrix, SparseMatrix};
use gebv_geno::PhenoTable;

use crate::error::{ModelError, Result};
use crate::model::formula::FixedTerm;

/// Distinct values of a column in order of first appearance.
fn factor_levels(raw: &[Option<String>]) -> Vec<String> {
    let mut levels: Vec<String> = Vec::new();
    for cell in raw.iter().flatten() {
        if !levels.contains(cell) {
            levels.push(cell.clone());
        }
    }
    levels
}

/// Fetch a column, failing with the column name if absent or if any
/// cell is missing.
fn complete_column<'t>(pheno: &'t PhenoTable, name: &str) -> Result<&'t [Option<String>]> {
    let raw = pheno.raw(name).ok_or_else(|| {
        ModelError::Value(format!(
            "column '{}' not found in phenotype table (columns: {})",
            name,
            pheno.column_names().join(", ")
        ))
    })?;
    if let Some(row) = raw.iter().position(|c| c.is_none()) {
        return Err(ModelError::Value(format!(
            "column '{}' has a missing value at row {}; fixed and grouped \
             effect columns must be complete",
            name,
            row + 1
        )));
    }
    Ok(raw)
}

/// Build the dense fixed-effect design matrix and its column labels.
///
/// Covariate columns are labeled by name; factor dummies as
/// `name[level]`. When an intercept is present the first factor level
/// is dropped to keep the design full rank.
pub fn build_fixed_design(
    pheno: &PhenoTable,
    terms: &[FixedTerm],
) -> Result<(DenseMatrix, Vec<String>)> {
    let n = pheno.n_rows();
    let has_intercept = terms.contains(&FixedTerm::Intercept);

    let mut columns: Vec<(String, Vec<f64>)> = Vec::new();

    for term in terms {
        match term {
            FixedTerm::Intercept => {
                columns.push(("intercept".to_string(), vec![1.0; n]));
            }
            FixedTerm::Named(name) => {
                let raw = complete_column(pheno, name)?;
                match pheno.numeric(name) {
                    Some(values) => {
                        columns.push((name.clone(), values));
                    }
                    None => {
                        let levels = factor_levels(raw);
                        let skip = usize::from(has_intercept);
                        for level in levels.iter().skip(skip) {
                            let col: Vec<f64> = raw
                                .iter()
                                .map(|c| {
                                    if c.as_deref() == Some(level.as_str()) {
                                        1.0
                                    } else {
                                        0.0
                                    }
                                })
                                .collect();
                            columns.push((format!("{}[{}]", name, level), col));
                        }
                    }
                }
            }
        }
    }

    if columns.is_empty() {
        return Err(ModelError::Value(
            "fixed-effect design has no columns; use '1' for an intercept-only model".into(),
        ));
    }

    let p = columns.len();
    let mut design = DenseMatrix::zeros(n, p);
    let mut labels = Vec::with_capacity(p);
    for (j, (label, col)) in columns.into_iter().enumerate() {
        design.set_col(j, &col);
        labels.push(label);
    }
    Ok((design, labels))
}

/// Rebuild a fixed design for new data so its columns match the
/// training labels exactly. Factor levels unseen in the new data
/// simply produce zero columns for the training dummies.
pub fn build_fixed_for_new(
    pheno: &PhenoTable,
    labels: &[String],
) -> Result<DenseMatrix> {
    let n = pheno.n_rows();
    let mut design = DenseMatrix::zeros(n, labels.len());

    for (j, label) in labels.iter().enumerate() {
        if label == "intercept" {
            design.set_col(j, &vec![1.0; n]);
        } else if let Some((name, level)) = label
            .split_once('[')
            .and_then(|(n2, rest)| rest.strip_suffix(']').map(|l| (n2, l)))
        {
            let raw = complete_column(pheno, name)?;
            let col: Vec<f64> = raw
                .iter()
                .map(|c| if c.as_deref() == Some(level) { 1.0 } else { 0.0 })
                .collect();
            design.set_col(j, &col);
        } else {
            complete_column(pheno, label)?;
            let values = pheno.numeric(label).ok_or_else(|| {
                ModelError::Value(format!(
                    "column '{}' was numeric at training time but is not numeric here",
                    label
                ))
            })?;
            design.set_col(j, &values);
        }
    }
    Ok(design)
}

/// Build a grouped random-effect incidence matrix and its level names.
pub fn build_group_incidence(
    pheno: &PhenoTable,
    name: &str,
) -> Result<(SparseMatrix, Vec<String>)> {
    let raw = complete_column(pheno, name)?;
    let levels = factor_levels(raw);
    if levels.len() < 2 {
        return Err(ModelError::Value(format!(
            "grouped effect '({})' has {} level(s); at least 2 are required",
            name,
            levels.len()
        )));
    }
    let col_of_row: Vec<usize> = raw
        .iter()
        .map(|c| {
            let v = c.as_ref().expect("column checked complete above");
            levels
                .iter()
                .position(|l| l == v)
                .expect("levels collected from this column")
        })
        .collect();
    Ok((SparseMatrix::incidence(levels.len(), &col_of_row), levels))
}

/// Build the genetic incidence matrix mapping phenotype rows onto the
/// distinct aligned individuals: row i carries a single 1 in the
/// column of that row's individual.
pub fn build_genetic_incidence(obs_ids: &[String], order: &[String]) -> Result<SparseMatrix> {
    let col_of_row: Vec<usize> = obs_ids
        .iter()
        .map(|id| {
            order.iter().position(|o| o == id).ok_or_else(|| {
                ModelError::Value(format!(
                    "phenotype individual '{}' is not in the aligned individual order",
                    id
                ))
            })
        })
        .collect::<Result<_>>()?;
    Ok(SparseMatrix::incidence(order.len(), &col_of_row))
}

/// Build the environment design for a GxE term (no intercept: a single
/// numeric column, or one dummy per factor level).
pub fn build_env_design(pheno: &PhenoTable, name: &str) -> Result<DenseMatrix> {
    let raw = complete_column(pheno, name)?;
    match pheno.numeric(name) {
        Some(values) => {
            let mut design = DenseMatrix::zeros(pheno.n_rows(), 1);
            design.set_col(0, &values);
            Ok(design)
        }
        None => {
            let levels = factor_levels(raw);
            let mut design = DenseMatrix::zeros(pheno.n_rows(), levels.len());
            for (j, level) in levels.iter().enumerate() {
                let col: Vec<f64> = raw
                    .iter()
                    .map(|c| {
                        if c.as_deref() == Some(level.as_str()) {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect();
                design.set_col(j, &col);
            }
            Ok(design)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PhenoTable {
        PhenoTable::from_columns(
            vec!["s1".into(), "s1".into(), "s2".into()],
            vec![
                (
                    "age".into(),
                    vec![Some("40".into()), Some("45".into()), Some("50".into())],
                ),
                (
                    "site".into(),
                    vec![
                        Some("north".into()),
                        Some("south".into()),
                        Some("north".into()),
                    ],
                ),
                (
                    "gap".into(),
                    vec![Some("1".into()), None, Some("3".into())],
                ),
            ],
        )
    }

    #[test]
    fn test_fixed_design_intercept_covariate_factor() {
        let pheno = table();
        let terms = vec![
            FixedTerm::Intercept,
            FixedTerm::Named("age".into()),
            FixedTerm::Named("site".into()),
        ];
        let (x, labels) = build_fixed_design(&pheno, &terms).unwrap();
        assert_eq!(labels, vec!["intercept", "age", "site[south]"]);
        assert_eq!(x.nrows(), 3);
        assert_eq!(x.ncols(), 3);
        assert_eq!(x.col(0), vec![1.0, 1.0, 1.0]);
        assert_eq!(x.col(1), vec![40.0, 45.0, 50.0]);
        // First level (north) dropped; dummy marks south rows.
        assert_eq!(x.col(2), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_missing_value_names_column() {
        let pheno = table();
        let terms = vec![FixedTerm::Intercept, FixedTerm::Named("gap".into())];
        let err = build_fixed_design(&pheno, &terms).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'gap'"), "message was: {}", msg);
    }

    #[test]
    fn test_unknown_column_names_available() {
        let pheno = table();
        let terms = vec![FixedTerm::Named("weight".into())];
        let err = build_fixed_design(&pheno, &terms).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'weight'"));
        assert!(msg.contains("age"));
    }

    #[test]
    fn test_genetic_incidence_repeated_measures() {
        let obs = vec!["s1".to_string(), "s1".to_string(), "s2".to_string()];
        let order = vec!["s1".to_string(), "s2".to_string()];
        let z = build_genetic_incidence(&obs, &order).unwrap();
        assert_eq!(z.dense_row(0), vec![1.0, 0.0]);
        assert_eq!(z.dense_row(1), vec![1.0, 0.0]);
        assert_eq!(z.dense_row(2), vec![0.0, 1.0]);
    }

    #[test]
    fn test_group_incidence() {
        let pheno = table();
        let (z, levels) = build_group_incidence(&pheno, "site").unwrap();
        assert_eq!(levels, vec!["north", "south"]);
        assert_eq!(z.nrows(), 3);
        assert_eq!(z.ncols(), 2);
        assert_eq!(z.dense_row(1), vec![0.0, 1.0]);
    }

    #[test]
    fn test_fixed_for_new_matches_training_labels() {
        let pheno = table();
        let labels = vec![
            "intercept".to_string(),
            "age".to_string(),
            "site[south]".to_string(),
        ];
        let x = build_fixed_for_new(&pheno, &labels).unwrap();
        assert_eq!(x.ncols(), 3);
        assert_eq!(x.col(2), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_env_design_factor_keeps_all_levels() {
        let pheno = table();
        let e = build_env_design(&pheno, "site").unwrap();
        assert_eq!(e.ncols(), 2);
        assert_eq!(e.col(0), vec![1.0, 0.0, 1.0]);
        assert_eq!(e.col(1), vec![0.0, 1.0, 0.0]);
    }
}
