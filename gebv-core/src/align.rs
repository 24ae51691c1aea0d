//! Sample alignment across phenotype and genetic inputs.
//!
//! Computes the intersection of phenotype IDs with every genetic
//! source, fixes a deterministic (lexicographic) common order, drops
//! and reports non-overlapping individuals, and reindexes every input
//! to the common order before any numerical step runs.

use std::collections::BTreeSet;

use tracing::warn;

use gebv_linalg::DenseMatrix;
use gebv_geno::PhenoTable;

use crate::error::{ModelError, Result};
use crate::grm::Grm;

/// A genetic input keyed by a random-effect name.
#[derive(Debug, Clone)]
pub enum GeneticData {
    /// A symmetric relationship matrix; reindexed along both axes.
    Relationship(Grm),
    /// Raw dosages (individuals x markers); reindexed along rows.
    Dosages {
        individual_ids: Vec<String>,
        marker_ids: Vec<String>,
        matrix: DenseMatrix,
        /// Per-marker frequencies from the training decode, if known.
        p_major: Vec<f64>,
    },
}

impl GeneticData {
    fn ids(&self) -> &[String] {
        match self {
            GeneticData::Relationship(grm) => &grm.individual_ids,
            GeneticData::Dosages { individual_ids, .. } => individual_ids,
        }
    }

    /// Reindex to the common order.
    fn reindex(self, order: &[String]) -> Self {
        let pos = |ids: &[String], id: &String| {
            ids.iter()
                .position(|x| x == id)
                .expect("common order is an intersection of source ids")
        };
        match self {
            GeneticData::Relationship(grm) => {
                let idx: Vec<usize> = order.iter().map(|id| pos(&grm.individual_ids, id)).collect();
                GeneticData::Relationship(Grm {
                    method: grm.method,
                    matrix: grm.matrix.select_square(&idx),
                    individual_ids: order.to_vec(),
                    p_major: grm.p_major,
                    scale_factor: grm.scale_factor,
                })
            }
            GeneticData::Dosages {
                individual_ids,
                marker_ids,
                matrix,
                p_major,
            } => {
                let idx: Vec<usize> = order.iter().map(|id| pos(&individual_ids, id)).collect();
                GeneticData::Dosages {
                    individual_ids: order.to_vec(),
                    marker_ids,
                    matrix: matrix.select_rows(&idx),
                    p_major,
                }
            }
        }
    }
}

/// Everything downstream of alignment works on this.
#[derive(Debug, Clone)]
pub struct AlignedData {
    /// Distinct individual IDs, lexicographically sorted; the order of
    /// every genetic matrix axis.
    pub common_order: Vec<String>,
    /// Phenotype IDs that had no genetic record, sorted.
    pub dropped_ids: Vec<String>,
    /// Phenotype rows restricted to aligned individuals (repeated
    /// measures preserved, file order preserved).
    pub phenotype: PhenoTable,
    /// Genetic sources reindexed to `common_order`.
    pub genetic: Vec<(String, GeneticData)>,
}

/// Align a phenotype table against one or more named genetic sources.
pub fn align(pheno: &PhenoTable, sources: Vec<(String, GeneticData)>) -> Result<AlignedData> {
    if sources.is_empty() {
        return Err(ModelError::Value(
            "at least one genetic source is required for alignment".into(),
        ));
    }

    let pheno_ids: BTreeSet<&String> = pheno.ids().iter().collect();

    // Intersection across the phenotype and every source.
    let mut common: BTreeSet<&String> = pheno_ids.clone();
    for (name, data) in &sources {
        let ids: BTreeSet<&String> = data.ids().iter().collect();
        if ids.len() != data.ids().len() {
            return Err(ModelError::Value(format!(
                "genetic source '{}' has duplicate individual IDs",
                name
            )));
        }
        common = common.intersection(&ids).cloned().collect();
    }

    if common.is_empty() {
        let names: Vec<&str> = sources.iter().map(|(n, _)| n.as_str()).collect();
        return Err(ModelError::Value(format!(
            "no individuals shared between the phenotype and genetic sources [{}]",
            names.join(", ")
        )));
    }

    // BTreeSet iteration is already lexicographic.
    let common_order: Vec<String> = common.iter().map(|s| (*s).clone()).collect();

    let dropped_ids: Vec<String> = pheno_ids
        .difference(&common)
        .map(|s| (*s).clone())
        .collect();
    if !dropped_ids.is_empty() {
        warn!(
            "Dropping {} phenotype individual(s) without genetic records: {:?}",
            dropped_ids.len(),
            dropped_ids
        );
    }

    let keep_rows: Vec<usize> = pheno
        .ids()
        .iter()
        .enumerate()
        .filter(|(_, id)| common.contains(id))
        .map(|(i, _)| i)
        .collect();
    let phenotype = pheno.subset_rows(&keep_rows);

    let genetic = sources
        .into_iter()
        .map(|(name, data)| (name, data.reindex(&common_order)))
        .collect();

    Ok(AlignedData {
        common_order,
        dropped_ids,
        phenotype,
        genetic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grm::GrmMethod;

    fn grm_with_ids(ids: &[&str]) -> Grm {
        let n = ids.len();
        let mut matrix = DenseMatrix::identity(n);
        // Distinguishable off-diagonals to verify reindexing.
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    matrix.set(i, j, 0.1 * (i as f64 + 1.0) * (j as f64 + 1.0));
                }
            }
        }
        Grm {
            method: GrmMethod::Additive,
            matrix,
            individual_ids: ids.iter().map(|s| s.to_string()).collect(),
            p_major: vec![0.5],
            scale_factor: 1.0,
        }
    }

    fn pheno_with_ids(ids: &[&str]) -> PhenoTable {
        PhenoTable::from_columns(
            ids.iter().map(|s| s.to_string()).collect(),
            vec![(
                "y".into(),
                ids.iter().map(|_| Some("1.0".to_string())).collect(),
            )],
        )
    }

    #[test]
    fn test_intersection_and_drop_report() {
        let pheno = pheno_with_ids(&["s4", "s2", "s1", "s3"]);
        let grm = grm_with_ids(&["s1", "s2", "s3"]);
        let aligned = align(&pheno, vec![("g".into(), GeneticData::Relationship(grm))]).unwrap();

        assert_eq!(aligned.common_order, vec!["s1", "s2", "s3"]);
        assert_eq!(aligned.dropped_ids, vec!["s4"]);
        assert_eq!(aligned.phenotype.n_rows(), 3);

        match &aligned.genetic[0].1 {
            GeneticData::Relationship(g) => {
                assert_eq!(g.individual_ids, vec!["s1", "s2", "s3"]);
                assert_eq!(g.matrix.nrows(), 3);
            }
            _ => panic!("expected relationship data"),
        }
    }

    #[test]
    fn test_symmetric_reindex_permutes_both_axes() {
        // Phenotype order forces a permutation of the GRM.
        let pheno = pheno_with_ids(&["b", "a"]);
        let grm = grm_with_ids(&["b", "a"]);
        let orig = grm.matrix.clone();
        let aligned = align(&pheno, vec![("g".into(), GeneticData::Relationship(grm))]).unwrap();

        match &aligned.genetic[0].1 {
            GeneticData::Relationship(g) => {
                // common order is [a, b]; entry (a, b) was orig (1, 0).
                assert_eq!(g.individual_ids, vec!["a", "b"]);
                assert_eq!(g.matrix.get(0, 1), orig.get(1, 0));
                assert_eq!(g.matrix.get(0, 0), orig.get(1, 1));
            }
            _ => panic!("expected relationship data"),
        }
    }

    #[test]
    fn test_repeated_measures_preserved() {
        let pheno = pheno_with_ids(&["s1", "s1", "s2", "s9"]);
        let grm = grm_with_ids(&["s1", "s2"]);
        let aligned = align(&pheno, vec![("g".into(), GeneticData::Relationship(grm))]).unwrap();

        // Two s1 rows survive; distinct order has two individuals.
        assert_eq!(aligned.phenotype.n_rows(), 3);
        assert_eq!(aligned.phenotype.ids(), &["s1", "s1", "s2"]);
        assert_eq!(aligned.common_order, vec!["s1", "s2"]);
        assert_eq!(aligned.dropped_ids, vec!["s9"]);
    }

    #[test]
    fn test_multi_source_intersection() {
        let pheno = pheno_with_ids(&["s1", "s2", "s3"]);
        let g1 = grm_with_ids(&["s1", "s2", "s3"]);
        let g2 = grm_with_ids(&["s2", "s3"]);
        let aligned = align(
            &pheno,
            vec![
                ("a".into(), GeneticData::Relationship(g1)),
                ("d".into(), GeneticData::Relationship(g2)),
            ],
        )
        .unwrap();
        // Intersection across all sources, not pairwise.
        assert_eq!(aligned.common_order, vec!["s2", "s3"]);
        assert_eq!(aligned.dropped_ids, vec!["s1"]);
    }

    #[test]
    fn test_empty_intersection_fails() {
        let pheno = pheno_with_ids(&["x1", "x2"]);
        let grm = grm_with_ids(&["s1", "s2"]);
        let err = align(&pheno, vec![("g".into(), GeneticData::Relationship(grm))]).unwrap_err();
        match err {
            ModelError::Value(msg) => assert!(msg.contains("g")),
            other => panic!("expected Value error, got {:?}", other),
        }
    }

    #[test]
    fn test_dosage_rows_reindexed() {
        let pheno = pheno_with_ids(&["s2", "s1"]);
        let dosages = GeneticData::Dosages {
            individual_ids: vec!["s1".into(), "s2".into(), "s3".into()],
            marker_ids: vec!["1_1".into()],
            matrix: DenseMatrix::from_row_major(3, 1, &[10.0, 20.0, 30.0]),
            p_major: vec![0.5],
        };
        let aligned = align(&pheno, vec![("m".into(), dosages)]).unwrap();
        match &aligned.genetic[0].1 {
            GeneticData::Dosages { matrix, individual_ids, .. } => {
                assert_eq!(individual_ids, &["s1", "s2"]);
                assert_eq!(matrix.get(0, 0), 10.0);
                assert_eq!(matrix.get(1, 0), 20.0);
            }
            _ => panic!("expected dosage data"),
        }
    }
}
