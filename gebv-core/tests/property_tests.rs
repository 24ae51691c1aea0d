//! Property-based tests for the invariants the engine promises for
//! all valid inputs: GRM symmetry and non-negative diagonals, chunk
//! invariance of the streamed accumulation, and alignment set
//! arithmetic.

use proptest::prelude::*;

use gebv_linalg::DenseMatrix;
use gebv_geno::{MatrixSource, PhenoTable};

use gebv_core::align::{align, GeneticData};
use gebv_core::grm::{build_grm, Grm, GrmMethod};

/// Strategy: a dosage matrix as (n, m, flat values in {0,1,2}, with a
/// sprinkle of missing).
fn dosage_matrix() -> impl Strategy<Value = (usize, usize, Vec<f64>)> {
    (2usize..8, 2usize..12).prop_flat_map(|(n, m)| {
        proptest::collection::vec(
            prop_oneof![
                4 => Just(0.0),
                4 => Just(1.0),
                4 => Just(2.0),
                1 => Just(f64::NAN),
            ],
            n * m,
        )
        .prop_map(move |vals| (n, m, vals))
    })
}

fn source_from(n: usize, m: usize, vals: &[f64]) -> MatrixSource {
    let matrix = DenseMatrix::from_row_major(n, m, vals);
    MatrixSource::new(
        (0..n).map(|i| format!("s{:02}", i)).collect(),
        (0..m).map(|j| format!("1_{}", j)).collect(),
        matrix,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_grm_symmetric_nonneg_diagonal((n, m, vals) in dosage_matrix()) {
        let mut src = source_from(n, m, &vals);
        // Monomorphic-only inputs are rejected; that is not a
        // violation of the invariant under test.
        if let Ok(grm) = build_grm(&mut src, GrmMethod::Additive, 0) {
            prop_assert!(grm.matrix.max_asymmetry() < 1e-10);
            for d in grm.matrix.diag() {
                prop_assert!(d >= -1e-12, "negative diagonal: {}", d);
            }
            prop_assert!(grm.p_major.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn prop_chunk_invariance(
        (n, m, vals) in dosage_matrix(),
        chunk in 1usize..15,
        method_dom in proptest::bool::ANY,
    ) {
        let method = if method_dom { GrmMethod::Dominance } else { GrmMethod::Additive };
        let mut one_shot = source_from(n, m, &vals);
        let reference = build_grm(&mut one_shot, method, 0);
        let mut chunked = source_from(n, m, &vals);
        let streamed = build_grm(&mut chunked, method, chunk);

        match (reference, streamed) {
            (Ok(a), Ok(b)) => {
                prop_assert!((a.scale_factor - b.scale_factor).abs() < 1e-9);
                for i in 0..n {
                    for j in 0..n {
                        prop_assert!(
                            (a.matrix.get(i, j) - b.matrix.get(i, j)).abs() < 1e-9,
                            "chunked result differs at ({}, {})", i, j
                        );
                    }
                }
            }
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "chunked and one-shot disagree on failure"),
        }
    }

    #[test]
    fn prop_alignment_invariants(
        pheno_pick in proptest::collection::vec(proptest::bool::ANY, 8),
        grm_pick in proptest::collection::vec(proptest::bool::ANY, 8),
    ) {
        let universe: Vec<String> = (0..8).map(|i| format!("id{}", i)).collect();
        let pheno_ids: Vec<String> = universe
            .iter()
            .zip(pheno_pick.iter())
            .filter(|(_, keep)| **keep)
            .map(|(id, _)| id.clone())
            .collect();
        let grm_ids: Vec<String> = universe
            .iter()
            .zip(grm_pick.iter())
            .filter(|(_, keep)| **keep)
            .map(|(id, _)| id.clone())
            .collect();
        prop_assume!(!pheno_ids.is_empty());
        prop_assume!(!grm_ids.is_empty());

        let pheno = PhenoTable::from_columns(
            pheno_ids.clone(),
            vec![("y".into(), pheno_ids.iter().map(|_| Some("1".to_string())).collect())],
        );
        let grm = Grm {
            method: GrmMethod::Additive,
            matrix: DenseMatrix::identity(grm_ids.len()),
            individual_ids: grm_ids.clone(),
            p_major: vec![0.5],
            scale_factor: 1.0,
        };

        let result = align(&pheno, vec![("g".into(), GeneticData::Relationship(grm))]);
        let expected: Vec<String> = pheno_ids
            .iter()
            .filter(|id| grm_ids.contains(id))
            .cloned()
            .collect();

        match result {
            Ok(aligned) => {
                prop_assert!(!expected.is_empty());
                // Common order is sorted and duplicate-free.
                let mut sorted = expected.clone();
                sorted.sort();
                sorted.dedup();
                prop_assert_eq!(aligned.common_order.clone(), sorted);
                // Every dimension matches the common order.
                match &aligned.genetic[0].1 {
                    GeneticData::Relationship(g) => {
                        prop_assert_eq!(g.matrix.nrows(), aligned.common_order.len());
                        prop_assert_eq!(g.matrix.ncols(), aligned.common_order.len());
                    }
                    _ => prop_assert!(false, "unexpected genetic data kind"),
                }
                // Dropped ids are exactly the phenotype ids outside
                // the intersection.
                let mut expected_dropped: Vec<String> = pheno_ids
                    .iter()
                    .filter(|id| !grm_ids.contains(id))
                    .cloned()
                    .collect();
                expected_dropped.sort();
                expected_dropped.dedup();
                prop_assert_eq!(aligned.dropped_ids.clone(), expected_dropped);
            }
            Err(_) => prop_assert!(expected.is_empty()),
        }
    }
}
