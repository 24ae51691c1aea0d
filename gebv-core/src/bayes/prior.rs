//! Variance priors for the Gibbs sampler.

use rand::Rng;
use rand::distributions::Distribution;
use statrs::distribution::{Beta, ChiSquared};

use crate::error::{ModelError, Result};

/// Scaled inverse chi-squared prior for a variance component.
///
/// The conditional posterior given a sum of squares over `count`
/// draws is (sum_sq + df * scale) / chi2(df + count).
#[derive(Debug, Clone, Copy)]
pub struct ScaledInvChiSq {
    pub df: f64,
    pub scale: f64,
}

impl ScaledInvChiSq {
    pub fn new(df: f64, scale: f64) -> Result<Self> {
        if df <= 0.0 || !df.is_finite() {
            return Err(ModelError::Value(format!(
                "prior degrees of freedom must be positive, got {}",
                df
            )));
        }
        if scale < 0.0 || !scale.is_finite() {
            return Err(ModelError::Value(format!(
                "prior scale must be non-negative, got {}",
                scale
            )));
        }
        Ok(Self { df, scale })
    }

    /// Draw from the conditional posterior.
    pub fn sample<R: Rng>(&self, sum_sq: f64, count: f64, rng: &mut R) -> f64 {
        let df = self.df + count.max(0.0);
        let chi = ChiSquared::new(df).expect("df validated at construction");
        let x: f64 = chi.sample(rng);
        (sum_sq + self.df * self.scale) / x.max(1e-300)
    }
}

/// Beta(1 + included, 1 + excluded) draw for the inclusion proportion
/// of the variable-selection priors.
pub fn sample_inclusion_probability<R: Rng>(included: usize, excluded: usize, rng: &mut R) -> f64 {
    let beta = Beta::new(1.0 + included as f64, 1.0 + excluded as f64)
        .expect("beta parameters are at least one");
    beta.sample(rng).clamp(1e-6, 1.0 - 1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_prior_validation() {
        assert!(ScaledInvChiSq::new(5.0, 0.1).is_ok());
        assert!(ScaledInvChiSq::new(0.0, 0.1).is_err());
        assert!(ScaledInvChiSq::new(5.0, -1.0).is_err());
    }

    #[test]
    fn test_posterior_draws_positive_and_centered() {
        let prior = ScaledInvChiSq::new(5.0, 1.0).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let mut sum = 0.0;
        let draws = 4000;
        for _ in 0..draws {
            let v = prior.sample(100.0, 100.0, &mut rng);
            assert!(v > 0.0);
            sum += v;
        }
        // Posterior mean of (100 + 5) / chi2(105) draws is 105/103.
        let mean = sum / draws as f64;
        assert!((mean - 105.0 / 103.0).abs() < 0.05, "mean = {}", mean);
    }

    #[test]
    fn test_inclusion_probability_tracks_counts() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(11);
        let mut sum = 0.0;
        for _ in 0..2000 {
            sum += sample_inclusion_probability(90, 10, &mut rng);
        }
        let mean = sum / 2000.0;
        assert!((mean - 91.0 / 102.0).abs() < 0.02, "mean = {}", mean);
    }
}
