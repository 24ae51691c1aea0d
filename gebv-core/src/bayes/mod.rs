//! Bayesian-alphabet estimation of marker effects.

pub mod gibbs;
pub mod mcmc;
pub mod model;
pub mod prior;

pub use mcmc::{run_gibbs, BayesFit, BayesTermFit};
pub use model::{BayesConfig, BayesMethod, BayesModel};
pub use prior::ScaledInvChiSq;
