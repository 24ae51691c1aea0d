//! REML variance-component estimation and BLUP extraction.

pub mod projector;
pub mod solver;
pub mod updater;

pub use solver::{GblupFit, GblupModel, RemlConfig, RemlStatus};
pub use updater::RemlMethod;
