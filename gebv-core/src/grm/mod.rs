//! Genetic relationship matrices: streamed construction, persistence,
//! and cross-relationship blocks for prediction.

pub mod build;
pub mod cross;
pub mod io;

pub use build::{build_grm, Grm, GrmMethod};
pub use cross::CrossGrm;
pub use io::{load_grm, save_grm};
