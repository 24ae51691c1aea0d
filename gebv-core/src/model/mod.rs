//! Model assembly: formula terms, design matrices, the assembled
//! model specification, and the fitted parameter snapshot.

pub mod design;
pub mod formula;
pub mod snapshot;
pub mod spec;

pub use formula::{FixedTerm, Formula, GeneticTerm};
pub use snapshot::{load_params, save_params, ModelParams};
pub use spec::{make_model, GeneticEffect, GroupedEffect, ModelSpec};
