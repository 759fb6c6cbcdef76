//! # Statistical Models
//!
//! The sequence error model, the read-to-haplotype likelihood model, and
//! the genotype prior model shared by the callers.

pub mod error_model;
pub mod likelihood;
pub mod priors;

pub use error_model::SequenceErrorModel;
pub use likelihood::{HaplotypeLikelihoodModel, LikelihoodMatrix};
pub use priors::GenotypePriorModel;
