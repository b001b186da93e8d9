//! Registration cost functions.
//!
//! A cost function is a weighted sum of [`CostTerm`]s held by a
//! [`CostFunctionAggregator`]: image similarity terms comparing the warped
//! source with the reference, and regularization terms penalising rough
//! deformations.

pub mod aggregator;
pub mod image;
pub mod regularization;
pub mod trait_;

pub use aggregator::CostFunctionAggregator;
pub use image::{ImageCost, SimilarityKernel};
pub use regularization::{DiffusionCost, ElasticCost};
pub use trait_::{CostProperty, CostTerm};
