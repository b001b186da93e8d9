//! Image filters: smoothing, rescaling and the level pyramid.

pub mod gaussian;
pub mod pyramid;
pub mod scale;

pub use gaussian::GaussianFilter;
pub use pyramid::{level_sizes, ImagePyramid};
pub use scale::ScaleFilter;
