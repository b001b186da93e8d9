//! Interpolation types and operations.
//!
//! This module provides the interpolation trait and implementations used to
//! sample grid buffers (intensities or per-voxel vectors) at continuous
//! voxel coordinates.

pub mod linear;
pub mod trait_;

pub use linear::LinearInterpolator;
pub use trait_::Interpolator;
