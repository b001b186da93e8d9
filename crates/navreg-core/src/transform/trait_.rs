//! Transformation trait for grid-bound spatial mappings.
//!
//! This module defines the trait the registration engine drives: a mapping
//! `T` from reference voxel coordinates into source voxel coordinates, with
//! the parameter access, update and regridding hooks of the PDE solvers.

use crate::field::{ScalarField, VectorField};
use crate::grid::GridSize;
use crate::spatial::FVector;

/// Transformation trait for grid-bound spatial mappings.
///
/// A transformation pulls a source image back onto the reference grid:
/// `warped(x) = source(T(x))`. Coordinates are continuous voxel indices of
/// the grid returned by [`Transformation::size`].
///
/// # Type Parameters
/// * `D` - The spatial dimensionality (2 or 3)
pub trait Transformation<const D: usize>: Send + Sync {
    /// Grid the transformation is defined on.
    fn size(&self) -> GridSize<D>;

    /// Map a single point.
    fn transform_point(&self, point: &FVector<D>) -> FVector<D>;

    /// Number of free parameters.
    fn degrees_of_freedom(&self) -> usize;

    /// Current parameters as a flat vector.
    fn parameters(&self) -> Vec<f64>;

    /// Overwrite the parameters from a flat vector.
    fn set_parameters(&mut self, params: &[f64]);

    /// Reset to the identity mapping.
    fn set_identity(&mut self);

    /// Pull `image` back through the transformation onto its grid.
    fn warp(&self, image: &ScalarField<D>) -> ScalarField<D>;

    /// Dense displacement `T(x) - x` sampled on the grid.
    fn displacement(&self) -> VectorField<D>;

    /// Chain rule from a per-voxel displacement gradient to a gradient with
    /// respect to [`Transformation::parameters`].
    fn translate_gradient(&self, voxel_gradient: &VectorField<D>) -> Vec<f64>;

    /// Advance along `velocity` by `step`.
    fn update(&mut self, step: f32, velocity: &VectorField<D>);

    /// Turn `velocity` into the velocity that advances the whole
    /// transformation when composed on the right, and return its largest
    /// norm.
    fn perturbation(&self, velocity: &mut VectorField<D>) -> f32;

    /// Smallest Jacobian determinant after a prospective
    /// [`Transformation::update`] with `step` and `velocity`.
    fn min_jacobian(&self, velocity: &VectorField<D>, step: f32) -> f32;

    /// Resample onto a finer (or coarser) grid.
    fn upscale(&self, size: GridSize<D>) -> Self
    where
        Self: Sized;

    /// Replace `self` by `self ∘ other`.
    fn compose(&mut self, other: &Self)
    where
        Self: Sized;
}
