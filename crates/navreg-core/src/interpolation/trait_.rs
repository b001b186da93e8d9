//! Interpolator trait for sampling grid buffers at continuous coordinates.

use crate::grid::GridSize;
use crate::spatial::{FVector, Sample};

/// Interpolator trait for sampling values at continuous coordinates.
///
/// Coordinates are continuous voxel indices in grid axis order `[x, y, (z)]`.
/// Points outside the grid are clamped to the border.
pub trait Interpolator: Send + Sync {
    /// Sample `data` laid out on `size` at `point`.
    ///
    /// # Arguments
    /// * `size` - Grid the buffer is laid out on
    /// * `data` - x-fastest buffer of `size.len()` values
    /// * `point` - Continuous voxel coordinate
    fn sample<T: Sample, const D: usize>(
        &self,
        size: &GridSize<D>,
        data: &[T],
        point: &FVector<D>,
    ) -> T;
}
