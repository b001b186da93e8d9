//! Anti-aliased rescaling to an arbitrary grid size.

use burn::tensor::backend::Backend;
use std::marker::PhantomData;

use super::gaussian::GaussianFilter;
use crate::field::ScalarField;
use crate::grid::GridSize;
use crate::image::Image;

/// Rescale an image to a target grid.
///
/// When an axis shrinks by a factor `f > 1` the image is first smoothed with
/// `sigma = 0.5 * f` voxels along that axis, then linearly resampled.
pub struct ScaleFilter<B: Backend> {
    _b: PhantomData<B>,
}

impl<B: Backend> Default for ScaleFilter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ScaleFilter<B> {
    pub fn new() -> Self {
        Self { _b: PhantomData }
    }

    /// Smoothing sigmas (physical units, grid axis order) for shrinking
    /// `from` to `to`.
    pub fn sigmas<const D: usize>(image: &Image<B, D>, to: GridSize<D>) -> Vec<f64> {
        let ratio = image.grid_size().ratio_to(&to);
        (0..D)
            .map(|axis| {
                let factor = ratio[axis] as f64;
                if factor > 1.0 {
                    0.5 * factor * image.spacing()[axis]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Rescale `image` to `size` and download it to the host.
    pub fn apply<const D: usize>(&self, image: &Image<B, D>, size: GridSize<D>) -> ScalarField<D> {
        if image.grid_size() == size {
            return image.to_field();
        }
        let sigmas = Self::sigmas(image, size);
        let smoothed = if sigmas.iter().any(|&s| s > 0.0) {
            GaussianFilter::new(sigmas).apply(image)
        } else {
            image.clone()
        };
        smoothed.to_field().resampled(size)
    }
}
