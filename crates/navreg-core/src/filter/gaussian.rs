//! Separable Gaussian smoothing on burn tensors.

use burn::tensor::backend::Backend;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Shape, Tensor};
use std::marker::PhantomData;

use crate::image::Image;
use crate::spatial::Spacing;

/// Gaussian smoothing filter.
///
/// Applies separable 1D convolutions along each grid axis. Sigmas are given
/// in physical units and converted to voxels with the image spacing. The
/// borders are zero padded.
pub struct GaussianFilter<B: Backend> {
    sigmas: Vec<f64>,
    max_radius: usize,
    _b: PhantomData<B>,
}

impl<B: Backend> GaussianFilter<B> {
    /// Create a new filter.
    ///
    /// # Arguments
    /// * `sigmas` - Standard deviation per grid axis `[x, y, (z)]`. A single
    ///   value is used for every axis.
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            sigmas,
            max_radius: 16,
            _b: PhantomData,
        }
    }

    /// Limit the kernel radius in voxels.
    pub fn with_max_radius(mut self, radius: usize) -> Self {
        self.max_radius = radius.max(1);
        self
    }

    /// Apply the filter to an image.
    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        let data = self.apply_tensor(image.data().clone(), image.spacing());
        Image::new(data, *image.spacing())
    }

    /// Apply the filter to a tensor of shape `[.., ny, nx]`.
    pub fn apply_tensor<const D: usize>(
        &self,
        input: Tensor<B, D>,
        spacing: &Spacing<D>,
    ) -> Tensor<B, D> {
        let device = input.device();
        let mut data = input;

        for axis in 0..D {
            let sigma =
                self.sigmas.get(axis).or_else(|| self.sigmas.first()).copied().unwrap_or(0.0);
            if sigma <= 1e-6 {
                continue;
            }
            let voxel_sigma = sigma / spacing[axis];
            let radius = ((3.0 * voxel_sigma).ceil() as usize).clamp(1, self.max_radius);
            let kernel = gaussian_kernel(voxel_sigma, radius);
            let kernel = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);

            // Grid axis 0 (x) is the last tensor dimension.
            data = convolve_along::<B, D>(data, kernel, D - 1 - axis);
        }
        data
    }
}

/// Normalised sampled Gaussian of `2 * radius + 1` taps.
fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f32> {
    let two_sigma2 = 2.0 * sigma * sigma;
    let taps: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|v| (v / sum) as f32).collect()
}

fn convolve_along<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    kernel: Tensor<B, 1>,
    dim: usize,
) -> Tensor<B, D> {
    let dims: [usize; D] = input.shape().dims();

    // Move `dim` last and fold the others into the batch.
    let mut order = [0isize; D];
    let mut permuted_shape = [0usize; D];
    let mut k = 0;
    for i in (0..D).filter(|&i| i != dim) {
        order[k] = i as isize;
        permuted_shape[k] = dims[i];
        k += 1;
    }
    order[D - 1] = dim as isize;
    permuted_shape[D - 1] = dims[dim];

    let length = dims[dim];
    let batch = dims.iter().product::<usize>() / length.max(1);
    let taps = kernel.dims()[0];

    let signal = input.permute(order).reshape([batch, 1, length]);
    let weight = kernel.reshape([1, 1, taps]);
    let options = ConvOptions::new([1], [taps / 2], [1], 1);
    let filtered = burn::tensor::module::conv1d(signal, weight, None, options);

    let mut inverse = [0isize; D];
    for (pos, &src) in order.iter().enumerate() {
        inverse[src as usize] = pos as isize;
    }
    filtered.reshape(Shape::new(permuted_shape)).permute(inverse)
}
