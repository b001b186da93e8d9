//! Image type with voxel spacing.
//!
//! This module provides the Image struct which holds intensity data as a
//! burn tensor together with the physical spacing of its voxels.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};

use crate::field::ScalarField;
use crate::grid::GridSize;
use crate::spatial::Spacing;

/// Intensity image with voxel spacing.
///
/// # Type Parameters
/// * `B` - The backend (CPU or GPU) for tensor operations
/// * `D` - The dimensionality of the image (2 or 3)
///
/// # Layout
/// The tensor shape is `[.., ny, nx]` (x fastest); [`Image::grid_size`]
/// reports the same extents in grid axis order `[nx, ny, ..]`. Spacing
/// components follow the grid axis order.
///
/// # Examples
/// ```rust
/// use navreg_core::Image;
/// use navreg_core::spatial::Spacing;
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 2>::zeros([16, 32], &device);
/// let image = Image::new(data, Spacing::uniform(1.0));
/// assert_eq!(image.grid_size().dims(), [32, 16]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    /// The voxel data, potentially on GPU.
    data: Tensor<B, D>,
    /// Physical distance between voxels along each grid axis.
    spacing: Spacing<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and spacing.
    pub fn new(data: Tensor<B, D>, spacing: Spacing<D>) -> Self {
        Self { data, spacing }
    }

    /// Upload a host image onto `device`.
    pub fn from_field(field: &ScalarField<D>, spacing: Spacing<D>, device: &B::Device) -> Self {
        let size = field.size();
        let data = Tensor::<B, 1>::from_data(
            TensorData::new(field.as_slice().to_vec(), Shape::new([size.len()])),
            device,
        )
        .reshape(Shape::new(size.tensor_shape()));
        Self { data, spacing }
    }

    /// Get the image data tensor.
    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    /// Get the spacing.
    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    /// Get the tensor shape `[.., ny, nx]`.
    pub fn shape(&self) -> [usize; D] {
        self.data.shape().dims.try_into().expect("Tensor rank mismatch")
    }

    /// Extents in grid axis order.
    pub fn grid_size(&self) -> GridSize<D> {
        GridSize::from_tensor_shape(self.shape())
    }

    /// Download the intensities into a host-side scalar field.
    pub fn to_field(&self) -> ScalarField<D> {
        let values: Vec<f32> = self.data.to_data().iter::<f32>().collect();
        ScalarField::from_vec(self.grid_size(), values)
    }
}
