//! Discrete grid geometry.
//!
//! A [`GridSize`] describes the extent of a 2D or 3D voxel grid along the
//! axes `[x, y, (z)]`. Buffers laid out on a grid are x-fastest: the linear
//! index of `(x, y, z)` is `x + nx * (y + ny * z)`. Burn tensors holding the
//! same data keep the reversed shape `[.., ny, nx]`.

use std::fmt;

/// Extent of a voxel grid along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize<const D: usize> {
    dims: [usize; D],
}

impl<const D: usize> GridSize<D> {
    /// Create a grid size from per-axis extents `[nx, ny, (nz)]`.
    pub fn new(dims: [usize; D]) -> Self {
        Self { dims }
    }

    /// Grid size of a tensor with shape `[.., ny, nx]`.
    pub fn from_tensor_shape(shape: [usize; D]) -> Self {
        let mut dims = shape;
        dims.reverse();
        Self { dims }
    }

    /// Tensor shape `[.., ny, nx]` of a buffer laid out on this grid.
    pub fn tensor_shape(&self) -> [usize; D] {
        let mut shape = self.dims;
        shape.reverse();
        shape
    }

    /// Per-axis extents.
    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    /// Extent along `axis`.
    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Whether the grid contains no voxel.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of one x-row.
    pub fn row_len(&self) -> usize {
        self.dims[0]
    }

    /// Smallest extent over all axes.
    pub fn min_extent(&self) -> usize {
        self.dims.iter().copied().min().unwrap_or(0)
    }

    /// Linear index offsets of a unit step along each axis.
    pub fn strides(&self) -> [usize; D] {
        let mut strides = [1usize; D];
        for axis in 1..D {
            strides[axis] = strides[axis - 1] * self.dims[axis - 1];
        }
        strides
    }

    /// Linear index of a grid coordinate.
    pub fn linear_index(&self, coord: [usize; D]) -> usize {
        let strides = self.strides();
        coord.iter().zip(strides.iter()).map(|(c, s)| c * s).sum()
    }

    /// Grid coordinate of a linear index.
    pub fn coord(&self, mut index: usize) -> [usize; D] {
        let mut coord = [0usize; D];
        for axis in 0..D {
            coord[axis] = index % self.dims[axis];
            index /= self.dims[axis];
        }
        coord
    }

    /// Whether a coordinate has both neighbours along every axis.
    pub fn is_interior(&self, coord: [usize; D]) -> bool {
        coord
            .iter()
            .zip(self.dims.iter())
            .all(|(&c, &n)| c >= 1 && c + 1 < n)
    }

    /// Whether the grid has at least one interior voxel.
    pub fn has_interior(&self) -> bool {
        self.dims.iter().all(|&n| n >= 3)
    }

    /// Grid obtained by keeping every `factor`-th voxel along each axis.
    ///
    /// Extents are rounded up and never drop below one voxel.
    pub fn downscaled(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        let mut dims = self.dims;
        for n in dims.iter_mut() {
            *n = ((*n + factor - 1) / factor).max(1);
        }
        Self { dims }
    }

    /// Per-axis ratio `self / other` of the extents.
    pub fn ratio_to(&self, other: &Self) -> [f32; D] {
        let mut ratio = [1.0f32; D];
        for axis in 0..D {
            ratio[axis] = self.dims[axis] as f32 / other.dims[axis].max(1) as f32;
        }
        ratio
    }

    /// Extents as a vector, for error reporting.
    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.to_vec()
    }
}

impl<const D: usize> fmt::Display for GridSize<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.dims.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", parts.join("x"))
    }
}

impl<const D: usize> From<[usize; D]> for GridSize<D> {
    fn from(dims: [usize; D]) -> Self {
        Self::new(dims)
    }
}
