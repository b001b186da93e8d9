//! Host-side scalar images.

use rayon::prelude::*;
use std::ops::Index;

use super::VectorField;
use crate::grid::GridSize;
use crate::interpolation::{Interpolator, LinearInterpolator};
use crate::spatial::FVector;

/// One `f32` intensity per voxel, x-fastest.
///
/// Cost terms work on scalar fields pulled from the burn-backed
/// [`Image`](crate::image::Image) once per pyramid level.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField<const D: usize> {
    size: GridSize<D>,
    data: Vec<f32>,
}

impl<const D: usize> ScalarField<D> {
    /// Create a zero image.
    pub fn new(size: GridSize<D>) -> Self {
        Self {
            size,
            data: vec![0.0; size.len()],
        }
    }

    /// Wrap an x-fastest buffer.
    ///
    /// # Panics
    /// If `data.len()` differs from `size.len()`.
    pub fn from_vec(size: GridSize<D>, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), size.len(), "scalar field buffer does not match grid size {size}");
        Self { size, data }
    }

    /// Build an image by evaluating `f` at every grid coordinate.
    pub fn from_fn<F>(size: GridSize<D>, f: F) -> Self
    where
        F: Fn([usize; D]) -> f32 + Sync,
    {
        let data = (0..size.len()).into_par_iter().map(|i| f(size.coord(i))).collect();
        Self { size, data }
    }

    pub fn size(&self) -> GridSize<D> {
        self.size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, coord: [usize; D]) -> f32 {
        self.data[self.size.linear_index(coord)]
    }

    /// Linearly interpolated intensity at a continuous voxel coordinate.
    pub fn interpolate(&self, point: &FVector<D>) -> f32 {
        LinearInterpolator.sample(&self.size, &self.data, point)
    }

    /// Mean intensity.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        (self.data.par_iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64) as f32
    }

    /// Intensity range `(min, max)`.
    pub fn range(&self) -> (f32, f32) {
        self.data
            .par_iter()
            .map(|&v| (v, v))
            .reduce(|| (f32::INFINITY, f32::NEG_INFINITY), |a, b| (a.0.min(b.0), a.1.max(b.1)))
    }

    /// Intensity gradient by central differences, one-sided at the border.
    pub fn gradient(&self) -> VectorField<D> {
        let size = self.size;
        let dims = size.dims();
        let strides = size.strides();
        VectorField::from_fn(size, |coord| {
            let index = size.linear_index(coord);
            let mut g = FVector::zeros();
            for axis in 0..D {
                let n = dims[axis];
                if n < 2 {
                    continue;
                }
                let c = coord[axis];
                let s = strides[axis];
                g[axis] = if c == 0 {
                    self.data[index + s] - self.data[index]
                } else if c + 1 == n {
                    self.data[index] - self.data[index - s]
                } else {
                    0.5 * (self.data[index + s] - self.data[index - s])
                };
            }
            g
        })
    }

    /// Resample onto another grid by linear interpolation.
    ///
    /// Voxel `x` of the new grid reads this image at `x / ratio` with
    /// `ratio = new / old` per axis.
    pub fn resampled(&self, size: GridSize<D>) -> Self {
        if size == self.size {
            return self.clone();
        }
        let ratio = size.ratio_to(&self.size);
        Self::from_fn(size, |coord| {
            let mut p = FVector::zeros();
            for axis in 0..D {
                p[axis] = coord[axis] as f32 / ratio[axis];
            }
            self.interpolate(&p)
        })
    }
}

impl<const D: usize> Index<usize> for ScalarField<D> {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_of_ramp() {
        let size = GridSize::new([5, 4]);
        let ramp = ScalarField::from_fn(size, |[x, y]| 2.0 * x as f32 + y as f32);
        let g = ramp.gradient();
        for i in 0..size.len() {
            assert!((g[i] - FVector::<2>::new(2.0, 1.0)).norm() < 1e-6);
        }
    }

    #[test]
    fn test_mean_and_range() {
        let img = ScalarField::from_vec(GridSize::new([2, 2]), vec![1.0, 2.0, 3.0, 6.0]);
        assert!((img.mean() - 3.0).abs() < 1e-6);
        assert_eq!(img.range(), (1.0, 6.0));
    }

    #[test]
    fn test_resampled_halves_grid() {
        let size = GridSize::new([8, 8]);
        let ramp = ScalarField::from_fn(size, |[x, _]| x as f32);
        let coarse = ramp.resampled(size.downscaled(2));
        assert_eq!(coarse.size(), GridSize::new([4, 4]));
        assert!((coarse.get([3, 1]) - 6.0).abs() < 1e-6);
    }
}
