//! Dense per-voxel vector fields.
//!
//! Forces, velocities and displacements of the registration all live on a
//! [`VectorField`]: one `f32` vector per voxel in voxel units, x-fastest.

use rayon::prelude::*;
use std::ops::{Index, IndexMut};

use crate::grid::GridSize;
use crate::interpolation::{Interpolator, LinearInterpolator};
use crate::spatial::FVector;

/// A vector per voxel of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField<const D: usize> {
    size: GridSize<D>,
    data: Vec<FVector<D>>,
}

impl<const D: usize> VectorField<D> {
    /// Create a zero field.
    pub fn new(size: GridSize<D>) -> Self {
        Self {
            size,
            data: vec![FVector::zeros(); size.len()],
        }
    }

    /// Wrap an x-fastest buffer.
    ///
    /// # Panics
    /// If `data.len()` differs from `size.len()`.
    pub fn from_vec(size: GridSize<D>, data: Vec<FVector<D>>) -> Self {
        assert_eq!(data.len(), size.len(), "vector field buffer does not match grid size {size}");
        Self { size, data }
    }

    /// Build a field by evaluating `f` at every grid coordinate.
    pub fn from_fn<F>(size: GridSize<D>, f: F) -> Self
    where
        F: Fn([usize; D]) -> FVector<D> + Sync,
    {
        let data = (0..size.len()).into_par_iter().map(|i| f(size.coord(i))).collect();
        Self { size, data }
    }

    pub fn size(&self) -> GridSize<D> {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[FVector<D>] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [FVector<D>] {
        &mut self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FVector<D>> {
        self.data.iter()
    }

    /// Value at a grid coordinate.
    pub fn get(&self, coord: [usize; D]) -> FVector<D> {
        self.data[self.size.linear_index(coord)]
    }

    /// Set the value at a grid coordinate.
    pub fn set(&mut self, coord: [usize; D], value: FVector<D>) {
        let index = self.size.linear_index(coord);
        self.data[index] = value;
    }

    /// Reset every vector to zero.
    pub fn clear(&mut self) {
        self.data.par_iter_mut().for_each(|v| *v = FVector::zeros());
    }

    /// Largest vector norm over the field.
    pub fn max_norm(&self) -> f32 {
        self.data
            .par_iter()
            .map(|v| v.norm_squared())
            .reduce(|| 0.0, f32::max)
            .sqrt()
    }

    /// Multiply every vector by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.data.par_iter_mut().for_each(|v| *v *= factor);
    }

    /// `self += factor * other`.
    ///
    /// # Panics
    /// If the grid sizes differ.
    pub fn add_scaled(&mut self, other: &Self, factor: f32) {
        assert_eq!(self.size, other.size, "vector field sizes differ");
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a += b * factor);
    }

    /// Sum of component-wise products.
    pub fn dot(&self, other: &Self) -> f64 {
        assert_eq!(self.size, other.size, "vector field sizes differ");
        self.data
            .par_iter()
            .zip(other.data.par_iter())
            .map(|(a, b)| a.dot(b) as f64)
            .sum()
    }

    /// Linearly interpolated value at a continuous voxel coordinate.
    pub fn interpolate(&self, point: &FVector<D>) -> FVector<D> {
        LinearInterpolator.sample(&self.size, &self.data, point)
    }

    /// Resample this field onto a finer grid.
    ///
    /// A fine voxel `x` reads the coarse field at `x / ratio` and the vector
    /// is multiplied by `ratio` along each axis, so displacements stay
    /// expressed in voxels of the new grid.
    pub fn upscaled(&self, size: GridSize<D>) -> Self {
        let ratio = size.ratio_to(&self.size);
        Self::from_fn(size, |coord| {
            let mut p = FVector::zeros();
            for axis in 0..D {
                p[axis] = coord[axis] as f32 / ratio[axis];
            }
            let mut v = self.interpolate(&p);
            for axis in 0..D {
                v[axis] *= ratio[axis];
            }
            v
        })
    }

    /// Central-difference Jacobian `J[i][j] = d v_i / d x_j` at an interior voxel.
    pub fn jacobian_at(&self, index: usize) -> [[f32; D]; D] {
        let strides = self.size.strides();
        let mut jac = [[0.0f32; D]; D];
        for (j, &s) in strides.iter().enumerate() {
            let diff = self.data[index + s] - self.data[index - s];
            for (i, row) in jac.iter_mut().enumerate() {
                row[j] = 0.5 * diff[i];
            }
        }
        jac
    }

    /// Replace `velocity` by `velocity + J_self velocity`.
    ///
    /// With `self` the displacement `u` of `T(x) = x + u(x)`, the result is
    /// the velocity of `T ∘ (id + δ velocity)` to first order in `δ`.
    /// Boundary voxels are zeroed. Returns the largest resulting norm.
    pub fn perturb(&self, velocity: &mut Self) -> f32 {
        assert_eq!(self.size, velocity.size, "vector field sizes differ");
        let size = self.size;
        let max2 = velocity
            .data
            .par_iter_mut()
            .enumerate()
            .map(|(index, v)| {
                if !size.is_interior(size.coord(index)) {
                    *v = FVector::zeros();
                    return 0.0;
                }
                let jac = self.jacobian_at(index);
                let mut dv = FVector::<D>::zeros();
                for (i, row) in jac.iter().enumerate() {
                    dv[i] = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
                }
                *v += dv;
                v.norm_squared()
            })
            .reduce(|| 0.0, f32::max);
        max2.sqrt()
    }

    /// Flatten into `[v0.x, v0.y, (v0.z), v1.x, ...]`.
    pub fn to_flat(&self) -> Vec<f64> {
        self.data
            .iter()
            .flat_map(|v| v.iter().map(|&c| c as f64))
            .collect()
    }

    /// Overwrite from a flat buffer produced by [`VectorField::to_flat`].
    ///
    /// # Panics
    /// If `flat.len()` differs from `D * self.len()`.
    pub fn set_from_flat(&mut self, flat: &[f64]) {
        assert_eq!(flat.len(), D * self.data.len(), "flat buffer does not match vector field");
        for (v, chunk) in self.data.iter_mut().zip(flat.chunks_exact(D)) {
            for axis in 0..D {
                v[axis] = chunk[axis] as f32;
            }
        }
    }
}

impl<const D: usize> Index<usize> for VectorField<D> {
    type Output = FVector<D>;

    fn index(&self, index: usize) -> &FVector<D> {
        &self.data[index]
    }
}

impl<const D: usize> IndexMut<usize> for VectorField<D> {
    fn index_mut(&mut self, index: usize) -> &mut FVector<D> {
        &mut self.data[index]
    }
}
