//! Displacement field transform implementation.
//!
//! This module provides a dense displacement field transform where each
//! voxel has its own displacement vector. It is the transformation
//! integrated by the elastic and fluid registration models.

use rayon::prelude::*;

use super::trait_::Transformation;
use crate::field::{ScalarField, VectorField};
use crate::grid::GridSize;
use crate::spatial::vector::determinant;
use crate::spatial::FVector;

/// Dense displacement field transform `T(x) = x + u(x)`.
///
/// `u` is stored per voxel in voxel units and interpolated linearly between
/// voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementFieldTransform<const D: usize> {
    field: VectorField<D>,
}

impl<const D: usize> DisplacementFieldTransform<D> {
    /// Identity transform on `size`.
    pub fn identity(size: GridSize<D>) -> Self {
        Self {
            field: VectorField::new(size),
        }
    }

    /// Wrap an existing displacement field.
    pub fn from_field(field: VectorField<D>) -> Self {
        Self { field }
    }

    /// The displacement field `u`.
    pub fn field(&self) -> &VectorField<D> {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut VectorField<D> {
        &mut self.field
    }

    pub fn into_field(self) -> VectorField<D> {
        self.field
    }

    /// Largest displacement norm.
    pub fn max_displacement(&self) -> f32 {
        self.field.max_norm()
    }

    /// Determinant of `I + J_u` per voxel; border voxels report `1`.
    pub fn jacobian_determinants(&self) -> ScalarField<D> {
        let size = self.field.size();
        ScalarField::from_fn(size, |coord| {
            if !size.is_interior(coord) {
                return 1.0;
            }
            let jac = self.field.jacobian_at(size.linear_index(coord));
            determinant(&shifted_identity(&jac, None, 0.0))
        })
    }
}

/// `I + ju + step * jv`.
fn shifted_identity<const D: usize>(
    ju: &[[f32; D]; D],
    jv: Option<&[[f32; D]; D]>,
    step: f32,
) -> [[f32; D]; D] {
    let mut m = *ju;
    for i in 0..D {
        m[i][i] += 1.0;
        if let Some(jv) = jv {
            for j in 0..D {
                m[i][j] += step * jv[i][j];
            }
        }
    }
    m
}

impl<const D: usize> Transformation<D> for DisplacementFieldTransform<D> {
    fn size(&self) -> GridSize<D> {
        self.field.size()
    }

    fn transform_point(&self, point: &FVector<D>) -> FVector<D> {
        point + self.field.interpolate(point)
    }

    fn degrees_of_freedom(&self) -> usize {
        D * self.field.len()
    }

    fn parameters(&self) -> Vec<f64> {
        self.field.to_flat()
    }

    fn set_parameters(&mut self, params: &[f64]) {
        self.field.set_from_flat(params);
    }

    fn set_identity(&mut self) {
        self.field.clear();
    }

    fn warp(&self, image: &ScalarField<D>) -> ScalarField<D> {
        let size = self.field.size();
        ScalarField::from_fn(size, |coord| {
            let mut p = self.field[size.linear_index(coord)];
            for axis in 0..D {
                p[axis] += coord[axis] as f32;
            }
            image.interpolate(&p)
        })
    }

    fn displacement(&self) -> VectorField<D> {
        self.field.clone()
    }

    fn translate_gradient(&self, voxel_gradient: &VectorField<D>) -> Vec<f64> {
        voxel_gradient.to_flat()
    }

    fn update(&mut self, step: f32, velocity: &VectorField<D>) {
        self.field.add_scaled(velocity, step);
    }

    fn perturbation(&self, velocity: &mut VectorField<D>) -> f32 {
        self.field.perturb(velocity)
    }

    fn min_jacobian(&self, velocity: &VectorField<D>, step: f32) -> f32 {
        let size = self.field.size();
        if !size.has_interior() {
            return 1.0;
        }
        (0..size.len())
            .into_par_iter()
            .filter(|&index| size.is_interior(size.coord(index)))
            .map(|index| {
                let ju = self.field.jacobian_at(index);
                let jv = velocity.jacobian_at(index);
                determinant(&shifted_identity(&ju, Some(&jv), step))
            })
            .reduce(|| f32::INFINITY, f32::min)
    }

    fn upscale(&self, size: GridSize<D>) -> Self {
        Self {
            field: self.field.upscaled(size),
        }
    }

    fn compose(&mut self, other: &Self) {
        let size = other.field.size();
        let composed = VectorField::from_fn(size, |coord| {
            let inner = other.field[size.linear_index(coord)];
            let mut p = inner;
            for axis in 0..D {
                p[axis] += coord[axis] as f32;
            }
            inner + self.field.interpolate(&p)
        });
        self.field = composed;
    }
}
