//! Per-voxel vector values.

use nalgebra::SVector;
use std::ops::{Add, Mul};

/// A displacement, velocity or force vector of one voxel, in voxel units.
pub type FVector<const D: usize> = SVector<f32, D>;

/// A value that can be sampled from a grid by linear interpolation.
///
/// Implemented for scalar intensities (`f32`) and per-voxel vectors
/// (`FVector<D>`), so one interpolator serves images and vector fields.
pub trait Sample: Copy + Send + Sync + Add<Output = Self> + Mul<f32, Output = Self> {
    /// The additive identity.
    fn zero() -> Self;
}

impl Sample for f32 {
    fn zero() -> Self {
        0.0
    }
}

impl<const D: usize> Sample for FVector<D> {
    fn zero() -> Self {
        SVector::zeros()
    }
}

/// Determinant of a `D x D` matrix given as rows, for `D` in `{1, 2, 3}`.
///
/// Lower dimensional matrices are embedded into a 3x3 identity so one
/// closed form covers 2D and 3D.
pub fn determinant<const D: usize>(rows: &[[f32; D]; D]) -> f32 {
    assert!(D <= 3, "determinant is only defined for D <= 3");
    let mut m = [[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    for (i, row) in rows.iter().enumerate() {
        m[i][..D].copy_from_slice(row);
    }
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}
