//! Physical distance between adjacent voxels.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Spacing between adjacent pixels/voxels along each grid axis.
///
/// Components follow the grid axis order `[x, y, (z)]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spacing<const D: usize>(pub SVector<f64, D>);

impl<const D: usize> Spacing<D> {
    /// Create a spacing from per-axis components.
    pub fn new(components: [f64; D]) -> Self {
        Self(SVector::from(components))
    }

    /// Create uniform spacing (same value for all dimensions).
    pub fn uniform(value: f64) -> Self {
        Self(SVector::from_element(value))
    }

    /// Check if spacing is uniform (all components equal).
    pub fn is_uniform(&self) -> bool {
        (1..D).all(|i| (self.0[i] - self.0[0]).abs() < 1e-9)
    }

    /// Get the minimum spacing value.
    pub fn min_spacing(&self) -> f64 {
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Get the maximum spacing value.
    pub fn max_spacing(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Spacing of a grid resampled by the given per-axis factors.
    pub fn scaled(&self, factors: [f64; D]) -> Self {
        let mut out = *self;
        for (i, f) in factors.iter().enumerate() {
            out.0[i] *= f;
        }
        out
    }
}

impl<const D: usize> Default for Spacing<D> {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl<const D: usize> Index<usize> for Spacing<D> {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}
