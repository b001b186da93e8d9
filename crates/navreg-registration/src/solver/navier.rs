//! Navier-Cauchy (linear elasticity) relaxation kernel.
//!
//! Discretises `mu Δv + (mu + lambda) ∇(∇·v) + b = 0` with central
//! differences. With `a = mu`, `b = mu + lambda` and
//! `c = 1 / (2·D·a + 2·b)` the fixed point for component `i` reads
//!
//! ```text
//! v_i = c·b_i
//!     + (a + b)·c · (v_i[+e_i] + v_i[-e_i])
//!     + a·c       · Σ_{j≠i} (v_i[+e_j] + v_i[-e_j])
//!     + b·c/4     · Σ_{j≠i} (v_j[+e_i+e_j] + v_j[-e_i-e_j] - v_j[+e_i-e_j] - v_j[-e_i+e_j])
//! ```

use navreg_core::spatial::FVector;
use navreg_core::GridSize;

use super::kernel::RelaxationKernel;

/// Navier-Cauchy stencil with precomputed coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavierKernel<const D: usize> {
    mu: f32,
    lambda: f32,
    /// Diagonal normalisation `c`.
    scale: f32,
    /// `(a + b)·c`
    along: f32,
    /// `a·c`
    across: f32,
    /// `b·c / 4`
    mixed: f32,
    size: Option<GridSize<D>>,
    strides: [usize; D],
}

impl<const D: usize> NavierKernel<D> {
    /// Create a kernel for the Lamé parameters `mu` (shear) and `lambda`.
    pub fn new(mu: f32, lambda: f32) -> Self {
        let a = mu;
        let b = lambda + mu;
        let scale = 1.0 / (2.0 * D as f32 * a + 2.0 * b);
        Self {
            mu,
            lambda,
            scale,
            along: (a + b) * scale,
            across: a * scale,
            mixed: 0.25 * b * scale,
            size: None,
            strides: [0; D],
        }
    }

    pub fn mu(&self) -> f32 {
        self.mu
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }
}

impl<const D: usize> RelaxationKernel<D> for NavierKernel<D> {
    fn name(&self) -> &'static str {
        "navier"
    }

    fn prepare(&mut self, size: GridSize<D>) {
        self.size = Some(size);
        self.strides = size.strides();
    }

    fn prepared_size(&self) -> Option<GridSize<D>> {
        self.size
    }

    fn force_scale(&self) -> f32 {
        self.scale
    }

    fn relax_at(&self, v: &[FVector<D>], scaled_force: &FVector<D>, index: usize) -> FVector<D> {
        let mut target = *scaled_force;
        for i in 0..D {
            let si = self.strides[i];
            target[i] += self.along * (v[index + si][i] + v[index - si][i]);
            for j in (0..D).filter(|&j| j != i) {
                let sj = self.strides[j];
                target[i] += self.across * (v[index + sj][i] + v[index - sj][i]);
                let cross = v[index + si + sj][j] + v[index - si - sj][j]
                    - v[index + si - sj][j]
                    - v[index + sj - si][j];
                target[i] += self.mixed * cross;
            }
        }
        target
    }

    fn boxed_clone(&self) -> Box<dyn RelaxationKernel<D>> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navreg_core::VectorField;

    #[test]
    fn test_coefficients() {
        let k = NavierKernel::<3>::new(1.0, 2.0);
        assert!((k.force_scale() - 1.0 / 12.0).abs() < 1e-7);
        let k = NavierKernel::<2>::new(1.0, 2.0);
        assert!((k.force_scale() - 0.1).abs() < 1e-7);
    }

    #[test]
    fn test_relax_3d_polynomial_field() {
        // v = (x y, 2 z y, 3 x z) on a 3x3x3 grid, evaluated at the centre.
        let size = GridSize::new([3, 3, 3]);
        let v = VectorField::from_fn(size, |[x, y, z]| {
            let (x, y, z) = (x as f32, y as f32, z as f32);
            FVector::<3>::new(x * y, 2.0 * z * y, 3.0 * x * z)
        });
        let mut k = NavierKernel::<3>::new(1.0, 2.0);
        k.prepare(size);

        let centre = size.linear_index([1, 1, 1]);
        let b = FVector::<3>::new(1.0, 2.0, 3.0);
        let target = k.relax_at(v.as_slice(), &b, centre);
        // p = (2, 4, 6) from the second derivatives, q = (0.75, 0.25, 0.5)
        // from the mixed ones.
        assert!((target - FVector::<3>::new(2.75, 4.25, 6.5)).norm() < 1e-5);
    }

    #[test]
    fn test_relax_2d_mixed_derivative_only() {
        let size = GridSize::new([3, 3]);
        let mut v = VectorField::<2>::new(size);
        v.set([0, 0], FVector::<2>::new(2.0, 3.0));
        v.set([2, 2], FVector::<2>::new(3.0, 2.0));
        let mut k = NavierKernel::<2>::new(1.0, 2.0);
        k.prepare(size);

        let force = FVector::<2>::new(1.0, 2.0);
        let target = k.relax_at(v.as_slice(), &force, size.linear_index([1, 1]));
        // Only the diagonal corners are set:
        // b·c/4 = 0.075 times (3 + 2) and (2 + 3).
        assert!((target - FVector::<2>::new(1.375, 2.375)).norm() < 1e-6);
    }
}
