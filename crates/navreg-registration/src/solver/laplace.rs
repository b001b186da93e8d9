//! Componentwise Laplace (membrane) relaxation kernel.

use navreg_core::spatial::FVector;
use navreg_core::GridSize;

use super::kernel::RelaxationKernel;

/// Relaxes `mu Δv + b = 0` independently per component.
///
/// The fixed point is `v = b / (2·D·mu) + mean of the 2·D axis neighbours`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceKernel<const D: usize> {
    mu: f32,
    size: Option<GridSize<D>>,
    strides: [usize; D],
}

impl<const D: usize> LaplaceKernel<D> {
    pub fn new(mu: f32) -> Self {
        Self {
            mu,
            size: None,
            strides: [0; D],
        }
    }

    pub fn mu(&self) -> f32 {
        self.mu
    }
}

impl<const D: usize> RelaxationKernel<D> for LaplaceKernel<D> {
    fn name(&self) -> &'static str {
        "laplace"
    }

    fn prepare(&mut self, size: GridSize<D>) {
        self.size = Some(size);
        self.strides = size.strides();
    }

    fn prepared_size(&self) -> Option<GridSize<D>> {
        self.size
    }

    fn force_scale(&self) -> f32 {
        1.0 / (2.0 * D as f32 * self.mu)
    }

    fn relax_at(&self, v: &[FVector<D>], scaled_force: &FVector<D>, index: usize) -> FVector<D> {
        let mut sum = FVector::<D>::zeros();
        for &s in &self.strides {
            sum += v[index + s] + v[index - s];
        }
        scaled_force + sum / (2.0 * D as f32)
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
    fn test_harmonic_field_is_fixed_point() {
        let size = GridSize::new([5, 5, 5]);
        let v = VectorField::from_fn(size, |[x, y, z]| {
            FVector::<3>::new(x as f32, y as f32 - z as f32, 2.0)
        });
        let mut k = LaplaceKernel::<3>::new(1.0);
        k.prepare(size);
        let index = size.linear_index([2, 3, 1]);
        let target = k.relax_at(v.as_slice(), &FVector::zeros(), index);
        assert!((target - v[index]).norm() < 1e-6);
    }

    #[test]
    fn test_force_scale() {
        assert!((LaplaceKernel::<2>::new(2.0).force_scale() - 0.125).abs() < 1e-7);
    }
}
