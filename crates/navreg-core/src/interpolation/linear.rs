//! Linear interpolation implementation.

use super::trait_::Interpolator;
use crate::grid::GridSize;
use crate::spatial::{FVector, Sample};

/// D-linear interpolator with border clamping.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    /// Create a new linear interpolator.
    pub fn new() -> Self {
        Self
    }
}

impl Interpolator for LinearInterpolator {
    fn sample<T: Sample, const D: usize>(
        &self,
        size: &GridSize<D>,
        data: &[T],
        point: &FVector<D>,
    ) -> T {
        let dims = size.dims();
        let strides = size.strides();

        // Lower corner offset and fractional weight per axis.
        let mut base = 0usize;
        let mut frac = [0.0f32; D];
        let mut step = [0usize; D];
        for axis in 0..D {
            let n = dims[axis];
            let p = point[axis].clamp(0.0, (n - 1) as f32);
            let i0 = (p.floor() as usize).min(n.saturating_sub(2));
            frac[axis] = p - i0 as f32;
            step[axis] = if n > 1 { strides[axis] } else { 0 };
            base += i0 * strides[axis];
        }

        let mut acc = T::zero();
        for corner in 0..(1usize << D) {
            let mut weight = 1.0f32;
            let mut offset = base;
            for axis in 0..D {
                if corner & (1 << axis) != 0 {
                    weight *= frac[axis];
                    offset += step[axis];
                } else {
                    weight *= 1.0 - frac[axis];
                }
            }
            if weight != 0.0 {
                acc = acc + data[offset] * weight;
            }
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_2d_midpoint() {
        let size = GridSize::new([2, 2]);
        let data = vec![0.0f32, 1.0, 2.0, 3.0];
        let v = LinearInterpolator::new().sample(&size, &data, &FVector::<2>::new(0.5, 0.5));
        assert!((v - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_linear_reproduces_linear_function() {
        let size = GridSize::new([5, 4, 3]);
        let data: Vec<f32> = (0..size.len())
            .map(|i| {
                let [x, y, z] = size.coord(i);
                2.0 * x as f32 - y as f32 + 0.5 * z as f32
            })
            .collect();
        let p = FVector::<3>::new(1.25, 2.5, 0.75);
        let v = LinearInterpolator::new().sample(&size, &data, &p);
        assert!((v - (2.5 - 2.5 + 0.375)).abs() < 1e-5);
    }

    #[test]
    fn test_linear_clamps_outside() {
        let size = GridSize::new([3, 1]);
        let data = vec![1.0f32, 2.0, 4.0];
        let interp = LinearInterpolator::new();
        assert_eq!(interp.sample(&size, &data, &FVector::<2>::new(-3.0, 0.0)), 1.0);
        assert_eq!(interp.sample(&size, &data, &FVector::<2>::new(9.0, 0.0)), 4.0);
    }

    #[test]
    fn test_linear_vector_values() {
        let size = GridSize::new([2, 1]);
        let data = vec![FVector::<2>::new(0.0, 2.0), FVector::<2>::new(2.0, 0.0)];
        let v = LinearInterpolator::new().sample(&size, &data, &FVector::<2>::new(0.25, 0.0));
        assert!((v - FVector::<2>::new(0.5, 1.5)).norm() < 1e-6);
    }
}
