//! Validation utilities for registration parameters and inputs.
//!
//! Every configuration struct funnels its `validate()` through these
//! helpers so that the error messages stay uniform.

use burn::tensor::backend::Backend;
use navreg_core::{GridSize, Image};

use crate::error::{RegistrationError, Result};

/// Validate that two images live on the same grid.
pub fn validate_image_shapes<B: Backend, const D: usize>(
    reference: &Image<B, D>,
    source: &Image<B, D>,
) -> Result<()> {
    validate_same_size(reference.grid_size(), source.grid_size())
}

/// Validate that two grids agree.
pub fn validate_same_size<const D: usize>(
    expected: GridSize<D>,
    actual: GridSize<D>,
) -> Result<()> {
    if expected != actual {
        return Err(RegistrationError::size_mismatch(expected, actual));
    }
    Ok(())
}

/// Validate iteration count.
pub fn validate_iterations(name: &str, iterations: usize, min: usize, max: usize) -> Result<()> {
    if iterations < min || iterations > max {
        return Err(RegistrationError::invalid_configuration(format!(
            "{name} must be in [{min}, {max}], got {iterations}"
        )));
    }
    Ok(())
}

/// Validate a floating point parameter against a closed range.
pub fn validate_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(RegistrationError::invalid_configuration(format!(
            "{name} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

/// Validate a strictly positive parameter.
pub fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "{name} must be positive, got {value}"
        )));
    }
    Ok(())
}

/// Validate Lamé parameters of the Navier-Cauchy operator.
///
/// The operator stays elliptic for `mu > 0` and `lambda + mu > 0`.
pub fn validate_lame(mu: f64, lambda: f64) -> Result<()> {
    validate_positive("mu", mu)?;
    if !lambda.is_finite() || lambda + mu <= 0.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "lambda + mu must be positive, got lambda = {lambda}, mu = {mu}"
        )));
    }
    Ok(())
}

/// Validate step length bounds `0 < min <= max`.
pub fn validate_step_bounds(min: f64, max: f64) -> Result<()> {
    validate_positive("minimum step", min)?;
    validate_positive("maximum step", max)?;
    if min > max {
        return Err(RegistrationError::invalid_configuration(format!(
            "minimum step ({min}) must not exceed maximum step ({max})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use navreg_core::Spacing;

    type B = NdArray<f32>;

    #[test]
    fn test_validate_image_shapes() {
        let device = Default::default();
        let a = Image::new(Tensor::<B, 2>::zeros([8, 8], &device), Spacing::uniform(1.0));
        let b = Image::new(Tensor::<B, 2>::zeros([8, 6], &device), Spacing::uniform(1.0));
        assert!(validate_image_shapes(&a, &a).is_ok());
        assert!(matches!(
            validate_image_shapes(&a, &b),
            Err(RegistrationError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_iterations() {
        assert!(validate_iterations("maxiter", 100, 10, 10000).is_ok());
        assert!(validate_iterations("maxiter", 5, 10, 10000).is_err());
        assert!(validate_iterations("maxiter", 20000, 10, 10000).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("omega", 1.0, 0.1, 10.0).is_ok());
        assert!(validate_range("omega", 0.0, 0.1, 10.0).is_err());
        assert!(validate_range("omega", f64::NAN, 0.1, 10.0).is_err());
    }

    #[test]
    fn test_validate_lame() {
        assert!(validate_lame(1.0, 1.0).is_ok());
        assert!(validate_lame(1.0, -0.5).is_ok());
        assert!(validate_lame(0.0, 1.0).is_err());
        assert!(validate_lame(1.0, -1.0).is_err());
    }

    #[test]
    fn test_validate_step_bounds() {
        assert!(validate_step_bounds(0.1, 2.0).is_ok());
        assert!(validate_step_bounds(2.0, 2.0).is_ok());
        assert!(validate_step_bounds(3.0, 2.0).is_err());
        assert!(validate_step_bounds(0.0, 2.0).is_err());
    }
}
