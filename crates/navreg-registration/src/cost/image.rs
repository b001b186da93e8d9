//! Image similarity cost terms.
//!
//! The source image is pulled back through the transformation onto the
//! reference grid and compared voxel by voxel. The per-voxel gradient uses
//! the intensity gradient of the warped source:
//!
//! `dC/du(x) = dC/dM(x) · ∇M(x)`, with `M = S ∘ T`.

use burn::tensor::backend::Backend;
use rayon::prelude::*;
use std::str::FromStr;

use navreg_core::filter::ImagePyramid;
use navreg_core::{GridSize, Image, ScalarField, Transformation, VectorField};

use super::trait_::{CostProperty, CostTerm};
use crate::error::{RegistrationError, Result};
use crate::validation::validate_image_shapes;

/// Voxel-wise similarity measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityKernel {
    /// `0.5 · Σ (M - R)²`
    #[default]
    Ssd,
    /// `1 - ncc(M, R)`
    Ncc,
}

impl SimilarityKernel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ssd => "ssd",
            Self::Ncc => "ncc",
        }
    }

    /// Cost and, if requested, `dC/dM` per voxel.
    fn measure(&self, moving: &[f32], reference: &[f32], derivative: Option<&mut [f32]>) -> f64 {
        match self {
            Self::Ssd => {
                if let Some(d) = derivative {
                    d.par_iter_mut()
                        .zip(moving.par_iter().zip(reference.par_iter()))
                        .for_each(|(d, (&m, &r))| *d = m - r);
                }
                0.5 * moving
                    .par_iter()
                    .zip(reference.par_iter())
                    .map(|(&m, &r)| {
                        let diff = (m - r) as f64;
                        diff * diff
                    })
                    .sum::<f64>()
            }
            Self::Ncc => {
                let n = moving.len().max(1) as f64;
                let mean_m = moving.par_iter().map(|&v| v as f64).sum::<f64>() / n;
                let mean_r = reference.par_iter().map(|&v| v as f64).sum::<f64>() / n;
                let (smm, srr, smr) = moving
                    .par_iter()
                    .zip(reference.par_iter())
                    .map(|(&m, &r)| {
                        let dm = m as f64 - mean_m;
                        let dr = r as f64 - mean_r;
                        (dm * dm, dr * dr, dm * dr)
                    })
                    .reduce(|| (0.0, 0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2));

                if smm <= f64::EPSILON || srr <= f64::EPSILON {
                    if let Some(d) = derivative {
                        d.fill(0.0);
                    }
                    return 1.0;
                }
                let norm = (smm * srr).sqrt();
                let ncc = smr / norm;
                if let Some(d) = derivative {
                    d.par_iter_mut()
                        .zip(moving.par_iter().zip(reference.par_iter()))
                        .for_each(|(d, (&m, &r))| {
                            let dncc = (r as f64 - mean_r) / norm - ncc * (m as f64 - mean_m) / smm;
                            *d = -dncc as f32;
                        });
                }
                1.0 - ncc
            }
        }
    }
}

impl FromStr for SimilarityKernel {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ssd" => Ok(Self::Ssd),
            "ncc" => Ok(Self::Ncc),
            other => Err(RegistrationError::descriptor(format!(
                "unknown similarity '{other}', known: [\"ssd\", \"ncc\"]"
            ))),
        }
    }
}

#[derive(Debug)]
struct Level<const D: usize> {
    size: GridSize<D>,
    source: ScalarField<D>,
    reference: ScalarField<D>,
}

/// Similarity between a warped source image and a reference image.
///
/// Both images are kept at full resolution on the burn backend; each
/// [`CostTerm::set_size`] pulls the smoothed and rescaled level to the host.
#[derive(Debug)]
pub struct ImageCost<B: Backend, const D: usize> {
    source: ImagePyramid<B, D>,
    reference: ImagePyramid<B, D>,
    kernel: SimilarityKernel,
    level: Option<Level<D>>,
}

impl<B: Backend, const D: usize> ImageCost<B, D> {
    /// Create the term. Source and reference must share the grid.
    pub fn new(
        source: Image<B, D>,
        reference: Image<B, D>,
        kernel: SimilarityKernel,
    ) -> Result<Self> {
        validate_image_shapes(&reference, &source)?;
        Ok(Self {
            source: ImagePyramid::new(source),
            reference: ImagePyramid::new(reference),
            kernel,
            level: None,
        })
    }

    pub fn kernel(&self) -> SimilarityKernel {
        self.kernel
    }

    /// Full resolution grid of the inputs.
    pub fn full_size(&self) -> GridSize<D> {
        self.reference.full_size()
    }

    /// Swap in new input images; the next [`CostTerm::reinit`] or
    /// [`CostTerm::set_size`] picks them up.
    pub fn replace_images(&mut self, source: Image<B, D>, reference: Image<B, D>) -> Result<()> {
        validate_image_shapes(&reference, &source)?;
        self.source.replace(source);
        self.reference.replace(reference);
        Ok(())
    }

    fn load(&mut self, size: GridSize<D>) {
        self.level = Some(Level {
            size,
            source: self.source.level(size).clone(),
            reference: self.reference.level(size).clone(),
        });
    }

    fn current(&self, transform: &dyn Transformation<D>) -> Result<&Level<D>> {
        let level = self.level.as_ref().ok_or_else(|| {
            RegistrationError::not_initialized(format!(
                "{} image cost evaluated before set_size",
                self.kernel.name()
            ))
        })?;
        if transform.size() != level.size {
            return Err(RegistrationError::size_mismatch(level.size, transform.size()));
        }
        Ok(level)
    }
}

impl<B: Backend, const D: usize> CostTerm<D> for ImageCost<B, D> {
    fn name(&self) -> &str {
        self.kernel.name()
    }

    fn set_size(&mut self, size: GridSize<D>) -> Result<()> {
        if self.level.as_ref().map(|l| l.size) != Some(size) {
            self.load(size);
        }
        Ok(())
    }

    fn reinit(&mut self) -> Result<()> {
        self.source.clear();
        self.reference.clear();
        if let Some(size) = self.level.as_ref().map(|l| l.size) {
            self.load(size);
        }
        Ok(())
    }

    fn value(&self, transform: &dyn Transformation<D>) -> Result<f64> {
        let level = self.current(transform)?;
        let warped = transform.warp(&level.source);
        Ok(self.kernel.measure(warped.as_slice(), level.reference.as_slice(), None))
    }

    fn evaluate(
        &self,
        transform: &dyn Transformation<D>,
        gradient: &mut VectorField<D>,
    ) -> Result<f64> {
        let level = self.current(transform)?;
        if gradient.size() != level.size {
            return Err(RegistrationError::size_mismatch(level.size, gradient.size()));
        }
        let warped = transform.warp(&level.source);
        let mut derivative = vec![0.0f32; level.size.len()];
        let value = self.kernel.measure(
            warped.as_slice(),
            level.reference.as_slice(),
            Some(derivative.as_mut_slice()),
        );

        let intensity_gradient = warped.gradient();
        gradient
            .as_mut_slice()
            .par_iter_mut()
            .zip(intensity_gradient.as_slice().par_iter())
            .zip(derivative.par_iter())
            .for_each(|((g, grad), &d)| *g = grad * d);
        Ok(value)
    }

    fn has(&self, property: CostProperty) -> bool {
        matches!(property, CostProperty::Gradient | CostProperty::DenseForce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use navreg_core::spatial::FVector;
    use navreg_core::{DisplacementFieldTransform, Spacing};

    type B = NdArray<f32>;

    fn blob(size: GridSize<2>, cx: f32) -> ScalarField<2> {
        ScalarField::from_fn(size, |[x, y]| {
            let dx = x as f32 - cx;
            let dy = y as f32 - 10.0;
            (-(dx * dx + dy * dy) / 18.0).exp()
        })
    }

    fn cost(kernel: SimilarityKernel, source_cx: f32) -> ImageCost<B, 2> {
        let device = Default::default();
        let size = GridSize::new([20, 20]);
        let source = Image::from_field(&blob(size, source_cx), Spacing::uniform(1.0), &device);
        let reference = Image::from_field(&blob(size, 10.0), Spacing::uniform(1.0), &device);
        ImageCost::new(source, reference, kernel).unwrap()
    }

    #[test]
    fn test_evaluate_before_set_size_fails() {
        let term = cost(SimilarityKernel::Ssd, 10.0);
        let t = DisplacementFieldTransform::identity(GridSize::new([20, 20]));
        assert!(matches!(term.value(&t), Err(RegistrationError::NotInitialized(_))));
    }

    #[test]
    fn test_identical_images_have_zero_ssd() {
        let mut term = cost(SimilarityKernel::Ssd, 10.0);
        let size = GridSize::new([20, 20]);
        term.set_size(size).unwrap();
        let t = DisplacementFieldTransform::identity(size);
        let mut g = VectorField::new(size);
        assert_eq!(term.evaluate(&t, &mut g).unwrap(), 0.0);
        assert_eq!(g.max_norm(), 0.0);
    }

    #[test]
    fn test_ssd_gradient_points_towards_alignment() {
        let mut term = cost(SimilarityKernel::Ssd, 12.0);
        let size = GridSize::new([20, 20]);
        term.set_size(size).unwrap();
        let t = DisplacementFieldTransform::identity(size);
        let mut g = VectorField::new(size);
        let before = term.evaluate(&t, &mut g).unwrap();
        assert!(before > 0.0);

        // The source sits 2 voxels to the right: descending moves sampling
        // positions to +x.
        let mut force = g.clone();
        force.scale(-1.0);
        assert!(force.get([10, 10])[0] > 0.0);

        let shifted = DisplacementFieldTransform::from_field(VectorField::from_fn(size, |_| {
            FVector::<2>::new(2.0, 0.0)
        }));
        assert!(term.value(&shifted).unwrap() < 1e-6 + before * 0.2);
    }

    #[test]
    fn test_ssd_gradient_matches_finite_difference() {
        let mut term = cost(SimilarityKernel::Ssd, 11.0);
        let size = GridSize::new([20, 20]);
        term.set_size(size).unwrap();
        let t = DisplacementFieldTransform::identity(size);
        let mut g = VectorField::new(size);
        term.evaluate(&t, &mut g).unwrap();

        let h = 1e-2;
        let plus = DisplacementFieldTransform::from_field(VectorField::from_fn(size, |_| {
            FVector::<2>::new(h, 0.0)
        }));
        let minus = DisplacementFieldTransform::from_field(VectorField::from_fn(size, |_| {
            FVector::<2>::new(-h, 0.0)
        }));
        let numeric = (term.value(&plus).unwrap() - term.value(&minus).unwrap()) / (2.0 * h as f64);
        let analytic: f64 = g.iter().map(|v| v[0] as f64).sum();
        assert!((numeric - analytic).abs() < 0.05 * analytic.abs().max(1e-3));
    }

    #[test]
    fn test_ncc_is_zero_for_scaled_copy() {
        let device = Default::default();
        let size = GridSize::new([20, 20]);
        let reference = blob(size, 10.0);
        let scaled = ScalarField::from_fn(size, |c| 3.0 * reference.get(c) + 1.0);
        let mut term = ImageCost::<B, 2>::new(
            Image::from_field(&scaled, Spacing::uniform(1.0), &device),
            Image::from_field(&reference, Spacing::uniform(1.0), &device),
            SimilarityKernel::Ncc,
        )
        .unwrap();
        term.set_size(size).unwrap();
        let value = term.value(&DisplacementFieldTransform::identity(size)).unwrap();
        assert!(value.abs() < 1e-5);
    }

    #[test]
    fn test_set_size_downscales_and_checks_transform() {
        let mut term = cost(SimilarityKernel::Ncc, 12.0);
        let coarse = GridSize::new([10, 10]);
        term.set_size(coarse).unwrap();
        assert!(term.value(&DisplacementFieldTransform::identity(coarse)).is_ok());
        let err = term
            .value(&DisplacementFieldTransform::identity(GridSize::new([20, 20])))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::SizeMismatch { .. }));
        term.reinit().unwrap();
        assert!(term.value(&DisplacementFieldTransform::identity(coarse)).is_ok());
    }

    #[test]
    fn test_mismatched_inputs_are_rejected() {
        let device = Default::default();
        let a = Image::<B, 2>::from_field(
            &ScalarField::new(GridSize::new([8, 8])),
            Spacing::uniform(1.0),
            &device,
        );
        let b = Image::<B, 2>::from_field(
            &ScalarField::new(GridSize::new([8, 7])),
            Spacing::uniform(1.0),
            &device,
        );
        assert!(ImageCost::new(a, b, SimilarityKernel::Ssd).is_err());
        assert_eq!("ncc".parse::<SimilarityKernel>().unwrap(), SimilarityKernel::Ncc);
        assert!("mi".parse::<SimilarityKernel>().is_err());
    }
}
