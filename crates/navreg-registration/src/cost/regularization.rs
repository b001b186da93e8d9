//! Smoothness penalties on the displacement field.
//!
//! Both terms are quadratic in the displacement `u` and use forward
//! differences along each grid axis:
//!
//! - [`DiffusionCost`]: `(α/2) Σ_a Σ_x |u(x + e_a) - u(x)|²`
//! - [`ElasticCost`]: the diffusion term plus `(β/2) Σ_x div u(x)²`, summed
//!   over the voxels whose forward neighbours all exist.

use rayon::prelude::*;

use navreg_core::spatial::FVector;
use navreg_core::{GridSize, Transformation, VectorField};

use super::trait_::{CostProperty, CostTerm};
use crate::descriptor::{unknown_name, Descriptor};
use crate::error::{RegistrationError, Result};
use crate::validation::validate_positive;

/// Names resolvable by [`from_descriptor`].
pub const REGULARIZATION_NAMES: &[&str] = &["diffusion", "elastic"];

/// Build a regularization term from `diffusion:weight=..` or
/// `elastic:alpha=..,beta=..`.
pub fn from_descriptor<const D: usize>(text: &str) -> Result<Box<dyn CostTerm<D>>> {
    let desc = Descriptor::parse(text)?;
    match desc.name() {
        "diffusion" => {
            desc.ensure_known_keys(&["weight"])?;
            Ok(Box::new(DiffusionCost::new(desc.get_or("weight", 1.0)?)?))
        }
        "elastic" => {
            desc.ensure_known_keys(&["alpha", "beta"])?;
            Ok(Box::new(ElasticCost::new(
                desc.get_or("alpha", 1.0)?,
                desc.get_or("beta", 1.0)?,
            )?))
        }
        other => Err(unknown_name("regularization", other, REGULARIZATION_NAMES)),
    }
}

fn check_size<const D: usize>(
    name: &str,
    size: Option<GridSize<D>>,
    transform: &dyn Transformation<D>,
) -> Result<GridSize<D>> {
    let size = size.ok_or_else(|| {
        RegistrationError::not_initialized(format!("{name} cost evaluated before set_size"))
    })?;
    if transform.size() != size {
        return Err(RegistrationError::size_mismatch(size, transform.size()));
    }
    Ok(size)
}

fn membrane_energy<const D: usize>(u: &VectorField<D>) -> f64 {
    let size = u.size();
    let dims = size.dims();
    let strides = size.strides();
    let data = u.as_slice();
    (0..size.len())
        .into_par_iter()
        .map(|index| {
            let coord = size.coord(index);
            (0..D)
                .filter(|&a| coord[a] + 1 < dims[a])
                .map(|a| (data[index + strides[a]] - data[index]).norm_squared() as f64)
                .sum::<f64>()
        })
        .sum()
}

fn membrane_gradient<const D: usize>(
    u: &VectorField<D>,
    weight: f32,
    gradient: &mut VectorField<D>,
) {
    let size = u.size();
    let dims = size.dims();
    let strides = size.strides();
    let data = u.as_slice();
    gradient
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, g)| {
            let coord = size.coord(index);
            let mut acc = FVector::<D>::zeros();
            for a in 0..D {
                if coord[a] > 0 {
                    acc += data[index] - data[index - strides[a]];
                }
                if coord[a] + 1 < dims[a] {
                    acc += data[index] - data[index + strides[a]];
                }
            }
            *g += acc * weight;
        });
}

/// Forward-difference divergence, `None` where a forward neighbour is
/// missing.
fn divergence<const D: usize>(u: &VectorField<D>) -> Vec<Option<f32>> {
    let size = u.size();
    let dims = size.dims();
    let strides = size.strides();
    let data = u.as_slice();
    (0..size.len())
        .into_par_iter()
        .map(|index| {
            let coord = size.coord(index);
            if (0..D).any(|a| coord[a] + 1 >= dims[a]) {
                return None;
            }
            Some((0..D).map(|a| data[index + strides[a]][a] - data[index][a]).sum())
        })
        .collect()
}

/// Membrane (diffusion) regularizer.
#[derive(Debug, Clone)]
pub struct DiffusionCost<const D: usize> {
    weight: f32,
    size: Option<GridSize<D>>,
}

impl<const D: usize> DiffusionCost<D> {
    pub fn new(weight: f32) -> Result<Self> {
        validate_positive("diffusion weight", weight as f64)?;
        Ok(Self { weight, size: None })
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }
}

impl<const D: usize> CostTerm<D> for DiffusionCost<D> {
    fn name(&self) -> &str {
        "diffusion"
    }

    fn set_size(&mut self, size: GridSize<D>) -> Result<()> {
        self.size = Some(size);
        Ok(())
    }

    fn reinit(&mut self) -> Result<()> {
        Ok(())
    }

    fn value(&self, transform: &dyn Transformation<D>) -> Result<f64> {
        check_size("diffusion", self.size, transform)?;
        Ok(0.5 * self.weight as f64 * membrane_energy(&transform.displacement()))
    }

    fn evaluate(
        &self,
        transform: &dyn Transformation<D>,
        gradient: &mut VectorField<D>,
    ) -> Result<f64> {
        let size = check_size("diffusion", self.size, transform)?;
        if gradient.size() != size {
            return Err(RegistrationError::size_mismatch(size, gradient.size()));
        }
        let u = transform.displacement();
        gradient.clear();
        membrane_gradient(&u, self.weight, gradient);
        Ok(0.5 * self.weight as f64 * membrane_energy(&u))
    }

    fn has(&self, property: CostProperty) -> bool {
        matches!(property, CostProperty::Gradient | CostProperty::DenseForce)
    }
}

/// Linear-elastic regularizer: membrane weight `alpha`, divergence weight
/// `beta`.
#[derive(Debug, Clone)]
pub struct ElasticCost<const D: usize> {
    alpha: f32,
    beta: f32,
    size: Option<GridSize<D>>,
}

impl<const D: usize> ElasticCost<D> {
    pub fn new(alpha: f32, beta: f32) -> Result<Self> {
        validate_positive("elastic alpha", alpha as f64)?;
        if !(beta >= 0.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "elastic beta must be non-negative, got {beta}"
            )));
        }
        Ok(Self { alpha, beta, size: None })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    fn energy(&self, u: &VectorField<D>, div: &[Option<f32>]) -> f64 {
        let dilatation: f64 = div.par_iter().flatten().map(|&d| (d as f64) * (d as f64)).sum();
        0.5 * self.alpha as f64 * membrane_energy(u) + 0.5 * self.beta as f64 * dilatation
    }
}

impl<const D: usize> CostTerm<D> for ElasticCost<D> {
    fn name(&self) -> &str {
        "elastic"
    }

    fn set_size(&mut self, size: GridSize<D>) -> Result<()> {
        self.size = Some(size);
        Ok(())
    }

    fn reinit(&mut self) -> Result<()> {
        Ok(())
    }

    fn value(&self, transform: &dyn Transformation<D>) -> Result<f64> {
        check_size("elastic", self.size, transform)?;
        let u = transform.displacement();
        let div = divergence(&u);
        Ok(self.energy(&u, &div))
    }

    fn evaluate(
        &self,
        transform: &dyn Transformation<D>,
        gradient: &mut VectorField<D>,
    ) -> Result<f64> {
        let size = check_size("elastic", self.size, transform)?;
        if gradient.size() != size {
            return Err(RegistrationError::size_mismatch(size, gradient.size()));
        }
        let u = transform.displacement();
        let div = divergence(&u);
        gradient.clear();
        membrane_gradient(&u, self.alpha, gradient);

        let strides = size.strides();
        let beta = self.beta;
        gradient
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, g)| {
                let coord = size.coord(index);
                for a in 0..D {
                    let mut d = 0.0;
                    if coord[a] > 0 {
                        if let Some(prev) = div[index - strides[a]] {
                            d += prev;
                        }
                    }
                    if let Some(here) = div[index] {
                        d -= here;
                    }
                    g[a] += beta * d;
                }
            });
        Ok(self.energy(&u, &div))
    }

    fn has(&self, property: CostProperty) -> bool {
        matches!(property, CostProperty::Gradient | CostProperty::DenseForce)
    }
}
