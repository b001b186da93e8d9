//! Weighted sum of cost terms.

use navreg_core::{GridSize, Transformation, VectorField};

use super::trait_::{CostProperty, CostTerm};
use crate::error::{RegistrationError, Result};

/// Cost function `C(T) = Σ w_i C_i(T)`.
///
/// The aggregator forwards sizing and reloading to every term and sums
/// values and per-voxel gradients with the term weights.
#[derive(Default)]
pub struct CostFunctionAggregator<const D: usize> {
    terms: Vec<(Box<dyn CostTerm<D>>, f64)>,
    size: Option<GridSize<D>>,
}

impl<const D: usize> std::fmt::Debug for CostFunctionAggregator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostFunctionAggregator")
            .field("terms", &self.terms.iter().map(|(t, w)| (t.name(), *w)).collect::<Vec<_>>())
            .field("size", &self.size)
            .finish()
    }
}

impl<const D: usize> CostFunctionAggregator<D> {
    pub fn new() -> Self {
        Self {
            terms: Vec::new(),
            size: None,
        }
    }

    /// Add a term with weight 1.
    pub fn push(&mut self, term: Box<dyn CostTerm<D>>) {
        self.push_weighted(term, 1.0);
    }

    pub fn push_weighted(&mut self, term: Box<dyn CostTerm<D>>, weight: f64) {
        self.terms.push((term, weight));
    }

    /// Builder form of [`Self::push_weighted`].
    pub fn with_term(mut self, term: Box<dyn CostTerm<D>>, weight: f64) -> Self {
        self.push_weighted(term, weight);
        self
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Grid of the current level, once set.
    pub fn size(&self) -> Option<GridSize<D>> {
        self.size
    }

    pub fn set_size(&mut self, size: GridSize<D>) -> Result<()> {
        for (term, _) in &mut self.terms {
            term.set_size(size)?;
        }
        self.size = Some(size);
        Ok(())
    }

    pub fn reinit(&mut self) -> Result<()> {
        for (term, _) in &mut self.terms {
            term.reinit()?;
        }
        Ok(())
    }

    fn ensure_sized(&self) -> Result<GridSize<D>> {
        self.size.ok_or_else(|| {
            RegistrationError::not_initialized("cost function evaluated before set_size")
        })
    }

    /// Weighted cost of `transform`.
    pub fn value(&self, transform: &dyn Transformation<D>) -> Result<f64> {
        self.ensure_sized()?;
        let mut total = 0.0;
        for (term, weight) in &self.terms {
            total += weight * term.value(transform)?;
        }
        Ok(total)
    }

    /// Weighted cost and per-voxel gradient; `gradient` is overwritten.
    pub fn evaluate(
        &self,
        transform: &dyn Transformation<D>,
        gradient: &mut VectorField<D>,
    ) -> Result<f64> {
        let size = self.ensure_sized()?;
        if gradient.size() != size {
            return Err(RegistrationError::size_mismatch(size, gradient.size()));
        }
        gradient.clear();
        let mut scratch = VectorField::new(size);
        let mut total = 0.0;
        for (term, weight) in &self.terms {
            scratch.clear();
            let value = term.evaluate(transform, &mut scratch)?;
            tracing::trace!("cost term {}: {:.6e} (weight {})", term.name(), value, weight);
            gradient.add_scaled(&scratch, *weight as f32);
            total += weight * value;
        }
        Ok(total)
    }

    /// Whether every term provides `property`. An empty aggregator provides
    /// nothing.
    pub fn has(&self, property: CostProperty) -> bool {
        !self.terms.is_empty() && self.terms.iter().all(|(t, _)| t.has(property))
    }
}
