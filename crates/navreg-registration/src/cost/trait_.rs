//! Cost term trait definition.

use navreg_core::{GridSize, Transformation, VectorField};

use crate::error::Result;

/// Capability a cost term may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostProperty {
    /// Gradient with respect to the transformation parameters.
    Gradient,
    /// Dense per-voxel gradient usable as a PDE force.
    DenseForce,
}

/// One term of a registration cost function.
///
/// Terms are stateful: [`CostTerm::set_size`] prepares the data of a pyramid
/// level and must precede evaluation; [`CostTerm::reinit`] reloads the data
/// the term depends on.
pub trait CostTerm<const D: usize>: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Prepare for evaluation on `size`.
    fn set_size(&mut self, size: GridSize<D>) -> Result<()>;

    /// Reload the underlying data and rebuild the current level.
    fn reinit(&mut self) -> Result<()>;

    /// Cost of `transform`.
    fn value(&self, transform: &dyn Transformation<D>) -> Result<f64>;

    /// Cost of `transform` and its gradient with respect to the per-voxel
    /// displacement, written into `gradient`.
    fn evaluate(
        &self,
        transform: &dyn Transformation<D>,
        gradient: &mut VectorField<D>,
    ) -> Result<f64>;

    /// Whether the term provides `property`.
    fn has(&self, property: CostProperty) -> bool;
}
