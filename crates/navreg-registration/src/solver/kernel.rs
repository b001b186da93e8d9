//! Relaxation kernel trait.

use navreg_core::spatial::FVector;
use navreg_core::GridSize;

/// Point relaxation of a linear operator `L v = b`.
///
/// The kernel rewrites the discretised system per voxel as a fixed point
/// `v = b * force_scale + N(v)`, where `N` only reads neighbours. Kernels
/// must be prepared for a grid before use and only ever touch the 3^D
/// neighbourhood of the voxel, which the multi-colour sweep relies on.
pub trait RelaxationKernel<const D: usize>: Send + Sync {
    /// Registry name of the kernel.
    fn name(&self) -> &'static str;

    /// Recompute grid dependent data (strides) for `size`.
    fn prepare(&mut self, size: GridSize<D>);

    /// Grid of the last [`RelaxationKernel::prepare`].
    fn prepared_size(&self) -> Option<GridSize<D>>;

    /// Factor applied to the right hand side before relaxation.
    fn force_scale(&self) -> f32;

    /// Fixed point target at the interior voxel `index`.
    ///
    /// `scaled_force` already carries [`RelaxationKernel::force_scale`].
    fn relax_at(&self, v: &[FVector<D>], scaled_force: &FVector<D>, index: usize) -> FVector<D>;

    /// Clone into a box.
    fn boxed_clone(&self) -> Box<dyn RelaxationKernel<D>>;
}

impl<const D: usize> Clone for Box<dyn RelaxationKernel<D>> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}
