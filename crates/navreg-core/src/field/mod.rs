//! Host-side grid buffers.
//!
//! The PDE solvers relax voxel by voxel with arbitrary neighbour access, so
//! the working data of a pyramid level lives in plain `Vec` buffers on the
//! host. Burn tensors are used for whole-image filtering before a level
//! starts.

pub mod scalar_field;
pub mod vector_field;

pub use scalar_field::ScalarField;
pub use vector_field::VectorField;
