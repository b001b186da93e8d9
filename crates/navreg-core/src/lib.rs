//! Core data types for PDE-based non-rigid image registration.
//!
//! Grid geometry, host-side scalar and vector fields, the burn-backed image
//! container, interpolation, dense displacement transformations and the
//! smoothing / pyramid filters feeding multi-resolution registration.

pub mod field;
pub mod filter;
pub mod grid;
pub mod image;
pub mod interpolation;
pub mod spatial;
pub mod transform;

pub use field::{ScalarField, VectorField};
pub use grid::GridSize;
pub use image::Image;
pub use spatial::{FVector, Spacing};
pub use transform::{DisplacementFieldTransform, Transformation};
