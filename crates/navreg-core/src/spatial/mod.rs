//! Spatial value types shared by fields, images and transformations.
//!
//! Displacements, velocities and forces are stored per voxel as `f32`
//! nalgebra vectors in voxel units. Physical spacing is kept separately as
//! image metadata.

pub mod spacing;
pub mod vector;

pub use spacing::Spacing;
pub use vector::{FVector, Sample};

pub type FVector2 = FVector<2>;
pub type FVector3 = FVector<3>;
pub type Spacing2 = Spacing<2>;
pub type Spacing3 = Spacing<3>;
