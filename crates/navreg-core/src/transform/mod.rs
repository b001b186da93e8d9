//! Spatial transformations.
//!
//! The registration engine works on dense displacement fields; the
//! [`Transformation`] trait keeps cost terms and time-step controllers
//! independent of that representation.

pub mod displacement_field;
pub mod trait_;

pub use displacement_field::DisplacementFieldTransform;
pub use trait_::Transformation;
