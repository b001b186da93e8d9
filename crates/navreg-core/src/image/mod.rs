//! Image types and operations.
//!
//! This module provides the burn-backed Image container used as registration
//! input.

pub mod image;

pub use image::Image;
