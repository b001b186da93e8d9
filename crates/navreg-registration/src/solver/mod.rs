//! Iterative relaxation of discretised elliptic PDEs on vector fields.
//!
//! A [`RelaxationKernel`] knows the stencil of one operator; the
//! [`SorSolver`] drives it over the grid with parallel multi-colour
//! successive over-relaxation, optionally restricted to the voxels that
//! still change (Gauss-Southwell).

pub mod kernel;
pub mod laplace;
pub mod navier;
pub mod sor;

pub use kernel::RelaxationKernel;
pub use laplace::LaplaceKernel;
pub use navier::NavierKernel;
pub use sor::{solve_at, RelativeCriterion, RelaxationMode, SolveReport, SorSolver};
