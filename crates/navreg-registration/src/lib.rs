//! PDE-based non-rigid image registration.
//!
//! A source image is warped onto a reference image by a dense deformation
//! computed coarse-to-fine. At each level the gradient of a weighted cost
//! function is smoothed by a linear-elastic (Navier-Cauchy) operator into a
//! velocity field, relaxed with parallel successive over-relaxation, and
//! integrated with an adaptive time step that regrids before the
//! deformation folds.
//!
//! # Example
//!
//! ```rust,ignore
//! use navreg_registration::{MultiResolutionRegistration, RegistrationConfig};
//!
//! let mut driver = MultiResolutionRegistration::<2>::from_descriptors(
//!     "navier:mu=1.0,lambda=2.0,maxiter=100,omega=1.0,epsilon=0.0001",
//!     "fluid:min=0.1,max=2.0",
//!     RegistrationConfig::default(),
//! )?;
//! let result = driver.run(source, reference, 3)?;
//! ```

pub mod config;
pub mod cost;
pub mod descriptor;
pub mod error;
pub mod minimizer;
pub mod model;
pub mod multires;
pub mod progress;
pub mod regularizer;
pub mod solver;
pub mod timestep;
pub mod validation;

pub use config::RegistrationConfig;
pub use cost::{
    CostFunctionAggregator, CostProperty, CostTerm, DiffusionCost, ElasticCost, ImageCost,
    SimilarityKernel,
};
pub use descriptor::Descriptor;
pub use error::{RegistrationError, Result};
pub use minimizer::{GradientDescent, Minimizer, MinimizerReport, Problem, TransformationProblem};
pub use model::{ModelKind, NavierConfig, RegistrationModel};
pub use multires::{
    LevelOptimizer, LevelReport, LevelStop, MultiResolutionRegistration, RegistrationResult,
};
pub use progress::{
    CancellationCallback, ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo,
    ProgressTracker,
};
pub use regularizer::{RegularizerConfig, VectorFieldRegularizer};
pub use solver::{
    LaplaceKernel, NavierKernel, RelativeCriterion, RelaxationKernel, RelaxationMode, SolveReport,
    SorSolver,
};
pub use timestep::{TimeStepConfig, TimeStepController, TimeStepKind};
