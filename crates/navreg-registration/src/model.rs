//! Registration models: force to velocity via the Navier-Cauchy PDE.
//!
//! The model smooths the per-voxel force field of the cost function into a
//! velocity (fluid) or displacement increment (elastic) field by relaxing
//! the linear-elastic operator. The two kinds share the operator and differ
//! in the initial guess: the elastic model continues from the previous
//! solution, the fluid model starts every solve from zero.

use serde::{Deserialize, Serialize};

use navreg_core::VectorField;

use crate::descriptor::{unknown_name, Descriptor};
use crate::error::{RegistrationError, Result};
use crate::solver::{NavierKernel, RelaxationKernel, RelaxationMode, SolveReport, SorSolver};
use crate::validation::{validate_iterations, validate_lame, validate_range};

/// Names resolvable by [`RegistrationModel::from_descriptor`].
pub const MODEL_NAMES: &[&str] = &["navier", "naviera"];

const MODEL_KEYS: &[&str] = &["mu", "lambda", "omega", "epsilon", "maxiter", "kind"];

/// How the solution of one step relates to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Warm start from the previous solution.
    Elastic,
    /// Solve from zero every step.
    #[default]
    Fluid,
}

/// Parameters of the Navier-Cauchy model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavierConfig {
    /// Shear modulus.
    pub mu: f32,
    /// First Lamé parameter.
    pub lambda: f32,
    /// SOR relaxation factor.
    pub omega: f32,
    /// Absolute residual threshold of the relaxation.
    pub epsilon: f32,
    /// Relaxation sweep cap.
    pub max_iter: usize,
    pub mode: RelaxationMode,
}

impl Default for NavierConfig {
    fn default() -> Self {
        Self {
            mu: 1.0,
            lambda: 1.0,
            omega: 1.0,
            epsilon: 1.0e-4,
            max_iter: 100,
            mode: RelaxationMode::Sor,
        }
    }
}

impl NavierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lame(mut self, mu: f32, lambda: f32) -> Self {
        self.mu = mu;
        self.lambda = lambda;
        self
    }

    pub fn with_omega(mut self, omega: f32) -> Self {
        self.omega = omega;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_mode(mut self, mode: RelaxationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        validate_lame(self.mu as f64, self.lambda as f64)?;
        if !(self.omega > 0.0 && self.omega < 2.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "omega must be in (0, 2), got {}",
                self.omega
            )));
        }
        validate_range("epsilon", self.epsilon as f64, 1.0e-10, 0.1)?;
        validate_iterations("maxiter", self.max_iter, 1, 100_000)
    }
}

/// Navier-Cauchy registration model.
#[derive(Debug, Clone)]
pub struct RegistrationModel<const D: usize> {
    kind: ModelKind,
    config: NavierConfig,
    kernel: NavierKernel<D>,
    solver: SorSolver,
}

impl<const D: usize> RegistrationModel<D> {
    /// Create a model after validating `config`.
    pub fn new(kind: ModelKind, config: NavierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            kind,
            config,
            kernel: NavierKernel::new(config.mu, config.lambda),
            solver: SorSolver::new(config.omega, config.epsilon, config.max_iter)
                .with_mode(config.mode),
        })
    }

    pub fn elastic(config: NavierConfig) -> Result<Self> {
        Self::new(ModelKind::Elastic, config)
    }

    pub fn fluid(config: NavierConfig) -> Result<Self> {
        Self::new(ModelKind::Fluid, config)
    }

    /// Build a model from `navier:...` (SOR) or `naviera:...`
    /// (Gauss-Southwell).
    ///
    /// Keys: `mu`, `lambda`, `omega`, `epsilon`, `maxiter` and
    /// `kind=elastic|fluid` (default fluid).
    pub fn from_descriptor(text: &str) -> Result<Self> {
        let desc = Descriptor::parse(text)?;
        let mode = match desc.name() {
            "navier" => RelaxationMode::Sor,
            "naviera" => RelaxationMode::GaussSouthwell,
            other => return Err(unknown_name("model", other, MODEL_NAMES)),
        };
        desc.ensure_known_keys(MODEL_KEYS)?;

        let defaults = NavierConfig::default();
        let config = NavierConfig {
            mu: desc.get_or("mu", defaults.mu)?,
            lambda: desc.get_or("lambda", defaults.lambda)?,
            omega: desc.get_or("omega", defaults.omega)?,
            epsilon: desc.get_or("epsilon", defaults.epsilon)?,
            max_iter: desc.get_or("maxiter", defaults.max_iter)?,
            mode,
        };
        let kind = match desc.raw("kind") {
            None | Some("fluid") => ModelKind::Fluid,
            Some("elastic") => ModelKind::Elastic,
            Some(other) => {
                return Err(RegistrationError::descriptor(format!(
                    "model kind must be 'elastic' or 'fluid', got '{other}'"
                )))
            }
        };
        Self::new(kind, config)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn config(&self) -> &NavierConfig {
        &self.config
    }

    /// Normalisation applied to forces inside the relaxation.
    pub fn force_scale(&self) -> f32 {
        self.kernel.force_scale()
    }

    /// Solve for the velocity field driven by `force`.
    ///
    /// The grid is taken from `force`; `velocity` must share it. An elastic
    /// model starts from the current content of `velocity`, a fluid model
    /// clears it first.
    pub fn solve(
        &self,
        force: &VectorField<D>,
        velocity: &mut VectorField<D>,
    ) -> Result<SolveReport> {
        let size = force.size();
        if velocity.size() != size {
            return Err(RegistrationError::size_mismatch(size, velocity.size()));
        }
        if self.kind == ModelKind::Fluid {
            velocity.clear();
        }

        let mut kernel = self.kernel;
        kernel.prepare(size);
        let report = self.solver.solve(&kernel, force, velocity)?;
        tracing::debug!(
            "{:?} model solve on {}: {} sweeps, residual {:.3e} -> {:.3e}",
            self.kind,
            size,
            report.iterations,
            report.initial_residual,
            report.final_residual
        );
        Ok(report)
    }

    /// Solve from a zero initial guess into a new field.
    pub fn solve_fresh(&self, force: &VectorField<D>) -> Result<VectorField<D>> {
        let mut velocity = VectorField::new(force.size());
        self.solve(force, &mut velocity)?;
        Ok(velocity)
    }
}
