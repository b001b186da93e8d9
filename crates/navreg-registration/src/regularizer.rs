//! Standalone force-to-velocity regularizer with a pluggable kernel.
//!
//! [`VectorFieldRegularizer`] performs the same relaxation as
//! [`RegistrationModel`](crate::model::RegistrationModel) but takes any
//! [`RelaxationKernel`] and folds the fluid perturbation step into `run`, so
//! the driver can swap the smoothing independently of the deformation model.

use serde::{Deserialize, Serialize};

use navreg_core::{GridSize, Transformation, VectorField};

use crate::descriptor::{unknown_name, Descriptor};
use crate::error::{RegistrationError, Result};
use crate::solver::{
    LaplaceKernel, NavierKernel, RelativeCriterion, RelaxationKernel, RelaxationMode, SolveReport,
    SorSolver,
};
use crate::validation::{validate_iterations, validate_lame, validate_positive, validate_range};

/// Kernel names resolvable by [`VectorFieldRegularizer::from_descriptor`].
pub const REGULARIZER_NAMES: &[&str] = &["fluid", "laplace"];

/// Convergence parameters of the regularizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizerConfig {
    /// Absolute residual threshold.
    pub epsilon: f32,
    /// Stop once consecutive sweeps differ by less than this fraction (see
    /// [`RegularizerConfig::criterion`]).
    pub relative_epsilon: f32,
    /// Reference residual of the relative test; consecutive sweeps by
    /// default.
    pub criterion: RelativeCriterion,
    pub max_iter: usize,
    pub omega: f32,
    pub mode: RelaxationMode,
}

impl Default for RegularizerConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0e-4,
            relative_epsilon: 1.0e-5,
            criterion: RelativeCriterion::Previous,
            max_iter: 100,
            omega: 1.0,
            mode: RelaxationMode::Sor,
        }
    }
}

impl RegularizerConfig {
    pub fn with_epsilon(mut self, epsilon: f32, relative_epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self.relative_epsilon = relative_epsilon;
        self
    }

    pub fn with_criterion(mut self, criterion: RelativeCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_omega(mut self, omega: f32) -> Self {
        self.omega = omega;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_positive("epsilon", self.epsilon as f64)?;
        validate_range("relative epsilon", self.relative_epsilon as f64, 0.0, 1.0)?;
        validate_iterations("maxiter", self.max_iter, 1, 100_000)?;
        if !(self.omega > 0.0 && self.omega < 2.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "omega must be in (0, 2), got {}",
                self.omega
            )));
        }
        Ok(())
    }

    fn solver(&self) -> SorSolver {
        SorSolver::new(self.omega, self.epsilon, self.max_iter)
            .with_relative_epsilon(self.relative_epsilon)
            .with_criterion(self.criterion)
            .with_mode(self.mode)
    }
}

/// Relaxation of a force field into a velocity field.
pub struct VectorFieldRegularizer<const D: usize> {
    kernel: Box<dyn RelaxationKernel<D>>,
    config: RegularizerConfig,
    size: Option<GridSize<D>>,
    last_report: Option<SolveReport>,
}

impl<const D: usize> std::fmt::Debug for VectorFieldRegularizer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorFieldRegularizer")
            .field("kernel", &self.kernel.name())
            .field("config", &self.config)
            .field("size", &self.size)
            .finish()
    }
}

impl<const D: usize> Clone for VectorFieldRegularizer<D> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            config: self.config,
            size: self.size,
            last_report: self.last_report,
        }
    }
}

impl<const D: usize> VectorFieldRegularizer<D> {
    pub fn new(kernel: Box<dyn RelaxationKernel<D>>, config: RegularizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            kernel,
            config,
            size: None,
            last_report: None,
        })
    }

    /// Build from `fluid:mu=..,lambda=..` (Navier-Cauchy kernel) or
    /// `laplace:mu=..`. Both accept `omega`, `epsilon`, `rel_epsilon` and
    /// `maxiter`.
    pub fn from_descriptor(text: &str) -> Result<Self> {
        let desc = Descriptor::parse(text)?;
        let defaults = RegularizerConfig::default();
        let config = RegularizerConfig {
            epsilon: desc.get_or("epsilon", defaults.epsilon)?,
            relative_epsilon: desc.get_or("rel_epsilon", defaults.relative_epsilon)?,
            criterion: defaults.criterion,
            max_iter: desc.get_or("maxiter", defaults.max_iter)?,
            omega: desc.get_or("omega", defaults.omega)?,
            mode: defaults.mode,
        };
        let mu: f32 = desc.get_or("mu", 1.0)?;
        let kernel: Box<dyn RelaxationKernel<D>> = match desc.name() {
            "fluid" => {
                desc.ensure_known_keys(&[
                    "mu",
                    "lambda",
                    "omega",
                    "epsilon",
                    "rel_epsilon",
                    "maxiter",
                ])?;
                let lambda: f32 = desc.get_or("lambda", 1.0)?;
                validate_lame(mu as f64, lambda as f64)?;
                Box::new(NavierKernel::new(mu, lambda))
            }
            "laplace" => {
                desc.ensure_known_keys(&["mu", "omega", "epsilon", "rel_epsilon", "maxiter"])?;
                validate_positive("mu", mu as f64)?;
                Box::new(LaplaceKernel::new(mu))
            }
            other => return Err(unknown_name("regularizer", other, REGULARIZER_NAMES)),
        };
        Self::new(kernel, config)
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn config(&self) -> &RegularizerConfig {
        &self.config
    }

    /// Grid of the last [`Self::set_size`].
    pub fn size(&self) -> Option<GridSize<D>> {
        self.size
    }

    /// Report of the last relaxation.
    pub fn last_report(&self) -> Option<SolveReport> {
        self.last_report
    }

    /// Prepare the kernel for `size`. Must precede [`Self::run`] on a new
    /// grid.
    pub fn set_size(&mut self, size: GridSize<D>) {
        self.kernel.prepare(size);
        self.size = Some(size);
    }

    /// Relax `force` into `velocity` starting from zero, then turn it into
    /// the perturbation of `deform` and return its largest norm.
    pub fn run(
        &mut self,
        velocity: &mut VectorField<D>,
        force: &VectorField<D>,
        deform: &dyn Transformation<D>,
    ) -> Result<f32> {
        let size = self
            .size
            .ok_or_else(|| RegistrationError::not_initialized("regularizer run before set_size"))?;
        for actual in [velocity.size(), force.size(), deform.size()] {
            if actual != size {
                return Err(RegistrationError::size_mismatch(size, actual));
            }
        }

        velocity.clear();
        let report = self.config.solver().solve(self.kernel.as_ref(), force, velocity)?;
        tracing::debug!(
            "{} regularizer on {}: {} sweeps, residual {:.3e}",
            self.kernel.name(),
            size,
            report.iterations,
            report.final_residual
        );
        self.last_report = Some(report);
        Ok(deform.perturbation(velocity))
    }
}
