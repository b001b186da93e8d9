//! Time-step control of the PDE driven registration.
//!
//! The controller turns a velocity field into a concrete step length, adapts
//! the relative step between `min` and `max` from the cost response, and
//! decides when the accumulated deformation has to be regridded.
//!
//! The step is relative: a step `s` moves the voxel with the largest
//! velocity by `s` voxels.

use serde::{Deserialize, Serialize};

use navreg_core::{Transformation, VectorField};

use crate::descriptor::{unknown_name, Descriptor};
use crate::error::Result;
use crate::validation::validate_step_bounds;

/// Names resolvable by [`TimeStepController::from_descriptor`].
pub const TIME_STEP_NAMES: &[&str] = &["direct", "fluid"];

/// A deformation whose Jacobian determinant falls below this value is
/// regridded.
pub const REGRID_THRESHOLD: f32 = 0.5;

/// Factor applied by [`TimeStepController::increase`].
const INCREASE_FACTOR: f32 = 1.5;
/// Factor applied by [`TimeStepController::decrease`].
const DECREASE_FACTOR: f32 = 0.5;

/// Integration scheme of the velocity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeStepKind {
    /// Add the scaled velocity to the deformation; no regridding.
    Direct,
    /// Integrate the velocity along the current deformation and regrid on
    /// folding.
    #[default]
    Fluid,
}

/// Step length bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeStepConfig {
    pub kind: TimeStepKind,
    /// Smallest relative step.
    pub min: f32,
    /// Largest relative step, also the initial one.
    pub max: f32,
}

impl Default for TimeStepConfig {
    fn default() -> Self {
        Self {
            kind: TimeStepKind::Fluid,
            min: 0.1,
            max: 2.0,
        }
    }
}

impl TimeStepConfig {
    pub fn new(kind: TimeStepKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_step_bounds(self.min as f64, self.max as f64)
    }
}

/// Adaptive step controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStepController {
    config: TimeStepConfig,
    current: f32,
}

impl TimeStepController {
    /// Create a controller; the step starts at `max`.
    pub fn new(config: TimeStepConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            current: config.max,
        })
    }

    pub fn direct(min: f32, max: f32) -> Result<Self> {
        Self::new(TimeStepConfig::new(TimeStepKind::Direct).with_bounds(min, max))
    }

    pub fn fluid(min: f32, max: f32) -> Result<Self> {
        Self::new(TimeStepConfig::new(TimeStepKind::Fluid).with_bounds(min, max))
    }

    /// Build from `direct:min=..,max=..` or `fluid:min=..,max=..`.
    pub fn from_descriptor(text: &str) -> Result<Self> {
        let desc = Descriptor::parse(text)?;
        let kind = match desc.name() {
            "direct" => TimeStepKind::Direct,
            "fluid" => TimeStepKind::Fluid,
            other => return Err(unknown_name("time step", other, TIME_STEP_NAMES)),
        };
        desc.ensure_known_keys(&["min", "max"])?;
        let defaults = TimeStepConfig::default();
        Self::new(TimeStepConfig {
            kind,
            min: desc.get_or("min", defaults.min)?,
            max: desc.get_or("max", defaults.max)?,
        })
    }

    pub fn kind(&self) -> TimeStepKind {
        self.config.kind
    }

    pub fn config(&self) -> &TimeStepConfig {
        &self.config
    }

    /// Current relative step.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Restart at the largest step, as at the beginning of a level.
    pub fn reset(&mut self) {
        self.current = self.config.max;
    }

    /// Whether this scheme may request regridding.
    pub fn has_regrid(&self) -> bool {
        self.config.kind == TimeStepKind::Fluid
    }

    /// Prepare `velocity` for the update of `transform` and return the
    /// largest per-voxel shift it implies.
    ///
    /// The direct scheme leaves the velocity untouched; the fluid scheme
    /// replaces it by the velocity of the composed deformation.
    pub fn calculate_perturbation<T: Transformation<D>, const D: usize>(
        &self,
        velocity: &mut VectorField<D>,
        transform: &T,
    ) -> f32 {
        match self.config.kind {
            TimeStepKind::Direct => velocity.max_norm(),
            TimeStepKind::Fluid => transform.perturbation(velocity),
        }
    }

    /// Step length that moves the fastest voxel by the current relative
    /// step. Zero when nothing moves.
    pub fn get_delta(&self, maxshift: f32) -> f32 {
        if maxshift > 0.0 {
            self.current / maxshift
        } else {
            0.0
        }
    }

    /// Whether applying `delta * velocity` to `transform` would fold it.
    pub fn regrid_requested<T: Transformation<D>, const D: usize>(
        &self,
        transform: &T,
        velocity: &VectorField<D>,
        delta: f32,
    ) -> bool {
        match self.config.kind {
            TimeStepKind::Direct => false,
            TimeStepKind::Fluid => {
                let min_jacobian = transform.min_jacobian(velocity, delta);
                tracing::trace!("Minimum Jacobian determinant after step: {}", min_jacobian);
                min_jacobian < REGRID_THRESHOLD
            }
        }
    }

    /// Grow the step, capped at `max`. Returns whether it changed.
    pub fn increase(&mut self) -> bool {
        let next = (self.current * INCREASE_FACTOR).min(self.config.max);
        let changed = next > self.current;
        self.current = next;
        changed
    }

    /// Shrink the step, floored at `min`. Returns `false` when the step
    /// already sits at `min`.
    pub fn decrease(&mut self) -> bool {
        if self.current <= self.config.min {
            return false;
        }
        self.current = (self.current * DECREASE_FACTOR).max(self.config.min);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navreg_core::spatial::FVector;
    use navreg_core::{DisplacementFieldTransform, GridSize};

    fn compressing_velocity(size: GridSize<2>) -> VectorField<2> {
        // d v_x / d x = -1 everywhere.
        VectorField::from_fn(size, |[x, _]| FVector::<2>::new(-(x as f32), 0.0))
    }

    #[test]
    fn test_bounds_validation() {
        assert!(TimeStepController::fluid(0.1, 2.0).is_ok());
        assert!(TimeStepController::fluid(2.0, 0.1).is_err());
        assert!(TimeStepController::direct(0.0, 1.0).is_err());
    }

    #[test]
    fn test_from_descriptor() {
        let ts = TimeStepController::from_descriptor("fluid:min=0.2,max=1.5").unwrap();
        assert_eq!(ts.kind(), TimeStepKind::Fluid);
        assert_eq!(ts.current(), 1.5);
        assert!(ts.has_regrid());

        let ts = TimeStepController::from_descriptor("direct").unwrap();
        assert!(!ts.has_regrid());
        assert!(TimeStepController::from_descriptor("leapfrog").is_err());
        assert!(TimeStepController::from_descriptor("fluid:step=1").is_err());
    }

    #[test]
    fn test_get_delta_normalises_by_maxshift() {
        let ts = TimeStepController::direct(0.1, 2.0).unwrap();
        assert!((ts.get_delta(4.0) - 0.5).abs() < 1e-7);
        assert_eq!(ts.get_delta(0.0), 0.0);
    }

    #[test]
    fn test_increase_and_decrease_clamp() {
        let mut ts = TimeStepController::fluid(0.25, 2.0).unwrap();
        assert!(!ts.increase());
        assert_eq!(ts.current(), 2.0);

        assert!(ts.decrease());
        assert_eq!(ts.current(), 1.0);
        assert!(ts.increase());
        assert_eq!(ts.current(), 1.5);

        assert!(ts.decrease());
        assert!(ts.decrease());
        assert!(ts.decrease());
        assert_eq!(ts.current(), 0.25);
        assert!(!ts.decrease());

        ts.reset();
        assert_eq!(ts.current(), 2.0);
    }

    #[test]
    fn test_regrid_threshold() {
        let size = GridSize::new([9, 9]);
        let identity = DisplacementFieldTransform::identity(size);
        let v = compressing_velocity(size);
        let ts = TimeStepController::fluid(0.1, 2.0).unwrap();

        // det = 1 - delta
        assert!(!ts.regrid_requested(&identity, &v, 0.4));
        assert!(ts.regrid_requested(&identity, &v, 0.6));
    }

    #[test]
    fn test_direct_never_regrids() {
        let size = GridSize::new([9, 9]);
        let identity = DisplacementFieldTransform::identity(size);
        let v = compressing_velocity(size);
        let ts = TimeStepController::direct(0.1, 2.0).unwrap();
        assert!(!ts.regrid_requested(&identity, &v, 10.0));
    }

    #[test]
    fn test_perturbation_by_kind() {
        let size = GridSize::new([7, 7]);
        let transform = DisplacementFieldTransform::from_field(VectorField::from_fn(size, |[x, _]| {
            FVector::<2>::new(0.5 * x as f32, 0.0)
        }));
        let constant = VectorField::from_fn(size, |_| FVector::<2>::new(1.0, 0.0));

        let mut v = constant.clone();
        let direct = TimeStepController::direct(0.1, 2.0).unwrap();
        assert!((direct.calculate_perturbation(&mut v, &transform) - 1.0).abs() < 1e-6);
        assert_eq!(v, constant);

        let fluid = TimeStepController::fluid(0.1, 2.0).unwrap();
        let shift = fluid.calculate_perturbation(&mut v, &transform);
        assert!((shift - 1.5).abs() < 1e-6);
        assert_eq!(v.get([0, 3]), FVector::<2>::zeros());
    }
}
