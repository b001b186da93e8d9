//! Coarse-to-fine non-rigid registration driver.
//!
//! For each pyramid level, from coarsest to finest, the driver sizes the
//! cost function, upscales the transformation of the previous level and
//! runs the level optimizer on it:
//!
//! - **PDE branch**: the negative cost gradient is smoothed into a velocity
//!   field (model solve or standalone regularizer), the time-step controller
//!   turns it into a step, and the step is applied to a level-local
//!   deformation `local`. The accumulated transformation is `result ∘ local`.
//!   When the step would fold `local`, it is folded into `result` first
//!   (regridding). At the end of the level the best `local` seen is folded
//!   into `result`.
//! - **Parametric branch**: a [`Minimizer`] runs once per level over the
//!   flat parameter vector of the transformation.
//!
//! Cancellation is polled once per outer iteration; a cancelled run returns
//! the best transformation found so far.

use burn::tensor::backend::Backend;
use std::sync::Arc;

use navreg_core::filter::level_sizes;
use navreg_core::{DisplacementFieldTransform, GridSize, Image, Transformation, VectorField};

use crate::config::RegistrationConfig;
use crate::cost::{CostFunctionAggregator, CostProperty, ImageCost, SimilarityKernel};
use crate::error::{RegistrationError, Result};
use crate::minimizer::{Minimizer, TransformationProblem};
use crate::model::RegistrationModel;
use crate::progress::{ProgressCallback, ProgressInfo, ProgressTracker};
use crate::regularizer::VectorFieldRegularizer;
use crate::timestep::TimeStepController;
use crate::validation::validate_iterations;

/// Per-level optimization strategy.
pub enum LevelOptimizer<const D: usize> {
    /// Navier-Cauchy model solve plus time-step control.
    Pde {
        model: RegistrationModel<D>,
        time_step: TimeStepController,
    },
    /// Standalone regularizer in place of the model solve.
    Regularized {
        regularizer: VectorFieldRegularizer<D>,
        time_step: TimeStepController,
    },
    /// Numeric minimization of the transformation parameters.
    Parametric { minimizer: Box<dyn Minimizer> },
}

impl<const D: usize> std::fmt::Debug for LevelOptimizer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pde { model, time_step } => f
                .debug_struct("Pde")
                .field("model", &model.kind())
                .field("time_step", &time_step.kind())
                .finish(),
            Self::Regularized { regularizer, time_step } => f
                .debug_struct("Regularized")
                .field("regularizer", &regularizer.kernel_name())
                .field("time_step", &time_step.kind())
                .finish(),
            Self::Parametric { minimizer } => f
                .debug_struct("Parametric")
                .field("minimizer", &minimizer.name())
                .finish(),
        }
    }
}

/// Why a level ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelStop {
    /// Relative cost reached the outer epsilon, or the minimizer converged.
    Converged,
    /// Iteration cap reached.
    MaxIterations,
    /// No improvement and the step could not shrink further.
    Stagnated,
    /// The velocity field vanished.
    ZeroStep,
    /// A progress callback requested cancellation.
    Cancelled,
}

/// Summary of one pyramid level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport<const D: usize> {
    pub size: GridSize<D>,
    pub iterations: usize,
    pub initial_cost: f64,
    pub best_cost: f64,
    pub regrids: usize,
    pub stop_reason: LevelStop,
}

impl<const D: usize> LevelReport<D> {
    fn new(size: GridSize<D>, initial_cost: f64) -> Self {
        Self {
            size,
            iterations: 0,
            initial_cost,
            best_cost: initial_cost,
            regrids: 0,
            stop_reason: LevelStop::MaxIterations,
        }
    }
}

/// Outcome of a registration run.
#[derive(Debug, Clone)]
pub struct RegistrationResult<T, const D: usize> {
    /// Transformation on the full resolution grid.
    pub transform: T,
    /// Cost of `transform` at full resolution.
    pub final_cost: f64,
    /// One report per level that was started.
    pub levels: Vec<LevelReport<D>>,
    pub cancelled: bool,
}

/// Settings shared by the level loops.
struct LevelContext<'a> {
    level: usize,
    levels: usize,
    max_iterations: usize,
    outer_epsilon: f64,
    increase_ratio: f64,
    progress: &'a ProgressTracker,
}

impl LevelContext<'_> {
    fn report(&self, iteration: usize, cost: f64, best_cost: f64, step: f32) {
        let mut info =
            ProgressInfo::new(self.level, self.levels, iteration, self.max_iterations, cost);
        info.best_cost = best_cost;
        info.step = step as f64;
        self.progress.update(info);
    }
}

enum VelocitySource<'a, const D: usize> {
    Model(&'a RegistrationModel<D>),
    Regularizer(&'a mut VectorFieldRegularizer<D>),
}

/// Multi-resolution registration driver.
#[derive(Debug)]
pub struct MultiResolutionRegistration<const D: usize> {
    optimizer: LevelOptimizer<D>,
    config: RegistrationConfig,
    progress: ProgressTracker,
}

impl<const D: usize> MultiResolutionRegistration<D> {
    /// Create a driver. Fails on an invalid `config`.
    pub fn new(optimizer: LevelOptimizer<D>, config: RegistrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            optimizer,
            config,
            progress: ProgressTracker::new(),
        })
    }

    /// PDE driver with the model and time step described by `config`.
    pub fn from_config(config: RegistrationConfig) -> Result<Self> {
        let model = RegistrationModel::new(config.model, config.navier)?;
        let time_step = TimeStepController::new(config.time_step)?;
        Self::new(LevelOptimizer::Pde { model, time_step }, config)
    }

    /// PDE driver from descriptors such as `navier:mu=1,lambda=2` and
    /// `fluid:min=0.1,max=2`.
    pub fn from_descriptors(
        model: &str,
        time_step: &str,
        config: RegistrationConfig,
    ) -> Result<Self> {
        let model = RegistrationModel::from_descriptor(model)?;
        let time_step = TimeStepController::from_descriptor(time_step)?;
        Self::new(LevelOptimizer::Pde { model, time_step }, config)
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.progress.add_callback(callback);
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &LevelOptimizer<D> {
        &self.optimizer
    }

    /// Register `source` to `reference` with an SSD cost over `levels`
    /// pyramid levels.
    pub fn run<B: Backend>(
        &mut self,
        source: Image<B, D>,
        reference: Image<B, D>,
        levels: usize,
    ) -> Result<RegistrationResult<DisplacementFieldTransform<D>, D>> {
        let full_size = reference.grid_size();
        let mut cost = CostFunctionAggregator::new();
        cost.push(Box::new(ImageCost::new(source, reference, SimilarityKernel::Ssd)?));
        self.run_with_cost(&mut cost, full_size, levels)
    }

    /// [`Self::run`] over the configured number of levels.
    pub fn run_configured<B: Backend>(
        &mut self,
        source: Image<B, D>,
        reference: Image<B, D>,
    ) -> Result<RegistrationResult<DisplacementFieldTransform<D>, D>> {
        let levels = self.config.levels;
        self.run(source, reference, levels)
    }

    /// Register with a caller-assembled cost function on a dense
    /// displacement field.
    pub fn run_with_cost(
        &mut self,
        cost: &mut CostFunctionAggregator<D>,
        full_size: GridSize<D>,
        levels: usize,
    ) -> Result<RegistrationResult<DisplacementFieldTransform<D>, D>> {
        self.register(cost, full_size, levels, DisplacementFieldTransform::identity)
    }

    /// Register with any transformation; `create` builds the identity on the
    /// coarsest grid.
    pub fn register<T, F>(
        &mut self,
        cost: &mut CostFunctionAggregator<D>,
        full_size: GridSize<D>,
        levels: usize,
        create: F,
    ) -> Result<RegistrationResult<T, D>>
    where
        T: Transformation<D> + Clone,
        F: Fn(GridSize<D>) -> T,
    {
        if cost.is_empty() {
            return Err(RegistrationError::invalid_configuration("cost function has no terms"));
        }
        let needed = match self.optimizer {
            LevelOptimizer::Parametric { .. } => CostProperty::Gradient,
            _ => CostProperty::DenseForce,
        };
        if !cost.has(needed) {
            return Err(RegistrationError::missing_capability(format!(
                "{:?} optimization needs every cost term to provide {:?}",
                self.optimizer, needed
            )));
        }
        validate_iterations("levels", levels, 1, 16)?;

        self.progress.start();
        let outcome = self.register_levels(cost, full_size, levels, create);
        match &outcome {
            Ok(result) => self.progress.complete(result.final_cost),
            Err(e) => self.progress.error(&e.to_string()),
        }
        outcome
    }

    fn register_levels<T, F>(
        &mut self,
        cost: &mut CostFunctionAggregator<D>,
        full_size: GridSize<D>,
        levels: usize,
        create: F,
    ) -> Result<RegistrationResult<T, D>>
    where
        T: Transformation<D> + Clone,
        F: Fn(GridSize<D>) -> T,
    {
        let Self {
            optimizer,
            config,
            progress,
        } = self;
        let sizes = level_sizes(full_size, levels, config.start_size);
        let mut reports = Vec::with_capacity(sizes.len());
        let mut result: Option<T> = None;
        let mut cancelled = false;

        for (level, &size) in sizes.iter().enumerate() {
            cost.set_size(size)?;
            let mut transform = match result.take() {
                Some(previous) => previous.upscale(size),
                None => create(size),
            };
            if !size.has_interior() {
                tracing::warn!("Level {} grid {} has no interior voxels", level + 1, size);
            }
            tracing::info!("Starting level {}/{} on grid {}", level + 1, sizes.len(), size);
            progress.level_start(level, sizes.len(), &size.to_string());

            let ctx = LevelContext {
                level,
                levels: sizes.len(),
                max_iterations: config.max_iterations,
                outer_epsilon: config.outer_epsilon,
                increase_ratio: config.increase_ratio,
                progress,
            };
            let report = match optimizer {
                LevelOptimizer::Pde { model, time_step } => {
                    pde_level(VelocitySource::Model(model), time_step, cost, &mut transform, &ctx)?
                }
                LevelOptimizer::Regularized { regularizer, time_step } => pde_level(
                    VelocitySource::Regularizer(regularizer),
                    time_step,
                    cost,
                    &mut transform,
                    &ctx,
                )?,
                LevelOptimizer::Parametric { minimizer } => {
                    parametric_level(&**minimizer, cost, &mut transform, &ctx)?
                }
            };
            tracing::info!(
                "Level {}/{} finished after {} iterations ({:?}): \
                 cost {:.6e} -> {:.6e}, {} regrids",
                level + 1,
                sizes.len(),
                report.iterations,
                report.stop_reason,
                report.initial_cost,
                report.best_cost,
                report.regrids
            );

            let stop = report.stop_reason;
            reports.push(report);
            result = Some(transform);
            if stop == LevelStop::Cancelled {
                cancelled = true;
                break;
            }
        }

        let mut transform = result.ok_or_else(|| {
            RegistrationError::invalid_configuration("no pyramid level was registered")
        })?;
        if transform.size() != full_size {
            transform = transform.upscale(full_size);
            cost.set_size(full_size)?;
        }
        let final_cost = cost.value(&transform)?;
        Ok(RegistrationResult {
            transform,
            final_cost,
            levels: reports,
            cancelled,
        })
    }
}

/// Relax the force into `velocity` and prepare it for the update of
/// `local`. Returns the largest per-voxel shift.
fn velocity_step<T: Transformation<D>, const D: usize>(
    source: &mut VelocitySource<'_, D>,
    time_step: &TimeStepController,
    force: &VectorField<D>,
    velocity: &mut VectorField<D>,
    local: &T,
) -> Result<f32> {
    match source {
        VelocitySource::Model(model) => {
            model.solve(force, velocity)?;
            Ok(time_step.calculate_perturbation(velocity, local))
        }
        VelocitySource::Regularizer(regularizer) => regularizer.run(velocity, force, local),
    }
}

/// `result ∘ local`
fn composed<T: Transformation<D> + Clone, const D: usize>(result: &T, local: &T) -> T {
    let mut composite = result.clone();
    composite.compose(local);
    composite
}

fn pde_level<T: Transformation<D> + Clone, const D: usize>(
    mut source: VelocitySource<'_, D>,
    time_step: &mut TimeStepController,
    cost: &CostFunctionAggregator<D>,
    result: &mut T,
    ctx: &LevelContext<'_>,
) -> Result<LevelReport<D>> {
    let size = result.size();
    time_step.reset();
    if let VelocitySource::Regularizer(regularizer) = &mut source {
        regularizer.set_size(size);
    }

    let initial = cost.value(&*result)?;
    let mut report = LevelReport::new(size, initial);
    if initial <= 0.0 {
        report.stop_reason = LevelStop::Converged;
        return Ok(report);
    }

    let mut local = result.clone();
    local.set_identity();
    let mut local_moved = false;
    let mut best_local: Option<T> = None;
    let mut best = initial;
    let mut current = initial;
    let mut gradient = VectorField::new(size);
    let mut velocity = VectorField::new(size);

    loop {
        if ctx.progress.is_cancelled() {
            report.stop_reason = LevelStop::Cancelled;
            break;
        }
        if report.iterations >= ctx.max_iterations {
            report.stop_reason = LevelStop::MaxIterations;
            break;
        }
        report.iterations += 1;
        let previous = current;

        cost.evaluate(&composed(result, &local), &mut gradient)?;
        gradient.scale(-1.0);

        let mut maxshift = velocity_step(&mut source, time_step, &gradient, &mut velocity, &local)?;
        if !(maxshift > 0.0) {
            tracing::debug!("Zero time step at iteration {}", report.iterations);
            report.stop_reason = LevelStop::ZeroStep;
            break;
        }
        let mut delta = time_step.get_delta(maxshift);

        let mut regridded = false;
        if time_step.has_regrid() && time_step.regrid_requested(&local, &velocity, delta) {
            if local_moved {
                result.compose(&local);
                local.set_identity();
                local_moved = false;
                best_local = None;
                best = previous;
                report.regrids += 1;
                regridded = true;
                tracing::debug!("Regrid at iteration {}", report.iterations);

                // The velocity was integrated along the old local deformation.
                maxshift = velocity_step(&mut source, time_step, &gradient, &mut velocity, &local)?;
                if !(maxshift > 0.0) {
                    report.stop_reason = LevelStop::ZeroStep;
                    break;
                }
                delta = time_step.get_delta(maxshift);
            }
            // A single step from the identity must not fold either.
            let mut folds = time_step.regrid_requested(&local, &velocity, delta);
            while folds && time_step.decrease() {
                delta = time_step.get_delta(maxshift);
                folds = time_step.regrid_requested(&local, &velocity, delta);
            }
            if folds {
                tracing::debug!(
                    "Step {} still folds at the smallest step, stopping level",
                    time_step.current()
                );
                report.stop_reason = LevelStop::Stagnated;
                break;
            }
        }
        local.update(delta, &velocity);
        local_moved = true;
        if regridded {
            velocity.clear();
        }

        current = cost.value(&composed(result, &local))?;
        tracing::debug!(
            "{}@{}: cost {:.6e}, maxshift {:.4}, step {:.4}",
            report.iterations,
            size,
            current,
            maxshift,
            delta
        );
        if current < best {
            best = current;
            best_local = Some(local.clone());
        }
        if current < previous * ctx.increase_ratio {
            time_step.increase();
        }
        ctx.report(report.iterations, current, best, time_step.current());

        if !regridded && current > best && !time_step.decrease() {
            report.stop_reason = LevelStop::Stagnated;
            break;
        }
        if current / initial <= ctx.outer_epsilon {
            report.stop_reason = LevelStop::Converged;
            break;
        }
    }

    if let Some(best_local) = best_local {
        result.compose(&best_local);
    }
    report.best_cost = best;
    Ok(report)
}

fn parametric_level<T: Transformation<D> + Clone, const D: usize>(
    minimizer: &dyn Minimizer,
    cost: &CostFunctionAggregator<D>,
    result: &mut T,
    ctx: &LevelContext<'_>,
) -> Result<LevelReport<D>> {
    let initial = cost.value(&*result)?;
    let mut report = LevelReport::new(result.size(), initial);
    if ctx.progress.is_cancelled() {
        report.stop_reason = LevelStop::Cancelled;
        return Ok(report);
    }

    let mut x = result.parameters();
    let outcome = {
        let mut problem = TransformationProblem::new(cost, &mut *result)?;
        minimizer.minimize(&mut problem, &mut x)?
    };
    result.set_parameters(&x);

    report.iterations = outcome.iterations;
    report.best_cost = cost.value(&*result)?;
    report.stop_reason = if outcome.converged {
        LevelStop::Converged
    } else {
        LevelStop::MaxIterations
    };
    ctx.report(report.iterations, report.best_cost, report.best_cost, 0.0);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{CostTerm, DiffusionCost};
    use crate::minimizer::GradientDescent;
    use crate::progress::{CancellationCallback, HistoryCallback};
    use burn_ndarray::NdArray;
    use navreg_core::spatial::FVector;
    use navreg_core::{ScalarField, Spacing};

    type B = NdArray<f32>;

    fn blob(size: GridSize<2>, cx: f32, cy: f32) -> ScalarField<2> {
        ScalarField::from_fn(size, |[x, y]| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            (-(dx * dx + dy * dy) / 20.0).exp()
        })
    }

    fn image(field: &ScalarField<2>) -> Image<B, 2> {
        Image::from_field(field, Spacing::uniform(1.0), &Default::default())
    }

    fn config() -> RegistrationConfig {
        RegistrationConfig::default()
            .with_start_size(8)
            .with_max_iterations(40)
    }

    #[test]
    fn test_self_registration_is_identity() {
        let size = GridSize::new([24, 24]);
        let img = blob(size, 12.0, 12.0);
        let mut driver = MultiResolutionRegistration::<2>::from_config(config()).unwrap();
        let result = driver.run(image(&img), image(&img), 1).unwrap();

        assert!(result.final_cost < 1e-10);
        assert!(result.transform.max_displacement() < 0.5);
        assert_eq!(result.levels.len(), 1);
        assert_eq!(result.levels[0].stop_reason, LevelStop::Converged);
        assert!(!result.cancelled);
    }

    #[test]
    fn test_shifted_blob_cost_decreases() {
        let size = GridSize::new([32, 32]);
        let source = blob(size, 17.0, 16.0);
        let reference = blob(size, 15.0, 16.0);
        let mut driver = MultiResolutionRegistration::<2>::from_config(config()).unwrap();
        let result = driver.run(image(&source), image(&reference), 2).unwrap();

        let unregistered: f64 = source
            .as_slice()
            .iter()
            .zip(reference.as_slice())
            .map(|(&s, &r)| 0.5 * ((s - r) as f64).powi(2))
            .sum();
        assert_eq!(result.transform.size(), size);
        assert_eq!(result.levels[0].size, GridSize::new([16, 16]));
        assert!(result.final_cost < 0.5 * unregistered);
        // Sampling at x + u must move towards the source blob at +x.
        assert!(result.transform.field().get([15, 16])[0] > 0.0);
    }

    #[test]
    fn test_configured_level_count() {
        let size = GridSize::new([24, 24]);
        let source = blob(size, 13.0, 12.0);
        let reference = blob(size, 11.0, 12.0);
        let mut driver =
            MultiResolutionRegistration::<2>::from_config(config().with_levels(2)).unwrap();
        let result = driver.run_configured(image(&source), image(&reference)).unwrap();
        assert_eq!(result.levels.len(), 2);
        assert_eq!(result.levels[0].size, GridSize::new([12, 12]));
        assert_eq!(result.transform.size(), size);
    }

    #[test]
    fn test_fluid_large_shift_regrids_without_folding() {
        let size = GridSize::new([40, 40]);
        let source = blob(size, 25.0, 20.0);
        let reference = blob(size, 15.0, 20.0);
        let unregistered: f64 = source
            .as_slice()
            .iter()
            .zip(reference.as_slice())
            .map(|(&s, &r)| 0.5 * ((s - r) as f64).powi(2))
            .sum();
        let mut driver = MultiResolutionRegistration::<2>::from_descriptors(
            "navier:mu=1,lambda=1",
            "fluid:min=0.1,max=2.0",
            config().with_max_iterations(100),
        )
        .unwrap();
        let result = driver.run(image(&source), image(&reference), 1).unwrap();

        let level = &result.levels[0];
        assert!(level.regrids > 0);
        assert!(
            level.regrids < level.iterations,
            "{} regrids in {} iterations",
            level.regrids,
            level.iterations
        );
        let (min_det, _) = result.transform.jacobian_determinants().range();
        assert!(min_det > 0.0, "folded: {min_det}");
        assert!(result.final_cost < unregistered);
    }

    #[test]
    fn test_non_improving_steps_stagnate() {
        /// Grows with any displacement but reports a gradient pointing
        /// away from its minimum.
        struct Uphill;
        impl CostTerm<2> for Uphill {
            fn name(&self) -> &str {
                "uphill"
            }
            fn set_size(&mut self, _size: GridSize<2>) -> Result<()> {
                Ok(())
            }
            fn reinit(&mut self) -> Result<()> {
                Ok(())
            }
            fn value(&self, transform: &dyn Transformation<2>) -> Result<f64> {
                let u = transform.displacement();
                Ok(1.0 + u.iter().map(|v| v.norm_squared() as f64).sum::<f64>())
            }
            fn evaluate(
                &self,
                transform: &dyn Transformation<2>,
                gradient: &mut VectorField<2>,
            ) -> Result<f64> {
                for g in gradient.as_mut_slice() {
                    *g = FVector::<2>::new(-1.0, 0.0);
                }
                self.value(transform)
            }
            fn has(&self, _property: CostProperty) -> bool {
                true
            }
        }

        let mut driver = MultiResolutionRegistration::<2>::from_descriptors(
            "navier:mu=1,lambda=1",
            "direct:min=0.5,max=1.0",
            config(),
        )
        .unwrap();
        let mut cost = CostFunctionAggregator::new();
        cost.push(Box::new(Uphill));
        let result = driver.run_with_cost(&mut cost, GridSize::new([12, 12]), 1).unwrap();

        // The first failure halves the step, the second finds it at `min`.
        let level = &result.levels[0];
        assert_eq!(level.stop_reason, LevelStop::Stagnated);
        assert_eq!(level.iterations, 2);
        assert_eq!(level.best_cost, 1.0);
        assert_eq!(result.transform.max_displacement(), 0.0);
        assert_eq!(result.final_cost, 1.0);
    }

    #[test]
    fn test_regularized_branch() {
        let size = GridSize::new([24, 24]);
        let source = blob(size, 13.0, 12.0);
        let reference = blob(size, 11.0, 12.0);
        let optimizer = LevelOptimizer::Regularized {
            regularizer: VectorFieldRegularizer::from_descriptor("fluid:mu=1,lambda=1,maxiter=50")
                .unwrap(),
            time_step: TimeStepController::fluid(0.1, 1.0).unwrap(),
        };
        let mut driver = MultiResolutionRegistration::new(optimizer, config()).unwrap();
        let result = driver.run(image(&source), image(&reference), 1).unwrap();
        assert!(result.final_cost < result.levels[0].initial_cost);
    }

    #[test]
    fn test_parametric_branch_with_regularization_only() {
        // A diffusion cost alone is minimal for any constant field, so a
        // rough start must be smoothed out.
        let size = GridSize::new([6, 6]);
        let mut cost = CostFunctionAggregator::new();
        cost.push(Box::new(DiffusionCost::<2>::new(1.0).unwrap()));
        let optimizer = LevelOptimizer::Parametric {
            minimizer: Box::new(GradientDescent::new(0.1, 200)),
        };
        let mut driver = MultiResolutionRegistration::new(optimizer, config()).unwrap();
        let rough = move |s: GridSize<2>| {
            DisplacementFieldTransform::from_field(VectorField::from_fn(s, |[x, y]| {
                FVector::<2>::new(if (x + y) % 2 == 0 { 0.5 } else { -0.5 }, 0.0)
            }))
        };
        let result = driver.register(&mut cost, size, 1, rough).unwrap();
        assert!(result.final_cost < 0.5 * result.levels[0].initial_cost);
    }

    #[test]
    fn test_cancellation_returns_best_so_far() {
        let size = GridSize::new([24, 24]);
        let source = blob(size, 14.0, 12.0);
        let reference = blob(size, 11.0, 12.0);
        let history = Arc::new(HistoryCallback::new());
        let mut driver = MultiResolutionRegistration::<2>::from_config(config()).unwrap();
        driver.add_callback(history.clone());
        driver.add_callback(Arc::new(CancellationCallback::after(3)));

        let result = driver.run(image(&source), image(&reference), 2).unwrap();
        assert!(result.cancelled);
        assert_eq!(history.get_history().len(), 3);
        assert_eq!(result.levels.last().unwrap().stop_reason, LevelStop::Cancelled);
        assert_eq!(result.transform.size(), size);
        assert!(result.final_cost.is_finite());
    }

    #[test]
    fn test_cost_capability_is_checked() {
        struct ValueOnly;
        impl CostTerm<2> for ValueOnly {
            fn name(&self) -> &str {
                "value-only"
            }
            fn set_size(&mut self, _size: GridSize<2>) -> Result<()> {
                Ok(())
            }
            fn reinit(&mut self) -> Result<()> {
                Ok(())
            }
            fn value(&self, _transform: &dyn Transformation<2>) -> Result<f64> {
                Ok(0.0)
            }
            fn evaluate(
                &self,
                _transform: &dyn Transformation<2>,
                _gradient: &mut VectorField<2>,
            ) -> Result<f64> {
                Err(RegistrationError::cost("no gradient"))
            }
            fn has(&self, _property: CostProperty) -> bool {
                false
            }
        }

        let mut driver = MultiResolutionRegistration::<2>::from_config(config()).unwrap();
        let mut cost = CostFunctionAggregator::new();
        let err = driver.run_with_cost(&mut cost, GridSize::new([8, 8]), 1).unwrap_err();
        assert!(err.is_configuration());

        cost.push(Box::new(ValueOnly));
        let err = driver.run_with_cost(&mut cost, GridSize::new([8, 8]), 1).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingCapability(_)));
    }
}
