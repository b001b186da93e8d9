//! Gradient-based minimization over a flat parameter vector.
//!
//! Used by the parametric branch of the driver: the transformation exposes
//! its parameters as a flat vector and the cost function is wrapped into a
//! [`Problem`] by [`TransformationProblem`].

use navreg_core::{Transformation, VectorField};

use crate::cost::{CostFunctionAggregator, CostProperty};
use crate::error::{RegistrationError, Result};

/// Objective over a flat parameter vector.
pub trait Problem {
    /// Number of parameters.
    fn size(&self) -> usize;

    /// Objective value at `x`.
    fn f(&mut self, x: &[f64]) -> Result<f64>;

    /// Gradient at `x`, written into `gradient`.
    fn df(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<()>;

    /// Value and gradient at `x`.
    fn fdf(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<f64> {
        self.df(x, gradient)?;
        self.f(x)
    }
}

/// Outcome of one [`Minimizer::minimize`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MinimizerReport {
    pub iterations: usize,
    pub initial_value: f64,
    pub final_value: f64,
    /// Stopped on the gradient or improvement tolerance.
    pub converged: bool,
}

/// Numeric minimizer.
pub trait Minimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Minimize `problem` starting from `x`, leaving the best point in `x`.
    fn minimize(&self, problem: &mut dyn Problem, x: &mut [f64]) -> Result<MinimizerReport>;
}

/// Steepest descent with Armijo backtracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientDescent {
    /// Initial trial step.
    pub learning_rate: f64,
    pub max_iter: usize,
    /// Stop when the gradient norm or the relative improvement falls below.
    pub tolerance: f64,
}

const ARMIJO: f64 = 1.0e-4;
const MAX_BACKTRACKS: usize = 30;

impl Default for GradientDescent {
    fn default() -> Self {
        Self {
            learning_rate: 1.0,
            max_iter: 100,
            tolerance: 1.0e-6,
        }
    }
}

impl GradientDescent {
    pub fn new(learning_rate: f64, max_iter: usize) -> Self {
        Self {
            learning_rate,
            max_iter,
            ..Self::default()
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl Minimizer for GradientDescent {
    fn name(&self) -> &str {
        "gradient-descent"
    }

    fn minimize(&self, problem: &mut dyn Problem, x: &mut [f64]) -> Result<MinimizerReport> {
        if x.len() != problem.size() {
            return Err(RegistrationError::invalid_configuration(format!(
                "parameter vector has {} entries, problem expects {}",
                x.len(),
                problem.size()
            )));
        }
        let mut gradient = vec![0.0; x.len()];
        let mut trial = vec![0.0; x.len()];
        let mut value = problem.fdf(x, &mut gradient)?;
        let mut report = MinimizerReport {
            initial_value: value,
            final_value: value,
            ..MinimizerReport::default()
        };
        let mut step = self.learning_rate;

        while report.iterations < self.max_iter {
            let norm2: f64 = gradient.iter().map(|g| g * g).sum();
            if norm2.sqrt() < self.tolerance {
                report.converged = true;
                break;
            }

            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                for ((t, xi), g) in trial.iter_mut().zip(x.iter()).zip(&gradient) {
                    *t = xi - step * g;
                }
                let candidate = problem.f(&trial)?;
                if candidate <= value - ARMIJO * step * norm2 {
                    accepted = Some(candidate);
                    break;
                }
                step *= 0.5;
            }
            report.iterations += 1;

            let Some(candidate) = accepted else {
                tracing::debug!(
                    "{}: line search failed at iteration {}",
                    self.name(),
                    report.iterations
                );
                break;
            };
            x.copy_from_slice(&trial);
            let improvement = value - candidate;
            value = problem.fdf(x, &mut gradient)?;
            report.final_value = value;
            if improvement <= self.tolerance * value.abs().max(1.0) {
                report.converged = true;
                break;
            }
            step *= 2.0;
        }
        tracing::debug!(
            "{}: {} iterations, {:.6e} -> {:.6e}",
            self.name(),
            report.iterations,
            report.initial_value,
            report.final_value
        );
        Ok(report)
    }
}

/// Cost function seen as a function of a transformation's parameters.
pub struct TransformationProblem<'a, T: Transformation<D>, const D: usize> {
    cost: &'a CostFunctionAggregator<D>,
    transform: &'a mut T,
    voxel_gradient: VectorField<D>,
}

impl<'a, T: Transformation<D>, const D: usize> TransformationProblem<'a, T, D> {
    /// Wrap `cost` and `transform`. The cost must provide gradients and be
    /// sized for the transformation's grid.
    pub fn new(cost: &'a CostFunctionAggregator<D>, transform: &'a mut T) -> Result<Self> {
        if !cost.has(CostProperty::Gradient) {
            return Err(RegistrationError::missing_capability(
                "parametric optimization needs a cost function with gradients",
            ));
        }
        let size = transform.size();
        match cost.size() {
            None => {
                return Err(RegistrationError::not_initialized(
                    "cost function has no size",
                ))
            }
            Some(expected) if expected != size => {
                return Err(RegistrationError::size_mismatch(expected, size))
            }
            Some(_) => {}
        }
        Ok(Self {
            cost,
            transform,
            voxel_gradient: VectorField::new(size),
        })
    }
}

impl<T: Transformation<D>, const D: usize> Problem for TransformationProblem<'_, T, D> {
    fn size(&self) -> usize {
        self.transform.degrees_of_freedom()
    }

    fn f(&mut self, x: &[f64]) -> Result<f64> {
        self.transform.set_parameters(x);
        self.cost.value(&*self.transform)
    }

    fn df(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<()> {
        self.fdf(x, gradient).map(|_| ())
    }

    fn fdf(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<f64> {
        self.transform.set_parameters(x);
        let value = self.cost.evaluate(&*self.transform, &mut self.voxel_gradient)?;
        let translated = self.transform.translate_gradient(&self.voxel_gradient);
        gradient.copy_from_slice(&translated);
        Ok(value)
    }
}
