//! Parallel multi-colour successive over-relaxation.
//!
//! Voxels are split into `2^D` colours by the parity of their coordinates.
//! Every stencil neighbour of a voxel has a different colour, so all voxels
//! of one colour can be relaxed concurrently: each colour pass computes the
//! new values into a scratch buffer from a read-only view of the field and
//! then commits them. The result equals a sequential sweep in colour order.
//! Only interior voxels are relaxed; the boundary keeps its values.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use navreg_core::spatial::FVector;
use navreg_core::{GridSize, VectorField};

use super::kernel::RelaxationKernel;
use crate::error::{RegistrationError, Result};

/// Residual growth over the first sweep treated as divergence.
const DIVERGENCE_FACTOR: f32 = 1.0e3;

/// Voxel selection of each sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelaxationMode {
    /// Relax every interior voxel in every sweep.
    #[default]
    Sor,
    /// After the first sweep, relax only voxels next to a residual above
    /// `residual / (N + iteration)`.
    GaussSouthwell,
}

/// Reference residual of the relative stopping test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelativeCriterion {
    /// Stop once `r / r0` falls below the relative epsilon.
    #[default]
    Initial,
    /// Stop once the residual plateaus: `|r_prev - r| / r_prev` falls below
    /// the relative epsilon.
    Previous,
}

impl RelativeCriterion {
    fn reached(self, residual: f32, initial: f32, previous: f32, relative_epsilon: f32) -> bool {
        match self {
            Self::Initial => initial > 0.0 && residual / initial < relative_epsilon,
            Self::Previous => {
                previous > 0.0 && (previous - residual).abs() / previous < relative_epsilon
            }
        }
    }
}

/// Outcome of one [`SorSolver::solve`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveReport {
    /// Number of sweeps performed.
    pub iterations: usize,
    /// Residual (sum of update norms) of the first sweep.
    pub initial_residual: f32,
    /// Residual of the last sweep.
    pub final_residual: f32,
    /// Stopped on a residual criterion rather than the sweep cap.
    pub converged: bool,
    /// Stopped because the residual blew up.
    pub diverged: bool,
}

/// Successive over-relaxation driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SorSolver {
    /// Relaxation factor `omega`.
    pub omega: f32,
    /// Absolute residual threshold.
    pub epsilon: f32,
    /// Threshold of the relative stopping test.
    pub relative_epsilon: f32,
    pub criterion: RelativeCriterion,
    /// Sweep cap.
    pub max_iter: usize,
    pub mode: RelaxationMode,
}

impl Default for SorSolver {
    fn default() -> Self {
        Self {
            omega: 1.0,
            epsilon: 1.0e-4,
            relative_epsilon: 1.0e-5,
            criterion: RelativeCriterion::Initial,
            max_iter: 100,
            mode: RelaxationMode::Sor,
        }
    }
}

impl SorSolver {
    pub fn new(omega: f32, epsilon: f32, max_iter: usize) -> Self {
        Self {
            omega,
            epsilon,
            max_iter,
            ..Self::default()
        }
    }

    pub fn with_relative_epsilon(mut self, relative_epsilon: f32) -> Self {
        self.relative_epsilon = relative_epsilon;
        self
    }

    pub fn with_criterion(mut self, criterion: RelativeCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_mode(mut self, mode: RelaxationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Relax `v` towards the solution of the kernel's system for `force`.
    ///
    /// `v` is used as the initial guess. The kernel must be prepared for the
    /// grid of `v` and `force`.
    pub fn solve<const D: usize>(
        &self,
        kernel: &dyn RelaxationKernel<D>,
        force: &VectorField<D>,
        v: &mut VectorField<D>,
    ) -> Result<SolveReport> {
        let size = v.size();
        match kernel.prepared_size() {
            None => {
                return Err(RegistrationError::not_initialized(format!(
                    "kernel '{}' has not been prepared for a grid",
                    kernel.name()
                )))
            }
            Some(prepared) if prepared != size => {
                return Err(RegistrationError::size_mismatch(prepared, size))
            }
            Some(_) => {}
        }
        if force.size() != size {
            return Err(RegistrationError::size_mismatch(size, force.size()));
        }

        let mut report = SolveReport::default();
        if !size.has_interior() || self.max_iter == 0 {
            tracing::debug!("Grid {} has no interior voxel, skipping relaxation", size);
            report.converged = true;
            return Ok(report);
        }

        let mut scaled = force.clone();
        scaled.scale(kernel.force_scale());

        let n = size.len();
        let mut scratch = v.as_slice().to_vec();
        let mut residua = vec![0.0f32; n];
        let mut active = vec![true; n];
        let offsets = neighbourhood_offsets(&size);
        let mut residual = 0.0f32;

        while report.iterations < self.max_iter {
            let restrict = self.mode == RelaxationMode::GaussSouthwell && report.iterations > 0;
            if restrict {
                let threshold = residual / (n + report.iterations) as f32;
                mark_active(&size, &offsets, &residua, threshold, &mut active);
            }

            let mut swept = 0.0f32;
            for color in 0..(1usize << D) {
                swept += relax_color(
                    kernel,
                    &size,
                    color,
                    self.omega,
                    scaled.as_slice(),
                    v.as_slice(),
                    restrict.then_some(active.as_slice()),
                    &mut scratch,
                    &mut residua,
                );
                commit_color(
                    &size,
                    color,
                    restrict.then_some(active.as_slice()),
                    &scratch,
                    v.as_mut_slice(),
                );
            }

            residual = match self.mode {
                RelaxationMode::Sor => swept,
                RelaxationMode::GaussSouthwell => residua.par_iter().sum(),
            };
            report.iterations += 1;
            if report.iterations == 1 {
                report.initial_residual = residual;
            }
            let previous = report.final_residual;
            report.final_residual = residual;

            if !residual.is_finite() || residual > report.initial_residual * DIVERGENCE_FACTOR {
                tracing::warn!(
                    "{} relaxation diverged after {} sweeps: residual {} (initial {})",
                    kernel.name(),
                    report.iterations,
                    residual,
                    report.initial_residual
                );
                report.diverged = true;
                break;
            }
            let relative = report.iterations > 1
                && self
                    .criterion
                    .reached(residual, report.initial_residual, previous, self.relative_epsilon);
            if residual < self.epsilon || relative {
                report.converged = true;
                break;
            }
        }

        if !report.converged && !report.diverged {
            tracing::debug!(
                "{} relaxation hit the sweep cap {}: residual {} (initial {})",
                kernel.name(),
                self.max_iter,
                report.final_residual,
                report.initial_residual
            );
        }
        Ok(report)
    }
}

/// Relax a single interior voxel in place and return the update norm.
pub fn solve_at<const D: usize>(
    kernel: &dyn RelaxationKernel<D>,
    v: &mut [FVector<D>],
    scaled_force: &FVector<D>,
    index: usize,
    omega: f32,
) -> f32 {
    let target = kernel.relax_at(v, scaled_force, index);
    let delta = (target - v[index]) * omega;
    v[index] += delta;
    delta.norm()
}

/// Whether the row starting at `row_start` is interior and carries `color`
/// in its non-x coordinates.
fn row_has_color<const D: usize>(size: &GridSize<D>, row_start: usize, color: usize) -> bool {
    let coord = size.coord(row_start);
    (1..D).all(|axis| {
        let c = coord[axis];
        c >= 1 && c + 1 < size.dim(axis) && (c & 1) == ((color >> axis) & 1)
    })
}

#[allow(clippy::too_many_arguments)]
fn relax_color<const D: usize>(
    kernel: &dyn RelaxationKernel<D>,
    size: &GridSize<D>,
    color: usize,
    omega: f32,
    force: &[FVector<D>],
    current: &[FVector<D>],
    active: Option<&[bool]>,
    next: &mut [FVector<D>],
    residua: &mut [f32],
) -> f32 {
    let nx = size.row_len();
    let first = if color & 1 == 1 { 1 } else { 2 };
    next.par_chunks_mut(nx)
        .zip(residua.par_chunks_mut(nx))
        .enumerate()
        .map(|(row, (out, res))| {
            let base = row * nx;
            if !row_has_color(size, base, color) {
                return 0.0;
            }
            let mut sum = 0.0f32;
            for x in (first..nx - 1).step_by(2) {
                let index = base + x;
                if active.map_or(false, |a| !a[index]) {
                    continue;
                }
                let old = current[index];
                let target = kernel.relax_at(current, &force[index], index);
                let delta = (target - old) * omega;
                out[x] = old + delta;
                res[x] = delta.norm();
                sum += res[x];
            }
            sum
        })
        .sum()
}

fn commit_color<const D: usize>(
    size: &GridSize<D>,
    color: usize,
    active: Option<&[bool]>,
    next: &[FVector<D>],
    current: &mut [FVector<D>],
) {
    let nx = size.row_len();
    let first = if color & 1 == 1 { 1 } else { 2 };
    current
        .par_chunks_mut(nx)
        .zip(next.par_chunks(nx))
        .enumerate()
        .for_each(|(row, (dst, src))| {
            let base = row * nx;
            if !row_has_color(size, base, color) {
                return;
            }
            for x in (first..nx - 1).step_by(2) {
                if active.map_or(true, |a| a[base + x]) {
                    dst[x] = src[x];
                }
            }
        });
}

/// Linear offsets of the full 3^D neighbourhood, centre included.
fn neighbourhood_offsets<const D: usize>(size: &GridSize<D>) -> Vec<isize> {
    let strides = size.strides();
    let mut offsets = vec![0isize];
    for &s in &strides {
        let s = s as isize;
        offsets = offsets.iter().flat_map(|&o| [o - s, o, o + s]).collect();
    }
    offsets
}

fn mark_active<const D: usize>(
    size: &GridSize<D>,
    offsets: &[isize],
    residua: &[f32],
    threshold: f32,
    active: &mut [bool],
) {
    active.par_iter_mut().enumerate().for_each(|(index, flag)| {
        *flag = size.is_interior(size.coord(index))
            && offsets
                .iter()
                .any(|&o| residua[(index as isize + o) as usize] > threshold);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{LaplaceKernel, NavierKernel};

    /// Kernel whose fixed point target is `gain * v + shift`, independent of
    /// the neighbours.
    #[derive(Clone)]
    struct Affine {
        gain: f32,
        size: Option<GridSize<2>>,
    }

    impl Affine {
        fn prepared(gain: f32, size: GridSize<2>) -> Self {
            Self { gain, size: Some(size) }
        }
    }

    impl RelaxationKernel<2> for Affine {
        fn name(&self) -> &'static str {
            "affine"
        }
        fn prepare(&mut self, size: GridSize<2>) {
            self.size = Some(size);
        }
        fn prepared_size(&self) -> Option<GridSize<2>> {
            self.size
        }
        fn force_scale(&self) -> f32 {
            1.0
        }
        fn relax_at(
            &self,
            v: &[FVector<2>],
            _scaled_force: &FVector<2>,
            index: usize,
        ) -> FVector<2> {
            v[index] * self.gain + FVector::<2>::new(1.0, 0.0)
        }
        fn boxed_clone(&self) -> Box<dyn RelaxationKernel<2>> {
            Box::new(self.clone())
        }
    }

    fn prepared<const D: usize>(size: GridSize<D>) -> NavierKernel<D> {
        let mut k = NavierKernel::new(1.0, 1.0);
        k.prepare(size);
        k
    }

    #[test]
    fn test_zero_force_is_fixed_point() {
        let size = GridSize::new([9, 9]);
        let kernel = prepared(size);
        let force = VectorField::new(size);
        let mut v = VectorField::new(size);
        let report = SorSolver::default().solve(&kernel, &force, &mut v).unwrap();
        assert!(report.converged);
        assert_eq!(report.final_residual, 0.0);
        assert_eq!(v.max_norm(), 0.0);
    }

    #[test]
    fn test_solve_at_2d_known_stencil() {
        let size = GridSize::new([3, 3]);
        let mut v = VectorField::<2>::new(size);
        v.set([0, 0], FVector::<2>::new(2.0, 3.0));
        v.set([2, 2], FVector::<2>::new(3.0, 2.0));
        v.set([1, 1], FVector::<2>::new(1.0, -1.0));
        let mut kernel = NavierKernel::<2>::new(1.0, 2.0);
        kernel.prepare(size);

        let centre = size.linear_index([1, 1]);
        let norm = solve_at(&kernel, v.as_mut_slice(), &FVector::<2>::new(1.0, 2.0), centre, 1.5);
        // target (1.375, 2.375), delta = 1.5 * (target - (1, -1))
        let delta = FVector::<2>::new(0.5625, 5.0625);
        assert!((norm - delta.norm()).abs() < 1e-5);
        assert!((v[centre] - FVector::<2>::new(1.5625, 4.0625)).norm() < 1e-5);
    }

    #[test]
    fn test_solve_at_3d_known_stencil() {
        // v = (xy, 2yz, 3xz) on a 3x3x3 grid, b = (1, 2, 3), mu = 1,
        // lambda = 2, omega = 2: update (3.5, 4.5, 7) to (4.5, 6.5, 10).
        let size = GridSize::new([3, 3, 3]);
        let mut v = VectorField::from_fn(size, |[x, y, z]| {
            let (x, y, z) = (x as f32, y as f32, z as f32);
            FVector::<3>::new(x * y, 2.0 * z * y, 3.0 * x * z)
        });
        let mut kernel = NavierKernel::<3>::new(1.0, 2.0);
        kernel.prepare(size);

        let centre = size.linear_index([1, 1, 1]);
        let force = FVector::<3>::new(1.0, 2.0, 3.0);
        let norm = solve_at(&kernel, v.as_mut_slice(), &force, centre, 2.0);
        assert!((norm - FVector::<3>::new(3.5, 4.5, 7.0).norm()).abs() < 1e-5);
        assert!((v[centre] - FVector::<3>::new(4.5, 6.5, 10.0)).norm() < 1e-5);
    }

    #[test]
    fn test_parallel_sweep_matches_sequential_colour_order() {
        let size = GridSize::new([7, 6]);
        let kernel = prepared(size);
        let force = VectorField::from_fn(size, |[x, y]| {
            FVector::<2>::new((x as f32).sin(), (y as f32).cos())
        });
        let mut parallel = VectorField::new(size);
        SorSolver::new(1.2, 0.0, 1)
            .with_relative_epsilon(0.0)
            .solve(&kernel, &force, &mut parallel)
            .unwrap();

        let mut scaled = force.clone();
        scaled.scale(kernel.force_scale());
        let mut sequential = VectorField::new(size);
        for color in 0..4usize {
            for index in 0..size.len() {
                let [x, y] = size.coord(index);
                if size.is_interior([x, y]) && (x & 1) | ((y & 1) << 1) == color {
                    solve_at(&kernel, sequential.as_mut_slice(), &scaled[index], index, 1.2);
                }
            }
        }
        for index in 0..size.len() {
            assert!((parallel[index] - sequential[index]).norm() < 1e-6);
        }
    }

    #[test]
    fn test_laplace_converges_to_linear_profile() {
        // Fixed boundary values of a linear ramp, zero force: the interior
        // must relax to the ramp.
        let size = GridSize::new([8, 8]);
        let mut kernel = LaplaceKernel::<2>::new(1.0);
        kernel.prepare(size);
        let exact = VectorField::from_fn(size, |[x, _]| FVector::<2>::new(x as f32, 0.0));
        let mut v = VectorField::from_fn(size, |c| {
            if size.is_interior(c) {
                FVector::zeros()
            } else {
                exact.get(c)
            }
        });

        let report = SorSolver::new(1.5, 1e-4, 2000)
            .with_relative_epsilon(0.0)
            .solve(&kernel, &VectorField::new(size), &mut v)
            .unwrap();
        assert!(report.converged);
        assert!(report.final_residual < report.initial_residual);
        for index in 0..size.len() {
            assert!((v[index] - exact[index]).norm() < 1e-2);
        }
    }

    #[test]
    fn test_gauss_southwell_reaches_same_solution() {
        let size = GridSize::new([10, 10]);
        let kernel = prepared(size);
        let force = VectorField::from_fn(size, |[x, y]| {
            if (3..7).contains(&x) && (3..7).contains(&y) {
                FVector::<2>::new(1.0, -0.5)
            } else {
                FVector::zeros()
            }
        });
        let solver = SorSolver::new(1.0, 1e-7, 3000).with_relative_epsilon(0.0);
        let mut sor = VectorField::new(size);
        solver.solve(&kernel, &force, &mut sor).unwrap();
        let mut gs = VectorField::new(size);
        let report = solver
            .with_mode(RelaxationMode::GaussSouthwell)
            .solve(&kernel, &force, &mut gs)
            .unwrap();

        assert!(report.iterations > 1);
        let mut diff = sor.clone();
        diff.add_scaled(&gs, -1.0);
        assert!(diff.max_norm() < 1e-3 * sor.max_norm().max(1.0));
    }

    #[test]
    fn test_unprepared_kernel_is_rejected() {
        let size = GridSize::new([5, 5]);
        let kernel = NavierKernel::<2>::new(1.0, 1.0);
        let mut v = VectorField::new(size);
        let err = SorSolver::default().solve(&kernel, &VectorField::new(size), &mut v).unwrap_err();
        assert!(matches!(err, RegistrationError::NotInitialized(_)));

        let other = prepared(GridSize::new([6, 5]));
        let err = SorSolver::default().solve(&other, &VectorField::new(size), &mut v).unwrap_err();
        assert!(matches!(err, RegistrationError::SizeMismatch { .. }));
    }

    #[test]
    fn test_plateau_stops_on_previous_sweep_criterion() {
        // Every sweep moves each interior voxel by exactly one, so the
        // residual never changes.
        let size = GridSize::new([6, 6]);
        let kernel = Affine::prepared(1.0, size);
        let force = VectorField::new(size);
        let solver = SorSolver::new(1.0, 1e-12, 500).with_relative_epsilon(0.1);

        let mut v = VectorField::new(size);
        let report = solver
            .with_criterion(RelativeCriterion::Previous)
            .solve(&kernel, &force, &mut v)
            .unwrap();
        assert_eq!(report.iterations, 2);
        assert!(report.converged);
        assert_eq!(report.final_residual, report.initial_residual);

        let mut v = VectorField::new(size);
        let report = solver.solve(&kernel, &force, &mut v).unwrap();
        assert_eq!(report.iterations, 500);
        assert!(!report.converged);
    }

    #[test]
    fn test_growing_residual_is_not_a_plateau() {
        let size = GridSize::new([5, 5]);
        let kernel = Affine::prepared(2.0, size);
        let mut v = VectorField::new(size);
        let report = SorSolver::new(1.0, 1e-12, 4)
            .with_relative_epsilon(0.5)
            .with_criterion(RelativeCriterion::Previous)
            .solve(&kernel, &VectorField::new(size), &mut v)
            .unwrap();
        assert_eq!(report.iterations, 4);
        assert!(!report.converged);
    }

    #[test]
    fn test_divergence_returns_partial_field() {
        // delta_k = 4^(k-1): the residual passes 1000 times the first one
        // in the sixth sweep.
        let size = GridSize::new([5, 5]);
        let kernel = Affine::prepared(4.0, size);
        let mut v = VectorField::new(size);
        let report = SorSolver::new(1.0, 1e-12, 100)
            .solve(&kernel, &VectorField::new(size), &mut v)
            .unwrap();

        assert!(report.diverged);
        assert!(!report.converged);
        assert_eq!(report.iterations, 6);
        assert!(report.final_residual > 1.0e3 * report.initial_residual);
        let expected = (4.0f32.powi(6) - 1.0) / 3.0;
        assert_eq!(v.get([2, 2]), FVector::<2>::new(expected, 0.0));
        assert_eq!(v.get([0, 2]), FVector::<2>::zeros());
    }

    #[test]
    fn test_flat_grid_is_left_untouched() {
        let size = GridSize::new([16, 2]);
        let kernel = prepared(size);
        let force = VectorField::from_fn(size, |_| FVector::<2>::new(1.0, 1.0));
        let mut v = VectorField::new(size);
        let report = SorSolver::default().solve(&kernel, &force, &mut v).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(v.max_norm(), 0.0);
    }
}
