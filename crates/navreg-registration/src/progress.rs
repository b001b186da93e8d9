//! Progress tracking, callbacks and cooperative cancellation.
//!
//! The driver reports once per outer iteration through a
//! [`ProgressTracker`], which fans the report out to every registered
//! [`ProgressCallback`] and polls them for cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Progress of one outer registration iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Pyramid level, 0 is the coarsest.
    pub level: usize,
    /// Number of pyramid levels.
    pub levels: usize,
    /// Iteration within the level.
    pub iteration: usize,
    /// Iteration cap of the level.
    pub max_iterations: usize,
    /// Cost after the iteration.
    pub cost: f64,
    /// Best cost of the level so far.
    pub best_cost: f64,
    /// Relative step of the time-step controller.
    pub step: f64,
    /// Time since [`ProgressTracker::start`].
    pub elapsed: Duration,
    /// Additional metrics.
    pub metrics: Vec<(String, f64)>,
}

impl ProgressInfo {
    pub fn new(
        level: usize,
        levels: usize,
        iteration: usize,
        max_iterations: usize,
        cost: f64,
    ) -> Self {
        Self {
            level,
            levels,
            iteration,
            max_iterations,
            cost,
            best_cost: cost,
            step: 0.0,
            elapsed: Duration::ZERO,
            metrics: Vec::new(),
        }
    }

    /// Share of the level's iteration cap used so far, in percent.
    pub fn level_percent(&self) -> f64 {
        if self.max_iterations == 0 {
            return 100.0;
        }
        (self.iteration as f64 / self.max_iterations as f64) * 100.0
    }

    /// Add a custom metric.
    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push((name.into(), value));
    }
}

/// Observer of a registration run.
pub trait ProgressCallback: Send + Sync {
    /// Called after every outer iteration.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when the run starts.
    fn on_start(&self) {}

    /// Called when a pyramid level starts.
    fn on_level_start(&self, _level: usize, _levels: usize, _size: &str) {}

    /// Called when the run completes.
    fn on_complete(&self, _final_cost: f64, _elapsed: Duration) {}

    /// Called when the run fails.
    fn on_error(&self, _error: &str) {}

    /// Polled once per outer iteration; `true` stops the run with the best
    /// transformation found so far.
    fn cancel_requested(&self) -> bool {
        false
    }
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log every `log_interval` iterations.
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.iteration == info.max_iterations {
            tracing::info!(
                "Level {}/{} iter {}/{} ({:.1}%) | Cost: {:.6} | Best: {:.6} | \
                 Step: {:.3} | Elapsed: {:.2}s",
                info.level + 1,
                info.levels,
                info.iteration,
                info.max_iterations,
                info.level_percent(),
                info.cost,
                info.best_cost,
                info.step,
                info.elapsed.as_secs_f64()
            );
            for (name, value) in &info.metrics {
                tracing::info!("  {}: {:.6}", name, value);
            }
        }
    }

    fn on_start(&self) {
        tracing::info!("Registration started");
    }

    fn on_level_start(&self, level: usize, levels: usize, size: &str) {
        tracing::info!("Level {}/{} on grid {}", level + 1, levels, size);
    }

    fn on_complete(&self, final_cost: f64, elapsed: Duration) {
        tracing::info!(
            "Registration completed in {:.2}s with final cost: {:.6}",
            elapsed.as_secs_f64(),
            final_cost
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every progress report.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded reports in arrival order.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        lock(&self.history).clone()
    }

    pub fn clear(&self) {
        lock(&self.history).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        lock(&self.history).push(info.clone());
    }
}

/// Cancellation token shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationCallback {
    flag: Arc<AtomicBool>,
    /// Cancel on its own after this many progress reports.
    after: Option<usize>,
    seen: Arc<Mutex<usize>>,
}

impl CancellationCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation once `reports` progress reports have arrived.
    pub fn after(reports: usize) -> Self {
        Self {
            after: Some(reports),
            ..Self::default()
        }
    }

    /// Request cancellation; the run stops at its next poll.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        *lock(&self.seen) = 0;
    }
}

impl ProgressCallback for CancellationCallback {
    fn on_progress(&self, _info: &ProgressInfo) {
        let mut seen = lock(&self.seen);
        *seen += 1;
        if self.after.is_some_and(|n| *seen >= n) {
            self.cancel();
        }
    }

    fn cancel_requested(&self) -> bool {
        self.is_cancelled()
    }
}

/// Fans progress out to several callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.add_callback(callback);
        self
    }

    /// Time since [`Self::start`].
    pub fn elapsed(&self) -> Duration {
        let start = *lock(&self.start_time);
        start.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn start(&self) {
        *lock(&self.start_time) = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    pub fn level_start(&self, level: usize, levels: usize, size: &str) {
        for callback in &self.callbacks {
            callback.on_level_start(level, levels, size);
        }
    }

    /// Stamp the elapsed time onto `info` and broadcast it.
    pub fn update(&self, mut info: ProgressInfo) {
        info.elapsed = self.elapsed();
        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    pub fn complete(&self, final_cost: f64) {
        let elapsed = self.elapsed();
        for callback in &self.callbacks {
            callback.on_complete(final_cost, elapsed);
        }
    }

    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }

    /// Whether any callback asks to stop.
    pub fn is_cancelled(&self) -> bool {
        self.callbacks.iter().any(|c| c.cancel_requested())
    }
}
