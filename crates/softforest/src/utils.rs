//! Common utilities used across the crate.
//!
//! This module provides parallelism configuration and the numeric floors
//! shared by the loss evaluator and the gradient engine.

use rayon::prelude::*;

// =============================================================================
// Numeric Floors
// =============================================================================

/// Lower bound applied to the true-class probability inside `-ln(p)`.
///
/// The loss is accumulated in `f64`, so the floor matches the multiclass
/// log-loss metric convention.
pub const LOSS_EPSILON: f64 = 1e-15;

/// Lower bound applied to any `f32` probability used as a divisor
/// (class probability in gradients and leaf re-estimation).
pub const DIVISOR_FLOOR: f32 = 1e-12;

/// Floor a probability before dividing by it.
///
/// Returns the floored value and whether the floor was applied. NaN is
/// treated as degenerate and replaced by the floor.
#[inline]
pub fn floor_divisor(p: f32) -> (f32, bool) {
    if p >= DIVISOR_FLOOR && p.is_finite() {
        (p, false)
    } else if p.is_infinite() && p > 0.0 {
        (f32::MAX, true)
    } else {
        (DIVISOR_FLOOR, true)
    }
}

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// Kernels receive this flag and either use `rayon` parallel iterators or
/// plain sequential iteration. The actual thread pool is set up at the layer
/// level via `n_threads`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Create from thread count semantics.
    ///
    /// - 0 = auto (parallel if rayon pool has multiple threads, sequential otherwise)
    /// - 1 = sequential
    /// - >1 = parallel
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    /// Run `f` on every item, bridging a sequential iterator onto the pool
    /// when parallel.
    ///
    /// Ordering is not preserved in parallel mode, so `f` must only write to
    /// state owned by its item (e.g. disjoint rows from `outer_iter_mut`).
    #[inline]
    pub fn maybe_par_bridge_for_each<T, I, F>(self, iter: I, f: F)
    where
        T: Send,
        I: Iterator<Item = T> + Send,
        F: Fn(T) + Sync + Send,
    {
        if self.is_parallel() {
            iter.par_bridge().for_each(f);
        } else {
            iter.for_each(f);
        }
    }
}

// =============================================================================
// Thread Pool Setup
// =============================================================================

/// Thread pool owned by a layer for the lifetime of its configuration.
///
/// Thread count semantics:
/// - `0` = auto (use the global rayon pool)
/// - `1` = sequential (no thread pool)
/// - `n > 1` = use exactly `n` threads
///
/// If a dedicated pool cannot be created, work runs on the global pool.
#[derive(Debug)]
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    parallelism: Parallelism,
}

impl WorkerPool {
    pub fn new(n_threads: usize) -> Self {
        let parallelism = Parallelism::from_threads(n_threads);
        let pool = match parallelism {
            Parallelism::Parallel if n_threads > 1 => rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .build()
                .ok(),
            _ => None,
        };
        Self { pool, parallelism }
    }

    #[inline]
    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Run a closure inside the pool (if any) with the pool's parallelism.
    #[inline]
    pub fn install<T: Send>(&self, f: impl FnOnce(Parallelism) -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(|| f(self.parallelism)),
            None => f(self.parallelism),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_divisor_passes_regular_values() {
        assert_eq!(floor_divisor(0.25), (0.25, false));
        assert_eq!(floor_divisor(1.0), (1.0, false));
    }

    #[test]
    fn floor_divisor_clamps_degenerate_values() {
        assert_eq!(floor_divisor(0.0), (DIVISOR_FLOOR, true));
        assert_eq!(floor_divisor(-1.0), (DIVISOR_FLOOR, true));
        assert_eq!(floor_divisor(f32::NAN), (DIVISOR_FLOOR, true));
        assert_eq!(floor_divisor(f32::INFINITY), (f32::MAX, true));
    }

    #[test]
    fn parallelism_from_threads() {
        assert_eq!(Parallelism::from_threads(1), Parallelism::Sequential);
        assert_eq!(Parallelism::from_threads(4), Parallelism::Parallel);
    }

    #[test]
    fn worker_pool_sequential() {
        let pool = WorkerPool::new(1);
        assert_eq!(pool.install(|p| p), Parallelism::Sequential);
    }

    #[test]
    fn worker_pool_dedicated_threads() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.install(|_| rayon::current_num_threads()), 2);
        assert_eq!(pool.parallelism(), Parallelism::Parallel);
    }
}
