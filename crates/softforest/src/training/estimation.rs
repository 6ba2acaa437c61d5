//! Iterative leaf-weight re-estimation.
//!
//! An EM-style alternative to gradient training of the leaf weights. The
//! routing activations are held fixed (their gradient is zero) while the
//! weights are re-estimated from the class responsibilities of every leaf:
//!
//! ```text
//! acc[y, l] += weight[y, l] * mu[i, l] / prob[i, y]     for each sample i with label y
//! weight[:, l] = acc[:, l] / Σ_c acc[c, l]              at the end of a window
//! ```
//!
//! Batches are grouped into windows of `window` iterations. The last batch of
//! a window normalizes instead of accumulating. Weights restart from uniform
//! at the first batch of every `period + 1`-th window.

use ndarray::{Array2, ArrayView1, ArrayView2, Zip};

use crate::repr::{normalize_columns, ForestShape, LeafWeights};
use crate::training::backprop::count_floored;
use crate::utils::floor_divisor;

// =============================================================================
// Window Schedule
// =============================================================================

/// What a batch contributes to the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorPhase {
    /// Add the batch's responsibilities to the accumulator.
    Accumulating,
    /// Normalize the accumulator into the live weights and clear it.
    Normalizing,
}

/// Transition taken at one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStep {
    /// Weights go back to uniform and the accumulator is cleared first.
    pub reset: bool,
    pub phase: EstimatorPhase,
}

/// Guards of the re-estimation state machine, driven by an iteration counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSchedule {
    window: u64,
    period: u64,
}

impl WindowSchedule {
    /// `window` must be at least 1 (enforced by config validation).
    pub fn new(window: usize, period: usize) -> Self {
        debug_assert!(window >= 1);
        Self {
            window: window.max(1) as u64,
            period: period as u64,
        }
    }

    #[inline]
    pub fn window(&self) -> u64 {
        self.window
    }

    #[inline]
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Transition for the batch with zero-based index `iteration`.
    ///
    /// - reset: `(t / M + 1) mod (P + 1) == 1` and `t mod M == 0`
    /// - normalize: `(t + 1) mod M == 0`, otherwise accumulate
    ///
    /// Both guards are evaluated without forming `t + 1`, so every `u64`
    /// counter is accepted.
    pub fn step(&self, iteration: u64) -> WindowStep {
        let m = self.window;
        let cycle = self.period.saturating_add(1);
        // (q + 1) mod c == 1  <=>  q mod c == 0, except for c == 1 where it never holds.
        let reset = cycle > 1 && (iteration / m) % cycle == 0 && iteration % m == 0;
        let phase = if iteration % m != m - 1 {
            EstimatorPhase::Accumulating
        } else {
            EstimatorPhase::Normalizing
        };
        WindowStep { reset, phase }
    }
}

// =============================================================================
// LeafEstimator
// =============================================================================

/// Result of one re-estimation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimationOutcome {
    pub step: WindowStep,
    /// Leaf columns with a zero or non-finite sum that fell back to uniform.
    pub degenerate_columns: usize,
    /// Samples whose class probability was floored before dividing.
    pub clamped: usize,
}

/// Re-estimation state carried across mini-batches.
#[derive(Debug, Clone)]
pub struct LeafEstimator {
    schedule: WindowSchedule,
    accumulator: Array2<f32>,
}

impl LeafEstimator {
    pub fn new(shape: &ForestShape, schedule: WindowSchedule) -> Self {
        Self {
            schedule,
            accumulator: Array2::zeros((shape.num_output(), shape.leaf_num_total())),
        }
    }

    #[inline]
    pub fn schedule(&self) -> &WindowSchedule {
        &self.schedule
    }

    /// Pending `(num_output, leaf_num_total)` accumulator.
    #[inline]
    pub fn accumulator(&self) -> ArrayView2<'_, f32> {
        self.accumulator.view()
    }

    /// Run the transition for `iteration` on one batch.
    ///
    /// `mu` is `[n, leaf_num_total]`, `prob` is `[n, num_output]`; labels must
    /// already be validated.
    pub fn step(
        &mut self,
        iteration: u64,
        weights: &mut LeafWeights,
        mu: ArrayView2<'_, f32>,
        prob: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, u32>,
    ) -> EstimationOutcome {
        let step = self.schedule.step(iteration);
        if step.reset {
            weights.reset_uniform();
            self.accumulator.fill(0.0);
        }

        match step.phase {
            EstimatorPhase::Accumulating => {
                self.accumulate(weights, mu, prob, labels);
                EstimationOutcome {
                    step,
                    degenerate_columns: 0,
                    clamped: count_floored(prob, labels),
                }
            }
            EstimatorPhase::Normalizing => {
                let degenerate_columns = normalize_columns(self.accumulator.view_mut());
                weights.assign(self.accumulator.view());
                self.accumulator.fill(0.0);
                EstimationOutcome {
                    step,
                    degenerate_columns,
                    clamped: 0,
                }
            }
        }
    }

    fn accumulate(
        &mut self,
        weights: &LeafWeights,
        mu: ArrayView2<'_, f32>,
        prob: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, u32>,
    ) {
        for (i, &label) in labels.iter().enumerate() {
            let y = label as usize;
            let (p, _) = floor_divisor(prob[[i, y]]);
            Zip::from(self.accumulator.row_mut(y))
                .and(weights.class_row(y))
                .and(mu.row(i))
                .for_each(|acc, &w, &m| *acc += w * m / p);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use crate::repr::WeightInit;

    fn phases(schedule: &WindowSchedule, n: u64) -> Vec<(bool, EstimatorPhase)> {
        (0..n).map(|t| schedule.step(t)).map(|s| (s.reset, s.phase)).collect()
    }

    #[test]
    fn window_one_period_one_resets_every_other_batch() {
        let schedule = WindowSchedule::new(1, 1);
        let resets: Vec<bool> = (0..6).map(|t| schedule.step(t).reset).collect();
        assert_eq!(resets, vec![true, false, true, false, true, false]);
        assert!((0..6).all(|t| schedule.step(t).phase == EstimatorPhase::Normalizing));
    }

    #[test]
    fn window_three_schedule() {
        use EstimatorPhase::*;
        let schedule = WindowSchedule::new(3, 1);
        assert_eq!(
            phases(&schedule, 9),
            vec![
                (true, Accumulating),
                (false, Accumulating),
                (false, Normalizing),
                (false, Accumulating),
                (false, Accumulating),
                (false, Normalizing),
                (true, Accumulating),
                (false, Accumulating),
                (false, Normalizing),
            ]
        );
    }

    #[test]
    fn guards_match_closed_form() {
        for (window, period) in [(1usize, 0usize), (1, 1), (2, 1), (3, 2), (4, 0), (5, 3)] {
            let schedule = WindowSchedule::new(window, period);
            let (m, p) = (window as u64, period as u64);
            for t in 0..200u64 {
                let step = schedule.step(t);
                assert_eq!(step.reset, (t / m + 1) % (p + 1) == 1 && t % m == 0, "t={t} M={m} P={p}");
                let normalizing = (t + 1) % m == 0;
                assert_eq!(step.phase == EstimatorPhase::Normalizing, normalizing, "t={t} M={m}");
            }
        }
    }

    #[test]
    fn counter_at_u64_max() {
        let step = WindowSchedule::new(2, 1).step(u64::MAX);
        assert!(!step.reset);
        assert_eq!(step.phase, EstimatorPhase::Normalizing);

        let step = WindowSchedule::new(1, 1).step(u64::MAX);
        assert!(!step.reset);
        assert_eq!(step.phase, EstimatorPhase::Normalizing);

        let step = WindowSchedule::new(3, 0).step(u64::MAX);
        assert!(!step.reset);
        assert_eq!(step.phase, EstimatorPhase::Accumulating);
    }

    #[test]
    fn period_zero_never_resets() {
        let schedule = WindowSchedule::new(2, 0);
        assert!((0..20).all(|t| !schedule.step(t).reset));
    }

    #[test]
    fn accumulate_then_normalize() {
        let shape = ForestShape::new(1, 2, 2).unwrap();
        let mut weights = LeafWeights::uniform(shape);
        let mut est = LeafEstimator::new(&shape, WindowSchedule::new(2, 1));

        // Sample of class 0 lands mostly in the right leaf.
        let mu = array![[0.8f32, 0.2]];
        let prob = array![[0.5f32, 0.5]];
        let labels = array![0u32];

        let first = est.step(0, &mut weights, mu.view(), prob.view(), labels.view());
        assert!(first.step.reset);
        assert_eq!(first.step.phase, EstimatorPhase::Accumulating);
        // acc[0, l] = 0.5 * mu / 0.5
        assert_abs_diff_eq!(est.accumulator()[[0, 0]], 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(est.accumulator()[[0, 1]], 0.2, epsilon = 1e-6);
        assert_eq!(est.accumulator()[[1, 0]], 0.0);

        let second = est.step(1, &mut weights, mu.view(), prob.view(), labels.view());
        assert_eq!(second.step.phase, EstimatorPhase::Normalizing);
        // Only class 0 has mass: both columns become one-hot on class 0.
        assert_eq!(weights.get(0, 0, 0), 1.0);
        assert_eq!(weights.get(1, 0, 0), 0.0);
        assert_eq!(weights.get(0, 0, 1), 1.0);
        assert!(est.accumulator().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn normalized_columns_sum_to_one() {
        let shape = ForestShape::new(2, 3, 3).unwrap();
        let mut weights = LeafWeights::init(shape, WeightInit::Random { seed: 1 });
        let mut est = LeafEstimator::new(&shape, WindowSchedule::new(2, 3));
        let mu = array![
            [0.1f32, 0.2, 0.3, 0.4, 0.25, 0.25, 0.25, 0.25],
            [0.7, 0.1, 0.1, 0.1, 0.0, 0.5, 0.5, 0.0]
        ];
        let prob = array![[0.3f32, 0.3, 0.4], [0.2, 0.5, 0.3]];
        let labels = array![2u32, 1];

        est.step(0, &mut weights, mu.view(), prob.view(), labels.view());
        let outcome = est.step(1, &mut weights, mu.view(), prob.view(), labels.view());
        assert_eq!(outcome.step.phase, EstimatorPhase::Normalizing);
        for sum in weights.column_sums() {
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn empty_window_falls_back_to_uniform() {
        let shape = ForestShape::new(1, 2, 4).unwrap();
        let mut weights = LeafWeights::init(shape, WeightInit::Random { seed: 2 });
        let mut est = LeafEstimator::new(&shape, WindowSchedule::new(1, 1));
        let outcome = est.step(
            0,
            &mut weights,
            Array2::<f32>::zeros((0, 2)).view(),
            Array2::<f32>::zeros((0, 4)).view(),
            ndarray::Array1::<u32>::zeros(0).view(),
        );
        assert!(outcome.step.reset);
        assert_eq!(outcome.degenerate_columns, 2);
        assert!(weights.matrix().iter().all(|&w| w == 0.25));
    }
}
