//! Verbosity-gated training logger.
//!
//! Events are emitted through `tracing` so the host decides where they go
//! (install any subscriber). The [`Verbosity`] level filters at the source:
//! a silent layer constructs no events.

use crate::config::TrainingMode;
use crate::repr::ForestShape;

/// Verbosity level for training output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// Numeric degeneracies and other warnings.
    Warning,
    /// Setup and leaf re-estimation progress.
    Info,
    /// Per-batch details.
    Debug,
}

/// Structured logger for one forest layer.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    #[inline]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    #[inline]
    fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    pub fn log_setup(&self, shape: &ForestShape, mode: &TrainingMode) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(
                target: "softforest",
                tree_num = shape.tree_num(),
                depth = shape.depth(),
                num_output = shape.num_output(),
                node_num_total = shape.node_num_total(),
                leaf_num_total = shape.leaf_num_total(),
                mode = ?mode,
                "decision forest set up"
            );
        }
    }

    pub fn log_reshape(&self, n_samples: usize) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!(target: "softforest", n_samples, "reshaped batch buffers");
        }
    }

    pub fn log_forward(&self, n_samples: usize, loss: f64) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!(target: "softforest", n_samples, loss, "forward");
        }
    }

    pub fn log_weight_reset(&self, iteration: u64) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(target: "softforest", iteration, "leaf weights reset to uniform");
        }
    }

    pub fn log_weight_update(&self, iteration: u64, degenerate_columns: usize) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(
                target: "softforest",
                iteration,
                degenerate_columns,
                "leaf weights re-estimated"
            );
        }
    }

    /// Report probabilities that had to be floored before use.
    pub fn log_clamped(&self, stage: &'static str, count: usize) {
        if count > 0 && self.enabled(Verbosity::Warning) {
            tracing::warn!(target: "softforest", stage, count, "clamped degenerate probabilities");
        }
    }
}

impl Default for TrainingLogger {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}
