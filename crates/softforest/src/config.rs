//! Forest layer configuration with builder pattern.
//!
//! [`ForestConfig`] collects the forest dimensions, the training discipline
//! and resource settings. The builder (via `bon`) validates on `build()`.
//!
//! # Example
//!
//! ```
//! use softforest::config::{ForestConfig, TrainingMode, TreeSelection};
//!
//! let config = ForestConfig::builder()
//!     .tree_num(8)
//!     .depth(5)
//!     .num_output(10)
//!     .mode(TrainingMode::Backprop { selection: TreeSelection::All })
//!     .build()
//!     .unwrap();
//! assert_eq!(config.shape().unwrap().node_num_total(), 8 * 15);
//! ```

use std::num::NonZeroUsize;

use bon::Builder;

use crate::repr::{ForestShape, WeightInit};
use crate::training::Verbosity;

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// At least one tree is required.
    #[error("tree_num must be at least 1, got {0}")]
    InvalidTreeNum(usize),

    /// Depth counts the leaf level, so a split needs depth >= 2.
    #[error("depth must be in [2, {max}], got {0}", max = crate::repr::MAX_DEPTH)]
    InvalidDepth(u32),

    /// At least one class is required.
    #[error("num_output must be at least 1, got {0}")]
    InvalidNumOutput(usize),

    /// Node or leaf totals do not fit in memory indices.
    #[error("forest of {tree_num} trees with depth {depth} is too large")]
    ShapeOverflow { tree_num: usize, depth: u32 },

    /// The leaf re-estimation window must span at least one batch.
    #[error("mini-batch window must be at least 1, got {0}")]
    InvalidWindow(usize),
}

// =============================================================================
// Training Mode
// =============================================================================

/// Which trees receive gradient for a sample in backprop mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeSelection {
    /// Every tree is updated.
    #[default]
    All,
    /// One tree per sample, drawn uniformly from a seeded generator.
    ///
    /// The chosen tree's gradient is scaled by `tree_num` so that its
    /// expectation equals the full gradient; all other trees get zero.
    RandomSingle { seed: u64 },
}

/// Training discipline of the gradient engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingMode {
    /// Backpropagate the loss into the routing scores. Leaf weights are left
    /// to the host optimizer.
    Backprop { selection: TreeSelection },

    /// Re-estimate leaf weights over mini-batch windows; routing scores get a
    /// zero gradient.
    ///
    /// `window` batches form one estimation window; weights are reset to
    /// uniform at the start of every `period + 1`-th window.
    LeafEstimation { window: usize, period: usize },
}

impl Default for TrainingMode {
    fn default() -> Self {
        TrainingMode::Backprop {
            selection: TreeSelection::All,
        }
    }
}

// =============================================================================
// ForestConfig
// =============================================================================

/// Configuration of a soft decision forest layer.
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct ForestConfig {
    // === Shape ===
    /// Number of trees.
    pub tree_num: usize,

    /// Tree depth including the leaf level. Must be at least 2.
    pub depth: u32,

    /// Number of classes.
    pub num_output: usize,

    // === Training ===
    /// Gradient engine discipline. Default: backprop into all trees.
    #[builder(default)]
    pub mode: TrainingMode,

    /// Initial leaf weights when the layer creates them. Default: uniform.
    #[builder(default)]
    pub weight_init: WeightInit,

    // === Resource control ===
    /// Number of threads. `None` uses the global rayon pool.
    pub n_threads: Option<NonZeroUsize>,

    // === Logging ===
    /// Verbosity level. Default: `Silent`.
    #[builder(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: forest_config_builder::IsComplete> ForestConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the forest dimensions are invalid or the
    /// leaf re-estimation window is zero.
    pub fn build(self) -> Result<ForestConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl ForestConfig {
    /// Validated forest dimensions.
    pub fn shape(&self) -> Result<ForestShape, ConfigError> {
        ForestShape::new(self.tree_num, self.depth, self.num_output)
    }

    /// Thread count for [`WorkerPool`](crate::utils::WorkerPool) (0 = auto).
    pub fn thread_count(&self) -> usize {
        self.n_threads.map_or(0, NonZeroUsize::get)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.shape()?;
        if let TrainingMode::LeafEstimation { window, .. } = self.mode {
            if window == 0 {
                return Err(ConfigError::InvalidWindow(window));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
