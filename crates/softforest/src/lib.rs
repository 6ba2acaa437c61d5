//! softforest: a soft decision forest classifier stage.
//!
//! A forest of complete binary trees consumes one raw routing score per
//! internal node, turns the scores into soft branch decisions and produces
//! a class distribution from per-leaf class weights. The layer computes the
//! negative log-likelihood of the true class and either backpropagates it
//! into the routing scores or re-estimates the leaf weights over windows of
//! mini-batches.
//!
//! # Key Types
//!
//! - [`DecisionForest`] - The layer: forward, backward, predict
//! - [`ForestConfig`] - Configuration builder
//! - [`ForestShape`] / [`LeafWeights`] - Dimensions and leaf class weights
//! - [`ForestError`] / [`ConfigError`] - Fatal errors
//!
//! # Layout
//!
//! Trees are stored in heap order: node `k` has its right child at `2k + 1`
//! (taken with probability `d[k]`) and its left child at `2k + 2` (taken with
//! probability `1 - d[k]`). A tree of depth `D` has `2^(D-1) - 1` nodes and
//! `2^(D-1)` leaves; trees are concatenated along the node and leaf axes.
//!
//! # Lower-level kernels
//!
//! The [`forward`] and [`training`] modules expose the individual kernels
//! for hosts that manage their own buffers.

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod config;
pub mod error;
pub mod forward;
pub mod layer;
pub mod repr;
pub mod testing;
pub mod training;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use config::{ConfigError, ForestConfig, TrainingMode, TreeSelection};
pub use error::ForestError;
pub use layer::{BackwardReport, DecisionForest, ForwardOutput};
pub use repr::{ForestShape, LeafWeights, WeightInit};
pub use training::{EstimationOutcome, EstimatorPhase, Verbosity};
pub use utils::Parallelism;
