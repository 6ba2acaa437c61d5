//! Errors raised by the forest layer.
//!
//! Every variant is detected before any output buffer is written, so a
//! failed call leaves the caller's buffers and the layer state untouched.

use crate::config::ConfigError;

/// Fatal errors of a forward or backward call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForestError {
    /// Invalid forest configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Routing-signal width does not match `tree_num * node_num_per_tree`.
    #[error("input size incompatible with decision forest parameters: expected width {expected}, got {actual}")]
    InputWidth { expected: usize, actual: usize },

    /// Two buffers that must agree on a dimension do not.
    #[error("{what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A label is not a valid class index.
    #[error("label {label} at sample {index} is out of range for {num_output} classes")]
    LabelOutOfRange {
        index: usize,
        label: u32,
        num_output: usize,
    },

    /// Host-supplied weight tensor has the wrong dimensions.
    #[error("weight tensor must have shape {expected:?}, got {actual:?}")]
    WeightShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// Backward was requested without a matching forward pass.
    #[error("backward called before forward")]
    MissingForward,
}
