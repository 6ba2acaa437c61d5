//! Canonical representations: forest dimensions, tree index layout and the
//! leaf-to-class weight tensor.

mod topology;
mod weights;

pub use topology::{Branch, ForestShape, TreeTopology, MAX_DEPTH};
pub use weights::{LeafWeights, WeightInit};

pub(crate) use weights::normalize_columns;
