//! Forward pass kernels.
//!
//! - [`routing`]: raw scores to routing activations `d`
//! - [`traversal`]: path probabilities `dp` and leaf distribution `mu`
//! - [`aggregate`]: class distribution `prob`

pub mod aggregate;
pub mod routing;
pub mod traversal;

pub use aggregate::{aggregate_into, argmax_rows};
pub use routing::{route_into, sigmoid, ROUTING_MAX, ROUTING_MIN};
pub use traversal::leaf_distribution_into;
