//! Test helpers shared by unit tests, integration tests and benchmarks.
//!
//! - [`data`]: seeded random scores, activations and labels
//! - [`gradcheck`]: an independent `f64` reference loss and finite differences

pub mod data;
pub mod gradcheck;

pub use data::{random_activations, random_labels, random_scores};
pub use gradcheck::{finite_difference_routing, forward_pass, reference_loss, ForwardBuffers};

/// Default tolerance for comparing `f32` forest outputs.
pub const DEFAULT_TOLERANCE: f32 = 1e-5;
