//! Training infrastructure: loss evaluation and the gradient engine.
//!
//! - [`loss`]: mean negative log-likelihood of the true class
//! - [`backprop`]: direct gradients into routing scores and leaf weights
//! - [`estimation`]: iterative leaf-weight re-estimation over mini-batch windows
//! - [`TrainingLogger`], [`Verbosity`]: structured logging

pub mod backprop;
pub mod estimation;
mod logger;
pub mod loss;

pub use backprop::{routing_gradient_into, weight_gradient_into, ForwardState, TreeSelector};
pub use estimation::{EstimationOutcome, EstimatorPhase, LeafEstimator, WindowSchedule, WindowStep};
pub use logger::{TrainingLogger, Verbosity};
pub use loss::{nll_loss, BatchLoss};
