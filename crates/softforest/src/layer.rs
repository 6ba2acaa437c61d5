//! The decision forest layer: validated shape, leaf weights, batch buffers
//! and training state behind a forward/backward interface.
//!
//! # Lifecycle
//!
//! 1. [`DecisionForest::new`] validates the configuration against the width
//!    of the routing signal and creates the leaf weights.
//! 2. [`DecisionForest::forward`] computes routing activations, leaf
//!    distributions, class probabilities and the loss, caching what the
//!    backward pass needs. Batch buffers are re-allocated only when the batch
//!    size changes.
//! 3. [`DecisionForest::backward`] reads the cache: in backprop mode it
//!    writes score gradients, in leaf-estimation mode it updates the weights,
//!    writes zeros and invalidates the cache so each batch is folded in once.
//!
//! Both passes take `&mut self`, so a forward can never overlap a backward
//! that mutates the weights.
//!
//! # Example
//!
//! ```
//! use ndarray::{array, Array2};
//! use softforest::{DecisionForest, ForestConfig};
//!
//! let config = ForestConfig::builder().tree_num(1).depth(2).num_output(2).build().unwrap();
//! let mut forest = DecisionForest::new(config, 1).unwrap();
//!
//! let scores = array![[0.0f32], [2.0]];
//! let labels = array![0u32, 1];
//! let output = forest.forward(scores.view(), labels.view()).unwrap();
//! assert!((output.loss - std::f64::consts::LN_2).abs() < 1e-6);
//!
//! let mut grad = Array2::zeros((2, 1));
//! forest.backward(grad.view_mut()).unwrap();
//! ```

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2};

use crate::config::{ForestConfig, TrainingMode};
use crate::error::ForestError;
use crate::forward::{aggregate_into, argmax_rows, leaf_distribution_into, route_into};
use crate::repr::{ForestShape, LeafWeights};
use crate::training::{
    nll_loss, routing_gradient_into, weight_gradient_into, EstimationOutcome, EstimatorPhase,
    ForwardState, LeafEstimator, TrainingLogger, TreeSelector, WindowSchedule,
};
use crate::utils::{Parallelism, WorkerPool};

// =============================================================================
// Outputs
// =============================================================================

/// Result of a forward pass.
#[derive(Debug, Clone)]
pub struct ForwardOutput<'a> {
    /// Mean negative log-likelihood of the batch.
    pub loss: f64,
    /// Class distribution, `[n_samples, num_output]`.
    pub prob: ArrayView2<'a, f32>,
}

/// Result of a backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackwardReport {
    /// Iteration counter the step ran at.
    pub iteration: u64,
    /// Samples whose class probability was floored before dividing.
    pub clamped: usize,
    /// Re-estimation transition, in leaf-estimation mode.
    pub estimation: Option<EstimationOutcome>,
}

// =============================================================================
// Internal State
// =============================================================================

/// Per-batch buffers, overwritten by every forward call.
#[derive(Debug, Clone)]
struct BatchBuffers {
    d: Array2<f32>,
    /// Path probabilities in forward, `A` values in backward.
    dp: Array2<f32>,
    mu: Array2<f32>,
    prob: Array2<f32>,
}

impl BatchBuffers {
    fn new(shape: &ForestShape, n_samples: usize) -> Self {
        Self {
            d: Array2::zeros((n_samples, shape.node_num_total())),
            dp: Array2::zeros((n_samples, shape.node_num_total())),
            mu: Array2::zeros((n_samples, shape.leaf_num_total())),
            prob: Array2::zeros((n_samples, shape.num_output())),
        }
    }

    fn n_samples(&self) -> usize {
        self.d.nrows()
    }

    fn run_forward(
        &mut self,
        shape: &ForestShape,
        weights: &LeafWeights,
        scores: ArrayView2<'_, f32>,
        parallelism: Parallelism,
    ) {
        route_into(scores, self.d.view_mut(), parallelism);
        leaf_distribution_into(shape, self.d.view(), self.dp.view_mut(), self.mu.view_mut(), parallelism);
        aggregate_into(weights, self.mu.view(), self.prob.view_mut());
    }
}

/// Gradient engine state carried across mini-batches.
#[derive(Debug, Clone)]
enum Trainer {
    Backprop(TreeSelector),
    LeafEstimation(LeafEstimator),
}

impl Trainer {
    fn new(shape: &ForestShape, mode: TrainingMode) -> Self {
        match mode {
            TrainingMode::Backprop { selection } => Trainer::Backprop(TreeSelector::new(selection)),
            TrainingMode::LeafEstimation { window, period } => {
                Trainer::LeafEstimation(LeafEstimator::new(shape, WindowSchedule::new(window, period)))
            }
        }
    }
}

// =============================================================================
// DecisionForest
// =============================================================================

/// Soft decision forest classifier layer.
#[derive(Debug)]
pub struct DecisionForest {
    config: ForestConfig,
    shape: ForestShape,
    weights: LeafWeights,
    buffers: BatchBuffers,
    /// Labels of the last forward pass; `None` until a forward succeeds.
    labels: Option<Array1<u32>>,
    trainer: Trainer,
    iteration: u64,
    pool: WorkerPool,
    logger: TrainingLogger,
}

impl DecisionForest {
    /// Set up a layer whose routing signal has `input_width` columns.
    ///
    /// Weights are created from `config.weight_init`.
    ///
    /// # Errors
    ///
    /// - [`ForestError::Config`] for invalid dimensions
    /// - [`ForestError::InputWidth`] if `input_width != tree_num * node_num_per_tree`
    pub fn new(config: ForestConfig, input_width: usize) -> Result<Self, ForestError> {
        let shape = Self::validate(&config, input_width)?;
        let weights = LeafWeights::init(shape, config.weight_init);
        Ok(Self::assemble(config, shape, weights))
    }

    /// Set up a layer around host-owned weights of shape
    /// `(num_output, tree_num, leaf_num_per_tree)`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new), plus [`ForestError::WeightShape`].
    pub fn with_weights(
        config: ForestConfig,
        input_width: usize,
        weights: Array3<f32>,
    ) -> Result<Self, ForestError> {
        let shape = Self::validate(&config, input_width)?;
        let weights = LeafWeights::from_array3(shape, weights)?;
        Ok(Self::assemble(config, shape, weights))
    }

    fn validate(config: &ForestConfig, input_width: usize) -> Result<ForestShape, ForestError> {
        config.validate()?;
        let shape = config.shape()?;
        if input_width != shape.node_num_total() {
            return Err(ForestError::InputWidth {
                expected: shape.node_num_total(),
                actual: input_width,
            });
        }
        Ok(shape)
    }

    fn assemble(config: ForestConfig, shape: ForestShape, weights: LeafWeights) -> Self {
        let logger = TrainingLogger::new(config.verbosity);
        logger.log_setup(&shape, &config.mode);
        Self {
            trainer: Trainer::new(&shape, config.mode),
            pool: WorkerPool::new(config.thread_count()),
            buffers: BatchBuffers::new(&shape, 0),
            labels: None,
            iteration: 0,
            config,
            shape,
            weights,
            logger,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    #[inline]
    pub fn shape(&self) -> &ForestShape {
        &self.shape
    }

    #[inline]
    pub fn weights(&self) -> &LeafWeights {
        &self.weights
    }

    /// Mutable weights, for host optimizers in backprop mode.
    #[inline]
    pub fn weights_mut(&mut self) -> &mut LeafWeights {
        &mut self.weights
    }

    /// Number of backward steps taken through [`backward`](Self::backward).
    #[inline]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Routing activations of the last forward pass.
    pub fn routing(&self) -> ArrayView2<'_, f32> {
        self.buffers.d.view()
    }

    /// Leaf distribution of the last forward pass.
    pub fn leaf_distribution(&self) -> ArrayView2<'_, f32> {
        self.buffers.mu.view()
    }

    /// Class distribution of the last forward pass.
    pub fn probabilities(&self) -> ArrayView2<'_, f32> {
        self.buffers.prob.view()
    }

    // =========================================================================
    // Forward
    // =========================================================================

    /// Forward pass with loss.
    ///
    /// `scores` is `[n_samples, node_num_total]`, `labels` holds one class
    /// index per sample.
    ///
    /// # Errors
    ///
    /// [`ForestError::InputWidth`], [`ForestError::ShapeMismatch`] or
    /// [`ForestError::LabelOutOfRange`]; nothing is computed on error.
    pub fn forward(
        &mut self,
        scores: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, u32>,
    ) -> Result<ForwardOutput<'_>, ForestError> {
        self.check_scores(scores)?;
        self.check_labels(scores.nrows(), labels)?;

        let n = scores.nrows();
        if self.buffers.n_samples() != n {
            self.buffers = BatchBuffers::new(&self.shape, n);
            self.logger.log_reshape(n);
        }
        self.labels = None;

        let shape = &self.shape;
        let weights = &self.weights;
        let buffers = &mut self.buffers;
        self.pool
            .install(|parallelism| buffers.run_forward(shape, weights, scores, parallelism));

        let loss = nll_loss(self.buffers.prob.view(), labels);
        self.logger.log_clamped("loss", loss.clamped);
        self.logger.log_forward(n, loss.value);
        self.labels = Some(labels.to_owned());

        Ok(ForwardOutput {
            loss: loss.value,
            prob: self.buffers.prob.view(),
        })
    }

    /// Class distribution for a batch, without labels or loss.
    ///
    /// Does not touch the cached forward state.
    pub fn predict(&self, scores: ArrayView2<'_, f32>) -> Result<Array2<f32>, ForestError> {
        self.check_scores(scores)?;
        let mut buffers = BatchBuffers::new(&self.shape, scores.nrows());
        self.pool
            .install(|parallelism| buffers.run_forward(&self.shape, &self.weights, scores, parallelism));
        Ok(buffers.prob)
    }

    /// Most probable class for each sample.
    pub fn predict_class(&self, scores: ArrayView2<'_, f32>) -> Result<Vec<usize>, ForestError> {
        let prob = self.predict(scores)?;
        Ok(argmax_rows(prob.view()))
    }

    // =========================================================================
    // Backward
    // =========================================================================

    /// Backward pass at the layer's own iteration counter, which then advances
    /// (wrapping at `u64::MAX`).
    ///
    /// `grad` must match the shape of the last forward's scores.
    pub fn backward(&mut self, grad: ArrayViewMut2<'_, f32>) -> Result<BackwardReport, ForestError> {
        let report = self.backward_at(self.iteration, grad)?;
        self.iteration = self.iteration.wrapping_add(1);
        Ok(report)
    }

    /// Backward pass at an externally supplied iteration counter.
    ///
    /// The counter only matters in leaf-estimation mode, where it drives the
    /// window/period schedule. The layer's own counter is not advanced.
    ///
    /// In leaf-estimation mode a step consumes the forward cache: a batch is
    /// folded into the weights once, and a second backward without a new
    /// forward returns [`ForestError::MissingForward`]. In backprop mode the
    /// cache is kept, so the gradient may be recomputed.
    pub fn backward_at(
        &mut self,
        iteration: u64,
        mut grad: ArrayViewMut2<'_, f32>,
    ) -> Result<BackwardReport, ForestError> {
        let labels = self.labels.as_ref().ok_or(ForestError::MissingForward)?;
        self.check_gradient_shape(grad.nrows(), grad.ncols())?;

        let shape = &self.shape;
        let buffers = &mut self.buffers;
        let state = ForwardState {
            d: buffers.d.view(),
            mu: buffers.mu.view(),
            prob: buffers.prob.view(),
        };

        let report = match &mut self.trainer {
            Trainer::Backprop(selector) => {
                let selected = selector.draw(labels.len(), shape.tree_num());
                let weights = &self.weights;
                let scratch = buffers.dp.view_mut();
                let clamped = self.pool.install(|parallelism| {
                    routing_gradient_into(
                        shape,
                        weights,
                        state,
                        labels.view(),
                        selected.as_deref(),
                        scratch,
                        grad.view_mut(),
                        parallelism,
                    )
                });
                self.logger.log_clamped("backprop", clamped);
                BackwardReport {
                    iteration,
                    clamped,
                    estimation: None,
                }
            }
            Trainer::LeafEstimation(estimator) => {
                grad.fill(0.0);
                let outcome =
                    estimator.step(iteration, &mut self.weights, state.mu, state.prob, labels.view());
                if outcome.step.reset {
                    self.logger.log_weight_reset(iteration);
                }
                if outcome.step.phase == EstimatorPhase::Normalizing {
                    self.logger.log_weight_update(iteration, outcome.degenerate_columns);
                }
                self.logger.log_clamped("estimation", outcome.clamped);
                BackwardReport {
                    iteration,
                    clamped: outcome.clamped,
                    estimation: Some(outcome),
                }
            }
        };
        if report.estimation.is_some() {
            self.labels = None;
        }
        Ok(report)
    }

    /// Gradient of the last forward's loss with respect to the leaf weights,
    /// `[num_output, leaf_num_total]`, for host optimizers.
    pub fn weight_gradient(&self, grad: ArrayViewMut2<'_, f32>) -> Result<usize, ForestError> {
        let labels = self.labels.as_ref().ok_or(ForestError::MissingForward)?;
        let expected = (self.shape.num_output(), self.shape.leaf_num_total());
        if grad.dim() != expected {
            let (what, exp, actual) = if grad.nrows() != expected.0 {
                ("weight gradient rows", expected.0, grad.nrows())
            } else {
                ("weight gradient columns", expected.1, grad.ncols())
            };
            return Err(ForestError::ShapeMismatch {
                what,
                expected: exp,
                actual,
            });
        }
        Ok(weight_gradient_into(
            &self.shape,
            self.buffers.mu.view(),
            self.buffers.prob.view(),
            labels.view(),
            grad,
        ))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn check_scores(&self, scores: ArrayView2<'_, f32>) -> Result<(), ForestError> {
        if scores.ncols() != self.shape.node_num_total() {
            return Err(ForestError::InputWidth {
                expected: self.shape.node_num_total(),
                actual: scores.ncols(),
            });
        }
        Ok(())
    }

    fn check_labels(&self, n_samples: usize, labels: ArrayView1<'_, u32>) -> Result<(), ForestError> {
        if labels.len() != n_samples {
            return Err(ForestError::ShapeMismatch {
                what: "label count",
                expected: n_samples,
                actual: labels.len(),
            });
        }
        let num_output = self.shape.num_output();
        match labels.iter().position(|&y| y as usize >= num_output) {
            Some(index) => Err(ForestError::LabelOutOfRange {
                index,
                label: labels[index],
                num_output,
            }),
            None => Ok(()),
        }
    }

    fn check_gradient_shape(&self, rows: usize, cols: usize) -> Result<(), ForestError> {
        if rows != self.buffers.n_samples() {
            return Err(ForestError::ShapeMismatch {
                what: "gradient rows",
                expected: self.buffers.n_samples(),
                actual: rows,
            });
        }
        if cols != self.shape.node_num_total() {
            return Err(ForestError::ShapeMismatch {
                what: "gradient columns",
                expected: self.shape.node_num_total(),
                actual: cols,
            });
        }
        Ok(())
    }
}
