//! Property-based tests for forest invariants.
//!
//! Random forest shapes, scores and labels are generated and the layer's
//! outputs are checked against invariants that hold for every input.

use ndarray::{s, Array1, Array2};
use proptest::prelude::*;

use softforest::{DecisionForest, ForestConfig, TrainingMode, WeightInit};

// =============================================================================
// Strategies
// =============================================================================

/// `(tree_num, depth, num_output, n_samples)` kept small enough for fast cases.
fn arb_dims() -> impl Strategy<Value = (usize, u32, usize, usize)> {
	(1usize..4, 2u32..6, 1usize..5, 1usize..8)
}

/// Every non-NaN `f32`, infinities and subnormals included.
fn arb_any_score() -> prop::num::f32::Any {
	use prop::num::f32::{INFINITE, NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
	POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO | INFINITE
}

/// Dimensions plus matching scores and labels.
fn arb_batch() -> impl Strategy<Value = (usize, u32, usize, Array2<f32>, Array1<u32>)> {
	arb_batch_with(-20.0f32..20.0)
}

fn arb_batch_with<S>(score: S) -> impl Strategy<Value = (usize, u32, usize, Array2<f32>, Array1<u32>)>
where
	S: Strategy<Value = f32> + Clone + 'static,
{
	arb_dims().prop_flat_map(move |(tree_num, depth, num_output, n)| {
		let width = tree_num * ((1usize << (depth - 1)) - 1);
		(
			Just(tree_num),
			Just(depth),
			Just(num_output),
			prop::collection::vec(score.clone(), n * width)
				.prop_map(move |v| Array2::from_shape_vec((n, width), v).unwrap()),
			prop::collection::vec(0..num_output as u32, n).prop_map(Array1::from),
		)
	})
}

fn layer(tree_num: usize, depth: u32, num_output: usize, mode: TrainingMode, seed: u64) -> DecisionForest {
	let config = ForestConfig::builder()
		.tree_num(tree_num)
		.depth(depth)
		.num_output(num_output)
		.mode(mode)
		.weight_init(WeightInit::Random { seed })
		.build()
		.unwrap();
	let width = config.shape().unwrap().node_num_total();
	DecisionForest::new(config, width).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
	#[test]
	fn leaf_mass_and_class_distribution_sum_to_one(
		(tree_num, depth, num_output, scores, labels) in arb_batch(),
		seed in any::<u64>(),
	) {
		let mut forest = layer(tree_num, depth, num_output, TrainingMode::default(), seed);
		let output = forest.forward(scores.view(), labels.view()).unwrap();
		prop_assert!(output.loss.is_finite());
		prop_assert!(output.loss > -1e-6);
		for row in output.prob.outer_iter() {
			prop_assert!((row.sum() - 1.0).abs() < 1e-4);
			prop_assert!(row.iter().all(|&p| (0.0..=1.0 + 1e-6).contains(&p)));
		}

		let leaves = forest.shape().leaf_num_per_tree();
		for row in forest.leaf_distribution().outer_iter() {
			for tree in 0..tree_num {
				let mass: f32 = row.slice(s![tree * leaves..(tree + 1) * leaves]).sum();
				prop_assert!((mass - 1.0).abs() < 1e-4);
			}
		}
		for &d in forest.routing().iter() {
			prop_assert!(d > 0.0 && d < 1.0);
		}
	}

	#[test]
	fn routing_stays_strictly_inside_unit_interval(
		(tree_num, depth, num_output, scores, labels) in arb_batch_with(arb_any_score()),
	) {
		let mut forest = layer(tree_num, depth, num_output, TrainingMode::default(), 1);
		let loss = forest.forward(scores.view(), labels.view()).unwrap().loss;
		prop_assert!(loss.is_finite());
		for &d in forest.routing().iter() {
			prop_assert!(d > 0.0 && d < 1.0, "d = {} escaped (0, 1)", d);
		}
		let leaves = forest.shape().leaf_num_per_tree();
		for row in forest.leaf_distribution().outer_iter() {
			for tree in 0..tree_num {
				let mass: f32 = row.slice(s![tree * leaves..(tree + 1) * leaves]).sum();
				prop_assert!((mass - 1.0).abs() < 1e-4);
			}
		}
	}

	#[test]
	fn routing_gradient_is_finite(
		(tree_num, depth, num_output, scores, labels) in arb_batch(),
		seed in any::<u64>(),
	) {
		let mut forest = layer(tree_num, depth, num_output, TrainingMode::default(), seed);
		forest.forward(scores.view(), labels.view()).unwrap();
		let mut grad = Array2::zeros(scores.dim());
		forest.backward(grad.view_mut()).unwrap();
		prop_assert!(grad.iter().all(|g| g.is_finite()));
	}

	#[test]
	fn estimation_keeps_columns_normalized(
		(tree_num, depth, num_output, scores, labels) in arb_batch(),
		window in 1usize..4,
		period in 0usize..3,
		steps in 1u64..10,
	) {
		let mode = TrainingMode::LeafEstimation { window, period };
		let mut forest = layer(tree_num, depth, num_output, mode, 7);
		for _ in 0..steps {
			forest.forward(scores.view(), labels.view()).unwrap();
			let mut grad = Array2::zeros(scores.dim());
			forest.backward(grad.view_mut()).unwrap();
			prop_assert!(grad.iter().all(|&g| g == 0.0));
			for sum in forest.weights().column_sums() {
				prop_assert!((sum - 1.0).abs() < 1e-4);
			}
		}
	}
}
