//! Gradient checking against an independent reference.
//!
//! [`reference_loss`] recomputes the forest loss in `f64` by walking every
//! leaf up to the root, sharing nothing with the forward kernels except the
//! index arithmetic of [`TreeTopology`](crate::repr::TreeTopology).

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::forward::{aggregate_into, leaf_distribution_into, route_into};
use crate::repr::{Branch, ForestShape, LeafWeights};
use crate::training::{nll_loss, ForwardState};
use crate::utils::Parallelism;

/// Buffers of one sequential forward pass.
#[derive(Debug, Clone)]
pub struct ForwardBuffers {
	pub d: Array2<f32>,
	pub dp: Array2<f32>,
	pub mu: Array2<f32>,
	pub prob: Array2<f32>,
}

impl ForwardBuffers {
	pub fn state(&self) -> ForwardState<'_> {
		ForwardState {
			d: self.d.view(),
			mu: self.mu.view(),
			prob: self.prob.view(),
		}
	}

	/// Mean NLL of the cached class distribution.
	pub fn loss(&self, labels: ArrayView1<'_, u32>) -> f64 {
		nll_loss(self.prob.view(), labels).value
	}
}

/// Run the forward kernels on their own, outside of a layer.
pub fn forward_pass(shape: &ForestShape, weights: &LeafWeights, scores: ArrayView2<'_, f32>) -> ForwardBuffers {
	let n = scores.nrows();
	let mut d = Array2::zeros(scores.dim());
	let mut dp = Array2::zeros(scores.dim());
	let mut mu = Array2::zeros((n, shape.leaf_num_total()));
	let mut prob = Array2::zeros((n, shape.num_output()));
	route_into(scores, d.view_mut(), Parallelism::Sequential);
	leaf_distribution_into(shape, d.view(), dp.view_mut(), mu.view_mut(), Parallelism::Sequential);
	aggregate_into(weights, mu.view(), prob.view_mut());
	ForwardBuffers { d, dp, mu, prob }
}

/// Mean NLL in `f64`, computed leaf by leaf from the raw scores.
pub fn reference_loss(
	shape: &ForestShape,
	weights: &LeafWeights,
	scores: ArrayView2<'_, f64>,
	labels: ArrayView1<'_, u32>,
) -> f64 {
	let topo = shape.topology();
	let n = scores.nrows();
	let mut total = 0.0;
	for (i, row) in scores.outer_iter().enumerate() {
		let y = labels[i] as usize;
		let mut p = 0.0;
		for tree in 0..shape.tree_num() {
			let base = shape.node_offset(tree);
			for leaf in 0..topo.n_leaves() {
				let mut node = topo.n_nodes() + leaf;
				let mut mass = 1.0f64;
				while let Some((parent, branch)) = topo.parent(node) {
					let d = 1.0 / (1.0 + (-row[base + parent]).exp());
					mass *= match branch {
						Branch::Right => d,
						Branch::Left => 1.0 - d,
					};
					node = parent;
				}
				p += weights.get(y, tree, leaf) as f64 * mass;
			}
		}
		total -= (p / shape.tree_num() as f64).ln();
	}
	total / n as f64
}

/// Central finite differences of [`reference_loss`] with respect to every score.
pub fn finite_difference_routing(
	shape: &ForestShape,
	weights: &LeafWeights,
	scores: ArrayView2<'_, f32>,
	labels: ArrayView1<'_, u32>,
	h: f64,
) -> Array2<f64> {
	let mut work = scores.mapv(f64::from);
	let mut grad = Array2::zeros(scores.dim());
	for ((i, j), g) in grad.indexed_iter_mut() {
		let original = work[[i, j]];
		work[[i, j]] = original + h;
		let plus = reference_loss(shape, weights, work.view(), labels);
		work[[i, j]] = original - h;
		let minus = reference_loss(shape, weights, work.view(), labels);
		work[[i, j]] = original;
		*g = (plus - minus) / (2.0 * h);
	}
	grad
}
