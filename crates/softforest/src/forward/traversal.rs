//! Soft traversal of every tree: path probabilities and leaf distribution.
//!
//! For each sample and tree the internal nodes are visited in ascending heap
//! order, so a node's path probability is always computed after its
//! parent's:
//!
//! ```text
//! dp[0] = 1
//! dp[k] = dp[parent] * d[parent]        (k odd, routed right)
//! dp[k] = dp[parent] * (1 - d[parent])  (k even, routed left)
//! ```
//!
//! Pre-leaf nodes emit their two leaves, right first, so leaves come out in
//! ascending index order and every tree's leaf mass sums to one.

use ndarray::{s, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use crate::repr::{ForestShape, TreeTopology};
use crate::utils::Parallelism;

/// Fill `dp` (`[n, node_num_total]`) and `mu` (`[n, leaf_num_total]`) from
/// routing activations `d` (`[n, node_num_total]`).
pub fn leaf_distribution_into(
    shape: &ForestShape,
    d: ArrayView2<'_, f32>,
    mut dp: ArrayViewMut2<'_, f32>,
    mut mu: ArrayViewMut2<'_, f32>,
    parallelism: Parallelism,
) {
    debug_assert_eq!(d.ncols(), shape.node_num_total());
    debug_assert_eq!(d.dim(), dp.dim());
    debug_assert_eq!(mu.dim(), (d.nrows(), shape.leaf_num_total()));

    let rows = d
        .axis_iter(Axis(0))
        .zip(dp.axis_iter_mut(Axis(0)))
        .zip(mu.axis_iter_mut(Axis(0)));
    parallelism.maybe_par_bridge_for_each(rows, |((d_row, dp_row), mu_row)| {
        sample_leaf_distribution(shape, d_row, dp_row, mu_row);
    });
}

/// One sample, all trees.
pub fn sample_leaf_distribution(
    shape: &ForestShape,
    d: ArrayView1<'_, f32>,
    mut dp: ArrayViewMut1<'_, f32>,
    mut mu: ArrayViewMut1<'_, f32>,
) {
    let topo = shape.topology();
    let (n_nodes, n_leaves) = (topo.n_nodes(), topo.n_leaves());
    for tree in 0..shape.tree_num() {
        let nodes = shape.node_offset(tree)..shape.node_offset(tree) + n_nodes;
        let leaves = shape.leaf_offset(tree)..shape.leaf_offset(tree) + n_leaves;
        tree_leaf_distribution(
            topo,
            d.slice(s![nodes.clone()]),
            dp.slice_mut(s![nodes]),
            mu.slice_mut(s![leaves]),
        );
    }
}

/// One sample, one tree. All views are local to the tree.
#[inline]
fn tree_leaf_distribution(
    topo: &TreeTopology,
    d: ArrayView1<'_, f32>,
    mut dp: ArrayViewMut1<'_, f32>,
    mut mu: ArrayViewMut1<'_, f32>,
) {
    for k in topo.nodes_top_down() {
        dp[k] = match topo.parent(k) {
            None => 1.0,
            Some((parent, branch)) => dp[parent] * branch.gate(d[parent]),
        };
        if topo.is_pre_leaf(k) {
            let (right, left) = topo.leaf_pair(k);
            mu[right] = dp[k] * d[k];
            mu[left] = dp[k] * (1.0 - d[k]);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
