//! Direct backpropagation of the mean NLL into the routing scores.
//!
//! For a sample with label `y` and class probability `p = prob[i, y]`, let
//! `A[n]` be the share of `p` flowing through node `n`:
//!
//! ```text
//! A[n] = Σ_{leaves l below n} weight[y, l] * mu[i, l] / p
//! ```
//!
//! Leaves below the right child carry a factor `d[n]`, leaves below the left
//! child a factor `1 - d[n]`, and `d' = d (1 - d)`. The derivative of the
//! mean loss with respect to the raw score of node `n` in one of `T` trees is
//! therefore
//!
//! ```text
//! ∂loss/∂x[n] = (d[n] * A[left] - (1 - d[n]) * A[right]) / (N * T)
//! ```
//!
//! Nodes are visited children first so `A` of both children is available
//! when the parent is reached; at pre-leaf nodes the children's `A` come
//! straight from the two leaves.

use ndarray::{s, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::TreeSelection;
use crate::repr::{ForestShape, LeafWeights, TreeTopology};
use crate::utils::{floor_divisor, Parallelism};

// =============================================================================
// Tree Selection
// =============================================================================

/// Draws the tree that receives gradient for each sample.
#[derive(Debug, Clone)]
pub enum TreeSelector {
    All,
    RandomSingle(Xoshiro256PlusPlus),
}

impl TreeSelector {
    pub fn new(selection: TreeSelection) -> Self {
        match selection {
            TreeSelection::All => TreeSelector::All,
            TreeSelection::RandomSingle { seed } => {
                TreeSelector::RandomSingle(Xoshiro256PlusPlus::seed_from_u64(seed))
            }
        }
    }

    /// One tree index per sample, or `None` when every tree is updated.
    ///
    /// Draws happen sequentially so the result does not depend on how the
    /// gradient computation is scheduled.
    pub fn draw(&mut self, n_samples: usize, tree_num: usize) -> Option<Vec<usize>> {
        match self {
            TreeSelector::All => None,
            TreeSelector::RandomSingle(rng) => {
                Some((0..n_samples).map(|_| rng.gen_range(0..tree_num)).collect())
            }
        }
    }
}

// =============================================================================
// Routing Gradient
// =============================================================================

/// Inputs of the backward pass cached by the forward pass.
#[derive(Debug, Clone, Copy)]
pub struct ForwardState<'a> {
    /// Routing activations, `[n, node_num_total]`.
    pub d: ArrayView2<'a, f32>,
    /// Leaf distribution, `[n, leaf_num_total]`.
    pub mu: ArrayView2<'a, f32>,
    /// Class distribution, `[n, num_output]`.
    pub prob: ArrayView2<'a, f32>,
}

/// Write `∂loss/∂scores` into `grad` (`[n, node_num_total]`).
///
/// `selected` holds one tree index per sample when only a single tree is
/// updated; that tree's gradient is scaled by `T` and the others are zero.
/// `scratch` (same shape as `grad`) receives the `A` values. Returns the
/// number of samples whose class probability had to be floored.
#[allow(clippy::too_many_arguments)]
pub fn routing_gradient_into(
    shape: &ForestShape,
    weights: &LeafWeights,
    state: ForwardState<'_>,
    labels: ArrayView1<'_, u32>,
    selected: Option<&[usize]>,
    mut scratch: ArrayViewMut2<'_, f32>,
    mut grad: ArrayViewMut2<'_, f32>,
    parallelism: Parallelism,
) -> usize {
    let n = state.d.nrows();
    debug_assert_eq!(grad.dim(), state.d.dim());
    debug_assert_eq!(scratch.dim(), state.d.dim());
    debug_assert_eq!(labels.len(), n);
    if n == 0 {
        return 0;
    }

    let tree_num = shape.tree_num();
    let full_scale = 1.0 / (n as f32 * tree_num as f32);
    let single_scale = 1.0 / n as f32;

    let rows = grad
        .axis_iter_mut(Axis(0))
        .zip(scratch.axis_iter_mut(Axis(0)))
        .enumerate();
    parallelism.maybe_par_bridge_for_each(rows, |(i, (mut grad_row, mut a_row))| {
        let label = labels[i] as usize;
        let (p, _) = floor_divisor(state.prob[[i, label]]);
        let inv_p = 1.0 / p;
        let w = weights.class_row(label);
        let d = state.d.row(i);
        let mu = state.mu.row(i);

        let topo = shape.topology();
        for tree in 0..tree_num {
            let nodes = shape.node_offset(tree)..shape.node_offset(tree) + topo.n_nodes();
            let leaves = shape.leaf_offset(tree)..shape.leaf_offset(tree) + topo.n_leaves();
            let scale = match selected {
                None => full_scale,
                Some(sel) if sel[i] == tree => single_scale,
                Some(_) => {
                    grad_row.slice_mut(s![nodes]).fill(0.0);
                    continue;
                }
            };
            tree_gradient(
                topo,
                TreeInputs {
                    d: d.slice(s![nodes.clone()]),
                    mu: mu.slice(s![leaves.clone()]),
                    w: w.slice(s![leaves]),
                    inv_p,
                    scale,
                },
                a_row.slice_mut(s![nodes.clone()]),
                grad_row.slice_mut(s![nodes]),
            );
        }
    });

    count_floored(state.prob, labels)
}

/// Per-tree views for [`tree_gradient`].
struct TreeInputs<'a> {
    d: ArrayView1<'a, f32>,
    mu: ArrayView1<'a, f32>,
    w: ArrayView1<'a, f32>,
    inv_p: f32,
    scale: f32,
}

#[inline]
fn tree_gradient(
    topo: &TreeTopology,
    input: TreeInputs<'_>,
    mut a: ArrayViewMut1<'_, f32>,
    mut grad: ArrayViewMut1<'_, f32>,
) {
    let TreeInputs { d, mu, w, inv_p, scale } = input;
    for k in topo.nodes_bottom_up() {
        let (a_right, a_left) = if topo.is_pre_leaf(k) {
            let (right, left) = topo.leaf_pair(k);
            (mu[right] * w[right] * inv_p, mu[left] * w[left] * inv_p)
        } else {
            (a[topo.right_child(k)], a[topo.left_child(k)])
        };
        a[k] = a_right + a_left;
        grad[k] = scale * (d[k] * a_left - (1.0 - d[k]) * a_right);
    }
}

// =============================================================================
// Weight Gradient
// =============================================================================

/// Write `∂loss/∂weight` into `grad` (`[num_output, leaf_num_total]`).
///
/// `∂loss/∂weight[y, l] = -(1 / (N T)) Σ_{i : label_i = y} mu[i, l] / prob[i, y]`.
/// Returns the number of floored class probabilities.
pub fn weight_gradient_into(
    shape: &ForestShape,
    mu: ArrayView2<'_, f32>,
    prob: ArrayView2<'_, f32>,
    labels: ArrayView1<'_, u32>,
    mut grad: ArrayViewMut2<'_, f32>,
) -> usize {
    debug_assert_eq!(grad.dim(), (shape.num_output(), shape.leaf_num_total()));
    grad.fill(0.0);
    let n = mu.nrows();
    if n == 0 {
        return 0;
    }

    let scale = -1.0 / (n as f32 * shape.tree_num() as f32);
    for (i, &label) in labels.iter().enumerate() {
        let label = label as usize;
        let (p, _) = floor_divisor(prob[[i, label]]);
        grad.row_mut(label).scaled_add(scale / p, &mu.row(i));
    }
    count_floored(prob, labels)
}

/// Number of samples whose true-class probability needs flooring.
pub(crate) fn count_floored(prob: ArrayView2<'_, f32>, labels: ArrayView1<'_, u32>) -> usize {
    labels
        .iter()
        .enumerate()
        .filter(|&(i, &label)| floor_divisor(prob[[i, label as usize]]).1)
        .count()
}

// =============================================================================
// Tests
// =============================================================================
