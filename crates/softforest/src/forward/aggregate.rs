//! Forest aggregation: leaf distributions to class probabilities.
//!
//! `prob[i, y] = (1 / T) * Σ_l weight[y, l] * mu[i, l]` over all
//! `leaf_num_total` leaves of all trees, i.e. `prob = mu · Wᵀ / T`.

use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2};

use crate::repr::LeafWeights;

/// Write the forest's class distribution into `prob` (`[n, num_output]`).
pub fn aggregate_into(weights: &LeafWeights, mu: ArrayView2<'_, f32>, mut prob: ArrayViewMut2<'_, f32>) {
    let shape = weights.shape();
    debug_assert_eq!(mu.ncols(), shape.leaf_num_total());
    debug_assert_eq!(prob.dim(), (mu.nrows(), shape.num_output()));

    let scale = 1.0 / shape.tree_num() as f32;
    general_mat_mul(scale, &mu, &weights.matrix().t(), 0.0, &mut prob);
}

/// Index of the most probable class of each row.
///
/// Ties resolve to the lowest class index.
pub fn argmax_rows(prob: ArrayView2<'_, f32>) -> Vec<usize> {
    prob.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |(best, best_p), (c, &p)| {
                    if p > best_p { (c, p) } else { (best, best_p) }
                })
                .0
        })
        .collect()
}
