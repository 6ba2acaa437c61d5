//! Negative log-likelihood of the true class under the forest distribution.

use ndarray::{ArrayView1, ArrayView2};

use crate::utils::LOSS_EPSILON;

/// Mean NLL of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLoss {
    /// `(1/N) Σ -ln(max(prob[i, label[i]], ε))`; 0 for an empty batch.
    pub value: f64,
    /// Number of samples whose true-class probability was floored.
    pub clamped: usize,
}

/// Compute the mean negative log-likelihood.
///
/// `prob` is `[n, num_output]`; labels must already be validated to lie in
/// `[0, num_output)`.
pub fn nll_loss(prob: ArrayView2<'_, f32>, labels: ArrayView1<'_, u32>) -> BatchLoss {
    let n = prob.nrows();
    debug_assert_eq!(labels.len(), n);
    if n == 0 {
        return BatchLoss { value: 0.0, clamped: 0 };
    }

    let (sum, clamped) = labels
        .iter()
        .enumerate()
        .fold((0.0f64, 0usize), |(sum, clamped), (i, &label)| {
            let p = prob[[i, label as usize]] as f64;
            // NaN fails the comparison and is floored as well.
            let (p, floored) = if p >= LOSS_EPSILON { (p, false) } else { (LOSS_EPSILON, true) };
            (sum - p.ln(), clamped + floored as usize)
        });

    BatchLoss {
        value: sum / n as f64,
        clamped,
    }
}
