//! Routing activation transform: raw node scores to routing probabilities.

use ndarray::{ArrayView2, ArrayViewMut2, Axis, Zip};

use crate::utils::Parallelism;

/// Smallest routing activation: the smallest positive normal `f32`.
pub const ROUTING_MIN: f32 = f32::MIN_POSITIVE;

/// Largest routing activation: the largest `f32` below one.
pub const ROUTING_MAX: f32 = 1.0 - f32::EPSILON / 2.0;

/// Numerically stable sigmoid.
/// Clamps input to [-500, 500] to prevent overflow, and the output to
/// `[ROUTING_MIN, ROUTING_MAX]` so neither branch ever gets exactly zero mass.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    let clamped = x.clamp(-500.0, 500.0);
    let d = if clamped >= 0.0 {
        1.0 / (1.0 + (-clamped).exp())
    } else {
        let e = clamped.exp();
        e / (1.0 + e)
    };
    d.clamp(ROUTING_MIN, ROUTING_MAX)
}

/// Write `d = sigmoid(scores)` elementwise.
///
/// Both arrays are `[n_samples, node_num_total]`. NaN scores stay NaN.
pub fn route_into(scores: ArrayView2<'_, f32>, mut d: ArrayViewMut2<'_, f32>, parallelism: Parallelism) {
    debug_assert_eq!(scores.dim(), d.dim());
    parallelism.maybe_par_bridge_for_each(
        d.axis_iter_mut(Axis(0)).zip(scores.axis_iter(Axis(0))),
        |(d_row, score_row)| {
            Zip::from(d_row).and(score_row).for_each(|d, &x| *d = sigmoid(x));
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    #[test]
    fn sigmoid_zero_is_half() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5, epsilon = 1e-7);
    }

    #[test]
    fn sigmoid_output_in_zero_one() {
        for x in [-15.0, -1.0, 0.0, 1.0, 15.0] {
            let d = sigmoid(x);
            assert!(d > 0.0 && d < 1.0, "sigmoid({x}) = {d} not in (0,1)");
        }
    }

    #[test]
    fn sigmoid_extreme_values_stay_inside_open_interval() {
        for x in [20.0f32, 50.0, 200.0, 1e30, f32::MAX, f32::INFINITY] {
            for v in [x, -x] {
                let d = sigmoid(v);
                assert!(d > 0.0 && d < 1.0, "sigmoid({v}) = {d} not in (0,1)");
                assert!(1.0 - d > 0.0);
            }
        }
        assert_eq!(sigmoid(f32::INFINITY), ROUTING_MAX);
        assert_eq!(sigmoid(f32::NEG_INFINITY), ROUTING_MIN);
    }

    #[test]
    fn sigmoid_nan_propagates() {
        assert!(sigmoid(f32::NAN).is_nan());
    }

    #[test]
    fn sigmoid_symmetry() {
        for x in [0.1f32, 0.7, 2.5, 9.0] {
            assert_abs_diff_eq!(sigmoid(x) + sigmoid(-x), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn route_into_matches_scalar() {
        let scores = array![[0.0f32, 1.0, -2.0], [3.0, -0.5, 100.0], [25.0, -150.0, 1e30]];
        let mut d = Array2::zeros((3, 3));
        route_into(scores.view(), d.view_mut(), Parallelism::Parallel);
        for (&x, &v) in scores.iter().zip(d.iter()) {
            assert_eq!(v, sigmoid(x));
            assert!(v > 0.0 && v < 1.0);
        }
    }
}
