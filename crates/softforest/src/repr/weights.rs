//! Leaf-to-class weight tensor.
//!
//! Logically shaped `(num_output, tree_num, leaf_num_per_tree)`. Stored as a
//! row-major `(num_output, leaf_num_total)` matrix so that the row of class
//! `y` lines up element-for-element with a sample's leaf distribution.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::ForestError;
use crate::repr::ForestShape;

// =============================================================================
// WeightInit
// =============================================================================

/// How the layer fills a fresh weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WeightInit {
    /// Every entry is `1 / num_output`.
    #[default]
    Uniform,
    /// Uniform random in `[0, 1)` from a seeded generator, then every leaf
    /// column normalized to sum to one across classes.
    Random { seed: u64 },
}

// =============================================================================
// LeafWeights
// =============================================================================

/// Per (class, tree, leaf) weights of the forest.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafWeights {
    shape: ForestShape,
    data: Array2<f32>,
}

impl LeafWeights {
    /// Weights filled with `1 / num_output`.
    pub fn uniform(shape: ForestShape) -> Self {
        let value = 1.0 / shape.num_output() as f32;
        Self {
            shape,
            data: Array2::from_elem((shape.num_output(), shape.leaf_num_total()), value),
        }
    }

    /// Build weights according to an initialization policy.
    pub fn init(shape: ForestShape, init: WeightInit) -> Self {
        match init {
            WeightInit::Uniform => Self::uniform(shape),
            WeightInit::Random { seed } => {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                let data = Array2::from_shape_simple_fn(
                    (shape.num_output(), shape.leaf_num_total()),
                    || rng.r#gen::<f32>(),
                );
                let mut weights = Self { shape, data };
                weights.normalize_columns();
                weights
            }
        }
    }

    /// Take ownership of a host-provided `(num_output, tree_num, leaf_num_per_tree)` tensor.
    ///
    /// # Errors
    ///
    /// [`ForestError::WeightShape`] if the tensor dimensions do not match `shape`.
    pub fn from_array3(shape: ForestShape, weights: Array3<f32>) -> Result<Self, ForestError> {
        let expected = (shape.num_output(), shape.tree_num(), shape.leaf_num_per_tree());
        if weights.dim() != expected {
            return Err(ForestError::WeightShape {
                expected,
                actual: weights.dim(),
            });
        }
        let per_tree = shape.leaf_num_per_tree();
        let data = Array2::from_shape_fn((shape.num_output(), shape.leaf_num_total()), |(y, l)| {
            weights[[y, l / per_tree, l % per_tree]]
        });
        Ok(Self { shape, data })
    }

    /// Copy out as a `(num_output, tree_num, leaf_num_per_tree)` tensor.
    pub fn to_array3(&self) -> Array3<f32> {
        let per_tree = self.shape.leaf_num_per_tree();
        Array3::from_shape_fn(
            (self.shape.num_output(), self.shape.tree_num(), per_tree),
            |(y, j, l)| self.data[[y, j * per_tree + l]],
        )
    }

    #[inline]
    pub fn shape(&self) -> &ForestShape {
        &self.shape
    }

    /// Weight of `(class, tree, leaf)`.
    #[inline]
    pub fn get(&self, class: usize, tree: usize, leaf: usize) -> f32 {
        self.data[[class, self.shape.leaf_offset(tree) + leaf]]
    }

    /// Row of class `y`, laid out like a sample's leaf distribution.
    #[inline]
    pub fn class_row(&self, y: usize) -> ArrayView1<'_, f32> {
        self.data.row(y)
    }

    /// `(num_output, leaf_num_total)` view.
    #[inline]
    pub fn matrix(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Mutable `(num_output, leaf_num_total)` view, for host optimizers.
    #[inline]
    pub fn matrix_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.data.view_mut()
    }

    /// Overwrite every weight with `1 / num_output`.
    pub fn reset_uniform(&mut self) {
        self.data.fill(1.0 / self.shape.num_output() as f32);
    }

    /// Overwrite all weights from a matrix of identical dimensions.
    pub(crate) fn assign(&mut self, source: ArrayView2<'_, f32>) {
        self.data.assign(&source);
    }

    /// Sum across classes of every leaf column.
    pub fn column_sums(&self) -> Vec<f64> {
        column_sums(self.data.view())
    }

    /// Normalize every leaf column to sum to one across classes.
    ///
    /// Columns whose sum is zero or non-finite become uniform. Returns how
    /// many columns were degenerate.
    pub fn normalize_columns(&mut self) -> usize {
        normalize_columns(self.data.view_mut())
    }
}

/// Per-column sums of a `(classes, leaves)` matrix, in `f64`.
pub(crate) fn column_sums(matrix: ArrayView2<'_, f32>) -> Vec<f64> {
    matrix
        .axis_iter(Axis(1))
        .map(|col| col.iter().map(|&v| v as f64).sum())
        .collect()
}

/// Normalize each column of a `(classes, leaves)` matrix in place.
pub(crate) fn normalize_columns(mut matrix: ArrayViewMut2<'_, f32>) -> usize {
    let n_classes = matrix.nrows();
    let uniform = 1.0 / n_classes as f32;
    let mut degenerate = 0;
    for mut col in matrix.axis_iter_mut(Axis(1)) {
        let sum: f64 = col.iter().map(|&v| v as f64).sum();
        if sum > 0.0 && sum.is_finite() {
            col.mapv_inplace(|v| (v as f64 / sum) as f32);
        } else {
            col.fill(uniform);
            degenerate += 1;
        }
    }
    degenerate
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn shape(t: usize, d: u32, c: usize) -> ForestShape {
        ForestShape::new(t, d, c).unwrap()
    }

    #[test]
    fn uniform_weights() {
        let w = LeafWeights::uniform(shape(2, 3, 4));
        assert_eq!(w.matrix().dim(), (4, 8));
        assert!(w.matrix().iter().all(|&v| v == 0.25));
    }

    #[test]
    fn random_init_is_normalized_and_seeded() {
        let a = LeafWeights::init(shape(3, 3, 5), WeightInit::Random { seed: 7 });
        let b = LeafWeights::init(shape(3, 3, 5), WeightInit::Random { seed: 7 });
        let c = LeafWeights::init(shape(3, 3, 5), WeightInit::Random { seed: 8 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        for sum in a.column_sums() {
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn array3_layout_roundtrip_indexing() {
        let s = shape(2, 2, 3);
        let arr = Array3::from_shape_fn((3, 2, 2), |(y, j, l)| (y * 100 + j * 10 + l) as f32);
        let w = LeafWeights::from_array3(s, arr.clone()).unwrap();
        assert_eq!(w.get(2, 1, 0), 210.0);
        assert_eq!(w.class_row(1).to_vec(), vec![100.0, 101.0, 110.0, 111.0]);
        assert_eq!(w.to_array3(), arr);
    }

    #[test]
    fn from_array3_rejects_wrong_shape() {
        let err = LeafWeights::from_array3(shape(2, 2, 3), Array3::zeros((3, 2, 4))).unwrap_err();
        assert!(matches!(err, ForestError::WeightShape { .. }));
    }

    #[test]
    fn normalize_columns_handles_zero_columns() {
        let mut w = LeafWeights::uniform(shape(1, 2, 2));
        w.matrix_mut().assign(&ndarray::array![[3.0, 0.0], [1.0, 0.0]]);
        let degenerate = w.normalize_columns();
        assert_eq!(degenerate, 1);
        assert_abs_diff_eq!(w.get(0, 0, 0), 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(w.get(1, 0, 0), 0.25, epsilon = 1e-6);
        assert_eq!(w.get(0, 0, 1), 0.5);
        assert_eq!(w.get(1, 0, 1), 0.5);
    }
}
