use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Raw routing scores uniform in `[-scale, scale]`.
pub fn random_scores(rows: usize, cols: usize, scale: f32, seed: u64) -> Array2<f32> {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
	Array2::from_shape_simple_fn((rows, cols), || (rng.r#gen::<f32>() * 2.0 - 1.0) * scale)
}

/// Routing activations strictly inside `(0, 1)`.
pub fn random_activations(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
	Array2::from_shape_simple_fn((rows, cols), || 0.01 + rng.r#gen::<f32>() * 0.98)
}

/// Class labels uniform in `[0, num_output)`.
pub fn random_labels(rows: usize, num_output: usize, seed: u64) -> Array1<u32> {
	assert!(num_output >= 1);
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
	Array1::from_shape_simple_fn(rows, || rng.gen_range(0..num_output as u32))
}
