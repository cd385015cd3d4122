//! Sampling a volume between voxel centres.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Samples a scalar volume at continuous indices.
///
/// # Arguments
/// * `data` - volume stored `[Z, Y, X]`
/// * `indices` - `[Batch, 3]` continuous indices ordered `(x, y, z)`
///
/// Returns the sampled values `[Batch]`. Indices outside the volume read the
/// nearest edge voxel.
pub trait Interpolator<B: Backend> {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1>;
}
