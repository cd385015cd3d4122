//! Trilinear interpolation on the tensor backend.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};

use super::trait_::Interpolator;

/// Trilinear interpolator with clamp-to-edge lookup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

/// Lower and upper neighbour along one index axis, plus the weight of the
/// upper one. The continuous index is clamped to `[0, extent - 1]` first.
fn axis_neighbours<B: Backend>(
    indices: &Tensor<B, 2>,
    column: usize,
    extent: usize,
) -> (Tensor<B, 1, Int>, Tensor<B, 1, Int>, Tensor<B, 1>) {
    let last = extent.saturating_sub(1) as f64;
    let t = indices.clone().narrow(1, column, 1).squeeze::<1>(1).clamp(0.0, last);
    let lo = t.clone().floor();
    let upper_weight = t - lo.clone();
    let hi = (lo.clone() + 1.0).clamp(0.0, last);
    (lo.int(), hi.int(), upper_weight)
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [nz, ny, nx] = data.dims();
        let [count, _] = indices.dims();
        let flat = data.clone().reshape([nz * ny * nx]);
        let row = nx as i32;
        let plane = (ny * nx) as i32;

        let (x_lo, x_hi, wx) = axis_neighbours(&indices, 0, nx);
        let (y_lo, y_hi, wy) = axis_neighbours(&indices, 1, ny);
        let (z_lo, z_hi, wz) = axis_neighbours(&indices, 2, nz);

        // Sum of the eight corner values weighted by their opposite volumes.
        let mut out = Tensor::<B, 1>::zeros([count], &data.device());
        for (zi, zw) in [(&z_lo, wz.clone().neg() + 1.0), (&z_hi, wz)] {
            for (yi, yw) in [(&y_lo, wy.clone().neg() + 1.0), (&y_hi, wy.clone())] {
                for (xi, xw) in [(&x_lo, wx.clone().neg() + 1.0), (&x_hi, wx.clone())] {
                    let offset = zi.clone() * plane + yi.clone() * row + xi.clone();
                    let corner = flat.clone().gather(0, offset);
                    out = out + corner * (xw * yw.clone() * zw.clone());
                }
            }
        }
        out
    }
}
