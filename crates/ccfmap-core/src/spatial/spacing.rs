//! Voxel spacing.

use super::Vector;

/// Physical distance between neighbouring voxels along each index axis.
pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Spacing<D> {
    /// Isotropic spacing, e.g. the 10 µm CCF grid.
    pub fn uniform(value: f64) -> Self {
        Self::new([value; D])
    }

    /// Finest spacing over all axes.
    pub fn min_spacing(&self) -> f64 {
        (0..D).map(|i| self[i]).fold(f64::INFINITY, f64::min)
    }

    /// True if every component is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        (0..D).all(|i| self[i].is_finite() && self[i] > 0.0)
    }
}
