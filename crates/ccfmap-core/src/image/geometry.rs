//! Image geometry with index/physical coordinate conversions.

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};
use crate::spatial::{Direction, Orientation, Point, Spacing, Vector};
use crate::transform::AffineTransform;

/// Physical embedding of a regular 3-D voxel grid.
///
/// Index axis 0 is the fastest-varying axis of the stored volume (NIfTI `i`,
/// NRRD first domain axis). Physical coordinates follow:
/// `point = origin + Direction * (index * spacing)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    /// Number of voxels along each index axis.
    shape: [usize; 3],
    /// Physical coordinate of voxel (0, 0, 0).
    origin: Point<3>,
    /// Physical distance between voxels along each axis.
    spacing: Spacing<3>,
    /// Orientation of the image axes.
    direction: Direction<3>,
}

impl ImageGeometry {
    /// Create a geometry, rejecting empty grids, non-positive spacing and
    /// singular direction matrices.
    pub fn new(
        shape: [usize; 3],
        origin: Point<3>,
        spacing: Spacing<3>,
        direction: Direction<3>,
    ) -> Result<Self> {
        if shape.iter().any(|&n| n == 0) {
            return Err(MappingError::transform_application(format!(
                "grid shape {shape:?} has an empty axis"
            )));
        }
        if !spacing.is_valid() {
            return Err(MappingError::transform_application(format!(
                "grid spacing {:?} must be finite and positive",
                spacing.to_array()
            )));
        }
        if direction.try_inverse().is_none() {
            return Err(MappingError::transform_application(
                "grid direction matrix is not invertible",
            ));
        }
        Ok(Self {
            shape,
            origin,
            spacing,
            direction,
        })
    }

    /// Axis-aligned grid with the given spacing and a zero origin.
    pub fn axis_aligned(shape: [usize; 3], spacing: Spacing<3>) -> Result<Self> {
        Self::new(shape, Point::origin(), spacing, Direction::identity())
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn origin(&self) -> &Point<3> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<3> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<3> {
        &self.direction
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Always false; construction rejects empty grids.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Orientation code of the grid, assuming an LPS physical frame.
    pub fn orientation(&self) -> Result<Orientation> {
        Orientation::from_lps_direction(&self.direction)
    }

    /// Convert a physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<3>) -> Point<3> {
        let diff = *point - self.origin;
        // Construction checked invertibility.
        let inv_dir = self.direction.try_inverse().unwrap_or_else(Direction::identity);
        let rotated = inv_dir * diff;

        let mut index = Point::<3>::origin();
        for i in 0..3 {
            index[i] = rotated[i] / self.spacing[i];
        }
        index
    }

    /// Convert a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<3>) -> Point<3> {
        let mut scaled_index = Vector::<3>::zeros();
        for i in 0..3 {
            scaled_index[i] = index[i] * self.spacing[i];
        }
        self.origin + self.direction * scaled_index
    }

    /// True if the continuous index lies inside the sampled extent
    /// `[0, n - 1]` on every axis.
    pub fn contains_continuous_index(&self, index: &Point<3>) -> bool {
        (0..3).all(|i| index[i] >= 0.0 && index[i] <= (self.shape[i] - 1) as f64)
    }

    /// Nearest voxel to a physical point, or `None` outside the grid.
    pub fn nearest_index(&self, point: &Point<3>) -> Option<[usize; 3]> {
        let index = self.transform_physical_point_to_continuous_index(point);
        let mut out = [0usize; 3];
        for i in 0..3 {
            let r = index[i].round();
            if !r.is_finite() || r < 0.0 || r >= self.shape[i] as f64 {
                return None;
            }
            out[i] = r as usize;
        }
        Some(out)
    }

    /// Row-major offset of a voxel in `[k][j][i]` storage (axis 0 fastest).
    pub fn linear_offset(&self, index: [usize; 3]) -> usize {
        (index[2] * self.shape[1] + index[1]) * self.shape[0] + index[0]
    }

    /// Index-to-physical map as an affine transform.
    pub fn index_to_physical(&self) -> AffineTransform {
        let mut matrix = *self.direction.inner();
        for c in 0..3 {
            for r in 0..3 {
                matrix[(r, c)] *= self.spacing[c];
            }
        }
        AffineTransform::new(matrix, self.origin.coords(), Point::origin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{Point3, Spacing3};

    fn rotated_geometry() -> ImageGeometry {
        let mut dir = Direction::<3>::identity();
        dir[(0, 0)] = 0.0;
        dir[(0, 1)] = -1.0;
        dir[(1, 0)] = 1.0;
        dir[(1, 1)] = 0.0;
        ImageGeometry::new(
            [10, 20, 30],
            Point3::new([5.0, -3.0, 2.0]),
            Spacing3::new([0.5, 2.0, 1.5]),
            dir,
        )
        .unwrap()
    }

    #[test]
    fn test_index_physical_roundtrip() {
        let g = rotated_geometry();
        let idx = Point3::new([1.5, 7.25, 3.0]);
        let p = g.transform_continuous_index_to_physical_point(&idx);
        let back = g.transform_physical_point_to_continuous_index(&p);
        for i in 0..3 {
            assert!((back[i] - idx[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_affine_form_matches_direct_conversion() {
        let g = rotated_geometry();
        let idx = Point3::new([2.0, 4.0, 6.0]);
        let direct = g.transform_continuous_index_to_physical_point(&idx);
        let via_affine = g.index_to_physical().transform_point(&idx);
        for i in 0..3 {
            assert!((direct[i] - via_affine[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_nearest_index_bounds() {
        let g = ImageGeometry::axis_aligned([4, 4, 4], Spacing3::uniform(10.0)).unwrap();
        assert_eq!(g.nearest_index(&Point3::new([14.0, 26.0, 0.0])), Some([1, 3, 0]));
        assert_eq!(g.nearest_index(&Point3::new([-6.0, 0.0, 0.0])), None);
        assert_eq!(g.nearest_index(&Point3::new([0.0, 36.0, 0.0])), None);
        assert_eq!(g.nearest_index(&Point3::new([0.0, 34.0, 0.0])), Some([0, 3, 0]));
    }

    #[test]
    fn test_rejects_degenerate_grids() {
        assert!(ImageGeometry::axis_aligned([0, 4, 4], Spacing3::uniform(1.0)).is_err());
        assert!(ImageGeometry::axis_aligned([4, 4, 4], Spacing3::new([1.0, -1.0, 1.0])).is_err());
        let mut singular = Direction::<3>::identity();
        singular[(2, 2)] = 0.0;
        assert!(ImageGeometry::new([2, 2, 2], Point3::origin(), Spacing3::uniform(1.0), singular).is_err());
    }

    #[test]
    fn test_linear_offset_is_x_fastest() {
        let g = ImageGeometry::axis_aligned([3, 4, 5], Spacing3::uniform(1.0)).unwrap();
        assert_eq!(g.linear_offset([1, 0, 0]), 1);
        assert_eq!(g.linear_offset([0, 1, 0]), 3);
        assert_eq!(g.linear_offset([0, 0, 1]), 12);
        assert_eq!(g.linear_offset([2, 3, 4]), 59);
    }
}
