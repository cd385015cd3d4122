//! Grid direction cosines.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

use super::Vector;

/// Direction cosines of an image grid: column `i` is the physical unit
/// vector along index axis `i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction<const D: usize>(pub SMatrix<f64, D, D>);

impl<const D: usize> Direction<D> {
    pub fn identity() -> Self {
        Self(SMatrix::identity())
    }

    /// `None` for a singular matrix.
    pub fn try_inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    pub fn axis_direction(&self, axis: usize) -> Vector<D> {
        Vector(self.0.column(axis).into_owned())
    }

    /// Physical axis with the largest component along index axis `axis`,
    /// and that component's value. Ties go to the lower physical axis.
    pub fn dominant_component(&self, axis: usize) -> (usize, f64) {
        let column = self.0.column(axis);
        (0..D).fold((0, column[0]), |(best, value), k| {
            if column[k].abs() > value.abs() {
                (k, column[k])
            } else {
                (best, value)
            }
        })
    }

    pub fn inner(&self) -> &SMatrix<f64, D, D> {
        &self.0
    }
}

impl<const D: usize> std::ops::Index<(usize, usize)> for Direction<D> {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.0[(row, col)]
    }
}

impl<const D: usize> std::ops::IndexMut<(usize, usize)> for Direction<D> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        &mut self.0[(row, col)]
    }
}

impl<const D: usize> std::ops::Mul<Vector<D>> for Direction<D> {
    type Output = Vector<D>;

    fn mul(self, v: Vector<D>) -> Vector<D> {
        Vector(self.0 * v.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_component_of_oblique_axes() {
        let c = std::f64::consts::FRAC_1_SQRT_2;
        let mut dir = Direction::<3>::identity();
        // Axis 0 tilted toward -y, axis 1 mostly along +x.
        dir[(0, 0)] = 0.6;
        dir[(1, 0)] = -0.8;
        dir[(0, 1)] = c + 0.01;
        dir[(1, 1)] = c - 0.01;
        assert_eq!(dir.dominant_component(0), (1, -0.8));
        assert_eq!(dir.dominant_component(1).0, 0);
        assert_eq!(dir.dominant_component(2), (2, 1.0));
    }

    #[test]
    fn test_flipped_axis_and_inverse() {
        let mut flipped = Direction::<3>::identity();
        flipped[(1, 1)] = -1.0;
        assert_eq!(flipped.axis_direction(1), Vector::new([0.0, -1.0, 0.0]));
        assert_eq!(flipped.try_inverse(), Some(flipped));

        let mut singular = Direction::<3>::identity();
        singular[(2, 2)] = 0.0;
        assert!(singular.try_inverse().is_none());
    }
}
