//! Displacements and direction columns.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// A physical displacement, such as a displacement-field sample or the
/// difference of two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector<const D: usize>(pub SVector<f64, D>);

impl<const D: usize> Vector<D> {
    pub fn new(components: [f64; D]) -> Self {
        Self(SVector::from(components))
    }

    pub fn zeros() -> Self {
        Self(SVector::zeros())
    }

    pub fn to_array(&self) -> [f64; D] {
        self.0.into()
    }

    pub fn norm(&self) -> f64 {
        self.0.norm()
    }

    /// Largest absolute component.
    pub fn max_abs(&self) -> f64 {
        self.0.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()))
    }

    /// Component-wise product.
    pub fn component_mul(&self, other: &Self) -> Self {
        Self(self.0.component_mul(&other.0))
    }

    /// Component-wise division.
    pub fn component_div(&self, other: &Self) -> Self {
        Self(self.0.component_div(&other.0))
    }
}

impl<const D: usize> std::ops::Index<usize> for Vector<D> {
    type Output = f64;

    fn index(&self, axis: usize) -> &f64 {
        &self.0[axis]
    }
}

impl<const D: usize> std::ops::IndexMut<usize> for Vector<D> {
    fn index_mut(&mut self, axis: usize) -> &mut f64 {
        &mut self.0[axis]
    }
}

impl<const D: usize> std::ops::Add for Vector<D> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl<const D: usize> std::ops::Sub for Vector<D> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<const D: usize> std::ops::Mul<f64> for Vector<D> {
    type Output = Self;

    fn mul(self, factor: f64) -> Self {
        Self(self.0 * factor)
    }
}

impl<const D: usize> std::ops::Neg for Vector<D> {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Vector3 = Vector<3>;

    #[test]
    fn test_displacement_arithmetic() {
        let u = Vector3::new([1.0, 2.0, 3.0]);
        let w = Vector3::new([4.0, 5.0, 6.0]);
        assert_eq!(u + w - w, u);
        assert_eq!(-(u * 2.0), Vector3::new([-2.0, -4.0, -6.0]));
        assert_eq!(Vector3::zeros().norm(), 0.0);
    }

    #[test]
    fn test_component_ops() {
        let v = Vector3::new([2.0, 4.0, 6.0]);
        let s = Vector3::new([2.0, 2.0, 3.0]);
        assert_eq!(v.component_div(&s), Vector3::new([1.0, 2.0, 2.0]));
        assert_eq!(v.component_mul(&s), Vector3::new([4.0, 8.0, 18.0]));
        assert_eq!(Vector3::new([1.0, -7.0, 3.0]).max_abs(), 7.0);
    }
}
