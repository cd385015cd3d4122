//! Physical points and continuous voxel indices.

use nalgebra::Point as NaPoint;
use serde::{Deserialize, Serialize};
use super::Vector;

/// Node coordinates, image origins and continuous voxel indices, in f64.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point<const D: usize>(pub NaPoint<f64, D>);

impl<const D: usize> Point<D> {
    pub fn new(coords: [f64; D]) -> Self {
        Self(NaPoint::from(coords))
    }

    pub fn origin() -> Self {
        Self(NaPoint::origin())
    }

    pub fn to_array(&self) -> [f64; D] {
        self.0.coords.into()
    }

    /// Position vector from the origin.
    pub fn coords(&self) -> Vector<D> {
        Vector(self.0.coords)
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Self) -> f64 {
        nalgebra::distance(&self.0, &other.0)
    }

    /// Linear interpolation towards `other` at parameter `t` in `[0, 1]`.
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self(self.0 + (other.0 - self.0) * t)
    }

    /// True if every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.0.coords.iter().all(|c| c.is_finite())
    }
}

impl<const D: usize> std::ops::Index<usize> for Point<D> {
    type Output = f64;

    fn index(&self, axis: usize) -> &f64 {
        &self.0.coords[axis]
    }
}

impl<const D: usize> std::ops::IndexMut<usize> for Point<D> {
    fn index_mut(&mut self, axis: usize) -> &mut f64 {
        &mut self.0.coords[axis]
    }
}

impl<const D: usize> std::ops::Sub for Point<D> {
    type Output = Vector<D>;

    fn sub(self, from: Self) -> Vector<D> {
        Vector(self.0 - from.0)
    }
}

impl<const D: usize> std::ops::Add<Vector<D>> for Point<D> {
    type Output = Self;

    fn add(self, offset: Vector<D>) -> Self {
        Self(self.0 + offset.0)
    }
}

impl<const D: usize> std::ops::Sub<Vector<D>> for Point<D> {
    type Output = Self;

    fn sub(self, offset: Vector<D>) -> Self {
        Self(self.0 - offset.0)
    }
}
