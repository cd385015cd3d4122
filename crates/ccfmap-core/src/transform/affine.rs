//! Affine transform implementation.
//!
//! Follows the ITK convention with a fixed center:
//! `T(x) = A(x - c) + c + t`.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use super::trait_::{MappedPoints, Transform, TransformDirection};
use crate::error::{MappingError, Result};
use crate::spatial::{Point, Point3, Vector, Vector3};

/// Affine transform (linear map + translation) about a fixed center.
///
/// * `matrix` (A) - rotation, scale and shear
/// * `translation` (t)
/// * `center` (c) - fixed parameters in ITK terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    matrix: Matrix3<f64>,
    translation: Vector3,
    center: Point3,
}

impl AffineTransform {
    pub fn new(matrix: Matrix3<f64>, translation: Vector3, center: Point3) -> Self {
        Self {
            matrix,
            translation,
            center,
        }
    }

    /// Identity transform about the origin.
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector::zeros(), Point::origin())
    }

    /// Pure scaling about the origin.
    pub fn scaling(factors: [f64; 3]) -> Self {
        Self::new(
            Matrix3::from_diagonal(&nalgebra::Vector3::from(factors)),
            Vector::zeros(),
            Point::origin(),
        )
    }

    /// Build from ITK parameter lists.
    ///
    /// `parameters` holds the 9 matrix entries row-major followed by the 3
    /// translation components; `fixed_parameters` holds the center.
    pub fn from_itk_parameters(parameters: &[f64], fixed_parameters: &[f64]) -> Result<Self> {
        if parameters.len() != 12 {
            return Err(MappingError::transform_application(format!(
                "affine transform needs 12 parameters, got {}",
                parameters.len()
            )));
        }
        let center = match fixed_parameters.len() {
            0 => Point::origin(),
            3 => Point::new([fixed_parameters[0], fixed_parameters[1], fixed_parameters[2]]),
            n => {
                return Err(MappingError::transform_application(format!(
                    "affine transform needs 3 fixed parameters, got {n}"
                )))
            }
        };
        if parameters.iter().chain(fixed_parameters).any(|v| !v.is_finite()) {
            return Err(MappingError::transform_application(
                "affine parameters contain non-finite values",
            ));
        }
        let matrix = Matrix3::from_row_slice(&parameters[..9]);
        let translation = Vector::new([parameters[9], parameters[10], parameters[11]]);
        Ok(Self::new(matrix, translation, center))
    }

    /// The 12 ITK parameters: matrix row-major then translation.
    pub fn itk_parameters(&self) -> [f64; 12] {
        let mut out = [0.0; 12];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] = self.matrix[(r, c)];
            }
        }
        out[9..].copy_from_slice(&self.translation.to_array());
        out
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn translation(&self) -> &Vector3 {
        &self.translation
    }

    pub fn center(&self) -> &Point3 {
        &self.center
    }

    /// Offset of the equivalent center-free form `A x + o`.
    pub fn offset(&self) -> Vector3 {
        let c = self.center.coords();
        Vector(c.0 + self.translation.0 - self.matrix * c.0)
    }

    /// Apply the forward map to one point.
    pub fn transform_point(&self, point: &Point3) -> Point3 {
        let centered = *point - self.center;
        self.center + Vector(self.matrix * centered.0) + self.translation
    }

    /// Inverse transform about the same center.
    ///
    /// Fails when the matrix is singular.
    pub fn inverse(&self) -> Result<Self> {
        let inv = self.matrix.try_inverse().ok_or_else(|| {
            MappingError::transform_application(format!(
                "affine matrix is not invertible (det = {:e})",
                self.matrix.determinant()
            ))
        })?;
        let translation = Vector(-(inv * self.translation.0));
        Ok(Self::new(inv, translation, self.center))
    }

    /// `self` applied after `first`.
    pub fn compose(&self, first: &AffineTransform) -> Self {
        let matrix = self.matrix * first.matrix;
        let offset = self.matrix * first.offset().0 + self.offset().0;
        Self::new(matrix, Vector(offset), Point::origin())
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform for AffineTransform {
    fn transform_points(&self, points: &[Point3], direction: TransformDirection) -> Result<MappedPoints> {
        let map = match direction {
            TransformDirection::Forward => self.clone(),
            TransformDirection::Inverse => self.inverse()?,
        };
        let out = points.iter().map(|p| map.transform_point(p)).collect();
        Ok(MappedPoints::in_bounds(out))
    }
}
