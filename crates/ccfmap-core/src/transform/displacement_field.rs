//! Dense displacement field transform.
//!
//! Each voxel of a regular grid stores a physical displacement vector. The
//! vectors are held on the tensor backend as `[3, Z, Y, X]` and sampled with
//! trilinear interpolation.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use tracing::debug;

use super::trait_::{MappedPoints, Transform, TransformDirection};
use crate::error::{MappingError, Result};
use crate::image::ImageGeometry;
use crate::interpolation::{Interpolator, LinearInterpolator};
use crate::spatial::{Point3, Vector, Vector3};

/// Iteration cap for solving the opposite direction of a field.
const MAX_INVERSION_ITERATIONS: usize = 50;

/// Convergence threshold for the inversion, as a fraction of the smallest
/// grid spacing.
const INVERSION_TOLERANCE: f64 = 1e-4;

/// Dense 3-D displacement field on an image grid.
///
/// `encodes` is the direction the stored vectors describe: applying the
/// field in that direction maps `x` to `x + u(x)`.
#[derive(Debug, Clone)]
pub struct DisplacementField<B: Backend> {
    /// Displacement components with shape `[3, Z, Y, X]`
    components: Tensor<B, 4>,
    geometry: ImageGeometry,
    encodes: TransformDirection,
}

impl<B: Backend> DisplacementField<B> {
    /// Wrap a component tensor, checking it against the grid geometry.
    pub fn new(
        components: Tensor<B, 4>,
        geometry: ImageGeometry,
        encodes: TransformDirection,
    ) -> Result<Self> {
        let [nx, ny, nz] = geometry.shape();
        let dims = components.dims();
        if dims != [3, nz, ny, nx] {
            return Err(MappingError::transform_application(format!(
                "displacement field tensor {dims:?} does not match grid [3, {nz}, {ny}, {nx}]"
            )));
        }
        Ok(Self {
            components,
            geometry,
            encodes,
        })
    }

    /// Build from component-major values: all x components, then y, then z,
    /// each stored with axis 0 fastest.
    pub fn from_values(
        values: Vec<f32>,
        geometry: ImageGeometry,
        encodes: TransformDirection,
        device: &B::Device,
    ) -> Result<Self> {
        let [nx, ny, nz] = geometry.shape();
        let expected = 3 * geometry.len();
        if values.len() != expected {
            return Err(MappingError::transform_application(format!(
                "displacement field holds {} values, grid {:?} with 3 components needs {}",
                values.len(),
                geometry.shape(),
                expected
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MappingError::transform_application(
                "displacement field contains non-finite vectors",
            ));
        }
        let data = TensorData::new(values, Shape::new([3, nz, ny, nx]));
        Self::new(Tensor::from_data(data, device), geometry, encodes)
    }

    /// Field of zero vectors.
    pub fn zeros(geometry: ImageGeometry, encodes: TransformDirection, device: &B::Device) -> Self {
        let [nx, ny, nz] = geometry.shape();
        Self {
            components: Tensor::zeros([3, nz, ny, nx], device),
            geometry,
            encodes,
        }
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn encodes(&self) -> TransformDirection {
        self.encodes
    }

    /// Component tensor `[3, Z, Y, X]`.
    pub fn components(&self) -> Tensor<B, 4> {
        self.components.clone()
    }

    /// Interpolated displacement at each point, plus whether the point lies
    /// inside the grid. Outside points read the nearest in-grid vector.
    pub fn sample(&self, points: &[Point3]) -> Result<(Vec<Vector3>, Vec<bool>)> {
        if points.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut flat = Vec::with_capacity(points.len() * 3);
        let mut in_bounds = Vec::with_capacity(points.len());
        for p in points {
            let index = self.geometry.transform_physical_point_to_continuous_index(p);
            let cast = index.to_array().map(|v| v as f32);
            if cast.iter().any(|v| !v.is_finite()) {
                return Err(MappingError::transform_application(format!(
                    "cannot sample displacement at non-finite point {:?}",
                    p.to_array()
                )));
            }
            in_bounds.push(self.geometry.contains_continuous_index(&index));
            flat.extend(cast);
        }

        let device = self.components.device();
        let n = points.len();
        let indices = Tensor::<B, 2>::from_data(TensorData::new(flat, Shape::new([n, 3])), &device);

        let interpolator = LinearInterpolator::new();
        let mut per_component = Vec::with_capacity(3);
        for c in 0..3 {
            let volume = self.components.clone().narrow(0, c, 1).squeeze::<3>(0);
            let values = interpolator
                .interpolate(&volume, indices.clone())
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| MappingError::transform_application(format!("field readback failed: {e:?}")))?;
            per_component.push(values);
        }

        let vectors = (0..n)
            .map(|i| {
                Vector::new([
                    per_component[0][i] as f64,
                    per_component[1][i] as f64,
                    per_component[2][i] as f64,
                ])
            })
            .collect();
        Ok((vectors, in_bounds))
    }

    /// `x + u(x)` for every point.
    fn apply_encoded(&self, points: &[Point3]) -> Result<MappedPoints> {
        let (u, in_bounds) = self.sample(points)?;
        let points = points.iter().zip(&u).map(|(p, d)| *p + *d).collect();
        Ok(MappedPoints { points, in_bounds })
    }

    /// Solve `y + u(y) = x` for every point by fixed-point iteration.
    fn apply_opposite(&self, points: &[Point3]) -> Result<MappedPoints> {
        let tolerance = INVERSION_TOLERANCE * self.geometry.spacing().min_spacing();
        let (u, mut in_bounds) = self.sample(points)?;
        let mut current: Vec<Point3> = points.iter().zip(&u).map(|(p, d)| *p - *d).collect();

        for iteration in 0..MAX_INVERSION_ITERATIONS {
            let (u, flags) = self.sample(&current)?;
            in_bounds = flags;
            let mut max_step = 0.0_f64;
            for ((y, x), d) in current.iter_mut().zip(points).zip(&u) {
                let next = *x - *d;
                max_step = max_step.max((next - *y).max_abs());
                *y = next;
            }
            if max_step <= tolerance {
                debug!(iteration, max_step, "displacement field inversion converged");
                return Ok(MappedPoints {
                    points: current,
                    in_bounds,
                });
            }
        }
        debug!(
            iterations = MAX_INVERSION_ITERATIONS,
            "displacement field inversion stopped at iteration cap"
        );
        Ok(MappedPoints {
            points: current,
            in_bounds,
        })
    }
}

impl<B: Backend> Transform for DisplacementField<B> {
    fn transform_points(&self, points: &[Point3], direction: TransformDirection) -> Result<MappedPoints> {
        if direction == self.encodes {
            self.apply_encoded(points)
        } else {
            self.apply_opposite(points)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{Direction, Point, Spacing3};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn grid() -> ImageGeometry {
        ImageGeometry::new(
            [5, 4, 3],
            Point::new([10.0, 0.0, -5.0]),
            Spacing3::new([2.0, 2.0, 2.0]),
            Direction::identity(),
        )
        .unwrap()
    }

    fn constant_field(v: [f32; 3], encodes: TransformDirection) -> DisplacementField<TestBackend> {
        let g = grid();
        let n = g.len();
        let mut values = Vec::with_capacity(3 * n);
        for c in v {
            values.extend(std::iter::repeat(c).take(n));
        }
        DisplacementField::from_values(values, g, encodes, &Default::default()).unwrap()
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = DisplacementField::<TestBackend>::from_values(
            vec![0.0; 10],
            grid(),
            TransformDirection::Forward,
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::TransformApplication(_)));
    }

    #[test]
    fn test_rejects_mismatched_tensor() {
        let t = Tensor::<TestBackend, 4>::zeros([3, 5, 4, 3], &Default::default());
        assert!(DisplacementField::new(t, grid(), TransformDirection::Forward).is_err());
    }

    #[test]
    fn test_constant_field_adds_vector() {
        let field = constant_field([1.0, -2.0, 0.5], TransformDirection::Inverse);
        let out = field
            .transform_points(&[Point3::new([12.0, 2.0, -3.0])], TransformDirection::Inverse)
            .unwrap();
        assert_eq!(out.points[0], Point3::new([13.0, 0.0, -2.5]));
        assert!(out.in_bounds[0]);
    }

    #[test]
    fn test_opposite_direction_subtracts_constant_vector() {
        let field = constant_field([1.0, -2.0, 0.5], TransformDirection::Forward);
        let out = field
            .transform_points(&[Point3::new([12.0, 2.0, -3.0])], TransformDirection::Inverse)
            .unwrap();
        let p = out.points[0];
        assert!((p[0] - 11.0).abs() < 1e-6);
        assert!((p[1] - 4.0).abs() < 1e-6);
        assert!((p[2] + 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_outside_grid_is_flagged_and_clamped() {
        let field = constant_field([1.0, 1.0, 1.0], TransformDirection::Forward);
        let out = field
            .transform_points(&[Point3::new([100.0, 2.0, -3.0])], TransformDirection::Forward)
            .unwrap();
        assert!(!out.in_bounds[0]);
        assert_eq!(out.points[0], Point3::new([101.0, 3.0, -2.0]));
    }

    #[test]
    fn test_non_finite_point_is_an_error() {
        let field = constant_field([1.0, 1.0, 1.0], TransformDirection::Inverse);
        for bad in [f64::NAN, f64::INFINITY, 1e300] {
            let res = field.transform_points(
                &[Point3::new([12.0, 2.0, -3.0]), Point3::new([bad, 2.0, -3.0])],
                TransformDirection::Inverse,
            );
            assert!(matches!(res, Err(MappingError::TransformApplication(_))), "{bad}");
        }
    }

    #[test]
    fn test_linear_field_is_interpolated() {
        // u_x = index i along axis 0 (physical x = 10 + 2 i)
        let g = grid();
        let [nx, ny, nz] = g.shape();
        let mut values = Vec::new();
        for _k in 0..nz {
            for _j in 0..ny {
                for i in 0..nx {
                    values.push(i as f32);
                }
            }
        }
        values.extend(std::iter::repeat(0.0).take(2 * g.len()));
        let field =
            DisplacementField::<TestBackend>::from_values(values, g, TransformDirection::Forward, &Default::default())
                .unwrap();
        let (u, flags) = field.sample(&[Point3::new([13.0, 1.0, -4.0])]).unwrap();
        assert!((u[0][0] - 1.5).abs() < 1e-6);
        assert!(flags[0]);
    }
}
