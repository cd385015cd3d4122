//! NIfTI geometry, label volumes and displacement fields.

use std::path::Path;

use burn::tensor::backend::Backend;
use ccfmap_core::annotation::LabelVolume;
use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::image::ImageGeometry;
use ccfmap_core::spatial::{Direction, Point, Spacing};
use ccfmap_core::transform::{DisplacementField, TransformDirection};
use nalgebra::{Matrix3, Vector3};
use ndarray::IxDyn;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::debug;

use crate::frame::PhysicalFrame;
use crate::{display, is_nrrd, nrrd_io};

/// Voxel-to-world affine rows from a header: sform when set, else qform,
/// else pixdim scaling.
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    let to_f64 = |r: [f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
    if header.sform_code > 0 {
        return [to_f64(header.srow_x), to_f64(header.srow_y), to_f64(header.srow_z)];
    }

    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let dz = header.pixdim[3] as f64;
    if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;

        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * b * c - 2.0 * a * d, 2.0 * b * d + 2.0 * a * c],
            [2.0 * b * c + 2.0 * a * d, a * a + c * c - b * b - d * d, 2.0 * c * d - 2.0 * a * b],
            [2.0 * b * d - 2.0 * a * c, 2.0 * c * d + 2.0 * a * b, a * a + d * d - c * c - b * b],
        ];
        let q = [header.quatern_x as f64, header.quatern_y as f64, header.quatern_z as f64];
        let mut out = [[0.0; 4]; 3];
        for row in 0..3 {
            out[row] = [r[row][0] * dx, r[row][1] * dy, r[row][2] * dz, q[row]];
        }
        return out;
    }

    [[dx, 0.0, 0.0, 0.0], [0.0, dy, 0.0, 0.0], [0.0, 0.0, dz, 0.0]]
}

/// Geometry of the first three axes of a NIfTI header.
pub fn header_geometry(header: &NiftiHeader, frame: PhysicalFrame) -> Result<ImageGeometry> {
    let ndim = header.dim[0] as usize;
    let size = |axis: usize| if axis <= ndim { (header.dim[axis] as usize).max(1) } else { 1 };
    let shape = [size(1), size(2), size(3)];

    let mut affine = header_affine(header);
    if frame == PhysicalFrame::Lps {
        for row in affine.iter_mut().take(2) {
            for v in row.iter_mut() {
                *v = -*v;
            }
        }
    }

    let origin = Point::new([affine[0][3], affine[1][3], affine[2][3]]);
    let mut columns = [Vector3::zeros(); 3];
    let mut spacing = [0.0; 3];
    for (axis, col) in columns.iter_mut().enumerate() {
        let v = Vector3::new(affine[0][axis], affine[1][axis], affine[2][axis]);
        let norm = v.norm();
        spacing[axis] = norm;
        *col = if norm > 1e-12 { v / norm } else { v };
    }
    let direction = Direction(Matrix3::from_columns(&columns));
    ImageGeometry::new(shape, origin, Spacing::new(spacing), direction)
}

/// Read only the grid geometry of an image, without its voxels.
pub fn read_geometry(path: impl AsRef<Path>, frame: PhysicalFrame) -> Result<ImageGeometry> {
    let path = path.as_ref();
    if is_nrrd(path) {
        return nrrd_io::read_geometry(path, frame);
    }
    let header = NiftiHeader::from_file(path)
        .map_err(|e| MappingError::parse(display(path), format!("invalid NIfTI header: {e}")))?;
    header_geometry(&header, frame)
}

/// Read an integer label volume (NIfTI or NRRD) in its header frame.
pub fn read_label_volume(path: impl AsRef<Path>) -> Result<LabelVolume> {
    let path = path.as_ref();
    if is_nrrd(path) {
        return nrrd_io::read_label_volume(path);
    }
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| MappingError::parse(display(path), format!("cannot read NIfTI: {e}")))?;
    let geometry = header_geometry(obj.header(), PhysicalFrame::Header)?;
    let volume = obj
        .into_volume()
        .into_ndarray::<f64>()
        .map_err(|e| MappingError::parse(display(path), format!("cannot decode NIfTI voxels: {e}")))?;
    if volume.ndim() != 3 {
        return Err(MappingError::parse(
            display(path),
            format!("expected a 3-D label volume, found {} dimensions", volume.ndim()),
        ));
    }

    // [x, y, z] -> logical [z, y, x] walk, x fastest
    let labels = volume
        .permuted_axes(IxDyn(&[2, 1, 0]))
        .iter()
        .map(|&v| label_from_f64(v))
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| MappingError::parse(display(path), "labels must be non-negative integers"))?;
    debug!(path = %path.display(), shape = ?geometry.shape(), "read label volume");
    LabelVolume::new(geometry, labels)
}

pub(crate) fn label_from_f64(v: f64) -> Option<u32> {
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
        Some(v as u32)
    } else {
        None
    }
}

/// Read a displacement field (NIfTI `[x, y, z, 1, 3]` / `[x, y, z, 3]`, or
/// NRRD with a 3-component vector axis).
///
/// Vectors are kept as stored; only the grid geometry follows `frame`.
pub fn read_displacement_field<B: Backend>(
    path: impl AsRef<Path>,
    frame: PhysicalFrame,
    encodes: TransformDirection,
    device: &B::Device,
) -> Result<DisplacementField<B>> {
    let path = path.as_ref();
    if is_nrrd(path) {
        return nrrd_io::read_displacement_field(path, frame, encodes, device);
    }
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| MappingError::parse(display(path), format!("cannot read NIfTI: {e}")))?;
    let geometry = header_geometry(obj.header(), frame)?;
    let volume = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| MappingError::parse(display(path), format!("cannot decode NIfTI voxels: {e}")))?;

    let shape = volume.shape().to_vec();
    let axes: &[usize] = match shape.as_slice() {
        [_, _, _, 1, 3] => &[4, 2, 1, 0, 3],
        [_, _, _, 3] => &[3, 2, 1, 0],
        _ => {
            return Err(MappingError::transform_application(format!(
                "{}: displacement field shape {shape:?} is neither [x, y, z, 1, 3] nor [x, y, z, 3]",
                path.display()
            )))
        }
    };
    if shape[..3] != geometry.shape() {
        return Err(MappingError::transform_application(format!(
            "{}: voxel shape {:?} disagrees with header grid {:?}",
            path.display(),
            &shape[..3],
            geometry.shape()
        )));
    }

    // Component-major walk: c, z, y, x
    let values: Vec<f32> = volume.permuted_axes(IxDyn(axes)).iter().copied().collect();
    debug!(path = %path.display(), shape = ?geometry.shape(), ?frame, "read displacement field");
    DisplacementField::from_values(values, geometry, encodes, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ccfmap_core::spatial::Point3;
    use ndarray::{Array, Array3};
    use nifti::writer::WriterOptions;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn header_with_sform() -> NiftiHeader {
        NiftiHeader {
            sform_code: 1,
            srow_x: [2.0, 0.0, 0.0, -10.0],
            srow_y: [0.0, 3.0, 0.0, 5.0],
            srow_z: [0.0, 0.0, 4.0, 1.0],
            pixdim: [1.0, 2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0],
            ..Default::default()
        }
    }

    #[test]
    fn test_header_geometry_frames() {
        let mut header = header_with_sform();
        header.dim = [3, 4, 5, 6, 1, 1, 1, 1];

        let ras = header_geometry(&header, PhysicalFrame::Header).unwrap();
        assert_eq!(ras.shape(), [4, 5, 6]);
        assert_eq!(ras.origin().to_array(), [-10.0, 5.0, 1.0]);
        assert_eq!(ras.spacing().to_array(), [2.0, 3.0, 4.0]);
        assert_eq!(ras.orientation().unwrap().to_string(), "LPS");

        let lps = header_geometry(&header, PhysicalFrame::Lps).unwrap();
        assert_eq!(lps.origin().to_array(), [10.0, -5.0, 1.0]);
        assert_eq!(lps.orientation().unwrap().to_string(), "RAS");
        let p = lps.transform_continuous_index_to_physical_point(&Point3::new([1.0, 1.0, 1.0]));
        assert_eq!(p.to_array(), [8.0, -8.0, 5.0]);
    }

    #[test]
    fn test_read_label_volume_logical_order() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("labels.nii.gz");
        let mut array = Array3::<f32>::zeros((3, 4, 5));
        array[[2, 1, 3]] = 385.0;
        WriterOptions::new(&path)
            .reference_header(&header_with_sform())
            .write_nifti(&array)
            .map_err(|e| MappingError::parse(display(&path), e.to_string()))?;

        let labels = read_label_volume(&path)?;
        assert_eq!(labels.geometry().shape(), [3, 4, 5]);
        assert_eq!(labels.label_at([2, 1, 3]), 385);
        assert_eq!(labels.labels().iter().filter(|v| **v != 0).count(), 1);
        Ok(())
    }

    #[test]
    fn test_read_five_dimensional_field() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("warp.nii.gz");
        let mut array = Array::<f32, _>::zeros(IxDyn(&[3, 2, 2, 1, 3]));
        for i in 0..3 {
            for j in 0..2 {
                for k in 0..2 {
                    array[&[i, j, k, 0, 0][..]] = i as f32;
                    array[&[i, j, k, 0, 2][..]] = -1.0;
                }
            }
        }
        WriterOptions::new(&path)
            .reference_header(&header_with_sform())
            .write_nifti(&array)
            .map_err(|e| MappingError::parse(display(&path), e.to_string()))?;

        let field = read_displacement_field::<TestBackend>(
            &path,
            PhysicalFrame::Header,
            TransformDirection::Inverse,
            &Default::default(),
        )?;
        assert_eq!(field.geometry().shape(), [3, 2, 2]);
        // index (1, 0, 0) sits at x = -10 + 2
        let (u, inside) = field.sample(&[Point3::new([-8.0, 5.0, 1.0])])?;
        assert!(inside[0]);
        assert!((u[0][0] - 1.0).abs() < 1e-6);
        assert!((u[0][1]).abs() < 1e-6);
        assert!((u[0][2] + 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_rejects_scalar_volume_as_field() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("scalar.nii");
        WriterOptions::new(&path)
            .write_nifti(&Array3::<f32>::zeros((2, 2, 2)))
            .map_err(|e| MappingError::parse(display(&path), e.to_string()))?;
        let err = read_displacement_field::<TestBackend>(
            &path,
            PhysicalFrame::Lps,
            TransformDirection::Inverse,
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::TransformApplication(_)));
        Ok(())
    }
}
