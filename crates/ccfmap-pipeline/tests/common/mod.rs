//! On-disk registration fixtures for pipeline tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ccfmap_core::spatial::{Point3, Vector3};
use ccfmap_core::transform::AffineTransform;
use ccfmap_io::write_matlab_affine;
use ccfmap_pipeline::{OutputSink, PipelineConfig, ProcessedMorphology, SharedAssets, SubjectConfig};
use nalgebra::Matrix3;
use ndarray::{Array, Array3, IxDyn};
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;

pub const SUBJECT: &str = "685111";
pub const GRID: usize = 12;

/// Header with an axis-aligned sform of the given voxel size and zero origin.
pub fn header(spacing: f32) -> NiftiHeader {
    NiftiHeader {
        sform_code: 1,
        srow_x: [spacing, 0.0, 0.0, 0.0],
        srow_y: [0.0, spacing, 0.0, 0.0],
        srow_z: [0.0, 0.0, spacing, 0.0],
        pixdim: [1.0, spacing, spacing, spacing, 1.0, 1.0, 1.0, 1.0],
        ..Default::default()
    }
}

pub fn write_image(path: &Path, spacing: f32, shape: [usize; 3]) {
    let array = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));
    WriterOptions::new(path)
        .reference_header(&header(spacing))
        .write_nifti(&array)
        .unwrap();
}

pub fn write_labels(path: &Path, spacing: f32, shape: [usize; 3], labels: &[([usize; 3], u32)]) {
    let mut array = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));
    for (index, label) in labels {
        array[*index] = *label as f32;
    }
    WriterOptions::new(path)
        .reference_header(&header(spacing))
        .write_nifti(&array)
        .unwrap();
}

/// `[x, y, z, 1, 3]` field holding the same vector everywhere.
pub fn write_constant_warp(path: &Path, spacing: f32, vector: [f32; 3]) {
    let mut array = Array::<f32, _>::zeros(IxDyn(&[GRID, GRID, GRID, 1, 3]));
    for (index, v) in array.indexed_iter_mut() {
        *v = vector[index[4]];
    }
    WriterOptions::new(path)
        .reference_header(&header(spacing))
        .write_nifti(&array)
        .unwrap();
}

pub fn translation(t: [f64; 3]) -> AffineTransform {
    AffineTransform::new(Matrix3::identity(), Vector3::new(t), Point3::origin())
}

/// Parameters of a synthetic registration.
pub struct Registration {
    /// Native voxel size, micrometres.
    pub resolution: [f64; 3],
    pub sample_affine: AffineTransform,
    pub sample_warp: [f32; 3],
    pub template_spacing: f32,
    pub atlas_spacing: f32,
}

impl Registration {
    /// Every stage reduces to the identity on native micrometres.
    pub fn identity() -> Self {
        Self {
            resolution: [1.0; 3],
            sample_affine: AffineTransform::identity(),
            sample_warp: [0.0; 3],
            template_spacing: 1.0,
            atlas_spacing: 10.0,
        }
    }
}

/// A transform directory laid out the way registration writes it, plus
/// shared assets and an SWC input directory.
pub struct Fixture {
    pub root: PathBuf,
    pub transform_dir: PathBuf,
    pub bundle: PathBuf,
    pub swc_dir: PathBuf,
    pub shared: SharedAssets,
}

impl Fixture {
    pub fn new(root: &Path, registration: &Registration) -> Self {
        let transform_dir = root.join(format!("exaSPIM_{SUBJECT}_2024-01-01"));
        let bundle = transform_dir.join("ccf_alignment");
        let meta = bundle.join("registration_metadata");
        fs::create_dir_all(&meta).unwrap();

        fs::write(
            meta.join(format!("acquisition_{SUBJECT}.json")),
            format!(
                r#"{{"subject_id": "{SUBJECT}", "resolution": {:?}, "orientation": "RAS"}}"#,
                registration.resolution
            ),
        )
        .unwrap();
        let shape = [GRID; 3];
        write_image(&meta.join(format!("{SUBJECT}_10um_loaded_zarr_img.nii.gz")), 1.0, shape);
        write_image(&meta.join(format!("{SUBJECT}_10um_resampled_zarr_img.nii.gz")), 1.0, shape);
        write_matlab_affine(
            bundle.join(format!("{SUBJECT}_to_exaSPIM_SyN_0GenericAffine.mat")),
            &registration.sample_affine,
        )
        .unwrap();
        write_constant_warp(
            &bundle.join(format!("{SUBJECT}_to_exaSPIM_SyN_1InverseWarp.nii.gz")),
            1.0,
            registration.sample_warp,
        );

        let shared_dir = root.join("shared");
        fs::create_dir_all(&shared_dir).unwrap();
        let shared = SharedAssets {
            template_to_atlas_affine: shared_dir.join("0GenericAffine.mat"),
            template_to_atlas_inverse_warp: shared_dir.join("1InverseWarp.nii.gz"),
            template: shared_dir.join("template.nii.gz"),
            atlas_template: shared_dir.join("average_template_10.nii.gz"),
            annotation: shared_dir.join("annotation_10.nii.gz"),
            ontology: shared_dir.join("structures.json"),
        };
        write_matlab_affine(&shared.template_to_atlas_affine, &AffineTransform::identity()).unwrap();
        write_constant_warp(&shared.template_to_atlas_inverse_warp, registration.template_spacing, [0.0; 3]);
        write_image(&shared.template, registration.template_spacing, shape);
        write_image(&shared.atlas_template, registration.atlas_spacing, shape);
        write_labels(&shared.annotation, 10.0, [4, 4, 4], &[([0, 0, 0], 385)]);
        fs::write(
            &shared.ontology,
            r#"[{"id": 385, "acronym": "VISp", "name": "Primary visual area"}]"#,
        )
        .unwrap();

        let swc_dir = root.join("swcs");
        fs::create_dir_all(&swc_dir).unwrap();
        Self {
            root: root.to_path_buf(),
            transform_dir,
            bundle,
            swc_dir,
            shared,
        }
    }

    pub fn write_swc(&self, name: &str, rows: &str) -> PathBuf {
        let path = self.swc_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, rows).unwrap();
        path
    }

    pub fn subject(&self) -> SubjectConfig {
        SubjectConfig::new(&self.swc_dir, &self.transform_dir)
    }

    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default().without_resampling().without_annotation();
        config.shared = self.shared.clone();
        config.grid.pyramid_level = 0;
        config
    }
}

/// Sink that keeps results in memory.
#[derive(Default)]
pub struct MemorySink {
    pub outputs: Mutex<Vec<ProcessedMorphology>>,
}

impl MemorySink {
    pub fn take(&self) -> Vec<ProcessedMorphology> {
        let mut outputs = std::mem::take(&mut *self.outputs.lock().unwrap());
        outputs.sort_by(|a, b| a.source.cmp(&b.source));
        outputs
    }
}

impl OutputSink for MemorySink {
    fn write(&self, output: &ProcessedMorphology) -> ccfmap_core::Result<Vec<PathBuf>> {
        self.outputs.lock().unwrap().push(output.clone());
        Ok(vec![output.source.with_extension("out.swc")])
    }
}
