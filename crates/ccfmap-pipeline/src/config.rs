//! Run configuration.
//!
//! Configuration values are plain serde structs with defaults. They are built
//! once (by the CLI or a batch file) and passed to the pipeline by reference.

use std::path::PathBuf;

use ccfmap_core::error::{MappingError, Result};
use serde::{Deserialize, Serialize};

/// Default template->atlas affine.
pub const DEFAULT_TEMPLATE_TO_ATLAS_AFFINE: &str =
    "/data/reg_exaspim_template_to_ccf_withGradMap_10um_v1.0/0GenericAffine.mat";
/// Default template->atlas inverse warp.
pub const DEFAULT_TEMPLATE_TO_ATLAS_INVERSE_WARP: &str =
    "/data/reg_exaspim_template_to_ccf_withGradMap_10um_v1.0/1InverseWarp.nii.gz";
/// Default atlas (CCF average) template.
pub const DEFAULT_ATLAS_TEMPLATE: &str =
    "/data/allen_mouse_ccf/average_template/average_template_10.nii.gz";
/// Default sample-registration template.
pub const DEFAULT_TEMPLATE: &str =
    "/data/exaspim_template_7subjects_nomask_10um_round6_template_only/fixed_median.nii.gz";
/// Default CCF annotation volume.
pub const DEFAULT_ANNOTATION: &str = "/data/allen_mouse_ccf/annotation/ccf_2017/annotation_10.nrrd";
/// Default structure ontology.
pub const DEFAULT_ONTOLOGY: &str = "/data/allen_mouse_ccf/annotation/structure_graph.json";

/// Subject-independent assets, loaded once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedAssets {
    pub template_to_atlas_affine: PathBuf,
    pub template_to_atlas_inverse_warp: PathBuf,
    pub template: PathBuf,
    pub atlas_template: PathBuf,
    pub annotation: PathBuf,
    pub ontology: PathBuf,
}

impl Default for SharedAssets {
    fn default() -> Self {
        Self {
            template_to_atlas_affine: DEFAULT_TEMPLATE_TO_ATLAS_AFFINE.into(),
            template_to_atlas_inverse_warp: DEFAULT_TEMPLATE_TO_ATLAS_INVERSE_WARP.into(),
            template: DEFAULT_TEMPLATE.into(),
            atlas_template: DEFAULT_ATLAS_TEMPLATE.into(),
            annotation: DEFAULT_ANNOTATION.into(),
            ontology: DEFAULT_ONTOLOGY.into(),
        }
    }
}

/// Explicit per-subject paths. A set slot bypasses the naming convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetOverrides {
    pub acquisition: Option<PathBuf>,
    pub loaded_image: Option<PathBuf>,
    pub resampled_image: Option<PathBuf>,
    pub sample_affine: Option<PathBuf>,
    pub sample_inverse_warp: Option<PathBuf>,
}

/// Optional manual correction field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualFieldConfig {
    /// A field file, or a directory to search.
    pub path: Option<PathBuf>,
    /// Exact file name inside `path` when it is a directory.
    pub filename: Option<String>,
}

/// Naming-convention parameters and grid constants of the registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Pyramid level of the loaded image relative to native resolution.
    pub pyramid_level: u32,
    /// Voxel size of the atlas grid, micrometres.
    pub atlas_resolution_um: f64,
    /// Template name used in registration file names.
    pub template_name: String,
    /// Resolution tag used in registration-metadata file names.
    pub resolution_tag: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            pyramid_level: 2,
            atlas_resolution_um: 10.0,
            template_name: "exaSPIM".into(),
            resolution_tag: "10um".into(),
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.atlas_resolution_um.is_finite() && self.atlas_resolution_um > 0.0) {
            return Err(MappingError::invalid_configuration(format!(
                "atlas resolution must be positive, got {}",
                self.atlas_resolution_um
            )));
        }
        if self.pyramid_level > 16 {
            return Err(MappingError::invalid_configuration(format!(
                "pyramid level {} is out of range",
                self.pyramid_level
            )));
        }
        Ok(())
    }
}

/// One subject to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectConfig {
    /// Directory holding this subject's SWC files (searched recursively).
    pub swc_dir: PathBuf,
    /// Transform bundle directory.
    pub transform_dir: PathBuf,
    /// Subject id; inferred from the bundle directory name when absent.
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub overrides: AssetOverrides,
    #[serde(default)]
    pub manual_field: ManualFieldConfig,
}

impl SubjectConfig {
    pub fn new(swc_dir: impl Into<PathBuf>, transform_dir: impl Into<PathBuf>) -> Self {
        Self {
            swc_dir: swc_dir.into(),
            transform_dir: transform_dir.into(),
            subject_id: None,
            overrides: AssetOverrides::default(),
            manual_field: ManualFieldConfig::default(),
        }
    }

    pub fn with_subject_id(mut self, id: impl Into<String>) -> Self {
        self.subject_id = Some(id.into());
        self
    }
}

/// Processing options shared by every subject of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub shared: SharedAssets,
    pub grid: GridConfig,
    /// Target node spacing in micrometres; `None` keeps the transformed tree.
    pub node_spacing_um: Option<f64>,
    /// Add the SWC `# OFFSET` header to coordinates when reading.
    pub apply_swc_offset: bool,
    /// Re-derive soma/axon/dendrite types from topology.
    pub assign_structure_types: bool,
    /// Look up atlas structures for every output node.
    pub annotate: bool,
    /// Stop at the first recorded failure.
    pub fail_fast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shared: SharedAssets::default(),
            grid: GridConfig::default(),
            node_spacing_um: Some(1.0),
            apply_swc_offset: true,
            assign_structure_types: false,
            annotate: true,
            fail_fast: false,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings that reproduce the legacy aligned-SWC run: transform only,
    /// no resampling and no annotation.
    pub fn parity() -> Self {
        Self {
            node_spacing_um: None,
            annotate: false,
            ..Self::default()
        }
    }

    pub fn with_node_spacing(mut self, spacing_um: f64) -> Self {
        self.node_spacing_um = Some(spacing_um);
        self
    }

    pub fn without_resampling(mut self) -> Self {
        self.node_spacing_um = None;
        self
    }

    pub fn without_annotation(mut self) -> Self {
        self.annotate = false;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Check values that would otherwise fail deep inside a worker.
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        if let Some(s) = self.node_spacing_um {
            if !(s.is_finite() && s > 0.0) {
                return Err(MappingError::invalid_configuration(format!(
                    "node spacing must be positive, got {s}"
                )));
            }
        }
        Ok(())
    }
}
