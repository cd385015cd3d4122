//! File formats for ccfmap.
//!
//! Readers return `ccfmap-core` types; every failure maps onto
//! [`ccfmap_core::MappingError`].

pub mod acquisition;
pub mod annotated_json;
pub mod frame;
pub mod itk_affine;
pub mod nifti_io;
pub mod nrrd_io;
pub mod ontology_io;
pub mod swc_io;

pub use acquisition::{read_acquisition, AcquisitionMetadata};
pub use annotated_json::{write_annotated_json, AnnotatedMorphology};
pub use frame::PhysicalFrame;
pub use itk_affine::{read_itk_affine, write_matlab_affine};
pub use nifti_io::{read_displacement_field, read_geometry, read_label_volume};
pub use ontology_io::read_ontology;
pub use swc_io::{read_swc, write_swc};

use std::path::Path;

/// True for `.nrrd` / `.nhdr` paths.
pub(crate) fn is_nrrd(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("nrrd") || e.eq_ignore_ascii_case("nhdr"))
        .unwrap_or(false)
}

pub(crate) fn display(path: &Path) -> String {
    path.display().to_string()
}
