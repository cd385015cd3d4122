//! Loading registration inputs from disk.

use burn::tensor::backend::Backend;
use ccfmap_core::annotation::StructureAnnotation;
use ccfmap_core::error::Result;
use ccfmap_core::transform::TransformDirection;
use ccfmap_io::{
    read_acquisition, read_displacement_field, read_geometry, read_itk_affine, read_label_volume,
    read_ontology, PhysicalFrame,
};
use tracing::{debug, info};

use crate::assets::{validate_shared, RegistrationBundle};
use crate::chain_builder::{SampleRegistration, TemplateRegistration};
use crate::config::PipelineConfig;

/// Read-only assets shared by every subject of a run.
#[derive(Debug, Clone)]
pub struct SharedResources<B: Backend> {
    pub template: TemplateRegistration<B>,
    pub annotation: Option<StructureAnnotation>,
}

impl<B: Backend> SharedResources<B> {
    /// Check and load the shared assets. Called once, before any subject.
    pub fn load(config: &PipelineConfig, device: &B::Device) -> Result<Self> {
        validate_shared(&config.shared, config.annotate)?;
        let shared = &config.shared;

        info!(
            affine = %shared.template_to_atlas_affine.display(),
            warp = %shared.template_to_atlas_inverse_warp.display(),
            "loading template->atlas registration"
        );
        let template = TemplateRegistration {
            template: read_geometry(&shared.template, PhysicalFrame::Lps)?,
            affine: read_itk_affine(&shared.template_to_atlas_affine)?,
            inverse_warp: read_displacement_field(
                &shared.template_to_atlas_inverse_warp,
                PhysicalFrame::Lps,
                TransformDirection::Inverse,
                device,
            )?,
            atlas_template: read_geometry(&shared.atlas_template, PhysicalFrame::Lps)?,
        };

        let annotation = if config.annotate {
            info!(volume = %shared.annotation.display(), "loading atlas annotation");
            let volume = read_label_volume(&shared.annotation)?;
            let ontology = read_ontology(&shared.ontology)?;
            debug!(structures = ontology.len(), "ontology loaded");
            Some(StructureAnnotation::new(volume, ontology))
        } else {
            None
        };

        Ok(Self {
            template,
            annotation,
        })
    }
}

/// Read the per-subject registration inputs a bundle points at.
///
/// Registration files are read into the LPS frame ANTs writes them in; the
/// manual field stays in its header frame (CCF micrometres).
pub fn load_sample_registration<B: Backend>(
    bundle: &RegistrationBundle,
    device: &B::Device,
) -> Result<SampleRegistration<B>> {
    let acquisition = read_acquisition(&bundle.acquisition.path)?;
    let loaded_shape = read_geometry(&bundle.loaded_image.path, PhysicalFrame::Lps)?.shape();
    let resampled = read_geometry(&bundle.resampled_image.path, PhysicalFrame::Lps)?;
    let affine = read_itk_affine(&bundle.sample_affine.path)?;
    let inverse_warp = read_displacement_field(
        &bundle.sample_inverse_warp.path,
        PhysicalFrame::Lps,
        TransformDirection::Inverse,
        device,
    )?;
    let manual_field = bundle
        .manual_field
        .path()
        .map(|p| {
            read_displacement_field(p, PhysicalFrame::Header, TransformDirection::Forward, device)
        })
        .transpose()?;

    debug!(
        subject = %bundle.subject_id,
        orientation = %acquisition.orientation,
        ?loaded_shape,
        resampled_shape = ?resampled.shape(),
        manual = manual_field.is_some(),
        "sample registration loaded"
    );
    Ok(SampleRegistration {
        acquisition,
        loaded_shape,
        resampled,
        affine,
        inverse_warp,
        manual_field,
    })
}
