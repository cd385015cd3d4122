//! Assembly of the sample -> template -> atlas transform chain.

use burn::tensor::backend::Backend;
use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::image::ImageGeometry;
use ccfmap_core::spatial::{Point3, Vector3};
use ccfmap_core::transform::{
    AffineTransform, DisplacementField, Space, SpatialTransformStage, TransformChain,
    TransformDirection,
};
use ccfmap_io::AcquisitionMetadata;
use nalgebra::Matrix3;

use crate::config::GridConfig;

/// Per-subject registration inputs, read from a [`RegistrationBundle`].
///
/// [`RegistrationBundle`]: crate::assets::RegistrationBundle
#[derive(Debug, Clone)]
pub struct SampleRegistration<B: Backend> {
    pub acquisition: AcquisitionMetadata,
    /// Shape of the loaded (pyramid-level) image in acquisition axis order.
    pub loaded_shape: [usize; 3],
    /// Grid of the reoriented, resampled image the registration ran on.
    pub resampled: ImageGeometry,
    pub affine: AffineTransform,
    pub inverse_warp: DisplacementField<B>,
    pub manual_field: Option<DisplacementField<B>>,
}

/// Subject-independent template -> atlas registration.
#[derive(Debug, Clone)]
pub struct TemplateRegistration<B: Backend> {
    pub template: ImageGeometry,
    pub affine: AffineTransform,
    pub inverse_warp: DisplacementField<B>,
    pub atlas_template: ImageGeometry,
}

/// Map from resampled-grid index to native micrometres.
///
/// The inverse takes a native point to its continuous index in the resampled
/// image: divide by the acquisition resolution and the pyramid factor, scale
/// by the loaded->resampled shape ratio, then permute and flip axes from the
/// acquisition orientation to the resampled image's orientation.
pub fn acquisition_grid_transform(
    acquisition: &AcquisitionMetadata,
    pyramid_level: u32,
    loaded_shape: [usize; 3],
    resampled: &ImageGeometry,
) -> Result<AffineTransform> {
    if loaded_shape.iter().any(|&n| n == 0) {
        return Err(MappingError::transform_application(format!(
            "loaded image shape {loaded_shape:?} has an empty axis"
        )));
    }
    let target = resampled.orientation()?;
    let mapping = acquisition.orientation.mapping_to(&target);
    let pyramid = f64::from(2_u32.pow(pyramid_level));
    let out_shape = resampled.shape();

    let mut matrix = Matrix3::zeros();
    let mut offset = [0.0; 3];
    for (j, &(k, flip)) in mapping.iter().enumerate() {
        let ratio = out_shape[j] as f64 / loaded_shape[k] as f64;
        let factor = ratio / (acquisition.resolution_um[k] * pyramid);
        if flip {
            matrix[(j, k)] = -factor;
            offset[j] = out_shape[j] as f64 - 1.0;
        } else {
            matrix[(j, k)] = factor;
        }
    }
    AffineTransform::new(matrix, Vector3::new(offset), Point3::origin()).inverse()
}

/// Builds [`TransformChain`]s from loaded registration inputs.
#[derive(Debug, Clone)]
pub struct TransformChainBuilder<'a> {
    grid: &'a GridConfig,
}

impl<'a> TransformChainBuilder<'a> {
    pub fn new(grid: &'a GridConfig) -> Self {
        Self { grid }
    }

    /// Stages from native sample micrometres to CCF micrometres.
    ///
    /// Registration files are stored in their fixed->moving sense, so every
    /// registration stage is applied inverse. Fields are cloned cheaply; the
    /// tensors share storage.
    pub fn stages<B: Backend>(
        &self,
        sample: &SampleRegistration<B>,
        template: &TemplateRegistration<B>,
    ) -> Result<Vec<SpatialTransformStage<B>>> {
        use TransformDirection::{Forward, Inverse};

        let acquisition_grid = acquisition_grid_transform(
            &sample.acquisition,
            self.grid.pyramid_level,
            sample.loaded_shape,
            &sample.resampled,
        )?;
        let res = self.grid.atlas_resolution_um;

        let mut stages = vec![
            SpatialTransformStage::affine(
                "acquisition-grid",
                acquisition_grid,
                Inverse,
                Space::SampleNative,
                Space::SampleGrid,
            ),
            SpatialTransformStage::affine(
                "resampled-image",
                sample.resampled.index_to_physical(),
                Forward,
                Space::SampleGrid,
                Space::SamplePhysical,
            ),
            SpatialTransformStage::displacement_field(
                "sample-inverse-warp",
                sample.inverse_warp.clone(),
                Inverse,
                Space::SamplePhysical,
                Space::SampleTemplateMid,
            ),
            SpatialTransformStage::affine(
                "sample-affine",
                sample.affine.clone(),
                Inverse,
                Space::SampleTemplateMid,
                Space::TemplateRegistered,
            ),
            SpatialTransformStage::affine(
                "sample-warp-grid",
                sample.inverse_warp.geometry().index_to_physical(),
                Inverse,
                Space::TemplateRegistered,
                Space::TemplateGrid,
            ),
            SpatialTransformStage::affine(
                "template-image",
                template.template.index_to_physical(),
                Forward,
                Space::TemplateGrid,
                Space::TemplatePhysical,
            ),
            SpatialTransformStage::displacement_field(
                "atlas-inverse-warp",
                template.inverse_warp.clone(),
                Inverse,
                Space::TemplatePhysical,
                Space::TemplateAtlasMid,
            ),
            SpatialTransformStage::affine(
                "atlas-affine",
                template.affine.clone(),
                Inverse,
                Space::TemplateAtlasMid,
                Space::AtlasPhysical,
            ),
            SpatialTransformStage::affine(
                "atlas-template-image",
                template.atlas_template.index_to_physical(),
                Inverse,
                Space::AtlasPhysical,
                Space::AtlasGrid,
            ),
            SpatialTransformStage::affine(
                "ccf-grid",
                AffineTransform::scaling([res; 3]),
                Forward,
                Space::AtlasGrid,
                Space::Ccf,
            ),
        ];
        if let Some(field) = &sample.manual_field {
            stages.push(SpatialTransformStage::displacement_field(
                "manual-correction",
                field.clone(),
                Forward,
                Space::Ccf,
                Space::Ccf,
            ));
        }
        Ok(stages)
    }

    pub fn build<B: Backend>(
        &self,
        sample: &SampleRegistration<B>,
        template: &TemplateRegistration<B>,
    ) -> Result<TransformChain<B>> {
        TransformChain::new(self.stages(sample, template)?)
    }
}
