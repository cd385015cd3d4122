//! Transform stages: one transform, a direction and the spaces it connects.

use std::fmt;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use super::affine::AffineTransform;
use super::displacement_field::DisplacementField;
use super::trait_::{MappedPoints, Transform, TransformDirection};
use crate::error::Result;
use crate::spatial::Point3;

/// Coordinate spaces a point passes through between native sample space and
/// the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    /// Sample micrometres as written in the input SWC.
    SampleNative,
    /// Continuous voxel index of the resampled sample image.
    SampleGrid,
    /// Sample image physical space (LPS).
    SamplePhysical,
    /// After the sample->template warp, before its affine.
    SampleTemplateMid,
    /// Template physical space as seen by the sample registration.
    TemplateRegistered,
    /// Continuous voxel index of the template grid.
    TemplateGrid,
    /// Template volume physical space (LPS).
    TemplatePhysical,
    /// After the template->atlas warp, before its affine.
    TemplateAtlasMid,
    /// Atlas template physical space (LPS).
    AtlasPhysical,
    /// Continuous voxel index of the atlas template.
    AtlasGrid,
    /// CCF micrometres.
    Ccf,
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SampleNative => "sample-native",
            Self::SampleGrid => "sample-grid",
            Self::SamplePhysical => "sample-physical",
            Self::SampleTemplateMid => "sample-template-mid",
            Self::TemplateRegistered => "template-registered",
            Self::TemplateGrid => "template-grid",
            Self::TemplatePhysical => "template-physical",
            Self::TemplateAtlasMid => "template-atlas-mid",
            Self::AtlasPhysical => "atlas-physical",
            Self::AtlasGrid => "atlas-grid",
            Self::Ccf => "ccf",
        };
        f.write_str(name)
    }
}

/// The transform a stage wraps.
#[derive(Debug, Clone)]
pub enum StageKind<B: Backend> {
    Affine(AffineTransform),
    DisplacementField(DisplacementField<B>),
}

impl<B: Backend> StageKind<B> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Affine(_) => "affine",
            Self::DisplacementField(_) => "displacement-field",
        }
    }
}

/// One step of a transform chain.
#[derive(Debug, Clone)]
pub struct SpatialTransformStage<B: Backend> {
    name: String,
    kind: StageKind<B>,
    direction: TransformDirection,
    source: Space,
    target: Space,
}

impl<B: Backend> SpatialTransformStage<B> {
    pub fn new(
        name: impl Into<String>,
        kind: StageKind<B>,
        direction: TransformDirection,
        source: Space,
        target: Space,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            direction,
            source,
            target,
        }
    }

    pub fn affine(
        name: impl Into<String>,
        transform: AffineTransform,
        direction: TransformDirection,
        source: Space,
        target: Space,
    ) -> Self {
        Self::new(name, StageKind::Affine(transform), direction, source, target)
    }

    pub fn displacement_field(
        name: impl Into<String>,
        field: DisplacementField<B>,
        direction: TransformDirection,
        source: Space,
        target: Space,
    ) -> Self {
        Self::new(name, StageKind::DisplacementField(field), direction, source, target)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StageKind<B> {
        &self.kind
    }

    pub fn direction(&self) -> TransformDirection {
        self.direction
    }

    pub fn source(&self) -> Space {
        self.source
    }

    pub fn target(&self) -> Space {
        self.target
    }

    /// Map points through this stage.
    ///
    /// Affine stages always report in bounds; displacement-field stages flag
    /// points that fall outside the field grid.
    pub fn apply(&self, points: &[Point3]) -> Result<MappedPoints> {
        match &self.kind {
            StageKind::Affine(t) => t.transform_points(points, self.direction),
            StageKind::DisplacementField(f) => f.transform_points(points, self.direction),
        }
    }
}

impl<B: Backend> fmt::Display for SpatialTransformStage<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {}] {} -> {}",
            self.name,
            self.kind.label(),
            self.direction,
            self.source,
            self.target
        )
    }
}
