//! Ordered composition of transform stages.

use burn::tensor::backend::Backend;
use tracing::debug;

use super::stage::{Space, SpatialTransformStage};
use super::trait_::MappedPoints;
use crate::error::{MappingError, Result};
use crate::spatial::Point3;

/// Coordinate of one point after a stage, as reported by
/// [`TransformChain::trace`].
#[derive(Debug, Clone, PartialEq)]
pub struct StageTrace {
    pub stage: String,
    pub space: Space,
    pub point: Point3,
    pub in_bounds: bool,
}

/// Validated sequence of stages ending in CCF space.
///
/// The target space of each stage equals the source space of the next.
#[derive(Debug, Clone)]
pub struct TransformChain<B: Backend> {
    stages: Vec<SpatialTransformStage<B>>,
}

impl<B: Backend> TransformChain<B> {
    /// Build a chain, rejecting empty chains, broken composition and chains
    /// that do not end in [`Space::Ccf`].
    pub fn new(stages: Vec<SpatialTransformStage<B>>) -> Result<Self> {
        let last = stages
            .last()
            .ok_or_else(|| MappingError::transform_application("transform chain has no stages"))?;
        if last.target() != Space::Ccf {
            return Err(MappingError::transform_application(format!(
                "transform chain ends in {} instead of {}",
                last.target(),
                Space::Ccf
            )));
        }
        for pair in stages.windows(2) {
            if pair[0].target() != pair[1].source() {
                return Err(MappingError::transform_application(format!(
                    "stage '{}' outputs {} but stage '{}' expects {}",
                    pair[0].name(),
                    pair[0].target(),
                    pair[1].name(),
                    pair[1].source()
                )));
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[SpatialTransformStage<B>] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn source_space(&self) -> Space {
        self.stages[0].source()
    }

    pub fn target_space(&self) -> Space {
        Space::Ccf
    }

    /// Map every point through every stage.
    ///
    /// A point is in bounds only if every displacement-field stage saw it
    /// inside its grid.
    pub fn transform_points(&self, points: &[Point3]) -> Result<MappedPoints> {
        let mut current = MappedPoints::in_bounds(points.to_vec());
        for stage in &self.stages {
            let next = stage.apply(&current.points)?;
            for (acc, flag) in current.in_bounds.iter_mut().zip(&next.in_bounds) {
                *acc &= *flag;
            }
            current.points = next.points;
            debug!(
                stage = stage.name(),
                out_of_bounds = current.out_of_bounds_count(),
                "applied transform stage"
            );
        }
        Ok(current)
    }

    /// Map a single point, returning the point and its within-bounds flag.
    pub fn transform_point(&self, point: &Point3) -> Result<(Point3, bool)> {
        let out = self.transform_points(std::slice::from_ref(point))?;
        Ok((out.points[0], out.in_bounds[0]))
    }

    /// Coordinates of one point after every stage.
    pub fn trace(&self, point: &Point3) -> Result<Vec<StageTrace>> {
        let mut current = *point;
        let mut in_bounds = true;
        let mut out = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let mapped = stage.apply(std::slice::from_ref(&current))?;
            current = mapped.points[0];
            in_bounds &= mapped.in_bounds[0];
            out.push(StageTrace {
                stage: stage.name().to_string(),
                space: stage.target(),
                point: current,
                in_bounds,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AffineTransform, TransformDirection};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;
    type Stage = SpatialTransformStage<TestBackend>;

    fn stage(name: &str, t: AffineTransform, source: Space, target: Space) -> Stage {
        Stage::affine(name, t, TransformDirection::Forward, source, target)
    }

    #[test]
    fn test_rejects_broken_composition() {
        let err = TransformChain::new(vec![
            stage("a", AffineTransform::identity(), Space::SampleNative, Space::SampleGrid),
            stage("b", AffineTransform::identity(), Space::SamplePhysical, Space::Ccf),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("stage 'a' outputs sample-grid"));
    }

    #[test]
    fn test_rejects_non_atlas_target_and_empty() {
        assert!(TransformChain::<TestBackend>::new(vec![]).is_err());
        assert!(TransformChain::new(vec![stage(
            "a",
            AffineTransform::identity(),
            Space::SampleNative,
            Space::SampleGrid
        )])
        .is_err());
    }

    #[test]
    fn test_stages_apply_in_order() {
        let translate = AffineTransform::from_itk_parameters(
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        let chain = TransformChain::new(vec![
            stage("scale", AffineTransform::scaling([2.0, 2.0, 2.0]), Space::SampleNative, Space::SampleGrid),
            stage("shift", translate, Space::SampleGrid, Space::Ccf),
        ])
        .unwrap();
        let (p, in_bounds) = chain.transform_point(&Point3::new([1.0, 1.0, 1.0])).unwrap();
        assert_eq!(p, Point3::new([3.0, 2.0, 2.0]));
        assert!(in_bounds);
    }

    #[test]
    fn test_trace_reports_each_stage() {
        let trace = TransformChain::new(vec![stage(
            "id",
            AffineTransform::identity(),
            Space::SampleNative,
            Space::Ccf,
        )])
        .unwrap()
        .trace(&Point3::origin())
        .unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].space, Space::Ccf);
        assert_eq!(trace[0].point, Point3::origin());
    }
}
