//! Core types for mapping neuron morphologies into atlas space.
//!
//! Provides spatial primitives, image geometry, affine and displacement-field
//! transforms with their stage/chain composition, morphology trees with
//! uniform resampling, and atlas structure annotation.

pub mod annotation;
pub mod error;
pub mod image;
pub mod interpolation;
pub mod morphology;
pub mod spatial;
pub mod transform;

pub use error::{MappingError, Result};
pub use image::ImageGeometry;
pub use morphology::{MorphologyTree, SwcNode};
pub use spatial::{Direction, Orientation, Point, Point3, Spacing, Vector};
pub use transform::{
    AffineTransform, DisplacementField, MappedPoints, Space, SpatialTransformStage, TransformChain,
    TransformDirection,
};
