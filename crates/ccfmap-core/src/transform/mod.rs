//! Spatial transforms and transform chains.
//!
//! Point mapping is exact f64 for affine stages; displacement fields are
//! stored on the tensor backend and sampled in batches.

pub mod trait_;
pub mod affine;
pub mod displacement_field;
pub mod stage;
pub mod chain;

pub use trait_::{MappedPoints, Transform, TransformDirection};
pub use affine::AffineTransform;
pub use displacement_field::DisplacementField;
pub use stage::{Space, SpatialTransformStage, StageKind};
pub use chain::{StageTrace, TransformChain};
