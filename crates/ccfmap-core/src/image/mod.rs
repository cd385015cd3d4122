//! Voxel-grid geometry.
//!
//! Describes how voxel indices of a volume map to physical coordinates.

pub mod geometry;

pub use geometry::ImageGeometry;
