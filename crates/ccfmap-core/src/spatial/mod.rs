//! Spatial types for representing points, vectors, spacing, direction
//! matrices and anatomical orientation codes.
//!
//! All numeric types are thin wrappers over nalgebra and use `f64`.

pub mod point;
pub mod vector;
pub mod spacing;
pub mod direction;
pub mod orientation;

pub use point::Point;
pub use vector::Vector;
pub use spacing::Spacing;
pub use direction::Direction;
pub use orientation::{AnatomicalDirection, Orientation};

pub type Point3 = Point<3>;
pub type Vector3 = Vector<3>;
pub type Spacing3 = Spacing<3>;
pub type Direction3 = Direction<3>;
