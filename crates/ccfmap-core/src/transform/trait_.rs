//! Transform trait for spatial coordinate transformations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::spatial::Point3;

/// Which way a transform is applied relative to its stored direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformDirection {
    Forward,
    Inverse,
}

impl TransformDirection {
    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Inverse,
            Self::Inverse => Self::Forward,
        }
    }
}

impl fmt::Display for TransformDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Inverse => f.write_str("inverse"),
        }
    }
}

/// Points produced by a transform, with a per-point within-bounds flag.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedPoints {
    pub points: Vec<Point3>,
    pub in_bounds: Vec<bool>,
}

impl MappedPoints {
    /// All points flagged within bounds.
    pub fn in_bounds(points: Vec<Point3>) -> Self {
        let in_bounds = vec![true; points.len()];
        Self { points, in_bounds }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points flagged out of bounds.
    pub fn out_of_bounds_count(&self) -> usize {
        self.in_bounds.iter().filter(|b| !**b).count()
    }
}

/// Maps a batch of 3-D points from one physical space to another.
///
/// Implementations never drop points: the output has one entry per input,
/// in the same order.
pub trait Transform {
    fn transform_points(&self, points: &[Point3], direction: TransformDirection) -> Result<MappedPoints>;
}
