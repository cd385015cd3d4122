//! Physical frames volumes can be read into.

use serde::{Deserialize, Serialize};

/// Physical frame for image geometry.
///
/// `Lps` is the frame ITK and ANTs use for transforms: NIfTI headers are RAS
/// and are converted by negating the first two rows of the voxel-to-world
/// affine. `Header` keeps coordinates exactly as the file states them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalFrame {
    Lps,
    Header,
}
