//! Acquisition metadata: native voxel size and axis orientation.

use std::fs;
use std::path::Path;

use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::spatial::Orientation;
use serde::Deserialize;
use serde_json::Value;

use crate::display;

/// Native acquisition grid of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionMetadata {
    pub subject_id: Option<String>,
    /// Voxel size in micrometres along index axes x, y, z.
    pub resolution_um: [f64; 3],
    /// Orientation code of the native index axes.
    pub orientation: Orientation,
}

#[derive(Deserialize)]
struct FlatAcquisition {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(alias = "voxel_size_um")]
    resolution: [f64; 3],
    #[serde(alias = "axes_orientation")]
    orientation: Orientation,
}

#[derive(Deserialize)]
struct SchemaAxis {
    name: String,
    direction: String,
}

/// Letter of the side an axis points towards, from `Left_to_right` style
/// direction names.
fn direction_letter(direction: &str) -> Option<char> {
    let target = direction.rsplit("_to_").next()?;
    target.chars().next().map(|c| c.to_ascii_uppercase())
}

/// The richer acquisition schema: `axes` with named directions and a tile
/// `scale` transformation.
fn from_schema(path: &Path, value: &Value) -> Result<AcquisitionMetadata> {
    let err = |m: &str| MappingError::parse(display(path), m.to_string());

    let axes: Vec<SchemaAxis> = serde_json::from_value(value.get("axes").cloned().unwrap_or(Value::Null))
        .map_err(|e| MappingError::parse(display(path), format!("bad 'axes': {e}")))?;
    let mut letters = ['?'; 3];
    for axis in &axes {
        let slot = match axis.name.to_ascii_uppercase().as_str() {
            "X" => 0,
            "Y" => 1,
            "Z" => 2,
            _ => continue,
        };
        letters[slot] = direction_letter(&axis.direction).ok_or_else(|| err("axis direction is malformed"))?;
    }
    let orientation: Orientation = letters.iter().collect::<String>().parse()?;

    let scale = value
        .get("tiles")
        .and_then(|t| t.get(0))
        .and_then(|t| t.get("coordinate_transformations"))
        .and_then(Value::as_array)
        .and_then(|ts| ts.iter().find(|t| t.get("type").and_then(Value::as_str) == Some("scale")))
        .and_then(|t| t.get("scale"))
        .ok_or_else(|| err("no tile scale transformation"))?;
    let scale: Vec<f64> = serde_json::from_value(scale.clone())
        .map_err(|e| MappingError::parse(display(path), format!("bad scale: {e}")))?;
    if scale.len() < 3 {
        return Err(err("tile scale needs three components"));
    }

    Ok(AcquisitionMetadata {
        subject_id: value.get("subject_id").and_then(Value::as_str).map(str::to_string),
        resolution_um: [scale[0], scale[1], scale[2]],
        orientation,
    })
}

/// Read acquisition metadata.
///
/// Accepts the flat form `{subject_id?, resolution | voxel_size_um,
/// orientation | axes_orientation}` or the schema form with `axes` and
/// `tiles[0].coordinate_transformations`.
pub fn read_acquisition(path: impl AsRef<Path>) -> Result<AcquisitionMetadata> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| MappingError::parse(display(path), format!("invalid JSON: {e}")))?;

    let meta = if value.get("axes").is_some() {
        from_schema(path, &value)?
    } else {
        let flat: FlatAcquisition = serde_json::from_value(value)
            .map_err(|e| MappingError::parse(display(path), format!("bad acquisition metadata: {e}")))?;
        AcquisitionMetadata {
            subject_id: flat.subject_id,
            resolution_um: flat.resolution,
            orientation: flat.orientation,
        }
    };
    if meta.resolution_um.iter().any(|r| !r.is_finite() || *r <= 0.0) {
        return Err(MappingError::parse(
            display(path),
            format!("resolution {:?} must be positive", meta.resolution_um),
        ));
    }
    Ok(meta)
}
