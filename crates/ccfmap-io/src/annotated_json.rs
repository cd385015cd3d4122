//! Annotated morphology JSON documents.

use std::fs;
use std::path::Path;

use ccfmap_core::annotation::NodeAnnotation;
use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::morphology::MorphologyTree;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub subject_id: String,
}

/// One node record, in tree order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedNode {
    pub sample_number: i64,
    pub structure_identifier: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: f64,
    pub parent_number: i64,
    pub allen_id: u32,
    pub structure_acronym: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_name: Option<String>,
    pub out_of_bounds: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedMorphology {
    pub id_string: String,
    pub space: String,
    pub resolution_um: f64,
    pub sample: SampleInfo,
    pub nodes: Vec<AnnotatedNode>,
}

impl AnnotatedMorphology {
    /// Combine a tree with one annotation per node.
    ///
    /// A node is out of bounds if a transform flagged it or it fell outside
    /// the annotation volume.
    pub fn from_tree(
        id_string: impl Into<String>,
        subject_id: impl Into<String>,
        resolution_um: f64,
        tree: &MorphologyTree,
        annotations: &[NodeAnnotation],
    ) -> Result<Self> {
        if annotations.len() != tree.len() {
            return Err(MappingError::invalid_configuration(format!(
                "{} annotations for {} nodes",
                annotations.len(),
                tree.len()
            )));
        }
        let nodes = tree
            .nodes()
            .iter()
            .zip(annotations)
            .enumerate()
            .map(|(i, (n, a))| AnnotatedNode {
                sample_number: n.id,
                structure_identifier: n.node_type,
                x: n.position[0],
                y: n.position[1],
                z: n.position[2],
                radius: n.radius,
                parent_number: n.parent_id,
                allen_id: a.structure_id,
                structure_acronym: a.structure_acronym.clone(),
                structure_name: a.structure_name.clone(),
                out_of_bounds: tree.out_of_bounds(i) || a.outside_volume,
            })
            .collect();
        Ok(Self {
            id_string: id_string.into(),
            space: "ccf".to_string(),
            resolution_um,
            sample: SampleInfo {
                subject_id: subject_id.into(),
            },
            nodes,
        })
    }
}

/// Write pretty-printed JSON, creating parent directories.
pub fn write_annotated_json(path: impl AsRef<Path>, doc: &AnnotatedMorphology) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(doc)
        .map_err(|e| MappingError::parse(path.display().to_string(), e.to_string()))?;
    fs::write(path, text)?;
    Ok(())
}
