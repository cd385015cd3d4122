//! Atlas structure annotation.
//!
//! Looks up the integer label under each point in an annotation volume and
//! resolves it against an ontology table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};
use crate::image::ImageGeometry;
use crate::spatial::Point3;

/// Id reported for points outside the annotation volume.
pub const OUTSIDE_ID: u32 = 0;
/// Acronym reported for points outside the annotation volume.
pub const OUTSIDE_ACRONYM: &str = "outside";
/// Acronym for label 0 inside the volume.
pub const BACKGROUND_ACRONYM: &str = "background";
/// Acronym for labels missing from the ontology.
pub const UNKNOWN_ACRONYM: &str = "unknown";

/// Integer label volume. Labels are stored with axis 0 fastest.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    geometry: ImageGeometry,
    labels: Vec<u32>,
}

impl LabelVolume {
    pub fn new(geometry: ImageGeometry, labels: Vec<u32>) -> Result<Self> {
        if labels.len() != geometry.len() {
            return Err(MappingError::invalid_configuration(format!(
                "annotation volume holds {} labels, grid {:?} needs {}",
                labels.len(),
                geometry.shape(),
                geometry.len()
            )));
        }
        Ok(Self { geometry, labels })
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn label_at(&self, index: [usize; 3]) -> u32 {
        self.labels[self.geometry.linear_offset(index)]
    }

    /// Label of the voxel nearest to a physical point, `None` outside.
    pub fn lookup(&self, point: &Point3) -> Option<u32> {
        self.geometry.nearest_index(point).map(|i| self.label_at(i))
    }
}

/// One ontology record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyEntry {
    pub id: u32,
    pub acronym: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<u32>,
}

/// Label -> structure table.
#[derive(Debug, Clone, Default)]
pub struct Ontology {
    entries: HashMap<u32, OntologyEntry>,
}

impl Ontology {
    pub fn new(entries: impl IntoIterator<Item = OntologyEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&OntologyEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Annotation of one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    pub structure_id: u32,
    pub structure_acronym: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure_name: Option<String>,
    /// The point fell outside the annotation volume.
    pub outside_volume: bool,
}

/// Annotation volume plus ontology, loaded once per run.
#[derive(Debug, Clone)]
pub struct StructureAnnotation {
    volume: LabelVolume,
    ontology: Ontology,
}

impl StructureAnnotation {
    pub fn new(volume: LabelVolume, ontology: Ontology) -> Self {
        Self { volume, ontology }
    }

    pub fn volume(&self) -> &LabelVolume {
        &self.volume
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    /// Annotate one point by nearest-voxel lookup.
    pub fn annotate_point(&self, point: &Point3) -> NodeAnnotation {
        let Some(label) = self.volume.lookup(point) else {
            return NodeAnnotation {
                structure_id: OUTSIDE_ID,
                structure_acronym: OUTSIDE_ACRONYM.to_string(),
                structure_name: None,
                outside_volume: true,
            };
        };
        match self.ontology.get(label) {
            Some(entry) => NodeAnnotation {
                structure_id: label,
                structure_acronym: entry.acronym.clone(),
                structure_name: Some(entry.name.clone()),
                outside_volume: false,
            },
            None => NodeAnnotation {
                structure_id: label,
                structure_acronym: if label == 0 { BACKGROUND_ACRONYM } else { UNKNOWN_ACRONYM }.to_string(),
                structure_name: None,
                outside_volume: false,
            },
        }
    }

    /// Annotate every point; coordinates are not modified.
    pub fn annotate(&self, points: &[Point3]) -> Vec<NodeAnnotation> {
        points.iter().map(|p| self.annotate_point(p)).collect()
    }
}
