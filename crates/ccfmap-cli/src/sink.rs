//! Writes mapped morphologies to disk.

use std::path::{Path, PathBuf};

use ccfmap_core::Result;
use ccfmap_io::{write_annotated_json, write_swc, AnnotatedMorphology};
use ccfmap_pipeline::{OutputSink, ProcessedMorphology};
use tracing::debug;

use crate::naming::{transformed_name, NamingStyle};

/// Writes one SWC per input and, when annotated, a JSON document next to it.
#[derive(Debug, Clone)]
pub struct FileSink {
    output_root: PathBuf,
    /// Nest outputs under `<output_root>/<subject_id>`.
    per_subject: bool,
    naming: NamingStyle,
    atlas_resolution_um: f64,
    node_spacing_um: Option<f64>,
}

impl FileSink {
    pub fn new(
        output_root: impl Into<PathBuf>,
        naming: NamingStyle,
        atlas_resolution_um: f64,
        node_spacing_um: Option<f64>,
    ) -> Self {
        Self {
            output_root: output_root.into(),
            per_subject: false,
            naming,
            atlas_resolution_um,
            node_spacing_um,
        }
    }

    pub fn per_subject(mut self, per_subject: bool) -> Self {
        self.per_subject = per_subject;
        self
    }

    fn directory(&self, subject_id: &str) -> PathBuf {
        if self.per_subject {
            self.output_root.join(subject_id)
        } else {
            self.output_root.clone()
        }
    }

    fn header(&self, source: &Path) -> Vec<String> {
        let spacing = match self.node_spacing_um {
            Some(s) => format!("{s} um"),
            None => "unchanged".to_string(),
        };
        vec![
            format!("Generated by ccfmap {}", env!("CARGO_PKG_VERSION")),
            format!("source: {}", source.display()),
            format!("space: ccf ({} um atlas grid)", self.atlas_resolution_um),
            format!("node spacing: {spacing}"),
        ]
    }
}

impl OutputSink for FileSink {
    fn write(&self, output: &ProcessedMorphology) -> Result<Vec<PathBuf>> {
        let name = transformed_name(&output.source, self.naming, self.atlas_resolution_um);
        let swc_path = self.directory(&output.subject_id).join(name);
        write_swc(&swc_path, &output.tree, &self.header(&output.source))?;
        let mut written = vec![swc_path.clone()];

        if let Some(annotations) = &output.annotations {
            let id_string = swc_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let doc = AnnotatedMorphology::from_tree(
                id_string,
                output.subject_id.clone(),
                self.atlas_resolution_um,
                &output.tree,
                annotations,
            )?;
            let json_path = swc_path.with_extension("json");
            write_annotated_json(&json_path, &doc)?;
            written.push(json_path);
        }
        debug!(files = written.len(), source = %output.source.display(), "outputs written");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccfmap_core::annotation::NodeAnnotation;
    use ccfmap_core::morphology::{MorphologyTree, SwcNode};
    use ccfmap_core::spatial::Point3;
    use tempfile::tempdir;

    fn processed(annotated: bool) -> ProcessedMorphology {
        let tree = MorphologyTree::from_nodes(vec![
            SwcNode::new(1, 1, Point3::new([10.0, 20.0, 30.0]), 2.0, -1),
            SwcNode::new(2, 3, Point3::new([11.0, 20.0, 30.0]), 1.0, 1),
        ])
        .unwrap();
        let annotation = |id: u32, acronym: &str| NodeAnnotation {
            structure_id: id,
            structure_acronym: acronym.to_string(),
            structure_name: None,
            outside_volume: false,
        };
        ProcessedMorphology {
            subject_id: "685111".into(),
            source: PathBuf::from("/in/N001.swc"),
            tree,
            annotations: annotated.then(|| vec![annotation(385, "VISp"), annotation(0, "background")]),
        }
    }

    #[test]
    fn test_writes_swc_and_json() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path(), NamingStyle::Suffix, 10.0, Some(1.0)).per_subject(true);
        let written = sink.write(&processed(true)).unwrap();

        let swc = dir.path().join("685111").join("N001__space-ccf_res-10um.swc");
        let json = swc.with_extension("json");
        assert_eq!(written, vec![swc.clone(), json.clone()]);

        let text = std::fs::read_to_string(&swc).unwrap();
        assert!(text.starts_with("# Generated by ccfmap"));
        assert!(text.contains("# source: /in/N001.swc"));
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(doc["sample"]["subject_id"], "685111");
        assert_eq!(doc["nodes"][0]["structure_acronym"], "VISp");
    }

    #[test]
    fn test_unannotated_writes_only_swc() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path(), NamingStyle::AlignedPrefix, 10.0, None);
        let written = sink.write(&processed(false)).unwrap();
        assert_eq!(written, vec![dir.path().join("aligned_N001.swc")]);
    }
}
