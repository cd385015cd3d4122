//! Per-subject processing: resolve, load, build the chain, map every SWC.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use burn::tensor::backend::Backend;
use ccfmap_core::annotation::{NodeAnnotation, StructureAnnotation};
use ccfmap_core::error::Result;
use ccfmap_core::morphology::{assign_structure_types, resample, MorphologyTree};
use ccfmap_core::transform::TransformChain;
use ccfmap_io::read_swc;
use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

use crate::assets::AssetResolver;
use crate::chain_builder::TransformChainBuilder;
use crate::config::{PipelineConfig, SubjectConfig};
use crate::report::{AtStage, ProcessingStage, StageError, SubjectReport};
use crate::resources::{load_sample_registration, SharedResources};

/// A mapped morphology ready to be persisted.
#[derive(Debug, Clone)]
pub struct ProcessedMorphology {
    pub subject_id: String,
    /// Input SWC path.
    pub source: PathBuf,
    pub tree: MorphologyTree,
    /// One entry per node of `tree` when annotation is enabled.
    pub annotations: Option<Vec<NodeAnnotation>>,
}

impl ProcessedMorphology {
    /// Nodes flagged by a transform or lying outside the annotation volume.
    pub fn out_of_bounds_count(&self) -> usize {
        match &self.annotations {
            Some(ann) => (0..self.tree.len())
                .filter(|&i| self.tree.out_of_bounds(i) || ann[i].outside_volume)
                .count(),
            None => self.tree.out_of_bounds_count(),
        }
    }
}

/// Destination of processed morphologies.
pub trait OutputSink: Send + Sync {
    /// Persist one morphology and return the files written.
    fn write(&self, output: &ProcessedMorphology) -> Result<Vec<PathBuf>>;
}

/// All `.swc` files below `dir`, sorted.
pub fn discover_swc_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("swc")) {
            found.push(path.to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Transform, optionally re-type and resample, then annotate one tree.
pub fn map_morphology<B: Backend>(
    mut tree: MorphologyTree,
    chain: &TransformChain<B>,
    config: &PipelineConfig,
    annotation: Option<&StructureAnnotation>,
) -> std::result::Result<(MorphologyTree, Option<Vec<NodeAnnotation>>), StageError> {
    let mapped = chain
        .transform_points(&tree.positions())
        .at(ProcessingStage::Transform)?;
    tree.apply_mapped(mapped).at(ProcessingStage::Transform)?;

    if config.assign_structure_types {
        assign_structure_types(&mut tree);
    }
    if let Some(spacing) = config.node_spacing_um {
        tree = resample(&tree, spacing).at(ProcessingStage::Resample)?;
    }
    let annotations = annotation.map(|a| a.annotate(&tree.positions()));
    Ok((tree, annotations))
}

struct FileResult {
    output: Option<Vec<PathBuf>>,
    out_of_bounds: usize,
    failure: Option<StageError>,
}

fn process_file<B: Backend>(
    path: &Path,
    subject_id: &str,
    chain: &TransformChain<B>,
    config: &PipelineConfig,
    annotation: Option<&StructureAnnotation>,
    sink: &dyn OutputSink,
) -> std::result::Result<(Vec<PathBuf>, usize), StageError> {
    let tree = read_swc(path, config.apply_swc_offset).at(ProcessingStage::Read)?;
    let input_nodes = tree.len();
    let (tree, annotations) = map_morphology(tree, chain, config, annotation)?;
    let processed = ProcessedMorphology {
        subject_id: subject_id.to_string(),
        source: path.to_path_buf(),
        tree,
        annotations,
    };
    let out_of_bounds = processed.out_of_bounds_count();
    if out_of_bounds > 0 {
        warn!(file = %path.display(), out_of_bounds, "nodes mapped outside a grid");
    }
    debug!(
        file = %path.display(),
        input_nodes,
        output_nodes = processed.tree.len(),
        "morphology mapped"
    );
    let written = sink.write(&processed).at(ProcessingStage::Write)?;
    Ok((written, out_of_bounds))
}

/// Process every SWC file of one subject.
///
/// Failures are recorded in the returned report, never propagated. When
/// `abort` is set, remaining files are skipped; with fail-fast enabled the
/// first failure sets it.
pub fn process_subject<B: Backend>(
    subject: &SubjectConfig,
    shared: &SharedResources<B>,
    config: &PipelineConfig,
    sink: &dyn OutputSink,
    device: &B::Device,
    abort: &AtomicBool,
) -> SubjectReport {
    let label = subject
        .subject_id
        .clone()
        .unwrap_or_else(|| subject.transform_dir.display().to_string());
    let span = info_span!("subject", id = %label);
    let _guard = span.enter();

    let mut report = SubjectReport::new(label);
    let fail = |report: &mut SubjectReport, file: Option<PathBuf>, err: StageError| {
        warn!(stage = %err.stage, error = %err.error, "subject step failed");
        report.record(file, &err);
        if config.fail_fast {
            abort.store(true, Ordering::SeqCst);
        }
    };

    let files = match discover_swc_files(&subject.swc_dir).at(ProcessingStage::Discover) {
        Ok(files) => files,
        Err(e) => {
            fail(&mut report, None, e);
            return report;
        }
    };
    report.inputs = files.len();

    let resolver = AssetResolver::new(&config.grid);
    let bundle = match resolver.resolve(subject).at(ProcessingStage::Resolve) {
        Ok(bundle) => bundle,
        Err(e) => {
            fail(&mut report, None, e);
            return report;
        }
    };
    report.subject = bundle.subject_id.clone();

    let chain = load_sample_registration::<B>(&bundle, device)
        .at(ProcessingStage::Load)
        .and_then(|sample| {
            TransformChainBuilder::new(&config.grid)
                .build(&sample, &shared.template)
                .at(ProcessingStage::Chain)
        });
    let subject_id = bundle.subject_id.clone();
    report.bundle = Some(bundle);
    let chain = match chain {
        Ok(chain) => chain,
        Err(e) => {
            fail(&mut report, None, e);
            return report;
        }
    };
    info!(files = files.len(), stages = chain.len(), "mapping morphologies");

    let annotation = shared.annotation.as_ref();
    let results: Vec<(PathBuf, FileResult)> = files
        .par_iter()
        .map(|path| {
            if abort.load(Ordering::SeqCst) {
                let skipped = FileResult {
                    output: None,
                    out_of_bounds: 0,
                    failure: None,
                };
                return (path.clone(), skipped);
            }
            let result = match process_file(path, &subject_id, &chain, config, annotation, sink) {
                Ok((written, out_of_bounds)) => FileResult {
                    output: Some(written),
                    out_of_bounds,
                    failure: None,
                },
                Err(e) => {
                    if config.fail_fast {
                        abort.store(true, Ordering::SeqCst);
                    }
                    FileResult {
                        output: None,
                        out_of_bounds: 0,
                        failure: Some(e),
                    }
                }
            };
            (path.clone(), result)
        })
        .collect();

    for (path, result) in results {
        report.out_of_bounds_nodes += result.out_of_bounds;
        if let Some(written) = result.output {
            report.transformed += 1;
            report.outputs.extend(written);
        }
        if let Some(e) = result.failure {
            warn!(file = %path.display(), stage = %e.stage, error = %e.error, "file failed");
            report.record(Some(path), &e);
        }
    }
    info!(
        transformed = report.transformed,
        failed = report.failed.len(),
        "subject finished"
    );
    report
}
