//! Parallel batch runner over subjects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::tensor::backend::Backend;
use ccfmap_core::error::Result;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{PipelineConfig, SubjectConfig};
use crate::report::RunReport;
use crate::resources::SharedResources;
use crate::subject::{process_subject, OutputSink};

/// Runs the mapping pipeline for a batch of subjects.
///
/// Shared resources are loaded once and read by every worker. A subject's
/// failure is recorded in the report and does not stop the others unless
/// fail-fast is enabled.
pub struct BatchRunner<B: Backend> {
    config: PipelineConfig,
    shared: Arc<SharedResources<B>>,
    device: B::Device,
}

impl<B: Backend> BatchRunner<B> {
    /// Validate the configuration and load the shared assets.
    ///
    /// A missing shared asset fails the whole run here, before any subject
    /// starts.
    pub fn new(config: PipelineConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(SharedResources::load(&config, &device)?);
        Ok(Self::with_shared(config, shared, device))
    }

    /// Use already loaded shared resources.
    pub fn with_shared(config: PipelineConfig, shared: Arc<SharedResources<B>>, device: B::Device) -> Self {
        Self {
            config,
            shared,
            device,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn shared(&self) -> &Arc<SharedResources<B>> {
        &self.shared
    }

    /// Process every subject and aggregate their reports.
    pub fn run(&self, subjects: &[SubjectConfig], sink: &dyn OutputSink) -> RunReport {
        let abort = AtomicBool::new(false);
        info!(subjects = subjects.len(), threads = rayon::current_num_threads(), "run started");

        let reports = subjects
            .par_iter()
            .filter_map(|subject| {
                if abort.load(Ordering::SeqCst) {
                    warn!(transform_dir = %subject.transform_dir.display(), "skipped after failure");
                    return None;
                }
                Some(process_subject(
                    subject,
                    &self.shared,
                    &self.config,
                    sink,
                    &self.device,
                    &abort,
                ))
            })
            .collect();

        let report = RunReport::from_subjects(reports, abort.load(Ordering::SeqCst));
        info!(
            inputs = report.inputs,
            transformed = report.transformed,
            failed = report.failed.len(),
            aborted = report.aborted,
            "run finished"
        );
        report
    }
}
