//! Run report: per-subject counts and isolated failures.

use std::fmt;
use std::path::PathBuf;

use ccfmap_core::error::MappingError;
use serde::Serialize;

use crate::assets::RegistrationBundle;

/// Step of the per-subject pipeline a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Discover,
    Resolve,
    Load,
    Chain,
    Read,
    Transform,
    Resample,
    Annotate,
    Write,
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Resolve => "resolve",
            Self::Load => "load",
            Self::Chain => "chain",
            Self::Read => "read",
            Self::Transform => "transform",
            Self::Resample => "resample",
            Self::Annotate => "annotate",
            Self::Write => "write",
        };
        f.write_str(name)
    }
}

/// An error tagged with the step that raised it.
#[derive(Debug)]
pub struct StageError {
    pub stage: ProcessingStage,
    pub error: MappingError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Attach a [`ProcessingStage`] to a core result.
pub trait AtStage<T> {
    fn at(self, stage: ProcessingStage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for ccfmap_core::Result<T> {
    fn at(self, stage: ProcessingStage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub subject: String,
    pub stage: ProcessingStage,
    /// SWC file, when the failure is specific to one.
    pub file: Option<PathBuf>,
    pub category: String,
    pub error: String,
}

impl FailureRecord {
    pub fn new(subject: impl Into<String>, file: Option<PathBuf>, failure: &StageError) -> Self {
        Self {
            subject: subject.into(),
            stage: failure.stage,
            file,
            category: failure.error.category().to_string(),
            error: failure.error.to_string(),
        }
    }
}

/// Outcome of one subject.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubjectReport {
    /// Resolved subject id, or the transform directory when resolution failed.
    pub subject: String,
    pub bundle: Option<RegistrationBundle>,
    pub inputs: usize,
    pub transformed: usize,
    pub outputs: Vec<PathBuf>,
    /// Nodes flagged outside a transform or annotation grid, over all files.
    pub out_of_bounds_nodes: usize,
    pub failed: Vec<FailureRecord>,
}

impl SubjectReport {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, file: Option<PathBuf>, failure: &StageError) {
        self.failed.push(FailureRecord::new(self.subject.clone(), file, failure));
    }
}

/// Aggregate over every subject of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub subjects: Vec<SubjectReport>,
    pub inputs: usize,
    pub transformed: usize,
    pub swc_outputs: usize,
    pub failed: Vec<FailureRecord>,
    /// Set when fail-fast stopped the run early.
    pub aborted: bool,
}

impl RunReport {
    pub fn from_subjects(subjects: Vec<SubjectReport>, aborted: bool) -> Self {
        let inputs = subjects.iter().map(|s| s.inputs).sum();
        let transformed = subjects.iter().map(|s| s.transformed).sum();
        let swc_outputs = subjects
            .iter()
            .flat_map(|s| &s.outputs)
            .filter(|p| p.extension().is_some_and(|e| e == "swc"))
            .count();
        let failed = subjects.iter().flat_map(|s| s.failed.iter().cloned()).collect();
        Self {
            subjects,
            inputs,
            transformed,
            swc_outputs,
            failed,
            aborted,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.aborted
    }
}
