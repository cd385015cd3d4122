//! Subject-level pipeline for ccfmap.
//!
//! Resolves each subject's registration bundle, builds its transform chain
//! and maps every SWC file through it, in parallel, collecting failures in a
//! [`RunReport`] instead of aborting.

pub mod assets;
pub mod chain_builder;
pub mod config;
pub mod report;
pub mod resources;
pub mod runner;
pub mod subject;

pub use assets::{AssetResolver, ManualFieldResolution, RegistrationBundle, ResolutionSource, ResolvedAsset};
pub use chain_builder::{SampleRegistration, TemplateRegistration, TransformChainBuilder};
pub use config::{AssetOverrides, GridConfig, ManualFieldConfig, PipelineConfig, SharedAssets, SubjectConfig};
pub use report::{FailureRecord, ProcessingStage, RunReport, SubjectReport};
pub use resources::SharedResources;
pub use runner::BatchRunner;
pub use subject::{map_morphology, OutputSink, ProcessedMorphology};
