use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn_ndarray::NdArray;
use ccfmap_core::spatial::Point3;
use ccfmap_pipeline::resources::load_sample_registration;
use ccfmap_pipeline::{
    AssetOverrides, AssetResolver, BatchRunner, ManualFieldConfig, PipelineConfig, SharedResources,
    SubjectConfig, TransformChainBuilder,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

mod metadata;
mod naming;
mod sink;

use metadata::{write_json, write_manifest, write_processing, ProcessReport};
use naming::NamingStyle;
use sink::FileSink;

type Backend = NdArray<f32>;

const DEFAULT_OUTPUT_ROOT: &str = "/results/exaspim_swc_transform";
const PARITY_OUTPUT_ROOT: &str = "/results/aligned";

#[derive(Parser)]
#[command(name = "ccfmap")]
#[command(about = "Map SWC morphologies from sample space into the Allen CCF")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform, resample and annotate every SWC of one or more subjects
    Run(RunArgs),

    /// Resolve a subject's registration bundle and print it as JSON
    Resolve {
        #[command(flatten)]
        subject: SubjectArgs,
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print a native point's coordinates after every stage of the chain
    Trace {
        #[command(flatten)]
        subject: SubjectArgs,
        #[command(flatten)]
        config: ConfigArgs,
        /// Native coordinates in micrometres
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        point: Vec<f64>,
    },
}

/// Where one subject's registration lives.
#[derive(Args, Debug, Clone, Serialize)]
struct SubjectArgs {
    /// Transform bundle directory
    #[arg(long, env = "TRANSFORM_DIR")]
    transform_dir: Option<PathBuf>,

    /// Subject id; inferred from the bundle directory name when omitted
    #[arg(long)]
    dataset_id: Option<String>,

    #[arg(long, env = "ACQUISITION_FILE_PATH")]
    acquisition_file_path: Option<PathBuf>,

    #[arg(long, env = "LOADED_ZARR_IMAGE_PATH")]
    loaded_zarr_image_path: Option<PathBuf>,

    #[arg(long, env = "RESAMPLED_ZARR_IMAGE_PATH")]
    resampled_zarr_image_path: Option<PathBuf>,

    #[arg(long, env = "SAMPLE_TO_EXASPIM_AFFINE_PATH")]
    sample_to_exaspim_affine_path: Option<PathBuf>,

    #[arg(long, env = "SAMPLE_TO_EXASPIM_INVERSE_WARP_PATH")]
    sample_to_exaspim_inverse_warp_path: Option<PathBuf>,

    /// Manual displacement field file, or a directory to search
    #[arg(long, env = "MANUAL_DF_PATH")]
    manual_df_path: Option<PathBuf>,

    /// Exact field file name inside --manual-df-path
    #[arg(long, env = "MANUAL_DF_FILENAME")]
    manual_df_filename: Option<String>,
}

/// Run-wide configuration: base file or preset, then flag overrides.
#[derive(Args, Debug, Clone, Serialize)]
struct ConfigArgs {
    /// JSON pipeline configuration used as the base for other flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Legacy preset: transform only, /results/aligned, aligned_<stem>.swc
    #[arg(long)]
    parity_mode: bool,

    #[arg(long, env = "EXASPIM_TO_CCF_AFFINE_PATH")]
    exaspim_to_ccf_affine_path: Option<PathBuf>,

    #[arg(long, env = "EXASPIM_TO_CCF_INVERSE_WARP_PATH")]
    exaspim_to_ccf_inverse_warp_path: Option<PathBuf>,

    #[arg(long, env = "CCF_TEMPLATE_PATH")]
    ccf_template_path: Option<PathBuf>,

    #[arg(long, env = "EXASPIM_TEMPLATE_PATH")]
    exaspim_template_path: Option<PathBuf>,

    #[arg(long, env = "CCF_ANNOTATION_PATH")]
    ccf_annotation_path: Option<PathBuf>,

    #[arg(long, env = "CCF_ONTOLOGY_PATH")]
    ccf_ontology_path: Option<PathBuf>,

    /// Pyramid level of the loaded image
    #[arg(long)]
    pyramid_level: Option<u32>,

    /// Atlas voxel size in micrometres
    #[arg(long)]
    atlas_resolution_um: Option<f64>,

    /// Template name in registration file names
    #[arg(long)]
    template_name: Option<String>,

    /// Resolution tag in registration-metadata file names
    #[arg(long)]
    resolution_tag: Option<String>,
}

#[derive(Args, Debug, Clone, Serialize)]
struct RunArgs {
    #[command(flatten)]
    subject: SubjectArgs,

    #[command(flatten)]
    config: ConfigArgs,

    /// Directory of input SWC files, searched recursively
    #[arg(long, env = "SWC_DIR", default_value = "/data/final-world")]
    swc_dir: PathBuf,

    /// JSON list of subjects to process instead of the single-subject flags
    #[arg(long)]
    batch: Option<PathBuf>,

    /// Output directory for mapped SWC and JSON files
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Directory for reports and manifests; defaults to --output-root
    #[arg(long)]
    metadata_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    naming_style: Option<NamingStyle>,

    /// Target node spacing in micrometres
    #[arg(long, conflicts_with = "no_resample", allow_negative_numbers = true)]
    node_spacing_um: Option<f64>,

    /// Keep transformed trees without resampling
    #[arg(long)]
    no_resample: bool,

    /// Skip atlas structure annotation
    #[arg(long)]
    no_annotate: bool,

    /// Ignore `# OFFSET` headers in input SWC files
    #[arg(long)]
    no_swc_offset: bool,

    /// Re-derive soma, axon and dendrite types from topology
    #[arg(long)]
    assign_types: bool,

    /// Stop at the first failure
    #[arg(long)]
    fail_fast: bool,
}

/// Empty environment values count as unset.
fn set(value: &Option<PathBuf>) -> Option<PathBuf> {
    value.clone().filter(|p| !p.as_os_str().is_empty())
}

impl SubjectArgs {
    fn subject_config(&self, swc_dir: &Path) -> Result<SubjectConfig> {
        let Some(transform_dir) = set(&self.transform_dir) else {
            bail!("--transform-dir is required");
        };
        Ok(SubjectConfig {
            swc_dir: swc_dir.to_path_buf(),
            transform_dir,
            subject_id: self.dataset_id.clone().filter(|s| !s.is_empty()),
            overrides: AssetOverrides {
                acquisition: set(&self.acquisition_file_path),
                loaded_image: set(&self.loaded_zarr_image_path),
                resampled_image: set(&self.resampled_zarr_image_path),
                sample_affine: set(&self.sample_to_exaspim_affine_path),
                sample_inverse_warp: set(&self.sample_to_exaspim_inverse_warp_path),
            },
            manual_field: ManualFieldConfig {
                path: set(&self.manual_df_path),
                filename: self.manual_df_filename.clone().filter(|s| !s.is_empty()),
            },
        })
    }
}

impl ConfigArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None if self.parity_mode => PipelineConfig::parity(),
            None => PipelineConfig::default(),
        };

        let shared = &mut config.shared;
        for (slot, value) in [
            (&mut shared.template_to_atlas_affine, &self.exaspim_to_ccf_affine_path),
            (&mut shared.template_to_atlas_inverse_warp, &self.exaspim_to_ccf_inverse_warp_path),
            (&mut shared.atlas_template, &self.ccf_template_path),
            (&mut shared.template, &self.exaspim_template_path),
            (&mut shared.annotation, &self.ccf_annotation_path),
            (&mut shared.ontology, &self.ccf_ontology_path),
        ] {
            if let Some(path) = set(value) {
                *slot = path;
            }
        }

        let grid = &mut config.grid;
        if let Some(level) = self.pyramid_level {
            grid.pyramid_level = level;
        }
        if let Some(res) = self.atlas_resolution_um {
            grid.atlas_resolution_um = res;
        }
        if let Some(name) = &self.template_name {
            grid.template_name = name.clone();
        }
        if let Some(tag) = &self.resolution_tag {
            grid.resolution_tag = tag.clone();
        }
        Ok(config)
    }
}

impl RunArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = self.config.pipeline_config()?;
        if let Some(spacing) = self.node_spacing_um {
            config.node_spacing_um = Some(spacing);
        }
        if self.no_resample {
            config.node_spacing_um = None;
        }
        if self.no_annotate {
            config.annotate = false;
        }
        if self.no_swc_offset {
            config.apply_swc_offset = false;
        }
        if self.assign_types {
            config.assign_structure_types = true;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
        config.validate()?;
        Ok(config)
    }

    fn subjects(&self) -> Result<Vec<SubjectConfig>> {
        match &self.batch {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read batch {}", path.display()))?;
                let subjects: Vec<SubjectConfig> = serde_json::from_str(&text)
                    .with_context(|| format!("invalid batch {}", path.display()))?;
                if subjects.is_empty() {
                    bail!("batch {} lists no subjects", path.display());
                }
                Ok(subjects)
            }
            None => Ok(vec![self.subject.subject_config(&self.swc_dir)?]),
        }
    }

    fn output_root(&self) -> PathBuf {
        self.output_root.clone().unwrap_or_else(|| {
            PathBuf::from(if self.config.parity_mode {
                PARITY_OUTPUT_ROOT
            } else {
                DEFAULT_OUTPUT_ROOT
            })
        })
    }

    fn naming_style(&self) -> NamingStyle {
        self.naming_style.unwrap_or(if self.config.parity_mode {
            NamingStyle::AlignedPrefix
        } else {
            NamingStyle::Preserve
        })
    }
}

/// Arguments as given plus the values the run actually used.
#[derive(Serialize)]
struct RuntimeArgs<'a> {
    #[serde(flatten)]
    args: &'a RunArgs,
    effective_output_root: &'a Path,
    effective_metadata_dir: &'a Path,
    effective_naming_style: NamingStyle,
    effective_config: &'a PipelineConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(&args)?,
        Commands::Resolve { subject, config } => resolve(&subject, &config)?,
        Commands::Trace {
            subject,
            config,
            point,
        } => trace(&subject, &config, &point)?,
    }

    Ok(())
}

fn run(args: &RunArgs) -> Result<()> {
    let start_time = Utc::now().to_rfc3339();
    let config = args.pipeline_config()?;
    let subjects = args.subjects()?;
    for subject in &subjects {
        if !subject.swc_dir.is_dir() {
            bail!("SWC input directory does not exist: {}", subject.swc_dir.display());
        }
        if !subject.transform_dir.is_dir() {
            bail!("Transform directory does not exist: {}", subject.transform_dir.display());
        }
    }

    let output_root = args.output_root();
    let metadata_dir = args.metadata_dir.clone().unwrap_or_else(|| output_root.clone());
    let naming = args.naming_style();
    fs::create_dir_all(&output_root)
        .with_context(|| format!("failed to create {}", output_root.display()))?;
    fs::create_dir_all(&metadata_dir)
        .with_context(|| format!("failed to create {}", metadata_dir.display()))?;
    info!(
        subjects = subjects.len(),
        output = %output_root.display(),
        naming = ?naming,
        parity = args.config.parity_mode,
        "starting run"
    );

    let runner = BatchRunner::<Backend>::new(config.clone(), Default::default())
        .context("failed to load shared registration assets")?;
    let sink = FileSink::new(
        &output_root,
        naming,
        config.grid.atlas_resolution_um,
        config.node_spacing_um,
    )
    .per_subject(subjects.len() > 1);
    let report = runner.run(&subjects, &sink);
    let end_time = Utc::now().to_rfc3339();

    // Metadata
    let process_report = ProcessReport {
        dataset_ids: report.subjects.iter().map(|s| s.subject.as_str()).collect(),
        start_time: start_time.clone(),
        end_time: end_time.clone(),
        run: &report,
    };
    write_json(&metadata_dir.join("process_report.json"), &process_report)?;
    let runtime = RuntimeArgs {
        args,
        effective_output_root: &output_root,
        effective_metadata_dir: &metadata_dir,
        effective_naming_style: naming,
        effective_config: &config,
    };
    write_processing(&metadata_dir, &start_time, &end_time, &runtime)?;
    write_json(&metadata_dir.join("runtime_args.json"), &runtime)?;

    let manifests = metadata_dir.join("manifests");
    if let [subject] = subjects.as_slice() {
        write_manifest(&subject.swc_dir, &manifests.join("inputs_manifest.json"))?;
    } else {
        for (i, subject) in subjects.iter().enumerate() {
            let label = subject
                .subject_id
                .clone()
                .or_else(|| {
                    subject
                        .transform_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| i.to_string());
            write_manifest(&subject.swc_dir, &manifests.join(format!("inputs_manifest_{label}.json")))?;
        }
    }
    write_manifest(&output_root, &manifests.join("outputs_manifest.json"))?;

    for failure in &report.failed {
        error!(
            subject = %failure.subject,
            stage = %failure.stage,
            file = ?failure.file,
            "{}",
            failure.error
        );
    }
    info!(
        inputs = report.inputs,
        transformed = report.transformed,
        swc_outputs = report.swc_outputs,
        failed = report.failed.len(),
        "run complete"
    );
    if report.aborted {
        bail!(
            "run stopped after {} failure(s); see {}",
            report.failed.len(),
            metadata_dir.join("process_report.json").display()
        );
    }
    if !report.failed.is_empty() {
        warn!("{} file(s) failed; outputs for the rest were written", report.failed.len());
    }
    Ok(())
}

fn resolve(subject: &SubjectArgs, config: &ConfigArgs) -> Result<()> {
    let config = config.pipeline_config()?;
    let subject = subject.subject_config(Path::new("."))?;
    let bundle = AssetResolver::new(&config.grid).resolve(&subject)?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}

fn trace(subject: &SubjectArgs, config: &ConfigArgs, point: &[f64]) -> Result<()> {
    let [x, y, z] = point else {
        bail!("--point takes exactly three coordinates");
    };
    let config = config.pipeline_config()?.without_annotation();
    let subject = subject.subject_config(Path::new("."))?;
    let device = Default::default();

    let shared = SharedResources::<Backend>::load(&config, &device)
        .context("failed to load shared registration assets")?;
    let bundle = AssetResolver::new(&config.grid).resolve(&subject)?;
    let sample = load_sample_registration::<Backend>(&bundle, &device)?;
    let chain = TransformChainBuilder::new(&config.grid).build(&sample, &shared.template)?;

    println!("{:<22} {:<20} {:>12} {:>12} {:>12}  in-bounds", "stage", "space", "x", "y", "z");
    for step in chain.trace(&Point3::new([*x, *y, *z]))? {
        let [px, py, pz] = step.point.to_array();
        println!(
            "{:<22} {:<20} {:>12.4} {:>12.4} {:>12.4}  {}",
            step.stage,
            step.space.to_string(),
            px,
            py,
            pz,
            step.in_bounds
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["ccfmap", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_parity_mode_defaults() {
        let args = run_args(&["--transform-dir", "/t/exaSPIM_685111", "--parity-mode"]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.node_spacing_um, None);
        assert!(!config.annotate);
        assert_eq!(args.output_root(), PathBuf::from(PARITY_OUTPUT_ROOT));
        assert_eq!(args.naming_style(), NamingStyle::AlignedPrefix);
    }

    #[test]
    fn test_flags_override_preset() {
        let args = run_args(&[
            "--transform-dir",
            "/t",
            "--parity-mode",
            "--naming-style",
            "suffix",
            "--node-spacing-um",
            "2.5",
            "--output-root",
            "/out",
            "--ccf-template-path",
            "/atlas/avg.nii.gz",
        ]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.node_spacing_um, Some(2.5));
        assert_eq!(config.shared.atlas_template, PathBuf::from("/atlas/avg.nii.gz"));
        assert_eq!(args.naming_style(), NamingStyle::Suffix);
        assert_eq!(args.output_root(), PathBuf::from("/out"));
    }

    #[test]
    fn test_subject_overrides() {
        let args = run_args(&[
            "--transform-dir",
            "/t",
            "--dataset-id",
            "685111",
            "--sample-to-exaspim-affine-path",
            "/x/affine.mat",
        ]);
        let subjects = args.subjects().unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].subject_id.as_deref(), Some("685111"));
        assert_eq!(
            subjects[0].overrides.sample_affine,
            Some(PathBuf::from("/x/affine.mat"))
        );
        assert_eq!(subjects[0].overrides.acquisition, None);
    }

    #[test]
    fn test_rejects_bad_spacing() {
        let args = run_args(&["--transform-dir", "/t", "--node-spacing-um=-1"]);
        assert!(args.pipeline_config().is_err());
    }

    #[test]
    fn test_trace_point_parses_negative_values() {
        let cli = Cli::try_parse_from(["ccfmap", "trace", "--transform-dir", "/t", "--point", "1", "-2.5", "3"])
            .unwrap();
        match cli.command {
            Commands::Trace { point, .. } => assert_eq!(point, vec![1.0, -2.5, 3.0]),
            _ => unreachable!(),
        }
    }
}
