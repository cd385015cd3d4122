//! Run metadata: process report, processing record, runtime arguments and
//! file manifests.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ccfmap_pipeline::RunReport;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    /// Path relative to the manifest root.
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
    );
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Every file below `root`, sorted, with size and SHA-256.
pub fn build_manifest(root: &Path) -> Result<Vec<ManifestEntry>> {
    let mut files = Vec::new();
    if root.is_dir() {
        for entry in WalkDir::new(root) {
            let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
        .into_iter()
        .map(|path| -> Result<ManifestEntry> {
            let size = fs::metadata(&path)?.len();
            Ok(ManifestEntry {
                path: path.strip_prefix(root).unwrap_or(&path).to_path_buf(),
                size,
                sha256: sha256_file(&path)?,
            })
        })
        .collect()
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

pub fn write_manifest(root: &Path, out: &Path) -> Result<()> {
    write_json(out, &build_manifest(root)?)
}

/// `process_report.json` contents.
#[derive(Debug, Serialize)]
pub struct ProcessReport<'a> {
    pub dataset_ids: Vec<&'a str>,
    pub start_time: String,
    pub end_time: String,
    #[serde(flatten)]
    pub run: &'a RunReport,
}

#[derive(Debug, Serialize)]
struct Code<'a, P: Serialize> {
    name: &'a str,
    version: &'a str,
    parameters: &'a P,
}

#[derive(Debug, Serialize)]
struct DataProcess<'a, P: Serialize> {
    name: &'a str,
    process_type: &'a str,
    stage: &'a str,
    code: Code<'a, P>,
    start_date_time: &'a str,
    end_date_time: &'a str,
    output_parameters: &'a P,
}

#[derive(Debug, Serialize)]
struct Processing<'a, P: Serialize> {
    data_processes: Vec<DataProcess<'a, P>>,
}

/// Write `processing.json` describing this run.
pub fn write_processing<P: Serialize>(
    dir: &Path,
    start_time: &str,
    end_time: &str,
    parameters: &P,
) -> Result<()> {
    let processing = Processing {
        data_processes: vec![DataProcess {
            name: "SWC Processing",
            process_type: "Neuron skeleton processing",
            stage: "Processing",
            code: Code {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                parameters,
            },
            start_date_time: start_time,
            end_date_time: end_time,
            output_parameters: parameters,
        }],
    };
    write_json(&dir.join("processing.json"), &processing)
}
