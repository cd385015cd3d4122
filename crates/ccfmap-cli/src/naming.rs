//! Output file names.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    /// Keep the input stem.
    Preserve,
    /// Append `__space-ccf_res-<N>um`.
    Suffix,
    /// Prefix `aligned_`, as legacy runs did.
    AlignedPrefix,
}

/// Output SWC name for an input file.
pub fn transformed_name(input: &Path, style: NamingStyle, resolution_um: f64) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match style {
        NamingStyle::Preserve => format!("{stem}.swc"),
        NamingStyle::Suffix => format!("{stem}__space-ccf_res-{}um.swc", format_resolution(resolution_um)),
        NamingStyle::AlignedPrefix => format!("aligned_{stem}.swc"),
    }
}

fn format_resolution(um: f64) -> String {
    if um.fract() == 0.0 {
        format!("{}", um as i64)
    } else {
        format!("{um}")
    }
}
