//! Error types for morphology mapping.
//!
//! Every fatal condition of the pipeline maps onto one variant of
//! [`MappingError`]. Out-of-bounds coordinates are not errors; they travel
//! as per-node flags.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mapping operations.
#[derive(Error, Debug)]
pub enum MappingError {
    /// A required asset could not be located by convention or override.
    #[error("Asset resolution error: missing {asset} ({attempted})")]
    AssetResolution {
        /// Human-readable asset name, e.g. "sample->template inverse warp".
        asset: String,
        /// What was tried: the override path or the convention candidates.
        attempted: String,
    },

    /// More than one candidate matched where exactly one was expected.
    #[error("Ambiguous {asset}: {} candidates matched: {}", .matches.len(), display_paths(.matches))]
    AmbiguousAsset {
        asset: String,
        matches: Vec<PathBuf>,
    },

    /// Malformed transform (non-invertible affine, inconsistent field grid,
    /// broken chain composition).
    #[error("Transform application error: {0}")]
    TransformApplication(String),

    /// Malformed morphology tree.
    #[error("Topology violation: {0}")]
    TopologyViolation(String),

    /// Malformed input file.
    #[error("Parse error in {path}: {message}")]
    Parse {
        path: String,
        message: String,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mapping operations.
pub type Result<T> = std::result::Result<T, MappingError>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl MappingError {
    /// Create an asset resolution error.
    pub fn asset_resolution(asset: impl Into<String>, attempted: impl Into<String>) -> Self {
        Self::AssetResolution {
            asset: asset.into(),
            attempted: attempted.into(),
        }
    }

    /// Create a transform application error.
    pub fn transform_application(msg: impl Into<String>) -> Self {
        Self::TransformApplication(msg.into())
    }

    /// Create a topology violation.
    pub fn topology(msg: impl Into<String>) -> Self {
        Self::TopologyViolation(msg.into())
    }

    /// Create a parse error for a file.
    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Short machine-friendly category, used in run reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::AssetResolution { .. } | Self::AmbiguousAsset { .. } => "asset_resolution",
            Self::TransformApplication(_) => "transform_application",
            Self::TopologyViolation(_) => "topology_violation",
            Self::Parse { .. } => "parse",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MappingError::topology("two roots");
        assert!(matches!(err, MappingError::TopologyViolation(_)));
        assert_eq!(err.category(), "topology_violation");
    }

    #[test]
    fn test_error_display() {
        let err = MappingError::asset_resolution("acquisition file", "override /x/acq.json");
        assert_eq!(
            err.to_string(),
            "Asset resolution error: missing acquisition file (override /x/acq.json)"
        );
    }

    #[test]
    fn test_ambiguous_lists_matches() {
        let err = MappingError::AmbiguousAsset {
            asset: "manual displacement field".into(),
            matches: vec![PathBuf::from("/a.nrrd"), PathBuf::from("/b.nrrd")],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 candidates"));
        assert!(msg.contains("/a.nrrd"));
        assert!(msg.contains("/b.nrrd"));
    }
}
