//! Registration asset resolution.
//!
//! Each per-subject asset is described by a [`ConventionRule`]: candidate
//! path templates relative to the bundle, plus an override slot. Resolving a
//! rule yields a [`ResolvedAsset`] that records which source satisfied it.

use std::fmt;
use std::path::{Path, PathBuf};

use ccfmap_core::error::{MappingError, Result};
use serde::Serialize;
use tracing::debug;

use crate::config::{AssetOverrides, GridConfig, ManualFieldConfig, SharedAssets, SubjectConfig};

/// Sub-directory that holds the registration outputs when present.
pub const ALIGNMENT_DIR: &str = "ccf_alignment";
/// Sub-directory of the bundle root with acquisition and grid references.
pub const METADATA_DIR: &str = "registration_metadata";

/// Manual-field file names searched in a directory, in order.
pub const MANUAL_FIELD_CANDIDATES: [&str; 7] = [
    "{subject_id}_displacement_field_vector_volume.nrrd",
    "{subject_id}_displacement_field.nrrd",
    "{subject_id}_displacement_field_vector_volume.nii.gz",
    "{subject_id}_displacement_field.nii.gz",
    "displacement_field_vector_volume.nrrd",
    "displacement_field.nrrd",
    "manual_displacement_field.nrrd",
];

/// Per-subject assets of a registration bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    SampleAffine,
    SampleInverseWarp,
    Acquisition,
    LoadedImage,
    ResampledImage,
}

impl AssetKind {
    pub const ALL: [AssetKind; 5] = [
        Self::Acquisition,
        Self::LoadedImage,
        Self::ResampledImage,
        Self::SampleAffine,
        Self::SampleInverseWarp,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::SampleAffine => "sample->template affine",
            Self::SampleInverseWarp => "sample->template inverse warp",
            Self::Acquisition => "acquisition file",
            Self::LoadedImage => "loaded image",
            Self::ResampledImage => "resampled image",
        }
    }

    /// Path templates relative to the bundle root.
    fn templates(self) -> &'static [&'static str] {
        match self {
            Self::SampleAffine => &["{subject_id}_to_{template}_SyN_0GenericAffine.mat"],
            Self::SampleInverseWarp => &["{subject_id}_to_{template}_SyN_1InverseWarp.nii.gz"],
            Self::Acquisition => &[
                "registration_metadata/acquisition_{subject_id}.json",
                "registration_metadata/acquisition.json",
            ],
            Self::LoadedImage => &["registration_metadata/{subject_id}_{res}_loaded_zarr_img.nii.gz"],
            Self::ResampledImage => {
                &["registration_metadata/{subject_id}_{res}_resampled_zarr_img.nii.gz"]
            }
        }
    }

    fn override_slot(self, overrides: &AssetOverrides) -> Option<&PathBuf> {
        match self {
            Self::SampleAffine => overrides.sample_affine.as_ref(),
            Self::SampleInverseWarp => overrides.sample_inverse_warp.as_ref(),
            Self::Acquisition => overrides.acquisition.as_ref(),
            Self::LoadedImage => overrides.loaded_image.as_ref(),
            Self::ResampledImage => overrides.resampled_image.as_ref(),
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which source satisfied an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Found under the bundle by the given path template.
    Convention { template: String },
    /// Given explicitly.
    Override,
}

/// A located asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAsset {
    pub asset: AssetKind,
    pub path: PathBuf,
    #[serde(flatten)]
    pub source: ResolutionSource,
}

/// One resolution strategy: candidate templates and an override slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConventionRule {
    pub asset: AssetKind,
    pub root: PathBuf,
    pub templates: Vec<String>,
    pub override_path: Option<PathBuf>,
}

impl ConventionRule {
    /// Concrete candidate paths, in template order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        self.templates.iter().map(|t| self.root.join(t)).collect()
    }

    /// Resolve to exactly one existing file.
    ///
    /// A set override is used as-is and must exist. Otherwise exactly one
    /// convention candidate must exist.
    pub fn resolve(&self) -> Result<ResolvedAsset> {
        if let Some(path) = &self.override_path {
            if !path.is_file() {
                return Err(MappingError::asset_resolution(
                    self.asset.label(),
                    format!("override {}", path.display()),
                ));
            }
            return Ok(ResolvedAsset {
                asset: self.asset,
                path: path.clone(),
                source: ResolutionSource::Override,
            });
        }

        let hits: Vec<(&String, PathBuf)> = self
            .templates
            .iter()
            .map(|t| (t, self.root.join(t)))
            .filter(|(_, p)| p.is_file())
            .collect();
        match hits.as_slice() {
            [(template, path)] => Ok(ResolvedAsset {
                asset: self.asset,
                path: path.clone(),
                source: ResolutionSource::Convention {
                    template: (*template).clone(),
                },
            }),
            [] => Err(MappingError::asset_resolution(
                self.asset.label(),
                format!(
                    "0 of {} convention candidates found: {}",
                    self.templates.len(),
                    join_paths(&self.candidates())
                ),
            )),
            _ => Err(MappingError::AmbiguousAsset {
                asset: self.asset.label().to_string(),
                matches: hits.into_iter().map(|(_, p)| p).collect(),
            }),
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn expand(template: &str, subject_id: &str, grid: &GridConfig) -> String {
    template
        .replace("{subject_id}", subject_id)
        .replace("{template}", &grid.template_name)
        .replace("{res}", &grid.resolution_tag)
}

/// How the optional manual correction field was located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ManualFieldResolution {
    /// No manual field configured.
    Skip,
    /// The configured path is the field file.
    SingleFile(PathBuf),
    /// An explicit file name inside the configured directory.
    Named(PathBuf),
    /// The one search candidate found in the configured directory.
    SearchedMatch(PathBuf),
}

impl ManualFieldResolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Skip => None,
            Self::SingleFile(p) | Self::Named(p) | Self::SearchedMatch(p) => Some(p),
        }
    }
}

/// Locate the manual displacement field.
pub fn resolve_manual_field(
    config: &ManualFieldConfig,
    subject_id: &str,
) -> Result<ManualFieldResolution> {
    const ASSET: &str = "manual displacement field";
    let Some(path) = &config.path else {
        return Ok(ManualFieldResolution::Skip);
    };
    if path.is_file() {
        return Ok(ManualFieldResolution::SingleFile(path.clone()));
    }
    if !path.is_dir() {
        return Err(MappingError::asset_resolution(
            ASSET,
            format!("{} is neither a file nor a directory", path.display()),
        ));
    }
    if let Some(name) = &config.filename {
        let named = path.join(name);
        if !named.is_file() {
            return Err(MappingError::asset_resolution(
                ASSET,
                format!("named file {}", named.display()),
            ));
        }
        return Ok(ManualFieldResolution::Named(named));
    }

    let candidates: Vec<PathBuf> = MANUAL_FIELD_CANDIDATES
        .iter()
        .map(|t| path.join(t.replace("{subject_id}", subject_id)))
        .collect();
    let mut hits: Vec<PathBuf> = candidates.iter().filter(|p| p.is_file()).cloned().collect();
    match hits.len() {
        0 => Err(MappingError::asset_resolution(
            ASSET,
            format!("no search candidate found: {}", join_paths(&candidates)),
        )),
        1 => Ok(ManualFieldResolution::SearchedMatch(hits.remove(0))),
        _ => Err(MappingError::AmbiguousAsset {
            asset: ASSET.to_string(),
            matches: hits,
        }),
    }
}

/// Everything needed to build one subject's transform chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationBundle {
    pub subject_id: String,
    pub root: PathBuf,
    pub acquisition: ResolvedAsset,
    pub loaded_image: ResolvedAsset,
    pub resampled_image: ResolvedAsset,
    pub sample_affine: ResolvedAsset,
    pub sample_inverse_warp: ResolvedAsset,
    pub manual_field: ManualFieldResolution,
}

impl RegistrationBundle {
    pub fn assets(&self) -> [&ResolvedAsset; 5] {
        [
            &self.acquisition,
            &self.loaded_image,
            &self.resampled_image,
            &self.sample_affine,
            &self.sample_inverse_warp,
        ]
    }
}

/// Bundle root: `<dir>/ccf_alignment` when it exists, otherwise `<dir>`.
pub fn bundle_root(transform_dir: &Path) -> PathBuf {
    let aligned = transform_dir.join(ALIGNMENT_DIR);
    if aligned.exists() {
        aligned
    } else {
        transform_dir.to_path_buf()
    }
}

/// First run of six digits in the bundle directory name.
pub fn infer_subject_id(root: &Path) -> Result<String> {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.as_bytes()
        .windows(6)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|start| name[start..start + 6].to_string())
        .ok_or_else(|| {
            MappingError::asset_resolution(
                "subject id",
                format!("no six-digit id in {}; pass it explicitly", root.display()),
            )
        })
}

/// Resolves registration bundles for subjects.
#[derive(Debug, Clone)]
pub struct AssetResolver<'a> {
    grid: &'a GridConfig,
}

impl<'a> AssetResolver<'a> {
    pub fn new(grid: &'a GridConfig) -> Self {
        Self { grid }
    }

    /// Resolution rules for one subject, in resolution order.
    pub fn rules(&self, root: &Path, subject_id: &str, overrides: &AssetOverrides) -> Vec<ConventionRule> {
        AssetKind::ALL
            .iter()
            .map(|&asset| ConventionRule {
                asset,
                root: root.to_path_buf(),
                templates: asset
                    .templates()
                    .iter()
                    .map(|t| expand(t, subject_id, self.grid))
                    .collect(),
                override_path: asset.override_slot(overrides).cloned(),
            })
            .collect()
    }

    /// Resolve every per-subject asset.
    ///
    /// Fails on the first asset that cannot be located.
    pub fn resolve(&self, subject: &SubjectConfig) -> Result<RegistrationBundle> {
        if !subject.transform_dir.is_dir() {
            return Err(MappingError::asset_resolution(
                "transform bundle",
                format!("{} is not a directory", subject.transform_dir.display()),
            ));
        }
        let root = bundle_root(&subject.transform_dir);
        // `<dataset>/ccf_alignment` carries the id on the parent directory.
        let subject_id = match &subject.subject_id {
            Some(id) => id.clone(),
            None => infer_subject_id(&root).or_else(|_| infer_subject_id(&subject.transform_dir))?,
        };

        let mut resolved = Vec::with_capacity(AssetKind::ALL.len());
        for rule in self.rules(&root, &subject_id, &subject.overrides) {
            let asset = rule.resolve()?;
            debug!(asset = %asset.asset, path = %asset.path.display(), "resolved asset");
            resolved.push(asset);
        }
        let manual_field = resolve_manual_field(&subject.manual_field, &subject_id)?;

        let mut take = |kind: AssetKind| {
            let i = resolved.iter().position(|a| a.asset == kind);
            i.map(|i| resolved.swap_remove(i))
                .ok_or_else(|| MappingError::asset_resolution(kind.label(), "no resolution rule"))
        };
        Ok(RegistrationBundle {
            acquisition: take(AssetKind::Acquisition)?,
            loaded_image: take(AssetKind::LoadedImage)?,
            resampled_image: take(AssetKind::ResampledImage)?,
            sample_affine: take(AssetKind::SampleAffine)?,
            sample_inverse_warp: take(AssetKind::SampleInverseWarp)?,
            subject_id,
            root,
            manual_field,
        })
    }
}

/// Check that every shared asset the run needs exists.
pub fn validate_shared(shared: &SharedAssets, annotate: bool) -> Result<()> {
    let mut required = vec![
        ("template->atlas affine", &shared.template_to_atlas_affine),
        ("template->atlas inverse warp", &shared.template_to_atlas_inverse_warp),
        ("template volume", &shared.template),
        ("atlas template volume", &shared.atlas_template),
    ];
    if annotate {
        required.push(("annotation volume", &shared.annotation));
        required.push(("structure ontology", &shared.ontology));
    }
    for (asset, path) in required {
        if !path.is_file() {
            return Err(MappingError::asset_resolution(
                asset,
                format!("shared path {}", path.display()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_infer_subject_id() {
        assert_eq!(infer_subject_id(Path::new("/t/SmartSPIM_685111_2023")).unwrap(), "685111");
        assert_eq!(infer_subject_id(Path::new("/t/exa_1234567")).unwrap(), "123456");
        assert!(matches!(
            infer_subject_id(Path::new("/t/ccf_alignment")),
            Err(MappingError::AssetResolution { .. })
        ));
    }

    proptest! {
        #[test]
        fn test_infer_subject_id_takes_first_six_digit_run(
            prefix in "[A-Za-z_]{0,12}",
            id in "[0-9]{6}",
            suffix in "(_[0-9A-Za-z-]{0,12})?",
        ) {
            let name = format!("{prefix}{id}{suffix}");
            let dir = PathBuf::from("/t").join(&name);
            prop_assert_eq!(infer_subject_id(&dir).unwrap(), id);
        }
    }

    #[test]
    fn test_bundle_root_prefers_alignment_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(bundle_root(dir.path()), dir.path());
        fs::create_dir(dir.path().join(ALIGNMENT_DIR)).unwrap();
        assert_eq!(bundle_root(dir.path()), dir.path().join(ALIGNMENT_DIR));
    }

    #[test]
    fn test_rules_expand_templates() {
        let grid = GridConfig::default();
        let resolver = AssetResolver::new(&grid);
        let rules = resolver.rules(Path::new("/b"), "685111", &AssetOverrides::default());
        let warp = rules
            .iter()
            .find(|r| r.asset == AssetKind::SampleInverseWarp)
            .unwrap();
        assert_eq!(
            warp.candidates(),
            vec![PathBuf::from("/b/685111_to_exaSPIM_SyN_1InverseWarp.nii.gz")]
        );
        let loaded = rules.iter().find(|r| r.asset == AssetKind::LoadedImage).unwrap();
        assert_eq!(
            loaded.templates,
            vec!["registration_metadata/685111_10um_loaded_zarr_img.nii.gz".to_string()]
        );
    }

    #[test]
    fn test_acquisition_falls_back_to_generic_name() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join(METADATA_DIR).join("acquisition.json"));
        let grid = GridConfig::default();
        let rules = AssetResolver::new(&grid).rules(dir.path(), "685111", &AssetOverrides::default());
        let acq = rules.iter().find(|r| r.asset == AssetKind::Acquisition).unwrap();
        let resolved = acq.resolve().unwrap();
        assert_eq!(
            resolved.source,
            ResolutionSource::Convention {
                template: "registration_metadata/acquisition.json".into()
            }
        );
    }

    #[test]
    fn test_acquisition_both_candidates_is_ambiguous() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join(METADATA_DIR).join("acquisition.json"));
        touch(&dir.path().join(METADATA_DIR).join("acquisition_685111.json"));
        let grid = GridConfig::default();
        let rules = AssetResolver::new(&grid).rules(dir.path(), "685111", &AssetOverrides::default());
        let acq = rules.iter().find(|r| r.asset == AssetKind::Acquisition).unwrap();
        match acq.resolve() {
            Err(MappingError::AmbiguousAsset { matches, .. }) => assert_eq!(matches.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_override_is_error() {
        let rule = ConventionRule {
            asset: AssetKind::SampleAffine,
            root: PathBuf::from("/nonexistent"),
            templates: vec![],
            override_path: Some(PathBuf::from("/nonexistent/affine.mat")),
        };
        let err = rule.resolve().unwrap_err();
        assert!(err.to_string().contains("override /nonexistent/affine.mat"));
    }

    #[test]
    fn test_manual_field_modes() {
        let dir = tempdir().unwrap();
        let id = "685111";
        assert_eq!(
            resolve_manual_field(&ManualFieldConfig::default(), id).unwrap(),
            ManualFieldResolution::Skip
        );

        let search = ManualFieldConfig {
            path: Some(dir.path().to_path_buf()),
            filename: None,
        };
        assert!(matches!(
            resolve_manual_field(&search, id),
            Err(MappingError::AssetResolution { .. })
        ));

        let file = dir.path().join("685111_displacement_field.nrrd");
        touch(&file);
        assert_eq!(
            resolve_manual_field(&search, id).unwrap(),
            ManualFieldResolution::SearchedMatch(file.clone())
        );

        touch(&dir.path().join("manual_displacement_field.nrrd"));
        assert!(matches!(
            resolve_manual_field(&search, id),
            Err(MappingError::AmbiguousAsset { .. })
        ));

        let named = ManualFieldConfig {
            path: Some(dir.path().to_path_buf()),
            filename: Some("manual_displacement_field.nrrd".into()),
        };
        assert_eq!(
            resolve_manual_field(&named, id).unwrap(),
            ManualFieldResolution::Named(dir.path().join("manual_displacement_field.nrrd"))
        );

        let single = ManualFieldConfig {
            path: Some(file.clone()),
            filename: None,
        };
        assert_eq!(
            resolve_manual_field(&single, id).unwrap(),
            ManualFieldResolution::SingleFile(file)
        );

        let bogus = ManualFieldConfig {
            path: Some(dir.path().join("missing")),
            filename: None,
        };
        assert!(resolve_manual_field(&bogus, id).is_err());
    }

    #[test]
    fn test_validate_shared_names_missing_asset() {
        let shared = SharedAssets::default();
        let err = validate_shared(&shared, false).unwrap_err();
        assert!(err.to_string().contains("template->atlas affine"));
    }
}
