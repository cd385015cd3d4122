//! ITK / ANTs affine transform files.
//!
//! Two encodings are read:
//! * MATLAB v4 `.mat` as written by ANTs, holding the variables
//!   `AffineTransform_double_3_3` (12 parameters) and `fixed` (the center);
//! * ITK text transform files (`Parameters:` / `FixedParameters:` lines).

use std::fs;
use std::path::Path;

use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::transform::AffineTransform;
use tracing::debug;

use crate::display;

/// One MATLAB v4 matrix record, data column-major.
#[derive(Debug, Clone)]
struct MatVariable {
    name: String,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    fn i32(&mut self, big_endian: bool) -> Option<i32> {
        let b: [u8; 4] = self.take(4)?.try_into().ok()?;
        Some(if big_endian { i32::from_be_bytes(b) } else { i32::from_le_bytes(b) })
    }
}

fn parse_matlab_v4(path: &Path, bytes: &[u8]) -> Result<Vec<MatVariable>> {
    let err = |m: String| MappingError::parse(display(path), m);
    let mut cur = Cursor { bytes, pos: 0 };
    let mut vars = Vec::new();

    while cur.pos < bytes.len() {
        let raw: [u8; 4] = cur
            .take(4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| err("truncated MATLAB record header".into()))?;
        // MOPT: M is 0 for little-endian, 1 for big-endian.
        let le = i32::from_le_bytes(raw);
        let be = i32::from_be_bytes(raw);
        let (mopt, big_endian) = if (0..1000).contains(&le) {
            (le, false)
        } else if (1000..2000).contains(&be) {
            (be, true)
        } else {
            return Err(err(format!("unsupported MATLAB record type {le}")));
        };
        let precision = (mopt / 10) % 10;
        let kind = mopt % 10;
        if kind != 0 {
            return Err(err(format!("MATLAB record type {mopt} is not a numeric matrix")));
        }

        let mut field = || cur.i32(big_endian).ok_or_else(|| err("truncated MATLAB record header".into()));
        let rows = field()?;
        let cols = field()?;
        let imag = field()?;
        let name_len = field()?;
        if rows < 0 || cols < 0 || name_len <= 0 {
            return Err(err(format!("bad MATLAB record dimensions {rows}x{cols}")));
        }

        let name_bytes = cur
            .take(name_len as usize)
            .ok_or_else(|| err("truncated MATLAB variable name".into()))?;
        let name = String::from_utf8_lossy(name_bytes)
            .trim_end_matches('\0')
            .to_string();

        let count = (rows as usize)
            .checked_mul(cols as usize)
            .ok_or_else(|| err(format!("MATLAB variable '{name}' is too large")))?;
        let width = match precision {
            0 => 8,
            1 | 2 => 4,
            3 | 4 => 2,
            5 => 1,
            p => return Err(err(format!("unsupported MATLAB precision {p} for '{name}'"))),
        };
        let parts = if imag != 0 { 2 } else { 1 };
        let bytes = count
            .checked_mul(width)
            .and_then(|b| b.checked_mul(parts))
            .ok_or_else(|| err(format!("MATLAB variable '{name}' is too large")))?;
        let payload = cur
            .take(bytes)
            .ok_or_else(|| err(format!("truncated data for MATLAB variable '{name}'")))?;

        let data = payload[..count * width]
            .chunks_exact(width)
            .map(|b| decode_mat(precision, b, big_endian))
            .collect();
        vars.push(MatVariable { name, rows: rows as usize, cols: cols as usize, data });
    }
    Ok(vars)
}

fn decode_mat(precision: i32, b: &[u8], big_endian: bool) -> f64 {
    macro_rules! num {
        ($t:ty) => {{
            let arr = b.try_into().unwrap_or_default();
            if big_endian {
                <$t>::from_be_bytes(arr) as f64
            } else {
                <$t>::from_le_bytes(arr) as f64
            }
        }};
    }
    match precision {
        0 => num!(f64),
        1 => num!(f32),
        2 => num!(i32),
        3 => num!(i16),
        4 => num!(u16),
        _ => b[0] as f64,
    }
}

fn read_matlab_affine(path: &Path, bytes: &[u8]) -> Result<AffineTransform> {
    let vars = parse_matlab_v4(path, bytes)?;
    let params = vars
        .iter()
        .find(|v| v.name.starts_with("AffineTransform") || v.name.starts_with("MatrixOffsetTransformBase"))
        .ok_or_else(|| {
            let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
            MappingError::transform_application(format!(
                "{}: no affine parameter variable among {names:?}",
                path.display()
            ))
        })?;
    let fixed = vars.iter().find(|v| v.name == "fixed");
    debug!(
        path = %path.display(),
        variable = %params.name,
        shape = ?(params.rows, params.cols),
        "read MATLAB affine"
    );
    AffineTransform::from_itk_parameters(&params.data, fixed.map(|f| f.data.as_slice()).unwrap_or(&[]))
        .map_err(|e| MappingError::transform_application(format!("{}: {e}", path.display())))
}

fn parse_numbers(path: &Path, line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| MappingError::parse(display(path), format!("bad number '{t}': {e}")))
        })
        .collect()
}

/// Parse the first transform of an ITK text transform file.
pub fn parse_itk_text(path: &Path, text: &str) -> Result<AffineTransform> {
    let mut parameters = None;
    let mut fixed = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Transform:") {
            if parameters.is_some() {
                break;
            }
            let name = rest.trim();
            if !(name.starts_with("AffineTransform") || name.starts_with("MatrixOffsetTransformBase")) {
                return Err(MappingError::transform_application(format!(
                    "{}: unsupported transform type '{name}'",
                    path.display()
                )));
            }
        } else if let Some(rest) = line.strip_prefix("FixedParameters:") {
            fixed = Some(parse_numbers(path, rest)?);
        } else if let Some(rest) = line.strip_prefix("Parameters:") {
            parameters = Some(parse_numbers(path, rest)?);
        }
    }
    let parameters = parameters
        .ok_or_else(|| MappingError::parse(display(path), "ITK transform file has no Parameters line"))?;
    AffineTransform::from_itk_parameters(&parameters, fixed.as_deref().unwrap_or(&[]))
        .map_err(|e| MappingError::transform_application(format!("{}: {e}", path.display())))
}

/// Read an affine from `.mat` (MATLAB v4) or an ITK text file.
pub fn read_itk_affine(path: impl AsRef<Path>) -> Result<AffineTransform> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let is_mat = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mat"))
        .unwrap_or(false);
    if is_mat && !bytes.starts_with(b"#Insight") {
        read_matlab_affine(path, &bytes)
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|_| MappingError::parse(display(path), "transform file is neither MATLAB v4 nor text"))?;
        parse_itk_text(path, &text)
    }
}

fn push_matlab_record(out: &mut Vec<u8>, name: &str, values: &[f64]) {
    let name_bytes: Vec<u8> = name.bytes().chain(std::iter::once(0)).collect();
    for v in [0i32, values.len() as i32, 1, 0, name_bytes.len() as i32] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&name_bytes);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Write an affine as a little-endian MATLAB v4 file in the ANTs layout.
pub fn write_matlab_affine(path: impl AsRef<Path>, transform: &AffineTransform) -> Result<()> {
    let mut out = Vec::new();
    push_matlab_record(&mut out, "AffineTransform_double_3_3", &transform.itk_parameters());
    push_matlab_record(&mut out, "fixed", &transform.center().to_array());
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccfmap_core::spatial::Point3;
    use tempfile::tempdir;

    fn sample() -> AffineTransform {
        AffineTransform::from_itk_parameters(
            &[1.1, 0.02, 0.0, -0.03, 0.95, 0.1, 0.0, -0.1, 1.05, 12.5, -3.0, 40.25],
            &[-5.0, 6.0, 200.0],
        )
        .unwrap()
    }

    #[test]
    fn test_matlab_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0GenericAffine.mat");
        write_matlab_affine(&path, &sample()).unwrap();
        let back = read_itk_affine(&path).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_big_endian_float_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("be.mat");
        let mut bytes = Vec::new();
        let name = b"AffineTransform_float_3_3\0";
        for v in [1010i32, 12, 1, 0, name.len() as i32] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes.extend_from_slice(name);
        for v in [2.0f32, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0, 1.0, 1.0, 1.0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        fs::write(&path, bytes).unwrap();
        let t = read_itk_affine(&path).unwrap();
        assert_eq!(t.transform_point(&Point3::new([1.0, 2.0, 3.0])), Point3::new([3.0, 5.0, 7.0]));
    }

    #[test]
    fn test_itk_text() {
        let text = "#Insight Transform File V1.0\n#Transform 0\nTransform: AffineTransform_double_3_3\n\
                    Parameters: 1 0 0 0 1 0 0 0 1 5 6 7\nFixedParameters: 1 1 1\n";
        let t = parse_itk_text(Path::new("t.txt"), text).unwrap();
        assert_eq!(t.transform_point(&Point3::origin()), Point3::new([5.0, 6.0, 7.0]));
        assert_eq!(t.center().to_array(), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_missing_parameter_variable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.mat");
        let mut out = Vec::new();
        push_matlab_record(&mut out, "fixed", &[0.0, 0.0, 0.0]);
        fs::write(&path, out).unwrap();
        let err = read_itk_affine(&path).unwrap_err();
        assert!(matches!(err, MappingError::TransformApplication(_)));
    }

    #[test]
    fn test_rejects_truncated_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.mat");
        let mut out = Vec::new();
        push_matlab_record(&mut out, "AffineTransform_double_3_3", &[1.0; 12]);
        out.truncate(out.len() - 3);
        fs::write(&path, out).unwrap();
        assert!(matches!(read_itk_affine(&path), Err(MappingError::Parse { .. })));
    }

    #[test]
    fn test_rejects_oversized_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.mat");
        let name = b"AffineTransform_double_3_3\0";
        let mut out = Vec::new();
        for v in [0i32, i32::MAX, i32::MAX, 1, name.len() as i32] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(name);
        out.extend_from_slice(&[0u8; 16]);
        fs::write(&path, out).unwrap();
        let err = read_itk_affine(&path).unwrap_err();
        assert!(matches!(err, MappingError::Parse { .. }), "{err:?}");
    }
}
