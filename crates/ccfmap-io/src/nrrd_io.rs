//! NRRD reading for label volumes and vector displacement fields.
//!
//! Supports attached-data files with `raw` or `gzip` encoding. The first
//! axis varies fastest. Vector fields carry a 3-sample axis marked by kind
//! `vector` (or a `none` space direction); the other three axes are the
//! spatial domain.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use burn::tensor::backend::Backend;
use ccfmap_core::annotation::LabelVolume;
use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::image::ImageGeometry;
use ccfmap_core::spatial::{Direction, Point, Spacing};
use ccfmap_core::transform::{DisplacementField, TransformDirection};
use flate2::read::MultiGzDecoder;
use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::frame::PhysicalFrame;
use crate::display;
use crate::nifti_io::label_from_f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

impl SampleType {
    fn parse(s: &str) -> Option<Self> {
        let t = match s.trim() {
            "signed char" | "int8" | "int8_t" => Self::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => Self::UInt8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => Self::Int16,
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => Self::UInt16,
            "int" | "signed int" | "int32" | "int32_t" => Self::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => Self::UInt32,
            "longlong" | "long long" | "long long int" | "signed long long" | "signed long long int" | "int64"
            | "int64_t" => Self::Int64,
            "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64" | "uint64_t" => Self::UInt64,
            "float" => Self::Float,
            "double" => Self::Double,
            _ => return None,
        };
        Some(t)
    }

    fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
        }
    }

    fn decode(self, bytes: &[u8], big_endian: bool) -> f64 {
        macro_rules! num {
            ($t:ty, $n:expr) => {{
                let mut b = [0u8; $n];
                b.copy_from_slice(bytes);
                if big_endian {
                    <$t>::from_be_bytes(b) as f64
                } else {
                    <$t>::from_le_bytes(b) as f64
                }
            }};
        }
        match self {
            Self::Int8 => bytes[0] as i8 as f64,
            Self::UInt8 => bytes[0] as f64,
            Self::Int16 => num!(i16, 2),
            Self::UInt16 => num!(u16, 2),
            Self::Int32 => num!(i32, 4),
            Self::UInt32 => num!(u32, 4),
            Self::Int64 => num!(i64, 8),
            Self::UInt64 => num!(u64, 8),
            Self::Float => num!(f32, 4),
            Self::Double => num!(f64, 8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Gzip,
}

/// Parsed NRRD header fields.
#[derive(Debug, Clone)]
pub struct NrrdHeader {
    pub sample_type: SampleType,
    pub sizes: Vec<usize>,
    pub encoding: Encoding,
    pub big_endian: bool,
    /// Named space, e.g. `left-posterior-superior`.
    pub space: Option<String>,
    /// One entry per axis; `None` for non-spatial axes.
    pub space_directions: Vec<Option<[f64; 3]>>,
    pub space_origin: Option<[f64; 3]>,
    pub kinds: Vec<String>,
}

impl NrrdHeader {
    fn sample_count(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Index of the vector axis, if any.
    fn vector_axis(&self) -> Option<usize> {
        let by_kind = self.kinds.iter().position(|k| {
            matches!(
                k.as_str(),
                "vector" | "covariant-vector" | "normal" | "3-vector" | "3-color" | "list"
            )
        });
        by_kind.or_else(|| {
            if self.space_directions.len() == self.sizes.len() && self.sizes.len() == 4 {
                self.space_directions.iter().position(|d| d.is_none())
            } else {
                None
            }
        })
    }

    /// True when the header's space is right-anterior-superior.
    fn is_ras(&self) -> bool {
        matches!(
            self.space.as_deref(),
            Some("right-anterior-superior") | Some("RAS") | Some("scanner-xyz")
        )
    }
}

fn parse_vector(path: &Path, s: &str) -> Result<Option<[f64; 3]>> {
    let s = s.trim();
    if s == "none" {
        return Ok(None);
    }
    let inner = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| MappingError::parse(display(path), format!("malformed NRRD vector '{s}'")))?;
    let parts = inner
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| MappingError::parse(display(path), format!("malformed NRRD vector '{s}': {e}")))?;
    match parts.as_slice() {
        [x, y, z] => Ok(Some([*x, *y, *z])),
        _ => Err(MappingError::parse(display(path), format!("NRRD vector '{s}' is not 3-D"))),
    }
}

/// Split a `space directions` value into its per-axis tokens.
fn split_directions(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = value.trim();
    while !rest.is_empty() {
        if rest.starts_with('(') {
            let end = rest.find(')').map(|i| i + 1).unwrap_or(rest.len());
            out.push(&rest[..end]);
            rest = rest[end..].trim_start();
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            out.push(&rest[..end]);
            rest = rest[end..].trim_start();
        }
    }
    out
}

/// Read the header and leave the reader positioned at the payload.
fn read_header(path: &Path) -> Result<(NrrdHeader, BufReader<File>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if !line.starts_with("NRRD000") {
        return Err(MappingError::parse(display(path), "missing NRRD magic line"));
    }

    let mut sample_type = None;
    let mut sizes = None;
    let mut dimension = None;
    let mut encoding = Encoding::Raw;
    let mut big_endian = false;
    let mut space = None;
    let mut space_directions = Vec::new();
    let mut space_origin = None;
    let mut kinds = Vec::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(MappingError::parse(display(path), "NRRD header has no data section"));
        }
        let field = line.trim_end_matches(['\n', '\r']);
        if field.is_empty() {
            break;
        }
        if field.starts_with('#') || field.contains(":=") {
            continue;
        }
        let Some((key, value)) = field.split_once(':') else {
            return Err(MappingError::parse(display(path), format!("malformed NRRD field '{field}'")));
        };
        let value = value.trim();
        match key.trim() {
            "type" => {
                sample_type = Some(SampleType::parse(value).ok_or_else(|| {
                    MappingError::parse(display(path), format!("unsupported NRRD type '{value}'"))
                })?)
            }
            "dimension" => {
                dimension = Some(value.parse::<usize>().map_err(|e| {
                    MappingError::parse(display(path), format!("bad NRRD dimension '{value}': {e}"))
                })?)
            }
            "sizes" => {
                sizes = Some(
                    value
                        .split_whitespace()
                        .map(str::parse::<usize>)
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| MappingError::parse(display(path), format!("bad NRRD sizes: {e}")))?,
                )
            }
            "encoding" => {
                encoding = match value {
                    "raw" => Encoding::Raw,
                    "gzip" | "gz" => Encoding::Gzip,
                    other => {
                        return Err(MappingError::parse(
                            display(path),
                            format!("unsupported NRRD encoding '{other}'"),
                        ))
                    }
                }
            }
            "endian" => big_endian = value == "big",
            "space" => space = Some(value.to_string()),
            "space directions" => {
                space_directions = split_directions(value)
                    .into_iter()
                    .map(|t| parse_vector(path, t))
                    .collect::<Result<Vec<_>>>()?
            }
            "space origin" => space_origin = parse_vector(path, value)?,
            "kinds" => kinds = value.split_whitespace().map(str::to_string).collect(),
            "data file" | "datafile" => {
                return Err(MappingError::parse(display(path), "detached NRRD data is not supported"))
            }
            _ => {}
        }
    }

    let sample_type = sample_type.ok_or_else(|| MappingError::parse(display(path), "NRRD header lacks 'type'"))?;
    let sizes = sizes.ok_or_else(|| MappingError::parse(display(path), "NRRD header lacks 'sizes'"))?;
    if let Some(d) = dimension {
        if d != sizes.len() {
            return Err(MappingError::parse(
                display(path),
                format!("NRRD dimension {d} disagrees with {} sizes", sizes.len()),
            ));
        }
    }

    Ok((
        NrrdHeader {
            sample_type,
            sizes,
            encoding,
            big_endian,
            space,
            space_directions,
            space_origin,
            kinds,
        },
        reader,
    ))
}

/// Grid geometry from the spatial axes of a header.
fn header_geometry(path: &Path, header: &NrrdHeader, domain: &[usize], frame: PhysicalFrame) -> Result<ImageGeometry> {
    if domain.len() != 3 {
        return Err(MappingError::parse(
            display(path),
            format!("expected 3 spatial axes, found {}", domain.len()),
        ));
    }
    let flip = frame == PhysicalFrame::Lps && header.is_ras();
    let sign = |axis: usize, v: f64| if flip && axis < 2 { -v } else { v };

    let mut shape = [0usize; 3];
    let mut spacing = [1.0; 3];
    let mut columns = [Vector3::x(), Vector3::y(), Vector3::z()];
    for (j, &axis) in domain.iter().enumerate() {
        shape[j] = header.sizes[axis];
        if let Some(Some(d)) = header.space_directions.get(axis) {
            let v = Vector3::new(sign(0, d[0]), sign(1, d[1]), sign(2, d[2]));
            spacing[j] = v.norm();
            if spacing[j] > 0.0 {
                columns[j] = v / spacing[j];
            }
        }
    }
    let origin = header
        .space_origin
        .map(|o| [sign(0, o[0]), sign(1, o[1]), sign(2, o[2])])
        .unwrap_or([0.0; 3]);
    ImageGeometry::new(
        shape,
        Point::new(origin),
        Spacing::new(spacing),
        Direction(Matrix3::from_columns(&columns)),
    )
}

/// Decode `count` samples from the payload, converting each with `convert`.
fn read_samples<T>(
    path: &Path,
    header: &NrrdHeader,
    reader: BufReader<File>,
    mut convert: impl FnMut(f64) -> Option<T>,
) -> Result<Vec<T>> {
    let mut payload: Box<dyn Read> = match header.encoding {
        Encoding::Raw => Box::new(reader),
        Encoding::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(reader))),
    };
    let count = header.sample_count();
    let size = header.sample_type.size();
    let mut out = Vec::with_capacity(count);
    let mut chunk = vec![0u8; size * 16384];
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(16384);
        let buf = &mut chunk[..n * size];
        payload.read_exact(buf).map_err(|e| {
            MappingError::parse(
                display(path),
                format!("NRRD payload ended after {} of {} samples: {e}", count - remaining, count),
            )
        })?;
        for bytes in buf.chunks_exact(size) {
            let value = header.sample_type.decode(bytes, header.big_endian);
            let converted = convert(value).ok_or_else(|| {
                MappingError::parse(display(path), format!("sample value {value} is not representable"))
            })?;
            out.push(converted);
        }
        remaining -= n;
    }
    Ok(out)
}

/// Geometry of a scalar or vector NRRD without reading its payload.
pub fn read_geometry(path: &Path, frame: PhysicalFrame) -> Result<ImageGeometry> {
    let (header, _) = read_header(path)?;
    let vector = header.vector_axis();
    let domain: Vec<usize> = (0..header.sizes.len()).filter(|a| Some(*a) != vector).collect();
    header_geometry(path, &header, &domain, frame)
}

/// Read a 3-D integer label volume in its header frame.
pub fn read_label_volume(path: &Path) -> Result<LabelVolume> {
    let (header, reader) = read_header(path)?;
    if header.sizes.len() != 3 {
        return Err(MappingError::parse(
            display(path),
            format!("expected a 3-D label volume, found {} axes", header.sizes.len()),
        ));
    }
    let geometry = header_geometry(path, &header, &[0, 1, 2], PhysicalFrame::Header)?;
    let labels = read_samples(path, &header, reader, label_from_f64)?;
    debug!(path = %path.display(), shape = ?geometry.shape(), "read NRRD label volume");
    LabelVolume::new(geometry, labels)
}

/// Read a vector NRRD as a displacement field.
///
/// When `frame` is LPS and the file declares a RAS space, both the grid and
/// the vectors are converted.
pub fn read_displacement_field<B: Backend>(
    path: &Path,
    frame: PhysicalFrame,
    encodes: TransformDirection,
    device: &B::Device,
) -> Result<DisplacementField<B>> {
    let (header, reader) = read_header(path)?;
    let vector = header
        .vector_axis()
        .filter(|&a| header.sizes[a] == 3 && header.sizes.len() == 4)
        .ok_or_else(|| {
            MappingError::transform_application(format!(
                "{}: displacement field needs one 3-component vector axis and 3 spatial axes, sizes {:?}",
                path.display(),
                header.sizes
            ))
        })?;
    let domain: Vec<usize> = (0..4).filter(|&a| a != vector).collect();
    let geometry = header_geometry(path, &header, &domain, frame)?;
    let samples = read_samples(path, &header, reader, |v| Some(v as f32))?;

    let mut strides = [1usize; 4];
    for a in 1..4 {
        strides[a] = strides[a - 1] * header.sizes[a - 1];
    }
    let flip = frame == PhysicalFrame::Lps && header.is_ras();
    let [nx, ny, nz] = geometry.shape();
    let mut values = Vec::with_capacity(samples.len());
    for c in 0..3 {
        let sign = if flip && c < 2 { -1.0 } else { 1.0 };
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let offset = c * strides[vector]
                        + i * strides[domain[0]]
                        + j * strides[domain[1]]
                        + k * strides[domain[2]];
                    values.push(sign * samples[offset]);
                }
            }
        }
    }
    debug!(path = %path.display(), shape = ?geometry.shape(), vector_axis = vector, "read NRRD displacement field");
    DisplacementField::from_values(values, geometry, encodes, device)
}
