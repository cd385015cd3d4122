//! SWC morphology files.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use ccfmap_core::error::{MappingError, Result};
use ccfmap_core::morphology::{MorphologyTree, SwcNode};
use ccfmap_core::spatial::Point3;

use crate::display;

/// Raw contents of an SWC file.
#[derive(Debug, Clone, PartialEq)]
pub struct SwcFile {
    pub nodes: Vec<SwcNode>,
    /// Value of a `# OFFSET x y z` header line.
    pub offset: Option<[f64; 3]>,
}

fn parse_offset(rest: &str) -> Option<[f64; 3]> {
    let values: Vec<f64> = rest.split_whitespace().filter_map(|t| t.parse().ok()).collect();
    match values.as_slice() {
        [x, y, z, ..] => Some([*x, *y, *z]),
        _ => None,
    }
}

/// Integer field that may be written as `3` or `3.0`.
fn parse_int(token: &str) -> Option<i64> {
    token.parse::<i64>().ok().or_else(|| {
        let v = token.parse::<f64>().ok()?;
        (v.fract() == 0.0 && v.is_finite()).then_some(v as i64)
    })
}

/// Parse SWC text. `source` names the file in error messages.
pub fn parse_swc(text: &str, source: &str) -> Result<SwcFile> {
    let mut nodes = Vec::new();
    let mut offset = None;
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let comment = comment.trim_start();
            if comment.get(..6).is_some_and(|head| head.eq_ignore_ascii_case("OFFSET")) {
                offset = parse_offset(&comment[6..]).or(offset);
            }
            continue;
        }

        let err = |what: &str| MappingError::parse(source, format!("line {}: {what}", n + 1));
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(err(&format!("expected 7 fields, found {}", fields.len())));
        }
        let float = |i: usize| -> Result<f64> {
            let v = fields[i]
                .parse::<f64>()
                .map_err(|_| err(&format!("field {} '{}' is not a number", i + 1, fields[i])))?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(err(&format!("field {} '{}' is not finite", i + 1, fields[i])))
            }
        };
        let int = |i: usize| {
            parse_int(fields[i]).ok_or_else(|| err(&format!("field {} '{}' is not an integer", i + 1, fields[i])))
        };
        let node_type = i32::try_from(int(1)?)
            .map_err(|_| err(&format!("field 2 '{}' is out of range for a structure type", fields[1])))?;
        nodes.push(SwcNode::new(
            int(0)?,
            node_type,
            Point3::new([float(2)?, float(3)?, float(4)?]),
            float(5)?,
            int(6)?,
        ));
    }
    Ok(SwcFile { nodes, offset })
}

/// Read and validate an SWC file.
///
/// With `apply_offset`, a `# OFFSET` header is added to every coordinate.
pub fn read_swc(path: impl AsRef<Path>, apply_offset: bool) -> Result<MorphologyTree> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let file = parse_swc(&text, &display(path))?;
    let mut tree = MorphologyTree::from_nodes(file.nodes).map_err(|e| match e {
        MappingError::TopologyViolation(m) => MappingError::topology(format!("{}: {m}", path.display())),
        other => other,
    })?;
    if let (true, Some(offset)) = (apply_offset, file.offset) {
        tree.translate(offset);
    }
    Ok(tree)
}

/// Render a tree as SWC with `# ` header lines.
pub fn format_swc(tree: &MorphologyTree, header: &[String]) -> String {
    let mut out = String::new();
    for line in header {
        let _ = writeln!(out, "# {line}");
    }
    for n in tree.nodes() {
        let p = n.position;
        let _ = writeln!(
            out,
            "{} {} {:.6} {:.6} {:.6} {:.6} {}",
            n.id, n.node_type, p[0], p[1], p[2], n.radius, n.parent_id
        );
    }
    out
}

/// Write a tree as SWC, creating parent directories.
pub fn write_swc(path: impl AsRef<Path>, tree: &MorphologyTree, header: &[String]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format_swc(tree, header))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "# ORIGINAL_SOURCE tracer\n# OFFSET 100 200 300\n\
                          1 1 0 0 0 5.0 -1\n2 3 1.5 0 0 1 1\n3 3.0 3 0 0 1 2\n";

    #[test]
    fn test_parse_with_offset_header() {
        let file = parse_swc(SAMPLE, "sample.swc").unwrap();
        assert_eq!(file.offset, Some([100.0, 200.0, 300.0]));
        assert_eq!(file.nodes.len(), 3);
        assert_eq!(file.nodes[2].node_type, 3);
        assert_eq!(file.nodes[1].position, Point3::new([1.5, 0.0, 0.0]));
    }

    #[test]
    fn test_read_applies_offset_when_enabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cell.swc");
        fs::write(&path, SAMPLE).unwrap();
        let shifted = read_swc(&path, true).unwrap();
        assert_eq!(shifted.node(1).position, Point3::new([101.5, 200.0, 300.0]));
        let raw = read_swc(&path, false).unwrap();
        assert_eq!(raw.node(1).position, Point3::new([1.5, 0.0, 0.0]));
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let err = parse_swc("# header\n1 1 0 0 0 1 -1\n2 3 x 0 0 1 1\n", "bad.swc").unwrap_err();
        assert!(err.to_string().contains("line 3"));
        let err = parse_swc("1 1 0 0 0\n", "short.swc").unwrap_err();
        assert!(err.to_string().contains("expected 7 fields"));
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        for row in ["1 1 nan 0 0 1 -1", "1 1 0 inf 0 1 -1", "1 1 0 0 -inf 1 -1", "1 1 0 0 0 NaN -1"] {
            let err = parse_swc(&format!("# cell\n{row}\n"), "bad.swc").unwrap_err();
            assert!(matches!(err, MappingError::Parse { .. }), "{row}: {err:?}");
            assert!(err.to_string().contains("line 2"), "{err}");
            assert!(err.to_string().contains("not finite"), "{err}");
        }
    }

    #[test]
    fn test_out_of_range_type_is_rejected() {
        let err = parse_swc("1 4294967299 0 0 0 1 -1\n", "wide.swc").unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn test_two_roots_is_topology_violation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forest.swc");
        fs::write(&path, "1 1 0 0 0 1 -1\n2 1 0 0 0 1 -1\n").unwrap();
        assert!(matches!(read_swc(&path, true), Err(MappingError::TopologyViolation(_))));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/cell.swc");
        let tree = MorphologyTree::from_nodes(parse_swc(SAMPLE, "s").unwrap().nodes).unwrap();
        write_swc(&path, &tree, &["space: ccf".to_string()]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# space: ccf\n1 1 0.000000 0.000000 0.000000 5.000000 -1\n"));
        assert_eq!(read_swc(&path, true).unwrap(), tree);
    }
}
