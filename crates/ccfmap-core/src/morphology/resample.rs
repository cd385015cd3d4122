//! Uniform-spacing resampling of morphology trees.
//!
//! Root, branch points and leaves are kept exactly. Every path between them
//! is replaced by equal arc-length segments whose length is as close to the
//! target spacing as the path length allows.

use tracing::debug;

use super::tree::{MorphologyTree, SwcNode, ROOT_PARENT};
use crate::error::{MappingError, Result};

/// Resample `tree` to a target edge length.
///
/// Output ids run 1..N in depth-first order. Inserted nodes take the radius
/// interpolated along the path, the type of the original node ending their
/// edge, and the out-of-bounds flag of either bounding original node.
pub fn resample(tree: &MorphologyTree, spacing: f64) -> Result<MorphologyTree> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(MappingError::invalid_configuration(format!(
            "resampling spacing must be finite and positive, got {spacing}"
        )));
    }

    let mut out = Output::default();
    let root = tree.root();
    out.push_original(tree, root, None);

    // (path start, output index of the start, first node on the path)
    let mut stack: Vec<(usize, usize, usize)> = tree
        .children(root)
        .iter()
        .rev()
        .map(|&c| (root, 0, c))
        .collect();

    while let Some((start, start_out, first)) = stack.pop() {
        let mut path = vec![start, first];
        let mut end = first;
        while !tree.is_topological_point(end) {
            end = tree.children(end)[0];
            path.push(end);
        }

        let end_out = emit_path(tree, &path, start_out, spacing, &mut out);
        stack.extend(tree.children(end).iter().rev().map(|&c| (end, end_out, c)));
    }

    debug!(
        input_nodes = tree.len(),
        output_nodes = out.nodes.len(),
        spacing,
        "resampled morphology"
    );
    Ok(MorphologyTree::from_parts(out.nodes, out.parents, out.out_of_bounds))
}

#[derive(Default)]
struct Output {
    nodes: Vec<SwcNode>,
    parents: Vec<Option<usize>>,
    out_of_bounds: Vec<bool>,
}

impl Output {
    fn push(&mut self, mut node: SwcNode, parent: Option<usize>, out_of_bounds: bool) -> usize {
        let index = self.nodes.len();
        node.id = index as i64 + 1;
        node.parent_id = parent.map_or(ROOT_PARENT, |p| p as i64 + 1);
        self.nodes.push(node);
        self.parents.push(parent);
        self.out_of_bounds.push(out_of_bounds);
        index
    }

    fn push_original(&mut self, tree: &MorphologyTree, index: usize, parent: Option<usize>) -> usize {
        self.push(tree.node(index).clone(), parent, tree.out_of_bounds(index))
    }
}

/// Emit the nodes after `path[0]` and return the output index of the path's
/// last node.
fn emit_path(tree: &MorphologyTree, path: &[usize], start_out: usize, spacing: f64, out: &mut Output) -> usize {
    let mut cumulative = Vec::with_capacity(path.len());
    cumulative.push(0.0);
    for pair in path.windows(2) {
        let d = tree.node(pair[0]).position.distance(&tree.node(pair[1]).position);
        cumulative.push(cumulative[cumulative.len() - 1] + d);
    }
    let length = cumulative[cumulative.len() - 1];
    let segments = ((length / spacing).round() as usize).max(1);

    let mut parent = start_out;
    let mut edge = 1;
    for s in 1..segments {
        let target = length * s as f64 / segments as f64;
        while edge < path.len() - 1 && cumulative[edge] < target {
            edge += 1;
        }
        let (a, b) = (path[edge - 1], path[edge]);
        let span = cumulative[edge] - cumulative[edge - 1];
        let t = if span > 0.0 {
            ((target - cumulative[edge - 1]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (na, nb) = (tree.node(a), tree.node(b));
        let node = SwcNode::new(
            0,
            nb.node_type,
            na.position.lerp(&nb.position, t),
            na.radius + (nb.radius - na.radius) * t,
            0,
        );
        let flag = tree.out_of_bounds(a) || tree.out_of_bounds(b);
        parent = out.push(node, Some(parent), flag);
    }

    out.push_original(tree, path[path.len() - 1], Some(parent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Point3;
    use crate::transform::MappedPoints;

    fn node(id: i64, p: [f64; 3], r: f64, parent: i64) -> SwcNode {
        SwcNode::new(id, 3, Point3::new(p), r, parent)
    }

    fn line(n: usize, step: f64) -> MorphologyTree {
        let nodes = (0..n)
            .map(|i| node(i as i64 + 1, [i as f64 * step, 0.0, 0.0], 1.0, if i == 0 { -1 } else { i as i64 }))
            .collect();
        MorphologyTree::from_nodes(nodes).unwrap()
    }

    #[test]
    fn test_rejects_bad_spacing() {
        let t = line(3, 1.0);
        for s in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(resample(&t, s), Err(MappingError::InvalidConfiguration(_))));
        }
    }

    #[test]
    fn test_upsamples_straight_line() {
        // 0..8 in 4 edges of 2, resampled to 1
        let out = resample(&line(5, 2.0), 1.0).unwrap();
        assert_eq!(out.len(), 9);
        for (i, n) in out.nodes().iter().enumerate() {
            assert_eq!(n.id, i as i64 + 1);
            assert!((n.position[0] - i as f64).abs() < 1e-12);
        }
        assert_eq!(out.node(0).parent_id, -1);
        assert_eq!(out.node(8).parent_id, 8);
    }

    #[test]
    fn test_downsamples_and_keeps_endpoints() {
        let out = resample(&line(11, 1.0), 5.0).unwrap();
        let xs: Vec<f64> = out.nodes().iter().map(|n| n.position[0]).collect();
        assert_eq!(xs, vec![0.0, 5.0, 10.0]);
    }

    #[test]
    fn test_short_path_keeps_only_endpoints() {
        let out = resample(&line(3, 0.1), 5.0).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.node(1).position, Point3::new([0.2, 0.0, 0.0]));
    }

    #[test]
    fn test_radius_interpolated_and_type_from_edge_child() {
        let mut end = node(2, [4.0, 0.0, 0.0], 3.0, 1);
        end.node_type = 2;
        let t = MorphologyTree::from_nodes(vec![node(1, [0.0, 0.0, 0.0], 1.0, -1), end]).unwrap();
        let out = resample(&t, 1.0).unwrap();
        assert_eq!(out.len(), 5);
        assert!((out.node(2).radius - 2.0).abs() < 1e-12);
        assert_eq!(out.node(2).node_type, 2);
        assert_eq!(out.node(0).node_type, 3);
    }

    #[test]
    fn test_preserves_leaves_and_branches() {
        let t = MorphologyTree::from_nodes(vec![
            node(1, [0.0, 0.0, 0.0], 1.0, -1),
            node(2, [3.0, 0.0, 0.0], 1.0, 1),
            node(3, [3.0, 4.0, 0.0], 1.0, 2),
            node(4, [6.0, 0.0, 0.0], 1.0, 2),
            node(5, [-3.0, 0.0, 0.0], 1.0, 1),
        ])
        .unwrap();
        let out = resample(&t, 0.7).unwrap();
        assert_eq!(out.leaves().len(), t.leaves().len());
        assert_eq!(out.branch_points().len(), t.branch_points().len());
        for original in [1usize, 2, 3, 4] {
            let p = t.node(original).position;
            assert!(out.nodes().iter().any(|n| n.position == p));
        }
        for (i, n) in out.nodes().iter().enumerate().skip(1) {
            assert!(out.parent(i).unwrap() < i);
            assert_eq!(n.parent_id, out.parent(i).unwrap() as i64 + 1);
        }
    }

    #[test]
    fn test_inserted_nodes_inherit_out_of_bounds() {
        let mut t = line(3, 4.0);
        t.apply_mapped(MappedPoints {
            points: t.positions(),
            in_bounds: vec![true, false, true],
        })
        .unwrap();
        let out = resample(&t, 1.0).unwrap();
        let flags = out.out_of_bounds_flags();
        assert_eq!(flags.len(), 9);
        assert!(!flags[0]);
        assert!(flags[1..=7].iter().all(|f| *f));
        assert!(!flags[8]);
    }
}
