//! Rooted morphology tree built from SWC records.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};
use crate::spatial::Point3;
use crate::transform::MappedPoints;

/// Parent id marking the root record.
pub const ROOT_PARENT: i64 = -1;

/// One SWC record: `id type x y z radius parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwcNode {
    pub id: i64,
    pub node_type: i32,
    pub position: Point3,
    pub radius: f64,
    pub parent_id: i64,
}

impl SwcNode {
    pub fn new(id: i64, node_type: i32, position: Point3, radius: f64, parent_id: i64) -> Self {
        Self {
            id,
            node_type,
            position,
            radius,
            parent_id,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id < 0
    }
}

/// Validated single-rooted tree of SWC nodes.
///
/// Nodes are stored parent before child. Each node carries an out-of-bounds
/// flag set when a transform stage saw it outside a displacement grid.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphologyTree {
    nodes: Vec<SwcNode>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    out_of_bounds: Vec<bool>,
}

impl MorphologyTree {
    /// Validate records and build the tree.
    ///
    /// Rejects empty input, duplicate ids, zero or several roots, dangling
    /// parents and cycles. Input already ordered parent-before-child keeps
    /// its order; anything else is stored in depth-first order.
    pub fn from_nodes(nodes: Vec<SwcNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(MappingError::topology("morphology has no nodes"));
        }
        if let Some(n) = nodes.iter().find(|n| !n.position.is_finite() || !n.radius.is_finite()) {
            return Err(MappingError::topology(format!(
                "node {} has a non-finite position or radius",
                n.id
            )));
        }

        let mut by_id = HashMap::with_capacity(nodes.len());
        for (i, n) in nodes.iter().enumerate() {
            if by_id.insert(n.id, i).is_some() {
                return Err(MappingError::topology(format!("duplicate node id {}", n.id)));
            }
        }

        let roots: Vec<i64> = nodes.iter().filter(|n| n.is_root()).map(|n| n.id).collect();
        match roots.len() {
            1 => {}
            0 => return Err(MappingError::topology("morphology has no root node")),
            _ => {
                return Err(MappingError::topology(format!(
                    "morphology has {} root nodes: {:?}",
                    roots.len(),
                    roots
                )))
            }
        }

        let mut parents = Vec::with_capacity(nodes.len());
        for n in &nodes {
            if n.is_root() {
                parents.push(None);
                continue;
            }
            let p = by_id.get(&n.parent_id).ok_or_else(|| {
                MappingError::topology(format!("node {} references missing parent {}", n.id, n.parent_id))
            })?;
            parents.push(Some(*p));
        }

        let ordered = parents
            .iter()
            .enumerate()
            .all(|(i, p)| p.map_or(true, |p| p < i));
        if ordered {
            return Ok(Self::from_ordered(nodes, parents));
        }

        // Depth-first from the root; anything not reached sits on a cycle.
        let mut children = vec![Vec::new(); nodes.len()];
        let mut root = 0;
        for (i, p) in parents.iter().enumerate() {
            match p {
                Some(p) => children[*p].push(i),
                None => root = i,
            }
        }
        let mut order = Vec::with_capacity(nodes.len());
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(children[i].iter().rev());
        }
        if order.len() != nodes.len() {
            let reached: HashSet<usize> = order.iter().copied().collect();
            let cyclic: Vec<i64> = (0..nodes.len())
                .filter(|i| !reached.contains(i))
                .map(|i| nodes[i].id)
                .collect();
            return Err(MappingError::topology(format!(
                "nodes {cyclic:?} form a cycle detached from the root"
            )));
        }

        let mut new_index = vec![0usize; nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        let reordered_parents = order.iter().map(|&old| parents[old].map(|p| new_index[p])).collect();
        let mut slots: Vec<Option<SwcNode>> = nodes.into_iter().map(Some).collect();
        let reordered = order.iter().filter_map(|&old| slots[old].take()).collect();
        Ok(Self::from_ordered(reordered, reordered_parents))
    }

    fn from_ordered(nodes: Vec<SwcNode>, parents: Vec<Option<usize>>) -> Self {
        let mut children = vec![Vec::new(); nodes.len()];
        for (i, p) in parents.iter().enumerate() {
            if let Some(p) = p {
                children[*p].push(i);
            }
        }
        let out_of_bounds = vec![false; nodes.len()];
        Self {
            nodes,
            parents,
            children,
            out_of_bounds,
        }
    }

    /// Build from nodes already in parent-before-child order, with flags.
    pub(crate) fn from_parts(nodes: Vec<SwcNode>, parents: Vec<Option<usize>>, out_of_bounds: Vec<bool>) -> Self {
        let mut tree = Self::from_ordered(nodes, parents);
        tree.out_of_bounds = out_of_bounds;
        tree
    }

    pub fn nodes(&self) -> &[SwcNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &SwcNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the root; always 0 since parents precede children.
    pub fn root(&self) -> usize {
        0
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parents[index]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// Nodes without children.
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.children[i].is_empty()).collect()
    }

    /// Nodes with more than one child.
    pub fn branch_points(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.children[i].len() > 1).collect()
    }

    /// Root, branch points and leaves.
    pub fn is_topological_point(&self, index: usize) -> bool {
        index == self.root() || self.children[index].len() != 1
    }

    /// Length of the edge from each non-root node to its parent.
    pub fn edge_lengths(&self) -> Vec<f64> {
        (0..self.len())
            .filter_map(|i| {
                self.parents[i].map(|p| self.nodes[i].position.distance(&self.nodes[p].position))
            })
            .collect()
    }

    /// Mean edge length, `None` for a single-node tree.
    pub fn mean_edge_length(&self) -> Option<f64> {
        let lengths = self.edge_lengths();
        if lengths.is_empty() {
            None
        } else {
            Some(lengths.iter().sum::<f64>() / lengths.len() as f64)
        }
    }

    pub fn positions(&self) -> Vec<Point3> {
        self.nodes.iter().map(|n| n.position).collect()
    }

    /// Replace every coordinate with transform output, OR-ing in the
    /// out-of-bounds flags. Topology is untouched.
    pub fn apply_mapped(&mut self, mapped: MappedPoints) -> Result<()> {
        if mapped.points.len() != self.len() || mapped.in_bounds.len() != self.len() {
            return Err(MappingError::transform_application(format!(
                "transform produced {} points for {} nodes",
                mapped.points.len(),
                self.len()
            )));
        }
        for (node, p) in self.nodes.iter_mut().zip(mapped.points) {
            node.position = p;
        }
        for (flag, inside) in self.out_of_bounds.iter_mut().zip(mapped.in_bounds) {
            *flag |= !inside;
        }
        Ok(())
    }

    /// Shift every coordinate by a constant vector.
    pub fn translate(&mut self, offset: [f64; 3]) {
        for n in &mut self.nodes {
            for (i, o) in offset.iter().enumerate() {
                n.position[i] += o;
            }
        }
    }

    pub fn out_of_bounds(&self, index: usize) -> bool {
        self.out_of_bounds[index]
    }

    pub fn out_of_bounds_flags(&self) -> &[bool] {
        &self.out_of_bounds
    }

    pub fn out_of_bounds_count(&self) -> usize {
        self.out_of_bounds.iter().filter(|f| **f).count()
    }

    pub fn set_node_type(&mut self, index: usize, node_type: i32) {
        self.nodes[index].node_type = node_type;
    }

    /// Indices of `start` and all its descendants.
    pub fn subtree(&self, start: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.children[i].iter().rev());
        }
        out
    }
}
