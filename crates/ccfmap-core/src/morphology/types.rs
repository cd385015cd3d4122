//! SWC structure types and soma/axon/dendrite assignment.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::MorphologyTree;

/// Standard SWC structure identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureType {
    Undefined,
    Soma,
    Axon,
    BasalDendrite,
    ApicalDendrite,
}

impl StructureType {
    pub fn code(self) -> i32 {
        match self {
            Self::Undefined => 0,
            Self::Soma => 1,
            Self::Axon => 2,
            Self::BasalDendrite => 3,
            Self::ApicalDendrite => 4,
        }
    }
}

/// Mark the root as soma, the root child subtree with the deepest path (in
/// nodes) as axon and every other root child subtree as basal dendrite.
///
/// Ties go to the earlier child.
pub fn assign_structure_types(tree: &mut MorphologyTree) {
    let root = tree.root();
    tree.set_node_type(root, StructureType::Soma.code());

    // Parents precede children, so a reverse sweep sees children first.
    let mut depth = vec![1usize; tree.len()];
    for i in (0..tree.len()).rev() {
        if let Some(p) = tree.parent(i) {
            depth[p] = depth[p].max(depth[i] + 1);
        }
    }

    let root_children = tree.children(root).to_vec();
    let Some(axon) = root_children
        .iter()
        .copied()
        .fold(None, |best: Option<usize>, c| match best {
            Some(b) if depth[b] >= depth[c] => Some(b),
            _ => Some(c),
        })
    else {
        return;
    };

    for child in root_children {
        let kind = if child == axon {
            StructureType::Axon
        } else {
            StructureType::BasalDendrite
        };
        for i in tree.subtree(child) {
            tree.set_node_type(i, kind.code());
        }
    }
    debug!(axon_depth = depth[axon], "assigned structure types");
}
