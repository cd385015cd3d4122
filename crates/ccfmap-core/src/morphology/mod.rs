//! Neuron morphology trees and the operations that rewrite them.

pub mod tree;
pub mod resample;
pub mod types;

pub use tree::{MorphologyTree, SwcNode, ROOT_PARENT};
pub use resample::resample;
pub use types::{assign_structure_types, StructureType};
