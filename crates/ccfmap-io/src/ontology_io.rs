//! Allen structure ontology JSON.

use std::fs;
use std::path::Path;

use ccfmap_core::annotation::{Ontology, OntologyEntry};
use ccfmap_core::error::{MappingError, Result};
use serde_json::Value;

use crate::display;

fn entry(path: &Path, v: &Value, parent_id: Option<u32>, out: &mut Vec<OntologyEntry>) -> Result<()> {
    let id = v
        .get("id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| MappingError::parse(display(path), "ontology record without a valid 'id'"))?;
    let text = |key: &str| v.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let parent = v
        .get("parent_structure_id")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok())
        .or(parent_id);
    out.push(OntologyEntry {
        id,
        acronym: text("acronym"),
        name: text("name"),
        parent_id: parent,
    });
    if let Some(children) = v.get("children").and_then(Value::as_array) {
        for child in children {
            entry(path, child, Some(id), out)?;
        }
    }
    Ok(())
}

/// Read the structure graph (`{"msg": [...]}` with nested `children`) or a
/// flat array of `{id, acronym, name}` records.
pub fn read_ontology(path: impl AsRef<Path>) -> Result<Ontology> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| MappingError::parse(display(path), format!("invalid JSON: {e}")))?;
    let roots = value
        .get("msg")
        .unwrap_or(&value)
        .as_array()
        .ok_or_else(|| MappingError::parse(display(path), "ontology must be an array or have a 'msg' array"))?;

    let mut entries = Vec::new();
    for root in roots {
        entry(path, root, None, &mut entries)?;
    }
    Ok(Ontology::new(entries))
}
