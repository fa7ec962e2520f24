use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::graph::{DomainGraph, DomainNode};

/// Hex SHA-256 digest of a graph's shape.
///
/// Doubles as the request token for layout runs: a completion is accepted
/// only if it carries the latest hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralHash(String);

impl StructuralHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Every field is length-prefixed so ("ab","c") and ("a","bc") never collide.
fn put_str(hasher: &mut Sha256, tag: u8, value: &str) {
    hasher.update([tag]);
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn put_opt(hasher: &mut Sha256, tag: u8, value: Option<&str>) {
    match value {
        Some(value) => put_str(hasher, tag, value),
        None => hasher.update([tag, 0xff]),
    }
}

fn put_node(hasher: &mut Sha256, node: &DomainNode) {
    put_str(hasher, b'n', &node.id);
    put_str(hasher, b'l', &node.label);
    hasher.update([u8::from(node.is_group)]);
    hasher.update((node.children.len() as u64).to_le_bytes());
    for child in &node.children {
        put_node(hasher, child);
    }
}

pub fn structural_hash(graph: &DomainGraph) -> StructuralHash {
    let mut hasher = Sha256::new();
    put_node(&mut hasher, &graph.root);
    hasher.update((graph.edges.len() as u64).to_le_bytes());
    for edge in &graph.edges {
        put_str(&mut hasher, b'e', &edge.id);
        put_str(&mut hasher, b's', &edge.source_id);
        put_str(&mut hasher, b't', &edge.target_id);
        put_opt(&mut hasher, b'S', edge.source_handle.as_deref());
        put_opt(&mut hasher, b'T', edge.target_handle.as_deref());
        put_opt(&mut hasher, b'L', edge.label.as_deref());
    }
    StructuralHash(hex::encode(hasher.finalize()))
}
