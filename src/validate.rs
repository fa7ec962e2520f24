use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::graph::{DomainGraph, ROOT_ID};

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:\-]*$").unwrap());

/// A single structural problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    RootId(String),
    MalformedNode { id: String, reason: String },
    MalformedEdge { id: String, reason: String },
    LeafWithChildren(String),
    /// A node id seen twice; in a tree this is also how a containment cycle shows up.
    DuplicateNodeId(String),
    DuplicateEdgeId(String),
    DanglingEdge { edge: String, endpoint: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::RootId(id) => write!(f, "root must have id \"{ROOT_ID}\", found \"{id}\""),
            ValidationIssue::MalformedNode { id, reason } => write!(f, "node \"{id}\": {reason}"),
            ValidationIssue::MalformedEdge { id, reason } => write!(f, "edge \"{id}\": {reason}"),
            ValidationIssue::LeafWithChildren(id) => {
                write!(f, "node \"{id}\" has children but is not a group")
            }
            ValidationIssue::DuplicateNodeId(id) => write!(f, "duplicate node id \"{id}\""),
            ValidationIssue::DuplicateEdgeId(id) => write!(f, "duplicate edge id \"{id}\""),
            ValidationIssue::DanglingEdge { edge, endpoint } => {
                write!(f, "edge \"{edge}\" references missing node \"{endpoint}\"")
            }
        }
    }
}

pub fn is_valid_id(id: &str) -> bool {
    ID_RE.is_match(id)
}

/// Collects every issue instead of stopping at the first one.
pub fn issues(graph: &DomainGraph) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    if graph.root.id != ROOT_ID {
        out.push(ValidationIssue::RootId(graph.root.id.clone()));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for entry in graph.walk() {
        let node = entry.node;
        if !seen.insert(node.id.as_str()) {
            out.push(ValidationIssue::DuplicateNodeId(node.id.clone()));
            continue;
        }
        if entry.parent.is_none() {
            continue;
        }
        if node.id == ROOT_ID {
            out.push(ValidationIssue::MalformedNode {
                id: node.id.clone(),
                reason: "only the top-level node may use the root id".to_string(),
            });
        } else if !is_valid_id(&node.id) {
            let reason = if node.id.is_empty() {
                "empty id"
            } else {
                "id contains characters outside [A-Za-z0-9_.:-]"
            };
            out.push(ValidationIssue::MalformedNode {
                id: node.id.clone(),
                reason: reason.to_string(),
            });
        }
        if !node.is_group && !node.children.is_empty() {
            out.push(ValidationIssue::LeafWithChildren(node.id.clone()));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    for edge in &graph.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            out.push(ValidationIssue::DuplicateEdgeId(edge.id.clone()));
        }
        if !is_valid_id(&edge.id) {
            out.push(ValidationIssue::MalformedEdge {
                id: edge.id.clone(),
                reason: "edge id is empty or malformed".to_string(),
            });
        }
        for endpoint in [&edge.source_id, &edge.target_id] {
            if endpoint == ROOT_ID || !seen.contains(endpoint.as_str()) {
                out.push(ValidationIssue::DanglingEdge {
                    edge: edge.id.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
    }
    out
}

pub fn validate(graph: &DomainGraph) -> Result<()> {
    let found = issues(graph);
    if found.is_empty() {
        Ok(())
    } else {
        Err(Error::GraphValidationFailed(found))
    }
}
