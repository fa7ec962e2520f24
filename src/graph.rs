use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::view_state::GeometryKind;

pub const ROOT_ID: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainNode {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub children: Vec<DomainNode>,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainGraph {
    pub root: DomainNode,
    #[serde(default)]
    pub edges: Vec<DomainEdge>,
}

/// A node visited during a depth-first walk, with its containing scope.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub node: &'a DomainNode,
    pub parent: Option<&'a str>,
    pub depth: usize,
}

impl DomainNode {
    pub fn leaf(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            children: Vec::new(),
            is_group: false,
        }
    }

    pub fn group(id: &str, label: &str, children: Vec<DomainNode>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            children,
            is_group: true,
        }
    }

    pub fn is_container(&self) -> bool {
        self.id == ROOT_ID || self.is_group
    }

    pub(crate) fn find(&self, id: &str) -> Option<&DomainNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut DomainNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    fn collect_ids(&self, out: &mut Vec<String>) {
        out.push(self.id.clone());
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

impl DomainEdge {
    pub fn new(id: &str, source_id: &str, target_id: &str) -> Self {
        Self {
            id: id.to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            source_handle: None,
            target_handle: None,
            label: None,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }
}

impl DomainGraph {
    pub fn new() -> Self {
        Self {
            root: DomainNode::group(ROOT_ID, "", Vec::new()),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&DomainNode> {
        self.root.find(id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut DomainNode> {
        self.root.find_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn edge(&self, id: &str) -> Option<&DomainEdge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    /// Depth-first pre-order walk; the root comes first with depth 0.
    pub fn walk(&self) -> Vec<NodeRef<'_>> {
        let mut out = Vec::new();
        let mut stack: Vec<(&DomainNode, Option<&str>, usize)> = vec![(&self.root, None, 0)];
        while let Some((node, parent, depth)) = stack.pop() {
            out.push(NodeRef {
                node,
                parent,
                depth,
            });
            for child in node.children.iter().rev() {
                stack.push((child, Some(node.id.as_str()), depth + 1));
            }
        }
        out
    }

    /// Map of every non-root node id to its parent id.
    pub fn parents(&self) -> HashMap<&str, &str> {
        self.walk()
            .into_iter()
            .filter_map(|entry| entry.parent.map(|parent| (entry.node.id.as_str(), parent)))
            .collect()
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.walk()
            .into_iter()
            .find(|entry| entry.node.id == id)
            .and_then(|entry| entry.parent)
    }

    /// Ancestors of `id`, nearest first, ending with the root.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let parents = self.parents();
        let mut out = Vec::new();
        let mut current = id;
        while let Some(&parent) = parents.get(current) {
            out.push(parent.to_string());
            current = parent;
        }
        out
    }

    /// `id` and every node below it.
    pub fn subtree_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(node) = self.node(id) {
            node.collect_ids(&mut out);
        }
        out
    }

    pub fn is_descendant(&self, id: &str, ancestor: &str) -> bool {
        self.ancestors(id).iter().any(|candidate| candidate == ancestor)
    }

    pub fn node_ids(&self) -> HashSet<String> {
        let mut out = Vec::new();
        self.root.collect_ids(&mut out);
        out.into_iter().collect()
    }

    /// Namespace a node's geometry lives in; `None` for the root.
    pub fn geometry_kind(&self, id: &str) -> Option<GeometryKind> {
        if id == ROOT_ID {
            return None;
        }
        self.node(id).map(|node| {
            if node.is_group {
                GeometryKind::Group
            } else {
                GeometryKind::Node
            }
        })
    }
}

impl Default for DomainGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomainGraph {
        let mut graph = DomainGraph::new();
        graph.root.children.push(DomainNode::group(
            "G",
            "Group",
            vec![DomainNode::leaf("A", "Alpha"), DomainNode::leaf("B", "Beta")],
        ));
        graph.root.children.push(DomainNode::leaf("C", "Gamma"));
        graph.edges.push(DomainEdge::new("e1", "A", "C"));
        graph
    }

    #[test]
    fn walk_is_preorder_with_depths() {
        let graph = sample();
        let order: Vec<(&str, usize)> = graph
            .walk()
            .iter()
            .map(|entry| (entry.node.id.as_str(), entry.depth))
            .collect();
        assert_eq!(
            order,
            vec![("root", 0), ("G", 1), ("A", 2), ("B", 2), ("C", 1)]
        );
    }

    #[test]
    fn ancestors_end_at_root() {
        let graph = sample();
        assert_eq!(graph.ancestors("A"), vec!["G".to_string(), "root".to_string()]);
        assert!(graph.ancestors("root").is_empty());
        assert!(graph.is_descendant("B", "G"));
        assert!(!graph.is_descendant("C", "G"));
    }

    #[test]
    fn geometry_kind_follows_group_flag() {
        let graph = sample();
        assert_eq!(graph.geometry_kind("G"), Some(GeometryKind::Group));
        assert_eq!(graph.geometry_kind("A"), Some(GeometryKind::Node));
        assert_eq!(graph.geometry_kind("root"), None);
        assert_eq!(graph.geometry_kind("missing"), None);
    }

    #[test]
    fn subtree_ids_include_self() {
        let graph = sample();
        assert_eq!(graph.subtree_ids("G"), vec!["G", "A", "B"]);
    }
}
