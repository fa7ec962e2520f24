//! Pure graph edits.
//!
//! Every operation takes the current graph by reference and returns a new one;
//! on error the caller's graph is untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::graph::{DomainEdge, DomainGraph, DomainNode, ROOT_ID};
use crate::validate::{ValidationIssue, is_valid_id, validate};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub is_group: bool,
}

impl NodeData {
    pub fn leaf(label: &str) -> Self {
        Self {
            label: label.to_string(),
            is_group: false,
        }
    }

    pub fn group(label: &str) -> Self {
        Self {
            label: label.to_string(),
            is_group: true,
        }
    }
}

/// A single edit in wire form, e.g. `{"op": "addNode", "parentId": "root", "nodeId": "A"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Operation {
    AddNode {
        parent_id: String,
        node_id: String,
        #[serde(default)]
        label: String,
        #[serde(default)]
        is_group: bool,
    },
    DeleteNode {
        node_id: String,
    },
    MoveNode {
        node_id: String,
        new_parent_id: String,
    },
    AddEdge {
        edge_id: String,
        source_id: String,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_handle: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_handle: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    DeleteEdge {
        edge_id: String,
    },
    GroupNodes {
        node_ids: Vec<String>,
        group_id: String,
        #[serde(default = "default_parent")]
        parent_id: String,
        #[serde(default)]
        label: Option<String>,
    },
    RemoveGroup {
        group_id: String,
    },
    RelabelNode {
        node_id: String,
        label: String,
    },
}

fn default_parent() -> String {
    ROOT_ID.to_string()
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddNode { .. } => "addNode",
            Operation::DeleteNode { .. } => "deleteNode",
            Operation::MoveNode { .. } => "moveNode",
            Operation::AddEdge { .. } => "addEdge",
            Operation::DeleteEdge { .. } => "deleteEdge",
            Operation::GroupNodes { .. } => "groupNodes",
            Operation::RemoveGroup { .. } => "removeGroup",
            Operation::RelabelNode { .. } => "relabelNode",
        }
    }
}

pub fn apply(graph: &DomainGraph, op: &Operation) -> Result<DomainGraph> {
    match op {
        Operation::AddNode {
            parent_id,
            node_id,
            label,
            is_group,
        } => add_node(
            graph,
            parent_id,
            node_id,
            NodeData {
                label: label.clone(),
                is_group: *is_group,
            },
        ),
        Operation::DeleteNode { node_id } => delete_node(graph, node_id),
        Operation::MoveNode {
            node_id,
            new_parent_id,
        } => move_node(graph, node_id, new_parent_id),
        Operation::AddEdge {
            edge_id,
            source_id,
            target_id,
            source_handle,
            target_handle,
            label,
        } => add_edge_with(
            graph,
            DomainEdge {
                id: edge_id.clone(),
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                source_handle: source_handle.clone(),
                target_handle: target_handle.clone(),
                label: label.clone(),
            },
        ),
        Operation::DeleteEdge { edge_id } => delete_edge(graph, edge_id),
        Operation::GroupNodes {
            node_ids,
            group_id,
            parent_id,
            label,
        } => {
            let mut next = group_nodes(graph, node_ids.as_slice(), group_id, parent_id)?;
            if let Some(label) = label
                && let Some(group) = next.node_mut(group_id)
            {
                group.label = label.clone();
            }
            Ok(next)
        }
        Operation::RemoveGroup { group_id } => remove_group(graph, group_id),
        Operation::RelabelNode { node_id, label } => relabel_node(graph, node_id, label),
    }
}

/// Applies all operations or none; the first failure is returned.
pub fn batch_update(graph: &DomainGraph, operations: &[Operation]) -> Result<DomainGraph> {
    let mut next = graph.clone();
    for op in operations {
        next = apply(&next, op)?;
    }
    Ok(next)
}

fn check_new_node_id(graph: &DomainGraph, id: &str) -> Result<()> {
    if !is_valid_id(id) || id == ROOT_ID {
        return Err(Error::GraphValidationFailed(vec![ValidationIssue::MalformedNode {
            id: id.to_string(),
            reason: "not a usable node id".to_string(),
        }]));
    }
    if graph.contains(id) {
        return Err(Error::DuplicateId(id.to_string()));
    }
    Ok(())
}

fn container<'a>(graph: &'a DomainGraph, parent_id: &str) -> Result<&'a DomainNode> {
    match graph.node(parent_id) {
        Some(parent) if parent.is_container() => Ok(parent),
        Some(_) => Err(Error::InvalidParent(format!("{parent_id} is not a group"))),
        None => Err(Error::InvalidParent(format!("{parent_id} does not exist"))),
    }
}

/// Removes `id` from wherever it sits; returns the node and its former index.
fn detach(node: &mut DomainNode, id: &str) -> Option<(DomainNode, usize)> {
    if let Some(index) = node.children.iter().position(|child| child.id == id) {
        return Some((node.children.remove(index), index));
    }
    node.children.iter_mut().find_map(|child| detach(child, id))
}

fn children_of<'a>(graph: &'a mut DomainGraph, parent_id: &str) -> Result<&'a mut Vec<DomainNode>> {
    graph
        .node_mut(parent_id)
        .map(|parent| &mut parent.children)
        .ok_or_else(|| Error::InvalidParent(format!("{parent_id} does not exist")))
}

pub fn add_node(graph: &DomainGraph, parent_id: &str, node_id: &str, data: NodeData) -> Result<DomainGraph> {
    container(graph, parent_id)?;
    check_new_node_id(graph, node_id)?;
    let mut next = graph.clone();
    let node = DomainNode {
        id: node_id.to_string(),
        label: data.label,
        children: Vec::new(),
        is_group: data.is_group,
    };
    children_of(&mut next, parent_id)?.push(node);
    Ok(next)
}

/// Removes the node, its descendants, and every edge touching any of them.
pub fn delete_node(graph: &DomainGraph, node_id: &str) -> Result<DomainGraph> {
    if node_id == ROOT_ID {
        return Err(Error::RootImmutable("deleted"));
    }
    if !graph.contains(node_id) {
        return Err(Error::UnknownNode(node_id.to_string()));
    }
    let removed: HashSet<String> = graph.subtree_ids(node_id).into_iter().collect();
    let mut next = graph.clone();
    detach(&mut next.root, node_id);
    next.edges
        .retain(|edge| !removed.contains(&edge.source_id) && !removed.contains(&edge.target_id));
    Ok(next)
}

pub fn move_node(graph: &DomainGraph, node_id: &str, new_parent_id: &str) -> Result<DomainGraph> {
    if node_id == ROOT_ID {
        return Err(Error::RootImmutable("moved"));
    }
    if !graph.contains(node_id) {
        return Err(Error::UnknownNode(node_id.to_string()));
    }
    if new_parent_id == node_id || graph.is_descendant(new_parent_id, node_id) {
        return Err(Error::CyclicReparent {
            node: node_id.to_string(),
            parent: new_parent_id.to_string(),
        });
    }
    container(graph, new_parent_id)?;
    if graph.parent_of(node_id) == Some(new_parent_id) {
        return Ok(graph.clone());
    }
    let mut next = graph.clone();
    let (node, _) = detach(&mut next.root, node_id).ok_or_else(|| Error::UnknownNode(node_id.to_string()))?;
    children_of(&mut next, new_parent_id)?.push(node);
    Ok(next)
}

pub fn add_edge(graph: &DomainGraph, edge_id: &str, source_id: &str, target_id: &str) -> Result<DomainGraph> {
    add_edge_with(graph, DomainEdge::new(edge_id, source_id, target_id))
}

pub fn add_edge_with(graph: &DomainGraph, edge: DomainEdge) -> Result<DomainGraph> {
    if graph.edge(&edge.id).is_some() {
        return Err(Error::DuplicateId(edge.id));
    }
    if !is_valid_id(&edge.id) {
        return Err(Error::GraphValidationFailed(vec![ValidationIssue::MalformedEdge {
            id: edge.id,
            reason: "not a usable edge id".to_string(),
        }]));
    }
    for endpoint in [&edge.source_id, &edge.target_id] {
        if endpoint == ROOT_ID || !graph.contains(endpoint) {
            return Err(Error::UnknownEndpoint {
                edge: edge.id.clone(),
                endpoint: endpoint.clone(),
            });
        }
    }
    let mut next = graph.clone();
    next.edges.push(edge);
    Ok(next)
}

pub fn delete_edge(graph: &DomainGraph, edge_id: &str) -> Result<DomainGraph> {
    if graph.edge(edge_id).is_none() {
        return Err(Error::UnknownEdge(edge_id.to_string()));
    }
    let mut next = graph.clone();
    next.edges.retain(|edge| edge.id != edge_id);
    Ok(next)
}

/// Wraps the listed nodes in a new group under `parent_id`.
///
/// Listed nodes nested inside another listed node travel with it. The group
/// takes the slot of the first listed node when that node is a direct child of
/// `parent_id`; otherwise it is appended.
pub fn group_nodes<S: AsRef<str>>(
    graph: &DomainGraph,
    node_ids: &[S],
    group_id: &str,
    parent_id: &str,
) -> Result<DomainGraph> {
    if node_ids.is_empty() {
        return Err(Error::EmptyGroup(group_id.to_string()));
    }
    container(graph, parent_id)?;
    check_new_node_id(graph, group_id)?;

    let mut listed: Vec<&str> = Vec::with_capacity(node_ids.len());
    for id in node_ids {
        let id = id.as_ref();
        if id == ROOT_ID {
            return Err(Error::RootImmutable("grouped"));
        }
        if !graph.contains(id) {
            return Err(Error::UnknownNode(id.to_string()));
        }
        if id == parent_id || graph.is_descendant(parent_id, id) {
            return Err(Error::CyclicReparent {
                node: id.to_string(),
                parent: parent_id.to_string(),
            });
        }
        if listed.contains(&id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        listed.push(id);
    }
    let members: Vec<&str> = listed
        .iter()
        .copied()
        .filter(|id| !listed.iter().any(|other| other != id && graph.is_descendant(id, other)))
        .collect();

    let slot = graph.node(parent_id).and_then(|parent| {
        parent
            .children
            .iter()
            .position(|child| child.id == members[0])
    });

    let mut next = graph.clone();
    let mut children = Vec::with_capacity(members.len());
    for id in &members {
        let (node, _) = detach(&mut next.root, id).ok_or_else(|| Error::UnknownNode(id.to_string()))?;
        children.push(node);
    }
    let group = DomainNode {
        id: group_id.to_string(),
        label: String::new(),
        children,
        is_group: true,
    };
    let siblings = children_of(&mut next, parent_id)?;
    match slot {
        // Earlier members already left this list, so the slot shifts left.
        Some(index) => {
            let shift = members[1..]
                .iter()
                .filter(|id| {
                    graph
                        .node(parent_id)
                        .and_then(|parent| parent.children.iter().position(|child| child.id == **id))
                        .is_some_and(|pos| pos < index)
                })
                .count();
            siblings.insert(index - shift, group);
        }
        None => siblings.push(group),
    }
    Ok(next)
}

/// Dissolves a group, promoting its children in order to the group's slot.
pub fn remove_group(graph: &DomainGraph, group_id: &str) -> Result<DomainGraph> {
    if group_id == ROOT_ID {
        return Err(Error::RootImmutable("ungrouped"));
    }
    let group = graph
        .node(group_id)
        .ok_or_else(|| Error::UnknownNode(group_id.to_string()))?;
    if !group.is_group {
        return Err(Error::NotAGroup(group_id.to_string()));
    }
    let parent_id = graph
        .parent_of(group_id)
        .ok_or_else(|| Error::UnknownNode(group_id.to_string()))?
        .to_string();

    let mut next = graph.clone();
    let (group, index) =
        detach(&mut next.root, group_id).ok_or_else(|| Error::UnknownNode(group_id.to_string()))?;
    let siblings = children_of(&mut next, &parent_id)?;
    siblings.splice(index..index, group.children);
    next.edges.retain(|edge| !edge.touches(group_id));
    Ok(next)
}

pub fn relabel_node(graph: &DomainGraph, node_id: &str, label: &str) -> Result<DomainGraph> {
    if node_id == ROOT_ID {
        return Err(Error::RootImmutable("relabeled"));
    }
    let mut next = graph.clone();
    let node = next
        .node_mut(node_id)
        .ok_or_else(|| Error::UnknownNode(node_id.to_string()))?;
    node.label = label.to_string();
    Ok(next)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentNode {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    children: Vec<DocumentNode>,
    #[serde(default)]
    is_group: Option<bool>,
}

/// Replacement graph as agents write it: `{ id, children[], edges[] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default = "default_parent")]
    id: String,
    #[serde(default)]
    children: Vec<DocumentNode>,
    #[serde(default)]
    edges: Vec<DomainEdge>,
}

impl DocumentNode {
    fn into_node(self) -> DomainNode {
        let is_group = self.is_group.unwrap_or(!self.children.is_empty());
        DomainNode {
            label: self.label.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            children: self.children.into_iter().map(DocumentNode::into_node).collect(),
            is_group,
        }
    }
}

impl GraphDocument {
    pub fn parse(text: &str) -> Result<Self> {
        json5::from_str(text).map_err(|err| Error::Document(err.to_string()))
    }

    pub fn into_graph(self) -> DomainGraph {
        DomainGraph {
            root: DomainNode {
                id: self.id,
                label: String::new(),
                children: self.children.into_iter().map(DocumentNode::into_node).collect(),
                is_group: true,
            },
            edges: self.edges,
        }
    }
}

/// Parses (JSON or JSON5) and validates a complete replacement graph.
pub fn replace_graph(document: &str) -> Result<DomainGraph> {
    let graph = GraphDocument::parse(document)?.into_graph();
    validate(&graph)?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(nodes: &[DomainNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.id.as_str()).collect()
    }

    fn base() -> DomainGraph {
        let graph = DomainGraph::new();
        let graph = add_node(&graph, "root", "A", NodeData::leaf("A")).unwrap();
        let graph = add_node(&graph, "root", "B", NodeData::leaf("B")).unwrap();
        let graph = add_node(&graph, "root", "C", NodeData::leaf("C")).unwrap();
        add_edge(&graph, "e1", "A", "B").unwrap()
    }

    #[test]
    fn add_node_rejects_bad_parent_and_duplicates() {
        let graph = base();
        assert!(matches!(
            add_node(&graph, "nope", "X", NodeData::default()),
            Err(Error::InvalidParent(_))
        ));
        assert!(matches!(
            add_node(&graph, "A", "X", NodeData::default()),
            Err(Error::InvalidParent(_))
        ));
        assert_eq!(
            add_node(&graph, "root", "A", NodeData::default()),
            Err(Error::DuplicateId("A".to_string()))
        );
    }

    #[test]
    fn delete_node_cascades_to_descendants_and_edges() {
        let graph = group_nodes(&base(), &["A", "B"], "G", "root").unwrap();
        let graph = add_edge(&graph, "e2", "C", "G").unwrap();
        let next = delete_node(&graph, "G").unwrap();
        assert_eq!(ids(&next.root.children), vec!["C"]);
        assert!(next.edges.is_empty());
        // input untouched
        assert!(graph.contains("A"));
        assert_eq!(delete_node(&graph, "root"), Err(Error::RootImmutable("deleted")));
    }

    #[test]
    fn move_node_refuses_cycles() {
        let graph = group_nodes(&base(), &["A"], "G", "root").unwrap();
        let graph = add_node(&graph, "G", "H", NodeData::group("H")).unwrap();
        assert_eq!(
            move_node(&graph, "G", "H"),
            Err(Error::CyclicReparent {
                node: "G".to_string(),
                parent: "H".to_string()
            })
        );
        let moved = move_node(&graph, "C", "H").unwrap();
        assert_eq!(moved.parent_of("C"), Some("H"));
    }

    #[test]
    fn add_edge_checks_endpoints() {
        let graph = base();
        assert_eq!(
            add_edge(&graph, "e9", "A", "ghost"),
            Err(Error::UnknownEndpoint {
                edge: "e9".to_string(),
                endpoint: "ghost".to_string()
            })
        );
        assert_eq!(
            add_edge(&graph, "e1", "A", "C"),
            Err(Error::DuplicateId("e1".to_string()))
        );
        assert_eq!(delete_edge(&graph, "e7"), Err(Error::UnknownEdge("e7".to_string())));
    }

    #[test]
    fn group_then_ungroup_restores_order() {
        let graph = base();
        let grouped = group_nodes(&graph, &["A", "B"], "G1", "root").unwrap();
        assert_eq!(ids(&grouped.root.children), vec!["G1", "C"]);
        let group = grouped.node("G1").unwrap();
        assert!(group.is_group);
        assert_eq!(ids(&group.children), vec!["A", "B"]);

        let ungrouped = remove_group(&grouped, "G1").unwrap();
        assert_eq!(ids(&ungrouped.root.children), vec!["A", "B", "C"]);
        assert!(!ungrouped.contains("G1"));
        assert_eq!(ungrouped.edges, graph.edges);
    }

    #[test]
    fn group_slot_accounts_for_members_before_it() {
        let graph = base();
        let grouped = group_nodes(&graph, &["C", "A"], "G", "root").unwrap();
        assert_eq!(ids(&grouped.root.children), vec!["B", "G"]);
        assert_eq!(ids(&grouped.node("G").unwrap().children), vec!["C", "A"]);
    }

    #[test]
    fn remove_group_requires_a_group() {
        let graph = base();
        assert_eq!(remove_group(&graph, "A"), Err(Error::NotAGroup("A".to_string())));
        assert_eq!(remove_group(&graph, "root"), Err(Error::RootImmutable("ungrouped")));
        assert_eq!(
            group_nodes::<&str>(&graph, &[], "G", "root"),
            Err(Error::EmptyGroup("G".to_string()))
        );
    }

    #[test]
    fn batch_is_atomic() {
        let graph = base();
        let ops = vec![
            Operation::AddNode {
                parent_id: "root".to_string(),
                node_id: "D".to_string(),
                label: "D".to_string(),
                is_group: false,
            },
            Operation::DeleteEdge {
                edge_id: "missing".to_string(),
            },
        ];
        assert_eq!(
            batch_update(&graph, &ops),
            Err(Error::UnknownEdge("missing".to_string()))
        );
        assert!(!graph.contains("D"));
    }

    #[test]
    fn operations_parse_from_wire_form() {
        let text = r#"[
            {"op": "addNode", "parentId": "root", "nodeId": "D", "label": "Dee"},
            {"op": "addEdge", "edgeId": "e2", "sourceId": "D", "targetId": "C", "sourceHandle": "right"},
            {"op": "groupNodes", "nodeIds": ["C", "D"], "groupId": "G", "label": "Pair"}
        ]"#;
        let ops: Vec<Operation> = serde_json::from_str(text).unwrap();
        assert_eq!(ops[1].name(), "addEdge");
        let next = batch_update(&base(), &ops).unwrap();
        assert_eq!(next.node("G").unwrap().label, "Pair");
        assert_eq!(next.edge("e2").unwrap().source_handle.as_deref(), Some("right"));
    }

    #[test]
    fn replacement_documents_are_validated() {
        let graph = replace_graph(
            r#"{
                // agents often emit json5
                id: "root",
                children: [{ id: "G", children: [{ id: "A" }] }, { id: "B", label: "Bee" }],
                edges: [{ id: "e1", sourceId: "A", targetId: "B" }],
            }"#,
        )
        .unwrap();
        assert!(graph.node("G").unwrap().is_group);
        assert_eq!(graph.node("A").unwrap().label, "A");

        let err = replace_graph(r#"{"id":"root","children":[],"edges":[{"id":"e","sourceId":"x","targetId":"y"}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::GraphValidationFailed(found) if found.len() == 2));
        assert!(matches!(replace_graph("{ not json"), Err(Error::Document(_))));
    }
}
