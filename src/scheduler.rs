//! Layout request lifecycle.
//!
//! A request moves `Running -> Committed | Superseded | Failed`. The
//! structural hash of the submitted graph is the request token: a completion
//! is committed only while its hash is still the latest accepted one, so a
//! superseded run is dropped without touching the view state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LayoutConfig;
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::graph::{DomainGraph, ROOT_ID};
use crate::hash::{StructuralHash, structural_hash};
use crate::layout::{HierarchicalLayout, LayoutResult};
use crate::validate::validate;
use crate::view_state::{Geometry, GeometryKind, ViewState, ViewStateBatch};

/// Rounds of grow-then-push before giving up on a crowded canvas.
const SETTLE_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Every box comes from the layout result.
    #[default]
    Full,
    /// Existing boxes keep their position; only new ones are placed.
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutState {
    Idle,
    Running(StructuralHash),
    Committed(StructuralHash),
    Failed(StructuralHash),
}

/// A layout run detached from the scheduler, safe to move to a worker thread.
pub struct LayoutJob {
    hash: StructuralHash,
    graph: DomainGraph,
    engine: Arc<dyn HierarchicalLayout>,
}

impl std::fmt::Debug for LayoutJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutJob").field("hash", &self.hash).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct LayoutCompletion {
    pub hash: StructuralHash,
    pub result: Result<LayoutResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutOutcome {
    Committed {
        hash: StructuralHash,
        /// Node and group ids whose box changed.
        changed: Vec<String>,
    },
    Superseded {
        hash: StructuralHash,
    },
    Failed {
        hash: StructuralHash,
        error: Error,
    },
}

impl LayoutJob {
    pub fn hash(&self) -> &StructuralHash {
        &self.hash
    }

    pub fn run(self) -> LayoutCompletion {
        let result = self.engine.layout(&self.graph);
        LayoutCompletion {
            hash: self.hash,
            result,
        }
    }
}

pub struct LayoutScheduler {
    engine: Arc<dyn HierarchicalLayout>,
    config: LayoutConfig,
    state: LayoutState,
    latest: Option<StructuralHash>,
}

impl LayoutScheduler {
    pub fn new(engine: Arc<dyn HierarchicalLayout>, config: LayoutConfig) -> Self {
        Self {
            engine,
            config,
            state: LayoutState::Idle,
            latest: None,
        }
    }

    pub fn state(&self) -> &LayoutState {
        &self.state
    }

    pub fn latest(&self) -> Option<&StructuralHash> {
        self.latest.as_ref()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, LayoutState::Running(_))
    }

    /// Starts a run for `graph` unless one for the same shape is already
    /// in flight or committed.
    pub fn submit(&mut self, graph: &DomainGraph) -> Result<Option<LayoutJob>> {
        let hash = structural_hash(graph);
        match &self.state {
            LayoutState::Running(current) | LayoutState::Committed(current) if *current == hash => {
                tracing::debug!(hash = hash.short(), "layout request unchanged, skipping");
                return Ok(None);
            }
            _ => {}
        }
        self.start(graph, hash).map(Some)
    }

    /// Starts a run even if the shape is unchanged (explicit re-layout).
    pub fn force(&mut self, graph: &DomainGraph) -> Result<LayoutJob> {
        let hash = structural_hash(graph);
        self.start(graph, hash)
    }

    fn start(&mut self, graph: &DomainGraph, hash: StructuralHash) -> Result<LayoutJob> {
        if let LayoutState::Running(previous) = &self.state
            && *previous != hash
        {
            tracing::debug!(previous = previous.short(), next = hash.short(), "layout superseded");
        }
        self.latest = Some(hash.clone());
        if let Err(err) = validate(graph) {
            tracing::warn!(hash = hash.short(), error = %err, "layout refused");
            self.state = LayoutState::Failed(hash);
            return Err(err);
        }
        tracing::debug!(hash = hash.short(), "layout running");
        self.state = LayoutState::Running(hash.clone());
        Ok(LayoutJob {
            hash,
            graph: graph.clone(),
            engine: Arc::clone(&self.engine),
        })
    }

    /// Settles a finished run against the current graph and view state.
    pub fn complete(
        &mut self,
        completion: LayoutCompletion,
        graph: &DomainGraph,
        view: &mut ViewState,
        mode: CommitMode,
    ) -> LayoutOutcome {
        let LayoutCompletion { hash, result } = completion;
        if self.latest.as_ref() != Some(&hash) || structural_hash(graph) != hash {
            tracing::debug!(hash = hash.short(), "discarding stale layout");
            if self.state == LayoutState::Running(hash.clone()) {
                self.state = LayoutState::Idle;
            }
            return LayoutOutcome::Superseded { hash };
        }
        match result {
            Err(error) => {
                tracing::warn!(hash = hash.short(), error = %error, "layout failed");
                self.state = LayoutState::Failed(hash.clone());
                LayoutOutcome::Failed { hash, error }
            }
            Ok(result) => {
                let changed = commit(&result, graph, view, mode, &self.config);
                tracing::debug!(hash = hash.short(), changed = changed.len(), ?mode, "layout committed");
                self.state = LayoutState::Committed(hash.clone());
                LayoutOutcome::Committed { hash, changed }
            }
        }
    }
}

/// Writes a layout result into the view state; returns ids whose box changed.
pub fn commit(
    result: &LayoutResult,
    graph: &DomainGraph,
    view: &mut ViewState,
    mode: CommitMode,
    config: &LayoutConfig,
) -> Vec<String> {
    view.retain_graph(graph);
    let before: HashMap<String, Rect> = view.boxes().map(|(_, id, rect)| (id.clone(), *rect)).collect();

    match mode {
        CommitMode::Full => {
            let mut batch = ViewStateBatch::new();
            for (id, kind, rect) in result.absolute_boxes() {
                batch.push(kind, id, Geometry::Box(rect));
            }
            // Only Box geometry in node/group namespaces, so this cannot fail.
            if let Err(err) = view.apply(batch) {
                tracing::warn!(error = %err, "layout commit rejected");
            }
        }
        CommitMode::Preserve => preserve_commit(result, graph, view, config),
    }

    let mut changed: Vec<String> = view
        .boxes()
        .filter(|(_, id, rect)| before.get(*id) != Some(*rect))
        .map(|(_, id, _)| id.clone())
        .collect();
    changed.sort();
    changed
}

fn preserve_commit(result: &LayoutResult, graph: &DomainGraph, view: &mut ViewState, config: &LayoutConfig) {
    let pad = config.group_padding;
    let header = config.group_header_height;

    for id in result.order() {
        let Some(scoped) = result.boxes.get(id) else {
            continue;
        };
        let kind = if scoped.is_group {
            GeometryKind::Group
        } else {
            GeometryKind::Node
        };
        if let Some(existing) = view.box_of(kind, id) {
            if !scoped.is_group && (existing.width, existing.height) != (scoped.rect.width, scoped.rect.height) {
                let resized = Rect::new(existing.x, existing.y, scoped.rect.width, scoped.rect.height);
                view.write_box(kind, id, resized);
            }
            continue;
        }

        // New group around children that are already on the canvas.
        if scoped.is_group {
            let placed_children = graph
                .node(id)
                .map(|node| {
                    node.children
                        .iter()
                        .filter_map(|child| view.rect(&child.id))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if let Some(bounds) = Rect::bounding(placed_children) {
                let fitted = Rect::new(
                    bounds.x - pad,
                    bounds.y - pad - header,
                    (bounds.width + pad * 2.0).max(scoped.rect.width),
                    bounds.height + pad * 2.0 + header,
                );
                view.write_box(kind, id, fitted);
                continue;
            }
        }

        let origin = if scoped.parent == ROOT_ID {
            (0.0, 0.0)
        } else {
            view.rect(&scoped.parent).map(|rect| (rect.x, rect.y)).unwrap_or((0.0, 0.0))
        };
        let slot = scoped.rect.translate(origin.0, origin.1);
        let siblings = sibling_boxes(graph, view, &scoped.parent, id);
        let candidates = placement_candidates(slot, &siblings, config.node_spacing);
        let rect = candidates
            .iter()
            .find(|candidate| !growth_collides(graph, view, &scoped.parent, candidate, config))
            .copied()
            .unwrap_or(candidates[0]);
        view.write_box(kind, id, rect);
    }

    settle_groups(graph, view, config);
}

/// Boxes of the children of `parent` other than `except`.
fn sibling_boxes(graph: &DomainGraph, view: &ViewState, parent: &str, except: &str) -> Vec<Rect> {
    graph
        .node(parent)
        .map(|node| {
            node.children
                .iter()
                .filter(|child| child.id != except)
                .filter_map(|child| view.rect(&child.id))
                .collect()
        })
        .unwrap_or_default()
}

/// Moves `rect` right until it overlaps none of `siblings`.
fn clear_of(mut rect: Rect, siblings: &[Rect], spacing: f32) -> Rect {
    for _ in 0..=siblings.len() {
        let blocker = siblings
            .iter()
            .filter(|sibling| sibling.overlaps(&rect))
            .map(|sibling| sibling.right())
            .reduce(f32::max);
        let Some(blocker) = blocker else {
            break;
        };
        rect.x = blocker + spacing;
    }
    rect
}

/// Where a new box may go, best first: its layout slot, a new row below the
/// siblings, a new column right of them. Each is clear of the siblings.
fn placement_candidates(slot: Rect, siblings: &[Rect], spacing: f32) -> Vec<Rect> {
    let mut out = vec![clear_of(slot, siblings, spacing)];
    if let Some(bounds) = Rect::bounding(siblings.iter().copied()) {
        let below = Rect::new(bounds.x, bounds.bottom() + spacing, slot.width, slot.height);
        out.push(clear_of(below, siblings, spacing));
        let beside = Rect::new(bounds.right() + spacing, bounds.y, slot.width, slot.height);
        out.push(clear_of(beside, siblings, spacing));
    }
    out
}

/// Whether placing `candidate` under `parent` would grow some enclosing group
/// into one of that group's siblings.
fn growth_collides(graph: &DomainGraph, view: &ViewState, parent: &str, candidate: &Rect, config: &LayoutConfig) -> bool {
    let mut inner = *candidate;
    let mut scope = parent;
    while scope != ROOT_ID {
        let Some(current) = view.rect(scope) else {
            return false;
        };
        let needed = envelope(&inner, config);
        if current.contains_rect(&needed, 0.0) {
            return false;
        }
        let grown = current.union(&needed);
        let Some(outer) = graph.parent_of(scope) else {
            return false;
        };
        if sibling_boxes(graph, view, outer, scope).iter().any(|sibling| sibling.overlaps(&grown)) {
            return true;
        }
        inner = grown;
        scope = outer;
    }
    false
}

/// Box a group needs around `content`.
fn envelope(content: &Rect, config: &LayoutConfig) -> Rect {
    let pad = config.group_padding;
    let header = config.group_header_height;
    Rect::new(
        content.x - pad,
        content.y - pad - header,
        content.width + pad * 2.0,
        content.height + pad * 2.0 + header,
    )
}

/// Grows every group, innermost first, until it contains its children.
pub fn grow_groups(graph: &DomainGraph, view: &mut ViewState, config: &LayoutConfig) -> Vec<String> {
    let mut grown = Vec::new();
    for entry in graph.walk().iter().rev() {
        let node = entry.node;
        if !node.is_group {
            continue;
        }
        let Some(current) = view.box_of(GeometryKind::Group, &node.id) else {
            continue;
        };
        let Some(bounds) = Rect::bounding(node.children.iter().filter_map(|child| view.rect(&child.id))) else {
            continue;
        };
        let needed = envelope(&bounds, config);
        if current.contains_rect(&needed, 0.0) {
            continue;
        }
        if view.write_box(GeometryKind::Group, &node.id, current.union(&needed)) {
            grown.push(node.id.clone());
        }
    }
    grown
}

/// Shifts siblings of `group_id` to the right until none overlaps it or one
/// another. Returns whether anything moved.
fn push_siblings_clear(graph: &DomainGraph, view: &mut ViewState, group_id: &str, spacing: f32) -> bool {
    let Some(parent) = graph.parent_of(group_id) else {
        return false;
    };
    let Some(anchor) = view.rect(group_id) else {
        return false;
    };
    let mut others: Vec<(String, Rect)> = graph
        .node(parent)
        .map(|node| {
            node.children
                .iter()
                .filter(|child| child.id != group_id)
                .filter_map(|child| view.rect(&child.id).map(|rect| (child.id.clone(), rect)))
                .collect()
        })
        .unwrap_or_default();
    others.sort_by(|a, b| a.1.x.total_cmp(&b.1.x));

    let mut fixed = vec![anchor];
    let mut moved = false;
    for (id, rect) in others {
        let shifted = clear_of(rect, &fixed, spacing);
        if shifted.x != rect.x {
            tracing::debug!(node = %id, group = group_id, "pushed clear of a grown group");
            view.translate_subtree(graph, &id, shifted.x - rect.x, 0.0);
            moved = true;
        }
        fixed.push(shifted);
    }
    moved
}

/// Grows groups around their children, then pushes aside any sibling a grown
/// group now overlaps, repeating upward until the tree is overlap-free.
pub fn settle_groups(graph: &DomainGraph, view: &mut ViewState, config: &LayoutConfig) -> Vec<String> {
    let mut grown = grow_groups(graph, view, config);
    let mut all = grown.clone();
    for _ in 0..SETTLE_PASSES {
        let mut moved = false;
        for id in &grown {
            moved |= push_siblings_clear(graph, view, id, config.node_spacing);
        }
        if !moved {
            break;
        }
        grown = grow_groups(graph, view, config);
        for id in &grown {
            if !all.contains(id) {
                all.push(id.clone());
            }
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DomainEdge, DomainNode};
    use crate::layout::DagreLayout;
    use crate::mutation::{NodeData, add_edge, add_node};

    fn scheduler() -> LayoutScheduler {
        let config = LayoutConfig::default();
        LayoutScheduler::new(Arc::new(DagreLayout::new(config.clone())), config)
    }

    fn pair() -> DomainGraph {
        let mut graph = DomainGraph::new();
        graph.root.children.push(DomainNode::leaf("A", "A"));
        graph.root.children.push(DomainNode::leaf("B", "B"));
        graph.edges.push(DomainEdge::new("e1", "A", "B"));
        graph
    }

    #[test]
    fn unchanged_hash_starts_nothing() {
        let mut scheduler = scheduler();
        let graph = pair();
        let job = scheduler.submit(&graph).unwrap();
        assert!(job.is_some());
        assert!(scheduler.submit(&graph).unwrap().is_none());

        let mut view = ViewState::new(10.0);
        let outcome = scheduler.complete(job.unwrap().run(), &graph, &mut view, CommitMode::Full);
        assert!(matches!(outcome, LayoutOutcome::Committed { .. }));
        assert!(scheduler.submit(&graph).unwrap().is_none());
        assert!(scheduler.force(&graph).is_ok());
    }

    #[test]
    fn stale_completion_is_superseded() {
        let mut scheduler = scheduler();
        let graph = pair();
        let stale = scheduler.submit(&graph).unwrap().unwrap();
        let next = add_node(&graph, "root", "C", NodeData::leaf("C")).unwrap();
        let fresh = scheduler.submit(&next).unwrap().unwrap();

        let mut view = ViewState::new(10.0);
        let outcome = scheduler.complete(stale.run(), &next, &mut view, CommitMode::Full);
        assert!(matches!(outcome, LayoutOutcome::Superseded { .. }));
        assert!(view.is_empty());

        let outcome = scheduler.complete(fresh.run(), &next, &mut view, CommitMode::Full);
        assert!(matches!(outcome, LayoutOutcome::Committed { .. }));
        assert_eq!(view.node.len(), 3);
    }

    #[test]
    fn superseded_run_leaves_the_scheduler_idle() {
        let mut scheduler = scheduler();
        let graph = pair();
        let job = scheduler.submit(&graph).unwrap().unwrap();
        let next = add_node(&graph, "root", "C", NodeData::leaf("C")).unwrap();

        let mut view = ViewState::new(10.0);
        let outcome = scheduler.complete(job.run(), &next, &mut view, CommitMode::Full);
        assert!(matches!(outcome, LayoutOutcome::Superseded { .. }));
        assert_eq!(scheduler.state(), &LayoutState::Idle);
        assert!(!scheduler.is_running());
        assert!(scheduler.submit(&next).unwrap().is_some());
    }

    #[test]
    fn invalid_graph_fails_without_touching_view() {
        let mut scheduler = scheduler();
        let mut graph = pair();
        graph.edges.push(DomainEdge::new("e2", "A", "ghost"));
        assert!(matches!(scheduler.submit(&graph), Err(Error::GraphValidationFailed(_))));
        assert!(matches!(scheduler.state(), LayoutState::Failed(_)));
    }

    #[test]
    fn preserve_keeps_existing_and_avoids_siblings() {
        let config = LayoutConfig::default();
        let mut scheduler = scheduler();
        let graph = pair();
        let mut view = ViewState::new(config.grid_size);
        let job = scheduler.submit(&graph).unwrap().unwrap();
        scheduler.complete(job.run(), &graph, &mut view, CommitMode::Full);
        view.write_position(GeometryKind::Node, "A", 400.0, 400.0).unwrap();
        let a = view.rect("A").unwrap();
        let b = view.rect("B").unwrap();

        let next = add_node(&graph, "root", "C", NodeData::leaf("C")).unwrap();
        let next = add_edge(&next, "e2", "B", "C").unwrap();
        let job = scheduler.submit(&next).unwrap().unwrap();
        let outcome = scheduler.complete(job.run(), &next, &mut view, CommitMode::Preserve);
        let LayoutOutcome::Committed { changed, .. } = outcome else {
            panic!("expected commit, got {outcome:?}");
        };
        assert_eq!(changed, vec!["C".to_string()]);
        assert_eq!(view.rect("A"), Some(a));
        assert_eq!(view.rect("B"), Some(b));
        let c = view.rect("C").unwrap();
        assert!(!c.overlaps(&a) && !c.overlaps(&b));
    }

    #[test]
    fn preserve_keeps_grown_groups_clear_of_their_siblings() {
        let config = LayoutConfig::default();
        let mut scheduler = scheduler();
        let mut graph = DomainGraph::new();
        graph
            .root
            .children
            .push(DomainNode::group("G", "G", vec![DomainNode::leaf("A", "A")]));
        graph.root.children.push(DomainNode::leaf("B", "B"));
        let mut view = ViewState::new(config.grid_size);
        let job = scheduler.submit(&graph).unwrap().unwrap();
        scheduler.complete(job.run(), &graph, &mut view, CommitMode::Full);
        let a = view.rect("A").unwrap();
        let b = view.rect("B").unwrap();

        let next = add_node(&graph, "G", "C", NodeData::leaf("C")).unwrap();
        let next = add_node(&next, "G", "D", NodeData::leaf("D")).unwrap();
        let job = scheduler.submit(&next).unwrap().unwrap();
        let outcome = scheduler.complete(job.run(), &next, &mut view, CommitMode::Preserve);
        assert!(matches!(outcome, LayoutOutcome::Committed { .. }));

        assert_eq!(view.rect("A"), Some(a));
        assert_eq!(view.rect("B"), Some(b));
        let group = view.rect("G").unwrap();
        assert!(!group.overlaps(&b), "G {group:?} overlaps B {b:?}");
        for id in ["A", "C", "D"] {
            assert!(group.contains_rect(&view.rect(id).unwrap(), 0.5), "{id} escaped G");
        }
        for (x, y) in [("A", "C"), ("A", "D"), ("C", "D")] {
            assert!(!view.rect(x).unwrap().overlaps(&view.rect(y).unwrap()), "{x} overlaps {y}");
        }
    }

    #[test]
    fn settling_pushes_a_covered_sibling_aside() {
        let config = LayoutConfig::default();
        let mut graph = DomainGraph::new();
        graph
            .root
            .children
            .push(DomainNode::group("G", "G", vec![DomainNode::leaf("A", "A")]));
        graph.root.children.push(DomainNode::leaf("B", "B"));
        let mut view = ViewState::new(config.grid_size);
        view.write_box(GeometryKind::Group, "G", Rect::new(0.0, 0.0, 200.0, 120.0));
        view.write_box(GeometryKind::Node, "B", Rect::new(250.0, 40.0, 120.0, 48.0));
        view.write_box(GeometryKind::Node, "A", Rect::new(300.0, 40.0, 120.0, 48.0));

        assert_eq!(settle_groups(&graph, &mut view, &config), vec!["G".to_string()]);
        let group = view.rect("G").unwrap();
        let b = view.rect("B").unwrap();
        assert!(group.contains_rect(&view.rect("A").unwrap(), 0.0));
        assert!(!group.overlaps(&b));
        assert!(b.x >= group.right());
    }

    #[test]
    fn groups_grow_to_contain_children() {
        let config = LayoutConfig::default();
        let mut graph = DomainGraph::new();
        graph
            .root
            .children
            .push(DomainNode::group("G", "G", vec![DomainNode::leaf("A", "A")]));
        let mut view = ViewState::new(config.grid_size);
        view.write_box(GeometryKind::Group, "G", Rect::new(0.0, 0.0, 200.0, 120.0));
        view.write_box(GeometryKind::Node, "A", Rect::new(300.0, 40.0, 120.0, 48.0));
        assert_eq!(grow_groups(&graph, &mut view, &config), vec!["G".to_string()]);
        let group = view.rect("G").unwrap();
        assert!(group.contains_rect(&view.rect("A").unwrap(), 0.0));
    }
}
