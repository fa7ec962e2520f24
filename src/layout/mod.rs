//! Hierarchical layout.
//!
//! Each scope (the root and every group) is laid out on its own with the
//! layered placement from `dagre_rust`, children before parents, so a group's
//! size is known by the time its own scope places it. Edges that cross scope
//! borders are lifted to the lowest scope containing both endpoints and enter
//! that scope's placement as an edge between the two children that hold them.

pub mod text;

use dagre_rust::{
    GraphConfig as DagreConfig, GraphEdge as DagreEdge, GraphNode as DagreNode,
    layout as dagre_layout,
};
use graphlib_rust::{Graph as DagreGraph, GraphOption};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::{Direction, LayoutConfig};
use crate::error::Result;
use crate::geometry::{Point, Rect, compress_path, snap_grid};
use crate::graph::{DomainEdge, DomainGraph, DomainNode, ROOT_ID};
use crate::validate::validate;
use crate::view_state::GeometryKind;

pub use text::{TextBlock, measure_label, node_size};

const DAGRE_MARGIN: f32 = 8.0;

/// Box of one node relative to the top-left corner of its containing scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedBox {
    pub parent: String,
    pub is_group: bool,
    pub rect: Rect,
}

/// Coarse bend points for an edge, relative to the scope it was lifted into.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseRoute {
    pub scope: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftedEdge {
    pub scope: String,
    pub source_rep: String,
    pub target_rep: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutResult {
    pub boxes: BTreeMap<String, ScopedBox>,
    pub routes: BTreeMap<String, CoarseRoute>,
    /// Node ids, parents before children.
    order: Vec<String>,
}

impl LayoutResult {
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Absolute boxes, parents before children; the root sits at the origin.
    pub fn absolute_boxes(&self) -> Vec<(String, GeometryKind, Rect)> {
        let mut origin: HashMap<&str, (f32, f32)> = HashMap::new();
        origin.insert(ROOT_ID, (0.0, 0.0));
        let mut out = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let Some(scoped) = self.boxes.get(id) else {
                continue;
            };
            let (ox, oy) = origin.get(scoped.parent.as_str()).copied().unwrap_or((0.0, 0.0));
            let rect = scoped.rect.translate(ox, oy);
            origin.insert(id.as_str(), (rect.x, rect.y));
            let kind = if scoped.is_group {
                GeometryKind::Group
            } else {
                GeometryKind::Node
            };
            out.push((id.clone(), kind, rect));
        }
        out
    }

    /// Position of `id` in the frame of `scope`, following relative boxes upward.
    pub fn rect_in_scope(&self, id: &str, scope: &str) -> Option<Rect> {
        let mut rect = self.boxes.get(id)?.rect;
        let mut parent = self.boxes.get(id)?.parent.as_str();
        while parent != scope {
            let outer = self.boxes.get(parent)?;
            rect = rect.translate(outer.rect.x, outer.rect.y);
            parent = outer.parent.as_str();
        }
        Some(rect)
    }
}

/// Computes relative boxes and coarse routes for a whole graph.
pub trait HierarchicalLayout: Send + Sync {
    fn layout(&self, graph: &DomainGraph) -> Result<LayoutResult>;
}

/// Lowest scope holding both endpoints, and the two children of that scope
/// that contain them. `None` for self loops.
pub fn lift_edge(graph: &DomainGraph, edge: &DomainEdge) -> Option<LiftedEdge> {
    if edge.source_id == edge.target_id {
        return None;
    }
    let mut source_chain = vec![edge.source_id.clone()];
    source_chain.extend(graph.ancestors(&edge.source_id));
    let mut target_chain = vec![edge.target_id.clone()];
    target_chain.extend(graph.ancestors(&edge.target_id));
    let target_ancestors: HashSet<&str> = target_chain[1..].iter().map(String::as_str).collect();

    let scope_idx = source_chain
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, id)| target_ancestors.contains(id.as_str()))
        .map(|(idx, _)| idx)?;
    let scope = source_chain[scope_idx].clone();
    let source_rep = source_chain[scope_idx - 1].clone();
    let target_pos = target_chain.iter().position(|id| *id == scope)?;
    let target_rep = target_chain[target_pos - 1].clone();
    Some(LiftedEdge {
        scope,
        source_rep,
        target_rep,
    })
}

#[derive(Debug, Clone, Default)]
pub struct DagreLayout {
    config: LayoutConfig,
}

impl DagreLayout {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    fn empty_group_size(&self, node: &DomainNode) -> (f32, f32) {
        let label = measure_label(&node.label, &self.config);
        let width = (label.width + self.config.node_padding_x * 2.0).max(self.config.min_node_width);
        let height = self.config.group_header_height + self.config.group_padding * 2.0;
        (ceil_grid(width, self.config.grid_size), ceil_grid(height, self.config.grid_size))
    }

    /// Lays out the children of `scope` and returns the scope's own size.
    fn layout_scope(
        &self,
        scope: &DomainNode,
        sizes: &HashMap<String, (f32, f32)>,
        edges: &[(String, String)],
        boxes: &mut BTreeMap<String, ScopedBox>,
    ) -> (f32, f32) {
        if scope.children.is_empty() {
            return self.empty_group_size(scope);
        }
        let grid = self.config.grid_size;
        let pad = self.config.group_padding;
        let header = if scope.id == ROOT_ID {
            0.0
        } else {
            self.config.group_header_height
        };

        let members: Vec<(String, f32, f32)> = scope
            .children
            .iter()
            .map(|child| {
                let (w, h) = sizes.get(&child.id).copied().unwrap_or((
                    self.config.min_node_width,
                    self.config.min_node_height,
                ));
                (child.id.clone(), w, h)
            })
            .collect();

        let placed = place_with_dagre(&members, edges, &self.config)
            .unwrap_or_else(|| place_in_row(&members, &self.config));
        let min_x = placed.iter().map(|p| p.0).fold(f32::MAX, f32::min);
        let min_y = placed.iter().map(|p| p.1).fold(f32::MAX, f32::min);

        let mut right = 0.0f32;
        let mut bottom = 0.0f32;
        for ((id, w, h), (x, y)) in members.iter().zip(placed) {
            let rel = Rect::new(
                snap_grid(x - min_x + pad, grid),
                snap_grid(y - min_y + pad + header, grid),
                *w,
                *h,
            );
            right = right.max(rel.right());
            bottom = bottom.max(rel.bottom());
            let is_group = scope
                .children
                .iter()
                .find(|child| &child.id == id)
                .is_some_and(|child| child.is_group);
            boxes.insert(
                id.clone(),
                ScopedBox {
                    parent: scope.id.clone(),
                    is_group,
                    rect: rel,
                },
            );
        }

        let label = measure_label(&scope.label, &self.config);
        let width = (right + pad)
            .max(label.width + self.config.node_padding_x * 2.0)
            .max(self.config.min_node_width);
        let height = bottom + pad;
        (ceil_grid(width, grid), ceil_grid(height, grid))
    }
}

impl HierarchicalLayout for DagreLayout {
    fn layout(&self, graph: &DomainGraph) -> Result<LayoutResult> {
        validate(graph)?;

        let mut lifted: HashMap<String, Vec<(String, String)>> = HashMap::new();
        let mut lifted_by_edge: Vec<(&DomainEdge, LiftedEdge)> = Vec::new();
        for edge in &graph.edges {
            let Some(lift) = lift_edge(graph, edge) else {
                continue;
            };
            if lift.source_rep != lift.target_rep {
                lifted
                    .entry(lift.scope.clone())
                    .or_default()
                    .push((lift.source_rep.clone(), lift.target_rep.clone()));
            }
            lifted_by_edge.push((edge, lift));
        }

        let walk = graph.walk();
        let mut sizes: HashMap<String, (f32, f32)> = HashMap::new();
        let mut boxes: BTreeMap<String, ScopedBox> = BTreeMap::new();
        for entry in walk.iter().rev() {
            let node = entry.node;
            if node.is_container() {
                let scope_edges = lifted.get(&node.id).map(Vec::as_slice).unwrap_or(&[]);
                let size = self.layout_scope(node, &sizes, scope_edges, &mut boxes);
                sizes.insert(node.id.clone(), size);
            } else {
                sizes.insert(node.id.clone(), node_size(&node.label, &self.config));
            }
        }

        let order: Vec<String> = walk
            .iter()
            .filter(|entry| entry.parent.is_some())
            .map(|entry| entry.node.id.clone())
            .collect();
        let mut result = LayoutResult {
            boxes,
            routes: BTreeMap::new(),
            order,
        };

        for (edge, lift) in lifted_by_edge {
            if lift.source_rep == lift.target_rep {
                continue;
            }
            let (Some(source), Some(target)) = (
                result.rect_in_scope(&edge.source_id, &lift.scope),
                result.rect_in_scope(&edge.target_id, &lift.scope),
            ) else {
                continue;
            };
            let points = coarse_route(&source, &target, self.config.direction);
            result.routes.insert(
                edge.id.clone(),
                CoarseRoute {
                    scope: lift.scope,
                    points,
                },
            );
        }

        tracing::debug!(
            nodes = result.boxes.len(),
            routes = result.routes.len(),
            "hierarchical layout finished"
        );
        Ok(result)
    }
}

fn ceil_grid(value: f32, grid: f32) -> f32 {
    if grid <= 0.0 {
        value.ceil()
    } else {
        (value / grid).ceil() * grid
    }
}

/// Top-left corners from the layered placement, in `members` order.
fn place_with_dagre(
    members: &[(String, f32, f32)],
    edges: &[(String, String)],
    config: &LayoutConfig,
) -> Option<Vec<(f32, f32)>> {
    let mut dagre_graph: DagreGraph<DagreConfig, DagreNode, DagreEdge> =
        DagreGraph::new(Some(GraphOption {
            directed: Some(true),
            multigraph: Some(false),
            compound: Some(false),
        }));

    let mut graph_config = DagreConfig::default();
    graph_config.rankdir = Some(config.direction.rankdir().to_string());
    graph_config.nodesep = Some(config.node_spacing);
    graph_config.ranksep = Some(config.rank_spacing);
    graph_config.marginx = Some(DAGRE_MARGIN);
    graph_config.marginy = Some(DAGRE_MARGIN);
    dagre_graph.set_graph(graph_config);

    for (order, (id, width, height)) in members.iter().enumerate() {
        let mut node = DagreNode::default();
        node.width = *width;
        node.height = *height;
        node.order = Some(order);
        dagre_graph.set_node(id.clone(), Some(node));
    }

    let member_ids: HashSet<&str> = members.iter().map(|(id, _, _)| id.as_str()).collect();
    let mut edge_set: HashSet<(&str, &str)> = HashSet::new();
    for (from, to) in edges {
        if from == to || !member_ids.contains(from.as_str()) || !member_ids.contains(to.as_str()) {
            continue;
        }
        if !edge_set.insert((from.as_str(), to.as_str())) {
            continue;
        }
        let _ = dagre_graph.set_edge(from, to, Some(DagreEdge::default()), None);
    }

    dagre_layout::run_layout(&mut dagre_graph);

    let mut placed = Vec::with_capacity(members.len());
    for (id, width, height) in members {
        let node = dagre_graph.node(id)?;
        let (x, y) = (node.x - width / 2.0, node.y - height / 2.0);
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        placed.push((x, y));
    }
    Some(placed)
}

/// Fallback placement: a single row (or column for horizontal flow) in child order.
fn place_in_row(members: &[(String, f32, f32)], config: &LayoutConfig) -> Vec<(f32, f32)> {
    let horizontal = config.direction.is_horizontal();
    let mut cursor = 0.0f32;
    members
        .iter()
        .map(|(_, w, h)| {
            let pos = if horizontal { (0.0, cursor) } else { (cursor, 0.0) };
            cursor += if horizontal { *h } else { *w } + config.node_spacing;
            pos
        })
        .collect()
}

/// Dogleg from the source's outgoing side to the target's facing side.
fn coarse_route(source: &Rect, target: &Rect, direction: Direction) -> Vec<Point> {
    let (sx, sy) = source.center();
    let (tx, ty) = target.center();
    let points = if direction.is_horizontal() {
        let (start_x, end_x) = if tx >= sx {
            (source.right(), target.x)
        } else {
            (source.x, target.right())
        };
        let mid = (start_x + end_x) / 2.0;
        vec![
            Point::new(start_x, sy),
            Point::new(mid, sy),
            Point::new(mid, ty),
            Point::new(end_x, ty),
        ]
    } else {
        let (start_y, end_y) = if ty >= sy {
            (source.bottom(), target.y)
        } else {
            (source.y, target.bottom())
        };
        let mid = (start_y + end_y) / 2.0;
        vec![
            Point::new(sx, start_y),
            Point::new(sx, mid),
            Point::new(tx, mid),
            Point::new(tx, end_y),
        ]
    };
    compress_path(&points)
}
