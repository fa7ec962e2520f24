//! Projection of graph + view state into renderer-ready lists.
//!
//! Geometry is read from the [`ViewState`] only. Renderers that nest children
//! inside containers want positions relative to the parent, so those are
//! derived here on every frame and never stored.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::geometry::{AxisTransform, PlaneTransform, Point, Rect};
use crate::graph::{DomainGraph, ROOT_ID};
use crate::layout::CoarseRoute;
use crate::view_state::{GeometryKind, ViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Missing geometry is an error.
    Strict,
    /// Elements without geometry are left out of this frame.
    #[default]
    Lenient,
}

impl From<&RenderConfig> for RenderMode {
    fn from(config: &RenderConfig) -> Self {
        if config.strict {
            RenderMode::Strict
        } else {
            RenderMode::Lenient
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    pub id: String,
    /// `None` for children of the root.
    pub parent_id: Option<String>,
    pub is_group: bool,
    pub label: String,
    pub depth: usize,
    /// Top-left corner relative to the parent box (absolute for root children).
    pub position: Point,
    pub absolute: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub points: Vec<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_position: Option<Point>,
    /// Points are the layout's coarse bends, not a routed path.
    pub provisional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderScene {
    /// Parents before children.
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
}

impl RenderScene {
    pub fn node(&self, id: &str) -> Option<&RenderNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&RenderEdge> {
        self.edges.iter().find(|edge| edge.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderAdapter {
    mode: RenderMode,
}

impl RenderAdapter {
    pub fn new(mode: RenderMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Builds one frame. `coarse` supplies stand-in bends for edges the router
    /// has not reached yet.
    pub fn project(
        &self,
        graph: &DomainGraph,
        view: &ViewState,
        coarse: Option<&BTreeMap<String, CoarseRoute>>,
    ) -> Result<RenderScene> {
        let mut scene = RenderScene::default();
        let mut absolute: BTreeMap<&str, Rect> = BTreeMap::new();
        let mut skipped: HashSet<&str> = HashSet::new();

        for entry in graph.walk() {
            let Some(parent) = entry.parent else {
                continue;
            };
            let node = entry.node;
            if skipped.contains(parent) {
                skipped.insert(node.id.as_str());
                continue;
            }
            let kind = if node.is_group {
                GeometryKind::Group
            } else {
                GeometryKind::Node
            };
            let Some(rect) = view.box_of(kind, &node.id) else {
                self.missing(kind, &node.id)?;
                skipped.insert(node.id.as_str());
                continue;
            };
            let position = match absolute.get(parent) {
                Some(outer) if parent != ROOT_ID => Point::new(rect.x - outer.x, rect.y - outer.y),
                _ => Point::new(rect.x, rect.y),
            };
            absolute.insert(node.id.as_str(), rect);
            scene.nodes.push(RenderNode {
                id: node.id.clone(),
                parent_id: (parent != ROOT_ID).then(|| parent.to_string()),
                is_group: node.is_group,
                label: node.label.clone(),
                depth: entry.depth,
                position,
                absolute: rect,
            });
        }

        for edge in &graph.edges {
            if !absolute.contains_key(edge.source_id.as_str()) || !absolute.contains_key(edge.target_id.as_str()) {
                tracing::debug!(edge = %edge.id, "edge endpoint not rendered, skipping");
                continue;
            }
            let (points, provisional) = match view.waypoints(&edge.id) {
                Some(points) if points.len() >= 2 => (points.to_vec(), false),
                _ => match coarse.and_then(|routes| routes.get(&edge.id)) {
                    Some(route) if route.points.len() >= 2 => (scope_to_world(route, &absolute), true),
                    _ => {
                        self.missing(GeometryKind::Edge, &edge.id)?;
                        continue;
                    }
                },
            };
            let label_position = edge.label.as_ref().map(|_| edge_midpoint(&points));
            scene.edges.push(RenderEdge {
                id: edge.id.clone(),
                source: edge.source_id.clone(),
                target: edge.target_id.clone(),
                points,
                label: edge.label.clone(),
                label_position,
                provisional,
            });
        }
        Ok(scene)
    }

    fn missing(&self, kind: GeometryKind, id: &str) -> Result<()> {
        match self.mode {
            RenderMode::Strict => Err(Error::MissingGeometry {
                kind,
                id: id.to_string(),
            }),
            RenderMode::Lenient => {
                tracing::debug!(%kind, id, "no geometry yet, skipping for this frame");
                Ok(())
            }
        }
    }
}

fn scope_to_world(route: &CoarseRoute, absolute: &BTreeMap<&str, Rect>) -> Vec<Point> {
    let (ox, oy) = if route.scope == ROOT_ID {
        (0.0, 0.0)
    } else {
        absolute
            .get(route.scope.as_str())
            .map(|rect| (rect.x, rect.y))
            .unwrap_or((0.0, 0.0))
    };
    route.points.iter().map(|p| Point::new(p.x + ox, p.y + oy)).collect()
}

fn edge_midpoint(points: &[Point]) -> Point {
    if points.len() >= 4 {
        let (p1, p2) = (points[1], points[2]);
        Point::new((p1.x + p2.x) / 2.0, (p1.y + p2.y) / 2.0)
    } else if points.len() >= 2 {
        let (p1, p2) = (points[0], points[points.len() - 1]);
        Point::new((p1.x + p2.x) / 2.0, (p1.y + p2.y) / 2.0)
    } else {
        Point::new(0.0, 0.0)
    }
}

/// Pan/zoom mapping between world and screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    to_screen: PlaneTransform,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            to_screen: PlaneTransform::IDENTITY,
        }
    }
}

impl Viewport {
    /// Viewport mapping `world_a -> screen_a` and `world_b -> screen_b`.
    pub fn from_reference(world_a: Point, screen_a: Point, world_b: Point, screen_b: Point) -> Self {
        Self {
            to_screen: PlaneTransform::fit(
                world_a.as_tuple(),
                screen_a.as_tuple(),
                world_b.as_tuple(),
                screen_b.as_tuple(),
            ),
        }
    }

    /// Uniform zoom that shows `bounds` inside a `width` x `height` screen.
    pub fn fit_bounds(bounds: &Rect, width: f32, height: f32, margin: f32) -> Self {
        let avail_w = (width - margin * 2.0).max(1.0);
        let avail_h = (height - margin * 2.0).max(1.0);
        let scale = (avail_w / bounds.width.max(1.0)).min(avail_h / bounds.height.max(1.0));
        let offset_x = margin + (avail_w - bounds.width * scale) / 2.0 - bounds.x * scale;
        let offset_y = margin + (avail_h - bounds.height * scale) / 2.0 - bounds.y * scale;
        Self {
            to_screen: PlaneTransform {
                x: AxisTransform { scale, offset: offset_x },
                y: AxisTransform { scale, offset: offset_y },
            },
        }
    }

    pub fn zoom(&self) -> f32 {
        self.to_screen.x.scale
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.to_screen.x.offset += dx;
        self.to_screen.y.offset += dy;
    }

    /// Zooms by `factor`, keeping the world point under `anchor` in place.
    pub fn zoom_at(&mut self, factor: f32, anchor: Point) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let world = self.to_world(anchor);
        let x_scale = self.to_screen.x.scale * factor;
        let y_scale = self.to_screen.y.scale * factor;
        self.to_screen = PlaneTransform {
            x: AxisTransform::fit(world.x, anchor.x, world.x + 1.0, anchor.x + x_scale),
            y: AxisTransform::fit(world.y, anchor.y, world.y + 1.0, anchor.y + y_scale),
        };
    }

    pub fn to_screen(&self, point: Point) -> Point {
        Point::from(self.to_screen.apply(point.as_tuple()))
    }

    pub fn to_world(&self, point: Point) -> Point {
        Point::from(self.to_screen.invert().apply(point.as_tuple()))
    }

    pub fn rect_to_screen(&self, rect: &Rect) -> Rect {
        self.to_screen.apply_rect(rect)
    }
}

pub fn write_output(json: &str, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DomainEdge, DomainNode};

    fn nested() -> (DomainGraph, ViewState) {
        let mut graph = DomainGraph::new();
        graph.root.children.push(DomainNode::group(
            "G",
            "Group",
            vec![DomainNode::leaf("A", "A")],
        ));
        graph.root.children.push(DomainNode::leaf("B", "B"));
        let mut edge = DomainEdge::new("e1", "A", "B");
        edge.label = Some("calls".to_string());
        graph.edges.push(edge);
        let mut view = ViewState::new(0.0);
        view.write_box(GeometryKind::Group, "G", Rect::new(100.0, 100.0, 300.0, 200.0));
        view.write_box(GeometryKind::Node, "A", Rect::new(130.0, 160.0, 120.0, 48.0));
        view.write_box(GeometryKind::Node, "B", Rect::new(600.0, 100.0, 120.0, 48.0));
        view.write_waypoints("e1", vec![Point::new(250.0, 184.0), Point::new(600.0, 124.0)]);
        (graph, view)
    }

    #[test]
    fn children_get_parent_relative_positions() {
        let (graph, view) = nested();
        let scene = RenderAdapter::new(RenderMode::Strict).project(&graph, &view, None).unwrap();
        let ids: Vec<&str> = scene.nodes.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(ids, vec!["G", "A", "B"]);
        let a = scene.node("A").unwrap();
        assert_eq!(a.parent_id.as_deref(), Some("G"));
        assert_eq!(a.position, Point::new(30.0, 60.0));
        assert_eq!(a.depth, 2);
        let b = scene.node("B").unwrap();
        assert_eq!(b.parent_id, None);
        assert_eq!(b.position, Point::new(600.0, 100.0));
        let edge = scene.edge("e1").unwrap();
        assert_eq!(edge.label_position, Some(Point::new(425.0, 154.0)));
        assert!(!edge.provisional);
    }

    #[test]
    fn strict_mode_reports_missing_geometry() {
        let (graph, mut view) = nested();
        view.remove(GeometryKind::Node, "B");
        let err = RenderAdapter::new(RenderMode::Strict).project(&graph, &view, None).unwrap_err();
        assert_eq!(
            err,
            Error::MissingGeometry {
                kind: GeometryKind::Node,
                id: "B".to_string()
            }
        );
    }

    #[test]
    fn lenient_mode_skips_missing_and_dependent_elements() {
        let (graph, mut view) = nested();
        view.remove(GeometryKind::Group, "G");
        let scene = RenderAdapter::default().project(&graph, &view, None).unwrap();
        assert_eq!(scene.nodes.len(), 1);
        assert!(scene.edges.is_empty());
    }

    #[test]
    fn coarse_routes_are_translated_to_world() {
        let (graph, mut view) = nested();
        view.remove(GeometryKind::Edge, "e1");
        let mut coarse = BTreeMap::new();
        coarse.insert(
            "e1".to_string(),
            CoarseRoute {
                scope: "G".to_string(),
                points: vec![Point::new(10.0, 10.0), Point::new(20.0, 10.0)],
            },
        );
        let scene = RenderAdapter::default().project(&graph, &view, Some(&coarse)).unwrap();
        let edge = scene.edge("e1").unwrap();
        assert!(edge.provisional);
        assert_eq!(edge.points[0], Point::new(110.0, 110.0));
    }

    #[test]
    fn viewport_zoom_keeps_anchor_fixed() {
        let mut viewport = Viewport::default();
        viewport.pan(50.0, 20.0);
        let anchor = Point::new(200.0, 100.0);
        let before = viewport.to_world(anchor);
        viewport.zoom_at(2.0, anchor);
        assert_eq!(viewport.zoom(), 2.0);
        let after = viewport.to_world(anchor);
        assert!((before.x - after.x).abs() < 1e-3 && (before.y - after.y).abs() < 1e-3);
    }

    #[test]
    fn fit_bounds_centers_content() {
        let viewport = Viewport::fit_bounds(&Rect::new(0.0, 0.0, 200.0, 100.0), 420.0, 420.0, 10.0);
        assert_eq!(viewport.zoom(), 2.0);
        let center = viewport.to_screen(Point::new(100.0, 50.0));
        assert!((center.x - 210.0).abs() < 1e-3 && (center.y - 210.0).abs() < 1e-3);
    }
}
