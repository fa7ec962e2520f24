use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::geometry::{Point, Rect};
use crate::graph::DomainGraph;

pub use crate::geometry::snap_grid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Node,
    Group,
    Edge,
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryKind::Node => "node",
            GeometryKind::Group => "group",
            GeometryKind::Edge => "edge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeGeometry {
    pub waypoints: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Box(Rect),
    Waypoints(Vec<Point>),
}

/// Absolute-space geometry for every node, group and edge.
///
/// Positions of boxes are snapped to `grid_size` on every write, so a drag and
/// a programmatic placement that land in the same cell produce the same entry.
/// Edge waypoints are stored as given: port offsets are finer than the grid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewState {
    pub node: BTreeMap<String, Rect>,
    pub group: BTreeMap<String, Rect>,
    pub edge: BTreeMap<String, EdgeGeometry>,
    #[serde(skip)]
    grid_size: f32,
}

/// A set of writes applied all at once by [`ViewState::apply`].
#[derive(Debug, Clone, Default)]
pub struct ViewStateBatch {
    writes: Vec<(GeometryKind, String, Geometry)>,
}

impl ViewStateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: GeometryKind, id: impl Into<String>, geometry: Geometry) {
        self.writes.push((kind, id.into(), geometry));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl ViewState {
    pub fn new(grid_size: f32) -> Self {
        Self {
            grid_size,
            ..Default::default()
        }
    }

    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    pub fn set_grid_size(&mut self, grid_size: f32) {
        self.grid_size = grid_size;
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_empty() && self.group.is_empty() && self.edge.is_empty()
    }

    /// Upserts an entry; returns whether the stored value changed.
    pub fn write(&mut self, kind: GeometryKind, id: &str, geometry: Geometry) -> Result<bool> {
        match (kind, geometry) {
            (GeometryKind::Node | GeometryKind::Group, Geometry::Box(rect)) => {
                Ok(self.write_box(kind, id, rect))
            }
            (GeometryKind::Edge, Geometry::Waypoints(points)) => {
                Ok(self.write_waypoints(id, points))
            }
            (kind, _) => Err(Error::GeometryMismatch {
                kind,
                id: id.to_string(),
            }),
        }
    }

    pub fn read(&self, kind: GeometryKind, id: &str) -> Option<Geometry> {
        match kind {
            GeometryKind::Node => self.node.get(id).copied().map(Geometry::Box),
            GeometryKind::Group => self.group.get(id).copied().map(Geometry::Box),
            GeometryKind::Edge => self
                .edge
                .get(id)
                .map(|edge| Geometry::Waypoints(edge.waypoints.clone())),
        }
    }

    pub fn read_strict(&self, kind: GeometryKind, id: &str) -> Result<Geometry> {
        self.read(kind, id).ok_or_else(|| Error::MissingGeometry {
            kind,
            id: id.to_string(),
        })
    }

    pub fn box_of(&self, kind: GeometryKind, id: &str) -> Option<Rect> {
        match kind {
            GeometryKind::Node => self.node.get(id).copied(),
            GeometryKind::Group => self.group.get(id).copied(),
            GeometryKind::Edge => None,
        }
    }

    /// Box of a node or group, whichever namespace holds it.
    pub fn rect(&self, id: &str) -> Option<Rect> {
        self.node.get(id).or_else(|| self.group.get(id)).copied()
    }

    pub fn waypoints(&self, id: &str) -> Option<&[Point]> {
        self.edge.get(id).map(|edge| edge.waypoints.as_slice())
    }

    pub fn write_box(&mut self, kind: GeometryKind, id: &str, rect: Rect) -> bool {
        let rect = Rect::new(
            snap_grid(rect.x, self.grid_size),
            snap_grid(rect.y, self.grid_size),
            rect.width,
            rect.height,
        );
        let map = match kind {
            GeometryKind::Group => &mut self.group,
            _ => &mut self.node,
        };
        if map.get(id) == Some(&rect) {
            return false;
        }
        map.insert(id.to_string(), rect);
        true
    }

    /// Live-drag write: moves an existing box, keeping its size.
    pub fn write_position(&mut self, kind: GeometryKind, id: &str, x: f32, y: f32) -> Result<bool> {
        let current = self.box_of(kind, id).ok_or_else(|| Error::MissingGeometry {
            kind,
            id: id.to_string(),
        })?;
        Ok(self.write_box(kind, id, Rect::new(x, y, current.width, current.height)))
    }

    pub fn write_waypoints(&mut self, id: &str, waypoints: Vec<Point>) -> bool {
        if self.edge.get(id).map(|edge| &edge.waypoints) == Some(&waypoints) {
            return false;
        }
        self.edge.insert(id.to_string(), EdgeGeometry { waypoints });
        true
    }

    pub fn remove(&mut self, kind: GeometryKind, id: &str) -> bool {
        match kind {
            GeometryKind::Node => self.node.remove(id).is_some(),
            GeometryKind::Group => self.group.remove(id).is_some(),
            GeometryKind::Edge => self.edge.remove(id).is_some(),
        }
    }

    /// Applies every write or none of them.
    pub fn apply(&mut self, batch: ViewStateBatch) -> Result<usize> {
        for (kind, id, geometry) in &batch.writes {
            let fits = matches!(
                (kind, geometry),
                (GeometryKind::Node | GeometryKind::Group, Geometry::Box(_))
                    | (GeometryKind::Edge, Geometry::Waypoints(_))
            );
            if !fits {
                return Err(Error::GeometryMismatch {
                    kind: *kind,
                    id: id.clone(),
                });
            }
        }
        let mut changed = 0usize;
        for (kind, id, geometry) in batch.writes {
            if self.write(kind, &id, geometry)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Drops entries whose owner left the graph and re-files boxes whose
    /// owner switched between leaf and group. Returns the removed ids.
    pub fn retain_graph(&mut self, graph: &DomainGraph) -> Vec<String> {
        let mut removed = Vec::new();
        let mut moved: Vec<(GeometryKind, String, Rect)> = Vec::new();
        for (kind, map) in [
            (GeometryKind::Node, &mut self.node),
            (GeometryKind::Group, &mut self.group),
        ] {
            map.retain(|id, rect| match graph.geometry_kind(id) {
                Some(current) if current == kind => true,
                Some(current) => {
                    moved.push((current, id.clone(), *rect));
                    false
                }
                None => {
                    removed.push(id.clone());
                    false
                }
            });
        }
        for (kind, id, rect) in moved {
            match kind {
                GeometryKind::Group => self.group.insert(id, rect),
                _ => self.node.insert(id, rect),
            };
        }
        self.edge.retain(|id, _| {
            let keep = graph.edge(id).is_some();
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    /// Moves `id` and everything nested in it by the same delta.
    pub fn translate_subtree(&mut self, graph: &DomainGraph, id: &str, dx: f32, dy: f32) -> usize {
        let mut moved = 0usize;
        for member in graph.subtree_ids(id) {
            let Some(kind) = graph.geometry_kind(&member) else {
                continue;
            };
            if let Some(rect) = self.box_of(kind, &member)
                && self.write_box(kind, &member, rect.translate(dx, dy))
            {
                moved += 1;
            }
        }
        moved
    }

    /// Every node and group box, nodes first, each map in id order.
    pub fn boxes(&self) -> impl Iterator<Item = (GeometryKind, &String, &Rect)> {
        self.node
            .iter()
            .map(|(id, rect)| (GeometryKind::Node, id, rect))
            .chain(self.group.iter().map(|(id, rect)| (GeometryKind::Group, id, rect)))
    }
}
