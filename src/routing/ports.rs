use std::collections::{BTreeMap, HashMap, HashSet};

use crate::geometry::{Point, Rect};
use crate::graph::DomainEdge;

/// Clamping error allowed before a side counts as too short.
const SPACING_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortSide {
    Top,
    Bottom,
    Left,
    Right,
}

impl PortSide {
    /// Unit vector pointing away from the box.
    pub fn outward(self) -> (f32, f32) {
        match self {
            PortSide::Top => (0.0, -1.0),
            PortSide::Bottom => (0.0, 1.0),
            PortSide::Left => (-1.0, 0.0),
            PortSide::Right => (1.0, 0.0),
        }
    }

    /// Left and right ports leave horizontally.
    pub fn exits_horizontally(self) -> bool {
        matches!(self, PortSide::Left | PortSide::Right)
    }
}

/// Parses handle names such as `right`, `source-top` or `left-2`.
pub fn parse_handle(handle: &str) -> Option<PortSide> {
    let lower = handle.trim().to_ascii_lowercase();
    let name = lower
        .strip_prefix("source-")
        .or_else(|| lower.strip_prefix("target-"))
        .unwrap_or(&lower);
    match name.split('-').next()? {
        "top" => Some(PortSide::Top),
        "bottom" => Some(PortSide::Bottom),
        "left" => Some(PortSide::Left),
        "right" => Some(PortSide::Right),
        _ => None,
    }
}

/// Facing sides for two boxes: the axis with the larger gap wins.
pub fn choose_sides(source: &Rect, target: &Rect) -> (PortSide, PortSide) {
    let (sx, sy) = source.center();
    let (tx, ty) = target.center();
    let gap_x = (target.x - source.right()).max(source.x - target.right());
    let gap_y = (target.y - source.bottom()).max(source.y - target.bottom());
    let vertical = if (gap_x - gap_y).abs() < 1e-3 {
        (ty - sy).abs() >= (tx - sx).abs()
    } else {
        gap_y > gap_x
    };
    if vertical {
        if ty >= sy {
            (PortSide::Bottom, PortSide::Top)
        } else {
            (PortSide::Top, PortSide::Bottom)
        }
    } else if tx >= sx {
        (PortSide::Right, PortSide::Left)
    } else {
        (PortSide::Left, PortSide::Right)
    }
}

/// How far an anchor may move from the middle of `side` and stay on it.
fn side_reach(rect: &Rect, side: PortSide) -> f32 {
    let half = if side.exits_horizontally() {
        rect.height / 2.0 - 1.0
    } else {
        rect.width / 2.0 - 1.0
    };
    half.max(0.0)
}

/// Point on the border of `rect` for `side`, shifted along the border by `offset`.
pub fn anchor_point(rect: &Rect, side: PortSide, offset: f32) -> Point {
    let (cx, cy) = rect.center();
    let half = side_reach(rect, side);
    let offset = offset.clamp(-half, half);
    match side {
        PortSide::Left => Point::new(rect.x, cy + offset),
        PortSide::Right => Point::new(rect.right(), cy + offset),
        PortSide::Top => Point::new(cx + offset, rect.y),
        PortSide::Bottom => Point::new(cx + offset, rect.bottom()),
    }
}

pub fn stub_point(anchor: Point, side: PortSide, length: f32) -> Point {
    let (dx, dy) = side.outward();
    Point::new(anchor.x + dx * length, anchor.y + dy * length)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Port {
    pub side: PortSide,
    pub anchor: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgePorts {
    pub source: Port,
    pub target: Port,
    /// One of the ends sits closer than the port spacing to a neighbour
    /// because its side is too short for all of its slots.
    pub crowded: bool,
}

/// Assigns port slots for every edge whose endpoints have boxes.
///
/// Edges sharing a (node, side) pair get slots in edge-list order, centered on
/// the side and `spacing` apart, so re-routing a subset never reorders them.
/// Self loops are left out; they leave from fixed corners. When a side is too
/// short for its slots the outer ones are clamped to the border and every edge
/// on that side is marked crowded.
pub fn assign_ports(
    edges: &[DomainEdge],
    boxes: &HashMap<&str, Rect>,
    spacing: f32,
) -> HashMap<String, EdgePorts> {
    let mut sides: Vec<(usize, PortSide, PortSide)> = Vec::new();
    let mut slots: BTreeMap<(&str, PortSide), Vec<(usize, bool)>> = BTreeMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        if edge.source_id == edge.target_id {
            continue;
        }
        let (Some(source), Some(target)) = (
            boxes.get(edge.source_id.as_str()),
            boxes.get(edge.target_id.as_str()),
        ) else {
            continue;
        };
        let (auto_source, auto_target) = choose_sides(source, target);
        let source_side = edge
            .source_handle
            .as_deref()
            .and_then(parse_handle)
            .unwrap_or(auto_source);
        let target_side = edge
            .target_handle
            .as_deref()
            .and_then(parse_handle)
            .unwrap_or(auto_target);
        sides.push((idx, source_side, target_side));
        slots
            .entry((edge.source_id.as_str(), source_side))
            .or_default()
            .push((idx, true));
        slots
            .entry((edge.target_id.as_str(), target_side))
            .or_default()
            .push((idx, false));
    }

    let mut offsets: HashMap<(usize, bool), f32> = HashMap::new();
    let mut crowded: HashSet<usize> = HashSet::new();
    for (&(node, side), entries) in &slots {
        let center = (entries.len() as f32 - 1.0) / 2.0;
        let reach = boxes.get(node).map(|rect| side_reach(rect, side)).unwrap_or(0.0);
        let extent = center * spacing;
        let cramped = entries.len() > 1 && extent > reach + SPACING_TOLERANCE;
        for (slot, key) in entries.iter().enumerate() {
            offsets.insert(*key, (slot as f32 - center) * spacing);
            if cramped {
                crowded.insert(key.0);
            }
        }
    }

    let mut out = HashMap::with_capacity(sides.len());
    for (idx, source_side, target_side) in sides {
        let edge = &edges[idx];
        let source = boxes[edge.source_id.as_str()];
        let target = boxes[edge.target_id.as_str()];
        let source_offset = offsets.get(&(idx, true)).copied().unwrap_or(0.0);
        let target_offset = offsets.get(&(idx, false)).copied().unwrap_or(0.0);
        out.insert(
            edge.id.clone(),
            EdgePorts {
                source: Port {
                    side: source_side,
                    anchor: anchor_point(&source, source_side, source_offset),
                },
                target: Port {
                    side: target_side,
                    anchor: anchor_point(&target, target_side, target_offset),
                },
                crowded: crowded.contains(&idx),
            },
        );
    }
    out
}
