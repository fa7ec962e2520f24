//! Obstacle-avoiding orthogonal edge routing.
//!
//! Every node and group box, expanded by `shapeBufferDistance`, is an
//! obstacle. An edge may pass its own endpoints and every group that contains
//! one of them; everything else has to be routed around. Paths come from an A*
//! search over a uniform grid and are mapped back to world space through the
//! grid's affine transform.

mod grid;
pub mod ports;

use std::collections::{HashMap, HashSet};

use crate::config::{RoutingConfig, RoutingType};
use crate::error::Error;
use crate::geometry::{Point, Rect, compress_path};
use crate::graph::{DomainEdge, DomainGraph};
use crate::view_state::ViewState;

use grid::{Occupancy, RoutingGrid, SearchCosts, SearchRequest, SearchScratch};
use ports::{EdgePorts, Port, assign_ports};

pub use ports::{PortSide, choose_sides, parse_handle};

// ── Routing area ────────────────────────────────────────────────────
/// Extra cells around the obstacle bounds so paths can go around the outside.
const AREA_MARGIN_CELLS: f32 = 4.0;
/// Upper bound on grid cells; larger areas get coarser cells.
const MAX_GRID_CELLS: usize = 250_000;

// ── Nudging ─────────────────────────────────────────────────────────
/// Collinear runs shorter than this are not worth separating.
const NUDGE_MIN_OVERLAP: f32 = 1.0;
const NUDGE_PASSES: usize = 3;

/// Slack when comparing stored endpoints with recomputed port anchors.
const ANCHOR_TOLERANCE: f32 = 0.5;

#[derive(Debug, Clone)]
pub(crate) struct Obstacle {
    pub(crate) id: String,
    pub(crate) rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradedRoute {
    pub edge: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingReport {
    /// Edges that received new waypoints, in edge-list order.
    pub routed: Vec<String>,
    pub degraded: Vec<DegradedRoute>,
}

impl RoutingReport {
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }

    pub fn errors(&self) -> Vec<Error> {
        self.degraded
            .iter()
            .map(|d| Error::RoutingDegraded {
                edge: d.edge.clone(),
                reason: d.reason.clone(),
            })
            .collect()
    }

    pub fn merge(&mut self, other: RoutingReport) {
        self.routed.extend(other.routed);
        self.degraded.extend(other.degraded);
    }
}

/// A box that moved, appeared or disappeared.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionChange {
    pub id: String,
    pub before: Option<Rect>,
    pub after: Option<Rect>,
}

impl RegionChange {
    pub fn new(id: &str, before: Option<Rect>, after: Option<Rect>) -> Self {
        Self {
            id: id.to_string(),
            before,
            after,
        }
    }
}

/// Boxes and obstacles of one view state, enough to check a stored route.
struct SceneIndex<'a> {
    graph: &'a DomainGraph,
    boxes: HashMap<&'a str, Rect>,
    obstacles: Vec<Obstacle>,
    parents: HashMap<&'a str, &'a str>,
}

impl<'a> SceneIndex<'a> {
    fn new(graph: &'a DomainGraph, view: &ViewState, buffer: f32) -> Self {
        let mut boxes: HashMap<&'a str, Rect> = HashMap::new();
        let mut obstacles = Vec::new();
        for entry in graph.walk() {
            if entry.parent.is_none() {
                continue;
            }
            let id = entry.node.id.as_str();
            let Some(rect) = view.rect(id) else {
                continue;
            };
            boxes.insert(id, rect);
            obstacles.push(Obstacle {
                id: id.to_string(),
                rect: rect.expand(buffer),
            });
        }
        Self {
            graph,
            boxes,
            obstacles,
            parents: graph.parents(),
        }
    }

    /// Ids this edge may pass through: both endpoints and all their ancestors.
    fn exempt<'e>(&'e self, edge: &'e DomainEdge) -> HashSet<&'e str> {
        let mut out = HashSet::new();
        for endpoint in [edge.source_id.as_str(), edge.target_id.as_str()] {
            out.insert(endpoint);
            let mut current = endpoint;
            while let Some(&parent) = self.parents.get(current) {
                out.insert(parent);
                current = parent;
            }
        }
        out
    }

    /// Endpoint boxes the path must stay out of. An endpoint that contains
    /// the other endpoint is left open.
    fn solid(&self, edge: &DomainEdge) -> Vec<Rect> {
        let mut out = Vec::new();
        for (this, other) in [
            (&edge.source_id, &edge.target_id),
            (&edge.target_id, &edge.source_id),
        ] {
            if self.graph.is_descendant(other, this) {
                continue;
            }
            if let Some(rect) = self.boxes.get(this.as_str()) {
                out.push(*rect);
            }
        }
        out
    }

    fn hits(&self, points: &[Point], exempt: &HashSet<&str>) -> usize {
        let mut count = 0usize;
        for pair in points.windows(2) {
            for obstacle in &self.obstacles {
                if exempt.contains(obstacle.id.as_str()) {
                    continue;
                }
                if segment_intersects_rect(pair[0], pair[1], &obstacle.rect) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Whether the stored route of `edge` exists and crosses no obstacle.
    fn stored_route_is_clear(&self, view: &ViewState, edge: &DomainEdge) -> bool {
        match view.waypoints(&edge.id) {
            Some(points) if points.len() >= 2 => self.hits(points, &self.exempt(edge)) == 0,
            _ => false,
        }
    }
}

struct RouteScene<'a> {
    index: SceneIndex<'a>,
    ports: HashMap<String, EdgePorts>,
    grid: RoutingGrid,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeRouter {
    config: RoutingConfig,
}

impl EdgeRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    fn stub_length(&self, cell: f32) -> f32 {
        self.config.shape_buffer_distance + cell
    }

    fn costs(&self) -> SearchCosts {
        SearchCosts {
            segment_penalty: self.config.segment_penalty,
            bend_penalty: self.config.bend_penalty,
            crossing_penalty: self.config.crossing_penalty,
            shared_path_penalty: self.config.shared_path_penalty,
            hate_crossings: self.config.hate_crossings,
            max_steps: self.config.max_steps,
        }
    }

    fn index<'a>(&self, graph: &'a DomainGraph, view: &ViewState) -> SceneIndex<'a> {
        SceneIndex::new(graph, view, self.config.shape_buffer_distance)
    }

    fn scene<'a>(&self, graph: &'a DomainGraph, view: &ViewState) -> Option<RouteScene<'a>> {
        let index = self.index(graph, view);
        let bounds = Rect::bounding(index.obstacles.iter().map(|o| o.rect))?;
        let cell = self.config.grid_cell.max(1.0);
        let margin = cell * AREA_MARGIN_CELLS + self.stub_length(cell) + self.config.port_edge_spacing;
        let grid = RoutingGrid::new(bounds.expand(margin), &index.obstacles, cell, MAX_GRID_CELLS);
        let ports = assign_ports(&graph.edges, &index.boxes, self.config.port_edge_spacing);
        Some(RouteScene { index, ports, grid })
    }

    /// Routes every edge in the graph.
    pub fn route_all(&self, graph: &DomainGraph, view: &mut ViewState) -> RoutingReport {
        let ids: Vec<String> = graph.edges.iter().map(|edge| edge.id.clone()).collect();
        self.route_edges(graph, view, &ids)
    }

    /// Routes the listed edges; other edges keep their waypoints and count as
    /// existing traffic for the crossing and shared-path penalties.
    pub fn route_edges(&self, graph: &DomainGraph, view: &mut ViewState, edge_ids: &[String]) -> RoutingReport {
        let mut report = RoutingReport::default();
        if edge_ids.is_empty() {
            return report;
        }
        let wanted: HashSet<&str> = edge_ids.iter().map(String::as_str).collect();
        let Some(scene) = self.scene(graph, view) else {
            for edge in graph.edges.iter().filter(|edge| wanted.contains(edge.id.as_str())) {
                degrade(&mut report, &edge.id, "no endpoint geometry");
            }
            return report;
        };

        let mut occupancy = Occupancy::default();
        for edge in &graph.edges {
            if wanted.contains(edge.id.as_str()) {
                continue;
            }
            if let Some(points) = view.waypoints(&edge.id) {
                occupancy.add_path(&scene.grid, points);
            }
        }

        let mut scratch = SearchScratch::default();
        let mut routed: Vec<(&DomainEdge, Vec<Point>)> = Vec::new();
        for edge in graph.edges.iter().filter(|edge| wanted.contains(edge.id.as_str())) {
            let (points, degraded) = match self.route_one(&scene, edge, &occupancy, &mut scratch) {
                Ok(points) => (points, None),
                Err((Some(points), reason)) => (points, Some(reason)),
                Err((None, reason)) => {
                    degrade(&mut report, &edge.id, &reason);
                    continue;
                }
            };
            if let Some(reason) = degraded {
                degrade(&mut report, &edge.id, &reason);
            }
            occupancy.add_path(&scene.grid, &points);
            routed.push((edge, points));
        }

        if self.config.nudge_orthogonal_segments && self.config.routing_type == RoutingType::Orthogonal {
            self.nudge(&scene, graph, view, &mut routed);
        }

        for (edge, points) in routed {
            view.write_waypoints(&edge.id, points);
            report.routed.push(edge.id.clone());
        }
        report
    }

    /// `Ok` is a clean route. `Err` carries the best effort (if any) and why
    /// it is not clean.
    fn route_one(
        &self,
        scene: &RouteScene<'_>,
        edge: &DomainEdge,
        occupancy: &Occupancy,
        scratch: &mut SearchScratch,
    ) -> Result<Vec<Point>, (Option<Vec<Point>>, String)> {
        if edge.source_id == edge.target_id {
            let rect = scene
                .index
                .boxes
                .get(edge.source_id.as_str())
                .ok_or((None::<Vec<Point>>, "no endpoint geometry".to_string()))?;
            return self.route_self_loop(scene, edge, rect);
        }
        let ports = scene
            .ports
            .get(&edge.id)
            .ok_or((None::<Vec<Point>>, "no endpoint geometry".to_string()))?;

        let exempt = scene.index.exempt(edge);
        let solid = scene.index.solid(edge);
        let stub = self.stub_length(scene.grid.cell_size());
        let start_stub = ports::stub_point(ports.source.anchor, ports.source.side, stub);
        let end_stub = ports::stub_point(ports.target.anchor, ports.target.side, stub);

        let request = SearchRequest {
            obstacles: &scene.index.obstacles,
            exempt: &exempt,
            solid: &solid,
            start: start_stub,
            start_side: ports.source.side,
            end: end_stub,
            end_side: ports.target.side,
        };
        let searched = scene
            .grid
            .search(&request, occupancy, &self.costs(), scratch)
            .map(|cells| assemble(&scene.grid, ports.source, ports.target, &cells));

        let clear = |points: &[Point]| {
            scene.index.hits(points, &exempt) == 0
                && !points
                    .windows(2)
                    .any(|pair| solid.iter().any(|rect| segment_enters_interior(pair[0], pair[1], rect)))
        };
        let doglegs = dogleg_candidates(ports.source, start_stub, ports.target, end_stub);

        // A clear dogleg with no more bends than the grid path is kept: it is
        // aligned with the ports instead of the cell centers.
        let mut clean: Vec<Vec<Point>> = doglegs.iter().filter(|points| clear(points)).cloned().collect();
        if let Some(points) = &searched
            && scene.index.hits(points, &exempt) == 0
        {
            clean.push(points.clone());
        }
        if !clean.is_empty() {
            let best = best_candidate(clean, |_| 0).points;
            let points = match self.config.routing_type {
                RoutingType::Orthogonal => best,
                RoutingType::Polyline => {
                    let mut seeded = vec![best[0], start_stub];
                    seeded.extend_from_slice(&best[1..best.len() - 1]);
                    seeded.push(end_stub);
                    seeded.push(best[best.len() - 1]);
                    smooth_polyline(&seeded, |a, b| clear(&[a, b]))
                }
            };
            if ports.crowded {
                return Err((Some(points), "port side too short for the edge spacing".to_string()));
            }
            return Ok(points);
        }

        let mut candidates = doglegs;
        if let Some(points) = searched {
            candidates.push(points);
        }
        let best = best_candidate(candidates, |points| scene.index.hits(points, &exempt));
        let reason = if best.hits == 0 {
            "no clear path; best effort enters an endpoint box".to_string()
        } else {
            format!("no obstacle-free path; best effort crosses {} obstacle(s)", best.hits)
        };
        Err((Some(best.points), reason))
    }

    fn route_self_loop(
        &self,
        scene: &RouteScene<'_>,
        edge: &DomainEdge,
        rect: &Rect,
    ) -> Result<Vec<Point>, (Option<Vec<Point>>, String)> {
        let exempt = scene.index.exempt(edge);
        let pad = self.config.shape_buffer_distance + self.config.port_edge_spacing;
        let best = best_candidate(self_loop_candidates(rect, pad), |points| scene.index.hits(points, &exempt));
        if best.hits == 0 {
            Ok(best.points)
        } else {
            Err((
                Some(best.points),
                format!("self loop crosses {} obstacle(s)", best.hits),
            ))
        }
    }

    /// Separates overlapping collinear interior segments of different edges.
    fn nudge(
        &self,
        scene: &RouteScene<'_>,
        graph: &DomainGraph,
        view: &ViewState,
        routed: &mut [(&DomainEdge, Vec<Point>)],
    ) {
        let spacing = self.config.port_edge_spacing;
        if spacing <= 0.0 {
            return;
        }
        let routed_ids: HashSet<&str> = routed.iter().map(|(edge, _)| edge.id.as_str()).collect();
        let fixed: Vec<Vec<Point>> = graph
            .edges
            .iter()
            .filter(|edge| !routed_ids.contains(edge.id.as_str()))
            .filter_map(|edge| view.waypoints(&edge.id).map(<[Point]>::to_vec))
            .collect();

        for _ in 0..NUDGE_PASSES {
            let mut moved = false;
            for j in 0..routed.len() {
                let others: Vec<Vec<Point>> = routed[..j]
                    .iter()
                    .map(|(_, points)| points.clone())
                    .chain(fixed.iter().cloned())
                    .collect();
                let edge = routed[j].0;
                let exempt = scene.index.exempt(edge);
                let solid = scene.index.solid(edge);
                let shifted = nudge_path(&routed[j].1, &others, spacing, |candidate| {
                    scene.index.hits(candidate, &exempt) == 0
                        && !candidate
                            .windows(2)
                            .any(|pair| solid.iter().any(|rect| segment_enters_interior(pair[0], pair[1], rect)))
                });
                if let Some(shifted) = shifted {
                    routed[j].1 = shifted;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
    }

    /// Edges that need re-routing after the given boxes changed.
    ///
    /// That is: edges touching a changed node or anything nested in it, edges
    /// whose current polyline meets an old or new changed region, edges
    /// without waypoints, edges whose port anchors moved, and edges whose stored
    /// route now crosses an obstacle.
    pub fn affected_edges(&self, graph: &DomainGraph, view: &ViewState, changes: &[RegionChange]) -> Vec<String> {
        let buffer = self.config.shape_buffer_distance;
        let mut touched: HashSet<String> = HashSet::new();
        let mut regions: Vec<Rect> = Vec::new();
        for change in changes {
            touched.insert(change.id.clone());
            touched.extend(graph.subtree_ids(&change.id));
            regions.extend(change.before.iter().chain(change.after.iter()).map(|r| r.expand(buffer)));
        }

        let index = self.index(graph, view);
        let ports = assign_ports(&graph.edges, &index.boxes, self.config.port_edge_spacing);

        graph
            .edges
            .iter()
            .filter(|edge| {
                if touched.contains(&edge.source_id) || touched.contains(&edge.target_id) {
                    return true;
                }
                let Some(points) = view.waypoints(&edge.id) else {
                    return true;
                };
                if points.len() < 2 {
                    return true;
                }
                let crosses_region = points.windows(2).any(|pair| {
                    regions
                        .iter()
                        .any(|region| segment_intersects_rect(pair[0], pair[1], region))
                });
                if crosses_region {
                    return true;
                }
                let anchors_moved = ports.get(&edge.id).is_some_and(|port| {
                    let first = points[0];
                    let last = points[points.len() - 1];
                    first.distance(port.source.anchor) > ANCHOR_TOLERANCE
                        || last.distance(port.target.anchor) > ANCHOR_TOLERANCE
                });
                // A reparent can turn a passable group into an obstacle.
                anchors_moved || !index.stored_route_is_clear(view, edge)
            })
            .map(|edge| edge.id.clone())
            .collect()
    }

    /// Re-routes only what `changes` affect.
    pub fn reroute_affected(&self, graph: &DomainGraph, view: &mut ViewState, changes: &[RegionChange]) -> RoutingReport {
        let affected = self.affected_edges(graph, view, changes);
        self.route_edges(graph, view, &affected)
    }

    /// Whether a stored route still satisfies the obstacle rules.
    pub fn is_valid_route(&self, graph: &DomainGraph, view: &ViewState, edge: &DomainEdge) -> bool {
        self.index(graph, view).stored_route_is_clear(view, edge)
    }

    /// Edges whose stored route is missing or crosses an obstacle, checked
    /// against one shared index.
    pub fn stale_routes(&self, graph: &DomainGraph, view: &ViewState) -> Vec<String> {
        let index = self.index(graph, view);
        graph
            .edges
            .iter()
            .filter(|edge| !index.stored_route_is_clear(view, edge))
            .map(|edge| edge.id.clone())
            .collect()
    }
}

fn degrade(report: &mut RoutingReport, edge: &str, reason: &str) {
    tracing::warn!(edge, reason, "routing degraded");
    report.degraded.push(DegradedRoute {
        edge: edge.to_string(),
        reason: reason.to_string(),
    });
}

/// Joins the port anchors to the searched cell path with short elbows.
fn assemble(grid: &RoutingGrid, start: Port, end: Port, cells: &[(i32, i32)]) -> Vec<Point> {
    let mut points = Vec::with_capacity(cells.len() + 4);
    points.push(start.anchor);
    if let Some(&(ix, iy)) = cells.first() {
        let c = grid.cell_center(ix, iy);
        points.push(elbow(start, c));
        points.push(c);
    }
    for &(ix, iy) in cells.iter().skip(1) {
        points.push(grid.cell_center(ix, iy));
    }
    if let Some(&(ix, iy)) = cells.last() {
        points.push(elbow(end, grid.cell_center(ix, iy)));
    }
    points.push(end.anchor);
    compress_path(&points)
}

fn elbow(port: Port, cell_center: Point) -> Point {
    if port.side.exits_horizontally() {
        Point::new(cell_center.x, port.anchor.y)
    } else {
        Point::new(port.anchor.x, cell_center.y)
    }
}

fn dogleg_candidates(start: Port, start_stub: Point, end: Port, end_stub: Point) -> Vec<Vec<Point>> {
    let mid_x = (start_stub.x + end_stub.x) / 2.0;
    let mid_y = (start_stub.y + end_stub.y) / 2.0;
    let bodies = [
        vec![Point::new(end_stub.x, start_stub.y)],
        vec![Point::new(start_stub.x, end_stub.y)],
        vec![Point::new(mid_x, start_stub.y), Point::new(mid_x, end_stub.y)],
        vec![Point::new(start_stub.x, mid_y), Point::new(end_stub.x, mid_y)],
    ];
    bodies
        .into_iter()
        .map(|body| {
            let mut points = vec![start.anchor, start_stub];
            points.extend(body);
            points.push(end_stub);
            points.push(end.anchor);
            compress_path(&points)
        })
        .collect()
}

fn self_loop_candidates(rect: &Rect, pad: f32) -> Vec<Vec<Point>> {
    let (cx, cy) = rect.center();
    let left = Point::new(rect.x, cy);
    let right = Point::new(rect.right(), cy);
    let top = Point::new(cx, rect.y);
    let bottom = Point::new(cx, rect.bottom());
    let left_x = rect.x - pad;
    let right_x = rect.right() + pad;
    let top_y = rect.y - pad;
    let bottom_y = rect.bottom() + pad;
    vec![
        vec![right, Point::new(right_x, cy), Point::new(right_x, top_y), Point::new(cx, top_y), top],
        vec![right, Point::new(right_x, cy), Point::new(right_x, bottom_y), Point::new(cx, bottom_y), bottom],
        vec![left, Point::new(left_x, cy), Point::new(left_x, top_y), Point::new(cx, top_y), top],
        vec![left, Point::new(left_x, cy), Point::new(left_x, bottom_y), Point::new(cx, bottom_y), bottom],
    ]
}

struct Candidate {
    points: Vec<Point>,
    hits: usize,
}

/// Fewest obstacle hits, then fewest bends, then shortest.
fn best_candidate(candidates: Vec<Vec<Point>>, hits: impl Fn(&[Point]) -> usize) -> Candidate {
    let mut best: Option<(usize, usize, f32, Vec<Point>)> = None;
    for points in candidates {
        if points.len() < 2 {
            continue;
        }
        let key = (hits(&points), path_bend_count(&points), path_length(&points));
        let better = match &best {
            None => true,
            Some((h, b, l, _)) => (key.0, key.1) < (*h, *b) || ((key.0, key.1) == (*h, *b) && key.2 < *l),
        };
        if better {
            best = Some((key.0, key.1, key.2, points));
        }
    }
    match best {
        Some((hits, _, _, points)) => Candidate { points, hits },
        // Only reachable with no candidates at all; a zero-length stand-in
        // still gives the renderer two points.
        None => Candidate {
            points: vec![Point::new(0.0, 0.0), Point::new(0.0, 0.0)],
            hits: 0,
        },
    }
}

/// Greedy line-of-sight shortcut over an orthogonal path. The first and last
/// segments are kept so edges still leave their ports head-on.
fn smooth_polyline(points: &[Point], clear: impl Fn(Point, Point) -> bool) -> Vec<Point> {
    if points.len() <= 3 {
        return points.to_vec();
    }
    let last = points.len() - 1;
    let mut out = vec![points[0], points[1]];
    let mut i = 1;
    while i < last - 1 {
        let mut j = last - 1;
        while j > i + 1 && !clear(points[i], points[j]) {
            j -= 1;
        }
        out.push(points[j]);
        i = j;
    }
    out.push(points[last]);
    compress_path(&out)
}

/// Horizontal or vertical interior segment `k` (from `points[k]` to `points[k + 1]`).
fn interior_segments(points: &[Point]) -> impl Iterator<Item = usize> + '_ {
    (1..points.len().saturating_sub(2)).filter(move |&k| {
        let (a, b) = (points[k], points[k + 1]);
        (a.x - b.x).abs() < 1e-3 || (a.y - b.y).abs() < 1e-3
    })
}

fn collinear_overlap(a: (Point, Point), b: (Point, Point), spacing: f32) -> bool {
    let horizontal = |s: (Point, Point)| (s.0.y - s.1.y).abs() < 1e-3;
    let (ha, hb) = (horizontal(a), horizontal(b));
    if ha != hb {
        return false;
    }
    let (coord_a, coord_b, lo_a, hi_a, lo_b, hi_b) = if ha {
        (a.0.y, b.0.y, a.0.x.min(a.1.x), a.0.x.max(a.1.x), b.0.x.min(b.1.x), b.0.x.max(b.1.x))
    } else {
        (a.0.x, b.0.x, a.0.y.min(a.1.y), a.0.y.max(a.1.y), b.0.y.min(b.1.y), b.0.y.max(b.1.y))
    };
    (coord_a - coord_b).abs() < spacing * 0.5 && hi_a.min(hi_b) - lo_a.max(lo_b) > NUDGE_MIN_OVERLAP
}

/// Shifts the first interior segment that runs on top of another path by
/// `spacing` (either way), if `acceptable` allows the result.
fn nudge_path(
    points: &[Point],
    others: &[Vec<Point>],
    spacing: f32,
    acceptable: impl Fn(&[Point]) -> bool,
) -> Option<Vec<Point>> {
    for k in interior_segments(points) {
        let segment = (points[k], points[k + 1]);
        let Some(other) = others.iter().find_map(|other| {
            other
                .windows(2)
                .map(|pair| (pair[0], pair[1]))
                .find(|&candidate| collinear_overlap(segment, candidate, spacing))
        }) else {
            continue;
        };
        let horizontal = (segment.0.y - segment.1.y).abs() < 1e-3;
        let base = if horizontal { other.0.y } else { other.0.x };
        for delta in [spacing, -spacing] {
            let mut shifted = points.to_vec();
            for idx in [k, k + 1] {
                if horizontal {
                    shifted[idx].y = base + delta;
                } else {
                    shifted[idx].x = base + delta;
                }
            }
            let overlaps_again = others.iter().any(|other| {
                other
                    .windows(2)
                    .any(|pair| collinear_overlap((shifted[k], shifted[k + 1]), (pair[0], pair[1]), spacing))
            });
            if !overlaps_again && acceptable(&shifted) {
                return Some(shifted);
            }
        }
    }
    None
}

pub fn path_length(points: &[Point]) -> f32 {
    points.windows(2).map(|pair| pair[0].distance(pair[1])).sum()
}

pub fn path_bend_count(points: &[Point]) -> usize {
    if points.len() < 3 {
        return 0;
    }
    let mut bends = 0usize;
    for idx in 1..points.len() - 1 {
        let (p0, p1, p2) = (points[idx - 1], points[idx], points[idx + 1]);
        let (dx1, dy1) = (p1.x - p0.x, p1.y - p0.y);
        let (dx2, dy2) = (p2.x - p1.x, p2.y - p1.y);
        if (dx1.abs() <= 1e-4 && dy1.abs() <= 1e-4) || (dx2.abs() <= 1e-4 && dy2.abs() <= 1e-4) {
            continue;
        }
        if (dx1 * dy2 - dy1 * dx2).abs() > 1e-4 {
            bends += 1;
        }
    }
    bends
}

pub fn is_orthogonal(points: &[Point]) -> bool {
    points
        .windows(2)
        .all(|pair| (pair[0].x - pair[1].x).abs() < 1e-3 || (pair[0].y - pair[1].y).abs() < 1e-3)
}

/// Closed test: touching the border counts.
pub fn segment_intersects_rect(a: Point, b: Point, rect: &Rect) -> bool {
    let (min_x, max_x) = (a.x.min(b.x), a.x.max(b.x));
    let (min_y, max_y) = (a.y.min(b.y), a.y.max(b.y));
    if max_x < rect.x || min_x > rect.right() || max_y < rect.y || min_y > rect.bottom() {
        return false;
    }
    if rect.contains_point(a.x, a.y) || rect.contains_point(b.x, b.y) {
        return true;
    }
    let corners = [
        Point::new(rect.x, rect.y),
        Point::new(rect.right(), rect.y),
        Point::new(rect.right(), rect.bottom()),
        Point::new(rect.x, rect.bottom()),
    ];
    (0..4).any(|i| segments_intersect(a, b, corners[i], corners[(i + 1) % 4]))
}

/// Whether the segment passes through the open interior of `rect`.
fn segment_enters_interior(a: Point, b: Point, rect: &Rect) -> bool {
    let inner = rect.expand(-0.5);
    inner.width > 0.0 && inner.height > 0.0 && segment_intersects_rect(a, b, &inner)
}

pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    fn orient(a: Point, b: Point, c: Point) -> f32 {
        (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
    }
    fn on_segment(a: Point, b: Point, c: Point) -> bool {
        c.x >= a.x.min(b.x) - 1e-6
            && c.x <= a.x.max(b.x) + 1e-6
            && c.y >= a.y.min(b.y) - 1e-6
            && c.y <= a.y.max(b.y) + 1e-6
    }
    let o1 = orient(a, b, c);
    let o2 = orient(a, b, d);
    let o3 = orient(c, d, a);
    let o4 = orient(c, d, b);
    if ((o1 > 0.0 && o2 < 0.0) || (o1 < 0.0 && o2 > 0.0)) && ((o3 > 0.0 && o4 < 0.0) || (o3 < 0.0 && o4 > 0.0)) {
        return true;
    }
    (o1.abs() <= 1e-6 && on_segment(a, b, c))
        || (o2.abs() <= 1e-6 && on_segment(a, b, d))
        || (o3.abs() <= 1e-6 && on_segment(c, d, a))
        || (o4.abs() <= 1e-6 && on_segment(c, d, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DomainNode;
    use crate::view_state::GeometryKind;

    fn scene(boxes: &[(&str, Rect)], edges: &[(&str, &str, &str)]) -> (DomainGraph, ViewState) {
        let mut graph = DomainGraph::new();
        let mut view = ViewState::new(0.0);
        for (id, rect) in boxes {
            graph.root.children.push(DomainNode::leaf(id, id));
            view.write_box(GeometryKind::Node, id, *rect);
        }
        for (id, source, target) in edges {
            graph.edges.push(DomainEdge::new(id, source, target));
        }
        (graph, view)
    }

    fn assert_clear(points: &[Point], obstacle: &Rect, buffer: f32) {
        let expanded = obstacle.expand(buffer);
        for pair in points.windows(2) {
            assert!(
                !segment_intersects_rect(pair[0], pair[1], &expanded),
                "segment {:?}->{:?} hits {:?}",
                pair[0],
                pair[1],
                expanded
            );
        }
    }

    #[test]
    fn straight_route_between_aligned_boxes() {
        let (graph, mut view) = scene(
            &[
                ("A", Rect::new(0.0, 0.0, 100.0, 50.0)),
                ("B", Rect::new(300.0, 0.0, 100.0, 50.0)),
            ],
            &[("e1", "A", "B")],
        );
        let router = EdgeRouter::default();
        let report = router.route_all(&graph, &mut view);
        assert!(report.is_clean(), "{report:?}");
        let points = view.waypoints("e1").unwrap();
        assert!(points.len() >= 2);
        assert_eq!(points[0], Point::new(100.0, 25.0));
        assert_eq!(points[points.len() - 1], Point::new(300.0, 25.0));
        assert!(is_orthogonal(points));
    }

    #[test]
    fn routes_around_a_blocking_box() {
        let blocker = Rect::new(150.0, -40.0, 100.0, 130.0);
        let (graph, mut view) = scene(
            &[
                ("A", Rect::new(0.0, 0.0, 100.0, 50.0)),
                ("C", blocker),
                ("B", Rect::new(300.0, 0.0, 100.0, 50.0)),
            ],
            &[("e1", "A", "B")],
        );
        let router = EdgeRouter::default();
        let report = router.route_all(&graph, &mut view);
        assert!(report.is_clean(), "{report:?}");
        let points = view.waypoints("e1").unwrap();
        assert!(points.len() > 2);
        assert!(is_orthogonal(points));
        assert_clear(points, &blocker, router.config().shape_buffer_distance);
    }

    #[test]
    fn enclosing_group_is_passable() {
        let mut graph = DomainGraph::new();
        graph.root.children.push(DomainNode::group(
            "G",
            "G",
            vec![DomainNode::leaf("A", "A"), DomainNode::leaf("B", "B")],
        ));
        graph.edges.push(DomainEdge::new("e1", "A", "B"));
        let mut view = ViewState::new(0.0);
        view.write_box(GeometryKind::Group, "G", Rect::new(0.0, 0.0, 500.0, 200.0));
        view.write_box(GeometryKind::Node, "A", Rect::new(40.0, 80.0, 100.0, 50.0));
        view.write_box(GeometryKind::Node, "B", Rect::new(340.0, 80.0, 100.0, 50.0));
        let report = EdgeRouter::default().route_all(&graph, &mut view);
        assert!(report.is_clean(), "{report:?}");
        let points = view.waypoints("e1").unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn self_loops_get_a_corner_route() {
        let (graph, mut view) = scene(&[("A", Rect::new(0.0, 0.0, 100.0, 50.0))], &[("loop", "A", "A")]);
        let report = EdgeRouter::default().route_all(&graph, &mut view);
        assert!(report.is_clean());
        assert_eq!(view.waypoints("loop").unwrap().len(), 5);
    }

    #[test]
    fn polyline_shortcuts_clear_diagonals() {
        let (graph, mut view) = scene(
            &[
                ("A", Rect::new(0.0, 0.0, 100.0, 50.0)),
                ("B", Rect::new(300.0, 300.0, 100.0, 50.0)),
            ],
            &[("e1", "A", "B")],
        );
        let config = RoutingConfig {
            routing_type: RoutingType::Polyline,
            ..RoutingConfig::default()
        };
        let mut orth_view = view.clone();
        EdgeRouter::default().route_all(&graph, &mut orth_view);
        EdgeRouter::new(config).route_all(&graph, &mut view);
        let poly = view.waypoints("e1").unwrap();
        let orth = orth_view.waypoints("e1").unwrap();
        assert!(poly.len() <= orth.len());
        assert!(path_length(poly) <= path_length(orth) + 1e-3);
    }

    #[test]
    fn affected_edges_follow_moves_and_missing_routes() {
        let (graph, mut view) = scene(
            &[
                ("A", Rect::new(0.0, 0.0, 100.0, 50.0)),
                ("B", Rect::new(300.0, 0.0, 100.0, 50.0)),
                ("C", Rect::new(0.0, 300.0, 100.0, 50.0)),
                ("D", Rect::new(300.0, 300.0, 100.0, 50.0)),
            ],
            &[("e1", "A", "B"), ("e2", "C", "D")],
        );
        let router = EdgeRouter::default();
        router.route_all(&graph, &mut view);
        assert!(router.affected_edges(&graph, &view, &[]).is_empty());

        let before = view.rect("C");
        view.write_position(GeometryKind::Node, "C", 0.0, 400.0).unwrap();
        let changes = [RegionChange::new("C", before, view.rect("C"))];
        assert_eq!(router.affected_edges(&graph, &view, &changes), vec!["e2".to_string()]);

        view.remove(GeometryKind::Edge, "e1");
        let affected = router.affected_edges(&graph, &view, &changes);
        assert_eq!(affected, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn stale_routes_flag_missing_and_blocked_routes() {
        let (graph, mut view) = scene(
            &[
                ("A", Rect::new(0.0, 0.0, 100.0, 50.0)),
                ("B", Rect::new(300.0, 0.0, 100.0, 50.0)),
                ("C", Rect::new(0.0, 300.0, 100.0, 50.0)),
                ("D", Rect::new(300.0, 300.0, 100.0, 50.0)),
            ],
            &[("e1", "A", "B"), ("e2", "C", "D")],
        );
        let router = EdgeRouter::default();
        router.route_all(&graph, &mut view);
        assert!(router.stale_routes(&graph, &view).is_empty());

        // C now sits across the straight run of e1; e2 follows it and is gone.
        view.write_position(GeometryKind::Node, "C", 150.0, 0.0).unwrap();
        view.remove(GeometryKind::Edge, "e2");
        assert_eq!(router.stale_routes(&graph, &view), vec!["e1".to_string(), "e2".to_string()]);
        assert!(!router.is_valid_route(&graph, &view, &graph.edges[0]));
    }

    #[test]
    fn leaving_a_group_makes_its_route_stale() {
        let mut graph = DomainGraph::new();
        graph
            .root
            .children
            .push(DomainNode::group("G", "G", vec![DomainNode::leaf("A", "A")]));
        graph.root.children.push(DomainNode::leaf("B", "B"));
        graph.edges.push(DomainEdge::new("e1", "A", "B"));
        let mut view = ViewState::new(0.0);
        view.write_box(GeometryKind::Group, "G", Rect::new(0.0, 0.0, 200.0, 140.0));
        view.write_box(GeometryKind::Node, "A", Rect::new(20.0, 60.0, 120.0, 48.0));
        view.write_box(GeometryKind::Node, "B", Rect::new(400.0, 60.0, 120.0, 48.0));
        let router = EdgeRouter::default();
        assert!(router.route_all(&graph, &mut view).is_clean());
        assert!(router.affected_edges(&graph, &view, &[]).is_empty());

        let moved = crate::mutation::move_node(&graph, "A", crate::graph::ROOT_ID).unwrap();
        assert_eq!(router.affected_edges(&moved, &view, &[]), vec!["e1".to_string()]);
    }

    #[test]
    fn over_full_port_side_degrades_its_edges() {
        let mut graph = DomainGraph::new();
        let mut view = ViewState::new(0.0);
        graph.root.children.push(DomainNode::leaf("A", "A"));
        view.write_box(GeometryKind::Node, "A", Rect::new(0.0, 0.0, 120.0, 48.0));
        for i in 0..6 {
            let target = format!("T{i}");
            graph.root.children.push(DomainNode::leaf(&target, &target));
            view.write_box(
                GeometryKind::Node,
                &target,
                Rect::new(500.0, i as f32 * 100.0 - 250.0, 100.0, 48.0),
            );
            let mut edge = DomainEdge::new(&format!("e{i}"), "A", &target);
            edge.source_handle = Some("right".to_string());
            graph.edges.push(edge);
        }

        let report = EdgeRouter::default().route_all(&graph, &mut view);
        assert_eq!(report.routed.len(), 6);
        let degraded: Vec<&str> = report.degraded.iter().map(|d| d.edge.as_str()).collect();
        assert_eq!(degraded, vec!["e0", "e1", "e2", "e3", "e4", "e5"]);
        assert!(report.errors().iter().all(|err| matches!(err, Error::RoutingDegraded { .. })));
    }

    #[test]
    fn nudge_separates_shared_runs() {
        let a = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 50.0),
            Point::new(200.0, 50.0),
            Point::new(200.0, 100.0),
        ];
        let b = vec![
            Point::new(10.0, 0.0),
            Point::new(10.0, 50.0),
            Point::new(210.0, 50.0),
            Point::new(210.0, 100.0),
        ];
        let shifted = nudge_path(&b, &[a], 10.0, |_| true).unwrap();
        assert_eq!(shifted[1].y, 60.0);
        assert_eq!(shifted[2].y, 60.0);
        assert!(is_orthogonal(&shifted));
    }

    #[test]
    fn best_candidate_prefers_fewer_hits_then_bends() {
        let straight = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        let bent = vec![Point::new(0.0, 0.0), Point::new(0.0, 5.0), Point::new(10.0, 5.0)];
        let best = best_candidate(vec![bent.clone(), straight.clone()], |_| 0);
        assert_eq!(best.points, straight);
        let best = best_candidate(vec![bent.clone(), straight], |p| if p.len() == 2 { 1 } else { 0 });
        assert_eq!(best.points, bent);
    }

    #[test]
    fn segment_rect_intersection() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(segment_intersects_rect(Point::new(-5.0, 5.0), Point::new(15.0, 5.0), &rect));
        assert!(!segment_intersects_rect(Point::new(-5.0, 15.0), Point::new(15.0, 15.0), &rect));
        assert!(!segment_enters_interior(Point::new(-5.0, 10.0), Point::new(15.0, 10.0), &rect));
    }
}
