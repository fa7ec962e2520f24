use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::geometry::{PlaneTransform, Point, Rect};

use super::Obstacle;
use super::ports::PortSide;

/// Integer cost multiplier so A* can use u32 costs with fractional cell sizes.
const ASTAR_COST_SCALE: f32 = 100.0;
const MIN_CELL: f32 = 2.0;

const DIRS: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

fn dir_index(side_vector: (f32, f32)) -> u8 {
    match side_vector {
        (x, _) if x < 0.0 => 2,
        (x, _) if x > 0.0 => 3,
        (_, y) if y < 0.0 => 0,
        _ => 1,
    }
}

fn is_horizontal_dir(dir: u8) -> bool {
    dir >= 2
}

/// Uniform grid over the routing area.
///
/// Cell `(ix, iy)` has its center at `to_world.apply((ix, iy))`; the inverse
/// transform maps world points back to fractional cell coordinates.
#[derive(Debug, Clone)]
pub(crate) struct RoutingGrid {
    cell: f32,
    cols: i32,
    rows: i32,
    to_world: PlaneTransform,
    to_grid: PlaneTransform,
    cell_obstacles: Vec<Vec<usize>>,
}

impl RoutingGrid {
    pub(crate) fn new(bounds: Rect, obstacles: &[Obstacle], cell: f32, max_cells: usize) -> Self {
        let mut cell = cell.max(MIN_CELL);
        let total = (bounds.width / cell).ceil().max(1.0) * (bounds.height / cell).ceil().max(1.0);
        if total > max_cells.max(1) as f32 {
            cell *= (total / max_cells.max(1) as f32).sqrt().ceil();
        }
        let cols = (bounds.width / cell).ceil() as i32 + 1;
        let rows = (bounds.height / cell).ceil() as i32 + 1;
        let half = cell / 2.0;
        let to_world = PlaneTransform::fit(
            (0.0, 0.0),
            (bounds.x + half, bounds.y + half),
            (1.0, 1.0),
            (bounds.x + half + cell, bounds.y + half + cell),
        );
        let mut grid = Self {
            cell,
            cols,
            rows,
            to_world,
            to_grid: to_world.invert(),
            cell_obstacles: vec![Vec::new(); (cols * rows) as usize],
        };
        for (idx, obstacle) in obstacles.iter().enumerate() {
            let (x0, y0) = grid.clamp_cell(obstacle.rect.x, obstacle.rect.y);
            let (x1, y1) = grid.clamp_cell(obstacle.rect.right(), obstacle.rect.bottom());
            for iy in y0..=y1 {
                for ix in x0..=x1 {
                    if grid.cell_rect(ix, iy).overlaps(&obstacle.rect) {
                        let cell_idx = grid.index(ix, iy);
                        grid.cell_obstacles[cell_idx].push(idx);
                    }
                }
            }
        }
        grid
    }

    pub(crate) fn cell_size(&self) -> f32 {
        self.cell
    }

    fn index(&self, ix: i32, iy: i32) -> usize {
        (iy * self.cols + ix) as usize
    }

    fn clamp_cell(&self, x: f32, y: f32) -> (i32, i32) {
        let (gx, gy) = self.to_grid.apply((x, y));
        (
            (gx.round() as i32).clamp(0, self.cols - 1),
            (gy.round() as i32).clamp(0, self.rows - 1),
        )
    }

    pub(crate) fn cell_for_point(&self, point: Point) -> Option<(i32, i32)> {
        let (gx, gy) = self.to_grid.apply(point.as_tuple());
        let (ix, iy) = (gx.round() as i32, gy.round() as i32);
        if ix < 0 || iy < 0 || ix >= self.cols || iy >= self.rows {
            return None;
        }
        Some((ix, iy))
    }

    pub(crate) fn cell_center(&self, ix: i32, iy: i32) -> Point {
        Point::from(self.to_world.apply((ix as f32, iy as f32)))
    }

    fn cell_rect(&self, ix: i32, iy: i32) -> Rect {
        let center = self.cell_center(ix, iy);
        let half = self.cell / 2.0;
        Rect::new(center.x - half, center.y - half, self.cell, self.cell)
    }
}

/// Which routed edges already pass through each cell, split by orientation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Occupancy {
    cells: HashMap<(i32, i32), u8>,
}

const OCC_HORIZONTAL: u8 = 1;
const OCC_VERTICAL: u8 = 2;

impl Occupancy {
    pub(crate) fn add_path(&mut self, grid: &RoutingGrid, points: &[Point]) {
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let mask = if (a.y - b.y).abs() <= (a.x - b.x).abs() {
                OCC_HORIZONTAL
            } else {
                OCC_VERTICAL
            };
            let steps = ((a.distance(b) / grid.cell).ceil() as usize).max(1);
            for i in 0..=steps {
                let t = i as f32 / steps as f32;
                let p = Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t);
                if let Some(cell) = grid.cell_for_point(p) {
                    *self.cells.entry(cell).or_insert(0) |= mask;
                }
            }
        }
    }

    fn at(&self, ix: i32, iy: i32) -> u8 {
        self.cells.get(&(ix, iy)).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchCosts {
    pub(crate) segment_penalty: f32,
    pub(crate) bend_penalty: f32,
    pub(crate) crossing_penalty: f32,
    pub(crate) shared_path_penalty: f32,
    pub(crate) hate_crossings: bool,
    pub(crate) max_steps: usize,
}

/// Per-edge view of the grid: which obstacles this edge may pass.
pub(crate) struct SearchRequest<'a> {
    pub(crate) obstacles: &'a [Obstacle],
    pub(crate) exempt: &'a HashSet<&'a str>,
    /// Raw endpoint boxes the path must not enter even though their
    /// buffered obstacles are exempt.
    pub(crate) solid: &'a [Rect],
    pub(crate) start: Point,
    pub(crate) start_side: PortSide,
    pub(crate) end: Point,
    pub(crate) end_side: PortSide,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct GridState {
    x: i32,
    y: i32,
    dir: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct GridEntry {
    est: u32,
    cost: u32,
    goal: bool,
    state: GridState,
}

impl Ord for GridEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .est
            .cmp(&self.est)
            .then_with(|| other.cost.cmp(&self.cost))
            .then_with(|| self.goal.cmp(&other.goal))
            .then_with(|| self.state.y.cmp(&other.state.y))
            .then_with(|| self.state.x.cmp(&other.state.x))
            .then_with(|| self.state.dir.cmp(&other.state.dir))
    }
}

impl PartialOrd for GridEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cost and back-pointer tables reused across searches on one grid.
///
/// Entries are valid only when their stamp matches the current generation,
/// so starting a search never clears the tables.
#[derive(Debug, Default)]
pub(crate) struct SearchScratch {
    generation: u32,
    stamp: Vec<u32>,
    best_cost: Vec<u32>,
    prev: Vec<Option<GridState>>,
}

impl SearchScratch {
    fn begin(&mut self, states: usize) {
        if self.stamp.len() < states {
            self.stamp.resize(states, 0);
            self.best_cost.resize(states, u32::MAX);
            self.prev.resize(states, None);
        }
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.stamp.fill(0);
            self.generation = 1;
        }
    }

    fn cost(&self, idx: usize) -> u32 {
        if self.stamp[idx] == self.generation {
            self.best_cost[idx]
        } else {
            u32::MAX
        }
    }

    fn set(&mut self, idx: usize, cost: u32, prev: Option<GridState>) {
        self.stamp[idx] = self.generation;
        self.best_cost[idx] = cost;
        self.prev[idx] = prev;
    }

    fn prev(&self, idx: usize) -> Option<GridState> {
        if self.stamp[idx] == self.generation {
            self.prev[idx]
        } else {
            None
        }
    }
}

impl RoutingGrid {
    fn blocked(&self, ix: i32, iy: i32, request: &SearchRequest<'_>) -> bool {
        let hit = self.cell_obstacles[self.index(ix, iy)]
            .iter()
            .any(|&idx| !request.exempt.contains(request.obstacles[idx].id.as_str()));
        if hit {
            return true;
        }
        let rect = self.cell_rect(ix, iy);
        request.solid.iter().any(|solid| rect.overlaps(solid))
    }

    /// A* from the cell at `request.start` to the cell at `request.end`.
    ///
    /// The first move leaves in the start port's outward direction; arriving
    /// at the end cell from any direction but straight into the end port
    /// costs one extra bend.
    pub(crate) fn search(
        &self,
        request: &SearchRequest<'_>,
        occupancy: &Occupancy,
        costs: &SearchCosts,
        scratch: &mut SearchScratch,
    ) -> Option<Vec<(i32, i32)>> {
        let (start_ix, start_iy) = self.cell_for_point(request.start)?;
        let (end_ix, end_iy) = self.cell_for_point(request.end)?;
        if (start_ix, start_iy) == (end_ix, end_iy) {
            return Some(vec![(start_ix, start_iy)]);
        }

        let unit = self.cell * ASTAR_COST_SCALE;
        let step_cost = unit.round().max(1.0) as u32;
        let turn_cost = ((costs.bend_penalty + costs.segment_penalty) * unit).round() as u32;
        let crossing_cost = (costs.crossing_penalty * unit).round() as u32;
        let shared_cost = (costs.shared_path_penalty * unit).round() as u32;
        let start_dir = dir_index(request.start_side.outward());
        let (ox, oy) = request.end_side.outward();
        let arrive_dir = dir_index((-ox, -oy));

        let cols = self.cols;
        let states = (self.cols * self.rows * 4) as usize;
        scratch.begin(states);
        let mut heap = BinaryHeap::new();
        let state_idx = |s: GridState| ((s.y * cols + s.x) as usize) * 4 + s.dir as usize;

        let start = GridState {
            x: start_ix,
            y: start_iy,
            dir: start_dir,
        };
        scratch.set(state_idx(start), 0, None);
        heap.push(GridEntry {
            est: 0,
            cost: 0,
            goal: false,
            state: start,
        });

        let mut end_state = None;
        let mut steps = 0usize;
        while let Some(entry) = heap.pop() {
            steps += 1;
            if steps > costs.max_steps {
                break;
            }
            let GridEntry { cost, state, goal, .. } = entry;
            if goal {
                end_state = Some(state);
                break;
            }
            if cost != scratch.cost(state_idx(state)) {
                continue;
            }
            if state.x == end_ix && state.y == end_iy {
                let penalty = if state.dir == arrive_dir { 0 } else { turn_cost };
                let total = cost.saturating_add(penalty);
                heap.push(GridEntry {
                    est: total,
                    cost: total,
                    goal: true,
                    state,
                });
                continue;
            }
            for (dir, (dx, dy)) in DIRS.iter().enumerate() {
                let dir = dir as u8;
                let (nx, ny) = (state.x + dx, state.y + dy);
                if nx < 0 || ny < 0 || nx >= self.cols || ny >= self.rows {
                    continue;
                }
                let is_end = nx == end_ix && ny == end_iy;
                if !is_end && self.blocked(nx, ny, request) {
                    continue;
                }
                let mut next_cost = cost.saturating_add(step_cost);
                if dir != state.dir {
                    next_cost = next_cost.saturating_add(turn_cost);
                }
                let used = occupancy.at(nx, ny);
                if used != 0 {
                    let same = if is_horizontal_dir(dir) {
                        OCC_HORIZONTAL
                    } else {
                        OCC_VERTICAL
                    };
                    if used & same != 0 {
                        next_cost = next_cost.saturating_add(shared_cost);
                    }
                    if costs.hate_crossings && used & !same != 0 {
                        next_cost = next_cost.saturating_add(crossing_cost);
                    }
                }
                let next = GridState { x: nx, y: ny, dir };
                let next_idx = state_idx(next);
                if next_cost >= scratch.cost(next_idx) {
                    continue;
                }
                scratch.set(next_idx, next_cost, Some(state));
                let manhattan = (nx - end_ix).unsigned_abs() + (ny - end_iy).unsigned_abs();
                heap.push(GridEntry {
                    est: next_cost.saturating_add(manhattan.saturating_mul(step_cost)),
                    cost: next_cost,
                    goal: false,
                    state: next,
                });
            }
        }

        let mut cur = end_state?;
        let mut cells = vec![(cur.x, cur.y)];
        while let Some(before) = scratch.prev(state_idx(cur)) {
            cells.push((before.x, before.y));
            cur = before;
        }
        cells.reverse();
        Some(cells)
    }
}
