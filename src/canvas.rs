//! The canvas service: one graph, its view state and the machinery that keeps
//! them consistent.
//!
//! Structural edits go through [`Canvas::apply`] and publish a new
//! [`GraphRevision`]; layout runs are explicit ([`Canvas::relayout`]) and live
//! drags are plain view state writes followed by a scoped routing pass. A
//! structural edit that lands while a run is in flight supersedes it and queues
//! a run for the new shape, handed out by the next [`Canvas::begin_layout`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{Rect, snap_grid};
use crate::graph::{DomainGraph, ROOT_ID};
use crate::hash::{StructuralHash, structural_hash};
use crate::layout::{CoarseRoute, DagreLayout, HierarchicalLayout};
use crate::mutation::{self, Operation};
use crate::render::{RenderAdapter, RenderMode, RenderScene};
use crate::routing::{EdgeRouter, RegionChange, RoutingReport};
use crate::scheduler::{CommitMode, LayoutCompletion, LayoutJob, LayoutOutcome, LayoutScheduler, settle_groups};
use crate::snapshot::Snapshot;
use crate::validate::validate;
use crate::view_state::{GeometryKind, ViewState};

/// Published whenever the graph structure changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRevision {
    pub hash: StructuralHash,
    /// Increments on every structural change.
    pub revision: u64,
}

pub struct Canvas {
    config: Config,
    graph: DomainGraph,
    view: ViewState,
    scheduler: LayoutScheduler,
    /// Run started because the graph changed under an in-flight one.
    pending: Option<LayoutJob>,
    router: EdgeRouter,
    renderer: RenderAdapter,
    coarse: BTreeMap<String, CoarseRoute>,
    next_mode: CommitMode,
    revision: u64,
    events: watch::Sender<GraphRevision>,
    last_routing: RoutingReport,
}

impl Canvas {
    pub fn init(config: Config) -> Self {
        let engine = Arc::new(DagreLayout::new(config.layout.clone()));
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: Config, engine: Arc<dyn HierarchicalLayout>) -> Self {
        let graph = DomainGraph::new();
        let (events, _) = watch::channel(GraphRevision {
            hash: structural_hash(&graph),
            revision: 0,
        });
        tracing::debug!("canvas initialized");
        Self {
            scheduler: LayoutScheduler::new(engine, config.layout.clone()),
            pending: None,
            router: EdgeRouter::new(config.routing.clone()),
            renderer: RenderAdapter::new(RenderMode::from(&config.render)),
            view: ViewState::new(config.layout.grid_size),
            graph,
            config,
            coarse: BTreeMap::new(),
            next_mode: CommitMode::Full,
            revision: 0,
            events,
            last_routing: RoutingReport::default(),
        }
    }

    /// Tears the canvas down and hands back its final state.
    pub fn dispose(self) -> Snapshot {
        tracing::debug!(revision = self.revision, "canvas disposed");
        Snapshot::new(self.graph, self.view)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &DomainGraph {
        &self.graph
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn revision(&self) -> GraphRevision {
        self.events.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GraphRevision> {
        self.events.subscribe()
    }

    /// Report of the most recent routing pass.
    pub fn routing_report(&self) -> &RoutingReport {
        &self.last_routing
    }

    pub fn scheduler(&self) -> &LayoutScheduler {
        &self.scheduler
    }

    pub fn apply(&mut self, op: &Operation) -> Result<GraphRevision> {
        let next = mutation::apply(&self.graph, op)?;
        Ok(self.set_graph_reparenting(next))
    }

    pub fn apply_batch(&mut self, operations: &[Operation]) -> Result<GraphRevision> {
        let next = mutation::batch_update(&self.graph, operations)?;
        Ok(self.set_graph_reparenting(next))
    }

    /// Like `set_graph`, then drops the boxes of reparented nodes that no
    /// longer fit their new scope so the next layout places them again.
    fn set_graph_reparenting(&mut self, next: DomainGraph) -> GraphRevision {
        let before: HashMap<String, String> = self
            .graph
            .parents()
            .into_iter()
            .map(|(id, parent)| (id.to_string(), parent.to_string()))
            .collect();
        let revision = self.set_graph(next);
        let moved: Vec<String> = self
            .graph
            .parents()
            .into_iter()
            .filter(|(id, parent)| before.get(*id).is_some_and(|old| old.as_str() != *parent))
            .map(|(id, _)| id.to_string())
            .collect();
        for id in moved {
            if self.fits_parent(&id) {
                continue;
            }
            tracing::debug!(node = %id, "reparented node released for placement");
            for member in self.graph.subtree_ids(&id) {
                if let Some(kind) = self.graph.geometry_kind(&member) {
                    self.view.remove(kind, &member);
                }
            }
        }
        revision
    }

    /// Whether a node's box sits inside its parent and clear of its siblings.
    fn fits_parent(&self, id: &str) -> bool {
        let Some(rect) = self.view.rect(id) else {
            return true;
        };
        let Some(parent) = self.graph.parent_of(id) else {
            return true;
        };
        if parent != ROOT_ID {
            match self.view.rect(parent) {
                Some(scope) if !scope.contains_rect(&rect, 0.5) => return false,
                Some(_) => {}
                None => return true,
            }
        }
        self.graph.node(parent).is_none_or(|node| {
            node.children
                .iter()
                .filter(|child| child.id != id)
                .filter_map(|child| self.view.rect(&child.id))
                .all(|sibling| !sibling.overlaps(&rect))
        })
    }

    /// Swaps in a whole new graph; the next layout is a full one.
    pub fn replace_graph(&mut self, document: &str) -> Result<GraphRevision> {
        let next = mutation::replace_graph(document)?;
        self.next_mode = CommitMode::Full;
        self.coarse.clear();
        Ok(self.set_graph(next))
    }

    fn set_graph(&mut self, next: DomainGraph) -> GraphRevision {
        let hash = structural_hash(&next);
        self.graph = next;
        if self.scheduler.is_running() && self.scheduler.latest() != Some(&hash) {
            // Refusals are logged and recorded as Failed by the scheduler.
            self.pending = self.scheduler.submit(&self.graph).ok().flatten();
        }
        let removed = self.view.retain_graph(&self.graph);
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "dropped geometry of removed elements");
        }
        if self.events.borrow().hash != hash {
            self.revision += 1;
            self.events.send_replace(GraphRevision {
                hash,
                revision: self.revision,
            });
        }
        self.revision()
    }

    /// Hands out the run queued by a mid-flight edit, or starts one for the
    /// current graph unless the same shape is already running or committed.
    pub fn begin_layout(&mut self) -> Result<Option<LayoutJob>> {
        if let Some(job) = self.pending.take() {
            return Ok(Some(job));
        }
        self.scheduler.submit(&self.graph)
    }

    /// Whether a queued run is waiting for [`Canvas::begin_layout`].
    pub fn has_pending_layout(&self) -> bool {
        self.pending.is_some()
    }

    /// Settles a finished run and, when it is committed, re-routes edges.
    pub fn finish_layout(&mut self, completion: LayoutCompletion) -> LayoutOutcome {
        let routes = completion.result.as_ref().ok().map(|result| result.routes.clone());
        let before: BTreeMap<String, Rect> = self.view.boxes().map(|(_, id, rect)| (id.clone(), *rect)).collect();
        let mode = self.next_mode;
        let outcome = self.scheduler.complete(completion, &self.graph, &mut self.view, mode);
        if let LayoutOutcome::Committed { changed, .. } = &outcome {
            self.coarse = routes.unwrap_or_default();
            self.next_mode = CommitMode::Preserve;
            self.last_routing = match mode {
                CommitMode::Full => self.router.route_all(&self.graph, &mut self.view),
                CommitMode::Preserve => {
                    let changes: Vec<RegionChange> = changed
                        .iter()
                        .map(|id| RegionChange::new(id, before.get(id).copied(), self.view.rect(id)))
                        .collect();
                    self.router.reroute_affected(&self.graph, &mut self.view, &changes)
                }
            };
        }
        outcome
    }

    /// Runs a layout on the blocking pool and commits it. `None` when the
    /// current shape is already laid out.
    pub async fn relayout(&mut self) -> Result<Option<LayoutOutcome>> {
        let Some(job) = self.begin_layout()? else {
            return Ok(None);
        };
        self.run_job(job).await.map(Some)
    }

    /// Full re-layout even when nothing changed structurally.
    pub async fn tidy(&mut self) -> Result<LayoutOutcome> {
        self.pending = None;
        let job = self.scheduler.force(&self.graph)?;
        self.next_mode = CommitMode::Full;
        self.run_job(job).await
    }

    async fn run_job(&mut self, job: LayoutJob) -> Result<LayoutOutcome> {
        let completion = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|err| Error::LayoutTask(err.to_string()))?;
        Ok(self.finish_layout(completion))
    }

    fn box_kind(&self, id: &str) -> Result<GeometryKind> {
        if id == ROOT_ID {
            return Err(Error::RootImmutable("moved"));
        }
        self.graph
            .geometry_kind(id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))
    }

    fn subtree_boxes(&self, id: &str) -> Vec<(String, Option<Rect>)> {
        self.graph
            .subtree_ids(id)
            .into_iter()
            .map(|member| {
                let rect = self.view.rect(&member);
                (member, rect)
            })
            .collect()
    }

    fn reroute_after(&mut self, before: Vec<(String, Option<Rect>)>) -> RoutingReport {
        let changes: Vec<RegionChange> = before
            .into_iter()
            .filter_map(|(id, old)| {
                let new = self.view.rect(&id);
                (old != new).then(|| RegionChange::new(&id, old, new))
            })
            .collect();
        let report = self.router.reroute_affected(&self.graph, &mut self.view, &changes);
        self.last_routing = report.clone();
        report
    }

    /// Live drag: moves the box (and anything nested in it) so its top-left
    /// corner lands on `(x, y)`. Siblings stay where they are.
    pub fn drag_node(&mut self, id: &str, x: f32, y: f32) -> Result<RoutingReport> {
        let kind = self.box_kind(id)?;
        let rect = self.view.box_of(kind, id).ok_or_else(|| Error::MissingGeometry {
            kind,
            id: id.to_string(),
        })?;
        let grid = self.view.grid_size();
        let dx = snap_grid(x, grid) - rect.x;
        let dy = snap_grid(y, grid) - rect.y;
        let before = self.subtree_boxes(id);
        self.view.translate_subtree(&self.graph, id, dx, dy);
        Ok(self.reroute_after(before))
    }

    /// Finishes a drag. The deepest group whose box holds the node's center
    /// (other than the node and its own descendants) becomes its parent; the
    /// node keeps the position it was dropped at and the new ancestors grow.
    /// Returns the new revision when the parent changed.
    pub fn drop_node(&mut self, id: &str) -> Result<Option<GraphRevision>> {
        let kind = self.box_kind(id)?;
        let rect = self.view.box_of(kind, id).ok_or_else(|| Error::MissingGeometry {
            kind,
            id: id.to_string(),
        })?;
        let (cx, cy) = rect.center();
        let own: Vec<String> = self.graph.subtree_ids(id);
        let target = self
            .graph
            .walk()
            .into_iter()
            .filter(|entry| entry.parent.is_some() && entry.node.is_group)
            .filter(|entry| !own.contains(&entry.node.id))
            .filter(|entry| {
                self.view
                    .box_of(GeometryKind::Group, &entry.node.id)
                    .is_some_and(|group| group.contains_point(cx, cy))
            })
            .max_by_key(|entry| entry.depth)
            .map(|entry| entry.node.id.clone())
            .unwrap_or_else(|| ROOT_ID.to_string());

        let current = self.graph.parent_of(id).map(str::to_string);
        let revision = if current.as_deref() != Some(target.as_str()) {
            let next = mutation::move_node(&self.graph, id, &target)?;
            tracing::debug!(node = id, parent = %target, "node dropped into new parent");
            Some(self.set_graph(next))
        } else {
            None
        };

        let mut before = self.subtree_boxes(id);
        before.extend(
            self.graph
                .ancestors(id)
                .into_iter()
                .filter(|ancestor| ancestor != ROOT_ID)
                .map(|ancestor| {
                    let rect = self.view.rect(&ancestor);
                    (ancestor, rect)
                }),
        );
        settle_groups(&self.graph, &mut self.view, &self.config.layout);
        self.reroute_after(before);
        Ok(revision)
    }

    /// Sets a box's size, keeping its top-left corner; enclosing groups grow.
    pub fn resize_node(&mut self, id: &str, width: f32, height: f32) -> Result<RoutingReport> {
        let kind = self.box_kind(id)?;
        let rect = self.view.box_of(kind, id).ok_or_else(|| Error::MissingGeometry {
            kind,
            id: id.to_string(),
        })?;
        let mut before = vec![(id.to_string(), Some(rect))];
        before.extend(
            self.graph
                .ancestors(id)
                .into_iter()
                .filter(|ancestor| ancestor != ROOT_ID)
                .map(|ancestor| {
                    let rect = self.view.rect(&ancestor);
                    (ancestor, rect)
                }),
        );
        self.view
            .write_box(kind, id, Rect::new(rect.x, rect.y, width.max(1.0), height.max(1.0)));
        settle_groups(&self.graph, &mut self.view, &self.config.layout);
        Ok(self.reroute_after(before))
    }

    /// Routes every edge from scratch.
    pub fn reroute_all(&mut self) -> RoutingReport {
        self.last_routing = self.router.route_all(&self.graph, &mut self.view);
        self.last_routing.clone()
    }

    pub fn render(&self) -> Result<RenderScene> {
        self.renderer.project(&self.graph, &self.view, Some(&self.coarse))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.graph.clone(), self.view.clone())
    }

    /// Loads a snapshot. Boxes come back exactly as saved; edges whose stored
    /// route is missing or no longer clear are routed again.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<RoutingReport> {
        validate(&snapshot.domain_graph)?;
        let Snapshot {
            domain_graph,
            mut view_state,
            ..
        } = snapshot;
        view_state.set_grid_size(self.config.layout.grid_size);
        self.view = view_state;
        self.coarse.clear();
        self.next_mode = CommitMode::Preserve;
        self.set_graph(domain_graph);

        let stale = self.router.stale_routes(&self.graph, &self.view);
        let report = self.router.route_edges(&self.graph, &mut self.view, &stale);
        self.last_routing = report.clone();
        Ok(report)
    }
}
