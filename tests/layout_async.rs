use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use boxline::layout::{DagreLayout, HierarchicalLayout, LayoutResult};
use boxline::scheduler::LayoutState;
use boxline::{Canvas, Config, DomainGraph, Error, LayoutOutcome, Operation, ROOT_ID, Result};

fn add_node(id: &str) -> Operation {
    Operation::AddNode {
        parent_id: ROOT_ID.to_string(),
        node_id: id.to_string(),
        label: id.to_string(),
        is_group: false,
    }
}

/// Counts how often the layout engine actually runs.
struct CountingLayout {
    inner: DagreLayout,
    runs: Arc<AtomicUsize>,
}

impl HierarchicalLayout for CountingLayout {
    fn layout(&self, graph: &DomainGraph) -> Result<LayoutResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.layout(graph)
    }
}

struct PanickingLayout;

impl HierarchicalLayout for PanickingLayout {
    fn layout(&self, _graph: &DomainGraph) -> Result<LayoutResult> {
        panic!("layout engine exploded");
    }
}

#[tokio::test]
async fn revisions_are_published_on_structural_change() {
    let mut canvas = Canvas::init(Config::default());
    let mut rx = canvas.subscribe();
    canvas.apply(&add_node("A")).unwrap();
    rx.changed().await.unwrap();
    let seen = rx.borrow_and_update().clone();
    assert_eq!(seen.revision, 1);
    assert_eq!(seen, canvas.revision());

    canvas.relayout().await.unwrap();
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn unchanged_graph_does_not_run_the_engine_again() {
    let runs = Arc::new(AtomicUsize::new(0));
    let config = Config::default();
    let engine = CountingLayout {
        inner: DagreLayout::new(config.layout.clone()),
        runs: Arc::clone(&runs),
    };
    let mut canvas = Canvas::with_engine(config, Arc::new(engine));
    canvas.apply(&add_node("A")).unwrap();
    assert!(canvas.relayout().await.unwrap().is_some());
    assert!(canvas.relayout().await.unwrap().is_none());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    canvas.tidy().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn superseded_runs_finish_without_side_effects() {
    let mut canvas = Canvas::init(Config::default());
    canvas.apply(&add_node("A")).unwrap();
    let stale = canvas.begin_layout().unwrap().unwrap();
    let stale_task = tokio::task::spawn_blocking(move || stale.run());

    canvas.apply(&add_node("B")).unwrap();
    let fresh = canvas.begin_layout().unwrap().unwrap();
    let fresh_task = tokio::task::spawn_blocking(move || fresh.run());

    let fresh_done = fresh_task.await.unwrap();
    let stale_done = stale_task.await.unwrap();

    let outcome = canvas.finish_layout(fresh_done);
    let LayoutOutcome::Committed { changed, .. } = outcome else {
        panic!("expected a commit, got {outcome:?}");
    };
    assert_eq!(changed, vec!["A".to_string(), "B".to_string()]);
    let settled = canvas.view().clone();

    assert!(matches!(canvas.finish_layout(stale_done), LayoutOutcome::Superseded { .. }));
    assert_eq!(canvas.view(), &settled);
}

#[tokio::test]
async fn edits_during_a_run_queue_a_fresh_one() {
    let mut canvas = Canvas::init(Config::default());
    canvas.apply(&add_node("A")).unwrap();
    let stale = canvas.begin_layout().unwrap().unwrap();

    canvas.apply(&add_node("B")).unwrap();
    assert!(canvas.has_pending_layout());
    assert_eq!(canvas.scheduler().state(), &LayoutState::Running(canvas.revision().hash));

    let stale_done = tokio::task::spawn_blocking(move || stale.run()).await.unwrap();
    assert!(matches!(canvas.finish_layout(stale_done), LayoutOutcome::Superseded { .. }));
    assert!(canvas.view().is_empty());
    assert!(canvas.scheduler().is_running());

    let outcome = canvas.relayout().await.unwrap();
    assert!(matches!(outcome, Some(LayoutOutcome::Committed { .. })), "{outcome:?}");
    assert!(!canvas.has_pending_layout());
    assert_eq!(canvas.view().node.len(), 2);
    assert_eq!(canvas.scheduler().state(), &LayoutState::Committed(canvas.revision().hash));
}

#[tokio::test]
async fn invalid_graphs_fail_before_running() {
    let mut canvas = Canvas::init(Config::default());
    let document = r#"{ id: "root", children: [{ id: "A" }], edges: [{ id: "e1", sourceId: "A", targetId: "ghost" }] }"#;
    assert!(matches!(canvas.replace_graph(document), Err(Error::GraphValidationFailed(_))));
    assert!(canvas.graph().root.children.is_empty());
}

#[tokio::test]
async fn engine_panics_surface_as_task_errors() {
    let mut canvas = Canvas::with_engine(Config::default(), Arc::new(PanickingLayout));
    canvas.apply(&add_node("A")).unwrap();
    let err = canvas.relayout().await.unwrap_err();
    assert!(matches!(err, Error::LayoutTask(_)));
    assert!(canvas.view().is_empty());
}

#[tokio::test]
async fn replacement_triggers_a_full_layout() {
    let mut canvas = Canvas::init(Config::default());
    canvas
        .replace_graph(r#"{ id: "root", children: [{ id: "A" }, { id: "G", children: [{ id: "B" }] }], edges: [{ id: "e1", sourceId: "A", targetId: "B" }] }"#)
        .unwrap();
    let outcome = canvas.relayout().await.unwrap().unwrap();
    assert!(matches!(outcome, LayoutOutcome::Committed { .. }));
    assert!(canvas.view().group.contains_key("G"));
    assert_eq!(canvas.scheduler().latest(), Some(&canvas.revision().hash));
}
