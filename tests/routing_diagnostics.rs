use boxline::geometry::Rect;
use boxline::{DomainEdge, DomainGraph, DomainNode, EdgeRouter, Error, GeometryKind, ViewState};
use tracing_test::traced_test;

/// `B` sits inside a closed ring of walls, so nothing can reach it cleanly.
fn walled_in() -> (DomainGraph, ViewState) {
    let boxes = [
        ("A", Rect::new(0.0, 0.0, 100.0, 50.0)),
        ("B", Rect::new(300.0, 0.0, 100.0, 50.0)),
        ("top", Rect::new(250.0, -60.0, 200.0, 20.0)),
        ("bottom", Rect::new(250.0, 90.0, 200.0, 20.0)),
        ("left", Rect::new(250.0, -60.0, 20.0, 170.0)),
        ("right", Rect::new(430.0, -60.0, 20.0, 170.0)),
    ];
    let mut graph = DomainGraph::new();
    let mut view = ViewState::new(0.0);
    for (id, rect) in boxes {
        graph.root.children.push(DomainNode::leaf(id, id));
        view.write_box(GeometryKind::Node, id, rect);
    }
    graph.edges.push(DomainEdge::new("e1", "A", "B"));
    (graph, view)
}

#[traced_test]
#[test]
fn unreachable_target_degrades_with_a_warning() {
    let (graph, mut view) = walled_in();
    let report = EdgeRouter::default().route_all(&graph, &mut view);

    assert_eq!(report.degraded.len(), 1);
    assert_eq!(report.degraded[0].edge, "e1");
    assert!(report.routed.contains(&"e1".to_string()));
    assert!(view.waypoints("e1").unwrap().len() >= 2);
    assert!(matches!(report.errors().as_slice(), [Error::RoutingDegraded { edge, .. }] if edge == "e1"));
    assert!(logs_contain("routing degraded"));
}

#[traced_test]
#[test]
fn clean_routes_log_no_warning() {
    let (mut graph, mut view) = walled_in();
    graph.edges.clear();
    graph.edges.push(DomainEdge::new("e2", "A", "left"));
    let report = EdgeRouter::default().route_all(&graph, &mut view);
    assert!(report.is_clean(), "{report:?}");
    assert!(!logs_contain("routing degraded"));
}
