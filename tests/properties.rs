use boxline::geometry::{AxisTransform, Rect, snap_grid};
use boxline::layout::{DagreLayout, HierarchicalLayout};
use boxline::mutation::{NodeData, add_edge, add_node, batch_update};
use boxline::routing::segment_intersects_rect;
use boxline::scheduler::commit;
use boxline::{
    CommitMode, DomainEdge, DomainGraph, DomainNode, EdgeRouter, GeometryKind, LayoutConfig, Operation, ROOT_ID,
    RoutingConfig, ViewState, structural_hash,
};
use proptest::prelude::*;

fn chain(labels: &[String]) -> DomainGraph {
    let mut graph = DomainGraph::new();
    for (idx, label) in labels.iter().enumerate() {
        graph.root.children.push(DomainNode::leaf(&format!("n{idx}"), label));
        if idx > 0 {
            graph
                .edges
                .push(DomainEdge::new(&format!("e{idx}"), &format!("n{}", idx - 1), &format!("n{idx}")));
        }
    }
    graph
}

/// Root with `groups.len()` groups holding the given number of leaves, plus
/// one edge between consecutive leaves.
fn grouped(groups: &[usize]) -> DomainGraph {
    let mut graph = DomainGraph::new();
    let mut leaves = Vec::new();
    for (g, count) in groups.iter().enumerate() {
        let children = (0..*count)
            .map(|i| {
                let id = format!("g{g}n{i}");
                leaves.push(id.clone());
                DomainNode::leaf(&id, &id)
            })
            .collect();
        graph.root.children.push(DomainNode::group(&format!("g{g}"), "group", children));
    }
    for (idx, pair) in leaves.windows(2).enumerate() {
        graph.edges.push(DomainEdge::new(&format!("e{idx}"), &pair[0], &pair[1]));
    }
    graph
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn equal_structure_hashes_equal(labels in prop::collection::vec("[a-z]{1,8}", 1..8)) {
        let graph = chain(&labels);
        prop_assert_eq!(structural_hash(&graph), structural_hash(&graph.clone()));
        let grown = add_node(&graph, ROOT_ID, "extra", NodeData::leaf("x")).unwrap();
        prop_assert_ne!(structural_hash(&graph), structural_hash(&grown));
    }

    #[test]
    fn snapping_is_idempotent(value in -5000.0f32..5000.0, grid in 1.0f32..50.0) {
        let once = snap_grid(value, grid);
        prop_assert_eq!(snap_grid(once, grid), once);
        prop_assert!((once - value).abs() <= grid / 2.0 + 1e-3);
    }

    #[test]
    fn fitted_transform_maps_reference_points(a in -100.0f32..100.0, gap in 1.0f32..100.0, ta in -100.0f32..100.0, tb in -100.0f32..100.0) {
        let t = AxisTransform::fit(a, ta, a + gap, tb);
        prop_assert!((t.apply(a) - ta).abs() < 1e-2);
        prop_assert!((t.apply(a + gap) - tb).abs() < 1e-2);
        prop_assert!((t.invert().apply(t.apply(a + 3.0)) - (a + 3.0)).abs() < 1e-2);
    }

    #[test]
    fn failed_batches_leave_the_graph_alone(count in 1usize..6) {
        let graph = chain(&vec!["x".to_string(); count]);
        let ops = vec![
            Operation::AddNode { parent_id: ROOT_ID.to_string(), node_id: "fresh".to_string(), label: String::new(), is_group: false },
            Operation::DeleteNode { node_id: "missing".to_string() },
        ];
        prop_assert!(batch_update(&graph, &ops).is_err());
        prop_assert!(graph.node("fresh").is_none());
        let added = add_edge(&graph, "extra", "n0", "n0");
        prop_assert!(added.is_ok());
    }

    #[test]
    fn full_commits_keep_children_inside_groups(groups in prop::collection::vec(1usize..4, 1..4)) {
        let graph = grouped(&groups);
        let config = LayoutConfig::default();
        let result = DagreLayout::new(config.clone()).layout(&graph).unwrap();
        let mut view = ViewState::new(config.grid_size);
        commit(&result, &graph, &mut view, CommitMode::Full, &config);
        for entry in graph.walk() {
            match entry.parent {
                Some(parent) if parent != ROOT_ID => {
                    let outer = view.box_of(GeometryKind::Group, parent).unwrap();
                    let inner = view.rect(&entry.node.id).unwrap();
                    prop_assert!(outer.contains_rect(&inner, 0.0));
                }
                _ => {}
            }
        }
    }

    #[test]
    fn clean_routes_avoid_other_boxes(
        cells in prop::collection::btree_set((0i32..4, 0i32..4), 2..7),
        pairs in prop::collection::vec((0usize..7, 0usize..7), 1..6),
    ) {
        let cells: Vec<(i32, i32)> = cells.into_iter().collect();
        let mut graph = DomainGraph::new();
        let mut view = ViewState::new(0.0);
        for (idx, (cx, cy)) in cells.iter().enumerate() {
            let id = format!("n{idx}");
            graph.root.children.push(DomainNode::leaf(&id, &id));
            view.write_box(GeometryKind::Node, &id, Rect::new(*cx as f32 * 260.0, *cy as f32 * 200.0, 120.0, 48.0));
        }
        for (idx, (s, t)) in pairs.iter().enumerate() {
            let (s, t) = (s % cells.len(), t % cells.len());
            graph.edges.push(DomainEdge::new(&format!("e{idx}"), &format!("n{s}"), &format!("n{t}")));
        }
        let config = RoutingConfig::default();
        let buffer = config.shape_buffer_distance;
        let report = EdgeRouter::new(config).route_all(&graph, &mut view);

        for edge in &graph.edges {
            let points = view.waypoints(&edge.id).unwrap();
            prop_assert!(points.len() >= 2);
            if report.degraded.iter().any(|d| d.edge == edge.id) {
                continue;
            }
            for (_, id, rect) in view.boxes() {
                if *id == edge.source_id || *id == edge.target_id {
                    continue;
                }
                let obstacle = rect.expand(buffer);
                for pair in points.windows(2) {
                    prop_assert!(!segment_intersects_rect(pair[0], pair[1], &obstacle));
                }
            }
        }
    }
}
