//! Property-based tests for the edit history and the spatial index.

use geoedit_core::actions;
use geoedit_core::*;
use proptest::prelude::*;

// =============================================================================
// Test helpers
// =============================================================================

fn base_graph() -> EntityGraph {
    let mut entities = Vec::new();
    for i in 0..6 {
        let lon = f64::from(i) * 0.004;
        entities.push(Entity::node(format!("n{}", i + 1), Coord::new(lon, 0.0)));
        entities.push(Entity::node(format!("n{}", i + 11), Coord::new(lon, 0.004)));
    }
    entities.push(Entity::way("w1", ["n1", "n2", "n3"].map(EntityId::from).to_vec()));
    entities.push(Entity::way("w2", ["n3", "n4", "n14", "n13", "n3"].map(EntityId::from).to_vec()).with_tag("building", "yes"));
    entities.push(Entity::way("w3", ["n15", "n16"].map(EntityId::from).to_vec()));
    entities.push(Entity::relation(
        "r1",
        vec![
            Member::new("w1", EntityKind::Way, ""),
            Member::new("n11", EntityKind::Node, "stop"),
        ],
    ));
    EntityGraph::from_entities(entities)
}

#[derive(Clone, Debug)]
enum EditOp {
    Move { target: usize, dlon: f64, dlat: f64 },
    AddPoint { lon: f64, lat: f64 },
    Tag { target: usize, value: String },
    Delete { target: usize },
    Undo,
    Redo,
}

fn arbitrary_edit_op() -> impl Strategy<Value = EditOp> {
    prop_oneof![
        (0..64usize, -0.01..0.01f64, -0.01..0.01f64)
            .prop_map(|(target, dlon, dlat)| EditOp::Move { target, dlon, dlat }),
        (-0.02..0.04f64, -0.02..0.02f64).prop_map(|(lon, lat)| EditOp::AddPoint { lon, lat }),
        (0..64usize, "[a-z]{1,8}").prop_map(|(target, value)| EditOp::Tag { target, value }),
        (0..64usize).prop_map(|target| EditOp::Delete { target }),
        Just(EditOp::Undo),
        Just(EditOp::Redo),
    ]
}

fn pick(graph: &EntityGraph, target: usize) -> Option<Entity> {
    let mut entities: Vec<&Entity> = graph.entities();
    if entities.is_empty() {
        return None;
    }
    entities.sort_by(|a, b| a.id.cmp(&b.id));
    Some(entities[target % entities.len()].clone())
}

/// Applies one op. Returns whether a new step was performed.
fn apply_op(history: &mut EditHistory, op: &EditOp, undo_redo: bool) -> bool {
    let graph = history.graph().clone();
    let result = match op {
        EditOp::Move { target, dlon, dlat } => match pick(&graph, *target) {
            Some(entity) => history.perform(&actions::move_entities(vec![entity.id], *dlon, *dlat), Some("Moved")),
            None => return false,
        },
        EditOp::AddPoint { lon, lat } => {
            let id = history.next_id(EntityKind::Node);
            history.perform(&actions::add_entity(Entity::node(id, Coord::new(*lon, *lat))), Some("Added a point"))
        }
        EditOp::Tag { target, value } => match pick(&graph, *target) {
            Some(entity) => {
                let mut tags = entity.tags.clone();
                tags.insert("name".to_string(), value.clone());
                history.perform(&actions::change_tags(entity.id, tags), Some("Changed tags"))
            }
            None => return false,
        },
        EditOp::Delete { target } => match pick(&graph, *target) {
            Some(entity) if entity.kind() == EntityKind::Node => {
                history.perform(&actions::delete_node(entity.id), Some("Deleted a point"))
            }
            Some(entity) if entity.kind() == EntityKind::Way => {
                history.perform(&actions::delete_way(entity.id), Some("Deleted a line"))
            }
            _ => return false,
        },
        EditOp::Undo => {
            if undo_redo {
                history.undo();
            }
            return false;
        }
        EditOp::Redo => {
            if undo_redo {
                history.redo();
            }
            return false;
        }
    };
    result.is_ok()
}

fn sorted_entities(graph: &EntityGraph) -> Vec<Entity> {
    let mut entities: Vec<Entity> = graph.entities().into_iter().cloned().collect();
    entities.sort_by(|a, b| a.id.cmp(&b.id));
    entities
}

fn query_extents() -> Vec<Extent> {
    vec![
        Extent::new(Coord::new(-0.001, -0.001), Coord::new(0.001, 0.001)),
        Extent::new(Coord::new(0.005, -0.01), Coord::new(0.015, 0.01)),
        Extent::new(Coord::new(-0.05, -0.05), Coord::new(0.05, 0.05)),
    ]
}

// =============================================================================
// History properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Undoing every performed step gives back the base entity set.
    #[test]
    fn undo_all_restores_base(ops in prop::collection::vec(arbitrary_edit_op(), 1..40)) {
        let base = base_graph();
        let mut history = EditHistory::new(base.clone());
        let mut performed = 0;
        for op in &ops {
            if apply_op(&mut history, op, false) {
                performed += 1;
            }
        }
        prop_assert_eq!(history.len(), performed + 1);

        for _ in 0..performed {
            prop_assert!(history.undo());
        }
        prop_assert!(!history.undo());
        prop_assert!(!history.has_changes());
        prop_assert_eq!(sorted_entities(history.graph()), sorted_entities(&base));
    }

    /// Every reachable version resolves all of its references, and a
    /// version never differs from itself.
    #[test]
    fn every_version_keeps_integrity(ops in prop::collection::vec(arbitrary_edit_op(), 1..40)) {
        let mut history = EditHistory::new(base_graph());
        for op in &ops {
            let len = history.len();
            let applied = apply_op(&mut history, op, true);
            if !applied && !matches!(op, EditOp::Undo | EditOp::Redo) {
                prop_assert_eq!(history.len(), len);
            }
            let graph = history.graph();
            prop_assert!(verify_graph(graph).is_empty());
            prop_assert!(Difference::compute(graph, graph).is_empty());
        }
    }

    /// Replaying the same steps builds versions that share no edit layer
    /// but hold equal entities, so they differ in nothing.
    #[test]
    fn replayed_versions_have_no_difference(ops in prop::collection::vec(arbitrary_edit_op(), 1..40)) {
        let base = base_graph();
        let mut first = EditHistory::new(base.clone());
        let mut shared_base = EditHistory::new(base);
        let mut fresh_base = EditHistory::new(base_graph());
        for op in &ops {
            apply_op(&mut first, op, true);
            apply_op(&mut shared_base, op, true);
            apply_op(&mut fresh_base, op, true);

            let graph = first.graph();
            if graph.has_edits() {
                prop_assert!(!graph.ptr_eq(shared_base.graph()));
            }
            prop_assert!(Difference::compute(graph, shared_base.graph()).is_empty());
            prop_assert!(Difference::compute(shared_base.graph(), graph).is_empty());
            prop_assert!(Difference::compute(graph, fresh_base.graph()).is_empty());
            prop_assert_eq!(sorted_entities(graph), sorted_entities(fresh_base.graph()));
        }
    }

    /// Rebasing after each step gives the same index as a rebuild.
    #[test]
    fn spatial_rebase_matches_rebuild(ops in prop::collection::vec(arbitrary_edit_op(), 1..30)) {
        let mut history = EditHistory::new(base_graph());
        let mut index = SpatialIndex::build(history.graph(), DEFAULT_CELL_SIZE);
        for op in &ops {
            let prev = history.graph().clone();
            apply_op(&mut history, op, true);
            index.rebase(&prev, history.graph());

            let rebuilt = SpatialIndex::build(history.graph(), DEFAULT_CELL_SIZE);
            prop_assert_eq!(index.ids(), rebuilt.ids());
            for id in rebuilt.ids() {
                prop_assert_eq!(index.extent_of(&id), rebuilt.extent_of(&id));
            }
            for extent in query_extents() {
                prop_assert_eq!(index.intersects(&extent), rebuilt.intersects(&extent));
            }
        }
    }
}
