//! Integration tests for Geoedit
//!
//! These tests drive a whole session: loads from a data source, edits, the
//! debounced store, and restoring into a fresh session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use geoedit_core::{
    BoxedAction, ChangeType, Coord, Entity, EntityId, EntityKind, Extent, HistoryEventKind, Tags, actions,
    verify_edits,
};
use geoedit_session::{EditSession, LoadError, LoadStatus, MemorySource, SessionConfig, StoreFormat};

fn id(raw: &str) -> EntityId {
    EntityId::from(raw)
}

/// Two streets meeting at `n2`, and a bus stop beside them.
fn street_corner() -> Vec<Entity> {
    vec![
        Entity::node("n1", Coord::new(0.000, 0.000)),
        Entity::node("n2", Coord::new(0.002, 0.000)),
        Entity::node("n3", Coord::new(0.002, 0.002)),
        Entity::way("w1", vec![id("n1"), id("n2")]).with_tag("highway", "residential"),
        Entity::way("w2", vec![id("n2"), id("n3")]).with_tag("highway", "service"),
        Entity::node("n4", Coord::new(0.001, 0.001)).with_tag("highway", "bus_stop"),
    ]
}

fn corner_extent() -> Extent {
    Extent::new(Coord::new(-0.001, -0.001), Coord::new(0.003, 0.003))
}

fn session_with(root: &Path, config: SessionConfig, source: Arc<MemorySource>) -> EditSession {
    EditSession::new(root, config, source)
}

async fn loaded_session(root: &Path, config: SessionConfig) -> EditSession {
    let source = Arc::new(MemorySource::new(street_corner()));
    let mut session = session_with(root, config, source);
    session.request_tiles(corner_extent(), 17).unwrap();
    let outcome = session.next_load().await.unwrap();
    assert!(session.apply_load(outcome).is_merged());
    session
}

/// Adds a footpath from the bus stop to a new node.
fn add_footpath(session: &mut EditSession) -> (EntityId, EntityId) {
    let node = session.next_id(EntityKind::Node);
    let way = session.next_id(EntityKind::Way);
    let mut tags = Tags::new();
    tags.insert("highway".to_string(), "footway".to_string());

    let steps: Vec<BoxedAction> = vec![
        Box::new(actions::add_entity(Entity::node(node.as_str(), Coord::new(0.0015, 0.0005)))),
        Box::new(actions::add_way(way.clone(), vec![id("n4"), node.clone()], tags)),
    ];
    session.perform(&actions::compose(steps), Some("Added a footpath")).unwrap();
    (node, way)
}

#[tokio::test]
async fn test_edits_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (node, way) = {
        let mut session = loaded_session(dir.path(), SessionConfig::default()).await;
        session
            .perform(&actions::move_node(id("n2"), 0.0, 0.001), Some("Moved a corner"))
            .unwrap();
        session.checkpoint("before-footpath");
        let created = add_footpath(&mut session);
        session.save_now().await.unwrap();
        assert_eq!(session.saves(), 1);
        created
    };

    let mut restored = loaded_session(dir.path(), SessionConfig::default()).await;
    assert!(restored.restore(false).unwrap());

    let history = restored.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history.cursor(), 2);
    assert_eq!(history.undo_annotation(), Some("Added a footpath"));
    assert_eq!(
        restored.graph().entity(&id("n2")).unwrap().loc(),
        Some(Coord::new(0.002, 0.001))
    );
    assert!(restored.graph().has_entity(&way));
    assert!(verify_edits(restored.graph()).is_empty());

    // ids keep counting from where the first session stopped
    assert_ne!(restored.next_id(EntityKind::Node), node);

    restored.reset(Some("before-footpath")).unwrap();
    assert!(!restored.graph().has_entity(&node));
    assert!(restored.intersects(&corner_extent()).contains(&id("n2")));
}

#[tokio::test]
async fn test_bincode_store_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("geoedit.toml");
    std::fs::write(&config_path, "store_format = \"bincode\"\nstore_dir = \"state\"\n").unwrap();
    let config = SessionConfig::load(&config_path).unwrap();
    assert_eq!(config.store_format, StoreFormat::Bincode);

    let mut session = loaded_session(dir.path(), config.clone()).await;
    session
        .perform(&actions::delete_node(id("n4")), Some("Deleted a bus stop"))
        .unwrap();
    session.save_now().await.unwrap();
    assert_eq!(session.store().path(), dir.path().join("state").join("history.bin"));
    drop(session);

    let source = Arc::new(MemorySource::new(Vec::new()));
    let mut restored = session_with(dir.path(), config, source);
    assert!(restored.restore(true).unwrap());
    let difference = restored.history().difference();
    assert_eq!(difference.change(&id("n4")).unwrap().change, ChangeType::Deleted);
    assert!(!restored.graph().has_entity(&id("n4")));
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_loading_drops_results() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(street_corner()).with_latency(Duration::from_secs(2)));
    let mut session = session_with(dir.path(), SessionConfig::default(), source);

    session.request_tiles(corner_extent(), 18).unwrap();
    session.request_entity(id("w2"));
    assert_eq!(session.pending_loads(), 2);

    session.reset(None).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(session.pump_loads(), 0);
    assert_eq!(session.pending_loads(), 0);
    assert!(session.graph().entities().is_empty());
    assert!(session.index().is_empty());
}

#[tokio::test]
async fn test_offline_source_leaves_history_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(street_corner()));
    let mut session = session_with(dir.path(), SessionConfig::default(), source.clone());

    source.set_offline(true);
    session.request_entity(id("w1"));
    let outcome = session.next_load().await.unwrap();
    assert!(outcome.result.is_err());
    assert_eq!(session.apply_load(outcome), LoadStatus::Failed(LoadError::Offline));
    assert_eq!(session.history().len(), 1);

    source.set_offline(false);
    session.request_entity(id("w1"));
    let outcome = session.next_load().await.unwrap();
    let merged = session.apply_load(outcome).merged().unwrap();
    assert_eq!(merged.created().len(), 3);
}

#[tokio::test]
async fn test_loads_merge_beneath_pending_edits() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(street_corner()));
    let mut session = session_with(dir.path(), SessionConfig::default(), source);

    session.request_entity(id("w1"));
    let outcome = session.next_load().await.unwrap();
    assert!(session.apply_load(outcome).is_merged());
    session
        .perform(&actions::move_node(id("n2"), 0.0, 0.001), Some("Moved a corner"))
        .unwrap();

    // w2 shares n2, which the merge must not overwrite
    session.request_entity(id("w2"));
    let outcome = session.next_load().await.unwrap();
    assert!(session.apply_load(outcome).is_merged());

    assert!(session.graph().has_entity(&id("w2")));
    assert_eq!(
        session.graph().entity(&id("n2")).unwrap().loc(),
        Some(Coord::new(0.002, 0.001))
    );
    assert_eq!(session.graph().parent_way_ids(&id("n2")), vec![id("w1"), id("w2")]);

    assert!(session.undo());
    assert_eq!(
        session.graph().entity(&id("n2")).unwrap().loc(),
        Some(Coord::new(0.002, 0.000))
    );
    assert!(session.graph().has_entity(&id("w2")));
}

#[tokio::test]
async fn test_paused_dispatch_sends_one_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = loaded_session(dir.path(), SessionConfig::default()).await;
    let mut events = session.events();

    session.pause_change_dispatch();
    session.perform(&actions::move_node(id("n1"), 0.0, 0.0005), None).unwrap();
    session
        .perform(&actions::change_tags(id("n4"), Tags::new()), None)
        .unwrap();
    assert!(events.try_recv().is_err());

    let combined = session.resume_change_dispatch().unwrap();
    assert_eq!(combined.modified(), vec![&id("n1"), &id("n4")]);

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, HistoryEventKind::Change);
    assert_eq!(event.difference, combined);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_missing_store_restores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let source = Arc::new(MemorySource::new(Vec::new()));
    let mut session = session_with(dir.path(), SessionConfig::default(), source);
    assert!(!session.restore(true).unwrap());
    assert!(!session.store().exists());
    tokio_test::assert_ok!(session.clear_saved());
}
