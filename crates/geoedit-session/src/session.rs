//! The editing session: one history, its spatial index, and the background
//! collaborators that feed and persist it
//!
//! All mutations run on the caller's task, one at a time. Background loads
//! only reach the history through `apply_load`, which merges into the base
//! and therefore commutes with every edit already made.

use std::path::Path;
use std::sync::Arc;

use geoedit_core::{
    Action, ApplyMode, Difference, EditHistory, EntityGraph, EntityId, EntityKind, Extent, HistoryEvent,
    HistorySnapshot, SpatialIndex,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::loader::{LoadOutcome, LoadRequest, Loader};
use crate::persist::SaveScheduler;
use crate::source::{DataSource, LoadBatch, LoadError};
use crate::store::SnapshotStore;

/// Capacity of the event channel. Slow receivers skip events rather than
/// hold up the editor.
const EVENT_CAPACITY: usize = 256;

/// What became of a finished load.
#[derive(Debug, PartialEq)]
pub enum LoadStatus {
    Merged(Difference),
    /// Requested before the last reset; never merged.
    Stale { generation: u64, current: u64 },
    Failed(LoadError),
}

impl LoadStatus {
    pub fn is_merged(&self) -> bool {
        matches!(self, LoadStatus::Merged(_))
    }

    pub fn merged(self) -> Option<Difference> {
        match self {
            LoadStatus::Merged(difference) => Some(difference),
            _ => None,
        }
    }
}

pub struct EditSession {
    config: SessionConfig,
    history: EditHistory,
    index: SpatialIndex,
    loader: Loader,
    saver: SaveScheduler,
    store: SnapshotStore,
    events: broadcast::Sender<HistoryEvent>,
}

impl EditSession {
    /// Creates an empty session rooted at `root`. Must be called inside a
    /// tokio runtime.
    pub fn new(root: &Path, config: SessionConfig, source: Arc<dyn DataSource>) -> Self {
        let store = SnapshotStore::new(root, &config);
        let saver = SaveScheduler::spawn(store.clone(), config.save_debounce());
        let loader = Loader::new(source, config.max_concurrent_loads);
        let index = SpatialIndex::new(config.spatial_cell_size);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut history = EditHistory::default();
        let sender = events.clone();
        history.subscribe(move |event: &HistoryEvent| {
            // no receivers is fine
            let _ = sender.send(event.clone());
        });

        info!(source = loader.source_name(), root = %root.display(), "session started");
        EditSession {
            config,
            history,
            index,
            loader,
            saver,
            store,
            events,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn graph(&self) -> &EntityGraph {
        self.history.graph()
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Receives every history event from now on.
    pub fn events(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub fn next_id(&mut self, kind: EntityKind) -> EntityId {
        self.history.next_id(kind)
    }

    /// Entities whose extent touches `extent` in the current version.
    pub fn intersects(&self, extent: &Extent) -> Vec<EntityId> {
        self.index.intersects(extent)
    }

    // ── Mutations ──────────────────────────────────────────

    pub fn apply<A: Action + ?Sized>(
        &mut self,
        mode: ApplyMode,
        action: &A,
        annotation: Option<&str>,
    ) -> geoedit_core::Result<Difference> {
        let difference = self.history.apply(mode, action, annotation)?;
        self.index.apply_difference(&difference, self.history.graph());
        self.schedule_save();
        Ok(difference)
    }

    pub fn perform<A: Action + ?Sized>(&mut self, action: &A, annotation: Option<&str>) -> geoedit_core::Result<Difference> {
        self.apply(ApplyMode::Perform, action, annotation)
    }

    pub fn replace<A: Action + ?Sized>(&mut self, action: &A, annotation: Option<&str>) -> geoedit_core::Result<Difference> {
        self.apply(ApplyMode::Replace, action, annotation)
    }

    pub fn overwrite<A: Action + ?Sized>(&mut self, action: &A) -> geoedit_core::Result<Difference> {
        self.apply(ApplyMode::Overwrite, action, None)
    }

    pub fn pop(&mut self) -> bool {
        self.step(EditHistory::pop)
    }

    pub fn undo(&mut self) -> bool {
        self.step(EditHistory::undo)
    }

    pub fn redo(&mut self) -> bool {
        self.step(EditHistory::redo)
    }

    fn step(&mut self, step: fn(&mut EditHistory) -> bool) -> bool {
        let prev = self.history.graph().clone();
        let moved = step(&mut self.history);
        if moved {
            self.index.rebase(&prev, self.history.graph());
            self.schedule_save();
        }
        moved
    }

    pub fn checkpoint(&mut self, name: &str) {
        self.history.checkpoint(name);
    }

    /// With a name, rolls back to that checkpoint. Without one, cancels the
    /// pending save and every pending load, then empties the session.
    pub fn reset(&mut self, name: Option<&str>) -> geoedit_core::Result<()> {
        let prev = self.history.graph().clone();
        match name {
            Some(_) => {
                self.history.reset(name)?;
                self.index.rebase(&prev, self.history.graph());
                self.schedule_save();
            }
            None => {
                self.saver.cancel();
                let generation = self.loader.cancel_all();
                self.history.reset(None)?;
                self.index.clear();
                info!(generation, "session reset");
            }
        }
        Ok(())
    }

    pub fn pause_change_dispatch(&mut self) {
        self.history.pause_change_dispatch();
    }

    pub fn resume_change_dispatch(&mut self) -> Option<Difference> {
        self.history.resume_change_dispatch()
    }

    /// Merges fetched data into the shared base.
    pub fn merge(&mut self, batch: LoadBatch) -> Difference {
        let difference = self.history.merge(batch.entities, batch.seen_ids);
        self.index.apply_difference(&difference, self.history.graph());
        difference
    }

    // ── Background loading ─────────────────────────────────

    pub fn request_entity(&mut self, id: EntityId) -> u64 {
        self.loader.request(LoadRequest::Entity(id))
    }

    /// Requests everything in `extent`, unless `zoom` is too far out.
    pub fn request_tiles(&mut self, extent: Extent, zoom: u8) -> Option<u64> {
        if zoom < self.config.min_tile_zoom {
            debug!(zoom, min = self.config.min_tile_zoom, "tile request below minimum zoom ignored");
            return None;
        }
        Some(self.loader.request(LoadRequest::Tiles(extent)))
    }

    /// Merges a finished load if it still belongs to the current
    /// generation. Stale results and failures never touch the history.
    pub fn apply_load(&mut self, outcome: LoadOutcome) -> LoadStatus {
        if !self.loader.is_current(&outcome) {
            let current = self.loader.generation();
            debug!(generation = outcome.generation, current, "discarding stale load");
            return LoadStatus::Stale {
                generation: outcome.generation,
                current,
            };
        }
        match outcome.result {
            Ok(batch) => LoadStatus::Merged(self.merge(batch)),
            Err(error) => {
                warn!(%error, request = ?outcome.request, "load failed");
                LoadStatus::Failed(error)
            }
        }
    }

    /// Applies every outcome that is already available. Returns how many
    /// were merged.
    pub fn pump_loads(&mut self) -> usize {
        let mut merged = 0;
        while let Some(outcome) = self.loader.try_next() {
            if self.apply_load(outcome).is_merged() {
                merged += 1;
            }
        }
        merged
    }

    /// Waits for the next load outcome, stale ones included.
    pub async fn next_load(&mut self) -> Option<LoadOutcome> {
        self.loader.next().await
    }

    pub fn pending_loads(&self) -> usize {
        self.loader.pending()
    }

    // ── Persistence ────────────────────────────────────────

    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.to_snapshot()
    }

    fn schedule_save(&self) {
        self.saver.schedule(self.history.state());
    }

    /// Writes the current state now, bypassing the quiet period.
    pub async fn save_now(&self) -> anyhow::Result<()> {
        self.schedule_save();
        self.saver.flush().await?;
        Ok(())
    }

    /// Number of snapshots written so far.
    pub fn saves(&self) -> u64 {
        self.saver.writes()
    }

    /// Whether edits are waiting for the quiet period to end.
    pub fn has_pending_save(&self) -> bool {
        self.saver.is_pending()
    }

    /// Number of snapshots built for saving so far.
    pub fn snapshots_built(&self) -> u64 {
        self.saver.builds()
    }

    /// Restores the stored snapshot, if there is one.
    pub fn restore(&mut self, replace_base: bool) -> anyhow::Result<bool> {
        let Some(snapshot) = self.store.load()? else {
            return Ok(false);
        };
        self.history.from_snapshot(snapshot, replace_base)?;
        self.index = SpatialIndex::build(self.history.graph(), self.config.spatial_cell_size);
        Ok(true)
    }

    /// Drops the pending save and deletes the store.
    pub fn clear_saved(&self) -> anyhow::Result<()> {
        self.saver.cancel();
        self.store.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use geoedit_core::{Coord, Entity, HistoryEventKind, actions};
    use std::time::Duration;

    fn dataset() -> Vec<Entity> {
        vec![
            Entity::node("n1", Coord::new(0.0, 0.0)),
            Entity::node("n2", Coord::new(0.001, 0.0)),
            Entity::way("w1", vec![EntityId::from("n1"), EntityId::from("n2")]),
        ]
    }

    fn session(root: &Path) -> EditSession {
        let source = Arc::new(MemorySource::new(dataset()));
        EditSession::new(root, SessionConfig::default(), source)
    }

    async fn loaded(root: &Path) -> EditSession {
        let mut session = session(root);
        session.request_entity(EntityId::from("w1"));
        let outcome = session.next_load().await.unwrap();
        assert!(session.apply_load(outcome).is_merged());
        session
    }

    #[tokio::test]
    async fn test_loads_merge_into_base_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let session = loaded(dir.path()).await;

        assert!(session.graph().has_entity(&EntityId::from("w1")));
        assert!(!session.history().has_changes());
        assert_eq!(session.index().len(), 3);
    }

    #[tokio::test]
    async fn test_edits_rebase_index_and_emit_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = loaded(dir.path()).await;
        let mut events = session.events();

        session
            .perform(&actions::move_node(EntityId::from("n2"), 1.0, 0.0), Some("Moved a point"))
            .unwrap();
        let far = Extent::new(Coord::new(0.9, -0.1), Coord::new(1.1, 0.1));
        assert_eq!(session.intersects(&far), vec![EntityId::from("n2"), EntityId::from("w1")]);

        assert!(session.undo());
        assert!(session.intersects(&far).is_empty());

        assert_eq!(events.recv().await.unwrap().kind, HistoryEventKind::Change);
        assert_eq!(events.recv().await.unwrap().kind, HistoryEventKind::Undone);
    }

    #[tokio::test]
    async fn test_reset_discards_stale_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.request_entity(EntityId::from("w1"));
        let outcome = session.next_load().await.unwrap();

        session.reset(None).unwrap();
        assert_eq!(
            session.apply_load(outcome),
            LoadStatus::Stale { generation: 0, current: 1 }
        );
        assert!(!session.graph().has_entity(&EntityId::from("w1")));
    }

    #[tokio::test]
    async fn test_low_zoom_tile_requests_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let extent = Extent::new(Coord::new(-0.1, -0.1), Coord::new(0.1, 0.1));
        assert!(session.request_tiles(extent, 14).is_none());
        assert_eq!(session.request_tiles(extent, 15), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_are_saved_after_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = loaded(dir.path()).await;
        session
            .perform(&actions::move_node(EntityId::from("n1"), 1.0, 0.0), Some("Moved a point"))
            .unwrap();
        assert_eq!(session.saves(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.saves(), 1);
        assert!(session.store().exists());
    }

    #[tokio::test]
    async fn test_failed_load_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.request_entity(EntityId::from("w9"));
        let outcome = session.next_load().await.unwrap();
        assert_eq!(
            session.apply_load(outcome),
            LoadStatus::Failed(LoadError::NotFound(EntityId::from("w9")))
        );
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drag_frames_build_one_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = loaded(dir.path()).await;
        session
            .perform(&actions::move_node(EntityId::from("n1"), 0.001, 0.0), Some("Moved a point"))
            .unwrap();

        for _ in 0..120 {
            session
                .replace(&actions::move_node(EntityId::from("n1"), 0.001, 0.0), Some("Moved a point"))
                .unwrap();
            assert!(session.has_pending_save());
            tokio::time::sleep(Duration::from_millis(16)).await;
        }
        assert_eq!(session.snapshots_built(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.snapshots_built(), 1);
        assert_eq!(session.saves(), 1);
        assert!(!session.has_pending_save());
    }
}
