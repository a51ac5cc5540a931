//! Debounced persistence of the history snapshot
//!
//! Scheduling only parks a [`HistoryState`] in a single pending slot and
//! wakes the writer task; a newer state replaces an older one. The task
//! builds the snapshot and writes it once the slot stayed untouched for the
//! debounce period, so a drag that schedules on every frame builds one
//! snapshot at the end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use geoedit_core::HistoryState;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::SnapshotStore;

/// Flush requests waiting for the task. Callers await their reply, so a
/// handful is plenty.
const FLUSH_QUEUE: usize = 4;

#[derive(Default)]
struct Pending {
    slot: Mutex<Option<HistoryState>>,
    changed: Notify,
    builds: AtomicU64,
    writes: AtomicU64,
}

impl Pending {
    fn replace(&self, state: Option<HistoryState>) -> Option<HistoryState> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, state)
    }

    fn is_set(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Builds and writes whatever is pending. Returns whether anything was
    /// written.
    fn write(&self, store: &SnapshotStore) -> Result<bool> {
        let Some(state) = self.replace(None) else {
            return Ok(false);
        };
        let snapshot = state.to_snapshot();
        self.builds.fetch_add(1, Ordering::SeqCst);
        store.save(&snapshot)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

pub struct SaveScheduler {
    pending: Arc<Pending>,
    flushes: mpsc::Sender<oneshot::Sender<Result<bool>>>,
    task: JoinHandle<()>,
}

impl SaveScheduler {
    /// Starts the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: SnapshotStore, debounce: Duration) -> Self {
        let pending = Arc::new(Pending::default());
        let (flushes, rx) = mpsc::channel(FLUSH_QUEUE);
        let task = tokio::spawn(run(store, debounce, pending.clone(), rx));
        SaveScheduler { pending, flushes, task }
    }

    /// Replaces any pending state and restarts the quiet period.
    pub fn schedule(&self, state: HistoryState) {
        self.pending.replace(Some(state));
        self.pending.changed.notify_one();
    }

    /// Drops the pending state, if any.
    pub fn cancel(&self) {
        if self.pending.replace(None).is_some() {
            debug!("Pending save cancelled");
        }
        self.pending.changed.notify_one();
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_set()
    }

    /// Writes the pending state now. Returns whether anything was written.
    pub async fn flush(&self) -> Result<bool> {
        let (reply, done) = oneshot::channel();
        self.flushes
            .send(reply)
            .await
            .map_err(|_| anyhow::anyhow!("save task is gone"))?;
        done.await?
    }

    /// Snapshots built so far.
    pub fn builds(&self) -> u64 {
        self.pending.builds.load(Ordering::SeqCst)
    }

    /// Snapshots written so far.
    pub fn writes(&self) -> u64 {
        self.pending.writes.load(Ordering::SeqCst)
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: SnapshotStore,
    debounce: Duration,
    pending: Arc<Pending>,
    mut flushes: mpsc::Receiver<oneshot::Sender<Result<bool>>>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        let quiet = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = pending.changed.notified() => {
                deadline = pending.is_set().then(|| Instant::now() + debounce);
            }
            _ = quiet => {
                deadline = None;
                if let Err(e) = pending.write(&store) {
                    warn!("Debounced save failed: {}", e);
                }
            }
            request = flushes.recv() => {
                let Some(reply) = request else {
                    break;
                };
                deadline = None;
                let _ = reply.send(pending.write(&store));
            }
        }
    }
}
