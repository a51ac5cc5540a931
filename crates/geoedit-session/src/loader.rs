//! Background loads with generation-based cancellation
//!
//! Every outcome carries the generation that was current when it was
//! requested. `cancel_all` bumps the generation, so a result that arrives
//! after a cancel is recognisably stale even if its task won the race
//! against `abort`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use geoedit_core::{EntityId, Extent};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::source::{DataSource, LoadBatch, LoadError};

#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    Entity(EntityId),
    Tiles(Extent),
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub generation: u64,
    pub request: LoadRequest,
    pub result: Result<LoadBatch, LoadError>,
}

pub struct Loader {
    source: Arc<dyn DataSource>,
    generation: Arc<AtomicU64>,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<LoadOutcome>,
    rx: mpsc::UnboundedReceiver<LoadOutcome>,
    tasks: Vec<JoinHandle<()>>,
}

impl Loader {
    pub fn new(source: Arc<dyn DataSource>, max_concurrent: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Loader {
            source,
            generation: Arc::new(AtomicU64::new(0)),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tx,
            rx,
            tasks: Vec::new(),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Starts a load in the background and returns its generation.
    pub fn request(&mut self, request: LoadRequest) -> u64 {
        self.tasks.retain(|task| !task.is_finished());

        let generation = self.generation();
        let source = self.source.clone();
        let permits = self.permits.clone();
        let tx = self.tx.clone();
        debug!(?request, generation, "load requested");

        let task = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = match &request {
                LoadRequest::Entity(id) => source.load_entity(id.clone()).await,
                LoadRequest::Tiles(extent) => source.load_tiles(*extent).await,
            };
            let outcome = LoadOutcome {
                generation,
                request,
                result,
            };
            if tx.send(outcome).is_err() {
                debug!("Loader dropped before the load finished");
            }
        });
        self.tasks.push(task);
        generation
    }

    /// Aborts every in-flight load and invalidates outcomes already queued.
    pub fn cancel_all(&mut self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let aborted = self.tasks.len();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!(generation, aborted, "cancelled pending loads");
        generation
    }

    pub fn is_current(&self, outcome: &LoadOutcome) -> bool {
        outcome.generation == self.generation()
    }

    /// Loads still running.
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Waits for the next outcome, stale ones included.
    pub async fn next(&mut self) -> Option<LoadOutcome> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<LoadOutcome> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use geoedit_core::{Coord, Entity};
    use std::time::Duration;

    fn loader(latency: Duration) -> Loader {
        let source = MemorySource::new(vec![Entity::node("n1", Coord::new(0.0, 0.0))]).with_latency(latency);
        Loader::new(Arc::new(source), 2)
    }

    #[tokio::test]
    async fn test_outcome_carries_generation() {
        let mut loader = loader(Duration::ZERO);
        let generation = loader.request(LoadRequest::Entity(EntityId::from("n1")));
        let outcome = loader.next().await.unwrap();

        assert_eq!(outcome.generation, generation);
        assert!(loader.is_current(&outcome));
        assert_eq!(outcome.result.unwrap().entities.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_aborts_and_invalidates() {
        let mut loader = loader(Duration::from_secs(5));
        loader.request(LoadRequest::Entity(EntityId::from("n1")));
        loader.request(LoadRequest::Entity(EntityId::from("n1")));
        assert_eq!(loader.pending(), 2);

        let generation = loader.cancel_all();
        assert_eq!(generation, 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(loader.try_next().is_none());
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test]
    async fn test_stale_outcome_is_detected() {
        let mut loader = loader(Duration::ZERO);
        loader.request(LoadRequest::Entity(EntityId::from("n1")));
        let outcome = loader.next().await.unwrap();
        loader.cancel_all();
        assert!(!loader.is_current(&outcome));
    }

    #[tokio::test]
    async fn test_failures_are_outcomes() {
        let mut loader = loader(Duration::ZERO);
        loader.request(LoadRequest::Entity(EntityId::from("n9")));
        let outcome = loader.next().await.unwrap();
        assert_eq!(outcome.result, Err(LoadError::NotFound(EntityId::from("n9"))));
    }
}
