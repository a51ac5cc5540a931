//! Remote data sources

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use geoedit_core::{Entity, EntityGraph, EntityId, Extent, SpatialIndex};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("data source is offline")]
    Offline,

    #[error("entity {0} not found at source")]
    NotFound(EntityId),

    #[error("source error: {0}")]
    Source(String),
}

/// Entities fetched by one request, plus every id the source reported,
/// including ids that came back deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBatch {
    pub entities: Vec<Entity>,
    pub seen_ids: Vec<EntityId>,
}

impl LoadBatch {
    pub fn new(entities: Vec<Entity>) -> Self {
        let seen_ids = entities.iter().map(|entity| entity.id.clone()).collect();
        LoadBatch { entities, seen_ids }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Where map data comes from.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Human-readable source name.
    fn name(&self) -> &str;

    /// One entity with everything needed to draw it: a way comes with its
    /// nodes.
    async fn load_entity(&self, id: EntityId) -> Result<LoadBatch, LoadError>;

    /// Everything intersecting `extent`.
    async fn load_tiles(&self, extent: Extent) -> Result<LoadBatch, LoadError>;
}

/// A data source over a fixed in-memory dataset, with optional latency and
/// an offline switch.
pub struct MemorySource {
    name: String,
    graph: EntityGraph,
    index: SpatialIndex,
    latency: Duration,
    offline: AtomicBool,
}

impl MemorySource {
    pub fn new(entities: Vec<Entity>) -> Self {
        let graph = EntityGraph::from_entities(entities);
        let index = SpatialIndex::build(&graph, geoedit_core::DEFAULT_CELL_SIZE);
        MemorySource {
            name: "memory".to_string(),
            graph,
            index,
            latency: Duration::ZERO,
            offline: AtomicBool::new(false),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    async fn round_trip(&self) -> Result<(), LoadError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(LoadError::Offline);
        }
        Ok(())
    }

    /// Adds `id` and, for ways, its nodes.
    fn collect(&self, id: &EntityId, into: &mut BTreeMap<EntityId, Entity>) {
        let Some(entity) = self.graph.get(id) else {
            return;
        };
        for node in entity.nodes() {
            if let Some(node) = self.graph.get(node) {
                into.entry(node.id.clone()).or_insert_with(|| node.clone());
            }
        }
        into.entry(id.clone()).or_insert_with(|| entity.clone());
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_entity(&self, id: EntityId) -> Result<LoadBatch, LoadError> {
        self.round_trip().await?;
        if !self.graph.has_entity(&id) {
            return Err(LoadError::NotFound(id));
        }
        let mut entities = BTreeMap::new();
        self.collect(&id, &mut entities);
        Ok(LoadBatch::new(entities.into_values().collect()))
    }

    async fn load_tiles(&self, extent: Extent) -> Result<LoadBatch, LoadError> {
        self.round_trip().await?;
        let mut entities = BTreeMap::new();
        for id in self.index.intersects(&extent) {
            self.collect(&id, &mut entities);
        }
        Ok(LoadBatch::new(entities.into_values().collect()))
    }
}
