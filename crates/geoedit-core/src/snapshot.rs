//! Recoverable history snapshots
//!
//! A snapshot holds the edit layer of every stack entry, never the loaded
//! dataset. Entities shared between entries are stored once in a pool and
//! referenced by index. The base versions of touched entities ride along so
//! a snapshot can be restored before the data source is reachable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::diff::Difference;
use crate::error::{Error, Result};
use crate::graph::{EntityGraph, Slot};
use crate::history::{EditHistory, HistoryEntry, HistoryEventKind};
use crate::model::*;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Indexes into [`HistorySnapshot::entities`].
    pub modified: Vec<usize>,
    pub deleted: Vec<EntityId>,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u32,
    /// RFC 3339.
    pub saved_at: String,
    pub entities: Vec<Entity>,
    pub base_entities: Vec<Entity>,
    pub stack: Vec<SnapshotEntry>,
    pub index: usize,
    pub checkpoints: BTreeMap<String, usize>,
    pub next_ids: IdAllocator,
}

/// Everything a snapshot is built from, captured without copying any
/// entity. The graphs share their layers with the live history, so
/// capturing costs one handle per stack entry.
#[derive(Debug, Clone)]
pub struct HistoryState {
    entries: Vec<HistoryEntry>,
    cursor: usize,
    checkpoints: BTreeMap<String, usize>,
    ids: IdAllocator,
}

impl HistoryState {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn to_snapshot(&self) -> HistorySnapshot {
        let base = match self.entries.first() {
            Some(entry) => entry.graph.base(),
            None => EntityGraph::new(),
        };
        let mut pool = Vec::new();
        let mut pooled: HashMap<*const Entity, usize> = HashMap::new();
        let mut base_entities = BTreeMap::new();
        let mut stack = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let mut modified = Vec::new();
            let mut deleted = Vec::new();
            for (id, slot) in entry.graph.edits() {
                collect_base(&base, id, &mut base_entities);
                match slot {
                    Some(entity) => {
                        let index = *pooled.entry(Arc::as_ptr(entity)).or_insert_with(|| {
                            pool.push((**entity).clone());
                            pool.len() - 1
                        });
                        for child in entity.nodes() {
                            collect_base(&base, child, &mut base_entities);
                        }
                        modified.push(index);
                    }
                    None => deleted.push(id.clone()),
                }
            }
            stack.push(SnapshotEntry {
                modified,
                deleted,
                annotation: entry.annotation.clone(),
            });
        }

        HistorySnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            entities: pool,
            base_entities: base_entities.into_values().collect(),
            stack,
            index: self.cursor,
            checkpoints: self.checkpoints.clone(),
            next_ids: self.ids.clone(),
        }
    }
}

impl EditHistory {
    /// Captures the stack for a later [`HistoryState::to_snapshot`].
    pub fn state(&self) -> HistoryState {
        HistoryState {
            entries: self.stack.clone(),
            cursor: self.cursor,
            checkpoints: self.checkpoints.clone(),
            ids: self.ids.clone(),
        }
    }

    pub fn to_snapshot(&self) -> HistorySnapshot {
        self.state().to_snapshot()
    }

    /// Rebuilds the stack from `snapshot`.
    ///
    /// With `replace_base` the snapshot's base entities become the whole
    /// base. Otherwise they only fill ids the current base lacks.
    pub fn from_snapshot(&mut self, snapshot: HistorySnapshot, replace_base: bool) -> Result<()> {
        validate(&snapshot)?;

        let base = if replace_base {
            EntityGraph::from_entities(snapshot.base_entities)
        } else {
            let current = self.base();
            let missing: Vec<Entity> = snapshot
                .base_entities
                .into_iter()
                .filter(|entity| current.lookup(&entity.id).is_none())
                .collect();
            current.load(missing)
        };

        let pool: Vec<Arc<Entity>> = snapshot.entities.into_iter().map(Arc::new).collect();
        let stack: Vec<HistoryEntry> = snapshot
            .stack
            .into_iter()
            .map(|entry| {
                let mut changes: HashMap<EntityId, Slot> = HashMap::new();
                for index in entry.modified {
                    let entity = pool[index].clone();
                    changes.insert(entity.id.clone(), Some(entity));
                }
                for id in entry.deleted {
                    changes.insert(id, None);
                }
                HistoryEntry {
                    graph: base.with_changes(changes),
                    annotation: entry.annotation,
                }
            })
            .collect();

        let prev = self.graph().clone();
        let last = stack.len() - 1;
        self.stack = stack;
        self.cursor = snapshot.index;
        self.checkpoints = snapshot
            .checkpoints
            .into_iter()
            .filter(|(_, index)| *index <= last)
            .collect();
        self.ids = snapshot.next_ids;

        let difference = Difference::compute(&prev, self.graph());
        info!(
            entries = self.stack.len(),
            cursor = self.cursor,
            replace_base,
            "restored history"
        );
        self.emit(HistoryEventKind::Restored, difference);
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_snapshot())?)
    }

    pub fn from_json(&mut self, json: &str, replace_base: bool) -> Result<()> {
        let snapshot: HistorySnapshot = serde_json::from_str(json)?;
        self.from_snapshot(snapshot, replace_base)
    }
}

fn collect_base(base: &EntityGraph, id: &EntityId, into: &mut BTreeMap<EntityId, Entity>) {
    if into.contains_key(id) {
        return;
    }
    let Some(entity) = base.lookup(id) else {
        return;
    };
    into.insert(id.clone(), (**entity).clone());
    for child in entity.nodes() {
        if let Some(node) = base.lookup(child) {
            into.entry(child.clone()).or_insert_with(|| (**node).clone());
        }
    }
}

fn validate(snapshot: &HistorySnapshot) -> Result<()> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::Snapshot(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    if snapshot.index >= snapshot.stack.len() {
        return Err(Error::Snapshot(format!(
            "cursor {} outside a stack of {} entries",
            snapshot.index,
            snapshot.stack.len()
        )));
    }
    let pool = snapshot.entities.len();
    if let Some(index) = snapshot
        .stack
        .iter()
        .flat_map(|entry| entry.modified.iter())
        .find(|index| **index >= pool)
    {
        return Err(Error::Snapshot(format!("entity index {index} outside a pool of {pool}")));
    }
    Ok(())
}
