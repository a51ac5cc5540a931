//! Undo/redo state machine over graph versions
//!
//! `stack[0]` is the session's base version and is never removed. The
//! cursor always points at a valid entry; everything after it is the redo
//! tail, dropped by the next `perform`.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use crate::action::Action;
use crate::diff::Difference;
use crate::error::{Error, Result};
use crate::graph::EntityGraph;
use crate::integrity;
use crate::model::*;

/// One version on the stack.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub graph: EntityGraph,
    pub annotation: Option<String>,
}

impl HistoryEntry {
    fn new(graph: EntityGraph, annotation: Option<&str>) -> Self {
        HistoryEntry {
            graph,
            annotation: annotation.map(str::to_string),
        }
    }
}

/// How an applied action lands on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// New undo step; the redo tail is dropped.
    Perform,
    /// Swap the current step for the result, annotation included.
    Replace,
    /// Swap only the current graph; the annotation stays.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEventKind {
    Change,
    Undone,
    Redone,
    Merged { seen_ids: Vec<EntityId> },
    Reset,
    Restored,
}

/// Delivered to observers right after the mutation that caused it.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub sequence: u64,
    pub kind: HistoryEventKind,
    pub difference: Difference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&HistoryEvent) + Send>;

pub struct EditHistory {
    pub(crate) stack: Vec<HistoryEntry>,
    pub(crate) cursor: usize,
    pub(crate) checkpoints: BTreeMap<String, usize>,
    pub(crate) ids: IdAllocator,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
    sequence: u64,
    paused_at: Option<EntityGraph>,
}

impl fmt::Debug for EditHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditHistory")
            .field("len", &self.stack.len())
            .field("cursor", &self.cursor)
            .field("checkpoints", &self.checkpoints)
            .field("observers", &self.observers.len())
            .field("paused", &self.paused_at.is_some())
            .finish()
    }
}

impl EditHistory {
    pub fn new(base: EntityGraph) -> Self {
        EditHistory {
            stack: vec![HistoryEntry::new(base, None)],
            cursor: 0,
            checkpoints: BTreeMap::new(),
            ids: IdAllocator::new(),
            observers: Vec::new(),
            next_subscription: 0,
            sequence: 0,
            paused_at: None,
        }
    }

    /// Current version.
    pub fn graph(&self) -> &EntityGraph {
        &self.stack[self.cursor].graph
    }

    /// Loaded data without any edits.
    pub fn base(&self) -> EntityGraph {
        self.stack[0].graph.base()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.stack
    }

    pub fn checkpoints(&self) -> &BTreeMap<String, usize> {
        &self.checkpoints
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Mints a fresh id for a locally created entity.
    pub fn next_id(&mut self, kind: EntityKind) -> EntityId {
        self.ids.next(kind)
    }

    /// Runs `action` on the current version and records the result.
    ///
    /// The result is checked for dangling references first; on any error
    /// the stack is left exactly as it was. `Replace` and `Overwrite` at
    /// the base entry behave like `Perform` so the base survives.
    pub fn apply<A: Action + ?Sized>(
        &mut self,
        mode: ApplyMode,
        action: &A,
        annotation: Option<&str>,
    ) -> Result<Difference> {
        let mode = if self.cursor == 0 { ApplyMode::Perform } else { mode };
        let prev = self.graph().clone();
        let next = action.apply(&prev)?;
        let difference = Difference::compute(&prev, &next);
        if let Err(error) = integrity::verify(&prev, &next, &difference) {
            warn!(%error, ?annotation, "rejected action");
            return Err(error);
        }

        match mode {
            ApplyMode::Perform => {
                let cursor = self.cursor;
                self.stack.truncate(cursor + 1);
                self.checkpoints.retain(|_, index| *index <= cursor);
                self.stack.push(HistoryEntry::new(next, annotation));
                self.cursor += 1;
            }
            ApplyMode::Replace => {
                self.stack[self.cursor] = HistoryEntry::new(next, annotation);
            }
            ApplyMode::Overwrite => {
                self.stack[self.cursor].graph = next;
            }
        }

        debug!(
            ?mode,
            ?annotation,
            cursor = self.cursor,
            changed = difference.len(),
            "applied action"
        );
        self.emit(HistoryEventKind::Change, difference.clone());
        Ok(difference)
    }

    pub fn perform<A: Action + ?Sized>(&mut self, action: &A, annotation: Option<&str>) -> Result<Difference> {
        self.apply(ApplyMode::Perform, action, annotation)
    }

    pub fn replace<A: Action + ?Sized>(&mut self, action: &A, annotation: Option<&str>) -> Result<Difference> {
        self.apply(ApplyMode::Replace, action, annotation)
    }

    pub fn overwrite<A: Action + ?Sized>(&mut self, action: &A) -> Result<Difference> {
        self.apply(ApplyMode::Overwrite, action, None)
    }

    /// Drops the current step, and the redo tail with it.
    pub fn pop(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = self.graph().clone();
        self.stack.truncate(self.cursor);
        self.cursor -= 1;
        let cursor = self.cursor;
        self.checkpoints.retain(|_, index| *index <= cursor);

        let difference = Difference::compute(&prev, self.graph());
        debug!(cursor, "popped step");
        self.emit(HistoryEventKind::Change, difference);
        true
    }

    /// Lowest cursor reachable by `undo`.
    fn floor(&self) -> usize {
        self.checkpoints.values().copied().min().unwrap_or(0)
    }

    pub fn undo(&mut self) -> bool {
        if self.cursor <= self.floor() {
            return false;
        }
        let prev = self.graph().clone();
        self.cursor -= 1;
        let difference = Difference::compute(&prev, self.graph());
        debug!(cursor = self.cursor, "undo");
        self.emit(HistoryEventKind::Undone, difference);
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.cursor + 1 >= self.stack.len() {
            return false;
        }
        let prev = self.graph().clone();
        self.cursor += 1;
        let difference = Difference::compute(&prev, self.graph());
        debug!(cursor = self.cursor, "redo");
        self.emit(HistoryEventKind::Redone, difference);
        true
    }

    pub fn checkpoint(&mut self, name: &str) {
        debug!(checkpoint = name, cursor = self.cursor, "checkpoint");
        self.checkpoints.insert(name.to_string(), self.cursor);
    }

    /// Rolls back to a checkpoint, discarding everything after it, or with
    /// no name, back to a single empty version.
    pub fn reset(&mut self, name: Option<&str>) -> Result<()> {
        let prev = self.graph().clone();
        match name {
            Some(name) => {
                let index = *self
                    .checkpoints
                    .get(name)
                    .ok_or_else(|| Error::CheckpointNotFound(name.to_string()))?;
                self.stack.truncate(index + 1);
                self.cursor = index;
                self.checkpoints.retain(|_, i| *i <= index);
            }
            None => {
                self.stack = vec![HistoryEntry::new(EntityGraph::new(), None)];
                self.cursor = 0;
                self.checkpoints.clear();
                self.paused_at = None;
            }
        }

        let difference = Difference::compute(&prev, self.graph());
        info!(checkpoint = ?name, cursor = self.cursor, "history reset");
        self.emit(HistoryEventKind::Reset, difference);
        Ok(())
    }

    /// Adds fetched entities to the base shared by every stack entry.
    ///
    /// Edits keep precedence over merged data. When the base already holds
    /// a different version of an id, the merged one wins. Entities that
    /// arrive deleted upstream are skipped: edits may still reference the
    /// version already in the base.
    pub fn merge(&mut self, entities: Vec<Entity>, seen_ids: Vec<EntityId>) -> Difference {
        let prev = self.graph().clone();
        let base = self.base();
        let (entities, deleted): (Vec<Entity>, Vec<Entity>) =
            entities.into_iter().partition(|entity| entity.visible);
        if !deleted.is_empty() {
            debug!(skipped = deleted.len(), "skipping entities deleted upstream");
        }
        let count = entities.len();
        for entity in &entities {
            if let Some(existing) = base.lookup(&entity.id) {
                if **existing != *entity {
                    debug!(id = %entity.id, "merge conflict in base, keeping newer");
                }
            }
        }

        let merged = base.load(entities);
        for entry in &mut self.stack {
            entry.graph = entry.graph.rebase_onto(&merged);
        }
        if let Some(paused) = self.paused_at.take() {
            self.paused_at = Some(paused.rebase_onto(&merged));
        }

        let difference = Difference::compute(&prev, self.graph());
        info!(entities = count, seen = seen_ids.len(), "merged into base");
        self.emit(HistoryEventKind::Merged { seen_ids }, difference.clone());
        difference
    }

    /// Pending changes relative to the base entry.
    pub fn difference(&self) -> Difference {
        Difference::compute(&self.stack[0].graph, self.graph())
    }

    pub fn has_changes(&self) -> bool {
        !self.difference().is_empty()
    }

    pub fn annotation(&self) -> Option<&str> {
        self.stack[self.cursor].annotation.as_deref()
    }

    /// Annotation of the step `undo` would revert.
    pub fn undo_annotation(&self) -> Option<&str> {
        if self.cursor <= self.floor() {
            return None;
        }
        self.annotation()
    }

    /// Annotation of the step `redo` would reapply.
    pub fn redo_annotation(&self) -> Option<&str> {
        self.stack.get(self.cursor + 1)?.annotation.as_deref()
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&HistoryEvent) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    /// Silences notifications until `resume_change_dispatch`.
    pub fn pause_change_dispatch(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(self.graph().clone());
        }
    }

    /// Emits one `Change` covering everything since the pause.
    pub fn resume_change_dispatch(&mut self) -> Option<Difference> {
        let paused_at = self.paused_at.take()?;
        let difference = Difference::compute(&paused_at, self.graph());
        self.emit(HistoryEventKind::Change, difference.clone());
        Some(difference)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub(crate) fn emit(&mut self, kind: HistoryEventKind, difference: Difference) {
        if self.paused_at.is_some() {
            return;
        }
        self.sequence += 1;
        let event = HistoryEvent {
            sequence: self.sequence,
            kind,
            difference,
        };
        for (_, observer) in &mut self.observers {
            observer(&event);
        }
    }
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(EntityGraph::new())
    }
}
