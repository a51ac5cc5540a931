//! Difference computation between two graph versions
//!
//! Only ids living in the layers above the deepest layer the two versions
//! share are examined, so cost follows the size of the edits rather than
//! the size of the dataset.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::EntityGraph;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

/// Classification of one touched id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: EntityKind,
    pub change: ChangeType,
}

/// One row of [`Difference::summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub id: EntityId,
    pub kind: EntityKind,
    pub change: ChangeType,
}

/// Created, modified and deleted ids between two versions, plus the
/// unchanged ids whose containment changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Difference {
    changes: BTreeMap<EntityId, Change>,
    extant: BTreeSet<EntityId>,
}

impl Difference {
    pub fn compute(prev: &EntityGraph, next: &EntityGraph) -> Self {
        let mut diff = Difference::default();
        if prev.ptr_eq(next) {
            return diff;
        }

        let mut referenced = BTreeSet::new();
        for id in prev.divergent_ids(next) {
            let before = prev.lookup(&id).filter(|entity| entity.visible);
            let after = next.lookup(&id).filter(|entity| entity.visible);

            let change = match (before, after) {
                (None, None) => continue,
                (Some(old), Some(new)) if Arc::ptr_eq(old, new) || old == new => continue,
                (None, Some(new)) => {
                    referenced.extend(new.references().cloned());
                    Change { kind: new.kind(), change: ChangeType::Created }
                }
                (Some(old), None) => {
                    referenced.extend(old.references().cloned());
                    Change { kind: old.kind(), change: ChangeType::Deleted }
                }
                (Some(old), Some(new)) => {
                    let old_refs: BTreeSet<&EntityId> = old.references().collect();
                    let new_refs: BTreeSet<&EntityId> = new.references().collect();
                    referenced.extend(old_refs.symmetric_difference(&new_refs).map(|id| (*id).clone()));
                    Change { kind: new.kind(), change: ChangeType::Modified }
                }
            };
            diff.changes.insert(id, change);
        }

        diff.extant = referenced
            .into_iter()
            .filter(|id| !diff.changes.contains_key(id))
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of touched ids.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    fn with_change(&self, change: ChangeType) -> Vec<&EntityId> {
        self.changes
            .iter()
            .filter(|(_, c)| c.change == change)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn created(&self) -> Vec<&EntityId> {
        self.with_change(ChangeType::Created)
    }

    pub fn modified(&self) -> Vec<&EntityId> {
        self.with_change(ChangeType::Modified)
    }

    pub fn deleted(&self) -> Vec<&EntityId> {
        self.with_change(ChangeType::Deleted)
    }

    /// Every created, modified or deleted id, sorted.
    pub fn touched(&self) -> Vec<&EntityId> {
        self.changes.keys().collect()
    }

    /// Unchanged ids that gained or lost a referencing way or relation.
    pub fn extant(&self) -> &BTreeSet<EntityId> {
        &self.extant
    }

    pub fn change(&self, id: &EntityId) -> Option<&Change> {
        self.changes.get(id)
    }

    pub fn summary(&self) -> Vec<SummaryEntry> {
        self.changes
            .iter()
            .map(|(id, change)| SummaryEntry {
                id: id.clone(),
                kind: change.kind,
                change: change.change,
            })
            .collect()
    }

    /// Touched and extant ids widened with every way and relation in
    /// `head` that contains them, transitively.
    pub fn complete(&self, head: &EntityGraph) -> BTreeSet<EntityId> {
        let mut complete: BTreeSet<EntityId> = self.changes.keys().cloned().collect();
        complete.extend(self.extant.iter().cloned());

        let mut queue: VecDeque<EntityId> = complete.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            let parents = head
                .parent_way_ids(&id)
                .into_iter()
                .chain(head.parent_relation_ids(&id));
            for parent in parents {
                if complete.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
        }
        complete
    }
}
