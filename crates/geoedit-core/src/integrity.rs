//! Referential integrity checks

use std::collections::HashSet;

use crate::diff::Difference;
use crate::error::{Error, Result};
use crate::graph::EntityGraph;
use crate::model::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityIssue {
    #[error("{owner} references missing entity {missing}")]
    MissingReference { owner: EntityId, missing: EntityId },

    #[error("{id} is removed but still referenced by {parent}")]
    DanglingParent { id: EntityId, parent: EntityId },
}

/// Checks the step from `prev` to `next` described by `diff`.
///
/// References an entity already held in `prev` are not re-checked, so a
/// way whose nodes were never loaded may still be retagged.
pub fn verify(prev: &EntityGraph, next: &EntityGraph, diff: &Difference) -> Result<()> {
    for id in diff.touched() {
        let Some(entity) = next.get(id) else {
            let parent = next
                .parent_way_ids(id)
                .into_iter()
                .chain(next.parent_relation_ids(id))
                .next();
            if let Some(parent) = parent {
                let issue = IntegrityIssue::DanglingParent { id: id.clone(), parent };
                return Err(Error::InvalidAction(issue.to_string()));
            }
            continue;
        };

        let previous: HashSet<&EntityId> = prev
            .get(id)
            .map(|old| old.references().collect())
            .unwrap_or_default();
        for child in entity.references() {
            if !previous.contains(child) && !next.has_entity(child) {
                let issue = IntegrityIssue::MissingReference {
                    owner: id.clone(),
                    missing: child.clone(),
                };
                return Err(Error::InvalidAction(issue.to_string()));
            }
        }
    }
    Ok(())
}

/// Full scan: every reference of every visible entity, sorted by owner.
pub fn verify_graph(graph: &EntityGraph) -> Vec<IntegrityIssue> {
    let mut entities = graph.entities();
    entities.sort_by(|a, b| a.id.cmp(&b.id));

    let mut issues = Vec::new();
    for entity in entities {
        for child in entity.references() {
            if !graph.has_entity(child) {
                issues.push(IntegrityIssue::MissingReference {
                    owner: entity.id.clone(),
                    missing: child.clone(),
                });
            }
        }
    }
    issues.dedup();
    issues
}

/// Checks only the edit layer of `graph`.
///
/// A reference counts as broken when it no longer resolves although the
/// base holds it, or when it names a locally created id. References the
/// base never had are data that was simply not loaded.
pub fn verify_edits(graph: &EntityGraph) -> Vec<IntegrityIssue> {
    let base = graph.base();
    let mut issues = Vec::new();
    for (id, slot) in graph.edits() {
        match slot.filter(|entity| entity.visible) {
            Some(entity) => {
                for child in entity.references() {
                    let known = child.is_new() || base.lookup(child).is_some();
                    if known && !graph.has_entity(child) {
                        issues.push(IntegrityIssue::MissingReference {
                            owner: id.clone(),
                            missing: child.clone(),
                        });
                    }
                }
            }
            None => {
                let parents = graph
                    .parent_way_ids(id)
                    .into_iter()
                    .chain(graph.parent_relation_ids(id));
                for parent in parents {
                    issues.push(IntegrityIssue::DanglingParent { id: id.clone(), parent });
                }
            }
        }
    }
    issues.dedup();
    issues
}
