//! Built-in actions
//!
//! Each constructor captures its parameters and returns an [`Action`]; the
//! graph is only touched when the action is applied.

use std::collections::BTreeSet;

use crate::action::{Action, BoxedAction};
use crate::error::{Error, Result};
use crate::graph::{EntityGraph, GraphEdit};
use crate::model::*;

/// Leaves the graph as it is. Used to close an undo step.
pub fn noop() -> impl Action {
    |graph: &EntityGraph| -> Result<EntityGraph> { Ok(graph.clone()) }
}

pub fn add_entity(entity: Entity) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        if graph.has_entity(&entity.id) {
            return Err(Error::InvalidAction(format!("{} already exists", entity.id)));
        }
        Ok(graph.replace(entity.clone()))
    }
}

fn require_node<'g>(graph: &'g EntityGraph, id: &EntityId) -> Result<&'g Entity> {
    let entity = graph.entity(id)?;
    if entity.kind() != EntityKind::Node {
        return Err(Error::InvalidAction(format!("{id} is not a node")));
    }
    Ok(entity)
}

/// New way over existing nodes.
pub fn add_way(id: EntityId, nodes: Vec<EntityId>, tags: Tags) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        if nodes.len() < 2 {
            return Err(Error::InvalidAction(format!("way {id} needs at least two nodes")));
        }
        if graph.has_entity(&id) {
            return Err(Error::InvalidAction(format!("{id} already exists")));
        }
        for node in &nodes {
            require_node(graph, node)?;
        }
        let mut way = Entity::way(id.clone(), nodes.clone());
        for (key, value) in &tags {
            way = way.with_tag(key, value);
        }
        Ok(graph.replace(way))
    }
}

/// Inserts an existing node into a way at `index`.
pub fn add_vertex(way: EntityId, node: EntityId, index: usize) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        require_node(graph, &node)?;
        let mut entity = graph.entity(&way)?.clone();
        let EntityData::Way { nodes } = &mut entity.data else {
            return Err(Error::InvalidAction(format!("{way} is not a way")));
        };
        if index > nodes.len() {
            return Err(Error::InvalidAction(format!(
                "index {index} out of range for {way} ({} nodes)",
                nodes.len()
            )));
        }
        nodes.insert(index, node.clone());
        Ok(graph.replace(entity))
    }
}

pub fn move_node(id: EntityId, dlon: f64, dlat: f64) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let mut node = require_node(graph, &id)?.clone();
        if let EntityData::Node { loc } = &mut node.data {
            *loc = loc.offset(dlon, dlat);
        }
        Ok(graph.replace(node))
    }
}

fn collect_nodes(graph: &EntityGraph, id: &EntityId, visited: &mut BTreeSet<EntityId>, nodes: &mut BTreeSet<EntityId>) -> Result<()> {
    if !visited.insert(id.clone()) {
        return Ok(());
    }
    let entity = graph.entity(id)?;
    match &entity.data {
        EntityData::Node { .. } => {
            nodes.insert(id.clone());
        }
        EntityData::Way { nodes: way_nodes } => nodes.extend(way_nodes.iter().cloned()),
        EntityData::Relation { members } => {
            for member in members {
                if graph.has_entity(&member.id) {
                    collect_nodes(graph, &member.id, visited, nodes)?;
                }
            }
        }
    }
    Ok(())
}

/// Moves every node under `ids` exactly once: the nodes themselves, the
/// nodes of ways, and the members of relations, recursively.
pub fn move_entities(ids: Vec<EntityId>, dlon: f64, dlat: f64) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let mut visited = BTreeSet::new();
        let mut nodes = BTreeSet::new();
        for id in &ids {
            collect_nodes(graph, id, &mut visited, &mut nodes)?;
        }

        graph.update(|edit| -> Result<()> {
            for id in &nodes {
                let mut node = edit.entity(id)?.clone();
                if let EntityData::Node { loc } = &mut node.data {
                    *loc = loc.offset(dlon, dlat);
                }
                edit.replace(node);
            }
            Ok(())
        })
    }
}

/// Drops every membership of `id` from the relations that hold it.
fn remove_memberships(edit: &mut GraphEdit<'_>, id: &EntityId) -> Result<()> {
    for relation_id in edit.graph().parent_relation_ids(id) {
        let mut relation = edit.entity(&relation_id)?.clone();
        if let EntityData::Relation { members } = &mut relation.data {
            members.retain(|member| &member.id != id);
        }
        edit.replace(relation);
    }
    Ok(())
}

/// Removes a node that no way uses. Relation memberships go with it.
pub fn delete_node(id: EntityId) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        require_node(graph, &id)?;
        if let Some(way) = graph.parent_way_ids(&id).first() {
            return Err(Error::InvalidAction(format!("{id} is still used by {way}")));
        }
        graph.update(|edit| -> Result<()> {
            remove_memberships(edit, &id)?;
            edit.remove(&id);
            Ok(())
        })
    }
}

/// Removes a way, its relation memberships, and the untagged nodes that
/// nothing else uses.
pub fn delete_way(id: EntityId) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let way = graph.entity(&id)?;
        if way.kind() != EntityKind::Way {
            return Err(Error::InvalidAction(format!("{id} is not a way")));
        }
        let nodes: BTreeSet<&EntityId> = way.nodes().iter().collect();

        graph.update(|edit| -> Result<()> {
            remove_memberships(edit, &id)?;
            edit.remove(&id);
            for node in nodes {
                let orphan = graph.parent_way_ids(node).iter().all(|parent| parent == &id)
                    && graph.parent_relation_ids(node).is_empty()
                    && graph.get(node).is_some_and(|entity| entity.tags.is_empty());
                if orphan {
                    edit.remove(node);
                }
            }
            Ok(())
        })
    }
}

/// Replaces the whole tag set. Keys and values are cleaned, empty keys
/// dropped.
pub fn change_tags(id: EntityId, tags: Tags) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let mut entity = graph.entity(&id)?.clone();
        entity.tags = tags
            .iter()
            .map(|(key, value)| (clean_tag_key(key), clean_tag_value(value)))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Ok(graph.replace(entity))
    }
}

/// Adds a membership at `index`, or at the end.
pub fn add_member(relation: EntityId, member: Member, index: Option<usize>) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let target = graph
            .get(&member.id)
            .ok_or_else(|| Error::InvalidAction(format!("member {} does not exist", member.id)))?;
        if target.kind() != member.kind {
            return Err(Error::InvalidAction(format!(
                "member {} is a {:?}, not a {:?}",
                member.id,
                target.kind(),
                member.kind
            )));
        }

        let mut entity = graph.entity(&relation)?.clone();
        let EntityData::Relation { members } = &mut entity.data else {
            return Err(Error::InvalidAction(format!("{relation} is not a relation")));
        };
        let member = Member::new(member.id.clone(), member.kind, &member.role);
        match index {
            Some(index) if index <= members.len() => members.insert(index, member),
            Some(index) => {
                return Err(Error::InvalidAction(format!("index {index} out of range for {relation}")));
            }
            None => members.push(member),
        }
        Ok(graph.replace(entity))
    }
}

pub fn remove_member(relation: EntityId, index: usize) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let mut entity = graph.entity(&relation)?.clone();
        let EntityData::Relation { members } = &mut entity.data else {
            return Err(Error::InvalidAction(format!("{relation} is not a relation")));
        };
        if index >= members.len() {
            return Err(Error::InvalidAction(format!("index {index} out of range for {relation}")));
        }
        members.remove(index);
        Ok(graph.replace(entity))
    }
}

/// Folds `actions` left to right. The first failure aborts the whole fold.
pub fn compose(actions: Vec<BoxedAction>) -> impl Action {
    move |graph: &EntityGraph| -> Result<EntityGraph> {
        let mut current = graph.clone();
        for action in &actions {
            current = action.apply(&current)?;
        }
        Ok(current)
    }
}
