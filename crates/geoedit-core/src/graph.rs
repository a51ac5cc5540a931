//! Layered entity graph with structural sharing between versions
//!
//! A version is a chain of layers. Base layers hold loaded data and stack on
//! each other, one per `load`. At most one edit layer sits on top and holds
//! every local change relative to the base chain. Versions are immutable and
//! share their layers through `Arc`, so a new version costs one copy of the
//! edit layer, never a copy of the dataset.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::model::*;

/// `None` marks an entity removed by this layer.
pub(crate) type Slot = Option<Arc<Entity>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerKind {
    Base,
    Edit,
}

#[derive(Debug, Clone, Copy)]
enum Link {
    Way,
    Relation,
}

struct Layer {
    kind: LayerKind,
    parent: Option<Arc<Layer>>,
    entities: Arc<HashMap<EntityId, Slot>>,
    /// Reverse references, built on first use and never invalidated:
    /// the layer it describes is immutable.
    parents: OnceLock<ParentIndex>,
    geometry: DashMap<EntityId, Geometry>,
}

/// Resolved parent sets for the child ids this layer touches. Every other
/// child resolves through the parent layer.
#[derive(Default)]
struct ParentIndex {
    ways: HashMap<EntityId, BTreeSet<EntityId>>,
    relations: HashMap<EntityId, BTreeSet<EntityId>>,
}

#[derive(Default)]
struct ParentDelta {
    added: HashMap<EntityId, Vec<EntityId>>,
    removed: HashMap<EntityId, Vec<EntityId>>,
}

impl ParentDelta {
    fn children(&self) -> BTreeSet<&EntityId> {
        self.added.keys().chain(self.removed.keys()).collect()
    }
}

impl Layer {
    fn new(kind: LayerKind, parent: Option<Arc<Layer>>, entities: Arc<HashMap<EntityId, Slot>>) -> Self {
        Layer {
            kind,
            parent,
            entities,
            parents: OnceLock::new(),
            geometry: DashMap::new(),
        }
    }

    fn lookup(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        let mut layer = self;
        loop {
            if let Some(slot) = layer.entities.get(id) {
                return slot.as_ref();
            }
            layer = layer.parent.as_deref()?;
        }
    }

    fn parent_index(&self) -> &ParentIndex {
        self.parents.get_or_init(|| self.build_parent_index())
    }

    fn parents_of(&self, link: Link, child: &EntityId) -> Option<&BTreeSet<EntityId>> {
        let mut layer = self;
        loop {
            let index = layer.parent_index();
            let map = match link {
                Link::Way => &index.ways,
                Link::Relation => &index.relations,
            };
            if let Some(parents) = map.get(child) {
                return Some(parents);
            }
            layer = layer.parent.as_deref()?;
        }
    }

    fn build_parent_index(&self) -> ParentIndex {
        let mut ways = ParentDelta::default();
        let mut relations = ParentDelta::default();

        for (id, slot) in self.entities.iter() {
            let previous = self
                .parent
                .as_deref()
                .and_then(|parent| parent.lookup(id))
                .filter(|entity| entity.visible);
            if let Some(previous) = previous {
                record_references(previous, id, &mut ways.removed, &mut relations.removed);
            }
            if let Some(current) = slot.as_ref().filter(|entity| entity.visible) {
                record_references(current, id, &mut ways.added, &mut relations.added);
            }
        }

        ParentIndex {
            ways: self.resolve_delta(Link::Way, &ways),
            relations: self.resolve_delta(Link::Relation, &relations),
        }
    }

    fn resolve_delta(&self, link: Link, delta: &ParentDelta) -> HashMap<EntityId, BTreeSet<EntityId>> {
        let mut resolved = HashMap::new();
        for child in delta.children() {
            let mut parents = self
                .parent
                .as_deref()
                .and_then(|parent| parent.parents_of(link, child))
                .cloned()
                .unwrap_or_default();
            if let Some(removed) = delta.removed.get(child) {
                for owner in removed {
                    parents.remove(owner);
                }
            }
            if let Some(added) = delta.added.get(child) {
                parents.extend(added.iter().cloned());
            }
            resolved.insert(child.clone(), parents);
        }
        resolved
    }
}

fn record_references(
    entity: &Entity,
    owner: &EntityId,
    ways: &mut HashMap<EntityId, Vec<EntityId>>,
    relations: &mut HashMap<EntityId, Vec<EntityId>>,
) {
    let target = match entity.kind() {
        EntityKind::Way => ways,
        EntityKind::Relation => relations,
        EntityKind::Node => return,
    };
    for child in entity.references() {
        target.entry(child.clone()).or_default().push(owner.clone());
    }
}

/// An immutable graph version.
#[derive(Clone)]
pub struct EntityGraph {
    head: Arc<Layer>,
}

impl fmt::Debug for EntityGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGraph")
            .field("depth", &self.depth())
            .field("has_edits", &self.has_edits())
            .finish()
    }
}

impl EntityGraph {
    /// An empty graph.
    pub fn new() -> Self {
        EntityGraph::layer(LayerKind::Base, None, Arc::new(HashMap::new()))
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        EntityGraph::new().load(entities)
    }

    fn layer(kind: LayerKind, parent: Option<Arc<Layer>>, entities: Arc<HashMap<EntityId, Slot>>) -> Self {
        EntityGraph {
            head: Arc::new(Layer::new(kind, parent, entities)),
        }
    }

    /// New version with `entities` in a fresh base layer on top of this
    /// version's base chain. Local edits keep precedence.
    pub fn load(&self, entities: impl IntoIterator<Item = Entity>) -> Self {
        let entities: HashMap<EntityId, Slot> = entities
            .into_iter()
            .map(|entity| (entity.id.clone(), Some(Arc::new(entity))))
            .collect();
        if entities.is_empty() {
            return self.clone();
        }

        let entities = Arc::new(entities);
        match self.head.kind {
            LayerKind::Base => EntityGraph::layer(LayerKind::Base, Some(self.head.clone()), entities),
            LayerKind::Edit => {
                let base = Arc::new(Layer::new(LayerKind::Base, self.head.parent.clone(), entities));
                EntityGraph::layer(LayerKind::Edit, Some(base), self.head.entities.clone())
            }
        }
    }

    pub fn replace(&self, entity: Entity) -> Self {
        let mut changes = HashMap::new();
        changes.insert(entity.id.clone(), Some(Arc::new(entity)));
        self.with_changes(changes)
    }

    pub fn remove(&self, id: &EntityId) -> Self {
        let mut changes = HashMap::new();
        changes.insert(id.clone(), None);
        self.with_changes(changes)
    }

    /// Applies a batch of replacements and removals as one new version.
    pub fn update<E>(
        &self,
        edit: impl FnOnce(&mut GraphEdit<'_>) -> std::result::Result<(), E>,
    ) -> std::result::Result<Self, E> {
        let mut batch = GraphEdit {
            graph: self,
            changes: HashMap::new(),
        };
        edit(&mut batch)?;
        let changes = batch.changes;
        Ok(self.with_changes(changes))
    }

    pub(crate) fn with_changes(&self, changes: HashMap<EntityId, Slot>) -> Self {
        if changes.is_empty() {
            return self.clone();
        }

        let (parent, mut entities) = match self.head.kind {
            LayerKind::Edit => (self.head.parent.clone(), (*self.head.entities).clone()),
            LayerKind::Base => (Some(self.head.clone()), HashMap::new()),
        };
        for (id, slot) in changes {
            let in_base = parent.as_deref().and_then(|p| p.lookup(&id)).is_some();
            match slot {
                Some(entity) => {
                    entities.insert(id, Some(entity));
                }
                None if in_base => {
                    entities.insert(id, None);
                }
                None => {
                    entities.remove(&id);
                }
            }
        }
        EntityGraph::layer(LayerKind::Edit, parent, Arc::new(entities))
    }

    /// Looks up a visible entity through the whole chain.
    pub fn entity(&self, id: &EntityId) -> Result<&Entity> {
        self.get(id).ok_or_else(|| Error::EntityNotFound(id.clone()))
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.head
            .lookup(id)
            .filter(|entity| entity.visible)
            .map(|entity| &**entity)
    }

    pub fn has_entity(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Raw lookup, invisible entities included.
    pub(crate) fn lookup(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.head.lookup(id)
    }

    pub fn parent_way_ids(&self, id: &EntityId) -> Vec<EntityId> {
        self.head
            .parents_of(Link::Way, id)
            .map(|parents| parents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn parent_relation_ids(&self, id: &EntityId) -> Vec<EntityId> {
        self.head
            .parents_of(Link::Relation, id)
            .map(|parents| parents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ways whose node list contains `id`, sorted by id.
    pub fn parent_ways(&self, id: &EntityId) -> Vec<&Entity> {
        self.head
            .parents_of(Link::Way, id)
            .into_iter()
            .flatten()
            .filter_map(|parent| self.get(parent))
            .collect()
    }

    /// Relations with `id` as a member, sorted by id.
    pub fn parent_relations(&self, id: &EntityId) -> Vec<&Entity> {
        self.head
            .parents_of(Link::Relation, id)
            .into_iter()
            .flatten()
            .filter_map(|parent| self.get(parent))
            .collect()
    }

    fn has_parent_ways(&self, id: &EntityId) -> bool {
        self.head
            .parents_of(Link::Way, id)
            .is_some_and(|parents| !parents.is_empty())
    }

    /// Derived classification, cached per version.
    pub fn geometry(&self, id: &EntityId) -> Option<Geometry> {
        if let Some(cached) = self.head.geometry.get(id) {
            return Some(*cached);
        }

        let entity = self.get(id)?;
        let geometry = match entity.kind() {
            EntityKind::Node if self.has_parent_ways(id) => Geometry::Vertex,
            EntityKind::Node => Geometry::Point,
            EntityKind::Way if entity.is_area() => Geometry::Area,
            EntityKind::Way => Geometry::Line,
            EntityKind::Relation if entity.tag("type") == Some("multipolygon") => Geometry::Area,
            EntityKind::Relation => Geometry::Relation,
        };
        self.head.geometry.insert(id.clone(), geometry);
        Some(geometry)
    }

    /// Bounding box of an entity and everything it references.
    pub fn extent(&self, id: &EntityId) -> Option<Extent> {
        let mut visiting = HashSet::new();
        self.extent_inner(id, &mut visiting)
    }

    fn extent_inner(&self, id: &EntityId, visiting: &mut HashSet<EntityId>) -> Option<Extent> {
        let entity = self.get(id)?;
        match &entity.data {
            EntityData::Node { loc } => Some(Extent::from_point(*loc)),
            EntityData::Way { nodes } => nodes
                .iter()
                .filter_map(|node| self.get(node).and_then(Entity::loc))
                .map(Extent::from_point)
                .reduce(|acc, extent| acc.union(&extent)),
            EntityData::Relation { members } => {
                // relations may nest cyclically
                if !visiting.insert(id.clone()) {
                    return None;
                }
                members
                    .iter()
                    .filter_map(|member| self.extent_inner(&member.id, visiting))
                    .reduce(|acc, extent| acc.union(&extent))
            }
        }
    }

    /// Every visible entity of this version.
    pub fn entities(&self) -> Vec<&Entity> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for layer in self.chain() {
            for (id, slot) in layer.entities.iter() {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(entity) = slot.as_ref().filter(|entity| entity.visible) {
                    entities.push(&**entity);
                }
            }
        }
        entities
    }

    /// The edit layer, sorted by id. `None` marks a removal.
    pub(crate) fn edits(&self) -> Vec<(&EntityId, Option<&Arc<Entity>>)> {
        if self.head.kind != LayerKind::Edit {
            return Vec::new();
        }
        let mut edits: Vec<_> = self
            .head
            .entities
            .iter()
            .map(|(id, slot)| (id, slot.as_ref()))
            .collect();
        edits.sort_by(|a, b| a.0.cmp(b.0));
        edits
    }

    pub fn has_edits(&self) -> bool {
        self.head.kind == LayerKind::Edit && !self.head.entities.is_empty()
    }

    pub fn edit_count(&self) -> usize {
        match self.head.kind {
            LayerKind::Edit => self.head.entities.len(),
            LayerKind::Base => 0,
        }
    }

    /// This version with its edit layer stripped.
    pub fn base(&self) -> EntityGraph {
        match (&self.head.kind, &self.head.parent) {
            (LayerKind::Edit, Some(parent)) => EntityGraph { head: parent.clone() },
            _ => self.clone(),
        }
    }

    /// Re-points this version's edit layer at `base`'s chain. The edit layer
    /// itself is shared, not copied.
    pub fn rebase_onto(&self, base: &EntityGraph) -> EntityGraph {
        let base = base.base();
        match self.head.kind {
            LayerKind::Edit => {
                EntityGraph::layer(LayerKind::Edit, Some(base.head), self.head.entities.clone())
            }
            LayerKind::Base => base,
        }
    }

    /// Same version, not merely equal content.
    pub fn ptr_eq(&self, other: &EntityGraph) -> bool {
        Arc::ptr_eq(&self.head, &other.head)
    }

    /// Number of layers in the chain.
    pub fn depth(&self) -> usize {
        self.chain().len()
    }

    fn chain(&self) -> Vec<&Layer> {
        let mut chain = Vec::new();
        let mut layer = Some(self.head.as_ref());
        while let Some(current) = layer {
            chain.push(current);
            layer = current.parent.as_deref();
        }
        chain
    }

    /// Ids that may resolve differently in `self` and `other`: everything in
    /// the layers above their deepest shared layer.
    pub(crate) fn divergent_ids(&self, other: &EntityGraph) -> BTreeSet<EntityId> {
        let ours = self.chain();
        let theirs = other.chain();
        let their_layers: HashSet<*const Layer> =
            theirs.iter().map(|layer| *layer as *const Layer).collect();

        let mut ids = BTreeSet::new();
        let mut shared = None;
        for layer in &ours {
            let ptr = *layer as *const Layer;
            if their_layers.contains(&ptr) {
                shared = Some(ptr);
                break;
            }
            ids.extend(layer.entities.keys().cloned());
        }
        for layer in &theirs {
            if shared == Some(*layer as *const Layer) {
                break;
            }
            ids.extend(layer.entities.keys().cloned());
        }
        ids
    }
}

impl Default for EntityGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// A batch of changes on top of one graph version.
pub struct GraphEdit<'a> {
    graph: &'a EntityGraph,
    changes: HashMap<EntityId, Slot>,
}

impl<'a> GraphEdit<'a> {
    /// The version this batch started from. Parent lookups only see that
    /// version, not the pending changes.
    pub fn graph(&self) -> &'a EntityGraph {
        self.graph
    }

    /// Visible entity, pending changes included.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        match self.changes.get(id) {
            Some(slot) => slot.as_deref().filter(|entity| entity.visible),
            None => self.graph.get(id),
        }
    }

    pub fn entity(&self, id: &EntityId) -> Result<&Entity> {
        self.get(id).ok_or_else(|| Error::EntityNotFound(id.clone()))
    }

    pub fn replace(&mut self, entity: Entity) {
        self.changes.insert(entity.id.clone(), Some(Arc::new(entity)));
    }

    pub fn remove(&mut self, id: &EntityId) {
        self.changes.insert(id.clone(), None);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
