//! Core data structures for the entity graph

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest tag key, tag value or relation role, in Unicode scalar values.
pub const MAX_TAG_CHARS: usize = 255;

/// Tag keys whose presence turns a closed way into an area.
pub const AREA_KEYS: &[&str] = &[
    "amenity",
    "building",
    "landuse",
    "leisure",
    "natural",
    "place",
    "shop",
    "tourism",
    "water",
    "wetland",
];

/// Globally unique entity identifier, OSM style (`n1`, `w-3`, `r7`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind implied by the id prefix. The entity's own kind is authoritative.
    pub fn kind_hint(&self) -> Option<EntityKind> {
        match self.0.chars().next() {
            Some('n') => Some(EntityKind::Node),
            Some('w') => Some(EntityKind::Way),
            Some('r') => Some(EntityKind::Relation),
            _ => None,
        }
    }

    /// Ids minted locally carry a negative number (`n-1`).
    pub fn is_new(&self) -> bool {
        self.0.chars().nth(1) == Some('-')
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId(id)
    }
}

/// Discriminates what kind of map entity a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
}

impl EntityKind {
    pub fn prefix(&self) -> char {
        match self {
            EntityKind::Node => 'n',
            EntityKind::Way => 'w',
            EntityKind::Relation => 'r',
        }
    }
}

/// Derived classification of an entity in its graph context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Geometry {
    /// Standalone node.
    Point,
    /// Node used by at least one way.
    Vertex,
    Line,
    Area,
    /// Relation that is not a multipolygon.
    Relation,
}

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Coord { lon, lat }
    }

    pub fn offset(&self, dlon: f64, dlat: f64) -> Self {
        Coord::new(self.lon + dlon, self.lat + dlat)
    }
}

/// Axis-aligned bounding box in lon/lat space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min: Coord,
    pub max: Coord,
}

impl Extent {
    /// Builds an extent from two opposite corners in any order.
    pub fn new(a: Coord, b: Coord) -> Self {
        Extent {
            min: Coord::new(a.lon.min(b.lon), a.lat.min(b.lat)),
            max: Coord::new(a.lon.max(b.lon), a.lat.max(b.lat)),
        }
    }

    pub fn from_point(point: Coord) -> Self {
        Extent { min: point, max: point }
    }

    pub fn extend(&mut self, other: &Extent) {
        self.min.lon = self.min.lon.min(other.min.lon);
        self.min.lat = self.min.lat.min(other.min.lat);
        self.max.lon = self.max.lon.max(other.max.lon);
        self.max.lat = self.max.lat.max(other.max.lat);
    }

    pub fn union(mut self, other: &Extent) -> Self {
        self.extend(other);
        self
    }

    /// Touching edges count as intersecting.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min.lon <= other.max.lon
            && other.min.lon <= self.max.lon
            && self.min.lat <= other.max.lat
            && other.min.lat <= self.max.lat
    }

    pub fn contains(&self, point: &Coord) -> bool {
        point.lon >= self.min.lon
            && point.lon <= self.max.lon
            && point.lat >= self.min.lat
            && point.lat <= self.max.lat
    }
}

pub type Tags = BTreeMap<String, String>;

/// One membership of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: EntityId,
    pub kind: EntityKind,
    pub role: String,
}

impl Member {
    pub fn new(id: impl Into<EntityId>, kind: EntityKind, role: &str) -> Self {
        Member {
            id: id.into(),
            kind,
            role: clean_relation_role(role),
        }
    }
}

/// Kind-specific payload of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityData {
    Node { loc: Coord },
    Way { nodes: Vec<EntityId> },
    Relation { members: Vec<Member> },
}

/// A single record in the geodata graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Invisible entities were deleted upstream and behave as absent.
    pub visible: bool,
    pub tags: Tags,
    pub data: EntityData,
}

impl Entity {
    pub fn node(id: impl Into<EntityId>, loc: Coord) -> Self {
        Entity {
            id: id.into(),
            visible: true,
            tags: Tags::new(),
            data: EntityData::Node { loc },
        }
    }

    pub fn way(id: impl Into<EntityId>, nodes: Vec<EntityId>) -> Self {
        Entity {
            id: id.into(),
            visible: true,
            tags: Tags::new(),
            data: EntityData::Way { nodes },
        }
    }

    pub fn relation(id: impl Into<EntityId>, members: Vec<Member>) -> Self {
        Entity {
            id: id.into(),
            visible: true,
            tags: Tags::new(),
            data: EntityData::Relation { members },
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(clean_tag_key(key), clean_tag_value(value));
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn kind(&self) -> EntityKind {
        match self.data {
            EntityData::Node { .. } => EntityKind::Node,
            EntityData::Way { .. } => EntityKind::Way,
            EntityData::Relation { .. } => EntityKind::Relation,
        }
    }

    pub fn loc(&self) -> Option<Coord> {
        match self.data {
            EntityData::Node { loc } => Some(loc),
            _ => None,
        }
    }

    /// Node ids of a way; empty for other kinds.
    pub fn nodes(&self) -> &[EntityId] {
        match &self.data {
            EntityData::Way { nodes } => nodes,
            _ => &[],
        }
    }

    /// Memberships of a relation; empty for other kinds.
    pub fn members(&self) -> &[Member] {
        match &self.data {
            EntityData::Relation { members } => members,
            _ => &[],
        }
    }

    /// Every id this entity points at, in order, duplicates included.
    pub fn references(&self) -> Box<dyn Iterator<Item = &EntityId> + '_> {
        match &self.data {
            EntityData::Node { .. } => Box::new(std::iter::empty()),
            EntityData::Way { nodes } => Box::new(nodes.iter()),
            EntityData::Relation { members } => Box::new(members.iter().map(|m| &m.id)),
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        let nodes = self.nodes();
        nodes.len() > 1 && nodes.first() == nodes.last()
    }

    /// Closed way carrying area semantics.
    pub fn is_area(&self) -> bool {
        if self.kind() != EntityKind::Way || !self.is_closed() {
            return false;
        }
        match self.tag("area") {
            Some("yes") => true,
            Some("no") => false,
            _ => AREA_KEYS.iter().any(|key| self.tags.contains_key(*key)),
        }
    }
}

/// Mints fresh negative ids for locally created entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdAllocator {
    pub node: i64,
    pub way: i64,
    pub relation: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, kind: EntityKind) -> EntityId {
        let counter = match kind {
            EntityKind::Node => &mut self.node,
            EntityKind::Way => &mut self.way,
            EntityKind::Relation => &mut self.relation,
        };
        *counter -= 1;
        EntityId(format!("{}{}", kind.prefix(), counter))
    }
}

fn clean_string(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

pub fn clean_tag_key(key: &str) -> String {
    clean_string(key, MAX_TAG_CHARS)
}

pub fn clean_tag_value(value: &str) -> String {
    clean_string(value, MAX_TAG_CHARS)
}

pub fn clean_relation_role(role: &str) -> String {
    clean_string(role, MAX_TAG_CHARS)
}
