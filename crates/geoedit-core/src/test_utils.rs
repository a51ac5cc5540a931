//! Test fixtures for geoedit-core

use crate::model::*;
use crate::graph::EntityGraph;

pub fn id(raw: &str) -> EntityId {
    EntityId::new(raw)
}

pub fn ids(raw: &[&str]) -> Vec<EntityId> {
    raw.iter().map(|r| id(r)).collect()
}

pub fn node(raw: &str, lon: f64, lat: f64) -> Entity {
    Entity::node(raw, Coord::new(lon, lat))
}

pub fn way(raw: &str, nodes: &[&str]) -> Entity {
    Entity::way(raw, ids(nodes))
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A base with a lone point `n1` at the origin.
pub fn single_point() -> EntityGraph {
    EntityGraph::from_entities(vec![node("n1", 0.0, 0.0)])
}

/// A small neighbourhood:
///
/// - `w1` road over `n1..n3`
/// - `w2` closed building ring over `n4..n6`
/// - `n7` tagged shop point
/// - `r1` route relation holding `w1`
pub fn neighbourhood() -> EntityGraph {
    EntityGraph::from_entities(vec![
        node("n1", 0.0, 0.0),
        node("n2", 0.001, 0.0),
        node("n3", 0.002, 0.0),
        way("w1", &["n1", "n2", "n3"]).with_tag("highway", "residential"),
        node("n4", 0.010, 0.010),
        node("n5", 0.011, 0.010),
        node("n6", 0.011, 0.011),
        way("w2", &["n4", "n5", "n6", "n4"]).with_tag("building", "yes"),
        node("n7", 0.005, 0.005).with_tag("shop", "bakery"),
        Entity::relation("r1", vec![Member::new("w1", EntityKind::Way, "")]).with_tag("type", "route"),
    ])
}
