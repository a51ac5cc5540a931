//! Grid-bucketed bounding box index
//!
//! Every visible entity of the indexed version is a member, including the
//! ones without a resolvable extent; those are simply never returned by
//! extent queries.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::diff::Difference;
use crate::graph::EntityGraph;
use crate::model::{EntityId, Extent};

/// Default cell edge in degrees.
pub const DEFAULT_CELL_SIZE: f64 = 0.01;

/// Entities spanning more cells than this skip the grid and are scanned.
const MAX_CELLS: i64 = 4096;

type Cell = (i64, i64);

#[derive(Debug)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<Cell, HashSet<EntityId>>,
    extents: HashMap<EntityId, Option<Extent>>,
    oversized: HashSet<EntityId>,
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        SpatialIndex {
            cell_size,
            cells: HashMap::new(),
            extents: HashMap::new(),
            oversized: HashSet::new(),
        }
    }

    /// From-scratch index of every visible entity of `graph`.
    pub fn build(graph: &EntityGraph, cell_size: f64) -> Self {
        let mut index = SpatialIndex::new(cell_size);
        for entity in graph.entities() {
            index.insert(entity.id.clone(), graph.extent(&entity.id));
        }
        index
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    fn to_cell(&self, lon: f64, lat: f64) -> Cell {
        (
            (lon / self.cell_size).floor() as i64,
            (lat / self.cell_size).floor() as i64,
        )
    }

    fn cell_range(&self, extent: &Extent) -> (Cell, Cell) {
        (
            self.to_cell(extent.min.lon, extent.min.lat),
            self.to_cell(extent.max.lon, extent.max.lat),
        )
    }

    fn is_oversized(&self, extent: &Extent) -> bool {
        let ((min_x, min_y), (max_x, max_y)) = self.cell_range(extent);
        let width = max_x.saturating_sub(min_x).saturating_add(1);
        let height = max_y.saturating_sub(min_y).saturating_add(1);
        width.saturating_mul(height) > MAX_CELLS
    }

    fn cells_for(&self, extent: &Extent) -> Vec<Cell> {
        let ((min_x, min_y), (max_x, max_y)) = self.cell_range(extent);
        let mut cells = Vec::new();
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                cells.push((x, y));
            }
        }
        cells
    }

    /// Adds or refreshes one entry.
    pub fn insert(&mut self, id: EntityId, extent: Option<Extent>) {
        self.remove(&id);
        if let Some(extent) = &extent {
            if self.is_oversized(extent) {
                self.oversized.insert(id.clone());
            } else {
                for cell in self.cells_for(extent) {
                    self.cells.entry(cell).or_default().insert(id.clone());
                }
            }
        }
        self.extents.insert(id, extent);
    }

    pub fn remove(&mut self, id: &EntityId) -> bool {
        let Some(previous) = self.extents.remove(id) else {
            return false;
        };
        if let Some(extent) = previous {
            if !self.oversized.remove(id) {
                for cell in self.cells_for(&extent) {
                    if let Some(members) = self.cells.get_mut(&cell) {
                        members.remove(id);
                        if members.is_empty() {
                            self.cells.remove(&cell);
                        }
                    }
                }
            }
        }
        true
    }

    /// Brings the index from `prev` to `graph`, touching only what changed.
    pub fn rebase(&mut self, prev: &EntityGraph, graph: &EntityGraph) {
        let difference = Difference::compute(prev, graph);
        self.apply_difference(&difference, graph);
    }

    /// Refreshes the touched and extant ids of `difference`, plus every
    /// way and relation in `graph` containing them.
    pub fn apply_difference(&mut self, difference: &Difference, graph: &EntityGraph) {
        if difference.is_empty() {
            return;
        }
        let ids = difference.complete(graph);
        for id in &ids {
            if graph.has_entity(id) {
                self.insert(id.clone(), graph.extent(id));
            } else {
                self.remove(id);
            }
        }
        debug!(refreshed = ids.len(), indexed = self.len(), "spatial index rebased");
    }

    /// Ids whose extent touches `extent`, sorted.
    pub fn intersects(&self, extent: &Extent) -> Vec<EntityId> {
        let mut found = BTreeSet::new();
        if self.is_oversized(extent) {
            for (id, entry) in &self.extents {
                if entry.is_some_and(|candidate| candidate.intersects(extent)) {
                    found.insert(id.clone());
                }
            }
            return found.into_iter().collect();
        }

        for cell in self.cells_for(extent) {
            let Some(members) = self.cells.get(&cell) else {
                continue;
            };
            for id in members {
                if found.contains(id) {
                    continue;
                }
                if self.extent_of(id).is_some_and(|candidate| candidate.intersects(extent)) {
                    found.insert(id.clone());
                }
            }
        }
        for id in &self.oversized {
            if self.extent_of(id).is_some_and(|candidate| candidate.intersects(extent)) {
                found.insert(id.clone());
            }
        }
        found.into_iter().collect()
    }

    pub fn extent_of(&self, id: &EntityId) -> Option<Extent> {
        self.extents.get(id).copied().flatten()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.extents.contains_key(id)
    }

    /// Every member, sorted.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.extents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.extents.clear();
        self.oversized.clear();
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}
