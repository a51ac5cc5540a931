//! Geoedit Core: versioned entity graph, actions, differences and undo history

pub mod action;
pub mod actions;
pub mod diff;
pub mod error;
pub mod graph;
pub mod history;
pub mod integrity;
pub mod model;
pub mod snapshot;
pub mod spatial;


#[cfg(test)]
pub mod test_utils;

pub use action::{Action, BoxedAction};
pub use diff::{Change, ChangeType, Difference, SummaryEntry};
pub use error::{Error, Result};
pub use graph::{EntityGraph, GraphEdit};
pub use history::{ApplyMode, EditHistory, HistoryEntry, HistoryEvent, HistoryEventKind, SubscriptionId};
pub use integrity::{IntegrityIssue, verify, verify_edits, verify_graph};
pub use model::{
    Coord, Entity, EntityData, EntityId, EntityKind, Extent, Geometry, IdAllocator, MAX_TAG_CHARS, Member,
    Tags, clean_relation_role, clean_tag_key, clean_tag_value,
};
pub use snapshot::{HistorySnapshot, HistoryState, SNAPSHOT_VERSION, SnapshotEntry};
pub use spatial::{DEFAULT_CELL_SIZE, SpatialIndex};
