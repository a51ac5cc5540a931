//! Geoedit Session: the editing context plus background loading and
//! debounced persistence

pub mod config;
pub mod loader;
pub mod persist;
pub mod session;
pub mod source;
pub mod store;

pub use config::{SessionConfig, StoreFormat};
pub use loader::{LoadOutcome, LoadRequest, Loader};
pub use persist::SaveScheduler;
pub use session::{EditSession, LoadStatus};
pub use source::{DataSource, LoadBatch, LoadError, MemorySource};
pub use store::{SNAPSHOT_BIN, SNAPSHOT_JSON, SnapshotStore};
