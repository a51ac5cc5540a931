//! Error taxonomy for graph lookups, actions and history operations

use crate::model::EntityId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    /// The action would break referential integrity. Nothing was applied.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("checkpoint '{0}' not found")]
    CheckpointNotFound(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Snapshot(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
