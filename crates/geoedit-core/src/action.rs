//! The action contract: one atomic, pure edit of a graph version

use crate::error::Result;
use crate::graph::EntityGraph;

/// A deterministic transform from one graph version to the next.
///
/// Implementations never mutate their input; they return a new version
/// built with `replace`, `remove` or `update`. An action that would leave a
/// dangling reference returns [`crate::Error::InvalidAction`] instead.
pub trait Action {
    fn apply(&self, graph: &EntityGraph) -> Result<EntityGraph>;
}

impl<F> Action for F
where
    F: Fn(&EntityGraph) -> Result<EntityGraph>,
{
    fn apply(&self, graph: &EntityGraph) -> Result<EntityGraph> {
        self(graph)
    }
}

pub type BoxedAction = Box<dyn Action + Send + Sync>;
