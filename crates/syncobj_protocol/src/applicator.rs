//! The applicator capability.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Folds commands into a state for one data shape.
///
/// Both the object store and every client replica hold the same applicator,
/// so an applicator must be a pure function of its inputs: the same state
/// and the same ordered commands always produce the same result.
///
/// # Null safety
///
/// `apply(None, &[])` must return the canonical empty state. A `None`
/// state with commands starts from that empty state; an empty command
/// list returns the state unchanged.
///
/// # Batching
///
/// `apply(apply(s, c1), c2)` must equal `apply(s, c1 ++ c2)`. Callers batch
/// every command they have for one object into a single call.
pub trait Applicator: Send + Sync {
    /// The replicated value.
    type State: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// One mutation of the value.
    type Command: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Applies `commands`, in order, to `state`.
    ///
    /// Takes the state by value: callers that need to keep the original
    /// must clone it first.
    fn apply(&self, state: Option<Self::State>, commands: &[Self::Command]) -> Self::State;

    /// Returns the canonical empty state.
    fn empty(&self) -> Self::State {
        self.apply(None, &[])
    }
}
