//! Array applicator.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;
use syncobj_protocol::Applicator;

/// A command against an array.
///
/// A missing `index` addresses the end of the array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArrayCommand<T> {
    /// Inserts `payload` at `index` (clamped to the length), or appends it.
    Add {
        /// Item to insert.
        payload: T,
        /// Insert position.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    /// Removes the item at `index`, or the last item.
    Remove {
        /// Position to remove.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    /// Replaces the item at `index`, or the last item.
    Update {
        /// Replacement item.
        payload: T,
        /// Position to replace.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
}

impl<T> ArrayCommand<T> {
    /// Appends an item.
    pub fn push(payload: T) -> Self {
        ArrayCommand::Add {
            payload,
            index: None,
        }
    }

    /// Inserts an item at a position.
    pub fn insert(index: usize, payload: T) -> Self {
        ArrayCommand::Add {
            payload,
            index: Some(index),
        }
    }

    /// Removes the last item.
    pub fn pop() -> Self {
        ArrayCommand::Remove { index: None }
    }

    /// Removes the item at a position.
    pub fn remove(index: usize) -> Self {
        ArrayCommand::Remove { index: Some(index) }
    }

    /// Replaces the item at a position.
    pub fn set(index: usize, payload: T) -> Self {
        ArrayCommand::Update {
            payload,
            index: Some(index),
        }
    }
}

/// Applies [`ArrayCommand`]s to a `Vec<T>`.
///
/// Out-of-range removes and updates are ignored so every replica reaches the
/// same result regardless of how far it has drifted.
pub struct ArrayApplicator<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> ArrayApplicator<T> {
    /// Creates a new array applicator.
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for ArrayApplicator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ArrayApplicator<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Debug for ArrayApplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArrayApplicator")
    }
}

impl<T> Applicator for ArrayApplicator<T>
where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type State = Vec<T>;
    type Command = ArrayCommand<T>;

    fn apply(&self, state: Option<Vec<T>>, commands: &[ArrayCommand<T>]) -> Vec<T> {
        let mut data = state.unwrap_or_default();
        for command in commands {
            match command {
                ArrayCommand::Add { payload, index } => match index {
                    Some(i) => data.insert((*i).min(data.len()), payload.clone()),
                    None => data.push(payload.clone()),
                },
                ArrayCommand::Remove { index } => match index {
                    Some(i) if *i < data.len() => {
                        data.remove(*i);
                    }
                    Some(_) => {}
                    None => {
                        data.pop();
                    }
                },
                ArrayCommand::Update { payload, index } => {
                    let Some(last) = data.len().checked_sub(1) else {
                        continue;
                    };
                    let i = index.unwrap_or(last);
                    if let Some(slot) = data.get_mut(i) {
                        *slot = payload.clone();
                    }
                }
            }
        }
        data
    }
}
