//! Replicated actions.

use serde::{Deserialize, Serialize};

/// Globally unique identity of an action: `(client_id, counter)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    /// Originating client session.
    pub client_id: String,
    /// Per-client sequence number.
    pub counter: u64,
}

impl ActionKey {
    /// Creates a new action key.
    pub fn new(client_id: impl Into<String>, counter: u64) -> Self {
        Self {
            client_id: client_id.into(),
            counter,
        }
    }
}

/// One committed or pending mutation of a shared object.
///
/// An action is created by a client with no `version`. The server stamps it
/// exactly once when it commits it to an object's log; after that the
/// `(key, version)` pairing never changes.
///
/// `command` is `None` only on the wire, when the server relays an action
/// back to the client that issued it (echo suppression).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action<C> {
    /// Stable id of the originating client session.
    pub client_id: String,
    /// Per-client monotonically increasing sequence number.
    pub counter: u64,
    /// Payload interpreted only by the applicator.
    pub command: Option<C>,
    /// Global sequence number assigned by the server at commit time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl<C> Action<C> {
    /// Creates an action that only the issuing client knows about.
    pub fn pending(client_id: impl Into<String>, counter: u64, command: C) -> Self {
        Self {
            client_id: client_id.into(),
            counter,
            command: Some(command),
            version: None,
        }
    }

    /// Returns this action stamped with its commit version.
    pub fn committed(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Returns the `(client_id, counter)` identity.
    pub fn key(&self) -> ActionKey {
        ActionKey::new(self.client_id.clone(), self.counter)
    }

    /// Returns true if this action has the given identity.
    pub fn has_key(&self, client_id: &str, counter: u64) -> bool {
        self.counter == counter && self.client_id == client_id
    }

    /// Returns true once the server has assigned a version.
    pub fn is_committed(&self) -> bool {
        self.version.is_some()
    }

    /// Commit version, or 0 for an action that is still pending.
    pub fn version_or_zero(&self) -> u64 {
        self.version.unwrap_or(0)
    }
}

impl<C: Clone> Action<C> {
    /// Returns a copy with the command stripped, as relayed to the originator.
    pub fn echo(&self) -> Self {
        Self {
            client_id: self.client_id.clone(),
            counter: self.counter,
            command: None,
            version: self.version,
        }
    }
}
