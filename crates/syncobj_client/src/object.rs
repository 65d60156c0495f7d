//! Local proxies of shared objects and pending-action bookkeeping.

use syncobj_protocol::Action;

/// Local proxy of one shared object.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientObject<S> {
    /// Object id.
    pub id_obj: String,
    /// Last value confirmed by the server.
    pub value: S,
    /// `value` with every unacknowledged local command applied on top.
    pub value_temp: S,
    /// Version of the last confirmed action or snapshot.
    pub version: u64,
}

impl<S: Clone> ClientObject<S> {
    pub(crate) fn new(id_obj: impl Into<String>, empty: S) -> Self {
        Self {
            id_obj: id_obj.into(),
            value_temp: empty.clone(),
            value: empty,
            version: 0,
        }
    }
}

/// Where a sent action is in its round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Handed to the transport, send not yet settled.
    Sending,
    /// Send succeeded, waiting for the server to echo it.
    InFlight,
}

/// A local action the server has not acknowledged yet.
#[derive(Debug, Clone)]
pub(crate) struct PendingAction<C> {
    pub(crate) id_obj: String,
    pub(crate) action: Action<C>,
    pub(crate) stage: Stage,
}

impl<C> PendingAction<C> {
    pub(crate) fn sending(id_obj: impl Into<String>, action: Action<C>) -> Self {
        Self {
            id_obj: id_obj.into(),
            action,
            stage: Stage::Sending,
        }
    }
}
