//! Transport layer abstraction for the object store.

use crate::error::ServerResult;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use syncobj_protocol::ServerMessage;

/// Delivers server messages to connected clients.
///
/// This trait abstracts the network layer (WebSocket, HTTP long-poll,
/// in-process loopback for tests). The store never retries a failed send
/// itself; the listener simply stays behind until the next fan-out pass.
pub trait ServerTransport<S, C>: Send + Sync {
    /// Opaque handle identifying one connection. Used as the listener key.
    type Client: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Sends one message to one connection.
    fn send(
        &self,
        client: &Self::Client,
        message: &ServerMessage<S, C>,
    ) -> impl Future<Output = ServerResult<()>> + Send;
}
