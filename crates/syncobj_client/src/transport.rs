//! Transport abstraction for the client replica.

use crate::error::ClientResult;
use std::future::Future;
use syncobj_protocol::ClientMessage;

/// Carries client batches to the server.
///
/// Server messages travel the other way through
/// [`ReplicaClient::receive`](crate::ReplicaClient::receive); how they arrive
/// is up to the host.
pub trait ClientTransport<C>: Send + Sync {
    /// Sends one batch.
    ///
    /// Returns `Ok(None)` if the batch went out as given, or `Ok(Some(sent))`
    /// if the transport rewrote it; the replica then tracks `sent` instead.
    fn send(
        &self,
        batch: &[ClientMessage<C>],
    ) -> impl Future<Output = ClientResult<Option<Vec<ClientMessage<C>>>>> + Send;
}
