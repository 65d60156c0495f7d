//! Loopback transports over a [`Network`].

use crate::network::{ConnectionId, Inbox, Network};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use syncobj_client::{ClientError, ClientResult, ClientTransport, ReplicaClient};
use syncobj_protocol::{
    encode_client_batch, encode_server_message, Applicator, ClientMessage, ServerMessage,
};
use syncobj_server::{ObjectServer, ServerError, ServerResult, ServerTransport};
use tracing::warn;

/// Server side of the loopback: encodes messages and hands them to the
/// connection's inbox.
#[derive(Clone)]
pub struct ServerLink {
    network: Arc<Network>,
}

impl ServerLink {
    /// Creates a link over `network`.
    pub fn new(network: Arc<Network>) -> Self {
        Self { network }
    }

    /// Returns the network.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }
}

impl<S, C> ServerTransport<S, C> for ServerLink
where
    S: Serialize + Sync,
    C: Serialize + Sync,
{
    type Client = ConnectionId;

    async fn send(&self, client: &ConnectionId, message: &ServerMessage<S, C>) -> ServerResult<()> {
        let connection = *client;
        self.network.pass(connection).await;

        if self.network.is_offline(connection) || self.network.take_failure(connection) {
            return Err(ServerError::transport(format!(
                "connection {connection} unreachable"
            )));
        }
        let inbox = self
            .network
            .inbox(connection)
            .ok_or_else(|| ServerError::transport(format!("connection {connection} closed")))?;

        let raw = encode_server_message(message)?;
        self.network.record_delivery(connection, &raw);
        if let Err(error) = inbox.deliver(&raw) {
            warn!(connection, %error, "client rejected server message");
            self.network.record_inbox_error(connection, error);
        }
        Ok(())
    }
}

/// Server type driven by the loopback.
pub type LoopbackServer<A> = ObjectServer<A, ServerLink>;

/// Client side of the loopback: encodes batches and feeds them straight
/// into the server under the link's current connection id.
pub struct ClientLink<A>
where
    A: Applicator,
{
    server: Arc<LoopbackServer<A>>,
    network: Arc<Network>,
    connection: AtomicU32,
}

impl<A> ClientLink<A>
where
    A: Applicator,
{
    /// Creates a link that talks to `server` as `connection`.
    pub fn new(server: Arc<LoopbackServer<A>>, network: Arc<Network>, connection: ConnectionId) -> Self {
        Self {
            server,
            network,
            connection: AtomicU32::new(connection),
        }
    }

    /// Current connection id.
    pub fn connection(&self) -> ConnectionId {
        self.connection.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connection(&self, connection: ConnectionId) {
        self.connection.store(connection, Ordering::SeqCst);
    }
}

impl<A> ClientTransport<A::Command> for ClientLink<A>
where
    A: Applicator,
{
    async fn send(
        &self,
        batch: &[ClientMessage<A::Command>],
    ) -> ClientResult<Option<Vec<ClientMessage<A::Command>>>> {
        let connection = self.connection();
        if self.network.is_offline(connection) {
            return Err(ClientError::transport_retryable(format!(
                "connection {connection} offline"
            )));
        }

        let raw = encode_client_batch(batch)?;
        self.server
            .receive(&raw, &connection)
            .await
            .map_err(|e| ClientError::transport_fatal(e.to_string()))?;
        Ok(None)
    }
}

/// Client type driven by the loopback.
pub type LoopbackClient<A> = ReplicaClient<A, ClientLink<A>>;

impl<A, T> Inbox for ReplicaClient<A, T>
where
    A: Applicator,
    T: ClientTransport<A::Command>,
{
    fn deliver(&self, raw: &str) -> Result<(), String> {
        self.receive(raw).map_err(|e| e.to_string())
    }
}
