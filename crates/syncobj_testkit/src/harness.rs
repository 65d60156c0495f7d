//! One server and any number of clients wired over a loopback network.

use crate::links::{ClientLink, LoopbackClient, LoopbackServer, ServerLink};
use crate::network::{ConnectionId, Inbox, Network};
use std::sync::Arc;
use syncobj_client::{ClientConfig, ClientResult};
use syncobj_protocol::Applicator;
use syncobj_server::{FanOutReport, ObjectServer, ServerConfig};

/// Upper bound on flush/fan-out rounds in [`Harness::settle`].
pub const MAX_SETTLE_ROUNDS: usize = 32;

/// A server plus helpers to connect, disconnect and drive clients.
pub struct Harness<A>
where
    A: Applicator,
{
    server: Arc<LoopbackServer<A>>,
    network: Arc<Network>,
    applicator: A,
}

impl<A> Harness<A>
where
    A: Applicator + Clone + 'static,
{
    /// Creates a harness with the default server configuration.
    pub fn new(applicator: A) -> Self {
        Self::with_config(ServerConfig::default(), applicator)
    }

    /// Creates a harness with a custom server configuration.
    pub fn with_config(config: ServerConfig, applicator: A) -> Self {
        let network = Network::new();
        let server = Arc::new(ObjectServer::new(
            config,
            applicator.clone(),
            ServerLink::new(Arc::clone(&network)),
        ));
        Self {
            server,
            network,
            applicator,
        }
    }

    /// Returns the server.
    pub fn server(&self) -> &Arc<LoopbackServer<A>> {
        &self.server
    }

    /// Returns the network.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Connects a new client with the given id.
    pub fn connect(&self, client_id: &str) -> Arc<LoopbackClient<A>> {
        let connection = self.network.allocate();
        let link = ClientLink::new(Arc::clone(&self.server), Arc::clone(&self.network), connection);
        let client = Arc::new(LoopbackClient::new(
            ClientConfig::new().with_client_id(client_id),
            self.applicator.clone(),
            link,
        ));
        self.attach(&client, connection);
        client
    }

    fn attach(&self, client: &Arc<LoopbackClient<A>>, connection: ConnectionId) {
        let inbox: Arc<dyn Inbox> = Arc::clone(client) as Arc<dyn Inbox>;
        self.network.attach(connection, Arc::downgrade(&inbox));
    }

    /// Drops the client's connection: the server forgets its listeners and
    /// both directions fail until [`Harness::reconnect`].
    pub fn disconnect(&self, client: &LoopbackClient<A>) {
        let connection = client.transport().connection();
        self.network.set_offline(connection, true);
        self.network.detach(connection);
        self.server.disconnect(&connection);
    }

    /// Gives the client a fresh connection. Returns the new connection id.
    ///
    /// The client still has to announce where it is with
    /// [`ReplicaClient::reset`](syncobj_client::ReplicaClient::reset).
    pub fn reconnect(&self, client: &Arc<LoopbackClient<A>>) -> ConnectionId {
        let connection = self.network.allocate();
        client.transport().set_connection(connection);
        self.attach(client, connection);
        connection
    }

    /// Runs one server fan-out pass.
    pub async fn pump(&self) -> FanOutReport {
        self.server.update().await
    }

    /// Flushes every client and pumps the server until nothing is left to
    /// send.
    pub async fn settle(&self, clients: &[&Arc<LoopbackClient<A>>]) -> ClientResult<()> {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut idle = true;
            for client in clients {
                if client.buffered_count() > 0 {
                    idle = false;
                    client.update().await?;
                }
            }
            if self.server.update().await.attempted() > 0 {
                idle = false;
            }
            if idle {
                return Ok(());
            }
        }
        Ok(())
    }
}
