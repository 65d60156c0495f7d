//! The object store: receive, fan-out, GC and disconnect.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::object::SharedObject;
use crate::transport::ServerTransport;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use syncobj_protocol::{
    decode_client_batch, Action, Applicator, ClientMessage, InitRequest, ResetRequest,
    ServerMessage,
};
use tracing::{debug, warn};

/// Handle to one object behind its own lock.
pub type ObjectHandle<S, C, K> = Arc<Mutex<SharedObject<S, C, K>>>;

type Handle<A, T> = ObjectHandle<
    <A as Applicator>::State,
    <A as Applicator>::Command,
    <T as ServerTransport<<A as Applicator>::State, <A as Applicator>::Command>>::Client,
>;

/// Cumulative store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Full snapshots delivered (init replies and fan-out fallbacks).
    pub snapshots_sent: u64,
    /// Action slices delivered.
    pub slices_sent: u64,
    /// Sends that failed and were rolled back.
    pub send_failures: u64,
    /// Actions stamped with a version.
    pub actions_committed: u64,
    /// Updates dropped as duplicates or for carrying no command.
    pub updates_dropped: u64,
    /// Actions removed from logs by GC.
    pub actions_collected: u64,
}

/// Outcome of one [`ObjectServer::receive`] call.
#[derive(Debug, Default)]
pub struct ReceiveReport {
    /// `c:init` messages answered.
    pub inits: usize,
    /// `c:reset` messages applied.
    pub resets: usize,
    /// Actions committed across all objects.
    pub committed: usize,
    /// Updates dropped as duplicates or for carrying no command.
    pub dropped: usize,
    /// Per-item failures; none of them stopped the rest of the batch.
    pub errors: Vec<ServerError>,
}

impl ReceiveReport {
    /// Returns true if every item was processed without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of one [`ObjectServer::update`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Snapshots delivered.
    pub snapshots: usize,
    /// Slices delivered.
    pub slices: usize,
    /// Sends that failed.
    pub failures: usize,
    /// Actions removed by GC after the pass.
    pub collected: usize,
}

impl FanOutReport {
    /// Total sends attempted.
    pub fn attempted(&self) -> usize {
        self.snapshots + self.slices + self.failures
    }
}

/// Authoritative store of shared objects.
///
/// Generic over the [`Applicator`] that folds commands into values and the
/// [`ServerTransport`] that reaches connections.
pub struct ObjectServer<A, T>
where
    A: Applicator,
    T: ServerTransport<A::State, A::Command>,
{
    config: ServerConfig,
    applicator: A,
    transport: T,
    objects: RwLock<HashMap<String, Handle<A, T>>>,
    stats: RwLock<ServerStats>,
}

impl<A, T> ObjectServer<A, T>
where
    A: Applicator,
    T: ServerTransport<A::State, A::Command>,
{
    /// Creates an empty store.
    pub fn new(config: ServerConfig, applicator: A, transport: T) -> Self {
        Self {
            config,
            applicator,
            transport,
            objects: RwLock::new(HashMap::new()),
            stats: RwLock::new(ServerStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the applicator.
    pub fn applicator(&self) -> &A {
        &self.applicator
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns a copy of the cumulative statistics.
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    /// Returns the object for `id_obj`, creating it if needed, with `client`
    /// registered as a listener.
    ///
    /// A new object starts at version 0 with the applicator's empty value.
    /// A client joining an existing object starts at its current version.
    pub fn get_or_create(&self, id_obj: &str, client: &T::Client) -> Handle<A, T> {
        let existing = self.objects.read().get(id_obj).cloned();
        let object = match existing {
            Some(object) => object,
            None => {
                let mut objects = self.objects.write();
                let object = objects.entry(id_obj.to_string()).or_insert_with(|| {
                    debug!(id_obj, "creating shared object");
                    Arc::new(Mutex::new(SharedObject::new(
                        id_obj,
                        self.applicator.empty(),
                    )))
                });
                Arc::clone(object)
            }
        };

        object.lock().ensure_listener(client);
        object
    }

    fn object(&self, id_obj: &str) -> Option<Handle<A, T>> {
        self.objects.read().get(id_obj).cloned()
    }

    /// Processes one raw batch received from `client`.
    ///
    /// Inits register the connection and resets move its listeners first.
    /// Updates are then committed, one applicator call per object, and only
    /// after that is every init answered with a snapshot, so the snapshot
    /// already contains the updates that travelled in the same batch. Items
    /// that fail (undecodable, unknown object, failed init reply) are
    /// reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Malformed`] only if `raw` is not a JSON array.
    pub async fn receive(&self, raw: &str, client: &T::Client) -> ServerResult<ReceiveReport> {
        let batch = decode_client_batch::<A::Command>(raw)
            .map_err(|e| ServerError::Malformed(e.to_string()))?;

        let mut report = ReceiveReport::default();
        for (index, error) in batch.rejected {
            warn!(index, %error, "skipping undecodable batch item");
            report.errors.push(ServerError::Protocol(error));
        }

        let mut inits = Vec::new();
        let mut updates: Vec<(String, Vec<Action<A::Command>>)> = Vec::new();
        for message in batch.messages {
            match message {
                ClientMessage::Init(request) => {
                    self.get_or_create(&request.id_obj, client);
                    inits.push(request);
                }
                ClientMessage::Reset(request) => {
                    report.resets += 1;
                    self.apply_reset(request, client);
                }
                ClientMessage::Update(request) => {
                    match updates.iter_mut().find(|(id, _)| *id == request.id_obj) {
                        Some((_, actions)) => actions.push(request.action),
                        None => updates.push((request.id_obj, vec![request.action])),
                    }
                }
            }
        }

        for (id_obj, actions) in updates {
            let Some(object) = self.object(&id_obj) else {
                warn!(id_obj = %id_obj, ignored = actions.len(), "ignoring updates for unknown object");
                report.errors.push(ServerError::UnknownObject(id_obj));
                continue;
            };

            let received = actions.len();
            let committed = object.lock().commit(&self.applicator, actions).len();
            report.committed += committed;
            report.dropped += received - committed;
        }

        {
            let mut stats = self.stats.write();
            stats.actions_committed += report.committed as u64;
            stats.updates_dropped += report.dropped as u64;
        }

        for request in inits {
            report.inits += 1;
            if let Err(error) = self.answer_init(request, client).await {
                report.errors.push(error);
            }
        }

        Ok(report)
    }

    async fn answer_init(&self, request: InitRequest, client: &T::Client) -> ServerResult<()> {
        let object = self.get_or_create(&request.id_obj, client);
        let (message, previous) = {
            let mut object = object.lock();
            let version = object.version();
            let message =
                ServerMessage::snapshot(request.id_obj.clone(), object.value().clone(), version);
            let listener = object.ensure_listener(client);
            listener.client_id = Some(request.client_id);
            // a listener with a fan-out send outstanding stays owned by it:
            // the snapshot goes out without advancing it, and later slices
            // overlapping the snapshot are skipped client side as stale
            let previous = (!listener.sending).then(|| {
                let previous = listener.last_version;
                listener.last_version = version;
                listener.sending = true;
                previous
            });
            (message, previous)
        };

        let result = self.transport.send(client, &message).await;
        if let Some(previous) = previous {
            object.lock().settle(client, previous, result.is_ok());
        }

        let mut stats = self.stats.write();
        match &result {
            Ok(()) => stats.snapshots_sent += 1,
            Err(error) => {
                stats.send_failures += 1;
                warn!(id_obj = %request.id_obj, ?client, %error, "init reply failed");
            }
        }
        result
    }

    fn apply_reset(&self, request: ResetRequest, client: &T::Client) {
        for entry in request.payload {
            let object = self.get_or_create(&entry.id_obj, client);
            let mut object = object.lock();
            let listener = object.ensure_listener(client);
            listener.client_id = Some(request.client_id.clone());
            listener.last_version = entry.version;
            debug!(id_obj = %entry.id_obj, version = entry.version, "listener reset");
        }
    }

    /// Runs one fan-out pass over every object, then collects garbage.
    ///
    /// Every listener behind its object's version and not already being sent
    /// to gets one snapshot or slice. Sends run concurrently with no object
    /// lock held. A failed send rolls the listener back and is logged; it
    /// never affects other listeners.
    pub async fn update(&self) -> FanOutReport {
        let objects: Vec<Handle<A, T>> = self.objects.read().values().cloned().collect();

        let mut planned = Vec::new();
        for object in &objects {
            let deliveries = object.lock().plan_deliveries();
            planned.extend(deliveries.into_iter().map(|d| (Arc::clone(object), d)));
        }

        // each listener is settled as soon as its own send completes
        let outcomes = join_all(planned.iter().map(|(object, delivery)| async move {
            let outcome = self.transport.send(&delivery.client, &delivery.message).await;
            object
                .lock()
                .settle(&delivery.client, delivery.previous, outcome.is_ok());
            outcome
        }))
        .await;

        let mut report = FanOutReport::default();
        for ((_, delivery), outcome) in planned.iter().zip(outcomes) {
            match outcome {
                Ok(()) if delivery.message.is_snapshot() => report.snapshots += 1,
                Ok(()) => report.slices += 1,
                Err(error) => {
                    report.failures += 1;
                    warn!(
                        id_obj = %delivery.message.id_obj(),
                        client = ?delivery.client,
                        %error,
                        "fan-out send failed, retrying next pass"
                    );
                }
            }
        }

        for object in &objects {
            report.collected += object.lock().collect_garbage(self.config.buffer_min);
        }

        {
            let mut stats = self.stats.write();
            stats.snapshots_sent += report.snapshots as u64;
            stats.slices_sent += report.slices as u64;
            stats.send_failures += report.failures as u64;
            stats.actions_collected += report.collected as u64;
        }

        if report.attempted() > 0 {
            debug!(
                snapshots = report.snapshots,
                slices = report.slices,
                failures = report.failures,
                collected = report.collected,
                "fan-out pass"
            );
        }
        report
    }

    /// Collects garbage on one object outside a fan-out pass.
    ///
    /// Returns the number of actions dropped, or `None` for an unknown id.
    pub fn gc(&self, id_obj: &str) -> Option<usize> {
        let collected = self
            .object(id_obj)?
            .lock()
            .collect_garbage(self.config.buffer_min);
        self.stats.write().actions_collected += collected as u64;
        Some(collected)
    }

    /// Removes `client` from every object's listeners.
    ///
    /// Returns the number of objects it was listening to. Logs are left
    /// alone; the next GC may free more once this listener stops holding
    /// them back.
    pub fn disconnect(&self, client: &T::Client) -> usize {
        let objects: Vec<Handle<A, T>> = self.objects.read().values().cloned().collect();
        let removed = objects
            .iter()
            .filter(|object| object.lock().remove_listener(client))
            .count();
        debug!(?client, objects = removed, "client disconnected");
        removed
    }

    /// Runs `f` against an object under its lock.
    pub fn inspect<R>(
        &self,
        id_obj: &str,
        f: impl FnOnce(&SharedObject<A::State, A::Command, T::Client>) -> R,
    ) -> Option<R> {
        let object = self.object(id_obj)?;
        let object = object.lock();
        Some(f(&object))
    }

    /// Current value of an object.
    pub fn value(&self, id_obj: &str) -> Option<A::State> {
        self.inspect(id_obj, |o| o.value().clone())
    }

    /// Current version of an object.
    pub fn version(&self, id_obj: &str) -> Option<u64> {
        self.inspect(id_obj, SharedObject::version)
    }

    /// Number of retained actions for an object.
    pub fn log_len(&self, id_obj: &str) -> Option<usize> {
        self.inspect(id_obj, |o| o.actions().len())
    }

    /// Versions of the retained actions for an object, oldest first.
    pub fn log_versions(&self, id_obj: &str) -> Option<Vec<u64>> {
        self.inspect(id_obj, |o| {
            o.actions().iter().map(Action::version_or_zero).collect()
        })
    }

    /// `(client, last_version)` for every listener of an object.
    pub fn listener_versions(&self, id_obj: &str) -> Option<Vec<(T::Client, u64)>> {
        self.inspect(id_obj, |o| {
            o.listeners()
                .iter()
                .map(|l| (l.client.clone(), l.last_version))
                .collect()
        })
    }

    /// Ids of all known objects, sorted.
    pub fn object_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.objects.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use syncobj_applicators::{ArrayApplicator, ArrayCommand};
    use syncobj_protocol::{encode_client_batch, ObjectVersion};

    type Rows = Vec<String>;
    type Cmd = ArrayCommand<String>;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(u32, ServerMessage<Rows, Cmd>)>>,
        failing: Mutex<HashSet<u32>>,
    }

    impl Recording {
        fn take(&self) -> Vec<(u32, ServerMessage<Rows, Cmd>)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl ServerTransport<Rows, Cmd> for Recording {
        type Client = u32;

        async fn send(&self, client: &u32, message: &ServerMessage<Rows, Cmd>) -> ServerResult<()> {
            if self.failing.lock().contains(client) {
                return Err(ServerError::transport("connection reset"));
            }
            self.sent.lock().push((*client, message.clone()));
            Ok(())
        }
    }

    type Server = ObjectServer<ArrayApplicator<String>, Recording>;

    fn server(buffer_min: usize) -> Server {
        ObjectServer::new(
            ServerConfig::new().with_buffer_min(buffer_min),
            ArrayApplicator::new(),
            Recording::default(),
        )
    }

    fn batch(messages: &[ClientMessage<Cmd>]) -> String {
        encode_client_batch(messages).unwrap()
    }

    fn add(client_id: &str, counter: u64, row: &str) -> ClientMessage<Cmd> {
        ClientMessage::update(
            "doc",
            Action::pending(client_id, counter, ArrayCommand::push(row.to_string())),
        )
    }

    async fn join(server: &Server, client: u32, client_id: &str) {
        let report = server
            .receive(&batch(&[ClientMessage::init(client_id, "doc")]), &client)
            .await
            .unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn non_array_batch_is_malformed() {
        let server = server(10);
        let err = server.receive(r#"{"type":"c:init"}"#, &1).await.unwrap_err();
        assert!(matches!(err, ServerError::Malformed(_)));

        let err = server.receive("not json", &1).await.unwrap_err();
        assert!(matches!(err, ServerError::Malformed(_)));
    }

    #[tokio::test]
    async fn init_is_answered_with_snapshot() {
        let server = server(10);
        join(&server, 1, "alice").await;

        let sent = server.transport().take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, ServerMessage::snapshot("doc", Vec::new(), 0));
        assert_eq!(server.listener_versions("doc"), Some(vec![(1, 0)]));
        assert_eq!(server.stats().snapshots_sent, 1);
    }

    #[tokio::test]
    async fn updates_fan_out_with_echo_suppression() {
        let server = server(10);
        join(&server, 1, "alice").await;
        join(&server, 2, "bob").await;
        server.transport().take();

        let raw = batch(&[add("alice", 0, "first"), add("alice", 1, "second")]);
        let report = server.receive(&raw, &1).await.unwrap();
        assert_eq!(report.committed, 2);
        assert_eq!(server.version("doc"), Some(2));
        assert_eq!(
            server.value("doc"),
            Some(vec!["first".to_string(), "second".to_string()])
        );

        let fan_out = server.update().await;
        assert_eq!(fan_out.slices, 2);

        let mut sent = server.transport().take();
        sent.sort_by_key(|(client, _)| *client);
        let ServerMessage::Update(to_alice) = &sent[0].1 else {
            panic!("expected slice");
        };
        let ServerMessage::Update(to_bob) = &sent[1].1 else {
            panic!("expected slice");
        };
        assert!(to_alice.actions.iter().all(|a| a.command.is_none()));
        assert!(to_bob.actions.iter().all(|a| a.command.is_some()));
        assert_eq!(to_bob.last_version(), Some(2));

        // nothing new, nothing sent
        assert_eq!(server.update().await.attempted(), 0);
    }

    #[tokio::test]
    async fn init_reply_includes_updates_from_the_same_batch() {
        let server = server(10);
        let raw = batch(&[ClientMessage::init("alice", "doc"), add("alice", 0, "first")]);
        let report = server.receive(&raw, &1).await.unwrap();

        assert!(report.is_clean());
        let sent = server.transport().take();
        assert_eq!(sent[0].1, ServerMessage::snapshot("doc", vec!["first".to_string()], 1));
        assert_eq!(server.listener_versions("doc"), Some(vec![(1, 1)]));
        assert_eq!(server.update().await.attempted(), 0);
    }

    #[tokio::test]
    async fn bad_items_do_not_stop_the_batch() {
        let server = server(10);
        join(&server, 1, "alice").await;

        let good = serde_json::to_value(add("alice", 0, "kept")).unwrap();
        let raw = serde_json::json!([{"type": "c:bogus"}, good, {"type": "c:update"}]).to_string();
        let report = server.receive(&raw, &1).await.unwrap();

        assert_eq!(report.committed, 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(server.value("doc"), Some(vec!["kept".to_string()]));
    }

    #[tokio::test]
    async fn update_for_unknown_object_is_reported_not_applied() {
        let server = server(10);
        let report = server.receive(&batch(&[add("alice", 0, "x")]), &1).await.unwrap();

        assert_eq!(report.committed, 0);
        assert!(matches!(report.errors[0], ServerError::UnknownObject(ref id) if id == "doc"));
        assert!(server.object_ids().is_empty());
    }

    #[tokio::test]
    async fn duplicate_updates_are_dropped() {
        let server = server(10);
        join(&server, 1, "alice").await;

        server.receive(&batch(&[add("alice", 0, "x")]), &1).await.unwrap();
        let report = server
            .receive(&batch(&[add("alice", 0, "x"), add("alice", 1, "y")]), &1)
            .await
            .unwrap();

        assert_eq!(report.committed, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(server.version("doc"), Some(2));
        assert_eq!(server.stats().updates_dropped, 1);
    }

    #[tokio::test]
    async fn failed_send_is_retried_next_pass() {
        let server = server(0);
        join(&server, 1, "alice").await;
        join(&server, 2, "bob").await;
        server.receive(&batch(&[add("alice", 0, "x")]), &1).await.unwrap();
        server.transport().take();

        server.transport().failing.lock().insert(2);
        let report = server.update().await;
        assert_eq!(report.slices, 1);
        assert_eq!(report.failures, 1);

        let mut versions = server.listener_versions("doc").unwrap();
        versions.sort();
        assert_eq!(versions, vec![(1, 1), (2, 0)]);
        // the lagging listener keeps the action alive
        assert_eq!(server.log_len("doc"), Some(1));

        server.transport().failing.lock().clear();
        let report = server.update().await;
        assert_eq!(report.slices, 1);
        assert_eq!(server.transport().take()[0].0, 2);
        assert_eq!(server.stats().send_failures, 1);
    }

    #[tokio::test]
    async fn failed_init_reply_is_rolled_back() {
        let server = server(10);
        server.transport().failing.lock().insert(1);

        let report = server
            .receive(&batch(&[ClientMessage::init("alice", "doc")]), &1)
            .await
            .unwrap();
        assert!(matches!(report.errors[0], ServerError::Transport(_)));
        assert!(server.inspect("doc", |o| !o.listeners()[0].sending).unwrap());
    }

    #[tokio::test]
    async fn reset_gets_incremental_slice() {
        let server = server(10);
        join(&server, 1, "alice").await;
        let raw = batch(&[add("alice", 0, "a"), add("alice", 1, "b"), add("alice", 2, "c")]);
        server.receive(&raw, &1).await.unwrap();
        server.update().await;
        server.transport().take();

        // reconnect as a fresh connection that has only seen version 1
        server.disconnect(&1);
        let reset = ClientMessage::reset("alice", vec![ObjectVersion::new("doc", 1)]);
        server.receive(&batch(&[reset]), &9).await.unwrap();
        assert_eq!(server.listener_versions("doc"), Some(vec![(9, 1)]));

        server.update().await;
        let sent = server.transport().take();
        let ServerMessage::Update(slice) = &sent[0].1 else {
            panic!("expected an incremental slice, got {:?}", sent[0].1);
        };
        let versions: Vec<_> = slice.actions.iter().map(|a| a.version).collect();
        assert_eq!(versions, vec![Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn gc_with_zero_buffer() {
        let server = server(0);
        join(&server, 1, "alice").await;
        server
            .receive(&batch(&[add("alice", 0, "a"), add("alice", 1, "b")]), &1)
            .await
            .unwrap();

        let report = server.update().await;
        assert_eq!(report.collected, 2);
        assert_eq!(server.log_len("doc"), Some(0));
        assert_eq!(server.stats().actions_collected, 2);
    }

    #[tokio::test]
    async fn gc_on_demand_after_disconnect() {
        let server = server(1);
        join(&server, 1, "alice").await;
        join(&server, 2, "bob").await;
        let raw = batch(&[add("alice", 0, "a"), add("alice", 1, "b"), add("alice", 2, "c")]);
        server.receive(&raw, &1).await.unwrap();
        assert_eq!(server.gc("doc"), Some(0));

        server.disconnect(&1);
        server.disconnect(&2);
        assert_eq!(server.gc("doc"), Some(2));
        assert_eq!(server.log_versions("doc"), Some(vec![3]));
        assert_eq!(server.gc("missing"), None);
    }

    #[tokio::test]
    async fn disconnect_releases_every_object() {
        let server = server(10);
        server
            .receive(
                &batch(&[
                    ClientMessage::init("alice", "a"),
                    ClientMessage::init("alice", "b"),
                ]),
                &1,
            )
            .await
            .unwrap();
        assert_eq!(server.object_ids(), vec!["a".to_string(), "b".to_string()]);

        assert_eq!(server.disconnect(&1), 2);
        assert_eq!(server.listener_versions("a"), Some(vec![]));
        assert_eq!(server.disconnect(&1), 0);
    }
}
