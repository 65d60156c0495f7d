//! The client replica.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::object::{ClientObject, PendingAction, Stage};
use crate::observer::{Observer, ObserverId, Observers};
use crate::transport::ClientTransport;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use syncobj_protocol::{
    decode_server_message, Action, ActionKey, Applicator, ClientMessage, ObjectVersion,
    ServerMessage, SliceMessage, SnapshotMessage,
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

type InitWaiter = oneshot::Sender<ClientResult<()>>;

struct ReplicaState<S, C> {
    objects: HashMap<String, ClientObject<S>>,
    buffer: Vec<ClientMessage<C>>,
    pending: Vec<PendingAction<C>>,
    next_counter: u64,
    init_waiters: HashMap<String, Vec<InitWaiter>>,
    observers: Observers<S>,
}

struct Notification<S> {
    observers: Vec<Observer<S>>,
    value: S,
}

impl<S> Notification<S> {
    fn deliver(self) {
        for observer in self.observers {
            observer(&self.value);
        }
    }
}

/// Optimistic local replica of a set of shared objects.
///
/// Commands are buffered and applied speculatively to `value_temp` right
/// away; `value` only moves when the server confirms. All bookkeeping sits
/// behind one lock that is never held across a transport send, and observer
/// callbacks run after it is released.
///
/// # Example
///
/// ```rust,ignore
/// let client = ReplicaClient::new(ClientConfig::default(), ArrayApplicator::new(), transport);
///
/// client.init("todos", true).await?;
/// client.command("todos", ArrayCommand::push("buy milk".to_string()));
/// client.update().await?;
///
/// // wherever the host receives server frames
/// client.receive(&frame)?;
/// ```
pub struct ReplicaClient<A, T>
where
    A: Applicator,
    T: ClientTransport<A::Command>,
{
    config: ClientConfig,
    applicator: A,
    transport: T,
    state: Mutex<ReplicaState<A::State, A::Command>>,
}

impl<A, T> ReplicaClient<A, T>
where
    A: Applicator,
    T: ClientTransport<A::Command>,
{
    /// Creates a replica with no objects.
    pub fn new(config: ClientConfig, applicator: A, transport: T) -> Self {
        Self {
            config,
            applicator,
            transport,
            state: Mutex::new(ReplicaState {
                objects: HashMap::new(),
                buffer: Vec::new(),
                pending: Vec::new(),
                next_counter: 0,
                init_waiters: HashMap::new(),
                observers: Observers::new(),
            }),
        }
    }

    /// Session id stamped on this replica's actions.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
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

    /// Registers a callback for confirmed changes of `id_obj`.
    ///
    /// The callback receives the confirmed value, never `value_temp`.
    /// Callbacks for one object run in registration order.
    pub fn observe(
        &self,
        id_obj: &str,
        observer: impl Fn(&A::State) + Send + Sync + 'static,
    ) -> ObserverId {
        self.state.lock().observers.add(id_obj, Arc::new(observer))
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unobserve(&self, id_obj: &str, id: ObserverId) -> bool {
        self.state.lock().observers.remove(id_obj, id)
    }

    /// Starts replicating `id_obj`.
    ///
    /// Queues a `c:init`. With `send_now` the buffer is flushed and the call
    /// completes once the server's snapshot has been received.
    ///
    /// # Errors
    ///
    /// Returns the flush error if sending fails, or
    /// [`ClientError::InitAborted`] if a later flush fails while this init is
    /// still waiting.
    pub async fn init(&self, id_obj: &str, send_now: bool) -> ClientResult<()> {
        let waiter = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            self.ensure_object(state, id_obj);
            state
                .buffer
                .push(ClientMessage::init(self.client_id(), id_obj));
            if !send_now {
                return Ok(());
            }

            let (sender, receiver) = oneshot::channel();
            state
                .init_waiters
                .entry(id_obj.to_string())
                .or_default()
                .push(sender);
            receiver
        };

        self.update().await?;
        match waiter.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::InitAborted(format!(
                "init of {id_obj} was abandoned"
            ))),
        }
    }

    /// Buffers a command for `id_obj` and updates its `value_temp`.
    ///
    /// Returns the identity assigned to the action, or `None` if `id_obj` is
    /// empty. Counters are shared across all objects of this replica.
    pub fn command(&self, id_obj: &str, command: A::Command) -> Option<ActionKey> {
        if id_obj.is_empty() {
            return None;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.ensure_object(state, id_obj);

        let counter = state.next_counter;
        state.next_counter += 1;
        let action = Action::pending(self.client_id(), counter, command);
        let key = action.key();
        state.buffer.push(ClientMessage::update(id_obj, action));
        self.refresh_temp(state, id_obj);

        Some(key)
    }

    /// Flushes the outgoing buffer as one batch.
    ///
    /// Sent actions stay pending until the server echoes them. On failure
    /// the batch goes back to the front of the buffer, every waiting init is
    /// aborted and the error is returned; nothing is retried automatically.
    pub async fn update(&self) -> ClientResult<()> {
        let batch = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.buffer.is_empty() {
                return Ok(());
            }

            let batch = std::mem::take(&mut state.buffer);
            for message in &batch {
                if let ClientMessage::Update(update) = message {
                    state.pending.push(PendingAction::sending(
                        update.id_obj.clone(),
                        update.action.clone(),
                    ));
                }
            }
            batch
        };

        trace!(messages = batch.len(), "flushing buffer");
        let outcome = self.transport.send(&batch).await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let batch_keys = update_keys(&batch);
        let affected = affected_objects(&batch);

        match outcome {
            Ok(rewritten) => {
                let sent_keys = match &rewritten {
                    Some(sent) => update_keys(sent),
                    None => batch_keys.clone(),
                };
                state.pending.retain_mut(|pending| {
                    let key = pending.action.key();
                    if pending.stage != Stage::Sending || !batch_keys.contains(&key) {
                        return true;
                    }
                    pending.stage = Stage::InFlight;
                    sent_keys.contains(&key)
                });
                for id_obj in &affected {
                    self.refresh_temp(state, id_obj);
                }
                Ok(())
            }
            Err(error) => {
                // an echo that arrived during the send already acknowledged
                // its action; only the rest goes back to the buffer
                let mut unacked = HashSet::new();
                state.pending.retain(|pending| {
                    let key = pending.action.key();
                    if pending.stage != Stage::Sending || !batch_keys.contains(&key) {
                        return true;
                    }
                    unacked.insert(key);
                    false
                });
                let batch: Vec<ClientMessage<A::Command>> = batch
                    .into_iter()
                    .filter(|message| match message {
                        ClientMessage::Update(update) => unacked.contains(&update.action.key()),
                        _ => true,
                    })
                    .collect();

                let newer = std::mem::replace(&mut state.buffer, batch);
                state.buffer.extend(newer);

                let aborted: Vec<InitWaiter> = state
                    .init_waiters
                    .drain()
                    .flat_map(|(_, waiters)| waiters)
                    .collect();
                for waiter in aborted {
                    let _ = waiter.send(Err(ClientError::InitAborted(error.to_string())));
                }

                for id_obj in &affected {
                    self.refresh_temp(state, id_obj);
                }
                warn!(%error, buffered = state.buffer.len(), "flush failed, batch re-buffered");
                Err(error)
            }
        }
    }

    /// Tells the server the confirmed version of every known object.
    ///
    /// Sent directly, bypassing the buffer. Use after reconnecting.
    pub async fn reset(&self) -> ClientResult<()> {
        let message = {
            let state = self.state.lock();
            let mut payload: Vec<ObjectVersion> = state
                .objects
                .values()
                .map(|o| ObjectVersion::new(o.id_obj.clone(), o.version))
                .collect();
            payload.sort_by(|a, b| a.id_obj.cmp(&b.id_obj));
            ClientMessage::reset(self.client_id(), payload)
        };

        debug!(client_id = %self.client_id(), "sending reset");
        self.transport
            .send(std::slice::from_ref(&message))
            .await
            .map(|_| ())
    }

    /// Processes one raw server message.
    ///
    /// # Errors
    ///
    /// [`ClientError::Malformed`] if `raw` does not decode, or
    /// [`ClientError::UnknownObject`] for a slice of an object this replica
    /// never initialized.
    pub fn receive(&self, raw: &str) -> ClientResult<()> {
        let message = decode_server_message::<A::State, A::Command>(raw)
            .map_err(|e| ClientError::Malformed(e.to_string()))?;
        self.handle(message)
    }

    /// Processes one decoded server message.
    pub fn handle(&self, message: ServerMessage<A::State, A::Command>) -> ClientResult<()> {
        let notification = match message {
            ServerMessage::Init(snapshot) => Some(self.apply_snapshot(snapshot)),
            ServerMessage::Update(slice) => self.apply_slice(slice)?,
        };

        if let Some(notification) = notification {
            notification.deliver();
        }
        Ok(())
    }

    fn apply_snapshot(
        &self,
        snapshot: SnapshotMessage<A::State>,
    ) -> Notification<A::State> {
        let SnapshotMessage {
            id_obj,
            data,
            version,
        } = snapshot;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // pending actions on this object are either inside the snapshot or
        // will be repaired by the resync path
        let before = state.pending.len();
        state.pending.retain(|pending| pending.id_obj != id_obj);
        let superseded = before - state.pending.len();

        let object = self.ensure_object(state, &id_obj);
        object.value = data.clone();
        object.version = version;
        self.refresh_temp(state, &id_obj);

        if let Some(waiters) = state.init_waiters.remove(&id_obj) {
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        }

        debug!(id_obj = %id_obj, version, superseded, "snapshot applied");
        Notification {
            observers: state.observers.for_object(&id_obj),
            value: data,
        }
    }

    fn apply_slice(
        &self,
        slice: SliceMessage<A::Command>,
    ) -> ClientResult<Option<Notification<A::State>>> {
        let SliceMessage { id_obj, actions } = slice;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let confirmed = match state.objects.get(&id_obj) {
            Some(object) => object.version,
            None => return Err(ClientError::UnknownObject(id_obj)),
        };

        let (stale, fresh): (Vec<Action<A::Command>>, Vec<Action<A::Command>>) = actions
            .into_iter()
            .partition(|a| a.version_or_zero() <= confirmed);

        // the confirmed value already holds stale actions, including our own
        let stale: HashSet<ActionKey> = stale.iter().map(Action::key).collect();
        if acknowledge(state, &id_obj, &stale) > 0 {
            self.refresh_temp(state, &id_obj);
        }

        let Some(first) = fresh.first() else {
            trace!(id_obj = %id_obj, confirmed, "slice already applied");
            return Ok(None);
        };

        if first.version_or_zero() != confirmed + 1 {
            warn!(
                id_obj = %id_obj,
                expected = confirmed + 1,
                received = first.version_or_zero(),
                "version gap in slice, requesting snapshot"
            );
            self.queue_resync(state, &id_obj);
            return Ok(None);
        }

        let mut commands = Vec::with_capacity(fresh.len());
        for action in &fresh {
            let command = match &action.command {
                Some(command) => Some(command.clone()),
                None => recover_command(state, &id_obj, action),
            };
            match command {
                Some(command) => commands.push(command),
                None => {
                    warn!(
                        id_obj = %id_obj,
                        client_id = %action.client_id,
                        counter = action.counter,
                        "cannot recover echoed command, requesting snapshot"
                    );
                    self.queue_resync(state, &id_obj);
                    return Ok(None);
                }
            }
        }

        let acked: HashSet<ActionKey> = fresh.iter().map(Action::key).collect();
        acknowledge(state, &id_obj, &acked);

        let last = fresh.last().map_or(confirmed, Action::version_or_zero);
        let object = self.ensure_object(state, &id_obj);
        let current = std::mem::replace(&mut object.value, self.applicator.empty());
        object.value = self.applicator.apply(Some(current), &commands);
        object.version = last;
        let value = object.value.clone();
        self.refresh_temp(state, &id_obj);

        trace!(id_obj = %id_obj, applied = commands.len(), version = last, "slice applied");
        Ok(Some(Notification {
            observers: state.observers.for_object(&id_obj),
            value,
        }))
    }

    fn ensure_object<'s>(
        &self,
        state: &'s mut ReplicaState<A::State, A::Command>,
        id_obj: &str,
    ) -> &'s mut ClientObject<A::State> {
        state
            .objects
            .entry(id_obj.to_string())
            .or_insert_with(|| ClientObject::new(id_obj, self.applicator.empty()))
    }

    /// Recomputes `value_temp` as `value` plus every pending, then every
    /// buffered, command for the object, applied to a copy.
    fn refresh_temp(&self, state: &mut ReplicaState<A::State, A::Command>, id_obj: &str) {
        let pending = state
            .pending
            .iter()
            .filter(|p| p.id_obj == id_obj)
            .filter_map(|p| p.action.command.clone());
        let buffered = state.buffer.iter().filter_map(|message| match message {
            ClientMessage::Update(update) if update.id_obj == id_obj => {
                update.action.command.clone()
            }
            _ => None,
        });
        let commands: Vec<A::Command> = pending.chain(buffered).collect();

        if let Some(object) = state.objects.get_mut(id_obj) {
            object.value_temp = if commands.is_empty() {
                object.value.clone()
            } else {
                self.applicator.apply(Some(object.value.clone()), &commands)
            };
        }
    }

    /// Queues a `c:init` so the next flush fetches a fresh snapshot.
    fn queue_resync(&self, state: &mut ReplicaState<A::State, A::Command>, id_obj: &str) {
        let queued = state
            .buffer
            .iter()
            .any(|m| matches!(m, ClientMessage::Init(init) if init.id_obj == id_obj));
        if !queued {
            state
                .buffer
                .push(ClientMessage::init(self.client_id(), id_obj));
        }
    }

    /// Confirmed value of an object.
    pub fn value(&self, id_obj: &str) -> Option<A::State> {
        self.state.lock().objects.get(id_obj).map(|o| o.value.clone())
    }

    /// Speculative value of an object.
    pub fn value_temp(&self, id_obj: &str) -> Option<A::State> {
        self.state
            .lock()
            .objects
            .get(id_obj)
            .map(|o| o.value_temp.clone())
    }

    /// Confirmed version of an object.
    pub fn version(&self, id_obj: &str) -> Option<u64> {
        self.state.lock().objects.get(id_obj).map(|o| o.version)
    }

    /// Copy of an object's proxy.
    pub fn object(&self, id_obj: &str) -> Option<ClientObject<A::State>> {
        self.state.lock().objects.get(id_obj).cloned()
    }

    /// Ids of all known objects, sorted.
    pub fn object_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().objects.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of sent actions not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of messages waiting for the next flush.
    pub fn buffered_count(&self) -> usize {
        self.state.lock().buffer.len()
    }
}

fn update_keys<C>(batch: &[ClientMessage<C>]) -> HashSet<ActionKey> {
    batch
        .iter()
        .filter_map(|message| match message {
            ClientMessage::Update(update) => Some(update.action.key()),
            _ => None,
        })
        .collect()
}

/// Finds the command of one of our own echoed actions.
///
/// A flush that failed after reaching the server leaves the action back in
/// the buffer, so both pending and buffered updates are searched.
fn recover_command<S, C: Clone>(
    state: &ReplicaState<S, C>,
    id_obj: &str,
    echo: &Action<C>,
) -> Option<C> {
    let pending = state
        .pending
        .iter()
        .filter(|p| p.id_obj == id_obj)
        .map(|p| &p.action);
    let buffered = state.buffer.iter().filter_map(|message| match message {
        ClientMessage::Update(update) if update.id_obj == id_obj => Some(&update.action),
        _ => None,
    });

    pending
        .chain(buffered)
        .find(|action| action.has_key(&echo.client_id, echo.counter))
        .and_then(|action| action.command.clone())
}

/// Drops acknowledged actions from pending and from the buffer, so an
/// action the server already committed is never resent. Returns how many
/// entries were removed.
fn acknowledge<S, C>(
    state: &mut ReplicaState<S, C>,
    id_obj: &str,
    acked: &HashSet<ActionKey>,
) -> usize {
    if acked.is_empty() {
        return 0;
    }

    let before = state.pending.len() + state.buffer.len();
    state
        .pending
        .retain(|p| p.id_obj != id_obj || !acked.contains(&p.action.key()));
    state.buffer.retain(|message| match message {
        ClientMessage::Update(update) => {
            update.id_obj != id_obj || !acked.contains(&update.action.key())
        }
        _ => true,
    });
    before - (state.pending.len() + state.buffer.len())
}

fn affected_objects<C>(batch: &[ClientMessage<C>]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for message in batch {
        if let ClientMessage::Update(update) = message {
            if !ids.contains(&update.id_obj) {
                ids.push(update.id_obj.clone());
            }
        }
    }
    ids
}
