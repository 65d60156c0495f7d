//! Shared objects and their listeners.

use syncobj_protocol::{truncate, Action, Applicator, ServerMessage};
use tracing::{debug, trace, warn};

/// A registered interest of one connection in one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener<K> {
    /// Connection handle.
    pub client: K,
    /// Client session id announced by the connection, used for echo suppression.
    pub client_id: Option<String>,
    /// Highest version this listener is known to have received.
    pub last_version: u64,
    /// Whether a fan-out send to this listener is outstanding.
    pub sending: bool,
}

impl<K> Listener<K> {
    /// Creates a listener at the given version.
    pub fn new(client: K, last_version: u64) -> Self {
        Self {
            client,
            client_id: None,
            last_version,
            sending: false,
        }
    }

    fn owns<C>(&self, action: &Action<C>) -> bool {
        self.client_id.as_deref() == Some(action.client_id.as_str())
    }
}

/// The authoritative record for one object id.
///
/// # Invariants
///
/// - `version` increases by exactly one per committed action
/// - `actions` is a contiguous run of versions ending at `version`
/// - `value` is the fold of every committed command since creation
#[derive(Debug, Clone)]
pub struct SharedObject<S, C, K> {
    id_obj: String,
    value: S,
    version: u64,
    actions: Vec<Action<C>>,
    listeners: Vec<Listener<K>>,
}

/// One planned fan-out send.
#[derive(Debug)]
pub(crate) struct Delivery<S, C, K> {
    pub(crate) client: K,
    pub(crate) message: ServerMessage<S, C>,
    pub(crate) previous: u64,
}

impl<S, C, K> SharedObject<S, C, K>
where
    S: Clone,
    C: Clone,
    K: Clone + PartialEq,
{
    /// Creates an object at version 0 with no listeners.
    pub fn new(id_obj: impl Into<String>, value: S) -> Self {
        Self {
            id_obj: id_obj.into(),
            value,
            version: 0,
            actions: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Object id.
    pub fn id_obj(&self) -> &str {
        &self.id_obj
    }

    /// Current authoritative value.
    pub fn value(&self) -> &S {
        &self.value
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Retained committed actions, oldest first.
    pub fn actions(&self) -> &[Action<C>] {
        &self.actions
    }

    /// Registered listeners.
    pub fn listeners(&self) -> &[Listener<K>] {
        &self.listeners
    }

    /// Version of the oldest retained action.
    pub fn oldest_version(&self) -> Option<u64> {
        self.actions.first().and_then(|a| a.version)
    }

    /// Looks up the listener for a connection.
    pub fn listener(&self, client: &K) -> Option<&Listener<K>> {
        self.listeners.iter().find(|l| &l.client == client)
    }

    /// Looks up the listener for a connection, mutably.
    pub fn listener_mut(&mut self, client: &K) -> Option<&mut Listener<K>> {
        self.listeners.iter_mut().find(|l| &l.client == client)
    }

    /// Returns the listener for a connection, registering it if needed.
    ///
    /// A new listener starts caught up at the current version; it is
    /// expected to receive the value through an explicit snapshot.
    pub fn ensure_listener(&mut self, client: &K) -> &mut Listener<K> {
        let index = match self.listeners.iter().position(|l| &l.client == client) {
            Some(index) => index,
            None => {
                self.listeners
                    .push(Listener::new(client.clone(), self.version));
                self.listeners.len() - 1
            }
        };
        &mut self.listeners[index]
    }

    /// Removes the listener for a connection. Returns true if one existed.
    pub fn remove_listener(&mut self, client: &K) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| &l.client != client);
        self.listeners.len() != before
    }

    /// Commits a batch of client actions.
    ///
    /// Each action is stamped with its own version in submission order and
    /// the whole batch is folded into the value with one applicator call.
    /// Actions already present in the retained log (same client id and
    /// counter) and actions without a command are dropped.
    ///
    /// Returns the versions assigned, in order.
    pub fn commit<A>(&mut self, applicator: &A, incoming: Vec<Action<C>>) -> Vec<u64>
    where
        A: Applicator<State = S, Command = C>,
    {
        let mut commands = Vec::with_capacity(incoming.len());
        let mut versions = Vec::with_capacity(incoming.len());

        for action in incoming {
            let Some(command) = action.command.clone() else {
                warn!(
                    id_obj = %self.id_obj,
                    client_id = %action.client_id,
                    counter = action.counter,
                    "dropping update without a command"
                );
                continue;
            };
            if self
                .actions
                .iter()
                .any(|a| a.has_key(&action.client_id, action.counter))
            {
                trace!(
                    id_obj = %self.id_obj,
                    client_id = %action.client_id,
                    counter = action.counter,
                    "dropping duplicate update"
                );
                continue;
            }

            self.version += 1;
            versions.push(self.version);
            commands.push(command);
            self.actions.push(action.committed(self.version));
        }

        if !commands.is_empty() {
            let current = std::mem::replace(&mut self.value, applicator.empty());
            self.value = applicator.apply(Some(current), &commands);
            debug!(
                id_obj = %self.id_obj,
                committed = commands.len(),
                version = self.version,
                "committed actions"
            );
        }

        versions
    }

    /// Builds the message a listener at `last_version` needs.
    ///
    /// A listener gets a full snapshot when the actions it is missing are no
    /// longer retained, when the log is empty, or when it claims a version
    /// the object never reached. Otherwise it gets every retained action
    /// newer than `last_version`; its own actions are echoed without their
    /// command.
    pub fn message_for(&self, listener: &Listener<K>) -> ServerMessage<S, C> {
        let last = listener.last_version;
        let gap = match self.oldest_version() {
            Some(oldest) => last.saturating_add(1) < oldest,
            None => true,
        };

        if gap || last > self.version {
            return ServerMessage::snapshot(self.id_obj.clone(), self.value.clone(), self.version);
        }

        let actions = self
            .actions
            .iter()
            .filter(|a| a.version_or_zero() > last)
            .map(|a| if listener.owns(a) { a.echo() } else { a.clone() })
            .collect();
        ServerMessage::slice(self.id_obj.clone(), actions)
    }

    /// Plans one send for every listener that is behind and idle.
    ///
    /// Each planned listener is optimistically advanced to the current
    /// version and marked as sending; [`SharedObject::settle`] must be
    /// called with the outcome.
    pub(crate) fn plan_deliveries(&mut self) -> Vec<Delivery<S, C, K>> {
        let version = self.version;
        let mut deliveries = Vec::new();

        for index in 0..self.listeners.len() {
            let listener = &self.listeners[index];
            if listener.last_version == version || listener.sending {
                continue;
            }

            let message = self.message_for(listener);
            let listener = &mut self.listeners[index];
            deliveries.push(Delivery {
                client: listener.client.clone(),
                message,
                previous: listener.last_version,
            });
            listener.last_version = version;
            listener.sending = true;
        }

        deliveries
    }

    /// Records the outcome of a planned send.
    ///
    /// On failure the listener goes back to `previous` so the next pass
    /// retries. A listener that disconnected meanwhile is ignored.
    pub(crate) fn settle(&mut self, client: &K, previous: u64, delivered: bool) {
        if let Some(listener) = self.listener_mut(client) {
            listener.sending = false;
            if !delivered {
                listener.last_version = previous;
            }
        }
    }

    /// Drops actions every listener has already received.
    ///
    /// Keeps every action newer than the slowest listener, plus the last
    /// `buffer_min` actions regardless. With no listeners only the tail is
    /// kept. Returns the number of actions dropped.
    pub fn collect_garbage(&mut self, buffer_min: usize) -> usize {
        let slowest = self.listeners.iter().map(|l| l.last_version).min();
        let watermark = slowest.map_or(u64::MAX, |v| v.saturating_add(1));

        let before = self.actions.len();
        truncate(&mut self.actions, watermark, buffer_min, Action::version_or_zero);
        let collected = before - self.actions.len();

        if collected > 0 {
            trace!(
                id_obj = %self.id_obj,
                collected,
                retained = self.actions.len(),
                "collected action log"
            );
        }
        collected
    }
}
