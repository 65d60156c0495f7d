//! In-memory network between one server and its clients.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Connection handle; the server's listener key.
pub type ConnectionId = u32;

/// Receiving end of a connection.
pub trait Inbox: Send + Sync {
    /// Delivers one raw server message.
    fn deliver(&self, raw: &str) -> Result<(), String>;
}

/// Routing table plus fault injection.
///
/// Connections can be taken offline (both directions fail), made to fail a
/// number of server sends, or held so that server sends to them block until
/// released.
pub struct Network {
    next_connection: AtomicU32,
    inboxes: Mutex<HashMap<ConnectionId, Weak<dyn Inbox>>>,
    offline: Mutex<HashSet<ConnectionId>>,
    fail_next: Mutex<HashMap<ConnectionId, usize>>,
    held: Mutex<HashSet<ConnectionId>>,
    hold_next: Mutex<HashSet<ConnectionId>>,
    parked: Mutex<HashSet<ConnectionId>>,
    waiting: AtomicUsize,
    released: Notify,
    delivered: Mutex<Vec<(ConnectionId, String)>>,
    inbox_errors: Mutex<Vec<(ConnectionId, String)>>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_connection: AtomicU32::new(1),
            inboxes: Mutex::new(HashMap::new()),
            offline: Mutex::new(HashSet::new()),
            fail_next: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            hold_next: Mutex::new(HashSet::new()),
            parked: Mutex::new(HashSet::new()),
            waiting: AtomicUsize::new(0),
            released: Notify::new(),
            delivered: Mutex::new(Vec::new()),
            inbox_errors: Mutex::new(Vec::new()),
        })
    }

    /// Allocates a fresh connection id.
    pub fn allocate(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    /// Routes server messages for `connection` to `inbox`.
    pub fn attach(&self, connection: ConnectionId, inbox: Weak<dyn Inbox>) {
        self.inboxes.lock().insert(connection, inbox);
    }

    /// Stops routing to `connection`.
    pub fn detach(&self, connection: ConnectionId) {
        self.inboxes.lock().remove(&connection);
    }

    pub(crate) fn inbox(&self, connection: ConnectionId) -> Option<Arc<dyn Inbox>> {
        self.inboxes.lock().get(&connection).and_then(Weak::upgrade)
    }

    /// Takes a connection offline or back online.
    pub fn set_offline(&self, connection: ConnectionId, offline: bool) {
        let mut set = self.offline.lock();
        if offline {
            set.insert(connection);
        } else {
            set.remove(&connection);
        }
    }

    /// Returns true if the connection is offline.
    pub fn is_offline(&self, connection: ConnectionId) -> bool {
        self.offline.lock().contains(&connection)
    }

    /// Makes the next `count` server sends to `connection` fail.
    pub fn fail_next(&self, connection: ConnectionId, count: usize) {
        self.fail_next.lock().insert(connection, count);
    }

    pub(crate) fn take_failure(&self, connection: ConnectionId) -> bool {
        let mut failures = self.fail_next.lock();
        match failures.get_mut(&connection) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Blocks server sends to `connection` until [`Network::release`].
    pub fn hold(&self, connection: ConnectionId) {
        self.held.lock().insert(connection);
    }

    /// Blocks only the next server send to `connection` until
    /// [`Network::release`]; later sends pass straight through.
    pub fn hold_next(&self, connection: ConnectionId) {
        self.hold_next.lock().insert(connection);
    }

    /// Unblocks sends held for `connection`.
    pub fn release(&self, connection: ConnectionId) {
        self.held.lock().remove(&connection);
        self.parked.lock().remove(&connection);
        self.released.notify_waiters();
    }

    /// Number of sends currently blocked by [`Network::hold`].
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) async fn pass(&self, connection: ConnectionId) {
        let once = self.hold_next.lock().remove(&connection);
        if once {
            self.parked.lock().insert(connection);
        }

        loop {
            let released = self.released.notified();
            let blocked = self.held.lock().contains(&connection)
                || (once && self.parked.lock().contains(&connection));
            if !blocked {
                return;
            }
            self.waiting.fetch_add(1, Ordering::SeqCst);
            released.await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn record_delivery(&self, connection: ConnectionId, raw: &str) {
        self.delivered.lock().push((connection, raw.to_string()));
    }

    pub(crate) fn record_inbox_error(&self, connection: ConnectionId, error: String) {
        self.inbox_errors.lock().push((connection, error));
    }

    /// Raw server messages delivered to `connection`, oldest first.
    pub fn delivered_to(&self, connection: ConnectionId) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, raw)| raw.clone())
            .collect()
    }

    /// Errors raised by clients while processing delivered messages.
    pub fn inbox_errors(&self) -> Vec<(ConnectionId, String)> {
        self.inbox_errors.lock().clone()
    }
}
