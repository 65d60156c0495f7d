//! Change observers.

use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with an object's confirmed value.
pub type Observer<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Handle returned by [`ReplicaClient::observe`](crate::ReplicaClient::observe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Observers per object id, in registration order.
pub(crate) struct Observers<S> {
    next_id: u64,
    by_object: HashMap<String, Vec<(ObserverId, Observer<S>)>>,
}

impl<S> Observers<S> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            by_object: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self, id_obj: &str, observer: Observer<S>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.by_object
            .entry(id_obj.to_string())
            .or_default()
            .push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id_obj: &str, id: ObserverId) -> bool {
        let Some(observers) = self.by_object.get_mut(id_obj) else {
            return false;
        };
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        let removed = observers.len() != before;
        if observers.is_empty() {
            self.by_object.remove(id_obj);
        }
        removed
    }

    /// Clones the callbacks for `id_obj` so they can run without the lock.
    pub(crate) fn for_object(&self, id_obj: &str) -> Vec<Observer<S>> {
        self.by_object
            .get(id_obj)
            .map(|observers| observers.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default()
    }
}
