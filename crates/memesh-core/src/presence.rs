//! Online/offline view of peers, replaced wholesale by every server push.

use crate::event::{invoke_guarded, lock, HandlerRegistry, Subscription};
use memesh_api::UserId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub type PresenceSet = HashSet<UserId>;

type PresenceHandler = dyn Fn(&PresenceSet) + Send + Sync;

#[derive(Clone)]
pub struct PresenceTracker {
    online: Arc<Mutex<PresenceSet>>,
    handlers: Arc<HandlerRegistry<(), PresenceHandler>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            online: Arc::new(Mutex::new(HashSet::new())),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn on_presence_update(
        &self,
        handler: impl Fn(&PresenceSet) + Send + Sync + 'static,
    ) -> Subscription {
        self.handlers.register((), Arc::new(handler), false)
    }

    /// Replaces the set with `ids` and notifies handlers with the new set.
    pub fn apply_snapshot(&self, ids: impl IntoIterator<Item = UserId>) -> usize {
        let snapshot: PresenceSet = ids.into_iter().collect();
        let count = snapshot.len();
        *lock(&self.online) = snapshot.clone();
        for handler in self.handlers.matching(&()) {
            invoke_guarded("presence", || handler(&snapshot));
        }
        count
    }

    pub fn is_online(&self, id: &UserId) -> bool {
        lock(&self.online).contains(id)
    }

    pub fn snapshot(&self) -> PresenceSet {
        lock(&self.online).clone()
    }

    /// Online ids other than `me`.
    pub fn online_peer_count(&self, me: Option<&UserId>) -> usize {
        let guard = lock(&self.online);
        match me {
            Some(me) if guard.contains(me) => guard.len() - 1,
            _ => guard.len(),
        }
    }

    pub fn clear(&self) {
        lock(&self.online).clear();
    }

    pub(crate) fn clear_handlers(&self) {
        self.handlers.clear();
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
