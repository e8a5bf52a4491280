use crate::session::ConnectionState;
use memesh_api::{Conversation, Identity, Message};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;

/// State changes published for UI collaborators.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    IdentityChanged(Option<Identity>),
    ConnectionChanged(ConnectionState),
    ConnectionLost(String),
    ConversationActivated(Conversation),
    HistoryLoaded {
        conversation: Conversation,
        count: usize,
    },
    MessageAppended {
        conversation: Conversation,
        message: Message,
    },
    PresenceChanged {
        online: usize,
    },
}

pub type EventReceiver = broadcast::Receiver<ClientEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

/// Registration handle for a message or presence handler.
///
/// Dropping the handle leaves the handler registered; call [`cancel`] to
/// remove it.
///
/// [`cancel`]: Subscription::cancel
#[must_use = "keep the handle to be able to cancel the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct Entry<K, H: ?Sized> {
    id: u64,
    key: K,
    handler: Arc<H>,
}

struct RegistryInner<K, H: ?Sized> {
    next_id: u64,
    entries: Vec<Entry<K, H>>,
}

/// Handlers keyed by topic. Handlers are cloned out before they run so no
/// lock is held while user code executes.
pub(crate) struct HandlerRegistry<K, H: ?Sized> {
    inner: Mutex<RegistryInner<K, H>>,
}

impl<K, H> HandlerRegistry<K, H>
where
    K: PartialEq + Send + Sync + 'static,
    H: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                entries: Vec::new(),
            }),
        })
    }

    /// Adds a handler. With `exclusive` set, an existing handler for the same
    /// key is replaced.
    pub(crate) fn register(self: &Arc<Self>, key: K, handler: Arc<H>, exclusive: bool) -> Subscription {
        let id = {
            let mut guard = lock(&self.inner);
            if exclusive {
                guard.entries.retain(|entry| entry.key != key);
            }
            let id = guard.next_id;
            guard.next_id += 1;
            guard.entries.push(Entry { id, key, handler });
            id
        };
        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut guard = lock(&self.inner);
        let before = guard.entries.len();
        guard.entries.retain(|entry| entry.id != id);
        guard.entries.len() != before
    }

    pub(crate) fn matching(&self, key: &K) -> Vec<Arc<H>> {
        lock(&self.inner)
            .entries
            .iter()
            .filter(|entry| &entry.key == key)
            .map(|entry| entry.handler.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub(crate) fn clear(&self) {
        lock(&self.inner).entries.clear();
    }
}

/// Runs a user handler, logging instead of unwinding into the dispatch loop.
pub(crate) fn invoke_guarded(topic: &str, handler: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(handler)).is_err() {
        log::error!("{} handler panicked; subscription kept", topic);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
