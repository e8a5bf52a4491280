use crate::error::CoreError;
use crate::event::lock;
use memesh_api::{Message, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Events multiplexed over the single real-time connection.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// Handshake acknowledged by the server.
    Connected,
    Disconnected,
    Error(String),
    NewMessage(Message),
    NewGlobalMessage(Message),
    PresenceSnapshot(Vec<UserId>),
}

/// Receiving end of an open real-time connection.
///
/// Closing (or dropping) the channel asks the transport to shut down.
pub struct RealtimeChannel {
    events: mpsc::Receiver<ChannelEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RealtimeChannel {
    pub fn new(events: mpsc::Receiver<ChannelEvent>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
        }
    }

    /// `None` once the transport has gone away.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn close(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

#[async_trait::async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Opens the transport. The handshake completes asynchronously and is
    /// reported as [`ChannelEvent::Connected`].
    async fn open(&self) -> Result<RealtimeChannel, CoreError>;
}

struct MockLink {
    tx: mpsc::Sender<ChannelEvent>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    links: Vec<MockLink>,
    failures_left: usize,
    attempts: usize,
    auto_ack: bool,
}

/// Connector whose links are driven by the test: every `open` creates a link
/// and events are pushed into the most recent one.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge the handshake as soon as a link opens.
    pub fn with_auto_ack() -> Self {
        let connector = Self::default();
        lock(connector.state.as_ref()).auto_ack = true;
        connector
    }

    pub fn fail_next_opens(&self, count: usize) {
        lock(self.state.as_ref()).failures_left = count;
    }

    /// Number of `open` calls that produced a link.
    pub fn open_count(&self) -> usize {
        lock(self.state.as_ref()).links.len()
    }

    /// Every `open` call, failed ones included.
    pub fn open_attempts(&self) -> usize {
        lock(self.state.as_ref()).attempts
    }

    /// Links whose receiving side has not been closed.
    pub fn live_links(&self) -> usize {
        lock(self.state.as_ref())
            .links
            .iter()
            .filter(|link| !link.closed.load(Ordering::SeqCst) && !link.tx.is_closed())
            .count()
    }

    pub async fn push(&self, event: ChannelEvent) -> bool {
        let tx = lock(self.state.as_ref()).links.last().map(|link| link.tx.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Simulates the server dropping the current link.
    pub fn drop_link(&self) {
        let mut guard = lock(self.state.as_ref());
        if let Some(link) = guard.links.last_mut() {
            let (dead, _) = mpsc::channel(1);
            link.tx = dead;
        }
    }
}

#[async_trait::async_trait]
impl RealtimeConnector for MockConnector {
    async fn open(&self) -> Result<RealtimeChannel, CoreError> {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let auto_ack = {
            let mut guard = lock(self.state.as_ref());
            guard.attempts += 1;
            if guard.failures_left > 0 {
                guard.failures_left -= 1;
                return Err(CoreError::ConnectionLost("refused".to_string()));
            }
            guard.links.push(MockLink {
                tx: tx.clone(),
                closed: closed.clone(),
            });
            guard.auto_ack
        };
        tokio::spawn(async move {
            let _ = shutdown_rx.await;
            closed.store(true, Ordering::SeqCst);
        });
        if auto_ack {
            let _ = tx.send(ChannelEvent::Connected).await;
        }
        Ok(RealtimeChannel::new(rx, shutdown_tx))
    }
}
