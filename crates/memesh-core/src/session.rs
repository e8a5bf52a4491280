//! Identity lifecycle and the single real-time link bound to it.

use crate::backend::Backend;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::event::{lock, ClientEvent, EventBus};
use crate::presence::PresenceTracker;
use crate::sync::ConversationSync;
use crate::transport::{ChannelEvent, RealtimeChannel, RealtimeConnector};
use memesh_api::{
    validate_credential, validate_display_name, Conversation, Credential, Identity,
    ProvisionedIdentity, ValidationLimits,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Shared {
    identity: Mutex<Option<Identity>>,
    state: Mutex<ConnectionState>,
    // Bumped whenever the link is torn down; events tagged with an older
    // value are dropped.
    generation: AtomicU64,
}

struct Link {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    ctx: LinkContext,
    limits: ValidationLimits,
    link: tokio::sync::Mutex<Option<Link>>,
}

impl SessionManager {
    pub fn new(
        config: &CoreConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn RealtimeConnector>,
        sync: ConversationSync,
        presence: PresenceTracker,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            ctx: LinkContext {
                connector,
                sync,
                presence,
                events,
                shared: Arc::new(Shared {
                    identity: Mutex::new(None),
                    state: Mutex::new(ConnectionState::Disconnected),
                    generation: AtomicU64::new(0),
                }),
                reconnect_attempts: config.reconnect_attempts,
                reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            },
            limits: config.limits.clone(),
            link: tokio::sync::Mutex::new(None),
        }
    }

    /// Creates a fresh identity on the server and makes it current.
    pub async fn provision_identity(&self) -> Result<ProvisionedIdentity, CoreError> {
        let provisioned = self.backend.provision_identity().await?;
        log::info!("provisioned identity {}", provisioned.identity.id);
        self.establish(provisioned.identity.clone()).await;
        Ok(provisioned)
    }

    pub async fn authenticate(&self, credential: &Credential) -> Result<Identity, CoreError> {
        validate_credential(credential)?;
        let identity = match self.backend.authenticate(credential).await {
            Ok(identity) => identity,
            Err(CoreError::Unauthorized) => return Err(CoreError::InvalidCredential),
            Err(err) => return Err(err),
        };
        log::info!("authenticated as {}", identity.id);
        self.establish(identity.clone()).await;
        Ok(identity)
    }

    /// Resumes a server-side session if one is still valid.
    pub async fn restore_session(&self) -> Result<Option<Identity>, CoreError> {
        match self.backend.check_session().await {
            Ok(identity) => {
                log::info!("restored session for {}", identity.id);
                self.establish(identity.clone()).await;
                Ok(Some(identity))
            }
            Err(CoreError::Unauthorized) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Ends the session. Safe to call repeatedly; the server call is best
    /// effort.
    pub async fn logout(&self) {
        self.end_session(true, None).await;
    }

    /// Local logout after the server rejected the session identified by
    /// `token`. A rejection that belongs to an earlier session is ignored.
    pub async fn expire(&self, token: u64) {
        self.end_session(false, Some(token)).await;
    }

    /// Identifies the current session; changes on every login and logout.
    pub fn session_token(&self) -> u64 {
        self.ctx.shared.generation.load(Ordering::SeqCst)
    }

    pub async fn update_display_name(&self, name: &str) -> Result<Identity, CoreError> {
        let token = self.session_token();
        if self.current_identity().is_none() {
            return Err(CoreError::NotAuthenticated);
        }
        validate_display_name(name, &self.limits)?;
        let updated = self.backend.update_display_name(name.trim()).await?;
        {
            let mut identity = lock(&self.ctx.shared.identity);
            if identity.is_none() || self.session_token() != token {
                log::debug!("dropping rename result for an ended session");
                return Err(CoreError::NotAuthenticated);
            }
            *identity = Some(updated.clone());
        }
        self.ctx
            .events
            .publish(ClientEvent::IdentityChanged(Some(updated.clone())));
        Ok(updated)
    }

    pub async fn list_peers(&self) -> Result<Vec<Identity>, CoreError> {
        self.backend.list_peers().await
    }

    pub fn current_identity(&self) -> Option<Identity> {
        lock(&self.ctx.shared.identity).clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.ctx.shared.state)
    }

    async fn establish(&self, identity: Identity) {
        let mut link = self.link.lock().await;
        self.ctx.teardown(&mut link).await;
        self.ctx.sync.reset();
        self.ctx.presence.clear();
        *lock(&self.ctx.shared.identity) = Some(identity.clone());
        self.ctx
            .events
            .publish(ClientEvent::IdentityChanged(Some(identity)));

        let generation = self.ctx.shared.generation.load(Ordering::SeqCst);
        self.ctx.set_state(generation, ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.ctx.clone().run(generation, shutdown_rx));
        *link = Some(Link { shutdown, task });
    }

    async fn end_session(&self, notify_backend: bool, expected: Option<u64>) {
        let mut link = self.link.lock().await;
        if let Some(token) = expected {
            if self.session_token() != token {
                log::debug!("ignoring rejection from an earlier session");
                return;
            }
        }
        let had_identity = self.current_identity().is_some();
        if !had_identity && link.is_none() {
            return;
        }
        if expected.is_some() {
            log::warn!("session rejected by server, clearing local state");
        }
        // Detach dispatch before anything else is torn down.
        self.ctx.teardown(&mut link).await;
        self.ctx.sync.clear_handlers();
        self.ctx.presence.clear_handlers();
        self.ctx.sync.reset();
        self.ctx.presence.clear();

        if notify_backend && had_identity {
            if let Err(err) = self.backend.logout().await {
                log::warn!("server logout failed: {}", err);
            }
        }

        *lock(&self.ctx.shared.identity) = None;
        let changed = {
            let mut state = lock(&self.ctx.shared.state);
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        };
        if changed {
            self.ctx
                .events
                .publish(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
        }
        if had_identity {
            self.ctx.events.publish(ClientEvent::IdentityChanged(None));
        }
        log::info!("session ended");
    }
}

/// Everything the link task needs, cloned into it.
#[derive(Clone)]
struct LinkContext {
    connector: Arc<dyn RealtimeConnector>,
    sync: ConversationSync,
    presence: PresenceTracker,
    events: EventBus,
    shared: Arc<Shared>,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

enum Step {
    Shutdown,
    Event(Option<ChannelEvent>),
}

impl LinkContext {
    fn is_current(&self, generation: u64) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, next: ConnectionState) {
        if !self.is_current(generation) {
            return;
        }
        let changed = {
            let mut state = lock(&self.shared.state);
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            log::debug!("connection state -> {:?}", next);
            self.events.publish(ClientEvent::ConnectionChanged(next));
        }
    }

    async fn teardown(&self, link: &mut Option<Link>) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(Link { shutdown, task }) = link.take() {
            let _ = shutdown.send(());
            if let Err(err) = task.await {
                log::error!("link task ended abnormally: {}", err);
            }
        }
    }

    async fn run(self, generation: u64, mut shutdown: oneshot::Receiver<()>) {
        let mut attempts_left = self.reconnect_attempts;
        let mut reopening = false;
        loop {
            let opened = tokio::select! {
                _ = &mut shutdown => return,
                opened = self.connector.open() => opened,
            };
            let reason = match opened {
                Ok(channel) => match self
                    .pump(generation, channel, &mut shutdown, &mut attempts_left, reopening)
                    .await
                {
                    Some(reason) => reason,
                    None => return,
                },
                Err(err) => err.to_string(),
            };
            if !self.is_current(generation) {
                return;
            }
            log::warn!("real-time link lost: {}", reason);
            self.set_state(generation, ConnectionState::Disconnected);
            if !self.presence.snapshot().is_empty() {
                let online = self.presence.apply_snapshot(Vec::new());
                self.events.publish(ClientEvent::PresenceChanged { online });
            }
            let signed_in = lock(&self.shared.identity).is_some();
            if attempts_left == 0 || !signed_in {
                self.events.publish(ClientEvent::ConnectionLost(reason));
                return;
            }
            attempts_left -= 1;
            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
            if !self.is_current(generation) {
                return;
            }
            log::info!("reopening real-time link");
            reopening = true;
            self.set_state(generation, ConnectionState::Connecting);
        }
    }

    /// Routes events until the link drops (returns the reason) or shutdown
    /// is requested (returns `None`). With `resync` set, the active
    /// conversation is re-fetched once the handshake is acknowledged.
    async fn pump(
        &self,
        generation: u64,
        mut channel: RealtimeChannel,
        shutdown: &mut oneshot::Receiver<()>,
        attempts_left: &mut u32,
        resync: bool,
    ) -> Option<String> {
        loop {
            let step = tokio::select! {
                _ = &mut *shutdown => Step::Shutdown,
                event = channel.next_event() => Step::Event(event),
            };
            let event = match step {
                Step::Shutdown => {
                    channel.close();
                    return None;
                }
                Step::Event(event) => event,
            };
            match event {
                Some(ChannelEvent::Connected) => {
                    *attempts_left = self.reconnect_attempts;
                    self.set_state(generation, ConnectionState::Connected);
                    if resync && self.is_current(generation) {
                        let sync = self.sync.clone();
                        tokio::spawn(async move {
                            if let Err(err) = sync.resync().await {
                                log::debug!("resync after reconnect skipped: {}", err);
                            }
                        });
                    }
                }
                Some(ChannelEvent::Disconnected) => {
                    channel.close();
                    return Some("closed by server".to_string());
                }
                Some(ChannelEvent::Error(reason)) => {
                    channel.close();
                    return Some(reason);
                }
                Some(other) => self.route(generation, other).await,
                None => return Some("transport ended".to_string()),
            }
        }
    }

    async fn route(&self, generation: u64, event: ChannelEvent) {
        if !self.is_current(generation) {
            log::debug!("dropping event from detached link");
            return;
        }
        match event {
            ChannelEvent::NewMessage(message) => {
                let me = match lock(&self.shared.identity).as_ref() {
                    Some(identity) => identity.id.clone(),
                    None => return,
                };
                let conversation = message.conversation_for(&me);
                self.sync.ingest(&conversation, message).await;
            }
            ChannelEvent::NewGlobalMessage(message) => {
                self.sync.ingest(&Conversation::Global, message).await;
            }
            ChannelEvent::PresenceSnapshot(ids) => {
                let online = self.presence.apply_snapshot(ids);
                self.events.publish(ClientEvent::PresenceChanged { online });
            }
            ChannelEvent::Connected | ChannelEvent::Disconnected | ChannelEvent::Error(_) => {}
        }
    }
}
