pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod presence;
pub mod roster;
pub mod session;
pub mod sync;
pub mod transport;

use backend::Backend;
use config::CoreConfig;
use error::CoreError;
use event::{EventBus, EventReceiver, Subscription};
use memesh_api::{
    Conversation, Credential, Draft, Identity, Message, ProvisionedIdentity, UserId,
};
use presence::{PresenceSet, PresenceTracker};
use session::{ConnectionState, SessionManager};
use std::sync::Arc;
use sync::{ConversationSync, SyncPhase};
use transport::RealtimeConnector;

/// Chat client core: one session, one active conversation and the presence
/// view, wired to a shared event bus.
#[derive(Clone)]
pub struct Client {
    session: Arc<SessionManager>,
    sync: ConversationSync,
    presence: PresenceTracker,
    events: EventBus,
}

impl Client {
    pub fn new(
        config: CoreConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        let sync = ConversationSync::new(backend.clone(), events.clone(), config.limits.clone());
        let presence = PresenceTracker::new();
        let session = SessionManager::new(
            &config,
            backend,
            connector,
            sync.clone(),
            presence.clone(),
            events.clone(),
        );
        Self {
            session: Arc::new(session),
            sync,
            presence,
            events,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub async fn provision_identity(&self) -> Result<ProvisionedIdentity, CoreError> {
        self.session.provision_identity().await
    }

    pub async fn authenticate(&self, credential: &Credential) -> Result<Identity, CoreError> {
        self.session.authenticate(credential).await
    }

    pub async fn restore_session(&self) -> Result<Option<Identity>, CoreError> {
        self.session.restore_session().await
    }

    pub async fn logout(&self) {
        self.session.logout().await
    }

    pub async fn update_display_name(&self, name: &str) -> Result<Identity, CoreError> {
        let token = self.session.session_token();
        let result = self.session.update_display_name(name).await;
        self.guard(token, result).await
    }

    /// Every registered identity except the current one.
    pub async fn list_peers(&self) -> Result<Vec<Identity>, CoreError> {
        let token = self.session.session_token();
        self.require_identity()?;
        let result = self.session.list_peers().await;
        self.guard(token, result).await
    }

    pub async fn activate(&self, conversation: Conversation) -> Result<usize, CoreError> {
        let token = self.session.session_token();
        self.require_identity()?;
        let result = self.sync.activate(conversation).await;
        self.guard(token, result).await
    }

    pub fn deactivate(&self) {
        self.sync.deactivate();
    }

    /// Sends to the active conversation.
    pub async fn send(&self, draft: &Draft) -> Result<Message, CoreError> {
        let conversation = self.sync.active().ok_or(CoreError::NoActiveConversation)?;
        self.send_to(&conversation, draft).await
    }

    pub async fn send_to(&self, conversation: &Conversation, draft: &Draft) -> Result<Message, CoreError> {
        let token = self.session.session_token();
        self.require_identity()?;
        let result = self.sync.send(conversation, draft).await;
        self.guard(token, result).await
    }

    pub fn on_message(
        &self,
        conversation: Conversation,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Subscription {
        self.sync.on_message(conversation, handler)
    }

    pub fn on_presence_update(
        &self,
        handler: impl Fn(&PresenceSet) + Send + Sync + 'static,
    ) -> Subscription {
        self.presence.on_presence_update(handler)
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.session.current_identity()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.sync.active()
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.sync.phase()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sync.messages()
    }

    pub fn is_online(&self, id: &UserId) -> bool {
        self.presence.is_online(id)
    }

    /// Online peers, not counting the current identity.
    pub fn online_peer_count(&self) -> usize {
        let me = self.current_identity().map(|identity| identity.id);
        self.presence.online_peer_count(me.as_ref())
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn sync(&self) -> &ConversationSync {
        &self.sync
    }

    fn require_identity(&self) -> Result<Identity, CoreError> {
        self.current_identity().ok_or(CoreError::NotAuthenticated)
    }

    /// A rejected session ends the local one, provided it is still the
    /// session the request was made in.
    async fn guard<T>(&self, token: u64, result: Result<T, CoreError>) -> Result<T, CoreError> {
        if let Err(CoreError::Unauthorized) = result {
            self.session.expire(token).await;
        }
        result
    }
}

#[cfg(test)]
mod tests;
