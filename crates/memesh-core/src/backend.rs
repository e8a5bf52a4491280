use crate::error::CoreError;
use crate::event::lock;
use chrono::Utc;
use memesh_api::{
    Conversation, Credential, Draft, Identity, Message, MessageBody, MessageId, ProvisionedIdentity,
    UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// REST side of the server. Implementations map "session expired" to
/// [`CoreError::Unauthorized`] and a rejected login to
/// [`CoreError::InvalidCredential`].
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn provision_identity(&self) -> Result<ProvisionedIdentity, CoreError>;
    async fn authenticate(&self, credential: &Credential) -> Result<Identity, CoreError>;
    async fn logout(&self) -> Result<(), CoreError>;
    async fn check_session(&self) -> Result<Identity, CoreError>;
    async fn update_display_name(&self, name: &str) -> Result<Identity, CoreError>;
    async fn list_peers(&self) -> Result<Vec<Identity>, CoreError>;
    async fn fetch_history(&self, conversation: &Conversation) -> Result<Vec<Message>, CoreError>;

    async fn send_message(
        &self,
        conversation: &Conversation,
        draft: &Draft,
    ) -> Result<Message, CoreError>;
}

#[derive(Default)]
struct BackendState {
    accounts: Vec<(String, Identity)>,
    session: Option<UserId>,
    messages: Vec<Message>,
    next_message: u64,
    send_calls: usize,
    fetch_calls: usize,
    logout_calls: usize,
    fail_sends: bool,
    fail_logout: bool,
    fail_history: bool,
    expired: bool,
}

impl BackendState {
    fn current(&self) -> Result<Identity, CoreError> {
        if self.expired {
            return Err(CoreError::Unauthorized);
        }
        let id = self.session.as_ref().ok_or(CoreError::Unauthorized)?;
        self.accounts
            .iter()
            .find(|(_, identity)| &identity.id == id)
            .map(|(_, identity)| identity.clone())
            .ok_or(CoreError::Unauthorized)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum GateKey {
    History(Conversation),
    Send(Conversation),
    Rename,
}

#[derive(Clone, Default)]
struct GateState {
    notify: Arc<Notify>,
    entered: Arc<AtomicBool>,
}

/// Single-process stand-in for the REST backend.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    gates: Arc<std::sync::Mutex<HashMap<GateKey, GateState>>>,
}

/// Keeps the next matching backend call pending until released.
pub struct CallGate {
    state: GateState,
}

impl CallGate {
    /// True once a call is parked on this gate.
    pub fn is_entered(&self) -> bool {
        self.state.entered.load(Ordering::SeqCst)
    }

    pub fn release(self) {
        self.state.notify.notify_one();
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_account(&self, secret: &str, label: &str) -> Identity {
        let identity = Identity {
            id: UserId::new(format!("u-{}", label)),
            public_label: label.to_string(),
            display_name: label.to_string(),
            avatar_ref: None,
            created_at: Some(Utc::now()),
        };
        let mut guard = self.state.lock().await;
        guard.accounts.push((secret.to_string(), identity.clone()));
        identity
    }

    pub async fn seed_message(&self, message: Message) {
        self.state.lock().await.messages.push(message);
    }

    pub fn hold_history(&self, conversation: Conversation) -> CallGate {
        self.hold(GateKey::History(conversation))
    }

    /// Parks the next send to `conversation`. The session is re-checked once
    /// released, so a send overtaken by another login fails as unauthorized.
    pub fn hold_send(&self, conversation: Conversation) -> CallGate {
        self.hold(GateKey::Send(conversation))
    }

    pub fn hold_rename(&self) -> CallGate {
        self.hold(GateKey::Rename)
    }

    fn hold(&self, key: GateKey) -> CallGate {
        let state = GateState::default();
        lock(self.gates.as_ref()).insert(key, state.clone());
        CallGate { state }
    }

    pub async fn set_fail_sends(&self, fail: bool) {
        self.state.lock().await.fail_sends = fail;
    }

    pub async fn set_fail_logout(&self, fail: bool) {
        self.state.lock().await.fail_logout = fail;
    }

    pub async fn set_fail_history(&self, fail: bool) {
        self.state.lock().await.fail_history = fail;
    }

    pub async fn expire_session(&self) {
        self.state.lock().await.expired = true;
    }

    pub async fn send_calls(&self) -> usize {
        self.state.lock().await.send_calls
    }

    pub async fn fetch_calls(&self) -> usize {
        self.state.lock().await.fetch_calls
    }

    pub async fn logout_calls(&self) -> usize {
        self.state.lock().await.logout_calls
    }

    async fn wait_gate(&self, key: GateKey) {
        let gate = lock(self.gates.as_ref()).remove(&key);
        if let Some(gate) = gate {
            gate.entered.store(true, Ordering::SeqCst);
            gate.notify.notified().await;
        }
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    async fn provision_identity(&self) -> Result<ProvisionedIdentity, CoreError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let label = format!("anon-{}", &suffix[..8]);
        let secret = Uuid::new_v4().simple().to_string();
        let identity = self.add_account(&secret, &label).await;
        let mut guard = self.state.lock().await;
        guard.session = Some(identity.id.clone());
        guard.expired = false;
        Ok(ProvisionedIdentity {
            identity,
            credential: Credential::new(secret),
        })
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Identity, CoreError> {
        let mut guard = self.state.lock().await;
        let identity = guard
            .accounts
            .iter()
            .find(|(secret, _)| secret == credential.expose())
            .map(|(_, identity)| identity.clone())
            .ok_or(CoreError::InvalidCredential)?;
        guard.session = Some(identity.id.clone());
        guard.expired = false;
        Ok(identity)
    }

    async fn logout(&self) -> Result<(), CoreError> {
        let mut guard = self.state.lock().await;
        guard.logout_calls += 1;
        guard.session = None;
        if guard.fail_logout {
            return Err(CoreError::Transport("logout unavailable".to_string()));
        }
        Ok(())
    }

    async fn check_session(&self) -> Result<Identity, CoreError> {
        self.state.lock().await.current()
    }

    async fn update_display_name(&self, name: &str) -> Result<Identity, CoreError> {
        let me = self.state.lock().await.current()?;
        self.wait_gate(GateKey::Rename).await;
        let mut guard = self.state.lock().await;
        let entry = guard
            .accounts
            .iter_mut()
            .find(|(_, identity)| identity.id == me.id)
            .ok_or(CoreError::Unauthorized)?;
        entry.1.display_name = name.trim().to_string();
        Ok(entry.1.clone())
    }

    async fn list_peers(&self) -> Result<Vec<Identity>, CoreError> {
        let guard = self.state.lock().await;
        let me = guard.current()?;
        Ok(guard
            .accounts
            .iter()
            .map(|(_, identity)| identity)
            .filter(|identity| identity.id != me.id)
            .cloned()
            .collect())
    }

    async fn fetch_history(&self, conversation: &Conversation) -> Result<Vec<Message>, CoreError> {
        let me = {
            let mut guard = self.state.lock().await;
            guard.fetch_calls += 1;
            guard.current()?
        };
        self.wait_gate(GateKey::History(conversation.clone())).await;
        let guard = self.state.lock().await;
        if guard.fail_history {
            return Err(CoreError::Transport("history unavailable".to_string()));
        }
        Ok(guard
            .messages
            .iter()
            .filter(|message| &message.conversation_for(&me.id) == conversation)
            .filter(|message| match conversation {
                Conversation::Global => true,
                Conversation::Private(_) => {
                    message.sender_id == me.id || message.receiver_id.as_ref() == Some(&me.id)
                }
            })
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        conversation: &Conversation,
        draft: &Draft,
    ) -> Result<Message, CoreError> {
        let me = {
            let mut guard = self.state.lock().await;
            guard.send_calls += 1;
            guard.current()?
        };
        self.wait_gate(GateKey::Send(conversation.clone())).await;
        let mut guard = self.state.lock().await;
        if guard.current()?.id != me.id {
            return Err(CoreError::Unauthorized);
        }
        if guard.fail_sends {
            return Err(CoreError::Transport("backend unavailable".to_string()));
        }
        guard.next_message += 1;
        let message = Message {
            id: MessageId::new(format!("m-{:06}", guard.next_message)),
            sender_id: me.id.clone(),
            receiver_id: conversation.peer().cloned(),
            sender_name: conversation.is_global().then(|| me.public_label.clone()),
            body: MessageBody {
                text: draft.text.clone(),
                image_ref: draft.image_ref.clone(),
            },
            created_at: Utc::now(),
        };
        guard.messages.push(message.clone());
        Ok(message)
    }
}
