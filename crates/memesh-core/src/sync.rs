//! Message sequence of the active conversation: history fetch plus live
//! append, reconciled so nothing pushed during the fetch is lost.

use crate::backend::Backend;
use crate::error::CoreError;
use crate::event::{invoke_guarded, lock, ClientEvent, EventBus, HandlerRegistry, Subscription};
use memesh_api::{normalize_draft, Conversation, Draft, Message, MessageId, ValidationLimits};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

type MessageHandler = dyn Fn(&Message) + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// No conversation selected.
    Idle,
    /// History fetch in flight; live events are buffered.
    Loading,
    Live,
    /// Deactivated: sequence kept for reading, no further mutation.
    Detached,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied,
    Buffered,
    Duplicate,
    Ignored,
}

#[derive(Default)]
struct Sequence {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl Sequence {
    /// Inserts at the ordered position. Returns false for a known id.
    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|existing| existing.sequence_cmp(&message).is_le());
        self.messages.insert(at, message);
        true
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}

struct Buffered {
    message: Message,
    live: bool,
}

struct SyncState {
    epoch: u64,
    active: Option<Conversation>,
    phase: SyncPhase,
    sequence: Sequence,
    buffer: Vec<Buffered>,
}

#[derive(Clone)]
pub struct ConversationSync {
    backend: Arc<dyn Backend>,
    state: Arc<Mutex<SyncState>>,
    // Serializes handler delivery so handlers observe the sequence order.
    delivery: Arc<tokio::sync::Mutex<()>>,
    handlers: Arc<HandlerRegistry<Conversation, MessageHandler>>,
    events: EventBus,
    limits: ValidationLimits,
}

impl ConversationSync {
    pub fn new(backend: Arc<dyn Backend>, events: EventBus, limits: ValidationLimits) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(SyncState {
                epoch: 0,
                active: None,
                phase: SyncPhase::Idle,
                sequence: Sequence::default(),
                buffer: Vec::new(),
            })),
            delivery: Arc::new(tokio::sync::Mutex::new(())),
            handlers: HandlerRegistry::new(),
            events,
            limits,
        }
    }

    /// Makes `conversation` active and loads its history.
    ///
    /// Returns the sequence length after reconciliation, or
    /// [`CoreError::Superseded`] when another activation (or a deactivate)
    /// happened while the fetch was in flight.
    pub async fn activate(&self, conversation: Conversation) -> Result<usize, CoreError> {
        let epoch = {
            let mut state = lock(&self.state);
            state.epoch += 1;
            state.active = Some(conversation.clone());
            state.phase = SyncPhase::Loading;
            state.sequence.clear();
            state.buffer.clear();
            state.epoch
        };
        log::info!("activating conversation {}", conversation);
        self.events
            .publish(ClientEvent::ConversationActivated(conversation.clone()));

        let fetched = self.backend.fetch_history(&conversation).await;
        self.finish_load(&conversation, epoch, fetched, false).await
    }

    /// Re-fetches the active conversation after the link was restored and
    /// applies what was missed while it was down. Handlers see the recovered
    /// messages in order. A no-op unless the conversation is live.
    pub async fn resync(&self) -> Result<usize, CoreError> {
        let (conversation, epoch) = {
            let mut state = lock(&self.state);
            let conversation = match (state.active.clone(), state.phase) {
                (Some(conversation), SyncPhase::Live) => conversation,
                _ => return Ok(0),
            };
            state.epoch += 1;
            state.phase = SyncPhase::Loading;
            (conversation, state.epoch)
        };
        log::debug!("resyncing {}", conversation);
        let fetched = self.backend.fetch_history(&conversation).await;
        self.finish_load(&conversation, epoch, fetched, true).await
    }

    /// Merges fetched history with the live buffer and goes live. Messages
    /// new to the sequence are announced; pushed ones (and recovered history
    /// when `recovering`) also reach the handlers.
    async fn finish_load(
        &self,
        conversation: &Conversation,
        epoch: u64,
        fetched: Result<Vec<Message>, CoreError>,
        recovering: bool,
    ) -> Result<usize, CoreError> {
        let _delivery = self.delivery.lock().await;
        let (fresh, count) = {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                log::debug!("discarding stale history for {}", conversation);
                return Err(CoreError::Superseded);
            }
            let mut fresh = Vec::new();
            if let Ok(history) = fetched.as_ref() {
                for message in history.iter().cloned() {
                    if state.sequence.insert(message.clone()) && recovering {
                        fresh.push((message, true));
                    }
                }
            }
            let buffered = std::mem::take(&mut state.buffer);
            for entry in buffered {
                if state.sequence.insert(entry.message.clone()) {
                    fresh.push((entry.message, entry.live));
                }
            }
            fresh.sort_by(|(a, _), (b, _)| a.sequence_cmp(b));
            state.phase = SyncPhase::Live;
            (fresh, state.sequence.messages.len())
        };

        match fetched {
            Ok(_) => {
                log::debug!(
                    "history for {} reconciled: {} messages, {} new",
                    conversation,
                    count,
                    fresh.len()
                );
                self.events.publish(ClientEvent::HistoryLoaded {
                    conversation: conversation.clone(),
                    count,
                });
            }
            Err(ref err) => log::warn!("history fetch for {} failed: {}", conversation, err),
        }
        for (message, notify_handlers) in fresh {
            if notify_handlers {
                self.deliver(conversation, &message);
            } else {
                self.announce(conversation, &message);
            }
        }
        fetched.map(|_| count)
    }

    /// Stops applying live events. The sequence stays readable.
    pub fn deactivate(&self) {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.buffer.clear();
        if state.active.is_some() {
            state.phase = SyncPhase::Detached;
        }
    }

    /// Drops the active conversation and its sequence.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.active = None;
        state.phase = SyncPhase::Idle;
        state.sequence.clear();
        state.buffer.clear();
    }

    /// Applies a live-pushed message that belongs to `conversation`.
    pub async fn ingest(&self, conversation: &Conversation, message: Message) -> IngestOutcome {
        let _delivery = self.delivery.lock().await;
        let outcome = {
            let mut state = lock(&self.state);
            if state.active.as_ref() != Some(conversation) {
                IngestOutcome::Ignored
            } else {
                match state.phase {
                    SyncPhase::Loading => {
                        state.buffer.push(Buffered {
                            message: message.clone(),
                            live: true,
                        });
                        IngestOutcome::Buffered
                    }
                    SyncPhase::Live => {
                        if state.sequence.insert(message.clone()) {
                            IngestOutcome::Applied
                        } else {
                            IngestOutcome::Duplicate
                        }
                    }
                    SyncPhase::Idle | SyncPhase::Detached => IngestOutcome::Ignored,
                }
            }
        };
        match outcome {
            IngestOutcome::Applied => self.deliver(conversation, &message),
            IngestOutcome::Ignored => {
                log::debug!("ignoring message {} for inactive {}", message.id, conversation)
            }
            IngestOutcome::Buffered | IngestOutcome::Duplicate => {}
        }
        outcome
    }

    /// Submits a draft and records the server's copy once accepted.
    pub async fn send(&self, conversation: &Conversation, draft: &Draft) -> Result<Message, CoreError> {
        let draft = normalize_draft(draft, &self.limits)?;
        let message = match self.backend.send_message(conversation, &draft).await {
            Ok(message) => message,
            Err(CoreError::Unauthorized) => return Err(CoreError::Unauthorized),
            Err(err) => {
                log::warn!("send to {} failed: {}", conversation, err);
                return Err(CoreError::SendFailed(err.to_string()));
            }
        };
        self.record_confirmed(conversation, &message).await;
        Ok(message)
    }

    async fn record_confirmed(&self, conversation: &Conversation, message: &Message) {
        let _delivery = self.delivery.lock().await;
        let appended = {
            let mut state = lock(&self.state);
            if state.active.as_ref() != Some(conversation) {
                return;
            }
            match state.phase {
                SyncPhase::Loading => {
                    state.buffer.push(Buffered {
                        message: message.clone(),
                        live: false,
                    });
                    false
                }
                SyncPhase::Live => state.sequence.insert(message.clone()),
                SyncPhase::Idle | SyncPhase::Detached => false,
            }
        };
        if appended {
            self.announce(conversation, message);
        }
    }

    /// Registers the live-message handler for `conversation`, replacing any
    /// previous one.
    pub fn on_message(
        &self,
        conversation: Conversation,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Subscription {
        self.handlers.register(conversation, Arc::new(handler), true)
    }

    pub(crate) fn clear_handlers(&self) {
        self.handlers.clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state).sequence.messages.clone()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        lock(&self.state).sequence.contains(id)
    }

    pub fn active(&self) -> Option<Conversation> {
        lock(&self.state).active.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        lock(&self.state).phase
    }

    fn announce(&self, conversation: &Conversation, message: &Message) {
        self.events.publish(ClientEvent::MessageAppended {
            conversation: conversation.clone(),
            message: message.clone(),
        });
    }

    fn deliver(&self, conversation: &Conversation, message: &Message) {
        self.announce(conversation, message);
        for handler in self.handlers.matching(conversation) {
            invoke_guarded("message", || handler(message));
        }
    }
}
