pub mod sync_tests;

use crate::backend::InMemoryBackend;
use crate::config::CoreConfig;
use crate::event::{ClientEvent, EventReceiver};
use crate::session::ConnectionState;
use crate::transport::MockConnector;
use crate::Client;
use chrono::{DateTime, TimeZone, Utc};
use memesh_api::{Credential, Identity, Message, MessageBody, MessageId, UserId};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub client: Client,
    pub backend: InMemoryBackend,
    pub connector: MockConnector,
}

pub fn fast_config() -> CoreConfig {
    CoreConfig {
        reconnect_delay_ms: 10,
        ..CoreConfig::default()
    }
}

/// Backend with accounts `alice`, `bob` and `carol` (secrets `<label>-key`)
/// and a connector that acknowledges every handshake.
pub async fn harness() -> Harness {
    harness_with(fast_config()).await
}

pub async fn harness_with(config: CoreConfig) -> Harness {
    let backend = InMemoryBackend::new();
    for label in ["alice", "bob", "carol"] {
        backend.add_account(&format!("{}-key", label), label).await;
    }
    let connector = MockConnector::with_auto_ack();
    let client = Client::new(
        config,
        Arc::new(backend.clone()),
        Arc::new(connector.clone()),
    );
    Harness {
        client,
        backend,
        connector,
    }
}

/// Signs in as `label` and waits for the link to come up.
pub async fn signed_in(label: &str) -> (Harness, Identity) {
    let harness = harness().await;
    let identity = harness
        .client
        .authenticate(&credential(label))
        .await
        .expect("authenticate");
    let client = harness.client.clone();
    assert!(wait_for(|| client.connection_state() == ConnectionState::Connected).await);
    (harness, identity)
}

pub fn credential(label: &str) -> Credential {
    Credential::new(format!("{}-key", label))
}

pub fn user(label: &str) -> UserId {
    UserId::new(format!("u-{}", label))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("timestamp")
}

pub fn message(id: &str, sender: &str, receiver: Option<&str>, text: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        sender_id: user(sender),
        receiver_id: receiver.map(user),
        sender_name: None,
        body: MessageBody {
            text: Some(text.to_string()),
            image_ref: None,
        },
        created_at: at(secs),
    }
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.value.clone()).collect()
}

/// Polls `condition` for up to two seconds.
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub async fn next_matching(
    rx: &mut EventReceiver,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> Option<ClientEvent> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if predicate(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}

/// Waits until every event pushed so far has been routed, using a presence
/// push as a marker. Overwrites the presence set.
pub async fn flush(harness: &Harness) {
    let marker = UserId::new(format!("marker-{}", uuid::Uuid::new_v4()));
    assert!(
        harness
            .connector
            .push(crate::transport::ChannelEvent::PresenceSnapshot(vec![marker.clone()]))
            .await
    );
    let client = harness.client.clone();
    assert!(wait_for(|| client.is_online(&marker)).await);
}
