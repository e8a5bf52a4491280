use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId {
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId {
    pub value: String,
}

/// Anonymous user handle as returned by the backend.
///
/// The backend speaks Mongo-style documents, so field names are renamed to
/// `_id`, `anonymousId` and friends. Unknown fields (`__v`, `updatedAt`) are
/// ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "anonymousId")]
    pub public_label: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "profilePic", default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Secret key used to re-authenticate as an identity.
///
/// Shown to the human once at signup and never stored by the client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedIdentity {
    pub identity: Identity,
    pub credential: Credential,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "image", default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(rename = "senderId")]
    pub sender_id: UserId,
    #[serde(rename = "receiverId", default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(rename = "senderName", default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Outgoing message content. Serialized as the `sendMessage` request body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "image", default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Conversation {
    Private(UserId),
    Global,
}

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_ref: None,
        }
    }

    pub fn image(image_ref: impl Into<String>) -> Self {
        Self {
            text: None,
            image_ref: Some(image_ref.into()),
        }
    }
}

impl Message {
    pub fn text(&self) -> Option<&str> {
        self.body.text.as_deref()
    }

    /// Conversation this message belongs to, seen from `me`.
    ///
    /// Messages without a receiver are broadcast to the global room.
    pub fn conversation_for(&self, me: &UserId) -> Conversation {
        match self.receiver_id.as_ref() {
            None => Conversation::Global,
            Some(receiver) if &self.sender_id == me => Conversation::Private(receiver.clone()),
            Some(_) => Conversation::Private(self.sender_id.clone()),
        }
    }

    /// Ordering within a conversation: `createdAt`, then id.
    pub fn sequence_cmp(&self, other: &Message) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl Conversation {
    pub fn private(peer: impl Into<String>) -> Self {
        Conversation::Private(UserId::new(peer))
    }

    pub fn peer(&self) -> Option<&UserId> {
        match self {
            Conversation::Private(peer) => Some(peer),
            Conversation::Global => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Conversation::Global)
    }
}

impl Display for Conversation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Conversation::Private(peer) => write!(f, "private:{}", peer),
            Conversation::Global => f.write_str("global"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationLimits {
    pub max_text_bytes: usize,
    pub max_display_name_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_text_bytes: 64 * 1024,
            max_display_name_len: 64,
        }
    }
}
