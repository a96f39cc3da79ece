use serde::{Deserialize, Serialize};

use super::{ChannelId, LocalId, MessageId, PageCursor, SenderId, Timestamp};

/// Snapshot of who sent a message, taken at send time.
///
/// Identities are never re-resolved for historical messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub id: SenderId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl SenderIdentity {
    #[must_use]
    pub fn new(id: impl Into<SenderId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}

/// An authoritative message as delivered by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub text: String,
    pub sender: SenderIdentity,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
    /// Position marker used only to continue backward pagination.
    pub source_cursor: PageCursor,
}

impl Message {
    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    #[must_use]
    pub fn is_from(&self, sender: &SenderId) -> bool {
        &self.sender.id == sender
    }
}

/// A provisional message created by a local send, not yet confirmed.
///
/// It has no server timestamp; `placed_at` is the local clock reading used
/// for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub local_id: LocalId,
    pub channel_id: ChannelId,
    pub text: String,
    pub sender: SenderIdentity,
    pub placed_at: Timestamp,
}

/// Payload handed to the backend when sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub text: String,
    pub sender: SenderIdentity,
    /// Correlation token for the send attempt.
    pub local_id: LocalId,
}

impl From<&Draft> for NewMessage {
    fn from(draft: &Draft) -> Self {
        Self {
            text: draft.text.clone(),
            sender: draft.sender.clone(),
            local_id: draft.local_id,
        }
    }
}
