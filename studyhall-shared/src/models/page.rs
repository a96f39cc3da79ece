use serde::{Deserialize, Serialize};

use super::{ChannelId, Message};

/// Opaque, store-issued position used to request older messages.
///
/// A cursor is only meaningful for the channel that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor {
    channel_id: ChannelId,
    token: String,
}

impl PageCursor {
    #[must_use]
    pub fn new(channel_id: ChannelId, token: impl Into<String>) -> Self {
        Self {
            channel_id,
            token: token.into(),
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn belongs_to(&self, channel_id: &ChannelId) -> bool {
        &self.channel_id == channel_id
    }
}

/// One backward page of history, ascending by `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<PageCursor>,
    #[serde(default)]
    pub exhausted: bool,
}

impl Page {
    /// Whether this page ends the channel's history for the given page size.
    ///
    /// A short or empty page is final even when the backend did not flag it.
    #[must_use]
    pub fn is_final(&self, page_size: usize) -> bool {
        self.exhausted || self.messages.is_empty() || self.messages.len() < page_size
    }
}
