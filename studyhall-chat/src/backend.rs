//! # Collaborator Traits
//!
//! The engine talks to the outside world only through these seams: the remote
//! message store, the content policy, the session's identity, and moderation
//! rights.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use shared::BackendResult;
use shared::models::{ChannelId, Message, MessageId, NewMessage, Page, PageCursor, SenderIdentity};

/// Stream of full tail snapshots. Dropping it unsubscribes.
pub type TailStream = Pin<Box<dyn Stream<Item = BackendResult<Vec<Message>>> + Send + 'static>>;

/// Remote message store.
///
/// Every call is scoped to a channel. Ordering is by the store's monotonic
/// logical timestamp.
#[async_trait]
pub trait MessageBackend: Send + Sync + 'static {
    /// Open a standing subscription to the newest `page_size` messages.
    ///
    /// Each item is the complete current snapshot of that window, ascending
    /// by `created_at`, delivered whenever anything inside it changes.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be established.
    async fn subscribe_tail(&self, channel: &ChannelId, page_size: usize)
    -> BackendResult<TailStream>;

    /// Fetch up to `page_size` messages strictly older than `before`,
    /// ascending.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    async fn fetch_older_page(
        &self,
        channel: &ChannelId,
        before: &PageCursor,
        page_size: usize,
    ) -> BackendResult<Page>;

    /// Persist a new message and return the id the store assigned to it.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    async fn send_message(&self, channel: &ChannelId, payload: NewMessage)
    -> BackendResult<MessageId>;

    /// Replace the text of an existing message.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    async fn edit_message(&self, channel: &ChannelId, id: &MessageId, text: &str)
    -> BackendResult<()>;

    /// Remove a message.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    async fn delete_message(&self, channel: &ChannelId, id: &MessageId) -> BackendResult<()>;
}

/// Content check applied to send and edit before any network call.
#[cfg_attr(test, mockall::automock)]
pub trait ContentPolicy: Send + Sync {
    fn is_disallowed(&self, text: &str) -> bool;
}

impl<F> ContentPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_disallowed(&self, text: &str) -> bool {
        self(text)
    }
}

/// Policy that accepts every text.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ContentPolicy for AllowAll {
    fn is_disallowed(&self, _text: &str) -> bool {
        false
    }
}

/// Source of the current sender, supplied by the session provider.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    fn current_sender(&self) -> Option<SenderIdentity>;
}

/// Identity fixed for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Option<SenderIdentity>);

impl IdentityProvider for StaticIdentity {
    fn current_sender(&self) -> Option<SenderIdentity> {
        self.0.clone()
    }
}

/// Moderation rights for deleting other people's messages.
#[cfg_attr(test, mockall::automock)]
pub trait Authorizer: Send + Sync {
    fn can_moderate(&self, message: &Message) -> bool;
}

/// Authorizer that grants no moderation rights.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModeration;

impl Authorizer for NoModeration {
    fn can_moderate(&self, _message: &Message) -> bool {
        false
    }
}
