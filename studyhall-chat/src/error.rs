//! # Sync Error Types
//!
//! Validation and authorization failures are raised synchronously, before any
//! optimistic state changes. Remote failures arrive later and roll the
//! optimistic state back.

use shared::BackendError;
use shared::models::{ChannelId, MessageId};
use thiserror::Error;

/// Result type alias for engine operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Broad classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Remote,
    State,
}

/// Comprehensive error type for the chat engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Message text was empty or whitespace only
    #[error("Message text must not be empty")]
    EmptyMessage,

    /// The content policy refused the text
    #[error("Message text was rejected by the content policy")]
    ContentRejected,

    /// No sender identity is available
    #[error("No authenticated sender")]
    NotAuthenticated,

    /// Only the author may perform this operation
    #[error("Only the author can edit message {id}")]
    NotAuthor { id: MessageId },

    /// The sender is neither the author nor a moderator
    #[error("Not permitted to delete message {id}")]
    NotPermitted { id: MessageId },

    /// The message is not in the store
    #[error("Message {id} not found")]
    NotFound { id: MessageId },

    /// An operation needed an open channel session
    #[error("No channel is open")]
    NoActiveChannel,

    /// A cursor issued by one channel was used for another
    #[error("Cursor issued for channel {cursor_channel} used on channel {channel}")]
    CursorMismatch {
        channel: ChannelId,
        cursor_channel: ChannelId,
    },

    /// The engine task is no longer running
    #[error("Chat engine has stopped")]
    EngineStopped,

    /// The remote store failed
    #[error(transparent)]
    Remote(#[from] BackendError),
}

impl SyncError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyMessage | Self::ContentRejected => ErrorKind::Validation,
            Self::NotAuthenticated | Self::NotAuthor { .. } | Self::NotPermitted { .. } => {
                ErrorKind::Authorization
            }
            Self::Remote(_) => ErrorKind::Remote,
            Self::NotFound { .. }
            | Self::NoActiveChannel
            | Self::CursorMismatch { .. }
            | Self::EngineStopped => ErrorKind::State,
        }
    }

    /// Whether the caller may offer a retry affordance
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Remote(error) => error.is_retryable(),
            _ => false,
        }
    }
}
