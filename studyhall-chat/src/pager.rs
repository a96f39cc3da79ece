//! # History Pager
//!
//! Bookkeeping for one-shot backward queries. At most one page request is in
//! flight per channel session; requests issued before the store has an anchor
//! message are deferred until it does.

use shared::models::{ChannelId, Page, PageCursor};

use crate::error::{SyncError, SyncResult};
use crate::store::MessageStore;

/// What the pager knows about older history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryState {
    /// No tail snapshot has been seen yet
    #[default]
    Unknown,
    /// Older messages may exist
    HasMore,
    /// A short or empty page was returned; nothing older exists
    Exhausted,
}

/// A page query ready to be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: PageCursor,
    pub page_size: usize,
}

/// Disposition of a `load older` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerDecision {
    Issue(PageRequest),
    AlreadyPending,
    Exhausted,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPager {
    page_size: usize,
    state: HistoryState,
    in_flight: bool,
    deferred: bool,
}

impl HistoryPager {
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self {
            page_size,
            state: HistoryState::Unknown,
            in_flight: false,
            deferred: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> HistoryState {
        self.state
    }

    /// `None` until the first tail snapshot decides it.
    #[must_use]
    pub const fn has_more(&self) -> Option<bool> {
        match self.state {
            HistoryState::Unknown => None,
            HistoryState::HasMore => Some(true),
            HistoryState::Exhausted => Some(false),
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Decides whether a backward page should be fetched now.
    ///
    /// # Errors
    /// Returns [`SyncError::CursorMismatch`] if the store's anchor message
    /// carries a cursor issued for another channel.
    pub fn request(&mut self, store: &MessageStore, channel: &ChannelId) -> SyncResult<PagerDecision> {
        if self.state == HistoryState::Exhausted {
            self.deferred = false;
            return Ok(PagerDecision::Exhausted);
        }
        if self.in_flight {
            return Ok(PagerDecision::AlreadyPending);
        }
        let cursor = match (self.state, store.history_cursor()) {
            (HistoryState::HasMore, Some(cursor)) => cursor.clone(),
            _ => {
                self.deferred = true;
                return Ok(PagerDecision::Deferred);
            }
        };
        if !cursor.belongs_to(channel) {
            return Err(SyncError::CursorMismatch {
                channel: channel.clone(),
                cursor_channel: cursor.channel_id().clone(),
            });
        }

        self.deferred = false;
        self.in_flight = true;
        Ok(PagerDecision::Issue(PageRequest {
            cursor,
            page_size: self.page_size,
        }))
    }

    /// Applies the first-snapshot rule: a full window means older history may
    /// exist. Later snapshots never change the state.
    pub fn observe_first_snapshot(&mut self, snapshot_len: usize) {
        if self.state == HistoryState::Unknown {
            self.state = if snapshot_len >= self.page_size {
                HistoryState::HasMore
            } else {
                HistoryState::Exhausted
            };
        }
    }

    /// Issues the deferred request once the store can supply a cursor.
    ///
    /// # Errors
    /// See [`HistoryPager::request`].
    pub fn resume_deferred(
        &mut self,
        store: &MessageStore,
        channel: &ChannelId,
    ) -> SyncResult<Option<PageRequest>> {
        if !self.deferred {
            return Ok(None);
        }
        match self.request(store, channel)? {
            PagerDecision::Issue(request) => Ok(Some(request)),
            PagerDecision::Deferred => Ok(None),
            PagerDecision::AlreadyPending | PagerDecision::Exhausted => {
                self.deferred = false;
                Ok(None)
            }
        }
    }

    /// Records a page result; returns whether history is now exhausted.
    pub fn complete(&mut self, page: &Page) -> bool {
        self.in_flight = false;
        if page.is_final(self.page_size) {
            self.state = HistoryState::Exhausted;
        }
        self.state == HistoryState::Exhausted
    }

    pub fn fail(&mut self) {
        self.in_flight = false;
    }
}
