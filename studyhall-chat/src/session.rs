//! # Channel Session
//!
//! One [`ChannelSession`] exists per opened channel. It owns the store, the
//! pager, the scroll anchor and the mutation bookkeeping for that channel,
//! and tags everything that leaves it with a [`SessionToken`] so results
//! belonging to an earlier session are recognised and dropped.
//!
//! The session is synchronous. The async driver in [`crate::engine`] feeds it
//! commands and backend completions one at a time.

use std::collections::HashMap;

use shared::BackendError;
use shared::config::ChatConfig;
use shared::models::{ChannelId, Draft, LocalId, Message, MessageId, Page, PageCursor};
use tracing::{debug, info, warn};

use crate::anchor::{MergeKind, ScrollAnchor, ScrollMetrics};
use crate::error::{SyncError, SyncResult};
use crate::merge::{MergeOutcome, merge_history, merge_tail};
use crate::mutation::{Collaborators, EditWrite, MutationController, MutationKey, MutationState, SendWrite};
use crate::pager::{HistoryPager, PagerDecision};
use crate::store::{Entry, MessageStore};
use crate::tail::TailStatus;

/// Identifies one channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken {
    generation: u64,
}

impl SessionToken {
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

/// Identifies one tail subscription of one session. A manual retry opens a
/// new epoch within the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TailToken {
    generation: u64,
    epoch: u64,
}

impl TailToken {
    #[must_use]
    pub const fn new(generation: u64, epoch: u64) -> Self {
        Self { generation, epoch }
    }

    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn epoch(self) -> u64 {
        self.epoch
    }
}

/// Hands out session generations; never repeats one.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    last: u64,
}

impl GenerationCounter {
    pub fn next_token(&mut self) -> SessionToken {
        self.last += 1;
        SessionToken {
            generation: self.last,
        }
    }
}

/// A backward page query to issue against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub token: SessionToken,
    pub channel: ChannelId,
    pub cursor: PageCursor,
    pub page_size: usize,
}

/// Result of a `load older` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOlder {
    Requested(HistoryRequest),
    AlreadyPending,
    Exhausted,
    /// Parked until the first tail snapshot provides an anchor message
    Deferred,
}

/// Result of handing a tail delivery to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailApplied {
    /// The delivery belongs to a cancelled subscription
    Stale,
    Merged {
        outcome: MergeOutcome,
        /// A deferred page request that can now be issued
        resumed: Option<HistoryRequest>,
    },
}

/// History flags shown to the view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryView {
    /// `None` until the first tail snapshot arrives
    pub has_more: Option<bool>,
    pub loading: bool,
    pub deferred: bool,
    pub error: Option<SyncError>,
}

/// Everything the UI layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub channel: Option<ChannelId>,
    pub entries: Vec<Entry>,
    pub tail: TailStatus,
    pub history: HistoryView,
    pub mutations: HashMap<MutationKey, MutationState>,
    /// Drafts of failed sends, so the composer can offer them again
    pub failed_sends: Vec<Draft>,
    /// Bumped on every change within a session
    pub revision: u64,
}

impl ChatView {
    /// Confirmed messages in display order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(Entry::as_message)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_pending()).count()
    }
}

#[derive(Debug)]
pub struct ChannelSession {
    token: SessionToken,
    channel: ChannelId,
    page_size: usize,
    collaborators: Collaborators,
    store: MessageStore,
    pager: HistoryPager,
    anchor: ScrollAnchor,
    mutations: MutationController,
    tail_epoch: u64,
    tail_status: TailStatus,
    first_snapshot_seen: bool,
    history_error: Option<SyncError>,
    revision: u64,
}

impl ChannelSession {
    #[must_use]
    pub fn open(token: SessionToken, channel: ChannelId, config: &ChatConfig, collaborators: Collaborators) -> Self {
        info!(channel = %channel, generation = token.generation, "opening channel session");
        Self {
            token,
            channel,
            page_size: config.page_size,
            collaborators,
            store: MessageStore::new(),
            pager: HistoryPager::new(config.page_size),
            anchor: ScrollAnchor::new(config.bottom_threshold_px),
            mutations: MutationController::new(),
            tail_epoch: 0,
            tail_status: TailStatus::Idle,
            first_snapshot_seen: false,
            history_error: None,
            revision: 0,
        }
    }

    #[must_use]
    pub const fn token(&self) -> SessionToken {
        self.token
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    #[must_use]
    pub const fn tail_status(&self) -> &TailStatus {
        &self.tail_status
    }

    /// Token of the current tail subscription, if one was begun.
    #[must_use]
    pub const fn tail_token(&self) -> Option<TailToken> {
        if self.tail_epoch == 0 {
            None
        } else {
            Some(TailToken::new(self.token.generation, self.tail_epoch))
        }
    }

    /// Starts a new tail epoch; deliveries tagged with earlier epochs become
    /// stale. Used both for the initial subscription and for manual retries.
    pub fn begin_tail(&mut self) -> TailToken {
        self.tail_epoch += 1;
        self.tail_status = TailStatus::Connecting;
        self.touch();
        TailToken::new(self.token.generation, self.tail_epoch)
    }

    fn is_current_tail(&self, token: TailToken) -> bool {
        self.tail_token() == Some(token)
    }

    fn is_current(&self, token: SessionToken) -> bool {
        self.token == token
    }

    pub fn apply_tail_snapshot(&mut self, token: TailToken, messages: Vec<Message>) -> TailApplied {
        if !self.is_current_tail(token) {
            debug!(channel = %self.channel, generation = token.generation, epoch = token.epoch, "discarding stale tail snapshot");
            return TailApplied::Stale;
        }
        if !self.first_snapshot_seen {
            self.first_snapshot_seen = true;
            self.pager.observe_first_snapshot(messages.len());
        }

        let outcome = merge_tail(&mut self.store, messages);
        if !outcome.is_noop() {
            self.anchor.before_merge(MergeKind::TailGrowth);
        }
        self.mutations.reconcile(&mut self.store);
        self.tail_status = TailStatus::Live;
        debug!(
            channel = %self.channel,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "merged tail snapshot"
        );

        let resumed = match self.pager.resume_deferred(&self.store, &self.channel) {
            Ok(request) => request.map(|request| self.history_request(request.cursor, request.page_size)),
            Err(error) => {
                warn!(channel = %self.channel, error = %error, "deferred history request abandoned");
                self.history_error = Some(error);
                None
            }
        };
        self.touch();
        TailApplied::Merged { outcome, resumed }
    }

    /// Marks the tail as failed. Returns `false` for stale deliveries.
    pub fn tail_failed(&mut self, token: TailToken, error: BackendError) -> bool {
        if !self.is_current_tail(token) {
            debug!(channel = %self.channel, generation = token.generation, "discarding stale tail failure");
            return false;
        }
        warn!(channel = %self.channel, error = %error, "unable to load messages");
        self.tail_status = TailStatus::Failed(SyncError::Remote(error));
        self.touch();
        true
    }

    fn history_request(&self, cursor: PageCursor, page_size: usize) -> HistoryRequest {
        HistoryRequest {
            token: self.token,
            channel: self.channel.clone(),
            cursor,
            page_size,
        }
    }

    /// Decides whether an older page should be fetched.
    ///
    /// # Errors
    /// Returns [`SyncError::CursorMismatch`] if the oldest message carries a
    /// cursor for another channel.
    pub fn request_older(&mut self) -> SyncResult<LoadOlder> {
        let decision = match self.pager.request(&self.store, &self.channel) {
            Ok(decision) => decision,
            Err(error) => {
                self.history_error = Some(error.clone());
                self.touch();
                return Err(error);
            }
        };
        let result = match decision {
            PagerDecision::Issue(request) => {
                self.history_error = None;
                LoadOlder::Requested(self.history_request(request.cursor, request.page_size))
            }
            PagerDecision::AlreadyPending => LoadOlder::AlreadyPending,
            PagerDecision::Exhausted => LoadOlder::Exhausted,
            PagerDecision::Deferred => LoadOlder::Deferred,
        };
        self.touch();
        Ok(result)
    }

    /// Merges a resolved page query. Returns `None` when the result belongs to
    /// another session.
    pub fn apply_history_page(
        &mut self,
        token: SessionToken,
        result: Result<Page, BackendError>,
    ) -> Option<MergeOutcome> {
        if !self.is_current(token) {
            debug!(channel = %self.channel, generation = token.generation, "discarding stale history page");
            return None;
        }
        let page = match result {
            Ok(page) => page,
            Err(error) => {
                warn!(channel = %self.channel, error = %error, "history page failed");
                self.pager.fail();
                self.history_error = Some(SyncError::Remote(error));
                self.touch();
                return Some(MergeOutcome::default());
            }
        };

        let exhausted = self.pager.complete(&page);
        if let Some(next) = &page.next_cursor {
            debug!(channel = %self.channel, next = next.token(), exhausted, "history page received");
        }
        let channel = &self.channel;
        let messages: Vec<Message> = page
            .messages
            .into_iter()
            .filter(|message| &message.channel_id == channel)
            .collect();

        let outcome = merge_history(&mut self.store, messages);
        if !outcome.is_noop() {
            self.anchor.before_merge(MergeKind::HistoryPrepend);
        }
        self.mutations.reconcile(&mut self.store);
        self.history_error = None;
        self.touch();
        Some(outcome)
    }

    /// Validates and applies an optimistic send.
    ///
    /// # Errors
    /// Validation or identity failures; nothing changes.
    pub fn send(&mut self, text: &str) -> SyncResult<SendWrite> {
        let write = self
            .mutations
            .prepare_send(&mut self.store, &self.channel, text, &self.collaborators)?;
        self.anchor.before_merge(MergeKind::TailGrowth);
        self.touch();
        Ok(write)
    }

    pub fn complete_send(&mut self, token: SessionToken, local_id: LocalId, result: Result<MessageId, BackendError>) -> bool {
        if !self.is_current(token) {
            debug!(%local_id, generation = token.generation, "discarding send result for closed session");
            return false;
        }
        let applied = self.mutations.complete_send(&mut self.store, local_id, result);
        self.touch();
        applied
    }

    /// Validates and applies an optimistic edit.
    ///
    /// # Errors
    /// Identity, lookup, authorship or validation failures; nothing changes.
    pub fn edit(&mut self, id: &MessageId, text: &str) -> SyncResult<EditWrite> {
        let write = self
            .mutations
            .prepare_edit(&mut self.store, id, text, &self.collaborators)?;
        self.touch();
        Ok(write)
    }

    pub fn complete_edit(
        &mut self,
        token: SessionToken,
        id: &MessageId,
        attempt: u64,
        result: Result<(), BackendError>,
    ) -> bool {
        if !self.is_current(token) {
            debug!(message_id = %id, generation = token.generation, "discarding edit result for closed session");
            return false;
        }
        let applied = self.mutations.complete_edit(&mut self.store, id, attempt, result);
        self.touch();
        applied
    }

    /// Applies an optimistic delete.
    ///
    /// # Errors
    /// Identity, lookup or permission failures; nothing changes.
    pub fn delete(&mut self, id: &MessageId) -> SyncResult<MessageId> {
        let id = self
            .mutations
            .prepare_delete(&mut self.store, id, &self.collaborators)?;
        self.touch();
        Ok(id)
    }

    pub fn complete_delete(&mut self, token: SessionToken, id: &MessageId, result: Result<(), BackendError>) -> bool {
        if !self.is_current(token) {
            debug!(message_id = %id, generation = token.generation, "discarding delete result for closed session");
            return false;
        }
        let applied = self.mutations.complete_delete(&mut self.store, id, result);
        self.touch();
        applied
    }

    pub fn dismiss(&mut self, key: &MutationKey) -> bool {
        let dismissed = self.mutations.dismiss(key);
        if dismissed {
            self.touch();
        }
        dismissed
    }

    pub fn observe_scroll(&mut self, metrics: ScrollMetrics) {
        self.anchor.observe(metrics);
    }

    /// Reports committed layout; returns the `scroll_top` the view should apply.
    pub fn layout_committed(&mut self, metrics: ScrollMetrics) -> Option<f64> {
        self.anchor.after_layout(metrics)
    }

    #[must_use]
    pub fn view(&self) -> ChatView {
        ChatView {
            channel: Some(self.channel.clone()),
            entries: self.store.entries().to_vec(),
            tail: self.tail_status.clone(),
            history: HistoryView {
                has_more: self.pager.has_more(),
                loading: self.pager.is_loading(),
                deferred: self.pager.is_deferred(),
                error: self.history_error.clone(),
            },
            mutations: self.mutations.states().clone(),
            failed_sends: self.mutations.failed_drafts().cloned().collect(),
            revision: self.revision,
        }
    }

    const fn touch(&mut self) {
        self.revision += 1;
    }
}
