//! # Message Store
//!
//! In-memory, ordered collection of the active channel's messages. It is the
//! single source of truth for rendering.
//!
//! Invariants held after every public mutation:
//! - no two entries share a key;
//! - confirmed entries are ascending by `created_at`, ties in arrival order;
//! - pending entries follow every confirmed entry, in the order they were sent.

use std::collections::HashSet;

use shared::models::{Draft, LocalId, Message, MessageId, PageCursor, SenderIdentity, Timestamp};

/// Identity of a store entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Remote(MessageId),
    Local(LocalId),
}

/// A row of the message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Authoritative copy from the tail or a history page
    Confirmed(Message),
    /// Optimistic send awaiting its authoritative twin
    Pending(Draft),
}

impl Entry {
    #[must_use]
    pub fn key(&self) -> EntryKey {
        match self {
            Self::Confirmed(message) => EntryKey::Remote(message.id.clone()),
            Self::Pending(draft) => EntryKey::Local(draft.local_id),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Confirmed(message) => &message.text,
            Self::Pending(draft) => &draft.text,
        }
    }

    #[must_use]
    pub fn sender(&self) -> &SenderIdentity {
        match self {
            Self::Confirmed(message) => &message.sender,
            Self::Pending(draft) => &draft.sender,
        }
    }

    /// Server timestamp; absent while the entry is pending.
    #[must_use]
    pub fn created_at(&self) -> Option<Timestamp> {
        match self {
            Self::Confirmed(message) => Some(message.created_at),
            Self::Pending(_) => None,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Confirmed(message) => Some(message),
            Self::Pending(_) => None,
        }
    }

    fn sort_key(&self) -> (bool, Option<Timestamp>) {
        (self.is_pending(), self.created_at())
    }
}

/// Ordered, deduplicated list of entries for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    entries: Vec<Entry>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from arbitrary entries, restoring the ordering and
    /// uniqueness invariants. Later duplicates win.
    #[must_use]
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self {
            entries: normalize(entries),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn confirmed_len(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_pending()).count()
    }

    #[must_use]
    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.iter().any(|entry| &entry.key() == key)
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries
            .iter()
            .filter_map(Entry::as_message)
            .find(|message| &message.id == id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.entries.iter_mut().find_map(|entry| match entry {
            Entry::Confirmed(message) if &message.id == id => Some(message),
            _ => None,
        })
    }

    /// Oldest authoritative message, the anchor for backward pagination.
    #[must_use]
    pub fn oldest_confirmed(&self) -> Option<&Message> {
        self.entries.iter().find_map(Entry::as_message)
    }

    /// Cursor referencing the position immediately before the oldest message.
    #[must_use]
    pub fn history_cursor(&self) -> Option<&PageCursor> {
        self.oldest_confirmed().map(|message| &message.source_cursor)
    }

    #[must_use]
    pub fn confirmed_ids(&self) -> HashSet<MessageId> {
        self.entries
            .iter()
            .filter_map(Entry::as_message)
            .map(|message| message.id.clone())
            .collect()
    }

    /// Appends a provisional entry at the tail.
    pub fn push_pending(&mut self, draft: Draft) {
        let key = EntryKey::Local(draft.local_id);
        self.entries.retain(|entry| entry.key() != key);
        self.entries.push(Entry::Pending(draft));
    }

    pub fn remove_pending(&mut self, local_id: LocalId) -> Option<Draft> {
        let index = self
            .entries
            .iter()
            .position(|entry| matches!(entry, Entry::Pending(draft) if draft.local_id == local_id))?;
        match self.entries.remove(index) {
            Entry::Pending(draft) => Some(draft),
            Entry::Confirmed(_) => None,
        }
    }

    pub fn remove_confirmed(&mut self, id: &MessageId) -> Option<Message> {
        let index = self
            .entries
            .iter()
            .position(|entry| matches!(entry, Entry::Confirmed(message) if &message.id == id))?;
        match self.entries.remove(index) {
            Entry::Confirmed(message) => Some(message),
            Entry::Pending(_) => None,
        }
    }

    /// Inserts or replaces one authoritative message at its ordered position.
    pub fn upsert_confirmed(&mut self, message: Message) {
        let mut entries = std::mem::take(&mut self.entries);
        entries.push(Entry::Confirmed(message));
        self.entries = normalize(entries);
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Entry) -> bool) {
        self.entries.retain(keep);
    }

    pub(crate) fn replace(&mut self, entries: Vec<Entry>) {
        self.entries = entries;
    }

    pub(crate) fn take(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Stable-sorts entries into store order, then keeps the last copy of every
/// key at the position of that copy.
pub(crate) fn normalize(mut entries: Vec<Entry>) -> Vec<Entry> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut deduped = Vec::with_capacity(entries.len());
    for entry in entries.drain(..).rev() {
        if seen.insert(entry.key()) {
            deduped.push(entry);
        }
    }
    deduped.reverse();
    // `sort_by` is stable: equal keys keep their relative order.
    deduped.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    deduped
}
