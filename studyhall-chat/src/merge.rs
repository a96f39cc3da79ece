//! # Merge Engine
//!
//! Reconciles live tail snapshots and backward history pages into the
//! [`MessageStore`] without duplicating or reordering what is already shown.
//! The tail and the pager may overlap in range; dedup-by-id absorbs it.

use std::collections::HashSet;

use shared::models::{Message, MessageId, Timestamp};

use crate::store::{Entry, MessageStore, normalize};

/// What a merge changed, as far as anchoring and bookkeeping care.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Ids that were not in the store before the merge
    pub added: Vec<MessageId>,
    /// Entries dropped because the tail window no longer holds them
    pub removed: Vec<MessageId>,
    /// Whether a message newer than everything previously held arrived
    pub grew_at_tail: bool,
}

impl MergeOutcome {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Merges a full tail snapshot.
///
/// Entries absent from the snapshot are kept as history, except confirmed
/// entries strictly newer than the snapshot's oldest message: those sit inside
/// the live window and were deleted remotely.
pub fn merge_tail(store: &mut MessageStore, tail: Vec<Message>) -> MergeOutcome {
    let before = store.confirmed_ids();
    let newest_before = newest(store);
    let incoming: HashSet<&MessageId> = tail.iter().map(|message| &message.id).collect();
    let floor = tail.iter().map(|message| message.created_at).min();

    let mut removed = Vec::new();
    let mut combined: Vec<Entry> = store
        .take()
        .into_iter()
        .filter(|entry| match entry {
            Entry::Confirmed(message) if incoming.contains(&message.id) => false,
            Entry::Confirmed(message) if floor.is_some_and(|floor| message.created_at > floor) => {
                removed.push(message.id.clone());
                false
            }
            _ => true,
        })
        .collect();
    combined.extend(tail.into_iter().map(Entry::Confirmed));
    store.replace(normalize(combined));

    outcome(store, &before, newest_before, removed)
}

/// Merges an older page in front of the current store.
///
/// On overlap the copy already in the store wins, since it is at least as
/// fresh as a history read.
pub fn merge_history(store: &mut MessageStore, page: Vec<Message>) -> MergeOutcome {
    let before = store.confirmed_ids();
    let newest_before = newest(store);

    let mut combined: Vec<Entry> = page.into_iter().map(Entry::Confirmed).collect();
    combined.extend(store.take());
    store.replace(normalize(combined));

    outcome(store, &before, newest_before, Vec::new())
}

fn newest(store: &MessageStore) -> Option<Timestamp> {
    store
        .entries()
        .iter()
        .rev()
        .find_map(Entry::created_at)
}

fn outcome(
    store: &MessageStore,
    before: &HashSet<MessageId>,
    newest_before: Option<Timestamp>,
    removed: Vec<MessageId>,
) -> MergeOutcome {
    let added: Vec<MessageId> = store
        .entries()
        .iter()
        .filter_map(Entry::as_message)
        .filter(|message| !before.contains(&message.id))
        .map(|message| message.id.clone())
        .collect();
    let grew_at_tail = store
        .entries()
        .iter()
        .filter_map(Entry::as_message)
        .filter(|message| !before.contains(&message.id))
        .any(|message| newest_before.is_none_or(|newest| message.created_at > newest));

    MergeOutcome {
        added,
        removed,
        grew_at_tail,
    }
}
