//! # Mutation Controller
//!
//! Send, edit and delete are applied to the store immediately and paired
//! with a remote write. Each write is reconciled when it resolves:
//! - a send is correlated with its authoritative twin through the id the
//!   write returns, and its provisional entry is dropped once that twin is in
//!   the store; a failed send leaves the store;
//! - a failed edit restores the last authoritative text;
//! - a failed delete puts the message back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use shared::BackendError;
use shared::models::{ChannelId, Draft, LocalId, Message, MessageId, NewMessage, Timestamp};
use tracing::{debug, warn};

use crate::backend::{AllowAll, Authorizer, ContentPolicy, IdentityProvider, NoModeration, StaticIdentity};
use crate::error::{SyncError, SyncResult};
use crate::store::{EntryKey, MessageStore};

/// External collaborators consulted before any optimistic change.
#[derive(Clone)]
pub struct Collaborators {
    pub policy: Arc<dyn ContentPolicy>,
    pub identity: Arc<dyn IdentityProvider>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl Collaborators {
    #[must_use]
    pub fn new(
        policy: Arc<dyn ContentPolicy>,
        identity: Arc<dyn IdentityProvider>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            policy,
            identity,
            authorizer,
        }
    }

    /// Permissive policy, no moderation rights, fixed identity.
    #[must_use]
    pub fn for_sender(sender: shared::models::SenderIdentity) -> Self {
        Self::new(
            Arc::new(AllowAll),
            Arc::new(StaticIdentity(Some(sender))),
            Arc::new(NoModeration),
        )
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Which mutation a state belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationKey {
    Send(LocalId),
    Edit(MessageId),
    Delete(MessageId),
}

/// Visible progress of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Failed(SyncError),
}

/// A send accepted locally, to be written remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendWrite {
    pub local_id: LocalId,
    pub payload: NewMessage,
}

/// An edit applied locally, to be written remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditWrite {
    pub id: MessageId,
    pub text: String,
    pub attempt: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendProgress {
    Writing,
    AwaitingEcho,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EditRecord {
    attempt: u64,
    authoritative_text: String,
    authoritative_edited_at: Option<Timestamp>,
    optimistic_text: String,
    optimistic_edited_at: Timestamp,
}

#[derive(Debug, Default)]
pub struct MutationController {
    states: HashMap<MutationKey, MutationState>,
    sends: HashMap<LocalId, SendProgress>,
    echoes: HashMap<MessageId, LocalId>,
    failed_drafts: HashMap<LocalId, Draft>,
    edits: HashMap<MessageId, EditRecord>,
    next_attempt: u64,
    deletes: HashMap<MessageId, Message>,
    tombstones: HashSet<MessageId>,
}

impl MutationController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, key: &MutationKey) -> Option<&MutationState> {
        self.states.get(key)
    }

    #[must_use]
    pub fn states(&self) -> &HashMap<MutationKey, MutationState> {
        &self.states
    }

    /// The draft of a send whose write failed, so the composer can offer it again.
    #[must_use]
    pub fn failed_draft(&self, local_id: LocalId) -> Option<&Draft> {
        self.failed_drafts.get(&local_id)
    }

    /// Drafts of every failed send, oldest attempt first.
    pub fn failed_drafts(&self) -> impl Iterator<Item = &Draft> {
        let mut drafts: Vec<&Draft> = self.failed_drafts.values().collect();
        drafts.sort_by_key(|draft| draft.placed_at);
        drafts.into_iter()
    }

    /// Clears a failure once the view has shown it.
    pub fn dismiss(&mut self, key: &MutationKey) -> bool {
        if !matches!(self.states.get(key), Some(MutationState::Failed(_))) {
            return false;
        }
        self.states.remove(key);
        if let MutationKey::Send(local_id) = key {
            self.failed_drafts.remove(local_id);
        }
        true
    }

    fn validate_text(text: &str, collaborators: &Collaborators) -> SyncResult<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        if collaborators.policy.is_disallowed(trimmed) {
            return Err(SyncError::ContentRejected);
        }
        Ok(trimmed.to_string())
    }

    /// Validates a send and inserts its provisional entry at the tail.
    ///
    /// # Errors
    /// Validation or identity failures, with the store untouched.
    pub fn prepare_send(
        &mut self,
        store: &mut MessageStore,
        channel: &ChannelId,
        text: &str,
        collaborators: &Collaborators,
    ) -> SyncResult<SendWrite> {
        let text = Self::validate_text(text, collaborators)?;
        let sender = collaborators
            .identity
            .current_sender()
            .ok_or(SyncError::NotAuthenticated)?;

        let draft = Draft {
            local_id: LocalId::generate(),
            channel_id: channel.clone(),
            text,
            sender,
            placed_at: Timestamp::now(),
        };
        let write = SendWrite {
            local_id: draft.local_id,
            payload: NewMessage::from(&draft),
        };
        store.push_pending(draft);
        self.sends.insert(write.local_id, SendProgress::Writing);
        self.states
            .insert(MutationKey::Send(write.local_id), MutationState::Pending);
        Ok(write)
    }

    /// Reconciles a resolved send write. Returns `false` if the send is unknown.
    pub fn complete_send(
        &mut self,
        store: &mut MessageStore,
        local_id: LocalId,
        result: Result<MessageId, BackendError>,
    ) -> bool {
        if self.sends.get(&local_id) != Some(&SendProgress::Writing) {
            return false;
        }
        match result {
            Ok(id) => {
                debug!(%local_id, message_id = %id, "send confirmed, awaiting echo");
                self.sends.insert(local_id, SendProgress::AwaitingEcho);
                self.echoes.insert(id, local_id);
                self.reconcile_echoes(store);
            }
            Err(error) => {
                warn!(%local_id, error = %error, "send failed");
                self.sends.remove(&local_id);
                if let Some(draft) = store.remove_pending(local_id) {
                    self.failed_drafts.insert(local_id, draft);
                }
                self.states.insert(
                    MutationKey::Send(local_id),
                    MutationState::Failed(SyncError::Remote(error)),
                );
            }
        }
        true
    }

    /// Applies an edit locally after authorization and validation.
    ///
    /// # Errors
    /// Identity, lookup, authorship or validation failures, with the store
    /// untouched.
    pub fn prepare_edit(
        &mut self,
        store: &mut MessageStore,
        id: &MessageId,
        text: &str,
        collaborators: &Collaborators,
    ) -> SyncResult<EditWrite> {
        let sender = collaborators
            .identity
            .current_sender()
            .ok_or(SyncError::NotAuthenticated)?;
        let message = store
            .get(id)
            .ok_or_else(|| SyncError::NotFound { id: id.clone() })?;
        if !message.is_from(&sender.id) {
            return Err(SyncError::NotAuthor { id: id.clone() });
        }
        let text = Self::validate_text(text, collaborators)?;

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let edited_at = Timestamp::now();
        let (authoritative_text, authoritative_edited_at) = match self.edits.get(id) {
            Some(record) => (record.authoritative_text.clone(), record.authoritative_edited_at),
            None => (message.text.clone(), message.edited_at),
        };
        self.edits.insert(
            id.clone(),
            EditRecord {
                attempt,
                authoritative_text,
                authoritative_edited_at,
                optimistic_text: text.clone(),
                optimistic_edited_at: edited_at,
            },
        );
        if let Some(message) = store.get_mut(id) {
            message.text.clone_from(&text);
            message.edited_at = Some(edited_at);
        }
        self.states
            .insert(MutationKey::Edit(id.clone()), MutationState::Pending);

        Ok(EditWrite {
            id: id.clone(),
            text,
            attempt,
        })
    }

    /// Reconciles a resolved edit write. Results of superseded attempts are
    /// ignored. Returns `false` if nothing was reconciled.
    pub fn complete_edit(
        &mut self,
        store: &mut MessageStore,
        id: &MessageId,
        attempt: u64,
        result: Result<(), BackendError>,
    ) -> bool {
        let Some(record) = self.edits.get(id).filter(|record| record.attempt == attempt) else {
            return false;
        };
        let record = record.clone();
        self.edits.remove(id);

        match result {
            Ok(()) => {
                self.states.remove(&MutationKey::Edit(id.clone()));
            }
            Err(error) => {
                warn!(message_id = %id, error = %error, "edit failed, reverting");
                if let Some(message) = store.get_mut(id)
                    && message.text == record.optimistic_text
                {
                    message.text = record.authoritative_text;
                    message.edited_at = record.authoritative_edited_at;
                }
                self.states.insert(
                    MutationKey::Edit(id.clone()),
                    MutationState::Failed(SyncError::Remote(error)),
                );
            }
        }
        true
    }

    /// Removes a message locally after authorization.
    ///
    /// # Errors
    /// Identity, lookup or permission failures, with the store untouched.
    pub fn prepare_delete(
        &mut self,
        store: &mut MessageStore,
        id: &MessageId,
        collaborators: &Collaborators,
    ) -> SyncResult<MessageId> {
        let sender = collaborators
            .identity
            .current_sender()
            .ok_or(SyncError::NotAuthenticated)?;
        let message = store
            .get(id)
            .ok_or_else(|| SyncError::NotFound { id: id.clone() })?;
        if !message.is_from(&sender.id) && !collaborators.authorizer.can_moderate(message) {
            return Err(SyncError::NotPermitted { id: id.clone() });
        }

        if let Some(removed) = store.remove_confirmed(id) {
            self.deletes.insert(id.clone(), removed);
        }
        self.states
            .insert(MutationKey::Delete(id.clone()), MutationState::Pending);
        Ok(id.clone())
    }

    /// Reconciles a resolved delete write. Returns `false` if the delete is unknown.
    pub fn complete_delete(
        &mut self,
        store: &mut MessageStore,
        id: &MessageId,
        result: Result<(), BackendError>,
    ) -> bool {
        let Some(removed) = self.deletes.remove(id) else {
            return false;
        };
        match result {
            Ok(()) => {
                self.tombstones.insert(id.clone());
                self.states.remove(&MutationKey::Delete(id.clone()));
            }
            Err(error) => {
                warn!(message_id = %id, error = %error, "delete failed, restoring message");
                store.upsert_confirmed(removed);
                self.states.insert(
                    MutationKey::Delete(id.clone()),
                    MutationState::Failed(SyncError::Remote(error)),
                );
            }
        }
        true
    }

    /// Re-applies local intent on top of freshly merged data:
    /// - drops provisional entries whose authoritative twin has arrived;
    /// - suppresses messages with a pending or confirmed delete;
    /// - keeps optimistic text on messages with a pending edit, remembering
    ///   the incoming text as the one to restore on failure.
    pub fn reconcile(&mut self, store: &mut MessageStore) {
        let deletes = &self.deletes;
        let tombstones = &self.tombstones;
        store.retain(|entry| match entry.as_message() {
            Some(message) => !deletes.contains_key(&message.id) && !tombstones.contains(&message.id),
            None => true,
        });

        for (id, record) in &mut self.edits {
            if let Some(message) = store.get_mut(id)
                && message.text != record.optimistic_text
            {
                record.authoritative_text = std::mem::replace(&mut message.text, record.optimistic_text.clone());
                record.authoritative_edited_at = message.edited_at.replace(record.optimistic_edited_at);
            }
        }

        self.reconcile_echoes(store);
    }

    fn reconcile_echoes(&mut self, store: &mut MessageStore) {
        let arrived: Vec<MessageId> = self
            .echoes
            .keys()
            .filter(|id| store.contains(&EntryKey::Remote((*id).clone())))
            .cloned()
            .collect();
        for id in arrived {
            if let Some(local_id) = self.echoes.remove(&id) {
                store.remove_pending(local_id);
                self.sends.remove(&local_id);
                self.states.remove(&MutationKey::Send(local_id));
                debug!(%local_id, message_id = %id, "provisional entry replaced by authoritative copy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockAuthorizer, MockContentPolicy, MockIdentityProvider};
    use crate::merge::merge_tail;
    use crate::store::Entry;
    use crate::store::fixtures::*;
    use shared::models::{SenderId, SenderIdentity};
    use test_case::test_case;

    fn me() -> SenderIdentity {
        SenderIdentity::new("me", "Me")
    }

    fn mine(id: &str, at: i64) -> Message {
        let mut message = message(id, at);
        message.sender = me();
        message
    }

    fn collaborators() -> Collaborators {
        Collaborators::for_sender(me())
    }

    fn store_of(messages: Vec<Message>) -> MessageStore {
        MessageStore::from_entries(messages.into_iter().map(Entry::Confirmed).collect())
    }

    #[test_case("" ; "empty")]
    #[test_case("   \n\t" ; "whitespace only")]
    fn test_blank_sends_are_rejected_locally(text: &str) {
        let mut controller = MutationController::new();
        let mut store = MessageStore::new();
        let result = controller.prepare_send(&mut store, &channel(), text, &collaborators());
        assert_eq!(result, Err(SyncError::EmptyMessage));
        assert!(store.is_empty());
        assert!(controller.states().is_empty());
    }

    #[test]
    fn test_policy_rejection_happens_before_any_change() {
        let mut policy = MockContentPolicy::new();
        policy
            .expect_is_disallowed()
            .withf(|text| text == "forbidden words")
            .times(1)
            .return_const(true);
        let mut identity = MockIdentityProvider::new();
        identity.expect_current_sender().never();
        let collaborators = Collaborators::new(
            Arc::new(policy),
            Arc::new(identity),
            Arc::new(NoModeration),
        );

        let mut controller = MutationController::new();
        let mut store = MessageStore::new();
        let result = controller.prepare_send(&mut store, &channel(), " forbidden words ", &collaborators);
        assert_eq!(result, Err(SyncError::ContentRejected));
        assert!(store.is_empty());
    }

    #[test]
    fn test_send_without_identity_is_rejected() {
        let collaborators = Collaborators::new(
            Arc::new(AllowAll),
            Arc::new(StaticIdentity(None)),
            Arc::new(NoModeration),
        );
        let mut controller = MutationController::new();
        let mut store = MessageStore::new();
        assert_eq!(
            controller.prepare_send(&mut store, &channel(), "hi", &collaborators),
            Err(SyncError::NotAuthenticated)
        );
    }

    #[test]
    fn test_confirmed_send_is_replaced_when_its_twin_arrives() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![message("m1", 10)]);
        let write = controller
            .prepare_send(&mut store, &channel(), "  hello ", &collaborators())
            .unwrap();
        assert_eq!(write.payload.text, "hello");
        assert_eq!(ids(&store), vec!["m1", "pending:hello"]);

        assert!(controller.complete_send(&mut store, write.local_id, Ok(MessageId::new("m2"))));
        assert_eq!(ids(&store), vec!["m1", "pending:hello"]);
        assert_eq!(
            controller.state(&MutationKey::Send(write.local_id)),
            Some(&MutationState::Pending)
        );

        merge_tail(&mut store, vec![message("m1", 10), mine("m2", 20)]);
        controller.reconcile(&mut store);
        assert_eq!(ids(&store), vec!["m1", "m2"]);
        assert!(controller.states().is_empty());
    }

    #[test]
    fn test_twin_arriving_before_write_resolves_is_reconciled_on_completion() {
        let mut controller = MutationController::new();
        let mut store = MessageStore::new();
        let write = controller
            .prepare_send(&mut store, &channel(), "quick", &collaborators())
            .unwrap();

        merge_tail(&mut store, vec![mine("m9", 90)]);
        controller.reconcile(&mut store);
        assert_eq!(ids(&store), vec!["m9", "pending:quick"]);

        controller.complete_send(&mut store, write.local_id, Ok(MessageId::new("m9")));
        assert_eq!(ids(&store), vec!["m9"]);
    }

    #[test]
    fn test_two_quick_sends_are_correlated_independently() {
        let mut controller = MutationController::new();
        let mut store = MessageStore::new();
        let first = controller
            .prepare_send(&mut store, &channel(), "one", &collaborators())
            .unwrap();
        let second = controller
            .prepare_send(&mut store, &channel(), "two", &collaborators())
            .unwrap();

        controller.complete_send(&mut store, first.local_id, Ok(MessageId::new("a")));
        controller.complete_send(&mut store, second.local_id, Ok(MessageId::new("b")));

        merge_tail(&mut store, vec![mine("a", 1)]);
        controller.reconcile(&mut store);
        assert_eq!(ids(&store), vec!["a", "pending:two"]);

        merge_tail(&mut store, vec![mine("a", 1), mine("b", 2)]);
        controller.reconcile(&mut store);
        assert_eq!(ids(&store), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_send_leaves_the_store() {
        let mut controller = MutationController::new();
        let mut store = MessageStore::new();
        let write = controller
            .prepare_send(&mut store, &channel(), "offline", &collaborators())
            .unwrap();

        controller.complete_send(
            &mut store,
            write.local_id,
            Err(BackendError::unavailable("offline")),
        );

        assert!(store.is_empty());
        let key = MutationKey::Send(write.local_id);
        assert!(matches!(controller.state(&key), Some(MutationState::Failed(_))));
        assert_eq!(controller.failed_draft(write.local_id).unwrap().text, "offline");

        assert!(controller.dismiss(&key));
        assert!(controller.failed_draft(write.local_id).is_none());
        assert!(!controller.complete_send(&mut store, write.local_id, Ok(MessageId::new("late"))));
    }

    #[test]
    fn test_edit_by_non_author_is_rejected() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![message("m1", 10)]);
        assert_eq!(
            controller.prepare_edit(&mut store, &MessageId::new("m1"), "new", &collaborators()),
            Err(SyncError::NotAuthor {
                id: MessageId::new("m1")
            })
        );
        assert_eq!(store.get(&MessageId::new("m1")).unwrap().text, "text of m1");
    }

    #[test]
    fn test_failed_edit_reverts_text() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![mine("m1", 10), mine("m2", 20)]);
        let id = MessageId::new("m2");

        let write = controller
            .prepare_edit(&mut store, &id, "edited", &collaborators())
            .unwrap();
        assert_eq!(store.get(&id).unwrap().text, "edited");
        assert!(store.get(&id).unwrap().is_edited());

        controller.complete_edit(&mut store, &id, write.attempt, Err(BackendError::unavailable("down")));

        let message = store.get(&id).unwrap();
        assert_eq!(message.text, "text of m2");
        assert!(!message.is_edited());
        assert!(matches!(
            controller.state(&MutationKey::Edit(id)),
            Some(MutationState::Failed(SyncError::Remote(_)))
        ));
    }

    #[test]
    fn test_pending_edit_survives_stale_snapshots_and_reverts_to_latest_authoritative() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![mine("m1", 10)]);
        let id = MessageId::new("m1");
        let write = controller
            .prepare_edit(&mut store, &id, "mine", &collaborators())
            .unwrap();

        let mut remote = mine("m1", 10);
        remote.text = "moderated".into();
        remote.edited_at = Some(Timestamp::from_millis(12));
        merge_tail(&mut store, vec![remote]);
        controller.reconcile(&mut store);
        assert_eq!(store.get(&id).unwrap().text, "mine");

        controller.complete_edit(&mut store, &id, write.attempt, Err(BackendError::Closed));
        assert_eq!(store.get(&id).unwrap().text, "moderated");
    }

    #[test]
    fn test_superseded_edit_results_are_ignored() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![mine("m1", 10)]);
        let id = MessageId::new("m1");
        let first = controller.prepare_edit(&mut store, &id, "one", &collaborators()).unwrap();
        let second = controller.prepare_edit(&mut store, &id, "two", &collaborators()).unwrap();

        assert!(!controller.complete_edit(&mut store, &id, first.attempt, Err(BackendError::Closed)));
        assert_eq!(store.get(&id).unwrap().text, "two");

        assert!(controller.complete_edit(&mut store, &id, second.attempt, Err(BackendError::Closed)));
        assert_eq!(store.get(&id).unwrap().text, "text of m1");
    }

    #[test]
    fn test_delete_by_stranger_needs_moderation_rights() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![message("m1", 10)]);
        let id = MessageId::new("m1");
        assert_eq!(
            controller.prepare_delete(&mut store, &id, &collaborators()),
            Err(SyncError::NotPermitted { id: id.clone() })
        );

        let mut authorizer = MockAuthorizer::new();
        authorizer
            .expect_can_moderate()
            .withf(|message| message.id.as_str() == "m1")
            .return_const(true);
        let moderator = Collaborators::new(
            Arc::new(AllowAll),
            Arc::new(StaticIdentity(Some(SenderIdentity::new("mod", "Moderator")))),
            Arc::new(authorizer),
        );
        controller.prepare_delete(&mut store, &id, &moderator).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_delete_restores_message_in_place() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![mine("m1", 10), mine("m2", 20), mine("m3", 30)]);
        let id = MessageId::new("m2");

        controller.prepare_delete(&mut store, &id, &collaborators()).unwrap();
        merge_tail(&mut store, vec![mine("m1", 10), mine("m2", 20), mine("m3", 30)]);
        controller.reconcile(&mut store);
        assert_eq!(ids(&store), vec!["m1", "m3"]);

        controller.complete_delete(&mut store, &id, Err(BackendError::unavailable("down")));
        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_confirmed_delete_suppresses_stale_copies() {
        let mut controller = MutationController::new();
        let mut store = store_of(vec![mine("m1", 10)]);
        let id = MessageId::new("m1");
        controller.prepare_delete(&mut store, &id, &collaborators()).unwrap();
        controller.complete_delete(&mut store, &id, Ok(()));

        merge_tail(&mut store, vec![mine("m1", 10)]);
        controller.reconcile(&mut store);
        assert!(store.is_empty());
        assert!(controller.states().is_empty());
    }

    #[test]
    fn test_identity_lookup_is_required_for_delete() {
        let mut identity = MockIdentityProvider::new();
        identity.expect_current_sender().times(1).return_const(None::<SenderIdentity>);
        let collaborators = Collaborators::new(Arc::new(AllowAll), Arc::new(identity), Arc::new(NoModeration));

        let mut controller = MutationController::new();
        let mut store = store_of(vec![mine("m1", 10)]);
        assert_eq!(
            controller.prepare_delete(&mut store, &MessageId::new("m1"), &collaborators),
            Err(SyncError::NotAuthenticated)
        );
        assert!(store.get(&MessageId::new("m1")).unwrap().is_from(&SenderId::new("me")));
    }
}
