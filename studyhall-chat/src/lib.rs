#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.
#![allow(clippy::module_name_repetitions)]

//! Channel message synchronization for `StudyHall` community chat.
//!
//! A live tail of the newest messages and on-demand backward pages are merged
//! into one ordered store, local sends/edits/deletes are shown immediately and
//! reconciled with their remote writes, and a scroll anchor keeps the viewport
//! steady while data lands.

pub mod anchor;
pub mod backend;
pub mod engine;
pub mod error;
pub mod memory;
pub mod merge;
pub mod mutation;
pub mod pager;
pub mod session;
pub mod store;
pub mod tail;

pub use anchor::{MergeKind, ScrollAnchor, ScrollMetrics, compute_anchor};
pub use backend::{AllowAll, Authorizer, ContentPolicy, IdentityProvider, MessageBackend, NoModeration, StaticIdentity, TailStream};
pub use engine::{ChatEngine, ChatHandle};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use memory::InMemoryBackend;
pub use mutation::{Collaborators, MutationKey, MutationState};
pub use session::{ChannelSession, ChatView, HistoryView, LoadOlder};
pub use store::{Entry, EntryKey, MessageStore};
pub use tail::TailStatus;
