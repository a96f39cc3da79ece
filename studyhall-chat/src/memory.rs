//! # In-Memory Backend
//!
//! Reference [`MessageBackend`] over a logical clock, used by the CLI harness
//! and the integration tests. Tail subscribers receive the full window on every
//! change in the channel. Reads and writes can be made to fail, and history
//! responses can be held back until released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use shared::models::{Channel, ChannelId, Message, MessageId, NewMessage, Page, PageCursor, SenderIdentity, Timestamp};
use shared::{BackendError, BackendResult};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::backend::{MessageBackend, TailStream};

type Snapshot = Arc<Vec<Message>>;

#[derive(Debug)]
struct ChannelLog {
    info: Option<Channel>,
    messages: Vec<Message>,
    tail: watch::Sender<Snapshot>,
}

impl ChannelLog {
    fn new() -> Self {
        let (tail, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            info: None,
            messages: Vec::new(),
            tail,
        }
    }

    fn publish(&self) {
        self.tail.send_replace(Arc::new(self.messages.clone()));
    }
}

#[derive(Debug, Default)]
struct State {
    clock: i64,
    next_id: u64,
    channels: HashMap<ChannelId, ChannelLog>,
}

impl State {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp::from_millis(self.clock)
    }

    fn log(&mut self, channel: &ChannelId) -> &mut ChannelLog {
        self.channels
            .entry(channel.clone())
            .or_insert_with(ChannelLog::new)
    }

    fn append(&mut self, channel: &ChannelId, sender: SenderIdentity, text: String) -> MessageId {
        self.next_id += 1;
        let id = MessageId::new(format!("msg-{}", self.next_id));
        let created_at = self.tick();
        let message = Message {
            id: id.clone(),
            channel_id: channel.clone(),
            text,
            sender,
            created_at,
            edited_at: None,
            source_cursor: PageCursor::new(channel.clone(), created_at.as_millis().to_string()),
        };
        self.log(channel).messages.push(message);
        id
    }
}

#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    history_gate: watch::Sender<bool>,
    history_calls: AtomicUsize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (history_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(State::default()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            history_gate,
            history_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends messages as `sender`, oldest first, and notifies subscribers.
    #[allow(clippy::must_use_candidate)] // Most callers only need the side effect.
    pub fn seed<I, T>(&self, channel: &ChannelId, sender: SenderIdentity, texts: I) -> Vec<MessageId>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut state = self.state();
        let ids = texts
            .into_iter()
            .map(|text| state.append(channel, sender.clone(), text.into()))
            .collect();
        state.log(channel).publish();
        ids
    }

    /// Stores channel metadata, creating the channel if needed.
    pub fn register_channel(&self, channel: Channel) {
        let id = channel.id.clone();
        self.state().log(&id).info = Some(channel);
    }

    #[must_use]
    pub fn channel(&self, id: &ChannelId) -> Option<Channel> {
        self.state()
            .channels
            .get(id)
            .and_then(|log| log.info.clone())
    }

    /// Current contents of a channel, oldest first.
    #[must_use]
    pub fn messages(&self, channel: &ChannelId) -> Vec<Message> {
        self.state()
            .channels
            .get(channel)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Makes subscriptions and page queries fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes send, edit and delete fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Holds every page query until [`InMemoryBackend::release_history`].
    pub fn pause_history(&self) {
        self.history_gate.send_replace(false);
    }

    pub fn release_history(&self) {
        self.history_gate.send_replace(true);
    }

    /// Number of page queries received so far.
    #[must_use]
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// Ends every open tail stream of a channel, as a dropped connection would.
    pub fn disconnect(&self, channel: &ChannelId) {
        let mut state = self.state();
        let log = state.log(channel);
        let (tail, _) = watch::channel(Arc::new(log.messages.clone()));
        log.tail = tail;
    }

    fn check_reads(&self) -> BackendResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("reads are disabled"));
        }
        Ok(())
    }

    fn check_writes(&self) -> BackendResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("writes are disabled"));
        }
        Ok(())
    }
}

fn window(snapshot: &[Message], page_size: usize) -> Vec<Message> {
    snapshot[snapshot.len().saturating_sub(page_size)..].to_vec()
}

fn cursor_millis(cursor: &PageCursor) -> BackendResult<i64> {
    cursor
        .token()
        .parse()
        .map_err(|_| BackendError::rejected(format!("malformed cursor {}", cursor.token())))
}

#[async_trait]
impl MessageBackend for InMemoryBackend {
    async fn subscribe_tail(&self, channel: &ChannelId, page_size: usize) -> BackendResult<TailStream> {
        self.check_reads()?;
        let receiver = self.state().log(channel).tail.subscribe();
        debug!(channel = %channel, page_size, "tail subscriber attached");
        let stream = WatchStream::new(receiver).map(move |snapshot| Ok(window(&snapshot, page_size)));
        Ok(Box::pin(stream))
    }

    async fn fetch_older_page(
        &self,
        channel: &ChannelId,
        before: &PageCursor,
        page_size: usize,
    ) -> BackendResult<Page> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.history_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| BackendError::Closed)?;
        self.check_reads()?;

        if !before.belongs_to(channel) {
            return Err(BackendError::rejected(format!(
                "cursor belongs to channel {}",
                before.channel_id()
            )));
        }
        let before = Timestamp::from_millis(cursor_millis(before)?);
        let older: Vec<Message> = self
            .state()
            .channels
            .get(channel)
            .map(|log| {
                log.messages
                    .iter()
                    .filter(|message| message.created_at < before)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let messages = window(&older, page_size);
        let exhausted = messages.len() < page_size;
        let next_cursor = messages
            .first()
            .filter(|_| !exhausted)
            .map(|message| message.source_cursor.clone());
        Ok(Page {
            messages,
            next_cursor,
            exhausted,
        })
    }

    async fn send_message(&self, channel: &ChannelId, payload: NewMessage) -> BackendResult<MessageId> {
        self.check_writes()?;
        let mut state = self.state();
        let id = state.append(channel, payload.sender, payload.text);
        state.log(channel).publish();
        Ok(id)
    }

    async fn edit_message(&self, channel: &ChannelId, id: &MessageId, text: &str) -> BackendResult<()> {
        self.check_writes()?;
        let mut state = self.state();
        let edited_at = state.tick();
        let log = state.log(channel);
        let message = log
            .messages
            .iter_mut()
            .find(|message| &message.id == id)
            .ok_or_else(|| BackendError::rejected(format!("unknown message {id}")))?;
        message.text = text.to_string();
        message.edited_at = Some(edited_at);
        log.publish();
        Ok(())
    }

    async fn delete_message(&self, channel: &ChannelId, id: &MessageId) -> BackendResult<()> {
        self.check_writes()?;
        let mut state = self.state();
        let log = state.log(channel);
        let before = log.messages.len();
        log.messages.retain(|message| &message.id != id);
        if log.messages.len() == before {
            return Err(BackendError::rejected(format!("unknown message {id}")));
        }
        log.publish();
        Ok(())
    }
}
