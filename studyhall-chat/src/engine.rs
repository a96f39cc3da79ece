//! # Chat Engine
//!
//! Async driver around [`ChannelSession`]. A single task owns the session;
//! commands from [`ChatHandle`] and completions of backend calls arrive on one
//! queue and are applied strictly in arrival order, so the session never needs
//! a lock. Every change is published as a [`ChatView`] on a `watch` channel.

use std::sync::Arc;

use metrics::counter;
use shared::BackendError;
use shared::config::ChatConfig;
use shared::models::{ChannelId, LocalId, MessageId, Page};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::anchor::ScrollMetrics;
use crate::backend::MessageBackend;
use crate::error::{SyncError, SyncResult};
use crate::mutation::{Collaborators, MutationKey};
use crate::session::{ChannelSession, ChatView, GenerationCounter, HistoryRequest, LoadOlder, SessionToken, TailApplied};
use crate::tail::{TailSubscription, TailUpdate, spawn_tail};

type Reply<T> = oneshot::Sender<SyncResult<T>>;

#[derive(Debug)]
enum Command {
    Open { channel: ChannelId, reply: Reply<()> },
    Close { reply: Reply<()> },
    LoadOlder { reply: Reply<LoadOlder> },
    RetryTail { reply: Reply<()> },
    Send { text: String, reply: Reply<LocalId> },
    Edit { id: MessageId, text: String, reply: Reply<()> },
    Delete { id: MessageId, reply: Reply<()> },
    Dismiss { key: MutationKey, reply: Reply<bool> },
    ObserveScroll { metrics: ScrollMetrics },
    LayoutCommitted { metrics: ScrollMetrics, reply: Reply<Option<f64>> },
}

#[derive(Debug)]
enum Event {
    Command(Command),
    Tail(TailUpdate),
    HistoryPage {
        token: SessionToken,
        result: Result<Page, BackendError>,
    },
    SendDone {
        token: SessionToken,
        local_id: LocalId,
        result: Result<MessageId, BackendError>,
    },
    EditDone {
        token: SessionToken,
        id: MessageId,
        attempt: u64,
        result: Result<(), BackendError>,
    },
    DeleteDone {
        token: SessionToken,
        id: MessageId,
        result: Result<(), BackendError>,
    },
}

impl From<TailUpdate> for Event {
    fn from(update: TailUpdate) -> Self {
        Self::Tail(update)
    }
}

/// Entry point for running the engine on the current tokio runtime.
pub struct ChatEngine;

impl ChatEngine {
    /// Spawns the engine task and returns a handle to it. The task stops on
    /// [`ChatHandle::shutdown`] or when the last handle is dropped.
    #[must_use]
    pub fn spawn<B: MessageBackend>(backend: Arc<B>, config: ChatConfig, collaborators: Collaborators) -> ChatHandle {
        let (events, inbox) = mpsc::unbounded_channel();
        let (views, view_rx) = watch::channel(ChatView::default());
        let shutdown = CancellationToken::new();

        let task = EngineTask {
            backend,
            config,
            collaborators,
            generations: GenerationCounter::default(),
            session: None,
            tail: None,
            events: events.clone(),
            views,
        };
        tokio::spawn(task.run(inbox, shutdown.clone()));

        ChatHandle {
            events,
            views: view_rx,
            shutdown: shutdown.clone(),
            _guard: Arc::new(shutdown.drop_guard()),
        }
    }
}

/// Cloneable handle to a running engine.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    events: mpsc::UnboundedSender<Event>,
    views: watch::Receiver<ChatView>,
    shutdown: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl ChatHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command(build(reply)))
            .map_err(|_| SyncError::EngineStopped)?;
        response.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Switches to `channel`, tearing down the previous session.
    ///
    /// # Errors
    /// [`SyncError::EngineStopped`] if the engine is gone.
    pub async fn open_channel(&self, channel: impl Into<ChannelId>) -> SyncResult<()> {
        let channel = channel.into();
        self.request(|reply| Command::Open { channel, reply }).await
    }

    /// # Errors
    /// [`SyncError::EngineStopped`] if the engine is gone.
    pub async fn close_channel(&self) -> SyncResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Asks for the next older page. Resolves once the decision is made; the
    /// page itself lands in a later view.
    ///
    /// # Errors
    /// [`SyncError::NoActiveChannel`], [`SyncError::CursorMismatch`] or
    /// [`SyncError::EngineStopped`].
    pub async fn load_older(&self) -> SyncResult<LoadOlder> {
        self.request(|reply| Command::LoadOlder { reply }).await
    }

    /// Re-opens the tail subscription after a failure.
    ///
    /// # Errors
    /// [`SyncError::NoActiveChannel`] or [`SyncError::EngineStopped`].
    pub async fn retry_tail(&self) -> SyncResult<()> {
        self.request(|reply| Command::RetryTail { reply }).await
    }

    /// Sends a message optimistically. Returns the local id of the provisional
    /// entry; the write outcome shows up in the view.
    ///
    /// # Errors
    /// Validation and identity failures are returned before anything changes.
    pub async fn send(&self, text: impl Into<String>) -> SyncResult<LocalId> {
        let text = text.into();
        self.request(|reply| Command::Send { text, reply }).await
    }

    /// # Errors
    /// Identity, lookup, authorship and validation failures.
    pub async fn edit(&self, id: impl Into<MessageId>, text: impl Into<String>) -> SyncResult<()> {
        let (id, text) = (id.into(), text.into());
        self.request(|reply| Command::Edit { id, text, reply }).await
    }

    /// # Errors
    /// Identity, lookup and permission failures.
    pub async fn delete(&self, id: impl Into<MessageId>) -> SyncResult<()> {
        let id = id.into();
        self.request(|reply| Command::Delete { id, reply }).await
    }

    /// Clears a failed mutation from the view.
    ///
    /// # Errors
    /// [`SyncError::NoActiveChannel`] or [`SyncError::EngineStopped`].
    pub async fn dismiss(&self, key: MutationKey) -> SyncResult<bool> {
        self.request(|reply| Command::Dismiss { key, reply }).await
    }

    /// Reports scroll container geometry. Fire and forget.
    ///
    /// # Errors
    /// [`SyncError::EngineStopped`] if the engine is gone.
    pub fn observe_scroll(&self, metrics: ScrollMetrics) -> SyncResult<()> {
        self.events
            .send(Event::Command(Command::ObserveScroll { metrics }))
            .map_err(|_| SyncError::EngineStopped)
    }

    /// Reports committed layout and returns the `scroll_top` to apply.
    ///
    /// # Errors
    /// [`SyncError::EngineStopped`] if the engine is gone.
    pub async fn layout_committed(&self, metrics: ScrollMetrics) -> SyncResult<Option<f64>> {
        self.request(|reply| Command::LayoutCommitted { metrics, reply }).await
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.views.clone()
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> ChatView {
        self.views.borrow().clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct EngineTask<B> {
    backend: Arc<B>,
    config: ChatConfig,
    collaborators: Collaborators,
    generations: GenerationCounter,
    session: Option<ChannelSession>,
    tail: Option<TailSubscription>,
    events: mpsc::UnboundedSender<Event>,
    views: watch::Sender<ChatView>,
}

impl<B: MessageBackend> EngineTask<B> {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Event>, shutdown: CancellationToken) {
        info!(page_size = self.config.page_size, "chat engine started");
        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = inbox.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event);
            self.publish();
        }
        self.teardown();
        info!("chat engine stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Tail(update) => self.on_tail(update),
            Event::HistoryPage { token, result } => {
                let Some(session) = self.session.as_mut() else {
                    counter!("studyhall_chat_stale_events_total").increment(1);
                    return;
                };
                let failed = result.is_err();
                match session.apply_history_page(token, result) {
                    None => counter!("studyhall_chat_stale_events_total").increment(1),
                    Some(_) if failed => counter!("studyhall_chat_history_failures_total").increment(1),
                    Some(_) => counter!("studyhall_chat_history_pages_total").increment(1),
                }
            }
            Event::SendDone { token, local_id, result } => {
                let failed = result.is_err();
                let applied = self
                    .session
                    .as_mut()
                    .is_some_and(|session| session.complete_send(token, local_id, result));
                record_completion("send", applied, failed);
            }
            Event::EditDone {
                token,
                id,
                attempt,
                result,
            } => {
                let failed = result.is_err();
                let applied = self
                    .session
                    .as_mut()
                    .is_some_and(|session| session.complete_edit(token, &id, attempt, result));
                record_completion("edit", applied, failed);
            }
            Event::DeleteDone { token, id, result } => {
                let failed = result.is_err();
                let applied = self
                    .session
                    .as_mut()
                    .is_some_and(|session| session.complete_delete(token, &id, result));
                record_completion("delete", applied, failed);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { channel, reply } => {
                self.open(channel);
                self.respond(reply, Ok(()));
            }
            Command::Close { reply } => {
                self.teardown();
                self.respond(reply, Ok(()));
            }
            Command::LoadOlder { reply } => {
                let result = self.load_older();
                self.respond(reply, result);
            }
            Command::RetryTail { reply } => {
                let result = if self.session.is_some() {
                    self.start_tail();
                    Ok(())
                } else {
                    Err(SyncError::NoActiveChannel)
                };
                self.respond(reply, result);
            }
            Command::Send { text, reply } => {
                let result = self.send(&text);
                self.respond(reply, result);
            }
            Command::Edit { id, text, reply } => {
                let result = self.edit(&id, &text);
                self.respond(reply, result);
            }
            Command::Delete { id, reply } => {
                let result = self.delete(&id);
                self.respond(reply, result);
            }
            Command::Dismiss { key, reply } => {
                let result = self
                    .session
                    .as_mut()
                    .map(|session| session.dismiss(&key))
                    .ok_or(SyncError::NoActiveChannel);
                self.respond(reply, result);
            }
            Command::ObserveScroll { metrics } => {
                if let Some(session) = self.session.as_mut() {
                    session.observe_scroll(metrics);
                }
            }
            Command::LayoutCommitted { metrics, reply } => {
                let result = self
                    .session
                    .as_mut()
                    .map(|session| session.layout_committed(metrics))
                    .ok_or(SyncError::NoActiveChannel);
                self.respond(reply, result);
            }
        }
    }

    fn open(&mut self, channel: ChannelId) {
        self.teardown();
        let token = self.generations.next_token();
        self.session = Some(ChannelSession::open(
            token,
            channel,
            &self.config,
            self.collaborators.clone(),
        ));
        self.start_tail();
    }

    fn teardown(&mut self) {
        if let Some(tail) = self.tail.take() {
            tail.cancel();
        }
        if let Some(session) = self.session.take() {
            info!(channel = %session.channel(), generation = session.token().generation(), "closing channel session");
        }
    }

    fn start_tail(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(previous) = self.tail.take() {
            previous.cancel();
        }
        let token = session.begin_tail();
        self.tail = Some(spawn_tail(
            Arc::clone(&self.backend),
            session.channel().clone(),
            session.page_size(),
            token,
            self.events.clone(),
        ));
    }

    fn on_tail(&mut self, update: TailUpdate) {
        let Some(session) = self.session.as_mut() else {
            counter!("studyhall_chat_stale_events_total").increment(1);
            return;
        };
        match update.payload {
            Ok(snapshot) => match session.apply_tail_snapshot(update.token, snapshot) {
                TailApplied::Stale => counter!("studyhall_chat_stale_events_total").increment(1),
                TailApplied::Merged { resumed, .. } => {
                    counter!("studyhall_chat_tail_snapshots_total").increment(1);
                    if let Some(request) = resumed {
                        self.fetch_page(request);
                    }
                }
            },
            Err(error) => {
                if session.tail_failed(update.token, error) {
                    counter!("studyhall_chat_tail_failures_total").increment(1);
                    self.tail = None;
                } else {
                    counter!("studyhall_chat_stale_events_total").increment(1);
                }
            }
        }
    }

    fn load_older(&mut self) -> SyncResult<LoadOlder> {
        let session = self.session.as_mut().ok_or(SyncError::NoActiveChannel)?;
        let decision = session.request_older()?;
        if let LoadOlder::Requested(request) = &decision {
            self.fetch_page(request.clone());
        }
        Ok(decision)
    }

    fn fetch_page(&self, request: HistoryRequest) {
        debug!(channel = %request.channel, cursor = request.cursor.token(), "fetching older page");
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend
                .fetch_older_page(&request.channel, &request.cursor, request.page_size)
                .await;
            let _ = events.send(Event::HistoryPage {
                token: request.token,
                result,
            });
        });
    }

    fn send(&mut self, text: &str) -> SyncResult<LocalId> {
        let session = self.session.as_mut().ok_or(SyncError::NoActiveChannel)?;
        let write = session.send(text)?;
        let token = session.token();
        let channel = session.channel().clone();
        let local_id = write.local_id;

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.send_message(&channel, write.payload).await;
            let _ = events.send(Event::SendDone { token, local_id, result });
        });
        Ok(local_id)
    }

    fn edit(&mut self, id: &MessageId, text: &str) -> SyncResult<()> {
        let session = self.session.as_mut().ok_or(SyncError::NoActiveChannel)?;
        let write = session.edit(id, text)?;
        let token = session.token();
        let channel = session.channel().clone();

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.edit_message(&channel, &write.id, &write.text).await;
            let _ = events.send(Event::EditDone {
                token,
                id: write.id,
                attempt: write.attempt,
                result,
            });
        });
        Ok(())
    }

    fn delete(&mut self, id: &MessageId) -> SyncResult<()> {
        let session = self.session.as_mut().ok_or(SyncError::NoActiveChannel)?;
        let id = session.delete(id)?;
        let token = session.token();
        let channel = session.channel().clone();

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.delete_message(&channel, &id).await;
            let _ = events.send(Event::DeleteDone { token, id, result });
        });
        Ok(())
    }

    /// Publishes the view a command produced before its caller is released.
    fn respond<T>(&self, reply: Reply<T>, result: SyncResult<T>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn publish(&self) {
        let next = self.session.as_ref().map(ChannelSession::view).unwrap_or_default();
        self.views.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn record_completion(kind: &'static str, applied: bool, failed: bool) {
    if !applied {
        counter!("studyhall_chat_stale_events_total").increment(1);
    } else if failed {
        warn!(kind, "mutation write failed");
        counter!("studyhall_chat_mutation_failures_total", "kind" => kind).increment(1);
    }
}
