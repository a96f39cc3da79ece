//! # Live Tail Subscriber
//!
//! Pumps full snapshots of a channel's newest messages from the backend into
//! the engine's event queue. Every delivery carries the [`TailToken`] of the
//! subscription that produced it, so anything arriving after cancellation is
//! recognised as stale and dropped by the session.

use std::sync::Arc;

use futures_util::StreamExt;
use shared::BackendError;
use shared::models::{ChannelId, Message};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::MessageBackend;
use crate::error::SyncError;
use crate::session::TailToken;

/// Connection state of the live tail, as shown to the view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TailStatus {
    /// No subscription open
    #[default]
    Idle,
    /// Subscribed, waiting for the first snapshot
    Connecting,
    /// At least one snapshot received
    Live,
    /// Unable to load messages; a manual retry re-opens the subscription
    Failed(SyncError),
}

/// One delivery from a tail subscription.
#[derive(Debug, Clone)]
pub struct TailUpdate {
    pub token: TailToken,
    pub payload: Result<Vec<Message>, BackendError>,
}

/// Handle to a running tail pump. Cancelling or dropping it stops delivery.
#[derive(Debug)]
pub struct TailSubscription {
    token: TailToken,
    cancel: CancellationToken,
}

impl TailSubscription {
    #[must_use]
    pub const fn token(&self) -> TailToken {
        self.token
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TailSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens a subscription and forwards its snapshots into `sink`.
///
/// The pump stops on cancellation, when the backend stream ends or errors
/// (after reporting it), or when the sink is gone.
#[must_use]
pub fn spawn_tail<B, E>(
    backend: Arc<B>,
    channel: ChannelId,
    page_size: usize,
    token: TailToken,
    sink: UnboundedSender<E>,
) -> TailSubscription
where
    B: MessageBackend,
    E: From<TailUpdate> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let child = cancel.child_token();

    tokio::spawn(async move {
        let opened = tokio::select! {
            biased;
            () = child.cancelled() => return,
            opened = backend.subscribe_tail(&channel, page_size) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                warn!(channel = %channel, error = %error, "failed to open tail subscription");
                let _ = sink.send(E::from(TailUpdate {
                    token,
                    payload: Err(error),
                }));
                return;
            }
        };
        debug!(channel = %channel, ?token, "tail subscription open");

        loop {
            let next = tokio::select! {
                biased;
                () = child.cancelled() => break,
                next = stream.next() => next,
            };
            let (payload, last) = match next {
                Some(Ok(snapshot)) => (Ok(snapshot), false),
                Some(Err(error)) => (Err(error), true),
                None => (Err(BackendError::Closed), true),
            };
            if sink.send(E::from(TailUpdate { token, payload })).is_err() || last {
                break;
            }
        }
        debug!(channel = %channel, ?token, "tail subscription closed");
    });

    TailSubscription { token, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::session::TailToken;
    use shared::models::SenderIdentity;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_forwards_snapshots_until_cancelled() {
        let backend = Arc::new(InMemoryBackend::new());
        let channel = ChannelId::new("chem");
        backend.seed(&channel, SenderIdentity::new("u", "U"), ["a", "b"]);

        let (tx, mut rx) = mpsc::unbounded_channel::<TailUpdate>();
        let token = TailToken::new(1, 1);
        let subscription = spawn_tail(backend.clone(), channel.clone(), 20, token, tx);

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.token, token);
        assert_eq!(first.payload.unwrap().len(), 2);

        subscription.cancel();
        tokio::task::yield_now().await;
        backend.seed(&channel, SenderIdentity::new("u", "U"), ["c"]);

        let after = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(after, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_reports_open_failures() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_reads(true);

        let (tx, mut rx) = mpsc::unbounded_channel::<TailUpdate>();
        let _subscription = spawn_tail(backend, ChannelId::new("chem"), 20, TailToken::new(1, 1), tx);

        let update = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(update.payload.is_err());
    }
}
