use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chat::{ChatEngine, ChatHandle, ChatView, Collaborators, Entry, InMemoryBackend, LoadOlder, TailStatus};
use shared::config::ChatConfig;
use shared::models::{Channel, ChannelId, SenderIdentity};
use tracing::info;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Seeds an in-memory channel, opens it through the engine, pages history
/// until exhausted, sends `sends`, then prints the ordered store.
///
/// # Errors
/// Returns an error if the engine stops, a read fails, or a send is rejected.
pub async fn run_simulation(config: ChatConfig, channel: &str, seed: usize, sends: &[String]) -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    let channel = ChannelId::new(channel);
    let mut info = Channel::new(channel.clone(), channel.as_str());
    info.description = "Simulated channel".to_string();
    backend.register_channel(info);
    backend.seed(
        &channel,
        SenderIdentity::new("classmate", "Classmate"),
        (1..=seed).map(|n| format!("Message {n}")),
    );

    let handle = ChatEngine::spawn(
        backend.clone(),
        config,
        Collaborators::for_sender(SenderIdentity::new("cli", "You")),
    );
    handle.open_channel(channel.clone()).await?;
    settle(&handle, "the first tail snapshot", |view| {
        matches!(view.tail, TailStatus::Live | TailStatus::Failed(_))
    })
    .await?;
    if let TailStatus::Failed(error) = handle.view().tail {
        bail!("unable to load messages: {error}");
    }

    let pages = load_all_history(&handle).await?;
    info!(channel = %channel, pages, "history loaded");

    for text in sends {
        handle
            .send(text.as_str())
            .await
            .with_context(|| format!("failed to send '{text}'"))?;
    }
    let view = settle(&handle, "sent messages to be confirmed", |view| {
        view.pending_count() == 0 && view.mutations.is_empty()
    })
    .await?;
    handle.shutdown();

    let info = backend
        .channel(&channel)
        .context("simulated channel disappeared")?;
    print_view(&info, &view, pages);
    Ok(())
}

async fn load_all_history(handle: &ChatHandle) -> anyhow::Result<usize> {
    let mut pages = 0;
    loop {
        match handle.load_older().await? {
            LoadOlder::Exhausted => return Ok(pages),
            LoadOlder::Requested(_) => pages += 1,
            LoadOlder::AlreadyPending | LoadOlder::Deferred => {}
        }
        let view = settle(handle, "a history page", |view| {
            !view.history.loading && !view.history.deferred
        })
        .await?;
        if let Some(error) = view.history.error {
            bail!("failed to load history: {error}");
        }
    }
}

async fn settle(
    handle: &ChatHandle,
    what: &str,
    mut ready: impl FnMut(&ChatView) -> bool,
) -> anyhow::Result<ChatView> {
    let mut views = handle.subscribe();
    let view = tokio::time::timeout(SETTLE_TIMEOUT, views.wait_for(|view| ready(view)))
        .await
        .with_context(|| format!("timed out waiting for {what}"))?
        .context("chat engine stopped")?;
    Ok(view.clone())
}

fn print_view(channel: &Channel, view: &ChatView, pages: usize) {
    println!("== #{} ({}) ==", channel.name, channel.description);
    for entry in &view.entries {
        if let Entry::Confirmed(message) = entry {
            println!(
                "[{}] {}: {}",
                message.created_at.as_millis(),
                message.sender.display_name,
                message.text
            );
        }
    }
    println!(
        "{} messages in #{} ({pages} history pages)",
        view.messages().count(),
        channel.name
    );
}
