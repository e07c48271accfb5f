//! Turns presence and rename events into chat messages.

use std::sync::Arc;

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use rankwatch_db::{Database, PlayerId, PlayerStore, WatchlistStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, Subscription, Topic, UsernameChange};

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Somewhere a text message can be posted.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, channel_id: u64, content: &str) -> Result<(), SinkError>;
}

/// Posts messages through the Discord HTTP API.
pub struct DiscordSink {
    http: Arc<serenity::Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageSink for DiscordSink {
    async fn send(&self, channel_id: u64, content: &str) -> Result<(), SinkError> {
        serenity::ChannelId::new(channel_id)
            .say(&*self.http, content)
            .await?;
        Ok(())
    }
}

pub fn online_message(name: &str) -> String {
    format!("🟢 Player {} got online", name)
}

pub fn offline_message(name: &str) -> String {
    format!("🔴 Player {} got offline", name)
}

pub fn rename_message(change: &UsernameChange) -> String {
    format!(
        "👀 Player {} changed their username to {}",
        change.from, change.to
    )
}

pub struct Notifier {
    players: PlayerStore,
    watchlist: WatchlistStore,
    bus: Arc<EventBus>,
    sink: Arc<dyn MessageSink>,
    rename_channel: Option<u64>,
}

impl Notifier {
    pub fn new(
        db: &Database,
        bus: Arc<EventBus>,
        sink: Arc<dyn MessageSink>,
        rename_channel: Option<u64>,
    ) -> Self {
        Self {
            players: db.players(),
            watchlist: db.watchlist(),
            bus,
            sink,
            rename_channel,
        }
    }

    /// Relay events until `shutdown` is cancelled, then unsubscribe.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut online = self.bus.subscribe(Topic::GotOnline).await;
        let mut offline = self.bus.subscribe(Topic::GotOffline).await;
        let mut renames = self.bus.subscribe(Topic::UsernameChanged).await;
        info!("notifier started");

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = online.recv() => event,
                Some(event) = offline.recv() => event,
                Some(event) = renames.recv() => event,
                else => break,
            };
            self.handle(&event).await;
        }

        let drained = self.close(vec![online, offline, renames]).await;
        info!(drained, "notifier stopped");
    }

    async fn close(&self, subscriptions: Vec<Subscription>) -> usize {
        let mut drained = 0;
        for subscription in subscriptions {
            drained += self.bus.unsubscribe(subscription).await;
        }
        drained
    }

    /// Deliver the messages for one event. Failures are logged and dropped.
    pub async fn handle(&self, event: &Event) {
        match event {
            Event::GotOnline(id) => self.notify_watchers(*id, online_message).await,
            Event::GotOffline(id) => self.notify_watchers(*id, offline_message).await,
            Event::UsernameChanged(change) => {
                if let Some(channel) = self.rename_channel {
                    self.deliver(channel, &rename_message(change)).await;
                }
            }
            Event::PlayerAdded(_) | Event::PlayerUpdated(_) => {}
        }
    }

    async fn notify_watchers(&self, id: PlayerId, message: fn(&str) -> String) {
        let channels = match self.watchlist.watchers_of(id).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(id, error = %e, "failed to load watchers");
                return;
            }
        };
        if channels.is_empty() {
            return;
        }

        let player = match self.players.get_by_id(id).await {
            Ok(player) => player,
            Err(e) => {
                warn!(id, error = %e, "failed to load watched player");
                return;
            }
        };

        let content = message(&player.player.name);
        for channel in channels {
            self.deliver(channel, &content).await;
        }
    }

    async fn deliver(&self, channel: u64, content: &str) {
        match self.sink.send(channel, content).await {
            Ok(()) => debug!(channel, content, "sent notification"),
            Err(e) => warn!(channel, error = %e, "failed to send notification"),
        }
    }
}
