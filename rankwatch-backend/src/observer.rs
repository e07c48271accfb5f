//! The two polling loops that keep the player store in sync with the site.
//!
//! The presence loop diffs the "online now" listing against open sessions.
//! The stats loop walks the ranked leaderboard page by page, detects renames
//! against the previous snapshot generation, writes every row with the
//! unrank-then-assign protocol, and finally replaces the generation.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rankwatch_db::envelope::{best_candidate, is_similar};
use rankwatch_db::{Database, DbError, Player, PlayerId, PlayerStore, SnapshotStore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{Event, EventBus, UsernameChange};
use crate::crawler::{CrawlError, Crawler};
use crate::helpers::now;

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Wait between presence polls
    pub online_interval: Duration,
    /// Wait between full stats polls
    pub stats_interval: Duration,
    /// Leaderboard pages scanned per stats poll
    pub page_count: u32,
    /// Only players ranked at or above this are checked for renames;
    /// further down the board is too volatile to track.
    pub tracked_rank_limit: i64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            online_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(20 * 60),
            page_count: 20,
            tracked_rank_limit: 200,
        }
    }
}

/// Outcome of one presence poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceDiff {
    pub online: Vec<PlayerId>,
    pub offline: Vec<PlayerId>,
    pub added: Vec<PlayerId>,
}

/// Outcome of one stats poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub pages: u32,
    pub failed_pages: u32,
    pub added: usize,
    pub updated: usize,
    pub renames: Vec<UsernameChange>,
    /// Size of the generation written, `None` if it was left untouched.
    pub generation: Option<usize>,
}

pub struct Observer {
    players: PlayerStore,
    snapshot: SnapshotStore,
    bus: Arc<EventBus>,
    crawler: Arc<dyn Crawler>,
    config: ObserverConfig,
}

/// Join handles of a running observer's two loops.
pub struct ObserverHandle {
    online: JoinHandle<()>,
    stats: JoinHandle<()>,
}

impl ObserverHandle {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        if let Err(e) = self.online.await {
            error!(error = %e, "presence loop panicked");
        }
        if let Err(e) = self.stats.await {
            error!(error = %e, "stats loop panicked");
        }
        info!("observer stopped");
    }
}

impl Observer {
    pub fn new(
        db: &Database,
        bus: Arc<EventBus>,
        crawler: Arc<dyn Crawler>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            players: db.players(),
            snapshot: db.snapshot(),
            bus,
            crawler,
            config,
        }
    }

    /// Spawn both polling loops. They run until `shutdown` is cancelled.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> ObserverHandle {
        info!("observer started");
        let online = tokio::spawn({
            let observer = self.clone();
            let shutdown = shutdown.clone();
            async move { observer.run_online(shutdown).await }
        });
        let stats = tokio::spawn(async move { self.run_stats(shutdown).await });
        ObserverHandle { online, stats }
    }

    async fn run_online(&self, shutdown: CancellationToken) {
        info!("started observing onlines");
        while !shutdown.is_cancelled() {
            match self.observe_online(now()).await {
                Ok(diff) => debug!(
                    online = diff.online.len(),
                    offline = diff.offline.len(),
                    "presence poll done"
                ),
                Err(e) => warn!(error = %e, "presence poll failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.online_interval) => {}
            }
        }
        info!("stopped observing onlines");
    }

    async fn run_stats(&self, shutdown: CancellationToken) {
        info!("started observing stats");
        while !shutdown.is_cancelled() {
            let report = self.observe_stats(now()).await;
            info!(
                pages = report.pages,
                failed_pages = report.failed_pages,
                added = report.added,
                updated = report.updated,
                renames = report.renames.len(),
                "stats poll done"
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.stats_interval) => {}
            }
        }
        info!("stopped observing stats");
    }

    // ========================================================================
    // Presence
    // ========================================================================

    /// Diff the site's online listing against open sessions.
    ///
    /// A failed crawl aborts the poll without touching any session. A listed
    /// name that cannot be resolved keeps a matching open session open.
    pub async fn observe_online(&self, now: i64) -> Result<PresenceDiff, ObserveError> {
        let present = self.crawler.online().await?;
        let mut diff = PresenceDiff::default();

        let mut is_present = BTreeSet::new();
        let mut unresolved = HashSet::new();
        for player in present {
            match self.players.get_by_name(&player.name).await {
                Ok(p) => {
                    is_present.insert(p.id);
                }
                Err(DbError::PlayerNotFound) => {
                    // Ranks are only handed out by the stats poll
                    match self.players.add(player.clone().unranked()).await {
                        Ok(id) => {
                            debug!(player = %player.name, id, "added player seen online");
                            self.bus.publish(Event::PlayerAdded(id)).await;
                            diff.added.push(id);
                            is_present.insert(id);
                        }
                        Err(e) => {
                            warn!(player = %player.name, error = %e, "failed to add online player");
                            unresolved.insert(player.name);
                        }
                    }
                }
                Err(e) => {
                    warn!(player = %player.name, error = %e, "failed to look up online player");
                    unresolved.insert(player.name);
                }
            }
        }

        let was_open: BTreeSet<PlayerId> =
            self.players.open_session_ids().await?.into_iter().collect();

        for &id in is_present.difference(&was_open) {
            match self.players.mark_online(id, now).await {
                Ok(true) => {
                    self.bus.publish(Event::GotOnline(id)).await;
                    diff.online.push(id);
                }
                Ok(false) => debug!(id, "session already open"),
                Err(e) => warn!(id, error = %e, "failed to mark player online"),
            }
        }

        for &id in was_open.difference(&is_present) {
            if !unresolved.is_empty() && self.is_unresolved(id, &unresolved).await {
                debug!(id, "listed under an unresolved name, keeping session open");
                continue;
            }
            match self.players.mark_offline(id, now).await {
                Ok(true) => {
                    self.bus.publish(Event::GotOffline(id)).await;
                    diff.offline.push(id);
                }
                Ok(false) => debug!(id, "session already closed"),
                Err(e) => warn!(id, error = %e, "failed to mark player offline"),
            }
        }

        Ok(diff)
    }

    /// Whether the open session `id` may belong to one of the listed names we
    /// failed to resolve. An unreadable player counts as unresolved.
    async fn is_unresolved(&self, id: PlayerId, unresolved: &HashSet<String>) -> bool {
        match self.players.get_by_id(id).await {
            Ok(p) => unresolved.contains(&p.player.name),
            Err(e) => {
                warn!(id, error = %e, "failed to read online player");
                true
            }
        }
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Crawl the ranked leaderboard, record every row and replace the
    /// snapshot generation.
    ///
    /// Pages and rows are handled strictly in order so rank reassignment is
    /// deterministic. A failed page or row is logged and skipped.
    pub async fn observe_stats(&self, now: i64) -> StatsReport {
        let mut report = StatsReport::default();

        let mut rows = Vec::new();
        for page in 1..=self.config.page_count {
            match self.crawler.stats(page).await {
                Ok(players) if players.is_empty() => break,
                Ok(players) => {
                    report.pages += 1;
                    rows.extend(players);
                }
                Err(e) => {
                    warn!(page, error = %e, "failed to crawl stats page");
                    report.failed_pages += 1;
                }
            }
        }

        if report.pages == 0 {
            warn!("no stats page crawled, keeping previous snapshot");
            return report;
        }

        // Ranks shift while paging, so the same player can show up twice
        let mut seen = HashSet::new();
        rows.retain(|p| seen.insert(p.name.clone()));

        let elapsed = match self.snapshot.generation_time().await {
            Ok(time) => time.map(|t| Duration::from_secs((now - t).max(0) as u64)),
            Err(e) => {
                warn!(error = %e, "failed to read snapshot time, rename detection disabled");
                None
            }
        };

        // Names still on the board, plus predecessors already claimed by a
        // rename this cycle, cannot be anyone's previous name.
        let mut taken: HashSet<String> = seen;

        for player in &rows {
            if let Err(e) = self.observe_ranked(player, elapsed, &mut taken, &mut report).await {
                warn!(player = %player.name, error = %e, "failed to record player");
            }
        }

        match self.snapshot.replace_generation(rows, now).await {
            Ok(count) => report.generation = Some(count),
            Err(e) => error!(error = %e, "failed to replace snapshot generation"),
        }

        report
    }

    async fn observe_ranked(
        &self,
        player: &Player,
        elapsed: Option<Duration>,
        taken: &mut HashSet<String>,
        report: &mut StatsReport,
    ) -> Result<(), ObserveError> {
        let tracked = player
            .rank
            .is_some_and(|rank| rank <= self.config.tracked_rank_limit);

        if let Some(elapsed) = elapsed.filter(|_| tracked) {
            if let Some(from) = self.detect_rename(player, elapsed, taken).await? {
                taken.insert(from.clone());
                let change = UsernameChange {
                    from,
                    to: player.name.clone(),
                };
                self.apply_rename(&change).await?;
                report.renames.push(change);
            }
        }

        match self.players.get_by_name(&player.name).await {
            Ok(existing) => {
                self.players
                    .update_ranked(existing.id, player.clone())
                    .await?;
                self.bus.publish(Event::PlayerUpdated(existing.id)).await;
                report.updated += 1;
            }
            Err(DbError::PlayerNotFound) => {
                let id = self.players.add_ranked(player.clone()).await?;
                self.bus.publish(Event::PlayerAdded(id)).await;
                report.added += 1;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Previous name of `player`, if it looks like a renamed identity.
    async fn detect_rename(
        &self,
        player: &Player,
        elapsed: Duration,
        taken: &HashSet<String>,
    ) -> Result<Option<String>, ObserveError> {
        match self.snapshot.get_by_name(&player.name).await {
            Ok(previous) if is_similar(&previous.player, player, elapsed) => return Ok(None),
            Ok(_) => debug!(player = %player.name, "stats left the rate envelope"),
            Err(DbError::PlayerNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let candidates = match self.snapshot.find_candidates(player, elapsed).await {
            Ok(candidates) => candidates,
            Err(DbError::NoCandidateFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let candidates: Vec<_> = candidates
            .into_iter()
            .filter(|c| c.player.name != player.name && !taken.contains(&c.player.name))
            .collect();
        if candidates.len() > 1 {
            debug!(
                player = %player.name,
                count = candidates.len(),
                "several rename candidates, picking the closest"
            );
        }

        Ok(best_candidate(&candidates, player, elapsed).map(|c| c.player.name.clone()))
    }

    /// Move the predecessor's identity to the new name and announce it.
    async fn apply_rename(&self, change: &UsernameChange) -> Result<(), ObserveError> {
        match self.players.get_by_name(&change.from).await {
            Ok(previous) => match self.players.get_by_name(&change.to).await {
                Err(DbError::PlayerNotFound) => {
                    self.players.rename(previous.id, change.to.clone()).await?;
                }
                Ok(_) => debug!(
                    from = %change.from,
                    to = %change.to,
                    "both names already known, keeping separate identities"
                ),
                Err(e) => return Err(e.into()),
            },
            Err(DbError::PlayerNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        info!(from = %change.from, to = %change.to, "username changed");
        self.bus
            .publish(Event::UsernameChanged(change.clone()))
            .await;
        Ok(())
    }
}
