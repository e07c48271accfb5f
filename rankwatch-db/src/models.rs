/// Stable identity of a persisted player.
pub type PlayerId = i64;

/// One leaderboard row as scraped from the site.
///
/// `rank` is `None` when the player is currently unranked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Player {
  pub name: String,
  /// Country flag marker (the flag image source on the site).
  pub country: String,
  pub rank: Option<i64>,
  pub score: i64,
  pub kills: i64,
  pub deaths: i64,
  /// Accuracy percentage, 0-100.
  pub accuracy: i64,
}

impl Player {
  /// Same player with the rank cleared.
  pub fn unranked(mut self) -> Self {
    self.rank = None;
    self
  }
}

/// A player with its stable database identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedPlayer {
  pub id: PlayerId,
  pub player: Player,
}

/// A row of the single snapshot generation kept for rename matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
  /// Insertion order within the generation.
  pub id: i64,
  /// Unix timestamp at which the generation was captured
  pub time: i64,
  pub player: Player,
}

/// An online session. `end_time` is `None` while the player is online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineSession {
  pub player_id: PlayerId,
  pub start_time: i64,
  pub end_time: Option<i64>,
}

impl OnlineSession {
  pub fn is_open(&self) -> bool {
    self.end_time.is_none()
  }

  /// Seconds spent online, measured up to `now` for open sessions.
  pub fn duration(&self, now: i64) -> i64 {
    (self.end_time.unwrap_or(now) - self.start_time).max(0)
  }
}
