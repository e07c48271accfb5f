//! Rate envelope for deciding whether two observations can be the same player.
//!
//! Every stat is turned into a per-minute rate of change between a previous
//! and a current observation. A pair is plausible when every rate stays
//! inside its bound; kills and deaths are counters and may never go down.

use std::time::Duration;

use crate::models::{Player, SnapshotEntry};

pub const MAX_KILL_RATE: f64 = 20.0;
pub const MAX_DEATH_RATE: f64 = 10.0;
/// Negative rank rate means the player climbed the leaderboard.
pub const MIN_RANK_RATE: f64 = -10.0;
pub const MAX_RANK_RATE: f64 = 100.0;
pub const MIN_ACCURACY_RATE: f64 = -1.0;
pub const MAX_ACCURACY_RATE: f64 = 1.0;

/// Accuracy's legal range is about 1/20th as wide as the others, so its
/// squared rate is scaled by 20² to be comparable.
const ACCURACY_WEIGHT: f64 = 400.0;

/// Per-minute rates of change between two observations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
  pub kills: f64,
  pub deaths: f64,
  pub rank: f64,
  pub accuracy: f64,
}

impl Rates {
  /// Rates from `prev` to `curr` over `elapsed`.
  ///
  /// An unknown rank on either side contributes a zero rank rate.
  pub fn between(prev: &Player, curr: &Player, elapsed: Duration) -> Self {
    let minutes = minutes(elapsed);
    let rank = match (prev.rank, curr.rank) {
      (Some(p), Some(c)) => rate(c - p, minutes),
      _ => 0.0,
    };
    Self {
      kills: rate(curr.kills - prev.kills, minutes),
      deaths: rate(curr.deaths - prev.deaths, minutes),
      rank,
      accuracy: rate(curr.accuracy - prev.accuracy, minutes),
    }
  }

  /// Whether every rate lies inside its bound.
  pub fn is_admissible(&self) -> bool {
    self.kills <= MAX_KILL_RATE
      && self.deaths <= MAX_DEATH_RATE
      && (MIN_RANK_RATE..=MAX_RANK_RATE).contains(&self.rank)
      && (MIN_ACCURACY_RATE..=MAX_ACCURACY_RATE).contains(&self.accuracy)
  }

  /// Squared distance from "no change"; lower is a closer match.
  pub fn score(&self) -> f64 {
    self.kills.powi(2)
      + self.deaths.powi(2)
      + self.rank.powi(2)
      + ACCURACY_WEIGHT * self.accuracy.powi(2)
  }
}

fn minutes(elapsed: Duration) -> f64 {
  elapsed.as_secs_f64() / 60.0
}

/// Rate of `delta` over `minutes`. Any change over zero time is infinitely fast.
fn rate(delta: i64, minutes: f64) -> f64 {
  if minutes > 0.0 {
    delta as f64 / minutes
  } else if delta == 0 {
    0.0
  } else if delta > 0 {
    f64::INFINITY
  } else {
    f64::NEG_INFINITY
  }
}

/// Whether `prev` could have turned into `curr` within `elapsed`.
pub fn is_similar(prev: &Player, curr: &Player, elapsed: Duration) -> bool {
  if curr.kills < prev.kills || curr.deaths < prev.deaths {
    return false;
  }
  Rates::between(prev, curr, elapsed).is_admissible()
}

/// Score of a rename candidate. Implausible candidates get `f64::MAX`
/// so they never beat a plausible one.
pub fn candidate_score(prev: &Player, curr: &Player, elapsed: Duration) -> f64 {
  if !is_similar(prev, curr, elapsed) {
    return f64::MAX;
  }
  Rates::between(prev, curr, elapsed).score()
}

/// Lowest-scoring candidate; the earliest one wins ties.
pub fn best_candidate<'a>(
  candidates: &'a [SnapshotEntry],
  curr: &Player,
  elapsed: Duration,
) -> Option<&'a SnapshotEntry> {
  let mut best: Option<(&SnapshotEntry, f64)> = None;
  for candidate in candidates {
    let score = candidate_score(&candidate.player, curr, elapsed);
    match best {
      Some((_, best_score)) if score >= best_score => {}
      _ => best = Some((candidate, score)),
    }
  }
  best.map(|(candidate, _)| candidate)
}

/// Inclusive ranges a previous observation's stats must fall in to be a
/// rename candidate for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBox {
  pub kills: (i64, i64),
  pub deaths: (i64, i64),
  pub rank: (i64, i64),
  pub accuracy: (i64, i64),
}

impl SearchBox {
  /// Invert the rate bounds around `curr`. Returns `None` for an unranked
  /// player, which has nothing to anchor the rank range on.
  pub fn around(curr: &Player, elapsed: Duration) -> Option<Self> {
    let rank = curr.rank?;
    let minutes = minutes(elapsed);
    let span = |bound: f64| (bound * minutes).ceil() as i64;

    Some(Self {
      kills: (curr.kills - span(MAX_KILL_RATE), curr.kills),
      deaths: (curr.deaths - span(MAX_DEATH_RATE), curr.deaths),
      rank: (rank - span(MAX_RANK_RATE), rank + span(-MIN_RANK_RATE)),
      accuracy: (
        curr.accuracy - span(MAX_ACCURACY_RATE),
        curr.accuracy + span(-MIN_ACCURACY_RATE),
      ),
    })
  }

  pub fn contains(&self, player: &Player) -> bool {
    let within = |(lo, hi): (i64, i64), v: i64| lo <= v && v <= hi;
    let Some(rank) = player.rank else {
      return false;
    };
    within(self.kills, player.kills)
      && within(self.deaths, player.deaths)
      && within(self.rank, rank)
      && within(self.accuracy, player.accuracy)
  }
}
