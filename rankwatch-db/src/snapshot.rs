use std::time::Duration;

use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::envelope::{SearchBox, is_similar};
use crate::error::{DbError, Result};
use crate::models::{Player, SnapshotEntry};
use crate::player_from_row;

/// The previous full-poll generation of leaderboard rows.
///
/// Exactly one generation exists at a time; [`SnapshotStore::replace_generation`]
/// swaps it out in a single transaction.
#[derive(Clone)]
pub struct SnapshotStore {
  conn: Connection,
}

impl SnapshotStore {
  pub(crate) fn new(conn: Connection) -> Self {
    Self { conn }
  }

  /// Get the entry for `name` in the current generation.
  pub async fn get_by_name(&self, name: &str) -> Result<SnapshotEntry> {
    let name = name.to_string();
    let entry = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id, time, name, country, rank, score, kills, deaths, accuracy
             FROM snapshot WHERE name = ?1
             ORDER BY id LIMIT 1",
          )?
          .query_row(params![&name], |row| {
            Ok(SnapshotEntry {
              id: row.get(0)?,
              time: row.get(1)?,
              player: player_from_row(row, 2)?,
            })
          })
          .optional()
      })
      .await?;

    entry.ok_or(DbError::PlayerNotFound)
  }

  /// Every entry that could have grown into `observed` within `elapsed`
  /// at legal rates, in insertion order.
  pub async fn find_candidates(
    &self,
    observed: &Player,
    elapsed: Duration,
  ) -> Result<Vec<SnapshotEntry>> {
    let Some(bounds) = SearchBox::around(observed, elapsed) else {
      return Err(DbError::NoCandidateFound);
    };

    debug!(
      player = %observed.name,
      kills = ?bounds.kills,
      deaths = ?bounds.deaths,
      rank = ?bounds.rank,
      accuracy = ?bounds.accuracy,
      "searching rename candidates"
    );

    let entries = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT id, time, name, country, rank, score, kills, deaths, accuracy
          FROM snapshot
          WHERE kills BETWEEN ?1 AND ?2
            AND deaths BETWEEN ?3 AND ?4
            AND rank BETWEEN ?5 AND ?6
            AND accuracy BETWEEN ?7 AND ?8
          ORDER BY id
          "#,
        )?;

        let entries = stmt
          .query_map(
            params![
              bounds.kills.0,
              bounds.kills.1,
              bounds.deaths.0,
              bounds.deaths.1,
              bounds.rank.0,
              bounds.rank.1,
              bounds.accuracy.0,
              bounds.accuracy.1,
            ],
            |row| {
              Ok(SnapshotEntry {
                id: row.get(0)?,
                time: row.get(1)?,
                player: player_from_row(row, 2)?,
              })
            },
          )?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
      })
      .await?;

    let candidates: Vec<SnapshotEntry> = entries
      .into_iter()
      .filter(|entry| is_similar(&entry.player, observed, elapsed))
      .collect();

    if candidates.is_empty() {
      return Err(DbError::NoCandidateFound);
    }
    Ok(candidates)
  }

  /// Discard the current generation and install `players` captured at `now`.
  pub async fn replace_generation(&self, players: Vec<Player>, now: i64) -> Result<usize> {
    let count = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM snapshot", [])?;

        {
          let mut insert_stmt = tx.prepare_cached(
            "INSERT INTO snapshot (time, name, country, rank, score, kills, deaths, accuracy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for player in &players {
            insert_stmt.execute(params![
              now,
              &player.name,
              &player.country,
              player.rank,
              player.score,
              player.kills,
              player.deaths,
              player.accuracy,
            ])?;
          }
        }

        tx.commit()?;
        Ok(players.len())
      })
      .await?;

    debug!(count, "replaced snapshot generation");
    Ok(count)
  }

  /// Capture time of the current generation, `None` when it is empty.
  pub async fn generation_time(&self) -> Result<Option<i64>> {
    let time: Option<i64> = self
      .conn
      .call(|conn| {
        conn
          .prepare_cached("SELECT MAX(time) FROM snapshot")?
          .query_row([], |row| row.get(0))
      })
      .await?;

    Ok(time)
  }

  /// Number of entries in the current generation.
  pub async fn len(&self) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(|conn| {
        conn
          .prepare_cached("SELECT COUNT(*) FROM snapshot")?
          .query_row([], |row| row.get(0))
      })
      .await?;

    Ok(count as usize)
  }

  pub async fn is_empty(&self) -> Result<bool> {
    Ok(self.len().await? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Database;

  const MINUTE: Duration = Duration::from_secs(60);

  fn player(name: &str, rank: i64, kills: i64, deaths: i64, accuracy: i64) -> Player {
    Player {
      name: name.to_string(),
      country: "ir".to_string(),
      rank: Some(rank),
      score: 0,
      kills,
      deaths,
      accuracy,
    }
  }

  #[tokio::test]
  async fn test_generation_is_replaced_not_accumulated() {
    let db = Database::open_in_memory().await.unwrap();
    let snapshot = db.snapshot();

    assert!(snapshot.is_empty().await.unwrap());
    assert_eq!(snapshot.generation_time().await.unwrap(), None);

    snapshot
      .replace_generation(
        vec![player("alice", 1, 100, 50, 60), player("bob", 2, 90, 40, 50)],
        1000,
      )
      .await
      .unwrap();
    assert_eq!(snapshot.len().await.unwrap(), 2);
    assert_eq!(snapshot.generation_time().await.unwrap(), Some(1000));

    snapshot
      .replace_generation(vec![player("carol", 1, 10, 5, 30)], 2000)
      .await
      .unwrap();
    assert_eq!(snapshot.len().await.unwrap(), 1);
    assert_eq!(snapshot.generation_time().await.unwrap(), Some(2000));
    assert!(matches!(
      snapshot.get_by_name("alice").await,
      Err(DbError::PlayerNotFound)
    ));

    let carol = snapshot.get_by_name("carol").await.unwrap();
    assert_eq!(carol.time, 2000);
    assert_eq!(carol.player.kills, 10);
  }

  #[tokio::test]
  async fn test_find_candidates_within_envelope() {
    let db = Database::open_in_memory().await.unwrap();
    let snapshot = db.snapshot();

    snapshot
      .replace_generation(
        vec![
          player("alice", 5, 100, 50, 60),
          // more kills than observed: counters never decrease
          player("bob", 6, 110, 50, 60),
          // too far behind for one minute
          player("carol", 7, 50, 50, 60),
        ],
        1000,
      )
      .await
      .unwrap();

    let observed = player("alice2", 4, 105, 51, 61);
    let candidates = snapshot.find_candidates(&observed, MINUTE).await.unwrap();
    let names: Vec<&str> = candidates.iter().map(|c| c.player.name.as_str()).collect();
    assert_eq!(names, vec!["alice"]);
  }

  #[tokio::test]
  async fn test_find_candidates_returns_all_in_insertion_order() {
    let db = Database::open_in_memory().await.unwrap();
    let snapshot = db.snapshot();

    snapshot
      .replace_generation(
        vec![player("b", 6, 98, 50, 60), player("a", 5, 100, 50, 60)],
        1000,
      )
      .await
      .unwrap();

    let observed = player("new", 5, 101, 50, 60);
    let candidates = snapshot.find_candidates(&observed, MINUTE).await.unwrap();
    let names: Vec<&str> = candidates.iter().map(|c| c.player.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
  }

  #[tokio::test]
  async fn test_no_candidate_found() {
    let db = Database::open_in_memory().await.unwrap();
    let snapshot = db.snapshot();

    let observed = player("ghost", 1, 10, 10, 10);
    assert!(matches!(
      snapshot.find_candidates(&observed, MINUTE).await,
      Err(DbError::NoCandidateFound)
    ));

    snapshot
      .replace_generation(vec![player("alice", 5, 100, 50, 60)], 1000)
      .await
      .unwrap();
    assert!(matches!(
      snapshot.find_candidates(&observed, MINUTE).await,
      Err(DbError::NoCandidateFound)
    ));

    let mut unranked = observed.clone();
    unranked.rank = None;
    assert!(matches!(
      snapshot.find_candidates(&unranked, MINUTE).await,
      Err(DbError::NoCandidateFound)
    ));
  }

  #[tokio::test]
  async fn test_unranked_entries_are_never_candidates() {
    let db = Database::open_in_memory().await.unwrap();
    let snapshot = db.snapshot();

    let mut unranked = player("alice", 5, 100, 50, 60);
    unranked.rank = None;
    snapshot.replace_generation(vec![unranked], 1000).await.unwrap();

    let observed = player("alice2", 5, 100, 50, 60);
    assert!(snapshot.find_candidates(&observed, MINUTE).await.is_err());
  }
}
