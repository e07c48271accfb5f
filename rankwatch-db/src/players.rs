use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, Transaction, params};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::models::{OnlineSession, PersistedPlayer, Player, PlayerId};
use crate::player_from_row;

/// Persisted player identities, ranks and online sessions.
///
/// Names are unique. Rank uniqueness is kept by the caller through the
/// unrank-then-assign protocol; [`PlayerStore::add_ranked`] and
/// [`PlayerStore::update_ranked`] run both steps in one transaction.
#[derive(Clone)]
pub struct PlayerStore {
  conn: Connection,
}

impl PlayerStore {
  pub(crate) fn new(conn: Connection) -> Self {
    Self { conn }
  }

  // ========================================================================
  // Identities
  // ========================================================================

  /// Get a player by name.
  pub async fn get_by_name(&self, name: &str) -> Result<PersistedPlayer> {
    let name = name.to_string();
    let player = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id, name, country, rank, score, kills, deaths, accuracy
             FROM players WHERE name = ?1",
          )?
          .query_row(params![&name], |row| {
            Ok(PersistedPlayer {
              id: row.get(0)?,
              player: player_from_row(row, 1)?,
            })
          })
          .optional()
      })
      .await?;

    player.ok_or(DbError::PlayerNotFound)
  }

  /// Get a player by id.
  pub async fn get_by_id(&self, id: PlayerId) -> Result<PersistedPlayer> {
    let player = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id, name, country, rank, score, kills, deaths, accuracy
             FROM players WHERE id = ?1",
          )?
          .query_row(params![id], |row| {
            Ok(PersistedPlayer {
              id: row.get(0)?,
              player: player_from_row(row, 1)?,
            })
          })
          .optional()
      })
      .await?;

    player.ok_or(DbError::PlayerNotFound)
  }

  /// Insert a new player. Fails if the name already exists.
  pub async fn add(&self, player: Player) -> Result<PlayerId> {
    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let id = match insert_player(&tx, &player)? {
          Some(id) => id,
          None => return Ok(Err(DbError::PlayerNameConflict)),
        };
        tx.commit()?;
        Ok(Ok(id))
      })
      .await??;

    debug!(id, "added player");
    Ok(id)
  }

  /// Insert a new player after clearing its rank from whoever holds it.
  pub async fn add_ranked(&self, player: Player) -> Result<PlayerId> {
    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Some(rank) = player.rank {
          unrank(&tx, rank)?;
        }
        let id = match insert_player(&tx, &player)? {
          Some(id) => id,
          None => return Ok(Err(DbError::PlayerNameConflict)),
        };
        tx.commit()?;
        Ok(Ok(id))
      })
      .await??;

    debug!(id, "added ranked player");
    Ok(id)
  }

  /// Overwrite a player's stored fields. Does not touch other players' ranks.
  pub async fn update(&self, id: PlayerId, player: Player) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let updated = update_player(conn, id, &player)?;
        if updated == 0 {
          return Ok(Err(DbError::PlayerNotFound));
        }
        Ok(Ok(()))
      })
      .await??;

    debug!(id, "updated player");
    Ok(())
  }

  /// Overwrite a player's stored fields after clearing the new rank from
  /// whoever holds it.
  pub async fn update_ranked(&self, id: PlayerId, player: Player) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Some(rank) = player.rank {
          unrank(&tx, rank)?;
        }
        if update_player(&tx, id, &player)? == 0 {
          return Ok(Err(DbError::PlayerNotFound));
        }
        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    debug!(id, "updated ranked player");
    Ok(())
  }

  /// Clear the rank of whichever player holds exactly `rank`.
  /// Returns the number of players affected (zero or one).
  pub async fn unrank(&self, rank: i64) -> Result<usize> {
    let affected = self.conn.call(move |conn| unrank(conn, rank)).await?;
    Ok(affected)
  }

  /// Change a player's name, keeping its identity.
  pub async fn rename(&self, id: PlayerId, name: String) -> Result<()> {
    let name_log = name.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let taken: bool = tx
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM players WHERE name = ?1 AND id != ?2)")?
          .query_row(params![&name, id], |row| row.get(0))?;
        if taken {
          return Ok(Err(DbError::PlayerNameConflict));
        }

        let updated = tx
          .prepare_cached("UPDATE players SET name = ?1 WHERE id = ?2")?
          .execute(params![&name, id])?;
        if updated == 0 {
          return Ok(Err(DbError::PlayerNotFound));
        }

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    debug!(id, name = %name_log, "renamed player");
    Ok(())
  }

  /// Page through ranked players, best rank first.
  pub async fn list_ranked(&self, offset: u32, limit: u32) -> Result<Vec<PersistedPlayer>> {
    let players = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT id, name, country, rank, score, kills, deaths, accuracy
           FROM players
           WHERE rank IS NOT NULL
           ORDER BY rank ASC
           LIMIT ?1 OFFSET ?2",
        )?;

        let players = stmt
          .query_map(params![limit, offset], |row| {
            Ok(PersistedPlayer {
              id: row.get(0)?,
              player: player_from_row(row, 1)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(players)
      })
      .await?;

    Ok(players)
  }

  // ========================================================================
  // Online Sessions
  // ========================================================================

  /// Open a session for a player. Returns false if one was already open.
  pub async fn mark_online(&self, id: PlayerId, now: i64) -> Result<bool> {
    let opened = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let exists: bool = tx
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM players WHERE id = ?1)")?
          .query_row(params![id], |row| row.get(0))?;
        if !exists {
          return Ok(Err(DbError::PlayerNotFound));
        }

        // The partial unique index keeps at most one open session per player
        let inserted = tx
          .prepare_cached(
            "INSERT OR IGNORE INTO online_sessions (player_id, start_time) VALUES (?1, ?2)",
          )?
          .execute(params![id, now])?;

        tx.commit()?;
        Ok(Ok(inserted == 1))
      })
      .await??;

    debug!(id, opened, "player online");
    Ok(opened)
  }

  /// Close a player's open session. Returns false if none was open.
  pub async fn mark_offline(&self, id: PlayerId, now: i64) -> Result<bool> {
    let closed = self
      .conn
      .call(move |conn| {
        let closed = conn
          .prepare_cached(
            "UPDATE online_sessions SET end_time = ?1 WHERE player_id = ?2 AND end_time IS NULL",
          )?
          .execute(params![now, id])?;
        Ok(closed == 1)
      })
      .await?;

    debug!(id, closed, "player offline");
    Ok(closed)
  }

  /// Ids of every player with an open session.
  pub async fn open_session_ids(&self) -> Result<Vec<PlayerId>> {
    let ids = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT player_id FROM online_sessions WHERE end_time IS NULL ORDER BY player_id",
        )?;

        let ids = stmt
          .query_map([], |row| row.get(0))?
          .collect::<std::result::Result<Vec<PlayerId>, _>>()?;

        Ok(ids)
      })
      .await?;

    Ok(ids)
  }

  /// Whether a player currently has an open session.
  pub async fn is_online(&self, id: PlayerId) -> Result<bool> {
    let online = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM online_sessions WHERE player_id = ?1 AND end_time IS NULL)",
          )?
          .query_row(params![id], |row| row.get(0))
      })
      .await?;

    Ok(online)
  }

  /// Every online player, ranked ones first by rank, then unranked ones by name.
  pub async fn list_online(&self) -> Result<Vec<PersistedPlayer>> {
    let players = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT p.id, p.name, p.country, p.rank, p.score, p.kills, p.deaths, p.accuracy
          FROM online_sessions s
          INNER JOIN players p ON p.id = s.player_id
          WHERE s.end_time IS NULL
          ORDER BY p.rank IS NULL, p.rank ASC, p.name ASC
          "#,
        )?;

        let players = stmt
          .query_map([], |row| {
            Ok(PersistedPlayer {
              id: row.get(0)?,
              player: player_from_row(row, 1)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(players)
      })
      .await?;

    Ok(players)
  }

  /// Session history of a player, oldest first.
  pub async fn sessions(&self, id: PlayerId) -> Result<Vec<OnlineSession>> {
    let sessions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT player_id, start_time, end_time FROM online_sessions
           WHERE player_id = ?1 ORDER BY start_time, id",
        )?;

        let sessions = stmt
          .query_map(params![id], |row| {
            Ok(OnlineSession {
              player_id: row.get(0)?,
              start_time: row.get(1)?,
              end_time: row.get(2)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }
}

/// Insert a player, returning `None` when the name is taken.
fn insert_player(
  tx: &Transaction<'_>,
  player: &Player,
) -> tokio_rusqlite::rusqlite::Result<Option<PlayerId>> {
  let exists: bool = tx
    .prepare_cached("SELECT EXISTS(SELECT 1 FROM players WHERE name = ?1)")?
    .query_row(params![&player.name], |row| row.get(0))?;
  if exists {
    return Ok(None);
  }

  tx.prepare_cached(
    "INSERT INTO players (name, country, rank, score, kills, deaths, accuracy)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
  )?
  .execute(params![
    &player.name,
    &player.country,
    player.rank,
    player.score,
    player.kills,
    player.deaths,
    player.accuracy,
  ])?;

  Ok(Some(tx.last_insert_rowid()))
}

fn update_player(
  conn: &tokio_rusqlite::rusqlite::Connection,
  id: PlayerId,
  player: &Player,
) -> tokio_rusqlite::rusqlite::Result<usize> {
  conn
    .prepare_cached(
      "UPDATE players
       SET name = ?1, country = ?2, rank = ?3, score = ?4, kills = ?5, deaths = ?6, accuracy = ?7
       WHERE id = ?8",
    )?
    .execute(params![
      &player.name,
      &player.country,
      player.rank,
      player.score,
      player.kills,
      player.deaths,
      player.accuracy,
      id,
    ])
}

fn unrank(
  conn: &tokio_rusqlite::rusqlite::Connection,
  rank: i64,
) -> tokio_rusqlite::rusqlite::Result<usize> {
  conn
    .prepare_cached("UPDATE players SET rank = NULL WHERE rank = ?1")?
    .execute(params![rank])
}

#[cfg(test)]
mod tests {
  use crate::{Database, DbError, Player};

  fn now() -> i64 {
    1700000000 // Fixed timestamp for testing
  }

  fn player(name: &str, rank: Option<i64>) -> Player {
    Player {
      name: name.to_string(),
      country: "ir".to_string(),
      rank,
      score: 1000,
      kills: 100,
      deaths: 50,
      accuracy: 60,
    }
  }

  #[tokio::test]
  async fn test_player_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    let id = players.add(player("thekhanj", Some(1))).await.unwrap();

    let by_name = players.get_by_name("thekhanj").await.unwrap();
    assert_eq!(by_name.id, id);
    assert_eq!(by_name.player.rank, Some(1));

    let mut changed = player("thekhanj", Some(2));
    changed.kills = 120;
    players.update(id, changed.clone()).await.unwrap();

    let by_id = players.get_by_id(id).await.unwrap();
    assert_eq!(by_id.player, changed);
  }

  #[tokio::test]
  async fn test_lookup_misses() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    assert!(matches!(
      players.get_by_name("nobody").await,
      Err(DbError::PlayerNotFound)
    ));
    assert!(matches!(
      players.get_by_id(42).await,
      Err(DbError::PlayerNotFound)
    ));
    assert!(matches!(
      players.update(42, player("nobody", None)).await,
      Err(DbError::PlayerNotFound)
    ));
  }

  #[tokio::test]
  async fn test_add_existing_name_conflicts() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    players.add(player("alice", Some(1))).await.unwrap();
    assert!(matches!(
      players.add(player("alice", Some(2))).await,
      Err(DbError::PlayerNameConflict)
    ));
    assert!(matches!(
      players.add_ranked(player("alice", Some(3))).await,
      Err(DbError::PlayerNameConflict)
    ));
  }

  #[tokio::test]
  async fn test_unrank_clears_only_the_holder() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    let a = players.add(player("alice", Some(1))).await.unwrap();
    let b = players.add(player("bob", Some(2))).await.unwrap();

    assert_eq!(players.unrank(1).await.unwrap(), 1);
    assert_eq!(players.unrank(7).await.unwrap(), 0);

    assert_eq!(players.get_by_id(a).await.unwrap().player.rank, None);
    assert_eq!(players.get_by_id(b).await.unwrap().player.rank, Some(2));
  }

  #[tokio::test]
  async fn test_ranked_writes_keep_ranks_unique() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    let a = players.add_ranked(player("alice", Some(1))).await.unwrap();
    let b = players.add_ranked(player("bob", Some(1))).await.unwrap();
    assert_eq!(players.get_by_id(a).await.unwrap().player.rank, None);
    assert_eq!(players.get_by_id(b).await.unwrap().player.rank, Some(1));

    players.update_ranked(a, player("alice", Some(1))).await.unwrap();
    assert_eq!(players.get_by_id(a).await.unwrap().player.rank, Some(1));
    assert_eq!(players.get_by_id(b).await.unwrap().player.rank, None);

    // Reassigning a player its own rank keeps it
    players.update_ranked(a, player("alice", Some(1))).await.unwrap();
    assert_eq!(players.get_by_id(a).await.unwrap().player.rank, Some(1));

    let ranked = players.list_ranked(0, 10).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].id, a);
  }

  #[tokio::test]
  async fn test_rename_keeps_identity() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    let a = players.add(player("alice", Some(1))).await.unwrap();
    players.add(player("bob", Some(2))).await.unwrap();

    players.rename(a, "alice2".to_string()).await.unwrap();
    assert_eq!(players.get_by_name("alice2").await.unwrap().id, a);
    assert!(players.get_by_name("alice").await.is_err());

    assert!(matches!(
      players.rename(a, "bob".to_string()).await,
      Err(DbError::PlayerNameConflict)
    ));
    assert!(matches!(
      players.rename(99, "carol".to_string()).await,
      Err(DbError::PlayerNotFound)
    ));
  }

  #[tokio::test]
  async fn test_list_ranked_pages_by_rank() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    for (name, rank) in [("c", Some(3)), ("a", Some(1)), ("x", None), ("b", Some(2))] {
      players.add(player(name, rank)).await.unwrap();
    }

    let first: Vec<String> = players
      .list_ranked(0, 2)
      .await
      .unwrap()
      .into_iter()
      .map(|p| p.player.name)
      .collect();
    assert_eq!(first, vec!["a", "b"]);

    let second: Vec<String> = players
      .list_ranked(2, 2)
      .await
      .unwrap()
      .into_iter()
      .map(|p| p.player.name)
      .collect();
    assert_eq!(second, vec!["c"]);
  }

  #[tokio::test]
  async fn test_online_sessions() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    let id = players.add(player("thekhanj", Some(1))).await.unwrap();
    assert!(!players.is_online(id).await.unwrap());

    assert!(players.mark_online(id, now()).await.unwrap());
    // A second open is a no-op
    assert!(!players.mark_online(id, now() + 10).await.unwrap());
    assert!(players.is_online(id).await.unwrap());
    assert_eq!(players.open_session_ids().await.unwrap(), vec![id]);

    assert!(players.mark_offline(id, now() + 60).await.unwrap());
    assert!(!players.mark_offline(id, now() + 70).await.unwrap());
    assert!(!players.is_online(id).await.unwrap());
    assert!(players.open_session_ids().await.unwrap().is_empty());

    players.mark_online(id, now() + 120).await.unwrap();
    let sessions = players.sessions(id).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].end_time, Some(now() + 60));
    assert_eq!(sessions[0].duration(now() + 1000), 60);
    assert!(sessions[1].is_open());
    assert_eq!(sessions[1].duration(now() + 180), 60);
  }

  #[tokio::test]
  async fn test_mark_online_unknown_player() {
    let db = Database::open_in_memory().await.unwrap();
    assert!(matches!(
      db.players().mark_online(7, now()).await,
      Err(DbError::PlayerNotFound)
    ));
  }

  #[tokio::test]
  async fn test_list_online_puts_unranked_last() {
    let db = Database::open_in_memory().await.unwrap();
    let players = db.players();

    let zed = players.add(player("zed", None)).await.unwrap();
    let amy = players.add(player("amy", None)).await.unwrap();
    let top = players.add(player("top", Some(3))).await.unwrap();
    let best = players.add(player("best", Some(1))).await.unwrap();
    let offline = players.add(player("offline", Some(2))).await.unwrap();

    for id in [zed, amy, top, best] {
      players.mark_online(id, now()).await.unwrap();
    }
    players.mark_online(offline, now()).await.unwrap();
    players.mark_offline(offline, now() + 1).await.unwrap();

    let names: Vec<String> = players
      .list_online()
      .await
      .unwrap()
      .into_iter()
      .map(|p| p.player.name)
      .collect();
    assert_eq!(names, vec!["best", "top", "amy", "zed"]);
  }
}
