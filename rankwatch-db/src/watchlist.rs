use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::params;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::models::{PersistedPlayer, PlayerId};
use crate::player_from_row;

/// Which chat channels want presence notifications for which players.
#[derive(Clone)]
pub struct WatchlistStore {
  conn: Connection,
}

impl WatchlistStore {
  pub(crate) fn new(conn: Connection) -> Self {
    Self { conn }
  }

  /// Add a player to a channel's watchlist.
  pub async fn watch(&self, channel_id: u64, player_id: PlayerId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let exists: bool = tx
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM players WHERE id = ?1)")?
          .query_row(params![player_id], |row| row.get(0))?;
        if !exists {
          return Ok(Err(DbError::PlayerNotFound));
        }

        let inserted = tx
          .prepare_cached("INSERT OR IGNORE INTO watchlist (channel_id, player_id) VALUES (?1, ?2)")?
          .execute(params![channel_id as i64, player_id])?;
        if inserted == 0 {
          return Ok(Err(DbError::AlreadyWatching));
        }

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    debug!(channel_id, player_id, "watching player");
    Ok(())
  }

  /// Remove a player from a channel's watchlist.
  pub async fn unwatch(&self, channel_id: u64, player_id: PlayerId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM watchlist WHERE channel_id = ?1 AND player_id = ?2")?
          .execute(params![channel_id as i64, player_id])?;
        if deleted == 0 {
          return Ok(Err(DbError::NotWatching));
        }
        Ok(Ok(()))
      })
      .await??;

    debug!(channel_id, player_id, "unwatched player");
    Ok(())
  }

  /// Players on a channel's watchlist, by name.
  pub async fn watchlist(&self, channel_id: u64) -> Result<Vec<PersistedPlayer>> {
    let players = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT p.id, p.name, p.country, p.rank, p.score, p.kills, p.deaths, p.accuracy
          FROM watchlist w
          INNER JOIN players p ON p.id = w.player_id
          WHERE w.channel_id = ?1
          ORDER BY p.name
          "#,
        )?;

        let players = stmt
          .query_map(params![channel_id as i64], |row| {
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

  /// Channels watching a player.
  pub async fn watchers_of(&self, player_id: PlayerId) -> Result<Vec<u64>> {
    let channels = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT channel_id FROM watchlist WHERE player_id = ?1 ORDER BY channel_id",
        )?;

        let channels = stmt
          .query_map(params![player_id], |row| row.get::<_, i64>(0))?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(channels)
      })
      .await?;

    Ok(channels.into_iter().map(|id| id as u64).collect())
  }
}
