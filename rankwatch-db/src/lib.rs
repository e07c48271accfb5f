mod error;
mod models;
mod players;
mod snapshot;
mod watchlist;

pub mod envelope;

pub use error::{DbError, Result};
pub use models::{OnlineSession, PersistedPlayer, Player, PlayerId, SnapshotEntry};
pub use players::PlayerStore;
pub use snapshot::SnapshotStore;
pub use watchlist::WatchlistStore;

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, Row};
use tracing::info;

/// Database wrapper shared by every store.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Persisted player identities, ranks and online sessions.
  pub fn players(&self) -> PlayerStore {
    PlayerStore::new(self.conn.clone())
  }

  /// The single prior-poll generation used for rename matching.
  pub fn snapshot(&self) -> SnapshotStore {
    SnapshotStore::new(self.conn.clone())
  }

  /// Per-channel lists of watched players.
  pub fn watchlist(&self) -> WatchlistStore {
    WatchlistStore::new(self.conn.clone())
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
      .call(|conn| {
        // WAL lets the presence loop read while the stats loop writes
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // Enable foreign key constraints (must be set per-connection)
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
          r#"
          -- Stable player identities with their latest stats
          CREATE TABLE IF NOT EXISTS players (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              country TEXT NOT NULL,
              rank INTEGER,
              score INTEGER NOT NULL,
              kills INTEGER NOT NULL,
              deaths INTEGER NOT NULL,
              accuracy INTEGER NOT NULL
          );
          CREATE INDEX IF NOT EXISTS idx_players_rank ON players(rank);

          -- Online sessions, a NULL end_time marks the player as online
          CREATE TABLE IF NOT EXISTS online_sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              player_id INTEGER NOT NULL REFERENCES players(id) ON DELETE RESTRICT,
              start_time INTEGER NOT NULL,
              end_time INTEGER
          );
          CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_open
              ON online_sessions(player_id) WHERE end_time IS NULL;
          CREATE INDEX IF NOT EXISTS idx_sessions_player
              ON online_sessions(player_id, start_time);

          -- Previous full-poll generation, replaced wholesale every cycle
          CREATE TABLE IF NOT EXISTS snapshot (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              time INTEGER NOT NULL,
              name TEXT NOT NULL,
              country TEXT NOT NULL,
              rank INTEGER,
              score INTEGER NOT NULL,
              kills INTEGER NOT NULL,
              deaths INTEGER NOT NULL,
              accuracy INTEGER NOT NULL
          );
          CREATE INDEX IF NOT EXISTS idx_snapshot_name ON snapshot(name);
          CREATE INDEX IF NOT EXISTS idx_snapshot_kills ON snapshot(kills);

          -- Chat channels watching a player's presence
          CREATE TABLE IF NOT EXISTS watchlist (
              channel_id INTEGER NOT NULL,
              player_id INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              PRIMARY KEY (channel_id, player_id)
          );
          CREATE INDEX IF NOT EXISTS idx_watchlist_player ON watchlist(player_id);
          "#,
        )?;
        Ok(())
      })
      .await?;

    info!("database initialized");
    Ok(())
  }
}

/// Read the seven player columns starting at `offset`
/// (name, country, rank, score, kills, deaths, accuracy).
pub(crate) fn player_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Player> {
  Ok(Player {
    name: row.get(offset)?,
    country: row.get(offset + 1)?,
    rank: row.get(offset + 2)?,
    score: row.get(offset + 3)?,
    kills: row.get(offset + 4)?,
    deaths: row.get(offset + 5)?,
    accuracy: row.get(offset + 6)?,
  })
}
