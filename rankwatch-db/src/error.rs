use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("database connection error: {0}")]
  Connection(#[from] tokio_rusqlite::Error),

  #[error("player not found")]
  PlayerNotFound,

  #[error("no rename candidate found")]
  NoCandidateFound,

  #[error("player name already exists")]
  PlayerNameConflict,

  #[error("player is already on this watchlist")]
  AlreadyWatching,

  #[error("player is not on this watchlist")]
  NotWatching,
}

pub type Result<T> = std::result::Result<T, DbError>;
