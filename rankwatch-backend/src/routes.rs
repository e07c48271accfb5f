use crate::AppState;
use crate::error::AppError;
use crate::helpers::now;
use crate::validation;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use axum_macros::debug_handler;
use rankwatch_db::{OnlineSession, PersistedPlayer, PlayerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Serialize)]
pub(crate) struct PlayerResponse {
    id: PlayerId,
    name: String,
    country: String,
    rank: Option<i64>,
    score: i64,
    kills: i64,
    deaths: i64,
    accuracy: i64,
}

impl From<PersistedPlayer> for PlayerResponse {
    fn from(p: PersistedPlayer) -> Self {
        Self {
            id: p.id,
            name: p.player.name,
            country: p.player.country,
            rank: p.player.rank,
            score: p.player.score,
            kills: p.player.kills,
            deaths: p.player.deaths,
            accuracy: p.player.accuracy,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct OnlinePlayerResponse {
    #[serde(flatten)]
    player: PlayerResponse,
    /// Seconds since the open session started
    online_for: i64,
}

#[derive(Serialize)]
pub(crate) struct SessionResponse {
    start_time: i64,
    end_time: Option<i64>,
}

impl From<OnlineSession> for SessionResponse {
    fn from(s: OnlineSession) -> Self {
        Self {
            start_time: s.start_time,
            end_time: s.end_time,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct PlayerDetailResponse {
    #[serde(flatten)]
    player: PlayerResponse,
    online: bool,
    sessions: Vec<SessionResponse>,
}

#[derive(Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

#[debug_handler]
pub(crate) async fn online(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let players = state.db.players();
    let current_time = now();

    let mut response = Vec::new();
    for p in players.list_online().await? {
        let online_for = players
            .sessions(p.id)
            .await?
            .into_iter()
            .find(OnlineSession::is_open)
            .map_or(0, |s| s.duration(current_time));
        response.push(OnlinePlayerResponse {
            player: p.into(),
            online_for,
        });
    }

    Ok(Json(response))
}

#[debug_handler]
pub(crate) async fn ranked(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_page_limit(page.limit)?;

    let players = state
        .db
        .players()
        .list_ranked(page.offset, page.limit)
        .await?;

    Ok(Json(
        players
            .into_iter()
            .map(PlayerResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[debug_handler]
pub(crate) async fn player(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_player_name(&name)?;

    let players = state.db.players();
    let player = players.get_by_name(&name).await?;
    let sessions = players.sessions(player.id).await?;
    let online = sessions.iter().any(OnlineSession::is_open);

    Ok(Json(PlayerDetailResponse {
        player: player.into(),
        online,
        sessions: sessions.into_iter().map(SessionResponse::from).collect(),
    }))
}
