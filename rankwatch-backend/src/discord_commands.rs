use crate::Context;
use poise::CreateReply;
use poise::command;
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter};
use rankwatch_backend::helpers::{format_duration, format_rank, now};
use rankwatch_backend::validation::validate_player_name;
use rankwatch_db::{DbError, OnlineSession, PersistedPlayer};

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;

const TOP_PAGE_SIZE: u32 = 10;
const EMBED_COLOR: u32 = 0x5865F2;

fn player_line(p: &PersistedPlayer) -> String {
    format!(
        "{} **{}** ({} kills, {}% acc)",
        format_rank(p.player.rank),
        p.player.name,
        p.player.kills,
        p.player.accuracy
    )
}

async fn reply(ctx: Context<'_>, title: &str, description: String) -> Result<(), Error> {
    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title(title)
                .description(description)
                .color(EMBED_COLOR),
        ),
    )
    .await?;
    Ok(())
}

/// Show who is online right now
#[command(slash_command, prefix_command)]
pub async fn online(ctx: Context<'_>) -> Result<(), Error> {
    let players = ctx.data().db.players();
    let online = players.list_online().await?;

    let embed = CreateEmbed::default()
        .title(format!("🟢 {} players online", online.len()))
        .color(EMBED_COLOR);
    let embed = if online.is_empty() {
        embed.description("Nobody is online")
    } else {
        let current_time = now();
        let mut lines = Vec::with_capacity(online.len());
        for p in &online {
            let since = players
                .sessions(p.id)
                .await?
                .into_iter()
                .find(OnlineSession::is_open)
                .map_or(0, |s| s.duration(current_time));
            lines.push(format!("- {} for {}", player_line(p), format_duration(since)));
        }
        embed.description(lines.join("\n"))
    };
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show a page of the ranked leaderboard
#[command(slash_command, prefix_command)]
pub async fn top(
    ctx: Context<'_>,
    #[description = "Page number (starts at 1)"] page: Option<u32>,
) -> Result<(), Error> {
    let page = page.unwrap_or(1).max(1);
    let offset = (page - 1).saturating_mul(TOP_PAGE_SIZE);
    let players = ctx
        .data()
        .db
        .players()
        .list_ranked(offset, TOP_PAGE_SIZE)
        .await?;

    let description = if players.is_empty() {
        "No ranked players on this page".to_string()
    } else {
        players
            .iter()
            .map(player_line)
            .collect::<Vec<_>>()
            .join("\n")
    };
    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title("Leaderboard")
                .description(description)
                .color(EMBED_COLOR)
                .footer(CreateEmbedFooter::new(format!("Page {}", page))),
        ),
    )
    .await?;
    Ok(())
}

/// Get notified in this channel when a player comes online or leaves
#[command(slash_command, prefix_command)]
pub async fn watch(
    ctx: Context<'_>,
    #[description = "Player name"]
    #[rest]
    name: String,
) -> Result<(), Error> {
    validate_player_name(&name)?;
    let data = ctx.data();
    let channel_id = ctx.channel_id().get();

    let player = match data.db.players().get_by_name(&name).await {
        Ok(player) => player,
        Err(DbError::PlayerNotFound) => {
            return reply(ctx, "Not found", format!("No player named **{}**", name)).await;
        }
        Err(e) => return Err(e.into()),
    };

    let description = match data.db.watchlist().watch(channel_id, player.id).await {
        Ok(()) => format!("Watching **{}** in this channel", player.player.name),
        Err(DbError::AlreadyWatching) => {
            format!("**{}** is already watched here", player.player.name)
        }
        Err(e) => return Err(e.into()),
    };
    reply(ctx, "Watchlist", description).await
}

/// Stop notifications about a player in this channel
#[command(slash_command, prefix_command)]
pub async fn unwatch(
    ctx: Context<'_>,
    #[description = "Player name"]
    #[rest]
    name: String,
) -> Result<(), Error> {
    validate_player_name(&name)?;
    let data = ctx.data();
    let channel_id = ctx.channel_id().get();

    let player = match data.db.players().get_by_name(&name).await {
        Ok(player) => player,
        Err(DbError::PlayerNotFound) => {
            return reply(ctx, "Not found", format!("No player named **{}**", name)).await;
        }
        Err(e) => return Err(e.into()),
    };

    let description = match data.db.watchlist().unwatch(channel_id, player.id).await {
        Ok(()) => format!("Stopped watching **{}**", player.player.name),
        Err(DbError::NotWatching) => format!("**{}** is not watched here", player.player.name),
        Err(e) => return Err(e.into()),
    };
    reply(ctx, "Watchlist", description).await
}

/// List the players watched in this channel
#[command(slash_command, prefix_command)]
pub async fn watchlist(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let channel_id = ctx.channel_id().get();
    let players = data.db.watchlist().watchlist(channel_id).await?;

    let description = if players.is_empty() {
        "Nobody is watched here yet. Use `watch <name>` to add someone.".to_string()
    } else {
        let mut lines = Vec::with_capacity(players.len());
        for p in &players {
            let status = if data.db.players().is_online(p.id).await? {
                "🟢"
            } else {
                "⚪"
            };
            lines.push(format!("{} {}", status, player_line(p)));
        }
        lines.join("\n")
    };
    reply(ctx, "Watchlist", description).await
}
