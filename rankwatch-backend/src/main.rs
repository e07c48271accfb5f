mod discord_commands;
use anyhow::Context as _;
use poise::{Framework, FrameworkOptions, serenity_prelude as serenity};
use rankwatch_backend::bus::EventBus;
use rankwatch_backend::config::Config;
use rankwatch_backend::crawler::HttpCrawler;
use rankwatch_backend::create_app;
use rankwatch_backend::notifier::{DiscordSink, Notifier};
use rankwatch_backend::observer::Observer;
use rankwatch_db::Database;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type Context<'a> = poise::Context<'a, crate::Data, crate::discord_commands::Error>;

pub(crate) struct Data {
    pub(crate) db: Database,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting rankwatch...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, body_limit={}KB, timeout={}s, site={}",
        config.port,
        config.database_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.crawler_base_url
    );
    tracing::info!(
        "Polling: online every {}s, stats every {}s over {} pages, renames tracked down to rank {}",
        config.online_interval.as_secs(),
        config.stats_interval.as_secs(),
        config.stats_page_count,
        config.tracked_rank_limit
    );

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let bus = Arc::new(EventBus::new(config.event_buffer));
    let crawler = Arc::new(
        HttpCrawler::new(config.crawler_base_url.clone(), config.crawler_timeout)
            .context("failed to build HTTP client")?,
    );
    let shutdown = CancellationToken::new();

    let observer = Arc::new(Observer::new(
        &db,
        bus.clone(),
        crawler,
        config.observer(),
    ));
    let observer = observer.start(shutdown.child_token());

    let discord = match config.discord_token.clone() {
        Some(token) => Some(start_discord(&token, &db, bus.clone(), &config, &shutdown).await?),
        None => {
            tracing::warn!("DISCORD_TOKEN not set, chat notifications disabled");
            None
        }
    };

    let app = create_app(db, config.request_body_limit, config.request_timeout);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutting down...");
    shutdown.cancel();

    observer.join().await;
    if let Some(discord) = discord {
        discord.stop().await;
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Axum server error: {}", e),
        Err(e) => tracing::error!("Axum server task failed: {}", e),
    }
    tracing::info!("Bye");
    Ok(())
}

struct Discord {
    shard_manager: Arc<serenity::ShardManager>,
    client: JoinHandle<()>,
    notifier: JoinHandle<()>,
}

impl Discord {
    async fn stop(self) {
        if let Err(e) = self.notifier.await {
            tracing::error!("Notifier task failed: {}", e);
        }
        self.shard_manager.shutdown_all().await;
        if let Err(e) = self.client.await {
            tracing::error!("Discord client task failed: {}", e);
        }
    }
}

async fn start_discord(
    token: &str,
    db: &Database,
    bus: Arc<EventBus>,
    config: &Config,
    shutdown: &CancellationToken,
) -> anyhow::Result<Discord> {
    let intents = serenity::GatewayIntents::non_privileged();

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![
                discord_commands::online(),
                discord_commands::top(),
                discord_commands::watch(),
                discord_commands::unwatch(),
                discord_commands::watchlist(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Executing command '{}' by user '{}'",
                        ctx.command().name,
                        ctx.author().name
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "Finished command '{}' by user '{}'",
                        ctx.command().name,
                        ctx.author().name
                    );
                })
            },
            ..Default::default()
        })
        .setup({
            let db = db.clone();
            move |ctx, _ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    Ok(Data { db })
                })
            }
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("failed to create Discord client")?;

    let sink = Arc::new(DiscordSink::new(client.http.clone()));
    let notifier = Notifier::new(db, bus, sink, config.rename_channel_id);
    let notifier = tokio::spawn(notifier.run(shutdown.child_token()));

    let shard_manager = client.shard_manager.clone();
    let client = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            tracing::error!("Discord client error: {:?}", e);
        }
    });

    Ok(Discord {
        shard_manager,
        client,
        notifier,
    })
}
