use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use rtmpauth_service::config::Config;
use rtmpauth_service::handlers::{self, AppState};
use rtmpauth_service::services::{
    DiscordSink, LiveStatusScheduler, LogSink, NotificationDispatcher, NotificationSink,
    TwitchClient, TwitchConfig,
};
use rtmpauth_service::store::PublisherStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(?config, "Configuration loaded");

    let store = PublisherStore::open(&config.store)
        .await
        .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?;

    if config.admin_token.is_none() {
        warn!("ADMIN_TOKEN not set; publisher management API is unauthenticated");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = match &config.twitch {
        Some(twitch) => {
            let client = TwitchClient::new(
                TwitchConfig::new(
                    twitch.client_id.clone(),
                    twitch.client_secret.clone(),
                    twitch.scheduler.request_timeout,
                ),
                store.clone(),
            )
            .context("Failed to build Twitch client")?;

            let sink: Arc<dyn NotificationSink> = match &config.discord {
                Some(discord) => Arc::new(
                    DiscordSink::new(discord.webhook_url.clone())
                        .context("Failed to build Discord client")?,
                ),
                None => Arc::new(LogSink),
            };

            let dispatcher = NotificationDispatcher::new(store.clone(), sink);
            let scheduler =
                LiveStatusScheduler::new(store.clone(), Arc::new(client), dispatcher, twitch.scheduler);
            Some(scheduler.spawn(shutdown_rx))
        }
        None => {
            if config.discord.is_some() {
                warn!("DISCORD_ENABLED has no effect while TWITCH_ENABLED is off");
            }
            info!("Twitch integration disabled; live status scheduler not started");
            None
        }
    };

    let state = web::Data::new(AppState::new(store.clone(), &config));
    let bind_address = config.server.bind_address();
    info!("Starting rtmpauth-service on {}", bind_address);

    let server_result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run()
    .await;

    info!("HTTP server stopped, shutting down scheduler");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "Live status scheduler task failed");
        }
    }
    store.close().await;

    server_result.context("HTTP server error")
}
