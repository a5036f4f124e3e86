use std::sync::Arc;

use serenity::http::Http;
use serenity::model::id::ChannelId;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guildhall_bot::backend::BackendClient;
use guildhall_bot::discord::start_discord_bot;
use guildhall_bot::notify::{DiscordNotifier, Notifier};
use guildhall_bot::roles::{DiscordRoleDirectory, RoleDirectory};
use guildhall_bot::server;
use guildhall_bot::starboard::{DiscordBoardHost, Starboard};
use guildhall_bot::state::AppState;
use guildhall_bot::sync::SyncService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; missing secrets abort before any event handling
    let config = guildhall_core::Config::from_env()?;
    info!(
        guild = config.guild_id,
        starboard = ?config.starboard_channel_id,
        "Configuration loaded"
    );

    let backend = Arc::new(BackendClient::new(
        &config.backend_api_url,
        &config.backend_api_token,
    ));

    // One REST handle shared by the gateway client and every service.
    let http = Arc::new(Http::new(&config.discord_token));

    let roles: Arc<dyn RoleDirectory> = Arc::new(DiscordRoleDirectory::new(
        Arc::clone(&http),
        config.guild_id,
        config.subscribed_role_id,
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(
        Arc::clone(&http),
        &config.website_url,
        &config.checkout_url,
    ));
    let sync = Arc::new(SyncService::new(
        Arc::clone(&backend),
        Arc::clone(&roles),
        Arc::clone(&notifier),
        config.grace_dm_enabled,
    ));
    let starboard = Arc::new(Starboard::new(
        Arc::new(DiscordBoardHost::new(Arc::clone(&http))),
        config.starboard_channel_id.map(ChannelId::new),
        config.starboard_threshold,
    ));

    let state = Arc::new(AppState::new(
        config, backend, roles, notifier, sync, starboard,
    ));

    // Start the gateway client in the background
    let mut client = start_discord_bot(http, Arc::clone(&state)).await?;
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            error!("Discord client error: {}", e);
        }
    });

    // Run the webhook server (this blocks)
    let bind_addr = state.config.bind_addr();
    info!("Starting webhook server on {}", bind_addr);
    let server_result = server::run(Arc::clone(&state), &bind_addr).await;

    // If we get here, the server stopped
    gateway_task.abort();
    server_result
}
