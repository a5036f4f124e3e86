mod bot;
mod commands;
mod identity;
mod interactions;

use std::sync::Arc;

use serenity::client::ClientBuilder;
use serenity::http::Http;
use serenity::prelude::*;
use tracing::info;

pub use bot::Bot;

/// Build the gateway client around an already-shared HTTP handle so the
/// sync engine, notifier, and starboard talk through the same REST client.
pub async fn start_discord_bot(
    http: Arc<Http>,
    state: Arc<crate::state::AppState>,
) -> Result<Client, DiscordError> {
    info!("Starting Discord bot...");

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let bot = Bot::new(state);

    let client = ClientBuilder::new_with_http(http, intents)
        .event_handler(bot)
        .await
        .map_err(|e| DiscordError::ClientError(e.to_string()))?;

    Ok(client)
}

/// Discord-related errors
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("Failed to create Discord client: {0}")]
    ClientError(String),
}
