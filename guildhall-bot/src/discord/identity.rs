//! Posting under a managed webhook identity.
//!
//! Welcome messages and staff-managed messages go out through a channel
//! webhook with a configured persona name and avatar instead of the bot's
//! own identity. Webhooks live on regular channels, so posts into threads
//! and forum posts route through the parent channel's webhook.

use std::sync::Arc;

use guildhall_core::Config;
use serenity::builder::{
    CreateEmbed, CreateWebhook, EditWebhookMessage, ExecuteWebhook,
};
use serenity::http::Http;
use serenity::model::channel::{Channel, Message};
use serenity::model::id::{ChannelId, MessageId};
use serenity::model::webhook::Webhook;
use tracing::info;

/// Webhook name for staff-managed messages.
pub(super) const MANAGER_WEBHOOK: &str = "Message Manager";
/// Webhook name for member welcomes.
pub(super) const WELCOME_WEBHOOK: &str = "Welcome Bot";

/// Where a channel's webhook actually lives: threads and forum posts use
/// the parent channel and pass the thread id along with the execute call.
pub(super) struct WebhookAnchor {
    pub channel: ChannelId,
    pub thread: Option<ChannelId>,
}

pub(super) async fn webhook_anchor(
    http: &Http,
    channel: ChannelId,
) -> Result<WebhookAnchor, serenity::Error> {
    if let Channel::Guild(guild_channel) = channel.to_channel(http).await?
        && guild_channel.thread_metadata.is_some()
        && let Some(parent) = guild_channel.parent_id
    {
        return Ok(WebhookAnchor {
            channel: parent,
            thread: Some(channel),
        });
    }
    Ok(WebhookAnchor {
        channel,
        thread: None,
    })
}

pub(super) async fn get_or_create_webhook(
    http: &Http,
    channel: ChannelId,
    name: &str,
) -> Result<Webhook, serenity::Error> {
    let hooks = channel.webhooks(http).await?;
    if let Some(hook) = hooks.into_iter().find(|w| w.name.as_deref() == Some(name)) {
        return Ok(hook);
    }
    let hook = channel
        .create_webhook(http, CreateWebhook::new(name))
        .await?;
    info!(channel = channel.get(), name, "Created managed webhook");
    Ok(hook)
}

fn with_persona(builder: ExecuteWebhook, config: &Config) -> ExecuteWebhook {
    let mut builder = builder.username(&config.persona_name);
    if let Some(avatar) = &config.persona_avatar_url {
        builder = builder.avatar_url(avatar);
    }
    builder
}

/// Send `content` into a channel (or thread) as the persona. Returns the
/// created message so callers can link to it.
pub(super) async fn post_as_persona(
    http: &Arc<Http>,
    config: &Config,
    channel: ChannelId,
    content: &str,
) -> Result<Message, serenity::Error> {
    let anchor = webhook_anchor(http, channel).await?;
    let webhook = get_or_create_webhook(http, anchor.channel, MANAGER_WEBHOOK).await?;

    let mut builder = with_persona(ExecuteWebhook::new().content(content), config);
    if let Some(thread) = anchor.thread {
        builder = builder.in_thread(thread);
    }

    let message = webhook.execute(http, true, builder).await?;
    message.ok_or(serenity::Error::Other("webhook returned no message"))
}

/// Create a forum post titled `title` as the persona. Returns the thread
/// starter message.
pub(super) async fn post_forum_thread(
    http: &Arc<Http>,
    config: &Config,
    forum: ChannelId,
    title: &str,
    content: &str,
) -> Result<Message, serenity::Error> {
    let webhook = get_or_create_webhook(http, forum, MANAGER_WEBHOOK).await?;
    let builder = with_persona(
        ExecuteWebhook::new().content(content).thread_name(title.to_string()),
        config,
    );
    let message = webhook.execute(http, true, builder).await?;
    message.ok_or(serenity::Error::Other("webhook returned no message"))
}

/// Edit a message in place. Webhook-authored messages can only be edited
/// through their own webhook; plain bot messages are edited directly.
pub(super) async fn edit_managed_message(
    http: &Arc<Http>,
    channel: ChannelId,
    message_id: MessageId,
    new_content: &str,
) -> Result<(), serenity::Error> {
    let message = channel.message(http, message_id).await?;

    let Some(webhook_id) = message.webhook_id else {
        channel
            .edit_message(
                http,
                message_id,
                serenity::builder::EditMessage::new().content(new_content),
            )
            .await?;
        return Ok(());
    };

    let anchor = webhook_anchor(http, channel).await?;
    let hooks = anchor.channel.webhooks(http).await?;
    let Some(webhook) = hooks.into_iter().find(|w| w.id == webhook_id) else {
        return Err(serenity::Error::Other(
            "could not find the webhook for this message",
        ));
    };

    let mut builder = EditWebhookMessage::new().content(new_content);
    if let Some(thread) = anchor.thread {
        builder = builder.in_thread(thread);
    }
    webhook.edit_message(http, message_id, builder).await?;
    Ok(())
}

/// Post the welcome embed for a new member as the welcome persona.
pub(super) async fn post_welcome(
    http: &Arc<Http>,
    config: &Config,
    channel: ChannelId,
    member_mention: &str,
    member_name: &str,
) -> Result<(), serenity::Error> {
    let staff_ping = config
        .staff_role_id
        .map(|id| format!("<@&{id}>"))
        .unwrap_or_else(|| "the staff".to_string());

    let mut embed = CreateEmbed::new()
        .color(0xB8860B) // guild gold
        .title(format!("Welcome to the Guildhall, {member_name}!"))
        .description(format!(
            "Greetings, traveler! The guildhall welcomes you.\n\n\
             **Not Yet a Member?**\n\
             Visit {} for information on joining and gaining access to all \
             our adventures.\n\n\
             **Already Subscribed?**\n\
             You should receive a private message confirmation shortly. If \
             you don't see it, check your DM settings.\n\n\
             **Questions?**\n\
             Feel free to ping {staff_ping} and we'll be happy to assist \
             you.\n\n\
             *May your dice roll high and your blades stay sharp!*",
            config.website_url
        ))
        .timestamp(serenity::model::timestamp::Timestamp::now());
    if let Some(image) = &config.welcome_image_url {
        embed = embed.image(image);
    }

    let webhook = get_or_create_webhook(http, channel, WELCOME_WEBHOOK).await?;
    let builder = with_persona(
        ExecuteWebhook::new().content(member_mention).embed(embed),
        config,
    );
    webhook.execute(http, false, builder).await?;
    Ok(())
}
