use std::sync::Arc;
use std::sync::atomic::Ordering;

use serenity::async_trait;
use serenity::model::application::{Command, Interaction};
use serenity::model::channel::{Message, Reaction, ReactionType};
use serenity::gateway::ActivityData;
use serenity::model::gateway::Ready;
use serenity::model::guild::Member;
use serenity::model::id::{ChannelId, UserId};
use serenity::model::mention::Mentionable;
use serenity::prelude::*;
use tracing::{error, info};

use crate::backend::SubscriptionSource;
use crate::scheduler;
use crate::starboard::{MirrorSource, STAR_EMOJI};
use crate::state::AppState;

use super::{commands, identity};

/// Discord bot handler
///
/// Thin dispatch layer: reaction events feed the starboard engine, the
/// `ready` hook starts the reconciliation schedule, and interactions are
/// routed to the command/button/modal handlers.
pub struct Bot {
    pub(super) state: Arc<AppState>,
    bot_user_id: std::sync::OnceLock<UserId>,
}

impl Bot {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            bot_user_id: std::sync::OnceLock::new(),
        }
    }
}

#[async_trait]
impl EventHandler for Bot {
    /// Bot is ready: register slash commands and start the daily sync.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
        let _ = self.bot_user_id.set(ready.user.id);

        ctx.set_activity(Some(ActivityData::watching("subscriptions")));

        if let Err(e) =
            Command::set_global_commands(&ctx.http, commands::command_definitions()).await
        {
            error!("Failed to register slash commands: {}", e);
        }

        // Gateway reconnects fire `ready` again; only the first one starts
        // the scheduler and the startup pass.
        if self.state.services_started.swap(true, Ordering::SeqCst) {
            return;
        }

        scheduler::start_sync_scheduler(Arc::clone(&self.state));

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            info!("Performing initial sync on startup");
            scheduler::run_sync_pass(&state).await;
        });
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        if let Some((source, reactor)) = self.star_event(&ctx, &reaction).await {
            self.state.starboard.on_reaction_add(&source, reactor).await;
        }
    }

    async fn reaction_remove(&self, ctx: Context, reaction: Reaction) {
        if let Some((source, reactor)) = self.star_event(&ctx, &reaction).await {
            self.state
                .starboard
                .on_reaction_remove(&source, reactor)
                .await;
        }
    }

    /// DM keywords toggle the grace-period reminder preference.
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.guild_id.is_some() {
            return;
        }

        match msg.content.trim().to_uppercase().as_str() {
            "STOP" => {
                let _ = msg
                    .reply(
                        &ctx.http,
                        "You've opted out of grace period reminders. You can opt \
                         back in anytime by replying with \"START\".",
                    )
                    .await;
                if let Err(e) = self
                    .state
                    .backend
                    .set_dm_preference(&msg.author.id.to_string(), false)
                    .await
                {
                    error!("Failed to store DM opt-out: {}", e);
                }
                info!(user = msg.author.id.get(), "User opted out of grace period DMs");
            }
            "START" => {
                let _ = msg
                    .reply(
                        &ctx.http,
                        "You've opted back in to grace period reminders. You'll \
                         receive daily reminders during your grace period.",
                    )
                    .await;
                if let Err(e) = self
                    .state
                    .backend
                    .set_dm_preference(&msg.author.id.to_string(), true)
                    .await
                {
                    error!("Failed to store DM opt-in: {}", e);
                }
                info!(user = msg.author.id.get(), "User opted in to grace period DMs");
            }
            _ => {}
        }
    }

    /// Welcome new members and shortcut the role grant for subscribers.
    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        info!(member = member.user.id.get(), "New member joined");

        if let Some(channel) = self.state.config.welcome_channel_id.map(ChannelId::new)
            && let Err(e) = identity::post_welcome(
                &ctx.http,
                &self.state.config,
                channel,
                &member.mention().to_string(),
                member.display_name(),
            )
            .await
        {
            error!(member = member.user.id.get(), "Failed to send welcome message: {}", e);
        }

        // Subscribers who (re)join get their role back without waiting for
        // the nightly pass.
        match self.state.backend.active_subscribers().await {
            Ok(subscribers) => {
                let id = member.user.id.to_string();
                if subscribers.iter().any(|s| s.discord_id == id) {
                    if let Err(e) = self
                        .state
                        .roles
                        .grant_subscriber_role(member.user.id, "Subscription active")
                        .await
                    {
                        error!(member = member.user.id.get(), "Failed to grant role on join: {}", e);
                        return;
                    }
                    self.state.notifier.subscription_confirmed(member.user.id).await;
                    info!(member = member.user.id.get(), "Subscriber joined - role added");
                }
            }
            Err(e) => error!("Failed to check subscriber status for new member: {}", e),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        self.handle_interaction(ctx, interaction).await;
    }
}

impl Bot {
    /// Filter a gateway reaction down to a starboard event: star emoji,
    /// human reactor, full message fetched.
    async fn star_event(
        &self,
        ctx: &Context,
        reaction: &Reaction,
    ) -> Option<(MirrorSource, UserId)> {
        if !matches!(&reaction.emoji, ReactionType::Unicode(e) if e == STAR_EMOJI) {
            return None;
        }
        let reactor = reaction.user_id?;
        if Some(&reactor) == self.bot_user_id.get() {
            return None;
        }
        if reaction.member.as_ref().is_some_and(|m| m.user.bot) {
            return None;
        }

        let message = match reaction.message(&ctx.http).await {
            Ok(m) => m,
            Err(e) => {
                error!("Failed to fetch reacted message: {}", e);
                return None;
            }
        };

        Some((mirror_source(&message), reactor))
    }
}

fn mirror_source(message: &Message) -> MirrorSource {
    let mut image_url = None;
    let mut attachment_link = None;
    if let Some(attachment) = message.attachments.first() {
        if attachment.width.is_some() && attachment.height.is_some() {
            image_url = Some(attachment.url.clone());
        } else {
            attachment_link = Some((attachment.filename.clone(), attachment.url.clone()));
        }
    }

    MirrorSource {
        message_id: message.id,
        channel_id: message.channel_id,
        author_id: message.author.id,
        author_name: message
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| message.author.name.clone()),
        author_avatar_url: Some(message.author.face()),
        content: message.content.clone(),
        image_url,
        attachment_link,
        jump_url: message.link(),
        timestamp: *message.timestamp,
    }
}
