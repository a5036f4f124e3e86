//! Direct-message notifications for subscription lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::CreateMessage;
use serenity::http::Http;
use serenity::model::id::UserId;
use tracing::{debug, info};

/// Outbound DM capability used by the sync engine and the webhook handler.
///
/// Delivery is best-effort by contract: closed DMs are routine, so
/// implementations log failures instead of propagating them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Payment confirmed (or subscriber joined): welcome them in.
    async fn subscription_confirmed(&self, user: UserId);

    /// Daily grace-period reminder with the remaining day count.
    async fn grace_reminder(&self, user: UserId, days_remaining: i64);

    /// Grace period ran out and the role was removed.
    async fn subscription_expired(&self, user: UserId);
}

pub struct DiscordNotifier {
    http: Arc<Http>,
    website_url: String,
    checkout_url: String,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, website_url: &str, checkout_url: &str) -> Self {
        Self {
            http,
            website_url: website_url.to_string(),
            checkout_url: checkout_url.to_string(),
        }
    }

    async fn send_dm(&self, user: UserId, text: String) {
        let channel = match user.create_dm_channel(&self.http).await {
            Ok(c) => c,
            Err(e) => {
                debug!(user = user.get(), "Could not open DM channel: {e}");
                return;
            }
        };
        match channel
            .send_message(&self.http, CreateMessage::new().content(text))
            .await
        {
            Ok(_) => info!(user = user.get(), "Sent notification DM"),
            Err(e) => debug!(user = user.get(), "Could not deliver DM (closed DMs?): {e}"),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn subscription_confirmed(&self, user: UserId) {
        self.send_dm(
            user,
            format!(
                "🎉 **Your Guildhall subscription is active!**\n\n\
                 You now have the Subscribed role and access to all member \
                 channels. Manage your subscription anytime at {}.",
                self.website_url
            ),
        )
        .await;
    }

    async fn grace_reminder(&self, user: UserId, days_remaining: i64) {
        let day_word = if days_remaining == 1 { "day" } else { "days" };
        self.send_dm(
            user,
            format!(
                "⏳ **Subscription reminder**\n\n\
                 Your subscription has lapsed. You keep member access for \
                 **{days_remaining} more {day_word}** — renew at {} to keep \
                 your seat at the table.\n\n\
                 Reply STOP to mute these reminders, START to resume them.",
                self.checkout_url
            ),
        )
        .await;
    }

    async fn subscription_expired(&self, user: UserId) {
        self.send_dm(
            user,
            format!(
                "Your grace period has ended and the Subscribed role has been \
                 removed. We'd love to have you back — you can resubscribe \
                 anytime at {}.",
                self.checkout_url
            ),
        )
        .await;
    }
}
