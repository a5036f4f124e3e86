//! Subscribed-role operations against the guild.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::id::{GuildId, RoleId, UserId};
use tracing::debug;

/// Errors from role lookups and mutations against the platform.
///
/// Permission failures get their own variant so operators can tell a
/// role-hierarchy problem apart from transport noise.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("missing permission to manage the subscribed role: {0}")]
    Permission(String),
    #[error("platform error: {0}")]
    Platform(String),
}

/// Minimal view of the guild's subscribed role.
///
/// The daily sync and the payment webhook drive everything through this
/// trait, so tests substitute an in-memory fake instead of a live guild.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn has_subscriber_role(&self, user: UserId) -> Result<bool, RoleError>;

    /// Grant the subscribed role. Granting a role the member already holds
    /// succeeds as a no-op; callers never pre-check membership.
    async fn grant_subscriber_role(&self, user: UserId, reason: &str) -> Result<(), RoleError>;

    /// Revoke the subscribed role. Revoking a role the member does not hold
    /// succeeds as a no-op.
    async fn revoke_subscriber_role(&self, user: UserId, reason: &str) -> Result<(), RoleError>;

    /// Every member currently holding the subscribed role.
    async fn subscriber_role_holders(&self) -> Result<Vec<UserId>, RoleError>;
}

pub struct DiscordRoleDirectory {
    http: Arc<Http>,
    guild_id: GuildId,
    role_id: RoleId,
}

impl DiscordRoleDirectory {
    pub fn new(http: Arc<Http>, guild_id: u64, subscribed_role_id: u64) -> Self {
        Self {
            http,
            guild_id: GuildId::new(guild_id),
            role_id: RoleId::new(subscribed_role_id),
        }
    }

    fn map_err(err: serenity::Error) -> RoleError {
        if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(ref resp)) = err
            && resp.status_code == serenity::http::StatusCode::FORBIDDEN
        {
            return RoleError::Permission(err.to_string());
        }
        RoleError::Platform(err.to_string())
    }
}

#[async_trait]
impl RoleDirectory for DiscordRoleDirectory {
    async fn has_subscriber_role(&self, user: UserId) -> Result<bool, RoleError> {
        let member = self
            .guild_id
            .member(&self.http, user)
            .await
            .map_err(Self::map_err)?;
        Ok(member.roles.contains(&self.role_id))
    }

    async fn grant_subscriber_role(&self, user: UserId, reason: &str) -> Result<(), RoleError> {
        if self.has_subscriber_role(user).await? {
            debug!(user = user.get(), "member already has subscribed role");
            return Ok(());
        }
        self.http
            .add_member_role(self.guild_id, user, self.role_id, Some(reason))
            .await
            .map_err(Self::map_err)
    }

    async fn revoke_subscriber_role(&self, user: UserId, reason: &str) -> Result<(), RoleError> {
        if !self.has_subscriber_role(user).await? {
            debug!(user = user.get(), "member does not have subscribed role");
            return Ok(());
        }
        self.http
            .remove_member_role(self.guild_id, user, self.role_id, Some(reason))
            .await
            .map_err(Self::map_err)
    }

    async fn subscriber_role_holders(&self) -> Result<Vec<UserId>, RoleError> {
        // The member list endpoint pages at 1000 entries.
        let mut holders = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let batch = self
                .guild_id
                .members(&self.http, Some(1000), after)
                .await
                .map_err(Self::map_err)?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.user.id);
            let full_page = batch.len() == 1000;
            holders.extend(
                batch
                    .into_iter()
                    .filter(|m| m.roles.contains(&self.role_id))
                    .map(|m| m.user.id),
            );
            if !full_page {
                break;
            }
        }
        Ok(holders)
    }
}
