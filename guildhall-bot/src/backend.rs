//! HTTP client for the billing backend's admin API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guildhall_core::{GraceUser, Subscriber};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

/// Errors that can occur when calling the backend API
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl BackendError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Api { status, .. } => Some(*status),
            BackendError::Http(_) => None,
        }
    }
}

/// Read/mutate view of subscription state, as far as the bot needs it.
///
/// `BackendClient` is the production implementation; the reconciliation
/// tests run against a canned in-memory source.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>, BackendError>;

    async fn grace_period_users(&self) -> Result<Vec<GraceUser>, BackendError>;

    /// Remove a user from the grace period after a renewal.
    async fn end_grace_period(&self, user_id: &str, discord_id: &str) -> Result<(), BackendError>;

    /// Close out a grace period that ran down to zero days.
    async fn expire_grace_period(
        &self,
        user_id: &str,
        discord_id: &str,
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Deserialize)]
struct SubscribersResponse {
    #[serde(default)]
    subscribers: Vec<Subscriber>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GracePeriodResponse {
    #[serde(default)]
    grace_period_users: Vec<GraceUser>,
}

#[derive(Debug, Deserialize)]
struct GiftResponse {
    user: GiftedUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GiftedUser {
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BackendClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create a new backend client with bearer authentication
    pub fn new(base_url: impl Into<String>, api_token: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(mut auth) = HeaderValue::from_str(&format!("Bearer {api_token}")) {
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        Err(BackendError::Api { status, message })
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<(), BackendError> {
        let resp = self.http_client.post(self.url(path)).json(&body).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Grant a gift subscription and return its expiry timestamp.
    pub async fn gift_subscription(
        &self,
        discord_id: &str,
        duration: &str,
        reason: &str,
    ) -> Result<DateTime<Utc>, BackendError> {
        let resp = self
            .http_client
            .post(self.url("/api/admin/subscriptions/gift"))
            .json(&json!({
                "discordId": discord_id,
                "duration": duration,
                "reason": reason,
            }))
            .send()
            .await?;
        let body: GiftResponse = Self::check(resp).await?.json().await?;
        info!(discord_id, duration, "Granted gift subscription");
        Ok(body.user.expires_at)
    }

    /// Update whether a user receives grace-period reminder DMs.
    pub async fn set_dm_preference(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<(), BackendError> {
        let resp = self
            .http_client
            .put(self.url(&format!("/api/admin/users/{user_id}/grace-dm-preference")))
            .json(&json!({ "dmEnabled": enabled }))
            .send()
            .await?;
        Self::check(resp).await?;
        info!(user_id, enabled, "Updated grace period DM preference");
        Ok(())
    }

    /// Append an entry to the backend audit log. Fire-and-forget: audit
    /// failures never block the action being audited.
    pub async fn audit_log(&self, user_id: &str, action: &str, payload: Value) {
        let body = json!({
            "userId": user_id,
            "eventType": format!("bot.{action}"),
            "payload": payload,
        });
        if let Err(e) = self.post_json("/api/admin/audit-log", body).await {
            error!(user_id, action, "Failed to write audit log entry: {e}");
        }
    }
}

#[async_trait]
impl SubscriptionSource for BackendClient {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>, BackendError> {
        let resp = self
            .http_client
            .get(self.url("/api/admin/subscribers"))
            .send()
            .await?;
        let body: SubscribersResponse = Self::check(resp).await?.json().await?;
        Ok(body.subscribers)
    }

    async fn grace_period_users(&self) -> Result<Vec<GraceUser>, BackendError> {
        let resp = self
            .http_client
            .get(self.url("/api/admin/grace-period"))
            .send()
            .await?;
        let body: GracePeriodResponse = Self::check(resp).await?.json().await?;
        Ok(body.grace_period_users)
    }

    async fn end_grace_period(&self, user_id: &str, discord_id: &str) -> Result<(), BackendError> {
        self.post_json(
            "/api/admin/grace-period/remove",
            json!({ "userId": user_id, "discordId": discord_id }),
        )
        .await?;
        info!(user_id, discord_id, "Removed user from grace period");
        Ok(())
    }

    async fn expire_grace_period(
        &self,
        user_id: &str,
        discord_id: &str,
    ) -> Result<(), BackendError> {
        self.post_json(
            "/api/admin/grace-period/expire",
            json!({ "userId": user_id, "discordId": discord_id }),
        )
        .await?;
        info!(user_id, discord_id, "Expired grace period");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_response_tolerates_missing_list() {
        let body: SubscribersResponse = serde_json::from_str("{}").unwrap();
        assert!(body.subscribers.is_empty());

        let body: GracePeriodResponse = serde_json::from_str("{}").unwrap();
        assert!(body.grace_period_users.is_empty());
    }

    #[test]
    fn test_gift_response_wire_format() {
        let raw = r#"{"user": {"expiresAt": "2026-09-07T00:00:00Z"}}"#;
        let body: GiftResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.user.expires_at.to_rfc3339(), "2026-09-07T00:00:00+00:00");
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let client = BackendClient::new("http://localhost:3000/", "secret");
        assert_eq!(
            client.url("/api/admin/subscribers"),
            "http://localhost:3000/api/admin/subscribers"
        );
    }
}
