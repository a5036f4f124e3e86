//! Subscription state as reported by the billing backend.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// An account with an active (paid or gifted) subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    /// Backend account id.
    pub user_id: String,
    /// Discord user id, as a decimal string.
    pub discord_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
}

/// An account whose subscription lapsed but is still inside the grace window.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraceUser {
    pub user_id: String,
    pub discord_id: String,
    #[serde(rename = "gracePeriodEndsAt")]
    pub grace_ends_at: DateTime<Utc>,
    /// Whether the user wants daily reminder DMs during the grace period.
    #[serde(default = "default_dm_enabled")]
    pub dm_enabled: bool,
}

fn default_dm_enabled() -> bool {
    true
}

/// Whole days of grace access left, rounded up and floored at zero.
///
/// A user whose window ends in one second still has a day of access; a user
/// whose window ended in the past has zero.
pub fn days_remaining(now: DateTime<Utc>, grace_ends_at: DateTime<Utc>) -> i64 {
    let seconds = (grace_ends_at - now).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds as u64).div_ceil(86_400) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_days_remaining_boundaries() {
        let now = Utc::now();

        assert_eq!(days_remaining(now, now), 0);
        assert_eq!(days_remaining(now, now - Duration::days(3)), 0);
        assert_eq!(days_remaining(now, now + Duration::seconds(1)), 1);
        assert_eq!(days_remaining(now, now + Duration::days(1)), 1);
        assert_eq!(
            days_remaining(now, now + Duration::days(1) + Duration::seconds(1)),
            2
        );
        assert_eq!(days_remaining(now, now + Duration::days(7)), 7);
    }

    #[test]
    fn test_subscriber_wire_format() {
        let raw = r#"{
            "userId": "u_123",
            "discordId": "111222333444555666",
            "expiresAt": "2026-09-01T00:00:00Z",
            "isActive": true
        }"#;
        let sub: Subscriber = serde_json::from_str(raw).unwrap();
        assert_eq!(sub.user_id, "u_123");
        assert_eq!(sub.discord_id, "111222333444555666");
        assert!(sub.is_active);
    }

    #[test]
    fn test_grace_user_wire_format_defaults_dm_on() {
        let raw = r#"{
            "userId": "u_456",
            "discordId": "999888777666555444",
            "gracePeriodEndsAt": "2026-08-15T12:00:00Z"
        }"#;
        let user: GraceUser = serde_json::from_str(raw).unwrap();
        assert_eq!(user.user_id, "u_456");
        assert!(user.dm_enabled);
    }
}
