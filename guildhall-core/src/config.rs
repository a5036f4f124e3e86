use std::env;

/// Load .env file if it exists (called automatically when using `from_env`)
pub fn load_dotenv() {
    // Silently ignore errors (file might not exist)
    let _ = dotenvy::dotenv();
}

/// One self-assignable role behind a button.
#[derive(Debug, Clone)]
pub struct RoleButton {
    pub label: String,
    pub role_id: u64,
    pub emoji: Option<String>,
}

/// A group of self-assignable roles presented as one button message.
///
/// `exclusive` sets pick-one semantics (selecting a role clears its
/// siblings); non-exclusive sets are plain toggles.
#[derive(Debug, Clone)]
pub struct RoleSet {
    pub key: String,
    pub title: String,
    pub description: String,
    pub exclusive: bool,
    pub roles: Vec<RoleButton>,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,
    /// Guild the bot manages
    pub guild_id: u64,
    /// Role granted to active subscribers and grace-period users
    pub subscribed_role_id: u64,
    /// Staff role gating the management slash commands
    pub staff_role_id: Option<u64>,
    /// Channel that receives the welcome message for new members
    pub welcome_channel_id: Option<u64>,
    pub welcome_image_url: Option<String>,
    /// Billing backend admin API
    pub backend_api_url: String,
    pub backend_api_token: String,
    /// Webhook server bind address (default: 127.0.0.1:3001)
    pub webhook_host: String,
    pub webhook_port: u16,
    /// Starboard is disabled when no channel is configured
    pub starboard_channel_id: Option<u64>,
    pub starboard_threshold: u32,
    /// Full grace window length, used for the first reminder
    pub grace_period_days: i64,
    pub grace_dm_enabled: bool,
    /// Five-field cron expression for the reconciliation pass
    pub daily_sync_schedule: String,
    pub website_url: String,
    pub checkout_url: String,
    /// Display identity for webhook-authored posts (welcome, managed messages)
    pub persona_name: String,
    pub persona_avatar_url: Option<String>,
    /// Self-serve role sets, assembled from the per-role id variables
    pub role_sets: Vec<RoleSet>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// This function automatically loads a .env file from the project root if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();

        Self::from_env_inner()
    }

    /// Internal method to load from env without loading .env
    fn from_env_inner() -> Result<Self, ConfigError> {
        let discord_token = require_var("DISCORD_BOT_TOKEN")?;
        let guild_id = require_id("DISCORD_GUILD_ID")?;
        let subscribed_role_id = require_id("DISCORD_SUBSCRIBED_ROLE_ID")?;
        let backend_api_token = require_var("BACKEND_API_TOKEN")?;
        if backend_api_token.len() < 32 {
            return Err(ConfigError::InvalidVar {
                name: "BACKEND_API_TOKEN".to_string(),
                reason: "must be at least 32 characters long".to_string(),
            });
        }

        Ok(Self {
            discord_token,
            guild_id,
            subscribed_role_id,
            staff_role_id: optional_id("DISCORD_STAFF_ROLE_ID")?,
            welcome_channel_id: optional_id("DISCORD_WELCOME_CHANNEL_ID")?,
            welcome_image_url: env::var("WELCOME_IMAGE_URL").ok(),
            backend_api_url: env::var("BACKEND_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            backend_api_token,
            webhook_host: env::var("WEBHOOK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            webhook_port: env::var("WEBHOOK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            starboard_channel_id: optional_id("STARBOARD_CHANNEL_ID")?,
            starboard_threshold: env::var("STARBOARD_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            grace_period_days: env::var("GRACE_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            grace_dm_enabled: env::var("GRACE_PERIOD_DM_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),
            daily_sync_schedule: env::var("DAILY_SYNC_SCHEDULE")
                .unwrap_or_else(|_| "59 23 * * *".to_string()),
            website_url: env::var("WEBSITE_URL")
                .unwrap_or_else(|_| "https://triboar.guild".to_string()),
            checkout_url: env::var("CHECKOUT_URL")
                .unwrap_or_else(|_| "https://triboar.guild/checkout/".to_string()),
            persona_name: env::var("PERSONA_NAME")
                .unwrap_or_else(|_| "Big Al, Sheriff of Triboar".to_string()),
            persona_avatar_url: env::var("PERSONA_AVATAR_URL").ok(),
            role_sets: load_role_sets()?,
        })
    }

    /// Get the bind address for the webhook server
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.webhook_host, self.webhook_port)
    }

    pub fn role_set(&self, key: &str) -> Option<&RoleSet> {
        self.role_sets.iter().find(|s| s.key == key)
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn require_id(name: &str) -> Result<u64, ConfigError> {
    parse_id(name, &require_var(name)?)
}

fn optional_id(name: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => parse_id(name, &raw).map(Some),
        _ => Ok(None),
    }
}

fn parse_id(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidVar {
        name: name.to_string(),
        reason: format!("expected a numeric snowflake, got '{raw}'"),
    })
}

/// Assemble the self-serve role sets from the per-role id variables.
///
/// Unset ids simply drop that button; a set with no configured roles is
/// dropped entirely, so deployments opt in per set.
fn load_role_sets() -> Result<Vec<RoleSet>, ConfigError> {
    let mut sets = Vec::new();

    let pronouns = [
        ("She/Her", "DISCORD_GENDER_SHE_HER_ROLE_ID", "🟥"),
        ("He/Him", "DISCORD_GENDER_HE_HIM_ROLE_ID", "🟦"),
        ("She/Them", "DISCORD_GENDER_SHE_THEM_ROLE_ID", "🟩"),
        ("He/Them", "DISCORD_GENDER_HE_THEM_ROLE_ID", "🟪"),
        ("They/Them", "DISCORD_GENDER_THEY_THEM_ROLE_ID", "🟧"),
        ("Other/Neopronoun", "DISCORD_GENDER_ASK_ROLE_ID", "⬜"),
    ];
    push_set(
        &mut sets,
        "pronouns",
        "Player's Pronouns",
        "Please select your preferred pronouns below so others know how to \
         address you. You can select multiple options, and you can change \
         your selection at any time by clicking the buttons again.",
        false,
        &pronouns,
    )?;

    let pm = [
        ("OK to PM", "DISCORD_PM_OK_ROLE_ID", "✅"),
        ("Ask to PM", "DISCORD_PM_ASK_ROLE_ID", "❔"),
        ("No PMs", "DISCORD_PM_NO_ROLE_ID", "🚫"),
    ];
    push_set(
        &mut sets,
        "pm",
        "💬 PM/DM Preferences",
        "Click a button below to set your PM/DM preference.\n\n\
         **You can only have ONE of these roles at a time.**",
        true,
        &pm,
    )?;

    let interests = [
        ("Survivalist", "DISCORD_SURVIVALIST_ROLE_ID", "🏕️"),
        ("Crafter", "DISCORD_CRAFTER_ROLE_ID", "⚒️"),
        ("Quest Seeker", "DISCORD_QUEST_SEEKER_ROLE_ID", "🗺️"),
    ];
    push_set(
        &mut sets,
        "interests",
        "Interest Notifications",
        "Pick the activities you want to be pinged about. Toggle a button \
         again to stop the notifications.",
        false,
        &interests,
    )?;

    let regions = [
        ("Africa", "DISCORD_REGION_AFRICA_ROLE_ID", "🌍"),
        ("Asia", "DISCORD_REGION_ASIA_ROLE_ID", "🌏"),
        ("Europe", "DISCORD_REGION_EUROPE_ROLE_ID", "🌍"),
        ("North America", "DISCORD_REGION_NORTH_AMERICA_ROLE_ID", "🌎"),
        ("Oceania", "DISCORD_REGION_OCEANIA_ROLE_ID", "🌏"),
        ("South America", "DISCORD_REGION_SOUTH_AMERICA_ROLE_ID", "🌎"),
    ];
    push_set(
        &mut sets,
        "regions",
        "Where in the World?",
        "Select your region so game organizers can plan around time zones. \
         Toggle to change or remove your selection.",
        false,
        &regions,
    )?;

    Ok(sets)
}

fn push_set(
    sets: &mut Vec<RoleSet>,
    key: &str,
    title: &str,
    description: &str,
    exclusive: bool,
    entries: &[(&str, &str, &str)],
) -> Result<(), ConfigError> {
    let mut roles = Vec::new();
    for (label, var, emoji) in entries {
        if let Some(role_id) = optional_id(var)? {
            roles.push(RoleButton {
                label: (*label).to_string(),
                role_id,
                emoji: Some((*emoji).to_string()),
            });
        }
    }
    if !roles.is_empty() {
        sets.push(RoleSet {
            key: key.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            exclusive,
            roles,
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    const TEST_TOKEN: &str = "0123456789abcdef0123456789abcdef";

    // Process environment is shared across test threads; serialize access.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_env() {
        const VARS: &[&str] = &[
            "DISCORD_BOT_TOKEN",
            "DISCORD_GUILD_ID",
            "DISCORD_SUBSCRIBED_ROLE_ID",
            "DISCORD_STAFF_ROLE_ID",
            "DISCORD_WELCOME_CHANNEL_ID",
            "WELCOME_IMAGE_URL",
            "BACKEND_API_URL",
            "BACKEND_API_TOKEN",
            "WEBHOOK_HOST",
            "WEBHOOK_PORT",
            "STARBOARD_CHANNEL_ID",
            "STARBOARD_THRESHOLD",
            "GRACE_PERIOD_DAYS",
            "GRACE_PERIOD_DM_ENABLED",
            "DAILY_SYNC_SCHEDULE",
            "DISCORD_PM_OK_ROLE_ID",
            "DISCORD_PM_ASK_ROLE_ID",
            "DISCORD_PM_NO_ROLE_ID",
            "DISCORD_GENDER_SHE_HER_ROLE_ID",
        ];
        for var in VARS {
            unsafe { env::remove_var(var) };
        }
    }

    fn set_required() {
        unsafe {
            env::set_var("DISCORD_BOT_TOKEN", "bot-token");
            env::set_var("DISCORD_GUILD_ID", "100200300400500600");
            env::set_var("DISCORD_SUBSCRIBED_ROLE_ID", "200300400500600700");
            env::set_var("BACKEND_API_TOKEN", TEST_TOKEN);
        }
    }

    #[test]
    fn test_config_defaults() {
        let _env = env_guard();
        clear_env();
        set_required();

        let config = Config::from_env_inner().unwrap();

        assert_eq!(config.guild_id, 100200300400500600);
        assert_eq!(config.backend_api_url, "http://localhost:3000");
        assert_eq!(config.bind_addr(), "127.0.0.1:3001");
        assert_eq!(config.starboard_threshold, 1);
        assert!(config.starboard_channel_id.is_none());
        assert_eq!(config.grace_period_days, 7);
        assert!(config.grace_dm_enabled);
        assert_eq!(config.daily_sync_schedule, "59 23 * * *");
    }

    #[test]
    fn test_config_missing_token() {
        let _env = env_guard();
        clear_env();
        unsafe {
            env::set_var("DISCORD_GUILD_ID", "1");
            env::set_var("DISCORD_SUBSCRIBED_ROLE_ID", "2");
            env::set_var("BACKEND_API_TOKEN", TEST_TOKEN);
        }

        let result = Config::from_env_inner();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("DISCORD_BOT_TOKEN")
        );
    }

    #[test]
    fn test_config_rejects_short_backend_token() {
        let _env = env_guard();
        clear_env();
        set_required();
        unsafe { env::set_var("BACKEND_API_TOKEN", "too-short") };

        let result = Config::from_env_inner();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("32 characters"));
    }

    #[test]
    fn test_config_rejects_malformed_id() {
        let _env = env_guard();
        clear_env();
        set_required();
        unsafe { env::set_var("DISCORD_GUILD_ID", "not-a-number") };

        let result = Config::from_env_inner();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidVar { ref name, .. }) if name == "DISCORD_GUILD_ID"
        ));
    }

    #[test]
    fn test_role_sets_follow_configured_ids() {
        let _env = env_guard();
        clear_env();
        set_required();
        unsafe {
            env::set_var("DISCORD_PM_OK_ROLE_ID", "10");
            env::set_var("DISCORD_PM_NO_ROLE_ID", "12");
        }

        let config = Config::from_env_inner().unwrap();
        let pm = config.role_set("pm").expect("pm set should exist");
        assert!(pm.exclusive);
        assert_eq!(pm.roles.len(), 2);
        assert_eq!(pm.roles[0].label, "OK to PM");
        assert_eq!(pm.roles[1].role_id, 12);

        // No pronoun ids configured, so the whole set is dropped.
        assert!(config.role_set("pronouns").is_none());
    }
}
