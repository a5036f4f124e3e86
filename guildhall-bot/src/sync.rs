//! Daily reconciliation between the billing backend and the guild role.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use guildhall_core::days_remaining;
use serenity::model::id::UserId;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::{BackendError, SubscriptionSource};
use crate::notify::Notifier;
use crate::roles::RoleDirectory;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A previous pass is still running; the caller should skip, not queue.
    #[error("a reconciliation pass is already running")]
    AlreadyRunning,
    #[error("failed to fetch subscription state: {0}")]
    Source(#[from] BackendError),
}

/// Counts from one reconciliation pass, for the completion log line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub subscribers_confirmed: usize,
    pub reminders_sent: usize,
    pub grace_expired: usize,
    pub drift_removed: usize,
    pub failures: usize,
}

/// Converges the subscribed role onto the backend's view of who should
/// hold it, and handles the instant path when a payment webhook arrives.
pub struct SyncService {
    source: Arc<dyn SubscriptionSource>,
    roles: Arc<dyn RoleDirectory>,
    notifier: Arc<dyn Notifier>,
    grace_dm_enabled: bool,
    /// Held for the duration of a pass. Overlapping passes would
    /// double-send reminder DMs, so a second caller skips instead of
    /// queueing.
    running: Mutex<()>,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn SubscriptionSource>,
        roles: Arc<dyn RoleDirectory>,
        notifier: Arc<dyn Notifier>,
        grace_dm_enabled: bool,
    ) -> Self {
        Self {
            source,
            roles,
            notifier,
            grace_dm_enabled,
            running: Mutex::new(()),
        }
    }

    /// One full reconciliation pass. Best-effort per user: a failed role
    /// mutation is logged and counted, never aborts the pass. Only a
    /// failure to fetch the source sets aborts (nothing to reconcile
    /// against).
    pub async fn perform_daily_sync(&self) -> Result<SyncReport, SyncError> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("reconciliation pass already in progress, skipping");
            return Err(SyncError::AlreadyRunning);
        };
        self.run_pass(Utc::now()).await
    }

    async fn run_pass(&self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        info!("Starting daily subscription sync");

        let active = self.source.active_subscribers().await?;
        let grace = self.source.grace_period_users().await?;
        info!(
            active = active.len(),
            grace = grace.len(),
            "Fetched subscription state"
        );

        let mut report = SyncReport::default();

        for subscriber in &active {
            let Some(user) = parse_discord_id(&subscriber.discord_id) else {
                warn!(
                    discord_id = %subscriber.discord_id,
                    "subscriber record has an unusable discord id"
                );
                report.failures += 1;
                continue;
            };
            match self
                .roles
                .grant_subscriber_role(user, "Subscription active")
                .await
            {
                Ok(()) => report.subscribers_confirmed += 1,
                Err(e) => {
                    error!(user = user.get(), "Failed to grant subscribed role: {e}");
                    report.failures += 1;
                }
            }
        }

        for record in &grace {
            let Some(user) = parse_discord_id(&record.discord_id) else {
                warn!(
                    discord_id = %record.discord_id,
                    "grace record has an unusable discord id"
                );
                report.failures += 1;
                continue;
            };
            let days = days_remaining(now, record.grace_ends_at);
            if days > 0 {
                if let Err(e) = self
                    .roles
                    .grant_subscriber_role(user, "Grace period active")
                    .await
                {
                    error!(user = user.get(), "Failed to keep role during grace: {e}");
                    report.failures += 1;
                    continue;
                }
                if self.grace_dm_enabled && record.dm_enabled {
                    self.notifier.grace_reminder(user, days).await;
                    report.reminders_sent += 1;
                }
            } else {
                match self
                    .roles
                    .revoke_subscriber_role(user, "Grace period expired")
                    .await
                {
                    Ok(()) => {
                        report.grace_expired += 1;
                        self.notifier.subscription_expired(user).await;
                    }
                    Err(e) => {
                        error!(user = user.get(), "Failed to revoke expired role: {e}");
                        report.failures += 1;
                        continue;
                    }
                }
                // The backend runs its own cleanup; telling it now just
                // keeps the grace list short.
                if let Err(e) = self
                    .source
                    .expire_grace_period(&record.user_id, &record.discord_id)
                    .await
                {
                    warn!(user = user.get(), "Failed to expire grace record: {e}");
                }
            }
        }

        // Drift correction: anyone holding the role without backing from
        // either set was added out of band (or lingered) and loses it.
        let holders = match self.roles.subscriber_role_holders().await {
            Ok(holders) => holders,
            Err(e) => {
                error!("Failed to list role holders, skipping drift correction: {e}");
                Vec::new()
            }
        };
        let valid: HashSet<UserId> = active
            .iter()
            .map(|s| s.discord_id.as_str())
            .chain(grace.iter().map(|g| g.discord_id.as_str()))
            .filter_map(parse_discord_id)
            .collect();
        for holder in holders {
            if valid.contains(&holder) {
                continue;
            }
            warn!(
                user = holder.get(),
                "Member holds the subscribed role without a valid subscription"
            );
            match self
                .roles
                .revoke_subscriber_role(holder, "No active subscription found")
                .await
            {
                Ok(()) => report.drift_removed += 1,
                Err(e) => {
                    error!(user = holder.get(), "Failed to remove drifted role: {e}");
                    report.failures += 1;
                }
            }
        }

        info!(?report, "Daily sync completed");
        Ok(report)
    }

    /// Instant path for a payment webhook. The payment event is trusted at
    /// face value, so the role is granted unconditionally; re-querying the
    /// backend here would race the write that triggered the webhook.
    pub async fn sync_user_on_payment(&self, user: UserId) {
        info!(user = user.get(), "Syncing user on payment");

        if let Err(e) = self
            .roles
            .grant_subscriber_role(user, "Subscription payment confirmed")
            .await
        {
            error!(user = user.get(), "Failed to grant role on payment: {e}");
        }
        self.notifier.subscription_confirmed(user).await;

        // Best-effort: a renewal while in grace should clear the grace
        // record. Failing to check (or clear) is logged, not fatal; the
        // daily pass converges it anyway.
        match self.source.grace_period_users().await {
            Ok(grace) => {
                let record = grace
                    .iter()
                    .find(|g| parse_discord_id(&g.discord_id) == Some(user));
                if let Some(record) = record
                    && let Err(e) = self
                        .source
                        .end_grace_period(&record.user_id, &record.discord_id)
                        .await
                {
                    warn!(user = user.get(), "Failed to clear grace period: {e}");
                }
            }
            Err(e) => warn!(
                user = user.get(),
                "Could not check grace period after payment: {e}"
            ),
        }
    }
}

/// Discord ids arrive from the backend as decimal strings.
pub(crate) fn parse_discord_id(raw: &str) -> Option<UserId> {
    raw.parse::<u64>().ok().filter(|v| *v != 0).map(UserId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockNotifier, MockRoles, MockSource, grace_user, subscriber};
    use chrono::Duration;

    fn service(
        source: Arc<MockSource>,
        roles: Arc<MockRoles>,
        notifier: Arc<MockNotifier>,
    ) -> SyncService {
        SyncService::new(source, roles, notifier, true)
    }

    #[tokio::test]
    async fn test_active_subscribers_get_the_role() {
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.set_subscribers(vec![subscriber("u1", 11), subscriber("u2", 22)]);

        let report = service(source, Arc::clone(&roles), notifier)
            .perform_daily_sync()
            .await
            .unwrap();

        assert_eq!(report.subscribers_confirmed, 2);
        assert_eq!(report.failures, 0);
        assert!(roles.granted_contains(11));
        assert!(roles.granted_contains(22));
    }

    #[tokio::test]
    async fn test_granting_an_already_held_role_is_a_noop_success() {
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.set_subscribers(vec![subscriber("u1", 11)]);
        roles.set_holders(&[11]);

        let svc = service(source, Arc::clone(&roles), notifier);
        let first = svc.perform_daily_sync().await.unwrap();
        let second = svc.perform_daily_sync().await.unwrap();

        assert_eq!(first.subscribers_confirmed, 1);
        assert_eq!(second.subscribers_confirmed, 1);
        assert_eq!(second.failures, 0);
        // Still exactly one holder, no matter how many grants.
        assert_eq!(roles.holder_count(), 1);
    }

    #[tokio::test]
    async fn test_grace_boundary_reminder_vs_expiry() {
        let now = Utc::now();
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.set_grace(vec![
            grace_user("u1", 11, now + Duration::days(1)),
            grace_user("u2", 22, now),
        ]);
        roles.set_holders(&[11, 22]);

        let svc = service(Arc::clone(&source), Arc::clone(&roles), Arc::clone(&notifier));
        let report = svc.run_pass(now).await.unwrap();

        // One day left: reminder, keeps the role.
        assert_eq!(notifier.reminders(), vec![(UserId::new(11), 1)]);
        assert!(roles.is_holder(11));

        // Zero days left: expiry notice, role removed, backend told.
        assert_eq!(notifier.expired(), vec![UserId::new(22)]);
        assert!(!roles.is_holder(22));
        assert_eq!(source.expired_records(), vec!["u2".to_string()]);

        assert_eq!(report.reminders_sent, 1);
        assert_eq!(report.grace_expired, 1);
    }

    #[tokio::test]
    async fn test_grace_reminder_respects_dm_opt_out() {
        let now = Utc::now();
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        let mut muted = grace_user("u1", 11, now + Duration::days(3));
        muted.dm_enabled = false;
        source.set_grace(vec![muted]);

        let svc = service(source, Arc::clone(&roles), Arc::clone(&notifier));
        let report = svc.run_pass(now).await.unwrap();

        assert!(roles.is_holder(11));
        assert!(notifier.reminders().is_empty());
        assert_eq!(report.reminders_sent, 0);
    }

    #[tokio::test]
    async fn test_drift_correction_removes_only_unbacked_holders() {
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.set_subscribers(vec![subscriber("u1", 11)]);
        roles.set_holders(&[11, 99]);

        let report = service(source, Arc::clone(&roles), notifier)
            .perform_daily_sync()
            .await
            .unwrap();

        assert_eq!(report.drift_removed, 1);
        assert!(roles.is_holder(11));
        assert!(!roles.is_holder(99));
    }

    #[tokio::test]
    async fn test_single_user_failure_does_not_abort_the_pass() {
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.set_subscribers(vec![
            subscriber("u1", 11),
            subscriber("u2", 22),
            subscriber("u3", 33),
        ]);
        roles.fail_for(22);

        let report = service(source, Arc::clone(&roles), notifier)
            .perform_daily_sync()
            .await
            .unwrap();

        assert_eq!(report.subscribers_confirmed, 2);
        assert_eq!(report.failures, 1);
        assert!(roles.is_holder(11));
        assert!(roles.is_holder(33));
    }

    #[tokio::test]
    async fn test_source_fetch_failure_aborts_the_pass() {
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.fail_fetches();

        let result = service(source, Arc::clone(&roles), notifier)
            .perform_daily_sync()
            .await;

        assert!(matches!(result, Err(SyncError::Source(_))));
        assert_eq!(roles.holder_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(source, roles, notifier);

        let _running = svc.running.try_lock().unwrap();
        let result = svc.perform_daily_sync().await;
        assert!(matches!(result, Err(SyncError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_payment_sync_grants_confirms_and_clears_grace() {
        let now = Utc::now();
        let source = Arc::new(MockSource::default());
        let roles = Arc::new(MockRoles::default());
        let notifier = Arc::new(MockNotifier::default());
        source.set_grace(vec![grace_user("u1", 11, now + Duration::days(5))]);

        let svc = service(Arc::clone(&source), Arc::clone(&roles), Arc::clone(&notifier));
        svc.sync_user_on_payment(UserId::new(11)).await;

        assert!(roles.is_holder(11));
        assert_eq!(notifier.confirmed(), vec![UserId::new(11)]);
        assert_eq!(source.ended_records(), vec!["u1".to_string()]);
    }

    #[test]
    fn test_parse_discord_id_rejects_junk() {
        assert_eq!(parse_discord_id("123"), Some(UserId::new(123)));
        assert_eq!(parse_discord_id("0"), None);
        assert_eq!(parse_discord_id("abc"), None);
        assert_eq!(parse_discord_id(""), None);
    }
}
