//! Daily reconciliation schedule.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::state::AppState;
use crate::sync::SyncError;

/// Parse a five-field cron expression (the `cron` crate wants seconds).
fn parse_schedule(expr: &str) -> Result<Schedule, String> {
    Schedule::from_str(&format!("0 {}", expr.trim())).map_err(|e| e.to_string())
}

fn next_due(schedule: &Schedule, now: DateTime<Local>) -> Option<DateTime<Local>> {
    schedule.after(&now).next()
}

/// Spawn the loop that runs the reconciliation pass on the configured
/// schedule. Returns `None` when the expression doesn't parse; the bot
/// keeps running, it just never syncs on its own.
pub fn start_sync_scheduler(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let expr = state.config.daily_sync_schedule.clone();
    let schedule = match parse_schedule(&expr) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid DAILY_SYNC_SCHEDULE '{expr}': {e}");
            return None;
        }
    };
    info!(schedule = %expr, "Daily sync scheduled");

    Some(tokio::spawn(async move {
        loop {
            let now = Local::now();
            let Some(due) = next_due(&schedule, now) else {
                warn!("Daily sync schedule has no future occurrences, stopping");
                return;
            };
            let wait = (due - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            info!("Daily sync scheduled task running");
            run_sync_pass(&state).await;
        }
    }))
}

/// Run one pass and log the outcome; used by the schedule loop and the
/// startup sync.
pub async fn run_sync_pass(state: &AppState) {
    match state.sync.perform_daily_sync().await {
        Ok(report) => info!(
            confirmed = report.subscribers_confirmed,
            reminders = report.reminders_sent,
            expired = report.grace_expired,
            drift = report.drift_removed,
            failures = report.failures,
            "Reconciliation pass finished"
        ),
        Err(SyncError::AlreadyRunning) => {
            warn!("Reconciliation pass skipped, previous pass still running")
        }
        Err(e) => error!("Daily sync failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_default_schedule_fires_at_2359() {
        let schedule = parse_schedule("59 23 * * *").unwrap();
        let now = Local.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        let due = next_due(&schedule, now).unwrap();
        assert_eq!((due.hour(), due.minute()), (23, 59));
        assert_eq!(due.day(), 7);

        // Asking again just past the fire time rolls to the next day.
        let after = next_due(&schedule, due).unwrap();
        assert_eq!(after.day(), 8);
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        assert!(parse_schedule("not a schedule").is_err());
        assert!(parse_schedule("61 99 * * *").is_err());
    }
}
