//! Background driver for the fixed-expense reminder pass
//!
//! Provides optional scheduled reminder generation that can be enabled
//! via environment variables:
//!
//! - `DUEBOOK_NOTIFY_SCHEDULE`: Interval in hours (e.g., "24" for daily)
//! - `DUEBOOK_NOTIFY_RETENTION`: Days to keep notifications (default: 60)
//!
//! The driver runs in the background, independent of request handling. Each
//! tick is one complete, idempotent pass: the per-cycle uniqueness invariant
//! means running twice in the same minute generates nothing extra, and a
//! missed run self-heals on the next one through the overdue branch.

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::db::DEFAULT_RETENTION_DAYS;

/// Configuration for the scheduled reminder pass
#[derive(Debug, Clone)]
pub struct NotificationScheduleConfig {
    /// Interval between passes in hours
    pub interval_hours: u64,
    /// Notifications older than this many days are pruned after each pass
    pub retention_days: i64,
}

impl Default for NotificationScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl NotificationScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured (DUEBOOK_NOTIFY_SCHEDULE not set)
    pub fn from_env() -> Option<Self> {
        let interval_hours: u64 = std::env::var("DUEBOOK_NOTIFY_SCHEDULE")
            .ok()
            .and_then(|s| s.parse().ok())?;

        if interval_hours == 0 {
            warn!("DUEBOOK_NOTIFY_SCHEDULE is 0, automatic reminders disabled");
            return None;
        }

        let retention_days = std::env::var("DUEBOOK_NOTIFY_RETENTION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        Some(Self {
            interval_hours,
            retention_days,
        })
    }
}

/// Start the reminder scheduler as a background task
///
/// This function spawns a tokio task that runs indefinitely, generating
/// fixed-expense reminders at the configured interval.
pub fn start_notification_scheduler(db: Database, config: NotificationScheduleConfig) {
    info!(
        "Starting reminder scheduler: every {} hours, {} day retention",
        config.interval_hours, config.retention_days
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_hours * 3600));

        // Skip the first immediate tick - we don't want to run on startup
        ticker.tick().await;

        loop {
            ticker.tick().await;

            info!("Running scheduled reminder pass...");

            match run_scheduled_pass(&db, config.retention_days) {
                Ok((generated, pruned)) => {
                    info!(
                        "Scheduled reminder pass completed: {} generated, {} pruned",
                        generated, pruned
                    );
                }
                Err(e) => {
                    error!("Scheduled reminder pass failed: {}", e);
                }
            }
        }
    });
}

/// Run a single reminder pass plus retention pruning
fn run_scheduled_pass(db: &Database, retention_days: i64) -> Result<(usize, usize), String> {
    let generated = db
        .run_for_all_fixed_expenses()
        .map_err(|e| format!("Failed to generate reminders: {}", e))?;

    let pruned = db
        .prune_notifications_older_than(retention_days)
        .map_err(|e| format!("Failed to prune notifications: {}", e))?;

    Ok((generated, pruned))
}
