//! Payment reminders for fixed-expense categories
//!
//! One billing cycle is one calendar month of a category's due date. The
//! generation rules per category and day:
//!
//! 1. Resolve this month's due date (day of month clamped to month length).
//! 2. Skip if a notification already exists for this cycle.
//! 3. Skip if a payment (expense entry) is already recorded this month.
//! 4. Generate immediately when the due date has passed (overdue), otherwise
//!    only within the lead window before the due date.
//!
//! The unique cycle index on the notifications table backs rule 2 at the
//! store level, so a pass racing a manual trigger inserts once and no-ops
//! the loser.

use chrono::{Datelike, Duration, Local, NaiveDate, Utc};
use rusqlite::{params, Row};
use tracing::{debug, error, info};

use super::{month_key_bounds, parse_date, parse_datetime, Database};
use crate::error::Result;
use crate::models::{clamped_date, Category, Notification};

/// Days before the due date the reminder window opens
pub const NOTIFY_LEAD_DAYS: i64 = 3;

/// Default retention for generated notifications
pub const DEFAULT_RETENTION_DAYS: i64 = 60;

fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    let notification_date_str: String = row.get(3)?;
    let due_date_str: String = row.get(4)?;
    let created_at_str: String = row.get(6)?;

    Ok(Notification {
        id: row.get(0)?,
        category_id: row.get(1)?,
        user_id: row.get(2)?,
        notification_date: parse_date(&notification_date_str),
        due_date: parse_date(&due_date_str),
        is_read: row.get(5)?,
        created_at: parse_datetime(&created_at_str),
    })
}

const NOTIFICATION_COLUMNS: &str =
    "id, category_id, user_id, notification_date, due_date, is_read, created_at";

impl Database {
    /// Run the reminder pass over every fixed-expense category, as of today.
    /// Returns the number of notifications generated.
    pub fn run_for_all_fixed_expenses(&self) -> Result<usize> {
        self.run_for_all_fixed_expenses_on(Local::now().date_naive())
    }

    /// Reminder pass with an explicit calendar date. A failing category is
    /// logged and skipped so one bad row can't starve the rest of the pass.
    pub fn run_for_all_fixed_expenses_on(&self, today: NaiveDate) -> Result<usize> {
        let categories = self.list_fixed_expense_categories()?;
        let mut generated = 0;
        for category in &categories {
            match self.generate_for_category_if_needed(category, today) {
                Ok(true) => generated += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(category_id = category.id, "reminder generation failed: {}", e);
                }
            }
        }
        if generated > 0 {
            info!(generated, "generated fixed-expense reminders");
        }
        Ok(generated)
    }

    /// Run the reminder algorithm for one category, as of today. Used for
    /// immediate feedback right after a category gains or changes a reminder.
    pub fn run_for_category(&self, category_id: i64) -> Result<bool> {
        self.run_for_category_on(category_id, Local::now().date_naive())
    }

    /// Single-category reminder run with an explicit calendar date.
    /// Returns whether a notification was generated.
    pub fn run_for_category_on(&self, category_id: i64, today: NaiveDate) -> Result<bool> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM categories WHERE id = ? AND is_fixed_expense AND day_of_month IS NOT NULL",
            super::categories::CATEGORY_COLUMNS
        );
        let category: Option<Category> = {
            use rusqlite::OptionalExtension;
            conn.query_row(&sql, params![category_id], super::categories::category_from_row)
                .optional()?
        };
        drop(conn);

        match category {
            Some(category) => self.generate_for_category_if_needed(&category, today),
            None => Ok(false),
        }
    }

    /// The per-category, per-cycle decision
    fn generate_for_category_if_needed(
        &self,
        category: &Category,
        today: NaiveDate,
    ) -> Result<bool> {
        let Some(day_of_month) = category.day_of_month else {
            return Ok(false);
        };

        let due = clamped_date(today.year(), today.month(), day_of_month);

        // One reminder per cycle
        if self.notification_exists_for_cycle(category.id, &category.user_id, due.year(), due.month())? {
            return Ok(false);
        }

        // A recorded payment makes the reminder pointless
        if self.has_expense_in_month(category.id, &category.user_id, today.year(), today.month())? {
            return Ok(false);
        }

        let overdue = due < today;
        if !overdue {
            let notify_from = due - Duration::days(NOTIFY_LEAD_DAYS);
            if today < notify_from || today > due {
                return Ok(false);
            }
        }

        // The cycle index turns a racing duplicate insert into a no-op
        let conn = self.conn()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO notifications (category_id, user_id, notification_date, due_date, is_read)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT DO NOTHING
            "#,
            params![
                category.id,
                category.user_id,
                today.to_string(),
                due.to_string(),
            ],
        )?;

        if inserted > 0 {
            debug!(
                category_id = category.id,
                due = %due,
                overdue,
                "generated payment reminder"
            );
        }
        Ok(inserted > 0)
    }

    /// Whether a notification exists for the category's billing cycle
    pub fn notification_exists_for_cycle(
        &self,
        category_id: i64,
        user_id: &str,
        year: i32,
        month: u32,
    ) -> Result<bool> {
        let cycle = format!("{:04}-{:02}", year, month);
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE category_id = ? AND user_id = ? AND strftime('%Y-%m', due_date) = ?
            "#,
            params![category_id, user_id, cycle],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Unread notifications for a user, soonest due date first
    pub fn unread_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notifications WHERE user_id = ? AND NOT is_read ORDER BY due_date, id",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let notifications = stmt
            .query_map(params![user_id], notification_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// All notifications for a user, newest first
    pub fn all_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notifications WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let notifications = stmt
            .query_map(params![user_id], notification_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Notifications for a category whose due date falls within the given
    /// calendar month
    pub fn notifications_by_category_and_month(
        &self,
        category_id: i64,
        user_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<Notification>> {
        let (first, last) = month_key_bounds(year, month);
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE category_id = ? AND user_id = ? AND due_date >= ? AND due_date <= ?
             ORDER BY due_date, id",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let notifications = stmt
            .query_map(params![category_id, user_id, first, last], notification_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Count of unread notifications for a user
    pub fn unread_notification_count(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND NOT is_read",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark one notification read
    pub fn mark_notification_read(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Mark all of a user's notifications read; returns how many flipped
    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ? AND NOT is_read",
            params![user_id],
        )?;
        Ok(changed)
    }

    /// Delete one notification
    pub fn delete_notification(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM notifications WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Remove every notification for the category whose due date falls within
    /// the current calendar month. Called after a category's schedule is
    /// edited so a stale reminder for the old due date doesn't linger.
    pub fn delete_current_month_notifications(
        &self,
        category_id: i64,
        user_id: &str,
    ) -> Result<usize> {
        self.delete_current_month_notifications_on(category_id, user_id, Local::now().date_naive())
    }

    /// Current-month cleanup with an explicit calendar date
    pub fn delete_current_month_notifications_on(
        &self,
        category_id: i64,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<usize> {
        let (first, last) = month_key_bounds(today.year(), today.month());
        let conn = self.conn()?;
        let deleted = conn.execute(
            r#"
            DELETE FROM notifications
            WHERE category_id = ? AND user_id = ? AND due_date >= ? AND due_date <= ?
            "#,
            params![category_id, user_id, first, last],
        )?;
        if deleted > 0 {
            debug!(category_id, deleted, "cleared current-cycle notifications");
        }
        Ok(deleted)
    }

    /// Delete notifications created more than `days` ago. Pure retention
    /// housekeeping; carries no business invariant.
    pub fn prune_notifications_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE created_at < ?",
            params![cutoff],
        )?;
        if deleted > 0 {
            info!(deleted, days, "pruned old notifications");
        }
        Ok(deleted)
    }
}
