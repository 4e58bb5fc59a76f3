//! Category directory operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Category, Direction, FixedSchedule};

pub(super) fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    let direction_str: String = row.get(4)?;
    let day_of_month: Option<i64> = row.get(6)?;
    let created_at_str: String = row.get(8)?;

    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        icon: row.get(3)?,
        direction: direction_str.parse().unwrap_or(Direction::Expense),
        is_fixed_expense: row.get(5)?,
        day_of_month: day_of_month.map(|d| d as u32),
        estimated_amount: row.get(7)?,
        created_at: parse_datetime(&created_at_str),
    })
}

pub(super) const CATEGORY_COLUMNS: &str =
    "id, user_id, title, icon, direction, is_fixed_expense, day_of_month, estimated_amount, created_at";

fn validate_schedule(schedule: &Option<FixedSchedule>) -> Result<()> {
    if let Some(schedule) = schedule {
        if !(1..=31).contains(&schedule.day_of_month) {
            return Err(Error::Validation(
                "Day of month must be between 1 and 31.".to_string(),
            ));
        }
        if schedule.estimated_amount <= 0.0 {
            return Err(Error::Validation(
                "Estimated amount must be greater than zero.".to_string(),
            ));
        }
    }
    Ok(())
}

impl Database {
    /// Create a category. Passing a schedule flags it as a fixed expense;
    /// the day/estimate pair is stored iff the flag is set.
    pub fn create_category(
        &self,
        user_id: &str,
        title: &str,
        icon: &str,
        direction: Direction,
        schedule: Option<FixedSchedule>,
    ) -> Result<i64> {
        if title.trim().is_empty() {
            return Err(Error::Validation(
                "Category title must not be empty.".to_string(),
            ));
        }
        validate_schedule(&schedule)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO categories (user_id, title, icon, direction, is_fixed_expense, day_of_month, estimated_amount)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                user_id,
                title,
                icon,
                direction.as_str(),
                schedule.is_some(),
                schedule.as_ref().map(|s| s.day_of_month),
                schedule.as_ref().map(|s| s.estimated_amount),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a category by id, scoped to its owning user
    pub fn get_category(&self, id: i64, user_id: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM categories WHERE id = ? AND user_id = ?",
            CATEGORY_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![id, user_id], category_from_row)
            .optional()?)
    }

    /// All categories belonging to a user
    pub fn list_categories(&self, user_id: &str) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM categories WHERE user_id = ? ORDER BY title",
            CATEGORY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let categories = stmt
            .query_map(params![user_id], category_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// All fixed-expense categories with a day of month, across users.
    /// This is the input set of the reminder scheduler pass.
    pub fn list_fixed_expense_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM categories WHERE is_fixed_expense AND day_of_month IS NOT NULL ORDER BY id",
            CATEGORY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let categories = stmt
            .query_map([], category_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Rename a category and/or change its icon
    pub fn update_category_title(
        &self,
        id: i64,
        user_id: &str,
        title: &str,
        icon: &str,
    ) -> Result<bool> {
        if title.trim().is_empty() {
            return Err(Error::Validation(
                "Category title must not be empty.".to_string(),
            ));
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE categories SET title = ?, icon = ? WHERE id = ? AND user_id = ?",
            params![title, icon, id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Set or clear a category's fixed-expense schedule. Both reminder fields
    /// flip together with the flag. Callers editing the schedule of an already
    /// notified category should follow up with
    /// `delete_current_month_notifications` so stale reminders don't linger.
    pub fn update_category_schedule(
        &self,
        id: i64,
        user_id: &str,
        schedule: Option<FixedSchedule>,
    ) -> Result<bool> {
        validate_schedule(&schedule)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE categories
            SET is_fixed_expense = ?, day_of_month = ?, estimated_amount = ?
            WHERE id = ? AND user_id = ?
            "#,
            params![
                schedule.is_some(),
                schedule.as_ref().map(|s| s.day_of_month),
                schedule.as_ref().map(|s| s.estimated_amount),
                id,
                user_id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete a category. Refuses while ledger entries, budgets, or a loan
    /// still reference it; notifications for it are removed.
    pub fn delete_category(&self, id: i64, user_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM categories WHERE id = ? AND user_id = ?",
            params![id, user_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(false);
        }

        let referenced: i64 = tx.query_row(
            r#"
            SELECT (SELECT COUNT(*) FROM ledger_entries WHERE category_id = ?1)
                 + (SELECT COUNT(*) FROM budgets WHERE category_id = ?1)
                 + (SELECT COUNT(*) FROM loans WHERE category_id = ?1)
            "#,
            params![id],
            |row| row.get(0),
        )?;
        if referenced > 0 {
            return Err(Error::Validation(
                "Category is still referenced by ledger entries, budgets, or a loan.".to_string(),
            ));
        }

        tx.execute(
            "DELETE FROM notifications WHERE category_id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        tx.execute(
            "DELETE FROM categories WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        tx.commit()?;
        Ok(true)
    }
}
