//! Budget records and period aggregation
//!
//! Spent amounts are never persisted. Every read recomputes them from the raw
//! ledger so budget figures can't drift from payment registration or undo.

use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;

use super::{is_constraint_violation, month_key_bounds, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Budget, BudgetView};

/// Usage percentage at which a budget counts as near its limit
const NEAR_LIMIT_PERCENTAGE: f64 = 80.0;

fn budget_from_row(row: &Row) -> rusqlite::Result<Budget> {
    let month: i64 = row.get(4)?;
    let created_at_str: String = row.get(8)?;

    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        assigned_amount: row.get(3)?,
        month: month as u32,
        year: row.get(5)?,
        category_id: row.get(6)?,
        active: row.get(7)?,
        created_at: parse_datetime(&created_at_str),
    })
}

const BUDGET_COLUMNS: &str =
    "id, user_id, name, assigned_amount, month, year, category_id, active, created_at";

fn validate_period(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(Error::Validation(
            "Month must be between 1 and 12.".to_string(),
        ));
    }
    Ok(())
}

impl Database {
    /// Create a budget for a category and period. At most one active budget
    /// may exist per (user, category, month, year).
    pub fn create_budget(
        &self,
        user_id: &str,
        name: &str,
        assigned_amount: f64,
        category_id: i64,
        month: u32,
        year: i32,
    ) -> Result<Budget> {
        validate_period(month)?;
        if assigned_amount < 0.0 {
            return Err(Error::Validation(
                "Assigned amount must not be negative.".to_string(),
            ));
        }

        let conn = self.conn()?;
        let category_exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM categories WHERE id = ? AND user_id = ?",
            params![category_id, user_id],
            |row| row.get(0),
        )?;
        if category_exists == 0 {
            return Err(Error::Validation(
                "The selected category does not exist.".to_string(),
            ));
        }

        // The partial unique index backs this check up against races
        let result = conn.execute(
            r#"
            INSERT INTO budgets (user_id, name, assigned_amount, month, year, category_id, active)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            "#,
            params![user_id, name, assigned_amount, month, year, category_id],
        );
        match result {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(Error::Validation(
                    "An active budget already exists for this category in this period."
                        .to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        }

        let id = conn.last_insert_rowid();
        let sql = format!("SELECT {} FROM budgets WHERE id = ?", BUDGET_COLUMNS);
        Ok(conn.query_row(&sql, params![id], budget_from_row)?)
    }

    /// Get a budget by id, scoped to its owning user
    pub fn get_budget(&self, id: i64, user_id: &str) -> Result<Option<Budget>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM budgets WHERE id = ? AND user_id = ?",
            BUDGET_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![id, user_id], budget_from_row)
            .optional()?)
    }

    /// All budgets for a user, newest period first
    pub fn list_budgets(&self, user_id: &str) -> Result<Vec<Budget>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM budgets WHERE user_id = ? ORDER BY year DESC, month DESC, id",
            BUDGET_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let budgets = stmt
            .query_map(params![user_id], budget_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(budgets)
    }

    /// Replace a budget's fields
    pub fn update_budget(
        &self,
        id: i64,
        user_id: &str,
        name: &str,
        assigned_amount: f64,
        category_id: i64,
        month: u32,
        year: i32,
        active: bool,
    ) -> Result<bool> {
        validate_period(month)?;
        if assigned_amount < 0.0 {
            return Err(Error::Validation(
                "Assigned amount must not be negative.".to_string(),
            ));
        }

        let conn = self.conn()?;
        let result = conn.execute(
            r#"
            UPDATE budgets
            SET name = ?, assigned_amount = ?, category_id = ?, month = ?, year = ?, active = ?
            WHERE id = ? AND user_id = ?
            "#,
            params![name, assigned_amount, category_id, month, year, active, id, user_id],
        );
        match result {
            Ok(changed) => Ok(changed > 0),
            Err(err) if is_constraint_violation(&err) => Err(Error::Validation(
                "An active budget already exists for this category in this period.".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a budget
    pub fn delete_budget(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM budgets WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Active budgets for a period with their derived figures, computed from
    /// the ledger on this read. Budgets whose category saw no expenses get a
    /// spent amount of zero.
    pub fn period_summary(&self, user_id: &str, month: u32, year: i32) -> Result<Vec<BudgetView>> {
        let spent_by_category = self.spent_by_category(user_id, year, month)?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT b.id, b.user_id, b.name, b.assigned_amount, b.month, b.year,
                   b.category_id, b.active, c.title, c.icon
            FROM budgets b
            JOIN categories c ON b.category_id = c.id
            WHERE b.user_id = ? AND b.month = ? AND b.year = ? AND b.active
            ORDER BY c.title
            "#,
        )?;

        let views = stmt
            .query_map(params![user_id, month, year], |row| {
                let month: i64 = row.get(4)?;
                Ok(BudgetView {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    assigned_amount: row.get(3)?,
                    month: month as u32,
                    year: row.get(5)?,
                    category_id: row.get(6)?,
                    category_title: row.get(8)?,
                    category_icon: row.get(9)?,
                    active: row.get(7)?,
                    spent_amount: 0.0,
                    available_amount: 0.0,
                    used_percentage: 0.0,
                    is_over_budget: false,
                    is_near_limit: false,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(views
            .into_iter()
            .map(|mut view| {
                let spent = spent_by_category
                    .get(&view.category_id)
                    .copied()
                    .unwrap_or(0.0);
                view.spent_amount = spent;
                view.available_amount = (view.assigned_amount - spent).max(0.0);
                view.used_percentage = if view.assigned_amount > 0.0 {
                    (spent / view.assigned_amount) * 100.0
                } else {
                    0.0
                };
                view.is_over_budget = spent > view.assigned_amount;
                view.is_near_limit = view.used_percentage >= NEAR_LIMIT_PERCENTAGE
                    && view.used_percentage < 100.0;
                view
            })
            .collect())
    }

    /// Budgets in the period that are over their assigned amount or near it
    pub fn exceeded_budgets(&self, user_id: &str, month: u32, year: i32) -> Result<Vec<BudgetView>> {
        let views = self.period_summary(user_id, month, year)?;
        Ok(views
            .into_iter()
            .filter(|v| v.is_over_budget || v.is_near_limit)
            .collect())
    }

    /// Total amount assigned across the period's active budgets
    pub fn total_assigned_for_month(&self, user_id: &str, month: u32, year: i32) -> Result<f64> {
        let conn = self.conn()?;
        let total: f64 = conn.query_row(
            r#"
            SELECT COALESCE(SUM(assigned_amount), 0)
            FROM budgets
            WHERE user_id = ? AND month = ? AND year = ? AND active
            "#,
            params![user_id, month, year],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Total spent in the period, counting only expenses whose category has an
    /// active budget. Unbudgeted categories stay out of this figure.
    pub fn total_spent_for_month(&self, user_id: &str, month: u32, year: i32) -> Result<f64> {
        let (first, last) = month_key_bounds(year, month);
        let conn = self.conn()?;
        let total: f64 = conn.query_row(
            r#"
            SELECT COALESCE(SUM(e.amount), 0)
            FROM ledger_entries e
            WHERE e.user_id = ?1 AND e.direction = 'expense'
              AND e.date >= ?2 AND e.date <= ?3
              AND e.category_id IN (
                  SELECT category_id FROM budgets
                  WHERE user_id = ?1 AND month = ?4 AND year = ?5 AND active
              )
            "#,
            params![user_id, first, last, month, year],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Copy the previous month's active budgets into the target period.
    /// Fails when the previous month has none or the target already has any.
    pub fn copy_budgets_from_previous_month(
        &self,
        user_id: &str,
        month: u32,
        year: i32,
    ) -> Result<usize> {
        validate_period(month)?;
        let (prev_month, prev_year) = if month == 1 {
            (12, year - 1)
        } else {
            (month - 1, year)
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous: i64 = tx.query_row(
            "SELECT COUNT(*) FROM budgets WHERE user_id = ? AND month = ? AND year = ? AND active",
            params![user_id, prev_month, prev_year],
            |row| row.get(0),
        )?;
        if previous == 0 {
            return Err(Error::Validation(
                "There are no budgets in the previous month to copy.".to_string(),
            ));
        }

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM budgets WHERE user_id = ? AND month = ? AND year = ?",
            params![user_id, month, year],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(Error::Validation(
                "Budgets already exist in this month. Delete them first.".to_string(),
            ));
        }

        let copied = tx.execute(
            r#"
            INSERT INTO budgets (user_id, name, assigned_amount, month, year, category_id, active)
            SELECT user_id, name, assigned_amount, ?2, ?3, category_id, 1
            FROM budgets
            WHERE user_id = ?1 AND month = ?4 AND year = ?5 AND active
            "#,
            params![user_id, month, year, prev_month, prev_year],
        )?;
        tx.commit()?;
        Ok(copied)
    }

    /// Expense totals per category within a calendar month
    fn spent_by_category(
        &self,
        user_id: &str,
        year: i32,
        month: u32,
    ) -> Result<HashMap<i64, f64>> {
        let (first, last) = month_key_bounds(year, month);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT category_id, SUM(amount)
            FROM ledger_entries
            WHERE user_id = ? AND direction = 'expense' AND date >= ? AND date <= ?
            GROUP BY category_id
            "#,
        )?;

        let mut spent = HashMap::new();
        let mut rows = stmt.query(params![user_id, first, last])?;
        while let Some(row) = rows.next()? {
            let category_id: i64 = row.get(0)?;
            let total: f64 = row.get(1)?;
            spent.insert(category_id, total);
        }
        Ok(spent)
    }
}
