//! Ledger entry operations
//!
//! Entries are immutable once appended; the only mutation is deletion, which
//! carries the loan-payment rollback rule: removing an expense entry whose
//! category belongs to a loan rolls the loan's paid counter back and
//! reactivates a completed loan.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use super::{month_key_bounds, parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Direction, LedgerEntry};

fn entry_from_row(row: &Row) -> rusqlite::Result<LedgerEntry> {
    let direction_str: String = row.get(3)?;
    let date_str: String = row.get(5)?;
    let created_at_str: String = row.get(7)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        direction: direction_str.parse().unwrap_or(Direction::Expense),
        amount: row.get(4)?,
        date: parse_date(&date_str),
        note: row.get(6)?,
        created_at: parse_datetime(&created_at_str),
    })
}

const ENTRY_COLUMNS: &str =
    "id, user_id, category_id, direction, amount, date, note, created_at";

/// Filter for ledger queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub category_id: Option<i64>,
    pub direction: Option<Direction>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl Database {
    /// Append a dated entry to the ledger
    pub fn append_entry(
        &self,
        user_id: &str,
        category_id: i64,
        direction: Direction,
        amount: f64,
        date: NaiveDate,
        note: Option<&str>,
    ) -> Result<i64> {
        if amount <= 0.0 {
            return Err(Error::Validation(
                "Amount must be greater than zero.".to_string(),
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

        conn.execute(
            r#"
            INSERT INTO ledger_entries (user_id, category_id, direction, amount, date, note)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                user_id,
                category_id,
                direction.as_str(),
                amount,
                date.to_string(),
                note,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a single entry
    pub fn get_entry(&self, id: i64, user_id: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE id = ? AND user_id = ?",
            ENTRY_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![id, user_id], entry_from_row)
            .optional()?)
    }

    /// Remove a ledger entry.
    ///
    /// When the entry is an expense against a category owned by a loan, the
    /// loan's installments-paid counter is decremented (floored at zero) and a
    /// completed loan is reactivated, in the same transaction as the delete.
    /// This holds no matter who deletes the entry; loan payment undo goes
    /// through this same rule.
    pub fn remove_entry(&self, id: i64, user_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let target: Option<(i64, String)> = tx
            .query_row(
                "SELECT category_id, direction FROM ledger_entries WHERE id = ? AND user_id = ?",
                params![id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((category_id, direction)) = target else {
            return Ok(false);
        };

        if direction == Direction::Expense.as_str() {
            let loan: Option<(i64, i64, i64, bool)> = tx
                .query_row(
                    r#"
                    SELECT id, installments_paid, installment_count, active
                    FROM loans WHERE category_id = ? AND user_id = ?
                    "#,
                    params![category_id, user_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            if let Some((loan_id, paid, count, active)) = loan {
                let paid_after = if paid > 0 {
                    tx.execute(
                        "UPDATE loans SET installments_paid = installments_paid - 1
                         WHERE id = ? AND installments_paid > 0",
                        params![loan_id],
                    )?;
                    warn!(
                        loan_id,
                        installments_paid = paid - 1,
                        "removed an installment payment entry; rolled loan counter back"
                    );
                    paid - 1
                } else {
                    paid
                };
                if !active && paid_after < count {
                    tx.execute("UPDATE loans SET active = 1 WHERE id = ?", params![loan_id])?;
                }
            }
        }

        tx.execute("DELETE FROM ledger_entries WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Query entries for a user with optional category/direction/date filters,
    /// newest first
    pub fn query_entries(&self, user_id: &str, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let mut sql = format!(
            "SELECT {} FROM ledger_entries WHERE user_id = ?",
            ENTRY_COLUMNS
        );
        let mut bindings: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];

        if let Some(category_id) = filter.category_id {
            sql.push_str(" AND category_id = ?");
            bindings.push(Box::new(category_id));
        }
        if let Some(direction) = filter.direction {
            sql.push_str(" AND direction = ?");
            bindings.push(Box::new(direction.as_str()));
        }
        if let Some(from) = filter.from {
            sql.push_str(" AND date >= ?");
            bindings.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND date <= ?");
            bindings.push(Box::new(to.to_string()));
        }
        sql.push_str(" ORDER BY date DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            bindings.push(Box::new(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let binding_refs: Vec<&dyn rusqlite::ToSql> = bindings.iter().map(|b| b.as_ref()).collect();
        let entries = stmt
            .query_map(binding_refs.as_slice(), entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Whether any expense entry exists for the category within the given
    /// calendar month. This is the scheduler's payment-suppression check.
    pub fn has_expense_in_month(
        &self,
        category_id: i64,
        user_id: &str,
        year: i32,
        month: u32,
    ) -> Result<bool> {
        let (first, last) = month_key_bounds(year, month);
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM ledger_entries
            WHERE category_id = ? AND user_id = ? AND direction = 'expense'
              AND date >= ? AND date <= ?
            "#,
            params![category_id, user_id, first, last],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Income and expense totals for a calendar month
    pub fn month_totals(&self, user_id: &str, year: i32, month: u32) -> Result<(f64, f64)> {
        let (first, last) = month_key_bounds(year, month);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT direction, COALESCE(SUM(amount), 0)
            FROM ledger_entries
            WHERE user_id = ? AND date >= ? AND date <= ?
            GROUP BY direction
            "#,
        )?;

        let mut income = 0.0;
        let mut expense = 0.0;
        let mut rows = stmt.query(params![user_id, first, last])?;
        while let Some(row) = rows.next()? {
            let direction: String = row.get(0)?;
            let total: f64 = row.get(1)?;
            match direction.as_str() {
                "income" => income = total,
                _ => expense = total,
            }
        }
        Ok((income, expense))
    }

    /// Most recent entries for a user, newest first
    pub fn recent_entries(&self, user_id: &str, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.query_entries(
            user_id,
            &EntryFilter {
                limit: Some(limit),
                ..Default::default()
            },
        )
    }
}
