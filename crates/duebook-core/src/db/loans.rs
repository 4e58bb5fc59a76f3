//! Installment loan lifecycle
//!
//! A loan owns a derived category (the "reminder category"): the loan is the
//! single source of truth for title, icon, due day, and installment amount,
//! and every loan write refreshes the category projection in the same
//! transaction. The reminder scheduler only ever reads the category.

use chrono::{Local, NaiveDate};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{info, warn};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{DeletePolicy, Loan, LoanStats, LoanUpdate, NewLoan};

fn loan_from_row(row: &Row) -> rusqlite::Result<Loan> {
    let installment_count: i64 = row.get(7)?;
    let due_day: i64 = row.get(8)?;
    let start_date_str: String = row.get(9)?;
    let installments_paid: i64 = row.get(11)?;
    let created_at_str: String = row.get(13)?;

    Ok(Loan {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        principal: row.get(5)?,
        installment_amount: row.get(6)?,
        installment_count: installment_count as u32,
        due_day: due_day as u32,
        start_date: parse_date(&start_date_str),
        active: row.get(10)?,
        installments_paid: installments_paid as u32,
        category_id: row.get(12)?,
        created_at: parse_datetime(&created_at_str),
    })
}

const LOAN_COLUMNS: &str = "id, user_id, title, description, icon, principal, installment_amount, \
     installment_count, due_day, start_date, active, installments_paid, category_id, created_at";

fn validate_loan_fields(
    title: &str,
    principal: f64,
    installment_amount: f64,
    installment_count: u32,
    due_day: u32,
) -> Result<()> {
    if principal <= 0.0 {
        return Err(Error::Validation(
            "Loan principal must be greater than zero.".to_string(),
        ));
    }
    if installment_amount <= 0.0 {
        return Err(Error::Validation(
            "Installment amount must be greater than zero.".to_string(),
        ));
    }
    if installment_count < 1 {
        return Err(Error::Validation(
            "Number of installments must be at least 1.".to_string(),
        ));
    }
    if !(1..=31).contains(&due_day) {
        return Err(Error::Validation(
            "Due day must be between 1 and 31.".to_string(),
        ));
    }
    if title.trim().is_empty() {
        return Err(Error::Validation(
            "Loan title must not be empty.".to_string(),
        ));
    }
    Ok(())
}

fn title_exists(
    conn: &rusqlite::Connection,
    title: &str,
    user_id: &str,
    exclude_loan_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let count: i64 = match exclude_loan_id {
        Some(exclude) => conn.query_row(
            "SELECT COUNT(*) FROM loans WHERE user_id = ? AND title = ? AND id != ?",
            params![user_id, title, exclude],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM loans WHERE user_id = ? AND title = ?",
            params![user_id, title],
            |row| row.get(0),
        )?,
    };
    Ok(count > 0)
}

impl Database {
    /// Create a loan and its derived reminder category in one transaction.
    ///
    /// When `wants_reminder` is set, the category is flagged as a fixed
    /// expense carrying the loan's due day and installment amount, which
    /// makes it visible to the notification scheduler. No notification is
    /// generated here; the scheduler's next pass owns that.
    pub fn create_loan(&self, user_id: &str, new: &NewLoan, wants_reminder: bool) -> Result<Loan> {
        validate_loan_fields(
            &new.title,
            new.principal,
            new.installment_amount,
            new.installment_count,
            new.due_day,
        )?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if title_exists(&tx, &new.title, user_id, None)? {
            return Err(Error::Validation(
                "A loan with this title already exists.".to_string(),
            ));
        }

        tx.execute(
            r#"
            INSERT INTO categories (user_id, title, icon, direction, is_fixed_expense, day_of_month, estimated_amount)
            VALUES (?, ?, ?, 'expense', ?, ?, ?)
            "#,
            params![
                user_id,
                new.title,
                new.icon,
                wants_reminder,
                wants_reminder.then_some(new.due_day),
                wants_reminder.then_some(new.installment_amount),
            ],
        )?;
        let category_id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO loans (user_id, title, description, icon, principal, installment_amount,
                               installment_count, due_day, start_date, active, installments_paid, category_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?)
            "#,
            params![
                user_id,
                new.title,
                new.description,
                new.icon,
                new.principal,
                new.installment_amount,
                new.installment_count,
                new.due_day,
                new.start_date.to_string(),
                category_id,
            ],
        )?;
        let loan_id = tx.last_insert_rowid();
        tx.commit()?;

        info!(loan_id, category_id, wants_reminder, "created loan");
        self.get_loan(loan_id, user_id)?
            .ok_or_else(|| Error::NotFound(format!("loan {} after create", loan_id)))
    }

    /// Get a loan by id, scoped to its owning user
    pub fn get_loan(&self, id: i64, user_id: &str) -> Result<Option<Loan>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM loans WHERE id = ? AND user_id = ?",
            LOAN_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![id, user_id], loan_from_row)
            .optional()?)
    }

    /// All loans for a user, newest start date first
    pub fn list_loans(&self, user_id: &str) -> Result<Vec<Loan>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM loans WHERE user_id = ? ORDER BY start_date DESC, id DESC",
            LOAN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let loans = stmt
            .query_map(params![user_id], loan_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(loans)
    }

    /// Active loans for a user, newest start date first
    pub fn list_active_loans(&self, user_id: &str) -> Result<Vec<Loan>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM loans WHERE user_id = ? AND active ORDER BY start_date DESC, id DESC",
            LOAN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let loans = stmt
            .query_map(params![user_id], loan_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(loans)
    }

    /// Whether a loan title is already taken for this user
    pub fn loan_title_exists(
        &self,
        title: &str,
        user_id: &str,
        exclude_loan_id: Option<i64>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        Ok(title_exists(&conn, title, user_id, exclude_loan_id)?)
    }

    /// Edit a loan and refresh its category projection in one transaction.
    ///
    /// Title, icon, due day, and installment amount flow onto the category so
    /// the scheduler keeps seeing the loan's current schedule; the day and
    /// estimate are only mirrored while the category is flagged as a fixed
    /// expense (reminders stay off when they were never requested).
    pub fn update_loan(&self, id: i64, user_id: &str, update: &LoanUpdate) -> Result<bool> {
        validate_loan_fields(
            &update.title,
            update.principal,
            update.installment_amount,
            update.installment_count,
            update.due_day,
        )?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let category_id: Option<i64> = tx
            .query_row(
                "SELECT category_id FROM loans WHERE id = ? AND user_id = ?",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(category_id) = category_id else {
            return Ok(false);
        };

        if title_exists(&tx, &update.title, user_id, Some(id))? {
            return Err(Error::Validation(
                "A loan with this title already exists.".to_string(),
            ));
        }

        tx.execute(
            r#"
            UPDATE loans
            SET title = ?, description = ?, icon = ?, principal = ?, installment_amount = ?,
                installment_count = ?, due_day = ?, start_date = ?
            WHERE id = ? AND user_id = ?
            "#,
            params![
                update.title,
                update.description,
                update.icon,
                update.principal,
                update.installment_amount,
                update.installment_count,
                update.due_day,
                update.start_date.to_string(),
                id,
                user_id,
            ],
        )?;

        tx.execute(
            r#"
            UPDATE categories
            SET title = ?1,
                icon = ?2,
                day_of_month = CASE WHEN is_fixed_expense THEN ?3 ELSE NULL END,
                estimated_amount = CASE WHEN is_fixed_expense THEN ?4 ELSE NULL END
            WHERE id = ?5
            "#,
            params![
                update.title,
                update.icon,
                update.due_day,
                update.installment_amount,
                category_id,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Register the next installment payment, dated today
    pub fn register_payment(&self, id: i64, user_id: &str) -> Result<bool> {
        self.register_payment_on(id, user_id, Local::now().date_naive())
    }

    /// Register the next installment payment on a given date.
    ///
    /// One transaction: a guarded counter increment (no-op for missing,
    /// inactive, or fully paid loans), a ledger entry for the installment,
    /// and auto-deactivation when the last installment lands.
    pub fn register_payment_on(&self, id: i64, user_id: &str, today: NaiveDate) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let loan: Option<(i64, i64, f64, String, i64)> = tx
            .query_row(
                r#"
                SELECT installments_paid, installment_count, installment_amount, title, category_id
                FROM loans WHERE id = ? AND user_id = ? AND active
                "#,
                params![id, user_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((paid, count, installment_amount, title, category_id)) = loan else {
            return Ok(false);
        };
        if paid >= count {
            return Ok(false);
        }

        // The guard keeps a racing register/undo pair from over-counting
        let changed = tx.execute(
            r#"
            UPDATE loans SET installments_paid = installments_paid + 1
            WHERE id = ? AND active AND installments_paid < installment_count
            "#,
            params![id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        let paid_now = paid + 1;

        tx.execute(
            r#"
            INSERT INTO ledger_entries (user_id, category_id, direction, amount, date, note)
            VALUES (?, ?, 'expense', ?, ?, ?)
            "#,
            params![
                user_id,
                category_id,
                installment_amount,
                today.to_string(),
                format!("Installment {}/{} - {}", paid_now, count, title),
            ],
        )?;

        if paid_now >= count {
            tx.execute("UPDATE loans SET active = 0 WHERE id = ?", params![id])?;
            info!(loan_id = id, "loan fully paid; deactivated");
        }

        tx.commit()?;
        Ok(true)
    }

    /// Undo the most recent installment payment: the exact structural inverse
    /// of `register_payment`.
    ///
    /// Finds the newest expense entry for the loan's category (latest date,
    /// then highest id), decrements the counter, reactivates an
    /// auto-completed loan, and removes the entry. A non-zero counter with no
    /// matching entry is a detected inconsistency: the counter resets to zero
    /// and the call fails rather than guessing at financial history.
    pub fn undo_last_payment(&self, id: i64, user_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let loan: Option<(i64, i64, bool, i64)> = tx
            .query_row(
                r#"
                SELECT installments_paid, installment_count, active, category_id
                FROM loans WHERE id = ? AND user_id = ?
                "#,
                params![id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((paid, count, active, category_id)) = loan else {
            return Ok(false);
        };
        if paid <= 0 {
            return Ok(false);
        }

        let last_entry: Option<i64> = tx
            .query_row(
                r#"
                SELECT id FROM ledger_entries
                WHERE category_id = ? AND user_id = ? AND direction = 'expense'
                ORDER BY date DESC, id DESC
                LIMIT 1
                "#,
                params![category_id, user_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(entry_id) = last_entry else {
            // Counter says paid but the ledger disagrees. Reset to the safe
            // value and report the failure instead of fabricating history.
            tx.execute(
                "UPDATE loans SET installments_paid = 0 WHERE id = ?",
                params![id],
            )?;
            tx.commit()?;
            warn!(loan_id = id, paid, "paid counter had no matching ledger entry; reset to 0");
            return Err(Error::Inconsistency(format!(
                "loan {} recorded {} paid installments but no payment entry exists; counter reset",
                id, paid
            )));
        };

        tx.execute(
            "UPDATE loans SET installments_paid = installments_paid - 1
             WHERE id = ? AND installments_paid > 0",
            params![id],
        )?;
        if !active && paid - 1 < count {
            tx.execute("UPDATE loans SET active = 1 WHERE id = ?", params![id])?;
            info!(loan_id = id, "loan reactivated by payment undo");
        }
        tx.execute("DELETE FROM ledger_entries WHERE id = ?", params![entry_id])?;

        tx.commit()?;
        Ok(true)
    }

    /// Archive a loan without touching its history
    pub fn mark_loan_completed(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE loans SET active = 0 WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Reactivate a deactivated loan. A fully paid loan stays closed.
    pub fn reactivate_loan(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let loan: Option<(i64, i64)> = conn
            .query_row(
                "SELECT installments_paid, installment_count FROM loans WHERE id = ? AND user_id = ?",
                params![id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((paid, count)) = loan else {
            return Ok(false);
        };
        if paid >= count {
            return Err(Error::Validation(
                "A fully paid loan cannot be reactivated.".to_string(),
            ));
        }
        let changed = conn.execute(
            "UPDATE loans SET active = 1 WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a loan under the given policy.
    ///
    /// `Archive` deactivates and keeps payments and notifications for
    /// reporting. `Purge` removes the loan's notifications, ledger entries,
    /// the loan, and its category, in that dependency order, atomically.
    pub fn delete_loan(&self, id: i64, user_id: &str, policy: DeletePolicy) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let category_id: Option<i64> = tx
            .query_row(
                "SELECT category_id FROM loans WHERE id = ? AND user_id = ?",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(category_id) = category_id else {
            return Ok(false);
        };

        match policy {
            DeletePolicy::Archive => {
                tx.execute("UPDATE loans SET active = 0 WHERE id = ?", params![id])?;
            }
            DeletePolicy::Purge => {
                tx.execute(
                    "DELETE FROM notifications WHERE category_id = ? AND user_id = ?",
                    params![category_id, user_id],
                )?;
                tx.execute(
                    "DELETE FROM ledger_entries WHERE category_id = ? AND user_id = ?",
                    params![category_id, user_id],
                )?;
                tx.execute("DELETE FROM loans WHERE id = ?", params![id])?;
                tx.execute("DELETE FROM categories WHERE id = ?", params![category_id])?;
                info!(loan_id = id, category_id, "purged loan and linked history");
            }
        }

        tx.commit()?;
        Ok(true)
    }

    /// Aggregate figures across a user's active loans
    pub fn loan_stats(&self, user_id: &str) -> Result<LoanStats> {
        let loans = self.list_active_loans(user_id)?;
        if loans.is_empty() {
            return Ok(LoanStats::default());
        }

        let total_principal = loans.iter().map(|l| l.principal).sum();
        let total_to_pay: f64 = loans.iter().map(|l| l.total_to_pay()).sum();
        let total_paid: f64 = loans.iter().map(|l| l.total_paid()).sum();
        let monthly_installment_total = loans.iter().map(|l| l.installment_amount).sum();
        let average_interest_rate = loans
            .iter()
            .map(|l| l.approximate_interest_rate())
            .sum::<f64>()
            / loans.len() as f64;

        Ok(LoanStats {
            total_principal,
            total_to_pay,
            total_paid,
            total_remaining: total_to_pay - total_paid,
            monthly_installment_total,
            average_interest_rate,
        })
    }

    /// Active loans whose next payment date falls within the window
    /// [today, today + days_ahead], soonest first
    pub fn loans_with_upcoming_payments(
        &self,
        user_id: &str,
        days_ahead: i64,
        today: NaiveDate,
    ) -> Result<Vec<Loan>> {
        let horizon = today + chrono::Duration::days(days_ahead);
        let mut upcoming: Vec<(NaiveDate, Loan)> = self
            .list_active_loans(user_id)?
            .into_iter()
            .filter_map(|loan| {
                loan.next_payment_date_from(today)
                    .filter(|due| *due >= today && *due <= horizon)
                    .map(|due| (due, loan))
            })
            .collect();
        upcoming.sort_by_key(|(due, _)| *due);
        Ok(upcoming.into_iter().map(|(_, loan)| loan).collect())
    }
}
