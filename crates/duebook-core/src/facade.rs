//! Composition root for the engine's caller-facing read models
//!
//! Everything here is a pure function of the underlying stores, safe to
//! recompute on every call; nothing caches or owns state beyond the database
//! handle itself.

use chrono::{Datelike, Local, NaiveDate};

use crate::db::Database;
use crate::error::Result;
use crate::models::{BudgetView, Loan, Notification, Overview};

/// Default lookahead for the upcoming-payments list
pub const DEFAULT_UPCOMING_WINDOW_DAYS: i64 = 7;

/// How many ledger entries the overview shows
const OVERVIEW_RECENT_ENTRIES: usize = 5;

/// Combined read models over budgets, loans, and notifications
#[derive(Clone)]
pub struct ObligationFacade {
    db: Database,
}

impl ObligationFacade {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Active loans with a payment due in the next week
    pub fn upcoming_payments(&self, user_id: &str) -> Result<Vec<Loan>> {
        self.upcoming_payments_within(
            user_id,
            DEFAULT_UPCOMING_WINDOW_DAYS,
            Local::now().date_naive(),
        )
    }

    /// Active loans with a payment due within [today, today + days]
    pub fn upcoming_payments_within(
        &self,
        user_id: &str,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<Loan>> {
        self.db.loans_with_upcoming_payments(user_id, days, today)
    }

    /// Budgets over their assigned amount or within the warning band
    pub fn exceeded_budgets(&self, user_id: &str, month: u32, year: i32) -> Result<Vec<BudgetView>> {
        self.db.exceeded_budgets(user_id, month, year)
    }

    /// Unread payment reminders, soonest due first
    pub fn unread_reminders(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.db.unread_notifications(user_id)
    }

    pub fn unread_reminder_count(&self, user_id: &str) -> Result<i64> {
        self.db.unread_notification_count(user_id)
    }

    /// Combined dashboard read model for the current month
    pub fn overview(&self, user_id: &str) -> Result<Overview> {
        self.overview_on(user_id, Local::now().date_naive())
    }

    /// Dashboard read model as of an explicit calendar date
    pub fn overview_on(&self, user_id: &str, today: NaiveDate) -> Result<Overview> {
        let (year, month) = (today.year(), today.month());
        let (income_total, expense_total) = self.db.month_totals(user_id, year, month)?;

        Ok(Overview {
            month,
            year,
            income_total,
            expense_total,
            budget_assigned_total: self.db.total_assigned_for_month(user_id, month, year)?,
            budget_spent_total: self.db.total_spent_for_month(user_id, month, year)?,
            loan_stats: self.db.loan_stats(user_id)?,
            upcoming_payments: self.db.loans_with_upcoming_payments(
                user_id,
                DEFAULT_UPCOMING_WINDOW_DAYS,
                today,
            )?,
            unread_reminders: self.db.unread_notification_count(user_id)?,
            recent_entries: self.db.recent_entries(user_id, OVERVIEW_RECENT_ENTRIES)?,
        })
    }
}
