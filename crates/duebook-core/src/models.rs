//! Domain models for DueBook

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Direction of money movement in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Income,
    Expense,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recurring schedule of a fixed-expense category.
///
/// The two fields travel together: a category either has both (and is flagged
/// as a fixed expense) or has neither.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedSchedule {
    /// Day of month the payment is due (1-31, clamped to month length)
    pub day_of_month: u32,
    /// Estimated amount of the recurring payment
    pub estimated_amount: f64,
}

/// A spending/income category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub icon: String,
    pub direction: Direction,
    /// Set when the category is a recurring monthly obligation
    pub is_fixed_expense: bool,
    pub day_of_month: Option<u32>,
    pub estimated_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn title_with_icon(&self) -> String {
        format!("{} {}", self.icon, self.title)
    }

    pub fn fixed_schedule(&self) -> Option<FixedSchedule> {
        match (self.is_fixed_expense, self.day_of_month, self.estimated_amount) {
            (true, Some(day_of_month), Some(estimated_amount)) => Some(FixedSchedule {
                day_of_month,
                estimated_amount,
            }),
            _ => None,
        }
    }
}

/// A dated monetary entry in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub category_id: i64,
    pub direction: Direction,
    pub amount: f64,
    pub date: NaiveDate,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A per-category monthly budget. The spent amount is never stored; it is
/// derived from the ledger on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub assigned_amount: f64,
    pub month: u32,
    pub year: i32,
    pub category_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A budget joined with its derived period figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetView {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub assigned_amount: f64,
    pub month: u32,
    pub year: i32,
    pub category_id: i64,
    pub category_title: String,
    pub category_icon: String,
    pub active: bool,
    /// Sum of expense entries for the category within the period
    pub spent_amount: f64,
    /// assigned - spent, floored at zero
    pub available_amount: f64,
    /// spent / assigned * 100 (zero when nothing is assigned)
    pub used_percentage: f64,
    pub is_over_budget: bool,
    pub is_near_limit: bool,
}

/// Deletion policy for a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Deactivate the loan; payments and notifications stay for reporting
    Archive,
    /// Remove the loan, its category, and all linked ledger/notification rows
    Purge,
}

/// Qualitative banding of a loan's approximate interest rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateBand {
    Favorable,
    Moderate,
    High,
}

impl RateBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Favorable => "favorable",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Favorable => "Favorable rate",
            Self::Moderate => "Moderate rate",
            Self::High => "High rate - consider refinancing",
        }
    }
}

impl std::fmt::Display for RateBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields for creating a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoan {
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
    /// Amount actually borrowed
    pub principal: f64,
    /// Monthly installment
    pub installment_amount: f64,
    /// Number of installments (>= 1)
    pub installment_count: u32,
    /// Day of month the installment is due (1-31)
    pub due_day: u32,
    pub start_date: NaiveDate,
}

/// Fields for editing a loan. Title, icon, due day, and installment amount
/// are mirrored onto the loan's derived category in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanUpdate {
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
    pub principal: f64,
    pub installment_amount: f64,
    pub installment_count: u32,
    pub due_day: u32,
    pub start_date: NaiveDate,
}

/// An installment loan and its payment progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
    pub principal: f64,
    pub installment_amount: f64,
    pub installment_count: u32,
    pub due_day: u32,
    pub start_date: NaiveDate,
    pub active: bool,
    pub installments_paid: u32,
    /// The auto-created reminder category this loan projects onto
    pub category_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    pub fn total_to_pay(&self) -> f64 {
        self.installment_amount * self.installment_count as f64
    }

    pub fn total_interest(&self) -> f64 {
        self.total_to_pay() - self.principal
    }

    pub fn total_paid(&self) -> f64 {
        self.installment_amount * self.installments_paid as f64
    }

    pub fn remaining_installments(&self) -> u32 {
        self.installment_count.saturating_sub(self.installments_paid)
    }

    pub fn is_completed(&self) -> bool {
        self.installments_paid >= self.installment_count
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.installment_count == 0 {
            return 0.0;
        }
        let percentage =
            (self.installments_paid as f64 / self.installment_count as f64) * 100.0;
        percentage.min(100.0)
    }

    /// Simple approximate annual interest rate, rounded to two decimals.
    /// Zero when principal or installment count is non-positive.
    pub fn approximate_interest_rate(&self) -> f64 {
        if self.principal <= 0.0 || self.installment_count == 0 {
            return 0.0;
        }
        let rate = (self.total_interest() / self.principal)
            * (12.0 / self.installment_count as f64)
            * 100.0;
        (rate * 100.0).round() / 100.0
    }

    pub fn rate_band(&self) -> RateBand {
        let rate = self.approximate_interest_rate();
        if rate <= 15.0 {
            RateBand::Favorable
        } else if rate <= 30.0 {
            RateBand::Moderate
        } else {
            RateBand::High
        }
    }

    /// Next date an installment is due: the due day clamped to the current
    /// month's length, rolled into the next month (and re-clamped) when it
    /// has already passed. `None` for inactive or fully paid loans.
    pub fn next_payment_date_from(&self, today: NaiveDate) -> Option<NaiveDate> {
        if !self.active || self.is_completed() {
            return None;
        }
        let this_month = clamped_date(today.year(), today.month(), self.due_day);
        if this_month >= today {
            return Some(this_month);
        }
        let (year, month) = next_month(today.year(), today.month());
        Some(clamped_date(year, month, self.due_day))
    }

    pub fn next_payment_date(&self) -> Option<NaiveDate> {
        self.next_payment_date_from(Local::now().date_naive())
    }
}

/// A fixed-expense payment reminder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub category_id: i64,
    pub user_id: String,
    /// Day the reminder was generated
    pub notification_date: NaiveDate,
    /// Day the payment is due
    pub due_date: NaiveDate,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn days_until_due(&self, today: NaiveDate) -> i64 {
        (self.due_date - today).num_days()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        today > self.due_date
    }

    pub fn status_text(&self, today: NaiveDate) -> String {
        if self.is_overdue(today) {
            return "OVERDUE".to_string();
        }
        match self.days_until_due(today) {
            0 => "Due TODAY".to_string(),
            1 => "Due TOMORROW".to_string(),
            days => format!("Due in {} days", days),
        }
    }
}

/// Aggregate figures across a user's active loans
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanStats {
    pub total_principal: f64,
    pub total_to_pay: f64,
    pub total_paid: f64,
    pub total_remaining: f64,
    pub monthly_installment_total: f64,
    pub average_interest_rate: f64,
}

/// Combined dashboard read model, recomputed from the stores on every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overview {
    pub month: u32,
    pub year: i32,
    pub income_total: f64,
    pub expense_total: f64,
    pub budget_assigned_total: f64,
    pub budget_spent_total: f64,
    pub loan_stats: LoanStats,
    pub upcoming_payments: Vec<Loan>,
    pub unread_reminders: i64,
    pub recent_entries: Vec<LedgerEntry>,
}

/// Number of days in a Gregorian calendar month
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if NaiveDate::from_ymd_opt(year, 2, 29).is_some() => 29,
        _ => 28,
    }
}

/// Build a date with the day clamped into the month's valid range
pub(crate) fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

/// First and last day of a calendar month
pub(crate) fn month_bounds(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    (clamped_date(year, month, 1), clamped_date(year, month, 31))
}

pub(crate) fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
