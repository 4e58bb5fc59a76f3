//! DueBook Core Library
//!
//! Recurring-obligation engine for the DueBook personal finance tool:
//! - Database access and migrations
//! - Budget aggregation computed from the raw ledger on every read
//! - Installment loan ledger with reversible payments and category mirroring
//! - Fixed-expense payment reminders with per-cycle idempotency
//! - Background scheduler driver for the daily reminder pass

pub mod db;
pub mod error;
pub mod facade;
pub mod models;
pub mod scheduler;

pub use db::{Database, EntryFilter};
pub use error::{Error, Result};
pub use facade::{ObligationFacade, DEFAULT_UPCOMING_WINDOW_DAYS};
pub use models::{
    Budget, BudgetView, Category, DeletePolicy, Direction, FixedSchedule, LedgerEntry, Loan,
    LoanStats, LoanUpdate, NewLoan, Notification, Overview, RateBand,
};
pub use scheduler::{start_notification_scheduler, NotificationScheduleConfig};
