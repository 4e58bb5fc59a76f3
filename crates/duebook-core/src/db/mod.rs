//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `categories` - Category directory (fixed-expense flags and schedules)
//! - `ledger` - Dated monetary entries, including the loan-payment rollback
//!   rule on deletion
//! - `budgets` - Budget records and period aggregation over the raw ledger
//! - `loans` - Installment loan lifecycle and derived read models
//! - `notifications` - Payment reminders and the per-cycle generation
//!   algorithm

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::PathBuf;
use tracing::info;

use crate::error::{Error, Result};

mod budgets;
mod categories;
mod ledger;
mod loans;
mod notifications;

pub use ledger::EntryFilter;
pub use notifications::{DEFAULT_RETENTION_DAYS, NOTIFY_LEAD_DAYS};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "DUEBOOK_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path. This allows moving/renaming/restoring the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"duebook-salt-v1-";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    // Extract the hash portion for use as SQLCipher key (hex encoded)
    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a SQLite date string into a NaiveDate
pub(crate) fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

/// First and last day of a calendar month as SQL date strings
pub(crate) fn month_key_bounds(year: i32, month: u32) -> (String, String) {
    let (first, last) = crate::models::month_bounds(year, month);
    (first.to_string(), last.to_string())
}

/// True when a statement failed on a UNIQUE/CHECK constraint
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                ..
            },
            _,
        )
    )
}

/// Platform default location of the database file
pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "No platform data directory",
        ))
    })?;
    let dir = base.join("duebook");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("duebook.db"))
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `DUEBOOK_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `DUEBOOK_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use an unencrypted database (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `DUEBOOK_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Use with_init to set the key on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("duebook_test_{}_{}.db", std::process::id(), id));
        let path = path.to_string_lossy().to_string();

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- Performance pragmas for local storage
            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Cache size: ~8MB (2000 pages * 4KB default page size)
            PRAGMA cache_size = 2000;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Store temp tables in memory (faster for complex queries)
            PRAGMA temp_store = MEMORY;

            -- Categories (user-scoped; the reminder fields travel with the flag)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                icon TEXT NOT NULL DEFAULT '📁',
                direction TEXT NOT NULL DEFAULT 'expense',
                is_fixed_expense BOOLEAN NOT NULL DEFAULT 0,
                day_of_month INTEGER,
                estimated_amount REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                CHECK (direction IN ('income', 'expense')),
                CHECK (day_of_month IS NULL OR day_of_month BETWEEN 1 AND 31),
                CHECK ((is_fixed_expense AND day_of_month IS NOT NULL AND estimated_amount IS NOT NULL)
                    OR (NOT is_fixed_expense AND day_of_month IS NULL AND estimated_amount IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id);
            CREATE INDEX IF NOT EXISTS idx_categories_fixed ON categories(is_fixed_expense);

            -- Ledger entries (immutable once appended, except deletion)
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                direction TEXT NOT NULL,
                amount REAL NOT NULL CHECK (amount > 0),
                date DATE NOT NULL,
                note TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                CHECK (direction IN ('income', 'expense'))
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_user_date ON ledger_entries(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_ledger_category ON ledger_entries(category_id);

            -- Budgets (spent amount is never stored; derived from the ledger)
            CREATE TABLE IF NOT EXISTS budgets (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                assigned_amount REAL NOT NULL CHECK (assigned_amount >= 0),
                month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
                year INTEGER NOT NULL,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- One active budget per user/category/period
            CREATE UNIQUE INDEX IF NOT EXISTS idx_budgets_active_cycle
                ON budgets(user_id, category_id, month, year) WHERE active;
            CREATE INDEX IF NOT EXISTS idx_budgets_user_period ON budgets(user_id, year, month);

            -- Installment loans (category_id points at the auto-created
            -- reminder category the loan projects its schedule onto)
            CREATE TABLE IF NOT EXISTS loans (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                icon TEXT NOT NULL DEFAULT '🏦',
                principal REAL NOT NULL CHECK (principal > 0),
                installment_amount REAL NOT NULL CHECK (installment_amount > 0),
                installment_count INTEGER NOT NULL CHECK (installment_count >= 1),
                due_day INTEGER NOT NULL CHECK (due_day BETWEEN 1 AND 31),
                start_date DATE NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                installments_paid INTEGER NOT NULL DEFAULT 0 CHECK (installments_paid >= 0),
                category_id INTEGER NOT NULL REFERENCES categories(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, title)
            );

            CREATE INDEX IF NOT EXISTS idx_loans_user ON loans(user_id);
            CREATE INDEX IF NOT EXISTS idx_loans_category ON loans(category_id);

            -- Payment reminders. The unique cycle index is the scheduler's
            -- idempotency invariant: at most one notification per
            -- category/user/billing cycle, enforced by the store so racing
            -- passes fail closed.
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                user_id TEXT NOT NULL,
                notification_date DATE NOT NULL,
                due_date DATE NOT NULL,
                is_read BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_cycle
                ON notifications(category_id, user_id, strftime('%Y-%m', due_date));
            CREATE INDEX IF NOT EXISTS idx_notifications_user_read ON notifications(user_id, is_read);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
