pub mod lock;

use crate::{MigrateError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::debug;

pub use lock::InvocationLock;

pub const DEFAULT_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerEntry {
    pub version: i64,
    pub applied_at: DateTime<Utc>,
}

/// True for the errors SQLite reports when another connection holds the lock.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
}

fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The persisted `version -> applied_at` table.
///
/// Every method takes the connection to run on, so callers can pass a
/// `Transaction` and have ledger writes commit or roll back together with the
/// migration itself.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    table: String,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl LedgerStore {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !valid_identifier(&table) {
            return Err(MigrateError::InvalidTableName(table));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist yet. Runs in its own
    /// IMMEDIATE transaction so concurrent callers serialize on the write lock
    /// instead of racing.
    pub fn ensure_initialized(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            );",
            self.table
        ))?;
        tx.commit()?;
        debug!("Ledger table {} ready", self.table);
        Ok(())
    }

    /// All applied entries, ascending by version.
    pub fn list_applied(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT version, applied_at FROM {} ORDER BY version",
            self.table
        ))?;
        let entries = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: row.get(0)?,
                    applied_at: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn is_applied(&self, conn: &Connection, version: i64) -> Result<bool> {
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE version = ?1", self.table),
                params![version],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Highest applied version, `None` when nothing has been applied.
    pub fn max_applied(&self, conn: &Connection) -> Result<Option<i64>> {
        let max = conn.query_row(
            &format!("SELECT MAX(version) FROM {}", self.table),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(max)
    }

    pub fn record_applied(&self, conn: &Connection, version: i64, applied_at: DateTime<Utc>) -> Result<()> {
        match conn.execute(
            &format!("INSERT INTO {} (version, applied_at) VALUES (?1, ?2)", self.table),
            params![version, applied_at],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MigrateError::AlreadyApplied(version)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record_reverted(&self, conn: &Connection, version: i64) -> Result<()> {
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE version = ?1", self.table),
            params![version],
        )?;
        if deleted == 0 {
            return Err(MigrateError::NotApplied(version));
        }
        Ok(())
    }
}
