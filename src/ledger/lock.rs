use crate::{MigrateError, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

/// Cross-process lock held for the duration of one mutating invocation.
///
/// Backed by a single-row table (`CHECK (id = 1)`), so the primary key makes
/// sure at most one holder exists. The row is deleted on release; a row left
/// behind by a crashed process is taken over once it expires.
#[derive(Debug)]
pub struct InvocationLock {
    table: String,
    holder: String,
    ttl: Duration,
}

impl InvocationLock {
    pub fn new(ledger_table: &str, ttl: std::time::Duration) -> Self {
        Self {
            table: format!("{ledger_table}_lock"),
            holder: format!("{}:{}", std::process::id(), Uuid::new_v4()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(300)),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn ensure_table(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                locked_by TEXT NOT NULL,
                locked_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );",
            self.table
        ))?;
        tx.commit()?;
        Ok(())
    }

    pub fn acquire(&self, conn: &mut Connection) -> Result<()> {
        self.ensure_table(conn)?;

        let now = Utc::now();
        let expires = now + self.ttl;

        // Check and insert in one write transaction so a contender can't slip
        // in between.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<(String, DateTime<Utc>)> = tx
            .query_row(
                &format!("SELECT locked_by, expires_at FROM {} WHERE id = 1", self.table),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match current {
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO {} (id, locked_by, locked_at, expires_at) VALUES (1, ?1, ?2, ?3)",
                        self.table
                    ),
                    params![self.holder, now, expires],
                )?;
            }
            Some((locked_by, expires_at)) if expires_at < now => {
                warn!("Taking over expired migration lock held by {}", locked_by);
                tx.execute(
                    &format!(
                        "UPDATE {} SET locked_by = ?1, locked_at = ?2, expires_at = ?3 WHERE id = 1",
                        self.table
                    ),
                    params![self.holder, now, expires],
                )?;
            }
            Some((locked_by, expires_at)) => {
                return Err(MigrateError::LockContention {
                    holder: locked_by,
                    expires_at,
                });
            }
        }
        tx.commit()?;

        debug!("Acquired migration lock as {}", self.holder);
        Ok(())
    }

    /// Release the lock if we still hold it.
    pub fn release(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!("DELETE FROM {} WHERE id = 1 AND locked_by = ?1", self.table),
            params![self.holder],
        )?;
        debug!("Released migration lock {}", self.holder);
        Ok(())
    }
}
