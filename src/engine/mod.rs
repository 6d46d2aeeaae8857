pub mod observer;
pub mod plan;
pub mod report;

use crate::ledger::{self, InvocationLock, LedgerStore, DEFAULT_TABLE};
use crate::migration::{Direction, MigrationSet, MigrationUnit};
use crate::{MigrateError, Result};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use observer::{NoopObserver, Observer, TracingObserver};
pub use plan::{plan, Step};
pub use report::{Outcome, Report, StatusEntry, StatusReport};

/// The mutating operations `Engine::execute` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Apply every pending version, including ones below the highest applied
    Up,
    UpByOne,
    UpTo(i64),
    Apply(i64),
    /// Revert the highest applied version
    Down,
    DownTo(i64),
    Revert(i64),
    Redo,
    Reset,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Up => f.write_str("up"),
            Mode::UpByOne => f.write_str("up-by-one"),
            Mode::UpTo(v) => write!(f, "up-to {v}"),
            Mode::Apply(v) => write!(f, "apply {v}"),
            Mode::Down => f.write_str("down"),
            Mode::DownTo(v) => write!(f, "down-to {v}"),
            Mode::Revert(v) => write!(f, "revert {v}"),
            Mode::Redo => f.write_str("redo"),
            Mode::Reset => f.write_str("reset"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub table: String,
    pub lock_ttl: Duration,
    pub busy_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            lock_ttl: Duration::from_secs(300),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Runs migrations against one SQLite connection and keeps the ledger in
/// step with the schema.
pub struct Engine {
    conn: Connection,
    ledger: LedgerStore,
    lock: InvocationLock,
    deadline: Option<Instant>,
}

impl Engine {
    pub fn new(conn: Connection) -> Result<Self> {
        Self::with_options(conn, EngineOptions::default())
    }

    pub fn with_options(conn: Connection, options: EngineOptions) -> Result<Self> {
        let ledger = LedgerStore::new(options.table)?;
        conn.busy_timeout(options.busy_timeout)?;
        let lock = InvocationLock::new(ledger.table(), options.lock_ttl);
        Ok(Self {
            conn,
            ledger,
            lock,
            deadline: None,
        })
    }

    /// Stop before starting any unit once `deadline` has passed. A unit that
    /// is already running always finishes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Run `mode` against `set`. Units run one at a time; the first failure
    /// aborts the batch.
    pub fn execute(&mut self, mode: Mode, set: &MigrationSet, observer: &dyn Observer) -> Result<Report> {
        self.ledger.ensure_initialized(&mut self.conn)?;
        self.lock.acquire(&mut self.conn)?;

        let result = self.execute_locked(mode, set, observer);

        // Always release lock
        if let Err(e) = self.lock.release(&self.conn) {
            warn!("Failed to release migration lock {}: {}", self.lock.holder(), e);
        }

        result
    }

    fn execute_locked(&mut self, mode: Mode, set: &MigrationSet, observer: &dyn Observer) -> Result<Report> {
        let applied = self.applied_versions()?;
        let steps = plan(mode, set, &applied)?;

        let mut report = Report::new(mode);
        if steps.is_empty() {
            info!("{}: nothing to do", mode);
            observer.on_idle(mode);
            return Ok(report);
        }

        debug!("{}: {} step(s) planned", mode, steps.len());
        for step in steps {
            let unit = set.get(step.version).ok_or(MigrateError::NotFound(step.version))?;

            // The re-apply half of redo belongs to the same logical unit
            let redo_reapply = mode == Mode::Redo && step.direction == Direction::Up;
            if !redo_reapply {
                self.check_deadline(step.version)?;
            }

            match self.run_one(unit, step.direction, observer) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) if redo_reapply => {
                    return Err(MigrateError::RedoIncomplete {
                        version: step.version,
                        cause: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    fn check_deadline(&self, next_version: i64) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!("Deadline passed before version {}", next_version);
                Err(MigrateError::DeadlineExceeded { next_version })
            }
            _ => Ok(()),
        }
    }

    /// Run a single unit in one direction and record it in the ledger.
    fn run_one(&mut self, unit: &MigrationUnit, direction: Direction, observer: &dyn Observer) -> Result<Outcome> {
        observer.on_start(unit, direction);
        let start = Instant::now();

        let result = if unit.action(direction).transactional {
            self.run_in_transaction(unit, direction)
        } else {
            self.run_direct(unit, direction)
        };

        match result {
            Ok(()) => {
                let elapsed = start.elapsed();
                observer.on_success(unit, direction, elapsed);
                Ok(Outcome {
                    version: unit.version,
                    description: unit.description.clone(),
                    direction,
                    elapsed,
                })
            }
            Err(e) => {
                observer.on_failure(unit, direction, &e);
                Err(e)
            }
        }
    }

    fn run_in_transaction(&mut self, unit: &MigrationUnit, direction: Direction) -> Result<()> {
        let version = unit.version;
        let failed = |cause: anyhow::Error| MigrateError::MigrationFailed {
            version,
            direction,
            cause,
        };

        // IMMEDIATE takes the write lock up front; dropping `tx` rolls back
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-check under the write lock: another process may have got here first
        check_precondition(&self.ledger, &tx, version, direction)?;

        unit.run(direction, &tx).map_err(failed)?;

        let recorded = match direction {
            Direction::Up => self.ledger.record_applied(&tx, version, Utc::now()),
            Direction::Down => self.ledger.record_reverted(&tx, version),
        };
        recorded.map_err(|e| failed(e.into()))?;

        tx.commit().map_err(|e| commit_error(version, direction, e))?;
        Ok(())
    }

    /// Statements that can't run inside a transaction. The ledger write is a
    /// separate step; if it fails the schema change already happened.
    fn run_direct(&mut self, unit: &MigrationUnit, direction: Direction) -> Result<()> {
        let version = unit.version;
        check_precondition(&self.ledger, &self.conn, version, direction)?;

        unit.run(direction, &self.conn)
            .map_err(|cause| MigrateError::MigrationFailed {
                version,
                direction,
                cause,
            })?;

        let recorded = match direction {
            Direction::Up => self.ledger.record_applied(&self.conn, version, Utc::now()),
            Direction::Down => self.ledger.record_reverted(&self.conn, version),
        };
        recorded.map_err(|e| MigrateError::LedgerInconsistent {
            version,
            direction,
            cause: e.into(),
        })
    }

    fn applied_versions(&self) -> Result<BTreeSet<i64>> {
        Ok(self
            .ledger
            .list_applied(&self.conn)?
            .into_iter()
            .map(|e| e.version)
            .collect())
    }

    /// Applied or pending state of every unit, plus ledger rows without a unit.
    pub fn status(&mut self, set: &MigrationSet) -> Result<StatusReport> {
        self.ledger.ensure_initialized(&mut self.conn)?;
        let mut applied = self.ledger.list_applied(&self.conn)?;

        let entries = set
            .iter()
            .map(|unit| StatusEntry {
                version: unit.version,
                description: unit.description.clone(),
                source: unit.source_name(),
                applied_at: applied
                    .iter()
                    .find(|e| e.version == unit.version)
                    .map(|e| e.applied_at),
            })
            .collect();

        applied.retain(|e| !set.contains(e.version));
        if !applied.is_empty() {
            warn!("{} ledger version(s) have no migration", applied.len());
        }

        Ok(StatusReport {
            entries,
            orphaned: applied,
        })
    }

    /// Highest applied version; `None` means no migrations have been applied.
    pub fn current_version(&mut self) -> Result<Option<i64>> {
        self.ledger.ensure_initialized(&mut self.conn)?;
        self.ledger.max_applied(&self.conn)
    }

    /// Versions in `set` that the ledger does not have, ascending.
    pub fn pending(&mut self, set: &MigrationSet) -> Result<Vec<i64>> {
        self.ledger.ensure_initialized(&mut self.conn)?;
        let applied = self.applied_versions()?;
        Ok(set
            .iter()
            .map(|u| u.version)
            .filter(|v| !applied.contains(v))
            .collect())
    }

    /// Fail with `Outdated` when any unit in `set` is still pending.
    pub fn ensure_current(&mut self, set: &MigrationSet) -> Result<()> {
        let pending = self.pending(set)?;
        if !pending.is_empty() {
            return Err(MigrateError::Outdated { pending });
        }
        Ok(())
    }
}

fn check_precondition(ledger: &LedgerStore, conn: &Connection, version: i64, direction: Direction) -> Result<()> {
    let applied = ledger.is_applied(conn, version)?;
    match direction {
        Direction::Up if applied => Err(MigrateError::AlreadyApplied(version)),
        Direction::Down if !applied => Err(MigrateError::NotApplied(version)),
        _ => Ok(()),
    }
}

/// BUSY/LOCKED at COMMIT is contention, not a failed unit.
fn commit_error(version: i64, direction: Direction, err: rusqlite::Error) -> MigrateError {
    if ledger::is_busy(&err) {
        warn!("commit of migration {} ({}) hit a busy database", version, direction);
        return MigrateError::Sqlite(err);
    }
    MigrateError::MigrationFailed {
        version,
        direction,
        cause: err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_commit_is_transient() {
        let err = commit_error(3, Direction::Up, sqlite_failure(ffi::SQLITE_BUSY));
        assert!(matches!(err, MigrateError::Sqlite(_)));
        assert!(err.is_transient());

        let locked = commit_error(3, Direction::Down, sqlite_failure(ffi::SQLITE_LOCKED));
        assert!(locked.is_transient());
    }

    #[test]
    fn test_other_commit_failure_is_migration_failure() {
        let err = commit_error(3, Direction::Up, sqlite_failure(ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, MigrateError::MigrationFailed { version: 3, .. }));
        assert!(!err.is_transient());
    }
}
