pub mod config;
pub mod engine;
pub mod fix;
pub mod ledger;
pub mod migration;

use thiserror::Error;

pub use engine::{Engine, EngineOptions, Mode};
pub use migration::{Direction, LoadError, MigrationSet, MigrationUnit};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid version {0}: versions must be non-negative")]
    InvalidVersion(i64),

    #[error("invalid ledger table name {0:?}")]
    InvalidTableName(String),

    #[error("no migration found for version {0}")]
    NotFound(i64),

    #[error("version {0} is already applied")]
    AlreadyApplied(i64),

    #[error("version {0} is not applied")]
    NotApplied(i64),

    #[error("migration {version} failed ({direction}): {cause:#}")]
    MigrationFailed {
        version: i64,
        direction: Direction,
        #[source]
        cause: anyhow::Error,
    },

    #[error(
        "migration {version} ran {direction} outside a transaction but the ledger was not updated: {cause:#}; manual reconciliation required"
    )]
    LedgerInconsistent {
        version: i64,
        direction: Direction,
        #[source]
        cause: anyhow::Error,
    },

    #[error("redo of {version} reverted the migration but re-applying it failed: {cause}")]
    RedoIncomplete {
        version: i64,
        #[source]
        cause: Box<MigrateError>,
    },

    #[error("migration lock held by {holder} (expires at {expires_at})")]
    LockContention {
        holder: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("deadline exceeded before running version {next_version}")]
    DeadlineExceeded { next_version: i64 },

    #[error("database schema is outdated: {} pending migration(s) {pending:?}", .pending.len())]
    Outdated { pending: Vec<i64> },

    #[error("cannot renumber version {version}: {reason}")]
    RenameConflict { version: i64, reason: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// The migration version this error is about, if any
    pub fn version(&self) -> Option<i64> {
        match self {
            MigrateError::Load(e) => e.version(),
            MigrateError::InvalidVersion(v)
            | MigrateError::NotFound(v)
            | MigrateError::AlreadyApplied(v)
            | MigrateError::NotApplied(v) => Some(*v),
            MigrateError::MigrationFailed { version, .. }
            | MigrateError::LedgerInconsistent { version, .. }
            | MigrateError::RedoIncomplete { version, .. }
            | MigrateError::RenameConflict { version, .. } => Some(*version),
            MigrateError::DeadlineExceeded { next_version } => Some(*next_version),
            MigrateError::InvalidTableName(_)
            | MigrateError::LockContention { .. }
            | MigrateError::Outdated { .. }
            | MigrateError::Sqlite(_)
            | MigrateError::Io(_) => None,
        }
    }

    /// Lock contention from a concurrent invocation; the caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::LockContention { .. } => true,
            MigrateError::Sqlite(e) => ledger::is_busy(e),
            _ => false,
        }
    }
}
