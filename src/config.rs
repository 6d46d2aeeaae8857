use crate::engine::{EngineOptions, Mode};
use crate::ledger::DEFAULT_TABLE;
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};

#[derive(Parser, Debug, Clone)]
#[command(name = "migledger", version)]
#[command(about = "migledger - ordered, reversible SQLite schema migrations tracked in a ledger table", long_about = None)]
pub struct Config {
    #[arg(short, long, default_value = "migledger.db", env = "MIGLEDGER_DATABASE")]
    pub database: String,

    #[arg(long, default_value = "migrations", env = "MIGLEDGER_DIR", help = "Directory holding <version>_<name>.sql files")]
    pub dir: String,

    #[arg(long, default_value = DEFAULT_TABLE, env = "MIGLEDGER_TABLE", help = "Name of the ledger table")]
    pub table: String,

    #[arg(long, default_value = "info", env = "MIGLEDGER_LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, default_value = "300", env = "MIGLEDGER_LOCK_TTL", help = "Seconds before an abandoned migration lock may be taken over")]
    pub lock_ttl: u64,

    #[arg(long, default_value = "5000", env = "MIGLEDGER_BUSY_TIMEOUT", help = "Milliseconds to wait on a locked database")]
    pub busy_timeout: u64,

    #[arg(long, env = "MIGLEDGER_DEADLINE", help = "Seconds after which no further migration is started")]
    pub deadline: Option<u64>,

    #[arg(long, env = "MIGLEDGER_JSON", help = "Print reports as JSON")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Apply every pending migration, including ones older than the latest applied
    Up,
    /// Apply the lowest pending migration
    UpByOne,
    /// Apply pending migrations up to and including VERSION
    UpTo { version: i64 },
    /// Apply exactly VERSION
    Apply { version: i64 },
    /// Revert the highest applied migration
    Down,
    /// Revert applied migrations above VERSION
    DownTo { version: i64 },
    /// Revert exactly VERSION
    Revert { version: i64 },
    /// Revert and re-apply the highest applied migration
    Redo,
    /// Revert every applied migration
    Reset,
    /// Show applied and pending migrations
    Status,
    /// Print the highest applied version
    Version,
    /// Renumber timestamped migration files into sequential versions
    Fix,
}

impl Command {
    /// The engine mode for mutating commands, `None` for status/version/fix.
    pub fn mode(self) -> Option<Mode> {
        let mode = match self {
            Command::Up => Mode::Up,
            Command::UpByOne => Mode::UpByOne,
            Command::UpTo { version } => Mode::UpTo(version),
            Command::Apply { version } => Mode::Apply(version),
            Command::Down => Mode::Down,
            Command::DownTo { version } => Mode::DownTo(version),
            Command::Revert { version } => Mode::Revert(version),
            Command::Redo => Mode::Redo,
            Command::Reset => Mode::Reset,
            Command::Status | Command::Version | Command::Fix => return None,
        };
        Some(mode)
    }
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            table: self.table.clone(),
            lock_ttl: Duration::from_secs(self.lock_ttl),
            busy_timeout: Duration::from_millis(self.busy_timeout),
        }
    }

    /// Absolute deadline for this invocation, measured from now
    pub fn deadline_instant(&self) -> Option<Instant> {
        self.deadline.map(|secs| Instant::now() + Duration::from_secs(secs))
    }
}
