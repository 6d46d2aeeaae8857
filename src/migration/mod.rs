pub mod loader;
pub mod parser;
pub mod registry;

use rusqlite::Connection;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub use loader::{load_from, load_set, DirectorySource, MigrationSource};
pub use registry::{CodeMigration, Registry};

/// Callback backing a code-registered migration. A `rusqlite::Transaction`
/// derefs to `Connection`, so the same function runs inside or outside a
/// transaction.
pub type MigrationFn = fn(&Connection) -> anyhow::Result<()>;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    #[error("malformed migration {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },

    #[error("invalid version in {source_name}: {reason}")]
    InvalidVersion { source_name: String, reason: String },

    #[error("cannot read migration source {location}: {source}")]
    Unreadable {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration {source_name} has an Up section with no statements")]
    EmptyUp { source_name: String },

    #[error("migration {source_name} has a Down marker with no preceding Up marker")]
    DownWithoutUp { source_name: String },
}

impl LoadError {
    pub fn version(&self) -> Option<i64> {
        match self {
            LoadError::DuplicateVersion { version, .. } => Some(*version),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ActionBody {
    /// Individually separated SQL statements, executed in order
    Sql(Vec<String>),

    /// Registered callback; `None` reverts nothing but still updates the ledger
    Code(Option<MigrationFn>),
}

#[derive(Debug, Clone)]
pub struct Action {
    pub body: ActionBody,
    pub transactional: bool,
}

impl Action {
    pub fn sql(statements: Vec<String>, transactional: bool) -> Self {
        Self {
            body: ActionBody::Sql(statements),
            transactional,
        }
    }

    pub fn code(function: Option<MigrationFn>, transactional: bool) -> Self {
        Self {
            body: ActionBody::Code(function),
            transactional,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.body {
            ActionBody::Sql(statements) => statements.is_empty(),
            ActionBody::Code(function) => function.is_none(),
        }
    }

    fn run(&self, conn: &Connection) -> anyhow::Result<()> {
        match &self.body {
            ActionBody::Sql(statements) => {
                for (index, sql) in statements.iter().enumerate() {
                    conn.execute_batch(sql).map_err(|e| {
                        anyhow::anyhow!("statement {} failed: {}: {}", index + 1, e, sql.trim())
                    })?;
                }
                Ok(())
            }
            ActionBody::Code(Some(function)) => function(conn),
            ActionBody::Code(None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File { path: PathBuf },
    Code,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File { path } => match path.file_name() {
                Some(name) => write!(f, "{}", name.to_string_lossy()),
                None => write!(f, "{}", path.display()),
            },
            Origin::Code => f.write_str("<registered>"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationUnit {
    pub version: i64,
    pub description: String,
    pub up: Action,
    pub down: Action,
    pub origin: Origin,
}

impl MigrationUnit {
    pub fn action(&self, direction: Direction) -> &Action {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// Execute one direction of this unit on `conn`. The caller decides
    /// whether `conn` is a transaction.
    pub fn run(&self, direction: Direction, conn: &Connection) -> anyhow::Result<()> {
        self.action(direction).run(conn)
    }

    /// Label used in logs and status output
    pub fn source_name(&self) -> String {
        match &self.origin {
            Origin::File { .. } => self.origin.to_string(),
            Origin::Code => format!("{}_{}", self.version, self.description.replace(' ', "_")),
        }
    }
}

/// All discovered units, sorted ascending by numeric version with no duplicates.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
}

impl MigrationSet {
    /// Build a set, rejecting duplicate versions.
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self, LoadError> {
        units.sort_by_key(|u| u.version);
        for pair in units.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(LoadError::DuplicateVersion {
                    version: pair[0].version,
                    first: pair[0].source_name(),
                    second: pair[1].source_name(),
                });
            }
        }
        Ok(Self { units })
    }

    pub fn get(&self, version: i64) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by_key(&version, |u| u.version)
            .ok()
            .map(|i| &self.units[i])
    }

    pub fn contains(&self, version: i64) -> bool {
        self.get(version).is_some()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationUnit> {
        self.units.iter()
    }

    pub fn versions(&self) -> Vec<i64> {
        self.units.iter().map(|u| u.version).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn first(&self) -> Option<&MigrationUnit> {
        self.units.first()
    }

    pub fn last(&self) -> Option<&MigrationUnit> {
        self.units.last()
    }
}
