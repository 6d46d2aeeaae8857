#![allow(dead_code)]

use migledger::engine::{Mode, Observer};
use migledger::migration::{load_set, Direction, MigrationSet, MigrationUnit, Registry};
use migledger::{Engine, MigrateError};
use rusqlite::Connection;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A temporary migrations directory and database file
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("migrations")).unwrap();
        Self { dir }
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("test.db")
    }

    pub fn write(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.migrations_dir().join(file_name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Write a migration that creates table `table` and drops it on the way down
    pub fn write_table(&self, file_name: &str, table: &str) -> PathBuf {
        self.write(
            file_name,
            &format!(
                "-- +migrate Up\nCREATE TABLE {table} (id INTEGER PRIMARY KEY, name TEXT);\n\n-- +migrate Down\nDROP TABLE {table};\n"
            ),
        )
    }

    pub fn load(&self) -> MigrationSet {
        load_set(self.migrations_dir(), &Registry::new()).unwrap()
    }

    pub fn load_with(&self, registry: &Registry) -> MigrationSet {
        load_set(self.migrations_dir(), registry).unwrap()
    }

    pub fn engine(&self) -> Engine {
        Engine::new(Connection::open(self.db_path()).unwrap()).unwrap()
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |_| Ok(()),
    )
    .is_ok()
}

pub fn applied_versions(engine: &Engine) -> Vec<i64> {
    engine
        .ledger()
        .list_applied(engine.connection())
        .unwrap()
        .into_iter()
        .map(|e| e.version)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(i64, Direction),
    Success(i64, Direction),
    Failure(i64, Direction),
    Idle(Mode),
}

/// Observer that remembers every callback, in order
#[derive(Default)]
pub struct RecordingObserver {
    pub events: RefCell<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_start(&self, unit: &MigrationUnit, direction: Direction) {
        self.events.borrow_mut().push(Event::Start(unit.version, direction));
    }

    fn on_success(&self, unit: &MigrationUnit, direction: Direction, _elapsed: Duration) {
        self.events.borrow_mut().push(Event::Success(unit.version, direction));
    }

    fn on_failure(&self, unit: &MigrationUnit, direction: Direction, _error: &MigrateError) {
        self.events.borrow_mut().push(Event::Failure(unit.version, direction));
    }

    fn on_idle(&self, mode: Mode) {
        self.events.borrow_mut().push(Event::Idle(mode));
    }
}

pub fn path_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}
