use super::{Action, LoadError, MigrationFn, MigrationUnit, Origin};
use std::collections::BTreeMap;

/// A migration implemented in Rust rather than SQL.
#[derive(Debug, Clone)]
pub struct CodeMigration {
    pub version: i64,
    pub name: String,
    pub up: MigrationFn,
    pub down: Option<MigrationFn>,
    pub transactional: bool,
}

impl CodeMigration {
    pub fn new(version: i64, name: impl Into<String>, up: MigrationFn) -> Self {
        Self {
            version,
            name: name.into(),
            up,
            down: None,
            transactional: true,
        }
    }

    pub fn with_down(mut self, down: MigrationFn) -> Self {
        self.down = Some(down);
        self
    }

    /// Run both directions directly on the connection, without a wrapping
    /// transaction.
    pub fn without_transaction(mut self) -> Self {
        self.transactional = false;
        self
    }

    fn to_unit(&self) -> MigrationUnit {
        MigrationUnit {
            version: self.version,
            description: self.name.replace('_', " "),
            up: Action::code(Some(self.up), self.transactional),
            down: Action::code(self.down, self.transactional),
            origin: Origin::Code,
        }
    }
}

/// Code migrations registered at startup, merged with file migrations by the
/// loader.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    migrations: BTreeMap<i64, CodeMigration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, migration: CodeMigration) -> Result<&mut Self, LoadError> {
        if migration.version < 0 {
            return Err(LoadError::InvalidVersion {
                source_name: migration.name.clone(),
                reason: format!("version {} is negative", migration.version),
            });
        }
        if let Some(existing) = self.migrations.get(&migration.version) {
            return Err(LoadError::DuplicateVersion {
                version: migration.version,
                first: existing.name.clone(),
                second: migration.name,
            });
        }
        self.migrations.insert(migration.version, migration);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub(crate) fn units(&self) -> impl Iterator<Item = MigrationUnit> + '_ {
        self.migrations.values().map(CodeMigration::to_unit)
    }
}
