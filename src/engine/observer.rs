use super::Mode;
use crate::migration::{Direction, MigrationUnit};
use crate::MigrateError;
use std::time::Duration;
use tracing::{error, info};

/// Receives progress events from [`super::Engine::execute`]. Every method
/// defaults to doing nothing.
pub trait Observer {
    fn on_start(&self, _unit: &MigrationUnit, _direction: Direction) {}

    fn on_success(&self, _unit: &MigrationUnit, _direction: Direction, _elapsed: Duration) {}

    fn on_failure(&self, _unit: &MigrationUnit, _direction: Direction, _error: &MigrateError) {}

    /// The mode selected no units.
    fn on_idle(&self, _mode: Mode) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Logs each unit through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_start(&self, unit: &MigrationUnit, direction: Direction) {
        info!(
            "Running {} {} ({}){}",
            direction,
            unit.version,
            unit.description,
            if unit.action(direction).transactional { "" } else { " without transaction" }
        );
    }

    fn on_success(&self, unit: &MigrationUnit, direction: Direction, elapsed: Duration) {
        info!("OK   {} {} in {:.2?}", unit.source_name(), direction, elapsed);
    }

    fn on_failure(&self, unit: &MigrationUnit, direction: Direction, err: &MigrateError) {
        error!("FAIL {} {}: {}", unit.source_name(), direction, err);
    }

    fn on_idle(&self, mode: Mode) {
        info!("{}: no migrations to run", mode);
    }
}
