use super::Mode;
use crate::migration::{Direction, MigrationSet};
use crate::{MigrateError, Result};
use std::collections::BTreeSet;

/// One unit to run in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub version: i64,
    pub direction: Direction,
}

impl Step {
    fn up(version: i64) -> Self {
        Self {
            version,
            direction: Direction::Up,
        }
    }

    fn down(version: i64) -> Self {
        Self {
            version,
            direction: Direction::Down,
        }
    }
}

fn check_version(version: i64) -> Result<()> {
    if version < 0 {
        return Err(MigrateError::InvalidVersion(version));
    }
    Ok(())
}

/// Every applied version we are about to revert must still have a unit.
fn require_units(set: &MigrationSet, versions: &[i64]) -> Result<()> {
    match versions.iter().find(|v| !set.contains(**v)) {
        Some(missing) => Err(MigrateError::NotFound(*missing)),
        None => Ok(()),
    }
}

/// Decide which units `mode` runs and in what order, given the currently
/// applied versions. Pure: nothing is executed here.
///
/// `up` fills every gap, not only versions above the highest applied one, so
/// a unit merged with an older version than the latest applied one still
/// runs.
pub fn plan(mode: Mode, set: &MigrationSet, applied: &BTreeSet<i64>) -> Result<Vec<Step>> {
    let pending: Vec<i64> = set
        .iter()
        .map(|u| u.version)
        .filter(|v| !applied.contains(v))
        .collect();

    let steps = match mode {
        Mode::Up => pending.into_iter().map(Step::up).collect(),
        Mode::UpByOne => pending.first().copied().map(Step::up).into_iter().collect(),
        Mode::UpTo(target) => {
            check_version(target)?;
            pending.into_iter().take_while(|v| *v <= target).map(Step::up).collect()
        }
        Mode::Apply(version) => {
            check_version(version)?;
            if !set.contains(version) {
                return Err(MigrateError::NotFound(version));
            }
            if applied.contains(&version) {
                return Err(MigrateError::AlreadyApplied(version));
            }
            vec![Step::up(version)]
        }
        Mode::Down => {
            let targets: Vec<i64> = applied.last().copied().into_iter().collect();
            require_units(set, &targets)?;
            targets.into_iter().map(Step::down).collect()
        }
        Mode::DownTo(target) => {
            check_version(target)?;
            let targets: Vec<i64> = applied.iter().rev().take_while(|v| **v > target).copied().collect();
            require_units(set, &targets)?;
            targets.into_iter().map(Step::down).collect()
        }
        Mode::Revert(version) => {
            check_version(version)?;
            if !applied.contains(&version) {
                return Err(MigrateError::NotApplied(version));
            }
            require_units(set, &[version])?;
            vec![Step::down(version)]
        }
        Mode::Redo => match applied.last() {
            Some(&version) => {
                require_units(set, &[version])?;
                vec![Step::down(version), Step::up(version)]
            }
            None => Vec::new(),
        },
        Mode::Reset => {
            let targets: Vec<i64> = applied.iter().rev().copied().collect();
            require_units(set, &targets)?;
            targets.into_iter().map(Step::down).collect()
        }
    };

    Ok(steps)
}
