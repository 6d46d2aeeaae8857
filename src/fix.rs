//! Renumber timestamp-versioned migration files into sequential versions.
//!
//! Ledger rows are left alone: a database that already applied
//! `20240102030405_users.sql` keeps that version even after the file becomes
//! `00004_users.sql`.

use crate::migration::{MigrationSet, Origin};
use crate::{MigrateError, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub old_version: i64,
    pub new_version: i64,
    pub from: PathBuf,
    pub to: PathBuf,
}

pub fn is_timestamp(version: i64) -> bool {
    NaiveDateTime::parse_from_str(&version.to_string(), TIMESTAMP_FORMAT).is_ok()
}

/// Work out the renames without touching the filesystem.
pub fn plan_fix(set: &MigrationSet) -> Result<Vec<Rename>> {
    let highest = set.iter().map(|u| u.version).filter(|v| !is_timestamp(*v)).max();
    // None once the version space is exhausted
    let mut next = highest.map_or(Some(1), |v| v.checked_add(1));

    let mut taken: BTreeSet<i64> = set.versions().into_iter().collect();
    let mut renames = Vec::new();

    for unit in set.iter().filter(|u| is_timestamp(u.version)) {
        let Origin::File { path } = &unit.origin else {
            warn!("Skipping registered migration {}: not backed by a file", unit.version);
            continue;
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrateError::RenameConflict {
                version: unit.version,
                reason: format!("unusable file name {}", path.display()),
            })?;
        let prefix = unit.version.to_string();
        let Some(rest) = file_name.strip_prefix(prefix.as_str()) else {
            return Err(MigrateError::RenameConflict {
                version: unit.version,
                reason: format!("{file_name} does not start with its version"),
            });
        };

        let Some(next_version) = next else {
            return Err(MigrateError::RenameConflict {
                version: unit.version,
                reason: "no sequential version left to assign".to_string(),
            });
        };
        if taken.contains(&next_version) {
            return Err(MigrateError::RenameConflict {
                version: unit.version,
                reason: format!("version {next_version} is already used"),
            });
        }

        let to = path.with_file_name(format!("{next_version:05}{rest}"));
        if to.exists() {
            return Err(MigrateError::RenameConflict {
                version: unit.version,
                reason: format!("{} already exists", to.display()),
            });
        }

        taken.insert(next_version);
        renames.push(Rename {
            old_version: unit.version,
            new_version: next_version,
            from: path.clone(),
            to,
        });
        next = next_version.checked_add(1);
    }

    Ok(renames)
}

/// Rename every timestamped file-backed unit to the next sequential version,
/// in ascending order. All conflicts are detected before the first rename.
pub fn fix(set: &MigrationSet) -> Result<Vec<Rename>> {
    let renames = plan_fix(set)?;
    for rename in &renames {
        fs::rename(&rename.from, &rename.to)?;
        info!("RENAMED {} => {}", rename.from.display(), rename.to.display());
    }
    Ok(renames)
}
