mod common;

use common::{path_name, Fixture};
use migledger::engine::{Mode, NoopObserver};
use migledger::fix::{fix, plan_fix};
use migledger::migration::{CodeMigration, Registry};
use migledger::MigrateError;
use pretty_assertions::assert_eq;
use rusqlite::Connection;

#[test]
fn test_fix_renumbers_timestamped_files_after_sequential_ones() {
    let fixture = Fixture::new();
    fixture.write_table("00001_users.sql", "users");
    fixture.write_table("00002_posts.sql", "posts");
    fixture.write_table("20240301120000_tags.sql", "tags");
    fixture.write_table("20240105090000_comments.sql", "comments");

    let renames = fix(&fixture.load()).unwrap();
    let summary: Vec<(i64, i64, String)> = renames
        .iter()
        .map(|r| (r.old_version, r.new_version, path_name(&r.to)))
        .collect();
    assert_eq!(
        summary,
        vec![
            (20240105090000, 3, "00003_comments.sql".to_string()),
            (20240301120000, 4, "00004_tags.sql".to_string()),
        ]
    );

    let set = fixture.load();
    assert_eq!(set.versions(), vec![1, 2, 3, 4]);
    assert!(!fixture.migrations_dir().join("20240301120000_tags.sql").exists());
}

#[test]
fn test_fix_with_only_timestamps_starts_at_one() {
    let fixture = Fixture::new();
    fixture.write_table("20240101000000_a.sql", "a");
    let renames = plan_fix(&fixture.load()).unwrap();
    assert_eq!(renames.len(), 1);
    assert_eq!(renames[0].new_version, 1);
    // plan_fix does not touch the filesystem
    assert!(renames[0].from.exists());
    assert!(!renames[0].to.exists());
}

#[test]
fn test_fix_nothing_to_do() {
    let fixture = Fixture::new();
    fixture.write_table("00001_users.sql", "users");
    assert!(fix(&fixture.load()).unwrap().is_empty());
}

#[test]
fn test_fix_leaves_ledger_untouched() {
    let fixture = Fixture::new();
    fixture.write_table("20240101000000_a.sql", "a");
    let mut engine = fixture.engine();
    engine.execute(Mode::Up, &fixture.load(), &NoopObserver).unwrap();

    fix(&fixture.load()).unwrap();

    // The old version stays in the ledger and now has no backing file
    let status = engine.status(&fixture.load()).unwrap();
    assert_eq!(status.pending(), vec![1]);
    assert_eq!(status.orphaned.len(), 1);
    assert_eq!(status.orphaned[0].version, 20240101000000);
}

#[test]
fn test_fix_skips_registered_migrations() {
    fn noop(_conn: &Connection) -> anyhow::Result<()> {
        Ok(())
    }

    let fixture = Fixture::new();
    fixture.write_table("00001_users.sql", "users");
    let mut registry = Registry::new();
    registry
        .register(CodeMigration::new(20240101000000, "seed", noop))
        .unwrap();

    assert!(fix(&fixture.load_with(&registry)).unwrap().is_empty());
}

#[test]
fn test_fix_refuses_to_overwrite() {
    let fixture = Fixture::new();
    fixture.write_table("20240101000000_a.sql", "a");
    // Not a migration file name the loader sees as version 1, but it occupies the target path
    std::fs::create_dir(fixture.migrations_dir().join("00001_a.sql")).unwrap();

    let err = fix(&fixture.load()).unwrap_err();
    assert!(matches!(err, MigrateError::RenameConflict { version: 20240101000000, .. }));
    assert!(fixture.migrations_dir().join("20240101000000_a.sql").exists());
}

#[test]
fn test_fix_fails_when_no_sequential_version_left() {
    let fixture = Fixture::new();
    fixture.write_table(&format!("{}_last.sql", i64::MAX), "last");
    fixture.write_table("20240101000000_a.sql", "a");

    let err = fix(&fixture.load()).unwrap_err();
    assert!(matches!(err, MigrateError::RenameConflict { version: 20240101000000, .. }));
    assert!(fixture.migrations_dir().join("20240101000000_a.sql").exists());
}
