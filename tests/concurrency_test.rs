mod common;

use common::{applied_versions, Fixture};
use migledger::engine::{Mode, NoopObserver};
use migledger::{Engine, MigrateError};
use rusqlite::Connection;
use std::sync::Barrier;

fn is_contention(err: &MigrateError) -> bool {
    matches!(err, MigrateError::AlreadyApplied(_)) || err.is_transient()
}

#[test]
fn test_concurrent_apply_same_version() {
    let fixture = Fixture::new();
    fixture.write(
        "00001_slow.sql",
        "-- +migrate Up\nCREATE TABLE counter (n INTEGER);\nINSERT INTO counter VALUES (1);\n-- +migrate Down\nDROP TABLE counter;\n",
    );
    let set = fixture.load();
    let db_path = fixture.db_path();
    let barrier = Barrier::new(4);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut engine = Engine::new(Connection::open(&db_path).unwrap()).unwrap();
                    barrier.wait();
                    engine.execute(Mode::Apply(1), &set, &NoopObserver).map(|r| r.applied())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let succeeded: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(succeeded.len(), 1, "results: {results:?}");
    for result in &results {
        if let Err(e) = result {
            assert!(is_contention(e), "unexpected error: {e:?}");
        }
    }

    let engine = fixture.engine();
    assert_eq!(applied_versions(&engine), vec![1]);
    let rows: i64 = engine
        .connection()
        .query_row("SELECT COUNT(*) FROM counter", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn test_concurrent_up_runs_each_unit_once() {
    let fixture = Fixture::new();
    for version in 1..=5 {
        fixture.write(
            &format!("{version:05}_t{version}.sql"),
            &format!("-- +migrate Up\nCREATE TABLE t{version} (id INTEGER);\n-- +migrate Down\nDROP TABLE t{version};\n"),
        );
    }
    let set = fixture.load();
    let db_path = fixture.db_path();
    let barrier = Barrier::new(3);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..3)
            .map(|_| {
                s.spawn(|| {
                    let mut engine = Engine::new(Connection::open(&db_path).unwrap()).unwrap();
                    barrier.wait();
                    engine.execute(Mode::Up, &set, &NoopObserver).map(|r| r.applied())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Every unit ran exactly once across all invocations
    let mut applied: Vec<i64> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .flatten()
        .copied()
        .collect();
    applied.sort();
    assert_eq!(applied, vec![1, 2, 3, 4, 5], "results: {results:?}");

    for result in &results {
        if let Err(e) = result {
            assert!(is_contention(e), "unexpected error: {e:?}");
        }
    }
    assert_eq!(applied_versions(&fixture.engine()), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_concurrent_ensure_initialized() {
    let fixture = Fixture::new();
    let db_path = fixture.db_path();
    let barrier = Barrier::new(4);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut engine = Engine::new(Connection::open(&db_path).unwrap()).unwrap();
                barrier.wait();
                assert_eq!(engine.current_version().unwrap(), None);
            });
        }
    });
}
