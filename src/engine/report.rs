use super::Mode;
use crate::ledger::LedgerEntry;
use crate::migration::Direction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub version: i64,
    pub description: String,
    pub direction: Direction,
    pub elapsed: Duration,
}

/// What one `execute` call did, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub mode: Mode,
    pub outcomes: Vec<Outcome>,
}

impl Report {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            outcomes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Versions run up, in order.
    pub fn applied(&self) -> Vec<i64> {
        self.versions(Direction::Up)
    }

    /// Versions run down, in order.
    pub fn reverted(&self) -> Vec<i64> {
        self.versions(Direction::Down)
    }

    fn versions(&self, direction: Direction) -> Vec<i64> {
        self.outcomes
            .iter()
            .filter(|o| o.direction == direction)
            .map(|o| o.version)
            .collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.outcomes.is_empty() {
            return writeln!(f, "{}: no migrations to run", self.mode);
        }
        for outcome in &self.outcomes {
            let state = match outcome.direction {
                Direction::Up => "applied",
                Direction::Down => "reverted",
            };
            writeln!(
                f,
                "{:<9}{} {} ({:.2?})",
                state, outcome.version, outcome.description, outcome.elapsed
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub version: i64,
    pub description: String,
    pub source: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applied/pending state of every unit in the set, ascending by version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    /// Ledger rows whose unit no longer exists
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> Vec<i64> {
        self.entries
            .iter()
            .filter(|e| !e.is_applied())
            .map(|e| e.version)
            .collect()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    Applied At                  Migration")?;
        writeln!(f, "    =======================================")?;
        for entry in &self.entries {
            let applied = match entry.applied_at {
                Some(at) => at.format("%a %b %e %H:%M:%S %Y").to_string(),
                None => "Pending".to_string(),
            };
            writeln!(f, "    {:<24} -- {}", applied, entry.source)?;
        }
        for orphan in &self.orphaned {
            writeln!(
                f,
                "    {:<24} -- version {} (no migration found)",
                orphan.applied_at.format("%a %b %e %H:%M:%S %Y").to_string(),
                orphan.version
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_rendering() {
        let at = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let status = StatusReport {
            entries: vec![
                StatusEntry {
                    version: 1,
                    description: "init".to_string(),
                    source: "00001_init.sql".to_string(),
                    applied_at: Some(at),
                },
                StatusEntry {
                    version: 2,
                    description: "users".to_string(),
                    source: "00002_users.sql".to_string(),
                    applied_at: None,
                },
            ],
            orphaned: vec![],
        };
        assert_eq!(status.pending(), vec![2]);
        assert_eq!(
            status.to_string(),
            concat!(
                "    Applied At                  Migration\n",
                "    =======================================\n",
                "    Tue Jan  2 03:04:05 2024 -- 00001_init.sql\n",
                "    Pending                  -- 00002_users.sql\n",
            )
        );
    }

    #[test]
    fn test_report_split_by_direction() {
        let outcome = |version, direction| Outcome {
            version,
            description: String::new(),
            direction,
            elapsed: Duration::ZERO,
        };
        let report = Report {
            mode: Mode::Redo,
            outcomes: vec![outcome(4, Direction::Down), outcome(4, Direction::Up)],
        };
        assert_eq!(report.reverted(), vec![4]);
        assert_eq!(report.applied(), vec![4]);
        assert!(Report::new(Mode::Up).to_string().contains("no migrations to run"));
    }
}
