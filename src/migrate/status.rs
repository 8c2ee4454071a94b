use std::fmt;

use chrono::{DateTime, Utc};

use crate::definition::catalog::MigrationSet;
use crate::definition::migration::MigrationId;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Applied,
    /// Applied, but the definition on disk no longer matches its checksum.
    Modified,
    Pending,
    /// Applied, with no definition on disk.
    Missing,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            MigrationState::Applied => "up",
            MigrationState::Modified => "modified",
            MigrationState::Pending => "down",
            MigrationState::Missing => "missing",
        };

        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub id: MigrationId,
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Every known or applied migration, ordered by identifier.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    lines: Vec<StatusLine>,
}

impl StatusReport {
    pub fn new(migrations: &MigrationSet, ledger: &Ledger) -> Self {
        let mut lines: Vec<StatusLine> = migrations
            .iter()
            .map(|migration| {
                let entry = ledger.get(migration.id());
                let state = match entry {
                    Some(entry) if entry.checksum != migration.checksum() => {
                        MigrationState::Modified
                    }
                    Some(_) => MigrationState::Applied,
                    None => MigrationState::Pending,
                };

                StatusLine {
                    id: migration.id(),
                    name: migration.name().to_string(),
                    state,
                    applied_at: entry.map(|entry| entry.applied_at),
                }
            })
            .collect();

        lines.extend(
            ledger
                .entries()
                .filter(|entry| migrations.get(entry.id).is_none())
                .map(|entry| StatusLine {
                    id: entry.id,
                    name: entry.name.clone(),
                    state: MigrationState::Missing,
                    applied_at: Some(entry.applied_at),
                }),
        );

        lines.sort_by_key(|line| line.id);

        StatusReport { lines }
    }

    pub fn lines(&self) -> &[StatusLine] {
        &self.lines
    }

    pub fn applied_ids(&self) -> Vec<MigrationId> {
        self.ids_where(|state| {
            matches!(state, MigrationState::Applied | MigrationState::Modified)
        })
    }

    pub fn pending_ids(&self) -> Vec<MigrationId> {
        self.ids_where(|state| state == MigrationState::Pending)
    }

    pub fn missing_ids(&self) -> Vec<MigrationId> {
        self.ids_where(|state| state == MigrationState::Missing)
    }

    fn ids_where(&self, predicate: impl Fn(MigrationState) -> bool) -> Vec<MigrationId> {
        self.lines
            .iter()
            .filter(|line| predicate(line.state))
            .map(|line| line.id)
            .collect()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{:>9}  {:<16} {:<32} {}", "Status", "Migration ID", "Name", "Applied at")?;
        writeln!(f, "{}", "-".repeat(80))?;

        for line in self.lines() {
            let applied_at = line
                .applied_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();

            writeln!(
                f,
                "{:>9}  {:<16} {:<32} {}",
                line.state.to_string(),
                line.id,
                line.name,
                applied_at
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntry;
    use crate::test_support::{add_isbn, create_authors, create_books, id};

    fn entry(id: MigrationId, name: &str, checksum: &str) -> LedgerEntry {
        LedgerEntry {
            id,
            name: name.to_string(),
            checksum: checksum.to_string(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn partitions_known_and_applied_identifiers() {
        let authors = create_authors();
        let books = create_books();
        let set = MigrationSet::new(vec![authors.clone(), books.clone(), add_isbn()], &[]).unwrap();

        let ledger = Ledger::from_entries(vec![
            entry(authors.id(), authors.name(), authors.checksum()),
            entry(books.id(), books.name(), "stale"),
            entry(id(20200101000000), "legacy", "abc"),
        ]);

        let report = StatusReport::new(&set, &ledger);

        assert_eq!(report.applied_ids(), vec![authors.id(), books.id()]);
        assert_eq!(report.pending_ids(), vec![add_isbn().id()]);
        assert_eq!(report.missing_ids(), vec![id(20200101000000)]);
        assert_eq!(report.lines()[2].state, MigrationState::Modified);

        let mut all = report.applied_ids();
        all.extend(report.pending_ids());
        all.sort();
        assert_eq!(all, set.ids());
    }

    #[test]
    fn renders_one_row_per_migration() {
        let set = MigrationSet::new(vec![create_authors()], &[]).unwrap();
        let rendered = StatusReport::new(&set, &Ledger::default()).to_string();

        assert_eq!(rendered.lines().count(), 3);
        assert!(rendered.contains("create_authors"));
        assert!(rendered.lines().last().unwrap().trim_start().starts_with("down"));
    }
}
