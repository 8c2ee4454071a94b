use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::common::errors::MigrationError;
use crate::definition::migration::MigrationId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: MigrationId,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// Applied migrations, ordered by identifier.
///
/// The ledger is a plain value: the runner receives one loaded from the
/// store and hands back the updated copy, mirroring every change it makes to
/// the ledger table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<MigrationId, LedgerEntry>,
}

impl Ledger {
    pub fn from_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        Ledger {
            entries: entries.into_iter().map(|entry| (entry.id, entry)).collect(),
        }
    }

    pub fn is_applied(&self, id: MigrationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn record_applied(&mut self, entry: LedgerEntry) -> Result<(), MigrationError> {
        if self.is_applied(entry.id) {
            return Err(MigrationError::AlreadyApplied { id: entry.id });
        }

        self.entries.insert(entry.id, entry);

        Ok(())
    }

    pub fn record_rolled_back(&mut self, id: MigrationId) -> Result<LedgerEntry, MigrationError> {
        self.entries
            .remove(&id)
            .ok_or(MigrationError::NotApplied { id })
    }

    pub fn applied_ids_in_order(&self) -> Vec<MigrationId> {
        self.entries.keys().copied().collect()
    }

    pub fn get(&self, id: MigrationId) -> Option<&LedgerEntry> {
        self.entries.get(&id)
    }

    pub fn latest(&self) -> Option<&LedgerEntry> {
        self.entries.values().next_back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64) -> LedgerEntry {
        LedgerEntry {
            id: MigrationId::new(id).unwrap(),
            name: format!("migration_{}", id),
            checksum: "00".to_string(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn applied_ids_are_sorted() {
        let ledger = Ledger::from_entries(vec![entry(30), entry(10), entry(20)]);

        let ids: Vec<u64> = ledger
            .applied_ids_in_order()
            .into_iter()
            .map(|id| id.value())
            .collect();

        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(ledger.latest().unwrap().id.value(), 30);
    }

    #[test]
    fn recording_twice_fails() {
        let mut ledger = Ledger::default();
        ledger.record_applied(entry(1)).unwrap();

        let err = ledger.record_applied(entry(1)).unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyApplied { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn rolling_back_unknown_entry_fails() {
        let mut ledger = Ledger::from_entries(vec![entry(1)]);

        assert!(ledger.record_rolled_back(MigrationId::new(2).unwrap()).is_err());

        let removed = ledger.record_rolled_back(MigrationId::new(1).unwrap()).unwrap();
        assert_eq!(removed.name, "migration_1");
        assert!(ledger.is_empty());
    }
}
