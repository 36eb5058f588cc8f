//! The journal: an append-only log of reversible state deltas.
//!
//! Every mutation the interpreter performs against world state appends one
//! entry recording the previous value. A snapshot is simply the journal
//! length at a point in time; rolling back pops entries past the snapshot
//! and applies their inverses in reverse order, which restores the state
//! bit-for-bit. Committing a snapshot is free: the entries stay in place so
//! an outer snapshot can still undo them.

use kestrel_common::{Address, H256, U256};

/// One reversible delta. Each variant stores exactly what is needed to
/// undo itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    BalanceChange { address: Address, prev: U256 },
    NonceChange { address: Address, prev: u64 },
    StorageChange { address: Address, key: H256, prev: U256 },
    TransientChange { address: Address, key: U256, prev: U256 },
    CodeChange { address: Address, prev_hash: H256 },
    AccountCreated { address: Address },
    WarmAddress { address: Address },
    WarmSlot { address: Address, key: H256 },
    SelfdestructRegistered { address: Address },
    LogEmitted,
    RefundChange { prev: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Opaque handle for the current length.
    pub fn snapshot(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pop the newest entry if it is past `snapshot`. Rollback loops drive
    /// this until it returns `None`, applying each inverse as it goes; the
    /// pop order guarantees strict reverse replay.
    pub fn pop_past(&mut self, snapshot: usize) -> Option<JournalEntry> {
        if self.entries.len() > snapshot {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Committing keeps the entries so an enclosing snapshot can still
    /// revert them; only the handle is discarded.
    pub fn commit(&mut self, _snapshot: usize) {}

    /// Entries appended since `snapshot`, oldest first. Used by the tracer
    /// to report per-step state deltas.
    pub fn entries_since(&self, snapshot: usize) -> &[JournalEntry] {
        self.entries.get(snapshot..).unwrap_or_default()
    }

    /// Drop everything; used once an execution has fully settled.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_length_and_pop_is_reverse_ordered() {
        let mut journal = Journal::default();
        let address = Address::zero();
        journal.record(JournalEntry::BalanceChange {
            address,
            prev: U256::zero(),
        });
        let snapshot = journal.snapshot();
        assert_eq!(snapshot, 1);

        journal.record(JournalEntry::NonceChange { address, prev: 0 });
        journal.record(JournalEntry::LogEmitted);

        assert_eq!(journal.pop_past(snapshot), Some(JournalEntry::LogEmitted));
        assert_eq!(
            journal.pop_past(snapshot),
            Some(JournalEntry::NonceChange { address, prev: 0 })
        );
        assert_eq!(journal.pop_past(snapshot), None);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn commit_keeps_entries_for_outer_snapshots() {
        let mut journal = Journal::default();
        let outer = journal.snapshot();
        journal.record(JournalEntry::LogEmitted);
        let inner = journal.snapshot();
        journal.commit(inner);
        assert_eq!(journal.pop_past(outer), Some(JournalEntry::LogEmitted));
    }
}
