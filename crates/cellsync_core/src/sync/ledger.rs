//! Server-side effects remembered across synchronization attempts.
//!
//! # Invariants
//! - A provisional id maps to at most one persistent id.
//! - Entries are only added after the corresponding gateway call succeeded.

use crate::model::group::{PersistentId, ProvisionalId};
use std::collections::{BTreeMap, BTreeSet};

/// Record of gateway writes made by earlier attempts of the same session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncLedger {
    materialized: BTreeMap<ProvisionalId, PersistentId>,
    retired: BTreeSet<PersistentId>,
    updated: BTreeSet<PersistentId>,
}

impl SyncLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server id minted for `provisional_id` by an earlier create call.
    pub fn materialized(&self, provisional_id: ProvisionalId) -> Option<PersistentId> {
        self.materialized.get(&provisional_id).copied()
    }

    pub fn materialized_entries(&self) -> impl Iterator<Item = (ProvisionalId, PersistentId)> + '_ {
        self.materialized.iter().map(|(key, value)| (*key, *value))
    }

    pub fn is_retired(&self, group_id: PersistentId) -> bool {
        self.retired.contains(&group_id)
    }

    /// True once any gateway write has been recorded.
    pub fn has_server_writes(&self) -> bool {
        !(self.materialized.is_empty() && self.retired.is_empty() && self.updated.is_empty())
    }

    pub fn clear(&mut self) {
        self.materialized.clear();
        self.retired.clear();
        self.updated.clear();
    }

    pub(crate) fn record_materialized(
        &mut self,
        provisional_id: ProvisionalId,
        persistent_id: PersistentId,
    ) {
        self.materialized.insert(provisional_id, persistent_id);
    }

    /// Forgets a materialized group whose provisional origin was deleted.
    pub(crate) fn forget_materialized(&mut self, provisional_id: ProvisionalId) {
        self.materialized.remove(&provisional_id);
    }

    pub(crate) fn record_retired(&mut self, group_id: PersistentId) {
        self.retired.insert(group_id);
    }

    pub(crate) fn record_updated(&mut self, group_id: PersistentId) {
        self.updated.insert(group_id);
    }
}

#[cfg(test)]
mod tests {
    use super::SyncLedger;
    use crate::model::group::{PersistentId, ProvisionalId};

    #[test]
    fn records_and_clears_server_writes() {
        let mut ledger = SyncLedger::new();
        assert!(!ledger.has_server_writes());

        ledger.record_materialized(ProvisionalId(1), PersistentId(10));
        ledger.record_retired(PersistentId(3));
        assert_eq!(ledger.materialized(ProvisionalId(1)), Some(PersistentId(10)));
        assert!(ledger.is_retired(PersistentId(3)));
        assert!(ledger.has_server_writes());

        ledger.forget_materialized(ProvisionalId(1));
        assert_eq!(ledger.materialized(ProvisionalId(1)), None);

        ledger.clear();
        assert!(!ledger.has_server_writes());
    }

    #[test]
    fn metadata_updates_count_as_server_writes() {
        let mut ledger = SyncLedger::new();
        ledger.record_updated(PersistentId(4));
        assert!(ledger.has_server_writes());
    }
}
