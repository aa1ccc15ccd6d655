//! Editing session over one period of one membership store.
//!
//! # Responsibility
//! - Hydrate a partition from a gateway and own it for the session.
//! - Route saves through the sync coordinator and rebuild from the
//!   gateway after a successful save.
//!
//! # Invariants
//! - The partition is only replaced by a full reload; a failed save leaves
//!   it exactly as edited.
//! - The sync ledger survives until a reload succeeds.

use crate::config::CellsyncConfig;
use crate::model::partition::{Partition, PartitionError};
use crate::repo::cell_repo::{CellGateway, GatewayError, GroupRecord};
use crate::service::bulk_import::{BulkTextResolver, ImportReport};
use crate::service::placement::{PlacementEngine, PlacementError};
use crate::sync::coordinator::{SyncCoordinator, SyncError, SyncReport};
use crate::sync::ledger::SyncLedger;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Session-level failures.
#[derive(Debug)]
pub enum SessionError {
    Gateway(GatewayError),
    /// Loaded data does not form a valid partition.
    Partition(PartitionError),
    Placement(PlacementError),
    Sync(SyncError),
    /// Save succeeded but the authoritative reload did not.
    ReloadFailed {
        report: SyncReport,
        source: Box<SessionError>,
    },
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(err) => write!(f, "{err}"),
            Self::Partition(err) => write!(f, "{err}"),
            Self::Placement(err) => write!(f, "{err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::ReloadFailed { source, .. } => {
                write!(f, "changes were saved but reloading failed: {source}")
            }
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Gateway(err) => Some(err),
            Self::Partition(err) => Some(err),
            Self::Placement(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::ReloadFailed { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

impl From<PartitionError> for SessionError {
    fn from(value: PartitionError) -> Self {
        Self::Partition(value)
    }
}

impl From<PlacementError> for SessionError {
    fn from(value: PlacementError) -> Self {
        Self::Placement(value)
    }
}

impl From<SyncError> for SessionError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

/// One operator's editing session.
pub struct CellSession<G> {
    gateway: G,
    config: CellsyncConfig,
    engine: PlacementEngine,
    ledger: SyncLedger,
}

impl<G> CellSession<G>
where
    G: CellGateway + Sync,
{
    /// Hydrates `period_year` from `gateway`.
    pub fn open(gateway: G, period_year: i32, config: CellsyncConfig) -> Result<Self, SessionError> {
        let partition = hydrate(&gateway, period_year)?;
        let engine = PlacementEngine::new(partition, config.naming.clone());
        info!(
            "event=session_open module=session status=ok period_year={} people={} groups={}",
            period_year,
            engine.partition().people_count(),
            engine.partition().group_count()
        );
        Ok(Self {
            gateway,
            config,
            engine,
            ledger: SyncLedger::new(),
        })
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &CellsyncConfig {
        &self.config
    }

    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PlacementEngine {
        &mut self.engine
    }

    pub fn partition(&self) -> &Partition {
        self.engine.partition()
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Resolves pasted tabular text into new groups.
    pub fn import_text(&mut self, text: &str) -> Result<ImportReport, SessionError> {
        let resolver = BulkTextResolver::new(&self.config.import);
        Ok(resolver.resolve(&mut self.engine, text)?)
    }

    /// Discards the current partition and hydrates another period.
    pub fn switch_period(&mut self, period_year: i32) -> Result<(), SessionError> {
        let partition = hydrate(&self.gateway, period_year)?;
        self.engine = PlacementEngine::new(partition, self.config.naming.clone());
        self.ledger.clear();
        info!(
            "event=session_switch_period module=session status=ok period_year={}",
            period_year
        );
        Ok(())
    }

    /// Synchronizes the partition, then reloads it from the gateway.
    ///
    /// # Errors
    /// - `Sync` when synchronization failed; the partition is unchanged.
    /// - `ReloadFailed` when synchronization succeeded but the reload did
    ///   not; saving again re-submits without duplicating creates.
    pub fn save(&mut self) -> Result<SyncReport, SessionError> {
        let coordinator = SyncCoordinator::new(&self.gateway, &self.config.sync);
        let report = coordinator.synchronize(
            self.engine.partition(),
            self.engine.pending_deletes(),
            &mut self.ledger,
        )?;

        if let Err(err) = self.reload() {
            error!(
                "event=session_save module=session status=error run_id={} error_code=reload_failed error={}",
                report.run_id, err
            );
            return Err(SessionError::ReloadFailed {
                report,
                source: Box::new(err),
            });
        }

        info!(
            "event=session_save module=session status=ok run_id={}",
            report.run_id
        );
        Ok(report)
    }

    /// Rebuilds the partition of the current period from the gateway.
    ///
    /// Unsaved edits are discarded.
    pub fn reload(&mut self) -> Result<(), SessionError> {
        let period_year = self.engine.partition().period_year();
        let partition = hydrate(&self.gateway, period_year)?;
        self.engine = PlacementEngine::new(partition, self.config.naming.clone());
        self.ledger.clear();
        Ok(())
    }
}

fn hydrate<G: CellGateway>(gateway: &G, period_year: i32) -> Result<Partition, SessionError> {
    let people = gateway.load_identity_pool(period_year)?;
    let groups = gateway
        .load_groups(period_year)?
        .into_iter()
        .map(|record| GroupRecord::normalized(record).into_group())
        .collect();
    Ok(Partition::hydrate(period_year, people, groups)?)
}

#[cfg(test)]
mod tests {
    use super::{CellSession, SessionError};
    use crate::config::CellsyncConfig;
    use crate::model::group::{PersistentId, Role};
    use crate::model::person::{Person, PersonId};
    use crate::repo::cell_repo::{
        CellGateway, GatewayError, GatewayResult, GroupMetadataPatch, GroupRecord,
        MembershipAssignment, NewGroup,
    };
    use std::sync::Mutex;

    /// Keeps groups in memory with replace-semantics batches.
    struct MemoryGateway {
        people: Vec<Person>,
        groups: Mutex<Vec<GroupRecord>>,
        fail_loads_after: Mutex<Option<usize>>,
    }

    impl MemoryGateway {
        fn new(names: &[&str]) -> Self {
            Self {
                people: names
                    .iter()
                    .enumerate()
                    .map(|(index, name)| Person::new(PersonId(index as i64 + 1), *name))
                    .collect(),
                groups: Mutex::new(Vec::new()),
                fail_loads_after: Mutex::new(None),
            }
        }
    }

    impl CellGateway for MemoryGateway {
        fn load_identity_pool(&self, _period_year: i32) -> GatewayResult<Vec<Person>> {
            let mut budget = self.fail_loads_after.lock().unwrap();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(GatewayError::Unavailable("offline".to_string()));
                }
                *remaining -= 1;
            }
            Ok(self.people.clone())
        }

        fn load_groups(&self, period_year: i32) -> GatewayResult<Vec<GroupRecord>> {
            Ok(self
                .groups
                .lock()
                .unwrap()
                .iter()
                .filter(|record| record.period_year == period_year)
                .cloned()
                .collect())
        }

        fn create_group(&self, request: &NewGroup) -> GatewayResult<PersistentId> {
            let mut groups = self.groups.lock().unwrap();
            let group_id = PersistentId(groups.len() as i64 + 1);
            groups.push(GroupRecord {
                group_id,
                name: request.name.clone(),
                period_year: request.period_year,
                leader_id: request.leader_id,
                co_leader_id: request.co_leader_id,
                member_ids: Vec::new(),
            });
            Ok(group_id)
        }

        fn update_group_metadata(
            &self,
            group_id: PersistentId,
            patch: &GroupMetadataPatch,
        ) -> GatewayResult<()> {
            let mut groups = self.groups.lock().unwrap();
            let record = groups
                .iter_mut()
                .find(|record| record.group_id == group_id)
                .ok_or(GatewayError::GroupNotFound(group_id))?;
            if let Some(name) = &patch.name {
                record.name = name.clone();
            }
            Ok(())
        }

        fn submit_membership_batch(&self, batch: &[MembershipAssignment]) -> GatewayResult<()> {
            let mut groups = self.groups.lock().unwrap();
            for entry in batch {
                let record = groups
                    .iter_mut()
                    .find(|record| record.group_id == entry.group_id)
                    .ok_or(GatewayError::GroupNotFound(entry.group_id))?;
                record.leader_id = entry.leader_id;
                record.co_leader_id = entry.co_leader_id;
                record.member_ids = entry.member_ids.clone();
            }
            Ok(())
        }

        fn delete_group(&self, group_id: PersistentId) -> GatewayResult<()> {
            self.groups
                .lock()
                .unwrap()
                .retain(|record| record.group_id != group_id);
            Ok(())
        }
    }

    #[test]
    fn save_reloads_persisted_groups() {
        let mut session =
            CellSession::open(MemoryGateway::new(&["Alice", "Bob"]), 2024, CellsyncConfig::default())
                .unwrap();
        let report = session.import_text("Alice\nBob").unwrap();
        assert_eq!(report.resolved_count(), 2);

        let sync = session.save().unwrap();
        assert_eq!(sync.created.len(), 1);

        let group = session.partition().groups().next().unwrap();
        assert_eq!(group.id().persistent(), Some(PersistentId(1)));
        assert_eq!(group.leader(), Some(PersonId(1)));
        assert!(group.members().contains(&PersonId(2)));
        assert!(session.partition().unassigned().is_empty());
        assert!(!session.ledger().has_server_writes());
    }

    #[test]
    fn reload_failure_keeps_ledger_and_edits() {
        let gateway = MemoryGateway::new(&["Alice"]);
        let mut session = CellSession::open(gateway, 2024, CellsyncConfig::default()).unwrap();
        let group_id = session.engine_mut().create_group(Some("Cell")).unwrap();
        session
            .engine_mut()
            .place(PersonId(1), group_id, Role::Leader)
            .unwrap();
        *session.gateway().fail_loads_after.lock().unwrap() = Some(0);

        let err = session.save().unwrap_err();
        assert!(matches!(err, SessionError::ReloadFailed { .. }));
        assert!(session.ledger().has_server_writes());
        assert!(session.partition().group(group_id).is_some());

        *session.gateway().fail_loads_after.lock().unwrap() = None;
        let report = session.save().unwrap();
        assert!(report.created.contains(&(
            group_id_provisional(group_id),
            PersistentId(1)
        )));
        assert_eq!(session.gateway().groups.lock().unwrap().len(), 1);
    }

    fn group_id_provisional(
        group_id: crate::model::group::GroupId,
    ) -> crate::model::group::ProvisionalId {
        match group_id {
            crate::model::group::GroupId::Provisional(id) => id,
            other => panic!("expected provisional id, got {other}"),
        }
    }

    #[test]
    fn switch_period_rehydrates_and_clears_ledger() {
        let mut session =
            CellSession::open(MemoryGateway::new(&["Alice"]), 2024, CellsyncConfig::default())
                .unwrap();
        session.engine_mut().create_group(None).unwrap();
        session.save().unwrap();
        assert_eq!(session.partition().group_count(), 1);

        session.switch_period(2025).unwrap();
        assert_eq!(session.partition().period_year(), 2025);
        assert_eq!(session.partition().group_count(), 0);
        assert_eq!(session.partition().unassigned().len(), 1);
    }
}
