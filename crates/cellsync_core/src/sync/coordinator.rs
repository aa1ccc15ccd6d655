//! Multi-phase reconciliation of a partition with persistent storage.
//!
//! # Responsibility
//! - Retire queued deletions, materialize provisional groups, update
//!   persisted group metadata and submit one membership batch.
//! - Classify failures as "nothing saved" or "partially applied".
//!
//! # Invariants
//! - The partition is only read; it is never modified here.
//! - Creates run sequentially and stop at the first failure.
//! - Exactly one membership batch is submitted per successful run, listing
//!   every group of the partition by its persistent id.
//! - A gateway write recorded in the ledger is never repeated.

use crate::config::SyncConfig;
use crate::model::group::{Group, GroupId, PersistentId, ProvisionalId};
use crate::model::partition::Partition;
use crate::repo::cell_repo::{
    CellGateway, GatewayError, GroupMetadataPatch, MembershipAssignment, NewGroup,
};
use crate::sync::ledger::SyncLedger;
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Step of one synchronization run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPhase {
    /// Server deletes for groups removed in the session.
    RetireDeleted,
    /// Phase 1: sequential creates of provisional groups.
    Materialize,
    /// Phase 2: concurrent metadata updates of persisted groups.
    UpdateMetadata,
    /// Phase 3: single replace-semantics membership batch.
    SubmitMembership,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetireDeleted => "retire_deleted",
            Self::Materialize => "materialize",
            Self::UpdateMetadata => "update_metadata",
            Self::SubmitMembership => "submit_membership",
        }
    }
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway writes completed by the failing run before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub retired: Vec<PersistentId>,
    pub created: Vec<(ProvisionalId, PersistentId)>,
    pub updated: Vec<PersistentId>,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Correlates this run's log lines.
    pub run_id: Uuid,
    /// Provisional → persistent mapping, including creates from earlier attempts.
    pub created: Vec<(ProvisionalId, PersistentId)>,
    pub updated: Vec<PersistentId>,
    pub retired: Vec<PersistentId>,
    /// Group ids listed in the membership batch, in submission order.
    pub batch_groups: Vec<PersistentId>,
}

/// Synchronization failure.
#[derive(Debug)]
pub enum SyncError {
    /// No server write has happened in this session; retrying is safe.
    NothingSaved {
        phase: SyncPhase,
        source: GatewayError,
    },
    /// Some writes took effect server-side while membership was not saved.
    PartiallyApplied {
        phase: SyncPhase,
        source: GatewayError,
        progress: SyncProgress,
    },
}

impl SyncError {
    pub fn phase(&self) -> SyncPhase {
        match self {
            Self::NothingSaved { phase, .. } | Self::PartiallyApplied { phase, .. } => *phase,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartiallyApplied { .. })
    }

    /// Whether the operator should be told to save again.
    ///
    /// Retrying is always safe; after a partial failure it is also needed to
    /// bring membership in line with the groups already written.
    pub fn retry_recommended(&self) -> bool {
        self.is_partial()
    }

    pub fn gateway_error(&self) -> &GatewayError {
        match self {
            Self::NothingSaved { source, .. } | Self::PartiallyApplied { source, .. } => source,
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NothingSaved { phase, source } => {
                write!(f, "nothing was saved ({phase} failed): {source}")
            }
            Self::PartiallyApplied { phase, source, .. } => write!(
                f,
                "changes were partially saved ({phase} failed), membership was not saved; \
                 save again to finish: {source}"
            ),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.gateway_error())
    }
}

/// Drives one gateway through the synchronization phases.
pub struct SyncCoordinator<'g, G> {
    gateway: &'g G,
    max_parallel_updates: usize,
}

impl<'g, G> SyncCoordinator<'g, G>
where
    G: CellGateway + Sync,
{
    pub fn new(gateway: &'g G, config: &SyncConfig) -> Self {
        Self {
            gateway,
            max_parallel_updates: config.max_parallel_updates.max(1),
        }
    }

    /// Makes server state match `partition`.
    ///
    /// `pending_deletes` are persisted groups deleted during the session.
    /// `ledger` carries writes of earlier failed attempts and is extended
    /// with every write this run completes.
    ///
    /// # Errors
    /// `SyncError::PartiallyApplied` when any write of this session already
    /// reached the server, `SyncError::NothingSaved` otherwise.
    pub fn synchronize(
        &self,
        partition: &Partition,
        pending_deletes: &BTreeSet<PersistentId>,
        ledger: &mut SyncLedger,
    ) -> Result<SyncReport, SyncError> {
        let mut run = SyncRun {
            run_id: Uuid::new_v4(),
            started_at: Instant::now(),
            progress: SyncProgress::default(),
        };
        info!(
            "event=sync_run module=sync run_id={} status=start period_year={} groups={} pending_deletes={}",
            run.run_id,
            partition.period_year(),
            partition.group_count(),
            pending_deletes.len()
        );

        match self.run_phases(&mut run, partition, pending_deletes, ledger) {
            Ok(report) => {
                info!(
                    "event=sync_run module=sync run_id={} status=ok duration_ms={} created={} updated={} retired={} batch_groups={}",
                    run.run_id,
                    run.started_at.elapsed().as_millis(),
                    report.created.len(),
                    report.updated.len(),
                    report.retired.len(),
                    report.batch_groups.len()
                );
                Ok(report)
            }
            Err((phase, source)) => {
                let partial = ledger.has_server_writes();
                error!(
                    "event=sync_run module=sync run_id={} status=error phase={} partial={} duration_ms={} error={}",
                    run.run_id,
                    phase,
                    partial,
                    run.started_at.elapsed().as_millis(),
                    source
                );
                if partial {
                    Err(SyncError::PartiallyApplied {
                        phase,
                        source,
                        progress: run.progress,
                    })
                } else {
                    Err(SyncError::NothingSaved { phase, source })
                }
            }
        }
    }

    fn run_phases(
        &self,
        run: &mut SyncRun,
        partition: &Partition,
        pending_deletes: &BTreeSet<PersistentId>,
        ledger: &mut SyncLedger,
    ) -> Result<SyncReport, (SyncPhase, GatewayError)> {
        let retired = self
            .retire(run, partition, pending_deletes, ledger)
            .map_err(|err| (SyncPhase::RetireDeleted, err))?;
        let (resolved, created) = self
            .materialize(run, partition, ledger)
            .map_err(|err| (SyncPhase::Materialize, err))?;
        let updated = self
            .update_metadata(run, partition, ledger)
            .map_err(|err| (SyncPhase::UpdateMetadata, err))?;
        let batch_groups = self
            .submit_membership(run, &resolved)
            .map_err(|err| (SyncPhase::SubmitMembership, err))?;

        Ok(SyncReport {
            run_id: run.run_id,
            created,
            updated,
            retired,
            batch_groups,
        })
    }

    /// Deletes queued persisted groups and server groups whose provisional
    /// origin was deleted after an earlier attempt materialized it.
    fn retire(
        &self,
        run: &mut SyncRun,
        partition: &Partition,
        pending_deletes: &BTreeSet<PersistentId>,
        ledger: &mut SyncLedger,
    ) -> Result<Vec<PersistentId>, GatewayError> {
        let orphans = ledger
            .materialized_entries()
            .filter(|(provisional_id, _)| {
                partition
                    .group(GroupId::Provisional(*provisional_id))
                    .is_none()
            })
            .collect::<Vec<_>>();

        let mut retired = Vec::new();
        let targets = pending_deletes
            .iter()
            .map(|group_id| (None, *group_id))
            .chain(orphans.into_iter().map(|(provisional_id, group_id)| {
                (Some(provisional_id), group_id)
            }));

        for (origin, group_id) in targets {
            if !ledger.is_retired(group_id) {
                match self.gateway.delete_group(group_id) {
                    Ok(()) => run.progress.retired.push(group_id),
                    Err(GatewayError::GroupNotFound(_)) => {
                        warn!(
                            "event=sync_retire module=sync run_id={} status=skipped group_id={} reason=already_absent",
                            run.run_id, group_id
                        );
                    }
                    Err(err) => return Err(err),
                }
                ledger.record_retired(group_id);
            }
            if let Some(provisional_id) = origin {
                ledger.forget_materialized(provisional_id);
            }
            retired.push(group_id);
        }

        log_phase(run, SyncPhase::RetireDeleted, retired.len());
        Ok(retired)
    }

    /// Phase 1. Returns every partition group with its persistent id, plus
    /// the provisional mapping.
    fn materialize<'p>(
        &self,
        run: &mut SyncRun,
        partition: &'p Partition,
        ledger: &mut SyncLedger,
    ) -> Result<(Vec<(PersistentId, &'p Group)>, Vec<(ProvisionalId, PersistentId)>), GatewayError>
    {
        let mut resolved = Vec::with_capacity(partition.group_count());
        let mut created = Vec::new();

        for group in partition.groups() {
            let provisional_id = match group.id() {
                GroupId::Persistent(group_id) => {
                    resolved.push((group_id, group));
                    continue;
                }
                GroupId::Provisional(provisional_id) => provisional_id,
            };

            let group_id = match ledger.materialized(provisional_id) {
                Some(group_id) => group_id,
                None => {
                    let group_id = self.gateway.create_group(&NewGroup {
                        name: group.name().clone(),
                        period_year: group.period_year(),
                        leader_id: group.leader(),
                        co_leader_id: group.co_leader(),
                    })?;
                    ledger.record_materialized(provisional_id, group_id);
                    run.progress.created.push((provisional_id, group_id));
                    group_id
                }
            };
            created.push((provisional_id, group_id));
            resolved.push((group_id, group));
        }

        log_phase(run, SyncPhase::Materialize, created.len());
        Ok((resolved, created))
    }

    /// Phase 2. Updates run in chunks of at most `max_parallel_updates`
    /// scoped threads; the first failed chunk stops the phase.
    fn update_metadata(
        &self,
        run: &mut SyncRun,
        partition: &Partition,
        ledger: &mut SyncLedger,
    ) -> Result<Vec<PersistentId>, GatewayError> {
        let requests = partition
            .groups()
            .filter_map(|group| {
                group.id().persistent().map(|group_id| {
                    (
                        group_id,
                        GroupMetadataPatch {
                            name: Some(group.name().clone()),
                            period_year: Some(group.period_year()),
                        },
                    )
                })
            })
            .collect::<Vec<_>>();

        let mut updated = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(self.max_parallel_updates) {
            let outcomes = std::thread::scope(|scope| {
                let handles = chunk
                    .iter()
                    .map(|(group_id, patch)| {
                        let gateway = self.gateway;
                        let group_id = *group_id;
                        (
                            group_id,
                            scope.spawn(move || gateway.update_group_metadata(group_id, patch)),
                        )
                    })
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|(group_id, handle)| {
                        let outcome = handle.join().unwrap_or_else(|_| {
                            Err(GatewayError::Unavailable(format!(
                                "metadata update worker for group {group_id} panicked"
                            )))
                        });
                        (group_id, outcome)
                    })
                    .collect::<Vec<_>>()
            });

            let mut first_error = None;
            for (group_id, outcome) in outcomes {
                match outcome {
                    Ok(()) => {
                        ledger.record_updated(group_id);
                        run.progress.updated.push(group_id);
                        updated.push(group_id);
                    }
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        log_phase(run, SyncPhase::UpdateMetadata, updated.len());
        Ok(updated)
    }

    /// Phase 3.
    fn submit_membership(
        &self,
        run: &SyncRun,
        resolved: &[(PersistentId, &Group)],
    ) -> Result<Vec<PersistentId>, GatewayError> {
        let batch = resolved
            .iter()
            .map(|(group_id, group)| MembershipAssignment {
                group_id: *group_id,
                leader_id: group.leader(),
                co_leader_id: group.co_leader(),
                member_ids: group.members().iter().copied().collect(),
            })
            .collect::<Vec<_>>();

        self.gateway.submit_membership_batch(&batch)?;

        log_phase(run, SyncPhase::SubmitMembership, batch.len());
        Ok(batch.iter().map(|entry| entry.group_id).collect())
    }
}

struct SyncRun {
    run_id: Uuid,
    started_at: Instant,
    progress: SyncProgress,
}

fn log_phase(run: &SyncRun, phase: SyncPhase, count: usize) {
    info!(
        "event=sync_phase module=sync run_id={} phase={} status=ok count={} elapsed_ms={}",
        run.run_id,
        phase,
        count,
        run.started_at.elapsed().as_millis()
    );
}
