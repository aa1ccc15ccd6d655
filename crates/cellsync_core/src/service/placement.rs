//! Placement engine: the only mutation path into a `Partition`.
//!
//! # Responsibility
//! - Provide place/remove/create/rename/delete operations over one partition.
//! - Mint provisional group ids and queue server-side deletes.
//!
//! # Invariants
//! - Unknown person/group ids are rejected before the partition is touched.
//! - An `Invariant` error is fatal: the partition must be discarded.
//! - Placing into an occupied leader/co-leader slot displaces the occupant
//!   into the Unassigned Bucket.
//! - Explicit group names are never overwritten.

use crate::config::NamingConfig;
use crate::model::group::{Group, GroupId, GroupName, PersistentId, ProvisionalId, Role};
use crate::model::partition::{InvariantViolation, Location, Partition};
use crate::model::person::PersonId;
use log::{debug, info};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from placement operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// Person id is not part of the active identity pool.
    UnknownPerson(PersonId),
    /// Group id does not exist in the partition.
    UnknownGroup(GroupId),
    /// Group name is blank after trim.
    InvalidGroupName,
    /// Internal consistency breach; the session must stop editing.
    Invariant(InvariantViolation),
}

impl Display for PlacementError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPerson(id) => write!(f, "person not in identity pool: {id}"),
            Self::UnknownGroup(id) => write!(f, "group not found: {id}"),
            Self::InvalidGroupName => write!(f, "group name must not be blank"),
            Self::Invariant(err) => write!(f, "partition invariant violated: {err}"),
        }
    }
}

impl Error for PlacementError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invariant(err) => Some(err),
            _ => None,
        }
    }
}

impl From<InvariantViolation> for PlacementError {
    fn from(value: InvariantViolation) -> Self {
        Self::Invariant(value)
    }
}

/// Result of one `place` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementOutcome {
    /// Where the person sat before the call.
    pub previous: Location,
    /// Former slot occupant moved to the Unassigned Bucket.
    pub displaced: Option<PersonId>,
    /// False when the person already sat in the requested slot.
    pub changed: bool,
}

/// Result of one `delete_group` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedGroup {
    pub group_id: GroupId,
    /// People moved to the Unassigned Bucket: leader, co-leader, members.
    pub released: Vec<PersonId>,
    /// True when the group was persisted and a server delete was queued.
    pub server_delete_queued: bool,
}

/// Operation set over one editing session's partition.
#[derive(Debug, Clone)]
pub struct PlacementEngine {
    partition: Partition,
    naming: NamingConfig,
    next_provisional: u32,
    pending_deletes: BTreeSet<PersistentId>,
}

impl PlacementEngine {
    /// Wraps a hydrated partition.
    pub fn new(partition: Partition, naming: NamingConfig) -> Self {
        let next_provisional = partition
            .groups()
            .filter_map(|group| match group.id() {
                GroupId::Provisional(ProvisionalId(value)) => Some(value + 1),
                GroupId::Persistent(_) => None,
            })
            .max()
            .unwrap_or(1);
        Self {
            partition,
            naming,
            next_provisional,
            pending_deletes: BTreeSet::new(),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn naming(&self) -> &NamingConfig {
        &self.naming
    }

    /// Persisted groups deleted in this session, awaiting server delete.
    pub fn pending_deletes(&self) -> &BTreeSet<PersistentId> {
        &self.pending_deletes
    }

    /// Places `person_id` into `role` of `group_id`.
    ///
    /// The person leaves their current location first. An existing occupant
    /// of a leader/co-leader slot is displaced to the Unassigned Bucket.
    /// Placing a leader renames an auto-named group after that leader.
    pub fn place(
        &mut self,
        person_id: PersonId,
        group_id: GroupId,
        role: Role,
    ) -> Result<PlacementOutcome, PlacementError> {
        let previous = self.require_person(person_id)?;
        let group = self.require_group(group_id)?;
        let occupant = group.occupant(role);

        let target = Location::Group { group_id, role };
        if previous == target {
            return Ok(PlacementOutcome {
                previous,
                displaced: None,
                changed: false,
            });
        }

        self.partition.detach(person_id);
        let displaced = match occupant {
            Some(occupant) if occupant != person_id => {
                self.partition.detach(occupant);
                self.partition.attach(occupant, Location::Unassigned)?;
                Some(occupant)
            }
            _ => None,
        };
        self.partition.attach(person_id, target)?;

        if role == Role::Leader {
            self.derive_leader_name(group_id, person_id)?;
        }
        self.verify()?;

        debug!(
            "event=place module=placement status=ok person={} group={} role={} from={} displaced={}",
            person_id,
            group_id,
            role.as_str(),
            previous,
            displaced.map_or_else(|| "none".to_string(), |id| id.to_string())
        );
        Ok(PlacementOutcome {
            previous,
            displaced,
            changed: true,
        })
    }

    /// Moves `person_id` to the Unassigned Bucket and returns where they were.
    ///
    /// A vacated leader/co-leader slot stays empty; the group is kept.
    pub fn remove(&mut self, person_id: PersonId) -> Result<Location, PlacementError> {
        let previous = self.require_person(person_id)?;
        if previous == Location::Unassigned {
            return Ok(previous);
        }

        self.partition.detach(person_id);
        self.partition.attach(person_id, Location::Unassigned)?;
        self.verify()?;

        debug!(
            "event=unassign module=placement status=ok person={} from={}",
            person_id, previous
        );
        Ok(previous)
    }

    /// Creates an empty provisional group and returns its id.
    ///
    /// A non-blank `name` becomes an explicit name; otherwise the configured
    /// new-group name is used as an auto name.
    pub fn create_group(&mut self, name: Option<&str>) -> Result<GroupId, PlacementError> {
        let name = match name.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => GroupName::Explicit(value.to_string()),
            None => GroupName::Auto(self.naming.new_group_name.clone()),
        };
        self.insert_provisional(name)
    }

    /// Creates an auto-named provisional group labelled after `leader_label`.
    pub(crate) fn create_labelled_group(
        &mut self,
        leader_label: &str,
    ) -> Result<GroupId, PlacementError> {
        let name = GroupName::Auto(self.naming.leader_group_name(leader_label));
        self.insert_provisional(name)
    }

    /// Sets an explicit group name.
    pub fn rename_group(&mut self, group_id: GroupId, name: &str) -> Result<(), PlacementError> {
        self.require_group(group_id)?;
        let normalized = name.trim();
        if normalized.is_empty() {
            return Err(PlacementError::InvalidGroupName);
        }
        self.partition
            .set_group_name(group_id, GroupName::Explicit(normalized.to_string()))?;
        Ok(())
    }

    /// Deletes a group after sweeping everyone in it to the Unassigned Bucket.
    ///
    /// Persisted groups are queued for server-side deletion.
    pub fn delete_group(&mut self, group_id: GroupId) -> Result<DeletedGroup, PlacementError> {
        let released = self.require_group(group_id)?.everyone();

        for person_id in &released {
            self.partition.detach(*person_id);
            self.partition.attach(*person_id, Location::Unassigned)?;
        }
        self.partition.remove_empty_group(group_id)?;

        let server_delete_queued = match group_id.persistent() {
            Some(persistent_id) => self.pending_deletes.insert(persistent_id),
            None => false,
        };
        self.verify()?;

        info!(
            "event=group_delete module=placement status=ok group={} released={} server_delete_queued={}",
            group_id,
            released.len(),
            server_delete_queued
        );
        Ok(DeletedGroup {
            group_id,
            released,
            server_delete_queued,
        })
    }

    fn insert_provisional(&mut self, name: GroupName) -> Result<GroupId, PlacementError> {
        let group_id = GroupId::Provisional(ProvisionalId(self.next_provisional));
        let group = Group::new(group_id, name, self.partition.period_year());
        self.partition.insert_group(group)?;
        self.next_provisional += 1;

        debug!(
            "event=group_create module=placement status=ok group={}",
            group_id
        );
        Ok(group_id)
    }

    fn derive_leader_name(
        &mut self,
        group_id: GroupId,
        leader_id: PersonId,
    ) -> Result<(), PlacementError> {
        let is_explicit = self.require_group(group_id)?.name().is_explicit();
        if is_explicit {
            return Ok(());
        }
        let display_name = self
            .partition
            .person(leader_id)
            .ok_or(PlacementError::UnknownPerson(leader_id))?
            .display_name
            .clone();
        let name = GroupName::Auto(self.naming.leader_group_name(&display_name));
        self.partition.set_group_name(group_id, name)?;
        Ok(())
    }

    fn require_person(&self, person_id: PersonId) -> Result<Location, PlacementError> {
        self.partition
            .location_of(person_id)
            .ok_or(PlacementError::UnknownPerson(person_id))
    }

    fn require_group(&self, group_id: GroupId) -> Result<&Group, PlacementError> {
        self.partition
            .group(group_id)
            .ok_or(PlacementError::UnknownGroup(group_id))
    }

    fn verify(&self) -> Result<(), PlacementError> {
        if cfg!(debug_assertions) {
            self.partition.check_invariants()?;
        }
        Ok(())
    }
}
