//! Cell membership gateway contract.
//!
//! # Responsibility
//! - Define the boundary calls the engine needs from persistent storage:
//!   hydration, group creation, metadata update, membership batch, delete.
//! - Normalize loaded group records before they reach the engine.
//!
//! # Invariants
//! - `GroupRecord` member lists never contain the leader or co-leader.
//! - `submit_membership_batch` has replace semantics per listed group.

use crate::db::DbError;
use crate::model::group::{Group, GroupName, PersistentId};
use crate::model::person::{Person, PersonId};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors from gateway operations.
#[derive(Debug)]
pub enum GatewayError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target group does not exist or is deleted.
    GroupNotFound(PersistentId),
    /// Request references a person the store does not know.
    UnknownPerson(PersonId),
    /// Request violates a storage constraint (e.g. slot uniqueness).
    Rejected(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
    /// Transport or backend is not reachable.
    Unavailable(String),
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::GroupNotFound(id) => write!(f, "cell group not found: {id}"),
            Self::UnknownPerson(id) => write!(f, "person not found: {id}"),
            Self::Rejected(message) => write!(f, "request rejected: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "cell repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid cell data: {message}"),
            Self::Unavailable(message) => write!(f, "cell store unavailable: {message}"),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for GatewayError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persisted group as returned by `load_groups`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub group_id: PersistentId,
    pub name: GroupName,
    pub period_year: i32,
    pub leader_id: Option<PersonId>,
    pub co_leader_id: Option<PersonId>,
    pub member_ids: Vec<PersonId>,
}

impl GroupRecord {
    /// Returns the record with disjoint slots.
    ///
    /// - Leader and co-leader are removed from `member_ids`.
    /// - A co-leader equal to the leader is cleared.
    /// - Members are de-duplicated, keeping first-seen order.
    pub fn normalized(mut self) -> Self {
        if self.co_leader_id.is_some() && self.co_leader_id == self.leader_id {
            self.co_leader_id = None;
        }
        let mut seen = BTreeSet::new();
        let leader_id = self.leader_id;
        let co_leader_id = self.co_leader_id;
        self.member_ids.retain(|id| {
            Some(*id) != leader_id && Some(*id) != co_leader_id && seen.insert(*id)
        });
        self
    }

    /// Converts into the engine's group model.
    pub fn into_group(self) -> Group {
        Group::persisted(
            self.group_id,
            self.name,
            self.period_year,
            self.leader_id,
            self.co_leader_id,
            self.member_ids,
        )
    }
}

/// Phase 1 create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: GroupName,
    pub period_year: i32,
    pub leader_id: Option<PersonId>,
    pub co_leader_id: Option<PersonId>,
}

/// Phase 2 metadata patch; `None` fields stay unchanged.
///
/// A name carries its origin, so an auto-derived name stays re-derivable
/// after a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMetadataPatch {
    pub name: Option<GroupName>,
    pub period_year: Option<i32>,
}

/// One group entry of the Phase 3 membership batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipAssignment {
    pub group_id: PersistentId,
    pub leader_id: Option<PersonId>,
    pub co_leader_id: Option<PersonId>,
    pub member_ids: Vec<PersonId>,
}

/// Persistent storage boundary for one membership store.
pub trait CellGateway {
    /// Loads people eligible for assignment in `period_year`.
    fn load_identity_pool(&self, period_year: i32) -> GatewayResult<Vec<Person>>;
    /// Loads active groups of `period_year`, normalized.
    fn load_groups(&self, period_year: i32) -> GatewayResult<Vec<GroupRecord>>;
    /// Creates one group and returns its server id.
    fn create_group(&self, request: &NewGroup) -> GatewayResult<PersistentId>;
    /// Updates mutable group attributes.
    fn update_group_metadata(
        &self,
        group_id: PersistentId,
        patch: &GroupMetadataPatch,
    ) -> GatewayResult<()>;
    /// Replaces membership of every listed group in one call.
    fn submit_membership_batch(&self, batch: &[MembershipAssignment]) -> GatewayResult<()>;
    /// Deletes one persisted group.
    fn delete_group(&self, group_id: PersistentId) -> GatewayResult<()>;
}
