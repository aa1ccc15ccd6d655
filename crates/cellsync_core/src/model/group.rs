//! Cell group domain model.
//!
//! # Responsibility
//! - Define group identity (provisional vs persistent) as a sum type.
//! - Hold one group's leader slot, co-leader slot and member set.
//!
//! # Invariants
//! - A person appears at most once per group: leader, co-leader and members
//!   are disjoint.
//! - `leader != co_leader` unless both are unset.
//! - Slot mutation is crate-private; callers go through `PlacementEngine`.

use crate::model::person::PersonId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Client-minted placeholder id, unique for one editing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionalId(pub u32);

/// Server-assigned group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentId(pub i64);

impl Display for PersistentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Group identifier.
///
/// Ordering puts persisted groups first, then provisional groups in minting
/// order, which is also the order groups are listed and synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    /// Known to persistent storage.
    Persistent(PersistentId),
    /// Created in this session, not yet materialized on the server.
    Provisional(ProvisionalId),
}

impl GroupId {
    pub fn is_provisional(self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    /// Returns the server id when this group is persisted.
    pub fn persistent(self) -> Option<PersistentId> {
        match self {
            Self::Persistent(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistent(id) => write!(f, "{id}"),
            Self::Provisional(id) => write!(f, "provisional:{}", id.0),
        }
    }
}

/// Role a person holds inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    CoLeader,
    Member,
}

impl Role {
    /// Returns the storage/wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::CoLeader => "co_leader",
            Self::Member => "member",
        }
    }

    /// Parses a storage/wire label.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "leader" => Some(Self::Leader),
            "co_leader" => Some(Self::CoLeader),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    /// Whether this role is a single-occupant slot.
    pub fn is_slot(self) -> bool {
        !matches!(self, Self::Member)
    }
}

/// Group display name and its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", content = "text", rename_all = "snake_case")]
pub enum GroupName {
    /// Derived by the engine; replaced when a leader is placed.
    Auto(String),
    /// Set by an operator; never overwritten by the engine.
    Explicit(String),
}

impl GroupName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Auto(text) | Self::Explicit(text) => text.as_str(),
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    /// Rebuilds a name from its stored text and origin flag.
    pub fn from_stored(text: impl Into<String>, is_explicit: bool) -> Self {
        if is_explicit {
            Self::Explicit(text.into())
        } else {
            Self::Auto(text.into())
        }
    }
}

/// One cell group with its slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    name: GroupName,
    period_year: i32,
    leader: Option<PersonId>,
    co_leader: Option<PersonId>,
    members: BTreeSet<PersonId>,
}

impl Group {
    /// Creates an empty group.
    pub fn new(id: GroupId, name: GroupName, period_year: i32) -> Self {
        Self {
            id,
            name,
            period_year,
            leader: None,
            co_leader: None,
            members: BTreeSet::new(),
        }
    }

    /// Creates a group as loaded from persistent storage.
    ///
    /// Slot consistency is verified by `Partition::hydrate`.
    pub fn persisted(
        id: PersistentId,
        name: GroupName,
        period_year: i32,
        leader: Option<PersonId>,
        co_leader: Option<PersonId>,
        members: impl IntoIterator<Item = PersonId>,
    ) -> Self {
        Self {
            id: GroupId::Persistent(id),
            name,
            period_year,
            leader,
            co_leader,
            members: members.into_iter().collect(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &GroupName {
        &self.name
    }

    pub fn period_year(&self) -> i32 {
        self.period_year
    }

    pub fn leader(&self) -> Option<PersonId> {
        self.leader
    }

    pub fn co_leader(&self) -> Option<PersonId> {
        self.co_leader
    }

    /// Ordinary members, ordered by person id.
    pub fn members(&self) -> &BTreeSet<PersonId> {
        &self.members
    }

    /// Returns the occupant of a single-occupant slot.
    ///
    /// Always `None` for `Role::Member`.
    pub fn occupant(&self, role: Role) -> Option<PersonId> {
        match role {
            Role::Leader => self.leader,
            Role::CoLeader => self.co_leader,
            Role::Member => None,
        }
    }

    /// Returns the role `person_id` holds in this group, if any.
    pub fn role_of(&self, person_id: PersonId) -> Option<Role> {
        if self.leader == Some(person_id) {
            Some(Role::Leader)
        } else if self.co_leader == Some(person_id) {
            Some(Role::CoLeader)
        } else if self.members.contains(&person_id) {
            Some(Role::Member)
        } else {
            None
        }
    }

    /// Everyone in the group: leader, co-leader, then members.
    pub fn everyone(&self) -> Vec<PersonId> {
        self.leader
            .into_iter()
            .chain(self.co_leader)
            .chain(self.members.iter().copied())
            .collect()
    }

    pub fn head_count(&self) -> usize {
        usize::from(self.leader.is_some())
            + usize::from(self.co_leader.is_some())
            + self.members.len()
    }

    /// True when no slot is filled and no members are present.
    pub fn is_empty(&self) -> bool {
        self.head_count() == 0
    }

    pub(crate) fn set_name(&mut self, name: GroupName) {
        self.name = name;
    }

    /// Fills `role` with `person_id`.
    ///
    /// Returns `false` when a slot is already occupied or the member is
    /// already present; callers must clear the slot first.
    pub(crate) fn insert(&mut self, person_id: PersonId, role: Role) -> bool {
        match role {
            Role::Leader if self.leader.is_none() => {
                self.leader = Some(person_id);
                true
            }
            Role::CoLeader if self.co_leader.is_none() => {
                self.co_leader = Some(person_id);
                true
            }
            Role::Member => self.members.insert(person_id),
            _ => false,
        }
    }

    /// Removes `person_id` from whichever slot it holds.
    pub(crate) fn take(&mut self, person_id: PersonId) -> Option<Role> {
        let role = self.role_of(person_id)?;
        match role {
            Role::Leader => self.leader = None,
            Role::CoLeader => self.co_leader = None,
            Role::Member => {
                self.members.remove(&person_id);
            }
        }
        Some(role)
    }
}

#[cfg(test)]
mod tests {
    use super::{Group, GroupId, GroupName, PersistentId, ProvisionalId, Role};
    use crate::model::person::PersonId;

    fn empty_group() -> Group {
        Group::new(
            GroupId::Provisional(ProvisionalId(1)),
            GroupName::Auto("New group".to_string()),
            2024,
        )
    }

    #[test]
    fn persistent_ids_sort_before_provisional_ids() {
        let mut ids = vec![
            GroupId::Provisional(ProvisionalId(1)),
            GroupId::Persistent(PersistentId(40)),
            GroupId::Persistent(PersistentId(3)),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                GroupId::Persistent(PersistentId(3)),
                GroupId::Persistent(PersistentId(40)),
                GroupId::Provisional(ProvisionalId(1)),
            ]
        );
    }

    #[test]
    fn slot_insert_refuses_occupied_slot() {
        let mut group = empty_group();
        assert!(group.insert(PersonId(1), Role::Leader));
        assert!(!group.insert(PersonId(2), Role::Leader));
        assert_eq!(group.leader(), Some(PersonId(1)));
    }

    #[test]
    fn take_clears_only_the_held_slot() {
        let mut group = empty_group();
        group.insert(PersonId(1), Role::Leader);
        group.insert(PersonId(2), Role::CoLeader);
        group.insert(PersonId(3), Role::Member);

        assert_eq!(group.take(PersonId(2)), Some(Role::CoLeader));
        assert_eq!(group.leader(), Some(PersonId(1)));
        assert_eq!(group.co_leader(), None);
        assert_eq!(group.take(PersonId(2)), None);
        assert_eq!(group.everyone(), vec![PersonId(1), PersonId(3)]);
    }

    #[test]
    fn role_labels_roundtrip() {
        for role in [Role::Leader, Role::CoLeader, Role::Member] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert!(Role::Leader.is_slot());
        assert!(!Role::Member.is_slot());
    }

    #[test]
    fn stored_name_keeps_its_origin() {
        assert_eq!(
            GroupName::from_stored("Alice — group", false),
            GroupName::Auto("Alice — group".to_string())
        );
        assert!(GroupName::from_stored("Youth", true).is_explicit());
    }

    #[test]
    fn display_distinguishes_provisional_ids() {
        assert_eq!(GroupId::Persistent(PersistentId(12)).to_string(), "12");
        assert_eq!(
            GroupId::Provisional(ProvisionalId(3)).to_string(),
            "provisional:3"
        );
    }
}
