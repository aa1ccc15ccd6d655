//! Partition store: all groups of one period plus the Unassigned Bucket.
//!
//! # Responsibility
//! - Own the identity pool and the group set for the active period.
//! - Expose read access and a small set of crate-private primitives that the
//!   placement engine composes into operations.
//!
//! # Invariants
//! - Every pooled person has exactly one `Location`: the Unassigned Bucket or
//!   one slot of one group.
//! - `locations` mirrors the bucket and group slots exactly.
//! - Every group belongs to `period_year`.

use crate::model::group::{Group, GroupId, GroupName, Role};
use crate::model::person::{Person, PersonId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Where one person currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Unassigned,
    Group { group_id: GroupId, role: Role },
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unassigned => write!(f, "unassigned"),
            Self::Group { group_id, role } => write!(f, "{}@{group_id}", role.as_str()),
        }
    }
}

/// Errors raised while building a partition from loaded data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The identity pool lists one person id twice.
    DuplicatePerson(PersonId),
    /// Two loaded groups share one id.
    DuplicateGroup(GroupId),
    /// A loaded group belongs to another period.
    PeriodMismatch {
        group_id: GroupId,
        expected: i32,
        actual: i32,
    },
    /// A group references someone outside the identity pool.
    UnknownPerson {
        group_id: GroupId,
        person_id: PersonId,
    },
    /// A person is referenced by more than one slot.
    DuplicatePlacement {
        person_id: PersonId,
        group_id: GroupId,
    },
}

impl Display for PartitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicatePerson(id) => write!(f, "identity pool lists person {id} twice"),
            Self::DuplicateGroup(id) => write!(f, "group {id} loaded twice"),
            Self::PeriodMismatch {
                group_id,
                expected,
                actual,
            } => write!(
                f,
                "group {group_id} belongs to period {actual}, expected {expected}"
            ),
            Self::UnknownPerson {
                group_id,
                person_id,
            } => write!(
                f,
                "group {group_id} references person {person_id} outside the identity pool"
            ),
            Self::DuplicatePlacement {
                person_id,
                group_id,
            } => write!(
                f,
                "person {person_id} is placed more than once (again in group {group_id})"
            ),
        }
    }
}

impl Error for PartitionError {}

/// Internal consistency breach. Fatal for the editing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Pooled person has no location.
    MissingLocation(PersonId),
    /// Location index holds a person who is in no slot.
    StaleLocation(PersonId),
    /// Index disagrees with the slot the person actually occupies.
    LocationMismatch {
        person_id: PersonId,
        actual: Location,
        recorded: Option<Location>,
    },
    /// Person occupies more than one slot.
    DuplicatePlacement(PersonId),
    /// A slot references someone outside the identity pool.
    UnknownPerson(PersonId),
    /// Leader and co-leader of one group are the same person.
    LeaderIsCoLeader(GroupId),
    /// Group belongs to another period.
    ForeignPeriod(GroupId),
    /// Primitive addressed a group that does not exist.
    MissingGroup(GroupId),
    /// Primitive tried to fill a slot that is already taken.
    SlotOccupied { group_id: GroupId, role: Role },
    /// Primitive tried to drop a group that still has people.
    GroupNotEmpty(GroupId),
    /// Primitive tried to add a group id that already exists.
    DuplicateGroup(GroupId),
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingLocation(id) => write!(f, "person {id} has no location"),
            Self::StaleLocation(id) => write!(f, "stale location entry for person {id}"),
            Self::LocationMismatch {
                person_id,
                actual,
                recorded,
            } => match recorded {
                Some(recorded) => write!(
                    f,
                    "person {person_id} sits at {actual} but index says {recorded}"
                ),
                None => write!(f, "person {person_id} sits at {actual} but is not indexed"),
            },
            Self::DuplicatePlacement(id) => write!(f, "person {id} occupies more than one slot"),
            Self::UnknownPerson(id) => write!(f, "slot references unknown person {id}"),
            Self::LeaderIsCoLeader(id) => {
                write!(f, "group {id} has the same leader and co-leader")
            }
            Self::ForeignPeriod(id) => write!(f, "group {id} belongs to another period"),
            Self::MissingGroup(id) => write!(f, "group {id} does not exist"),
            Self::SlotOccupied { group_id, role } => {
                write!(f, "slot {} of group {group_id} is occupied", role.as_str())
            }
            Self::GroupNotEmpty(id) => write!(f, "group {id} still has people"),
            Self::DuplicateGroup(id) => write!(f, "group {id} already exists"),
        }
    }
}

impl Error for InvariantViolation {}

/// In-memory partition of one period's people into groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    period_year: i32,
    people: BTreeMap<PersonId, Person>,
    groups: BTreeMap<GroupId, Group>,
    unassigned: BTreeSet<PersonId>,
    locations: HashMap<PersonId, Location>,
}

impl Partition {
    /// Creates a partition with no people and no groups.
    pub fn empty(period_year: i32) -> Self {
        Self {
            period_year,
            people: BTreeMap::new(),
            groups: BTreeMap::new(),
            unassigned: BTreeSet::new(),
            locations: HashMap::new(),
        }
    }

    /// Builds a partition from the identity pool and loaded groups.
    ///
    /// People not referenced by any group start in the Unassigned Bucket.
    ///
    /// # Errors
    /// - Duplicate person or group ids.
    /// - Groups of another period, or referencing people outside the pool.
    /// - Any person referenced by more than one slot.
    pub fn hydrate(
        period_year: i32,
        people: Vec<Person>,
        groups: Vec<Group>,
    ) -> Result<Self, PartitionError> {
        let mut partition = Self::empty(period_year);
        for person in people {
            let person_id = person.person_id;
            if partition.people.insert(person_id, person).is_some() {
                return Err(PartitionError::DuplicatePerson(person_id));
            }
        }

        for group in groups {
            let group_id = group.id();
            if group.period_year() != period_year {
                return Err(PartitionError::PeriodMismatch {
                    group_id,
                    expected: period_year,
                    actual: group.period_year(),
                });
            }
            if partition.groups.contains_key(&group_id) {
                return Err(PartitionError::DuplicateGroup(group_id));
            }

            let slots = group
                .leader()
                .map(|id| (id, Role::Leader))
                .into_iter()
                .chain(group.co_leader().map(|id| (id, Role::CoLeader)))
                .chain(group.members().iter().map(|id| (*id, Role::Member)));
            for (person_id, role) in slots {
                if !partition.people.contains_key(&person_id) {
                    return Err(PartitionError::UnknownPerson {
                        group_id,
                        person_id,
                    });
                }
                let location = Location::Group { group_id, role };
                if partition.locations.insert(person_id, location).is_some() {
                    return Err(PartitionError::DuplicatePlacement {
                        person_id,
                        group_id,
                    });
                }
            }
            partition.groups.insert(group_id, group);
        }

        let unplaced = partition
            .people
            .keys()
            .copied()
            .filter(|id| !partition.locations.contains_key(id))
            .collect::<Vec<_>>();
        for person_id in unplaced {
            partition.unassigned.insert(person_id);
            partition.locations.insert(person_id, Location::Unassigned);
        }

        Ok(partition)
    }

    pub fn period_year(&self) -> i32 {
        self.period_year
    }

    pub fn person(&self, person_id: PersonId) -> Option<&Person> {
        self.people.get(&person_id)
    }

    /// Identity pool ordered by person id.
    pub fn people(&self) -> impl Iterator<Item = &Person> {
        self.people.values()
    }

    pub fn people_count(&self) -> usize {
        self.people.len()
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    /// Groups ordered by id: persisted first, then provisional.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Unassigned Bucket, ordered by person id.
    pub fn unassigned(&self) -> &BTreeSet<PersonId> {
        &self.unassigned
    }

    pub fn unassigned_people(&self) -> impl Iterator<Item = &Person> {
        self.unassigned
            .iter()
            .filter_map(|person_id| self.people.get(person_id))
    }

    /// Current location, or `None` for people outside the pool.
    pub fn location_of(&self, person_id: PersonId) -> Option<Location> {
        self.locations.get(&person_id).copied()
    }

    /// Finds an unassigned person by exact display name.
    ///
    /// When several unassigned people share the name, the lowest id wins.
    pub fn find_unassigned_by_name(&self, display_name: &str) -> Option<PersonId> {
        self.unassigned_people()
            .find(|person| person.display_name == display_name)
            .map(|person| person.person_id)
    }

    /// Verifies the one-slot-per-person and slot-disjointness invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen = HashSet::with_capacity(self.people.len());

        for group in self.groups.values() {
            let group_id = group.id();
            if group.period_year() != self.period_year {
                return Err(InvariantViolation::ForeignPeriod(group_id));
            }
            if group.leader().is_some() && group.leader() == group.co_leader() {
                return Err(InvariantViolation::LeaderIsCoLeader(group_id));
            }
            let slots = group
                .leader()
                .map(|id| (id, Role::Leader))
                .into_iter()
                .chain(group.co_leader().map(|id| (id, Role::CoLeader)))
                .chain(group.members().iter().map(|id| (*id, Role::Member)));
            for (person_id, role) in slots {
                self.check_slot(&mut seen, person_id, Location::Group { group_id, role })?;
            }
        }

        for person_id in &self.unassigned {
            self.check_slot(&mut seen, *person_id, Location::Unassigned)?;
        }

        if let Some(missing) = self.people.keys().find(|id| !seen.contains(*id)) {
            return Err(InvariantViolation::MissingLocation(*missing));
        }
        if let Some(stale) = self.locations.keys().find(|id| !seen.contains(*id)) {
            return Err(InvariantViolation::StaleLocation(*stale));
        }
        Ok(())
    }

    fn check_slot(
        &self,
        seen: &mut HashSet<PersonId>,
        person_id: PersonId,
        actual: Location,
    ) -> Result<(), InvariantViolation> {
        if !self.people.contains_key(&person_id) {
            return Err(InvariantViolation::UnknownPerson(person_id));
        }
        if !seen.insert(person_id) {
            return Err(InvariantViolation::DuplicatePlacement(person_id));
        }
        let recorded = self.locations.get(&person_id).copied();
        if recorded != Some(actual) {
            return Err(InvariantViolation::LocationMismatch {
                person_id,
                actual,
                recorded,
            });
        }
        Ok(())
    }

    /// Removes a person from wherever they sit and returns that location.
    ///
    /// The person is left without a location; callers must `attach` next.
    pub(crate) fn detach(&mut self, person_id: PersonId) -> Option<Location> {
        let location = self.locations.remove(&person_id)?;
        match location {
            Location::Unassigned => {
                self.unassigned.remove(&person_id);
            }
            Location::Group { group_id, .. } => {
                if let Some(group) = self.groups.get_mut(&group_id) {
                    group.take(person_id);
                }
            }
        }
        Some(location)
    }

    /// Puts a detached person at `location`.
    pub(crate) fn attach(
        &mut self,
        person_id: PersonId,
        location: Location,
    ) -> Result<(), InvariantViolation> {
        if !self.people.contains_key(&person_id) {
            return Err(InvariantViolation::UnknownPerson(person_id));
        }
        if self.locations.contains_key(&person_id) {
            return Err(InvariantViolation::DuplicatePlacement(person_id));
        }
        match location {
            Location::Unassigned => {
                self.unassigned.insert(person_id);
            }
            Location::Group { group_id, role } => {
                let group = self
                    .groups
                    .get_mut(&group_id)
                    .ok_or(InvariantViolation::MissingGroup(group_id))?;
                if !group.insert(person_id, role) {
                    return Err(InvariantViolation::SlotOccupied { group_id, role });
                }
            }
        }
        self.locations.insert(person_id, location);
        Ok(())
    }

    /// Adds an empty group of this period.
    pub(crate) fn insert_group(&mut self, group: Group) -> Result<(), InvariantViolation> {
        let group_id = group.id();
        if group.period_year() != self.period_year {
            return Err(InvariantViolation::ForeignPeriod(group_id));
        }
        if !group.is_empty() {
            return Err(InvariantViolation::GroupNotEmpty(group_id));
        }
        if self.groups.contains_key(&group_id) {
            return Err(InvariantViolation::DuplicateGroup(group_id));
        }
        self.groups.insert(group_id, group);
        Ok(())
    }

    /// Drops a group that no longer holds anyone.
    pub(crate) fn remove_empty_group(
        &mut self,
        group_id: GroupId,
    ) -> Result<Group, InvariantViolation> {
        match self.groups.get(&group_id) {
            None => Err(InvariantViolation::MissingGroup(group_id)),
            Some(group) if !group.is_empty() => Err(InvariantViolation::GroupNotEmpty(group_id)),
            Some(_) => self
                .groups
                .remove(&group_id)
                .ok_or(InvariantViolation::MissingGroup(group_id)),
        }
    }

    pub(crate) fn set_group_name(
        &mut self,
        group_id: GroupId,
        name: GroupName,
    ) -> Result<(), InvariantViolation> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(InvariantViolation::MissingGroup(group_id))?;
        group.set_name(name);
        Ok(())
    }
}
