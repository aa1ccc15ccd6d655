//! Property tests: arbitrary placement sequences keep every person in exactly
//! one location and every group's slots disjoint.

use cellsync_core::config::NamingConfig;
use cellsync_core::{
    Group, GroupId, GroupName, Location, Partition, PersistentId, Person, PersonId,
    PlacementEngine, Role,
};
use proptest::prelude::*;

const PEOPLE: i64 = 8;

#[derive(Debug, Clone)]
enum Op {
    Place { person: i64, group: usize, role: Role },
    Remove { person: i64 },
    Create { named: bool },
    Delete { group: usize },
    Rename { group: usize },
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Leader), Just(Role::CoLeader), Just(Role::Member)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1..=PEOPLE, 0usize..6, arb_role())
            .prop_map(|(person, group, role)| Op::Place { person, group, role }),
        2 => (1..=PEOPLE).prop_map(|person| Op::Remove { person }),
        2 => any::<bool>().prop_map(|named| Op::Create { named }),
        1 => (0usize..6).prop_map(|group| Op::Delete { group }),
        1 => (0usize..6).prop_map(|group| Op::Rename { group }),
    ]
}

fn seeded_engine() -> PlacementEngine {
    let people = (1..=PEOPLE)
        .map(|id| Person::new(PersonId(id), format!("Person {id}")))
        .collect();
    let groups = vec![Group::persisted(
        PersistentId(1),
        GroupName::Explicit("Seed".to_string()),
        2024,
        Some(PersonId(1)),
        Some(PersonId(2)),
        vec![PersonId(3)],
    )];
    let partition = Partition::hydrate(2024, people, groups).unwrap();
    PlacementEngine::new(partition, NamingConfig::default())
}

fn nth_group(engine: &PlacementEngine, index: usize) -> Option<GroupId> {
    let ids = engine
        .partition()
        .groups()
        .map(|group| group.id())
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return None;
    }
    Some(ids[index % ids.len()])
}

fn apply(engine: &mut PlacementEngine, op: &Op) {
    match op {
        Op::Place {
            person,
            group,
            role,
        } => {
            if let Some(group_id) = nth_group(engine, *group) {
                engine.place(PersonId(*person), group_id, *role).unwrap();
            }
        }
        Op::Remove { person } => {
            engine.remove(PersonId(*person)).unwrap();
        }
        Op::Create { named } => {
            let name = named.then_some("Named cell");
            engine.create_group(name).unwrap();
        }
        Op::Delete { group } => {
            if let Some(group_id) = nth_group(engine, *group) {
                engine.delete_group(group_id).unwrap();
            }
        }
        Op::Rename { group } => {
            if let Some(group_id) = nth_group(engine, *group) {
                engine.rename_group(group_id, "Renamed").unwrap();
            }
        }
    }
}

/// Every person is in exactly one place: the bucket or one group slot.
fn assert_single_location(partition: &Partition) -> Result<(), TestCaseError> {
    prop_assert!(partition.check_invariants().is_ok());

    let placed = partition.groups().map(Group::head_count).sum::<usize>();
    prop_assert_eq!(placed + partition.unassigned().len(), partition.people_count());

    for person in partition.people() {
        let id = person.person_id;
        let holders = partition
            .groups()
            .filter(|group| group.role_of(id).is_some())
            .count();
        let in_bucket = partition.unassigned().contains(&id);
        prop_assert_eq!(holders + usize::from(in_bucket), 1);
    }
    for group in partition.groups() {
        if let (Some(leader), Some(co_leader)) = (group.leader(), group.co_leader()) {
            prop_assert_ne!(leader, co_leader);
        }
        for slot in [group.leader(), group.co_leader()].into_iter().flatten() {
            prop_assert!(!group.members().contains(&slot));
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn operation_sequences_preserve_partition(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut engine = seeded_engine();
        for op in &ops {
            apply(&mut engine, op);
            assert_single_location(engine.partition())?;
        }
    }

    #[test]
    fn place_is_idempotent(
        ops in prop::collection::vec(arb_op(), 0..20),
        person in 1..=PEOPLE,
        group in 0usize..6,
        role in arb_role(),
    ) {
        let mut engine = seeded_engine();
        for op in &ops {
            apply(&mut engine, op);
        }
        let Some(group_id) = nth_group(&engine, group) else {
            return Ok(());
        };

        engine.place(PersonId(person), group_id, role).unwrap();
        let once = engine.partition().clone();
        let outcome = engine.place(PersonId(person), group_id, role).unwrap();

        prop_assert!(!outcome.changed);
        prop_assert_eq!(engine.partition(), &once);
    }

    #[test]
    fn slot_placement_displaces_previous_occupant(
        newcomer in 4..=PEOPLE,
        role in prop_oneof![Just(Role::Leader), Just(Role::CoLeader)],
    ) {
        let mut engine = seeded_engine();
        let group_id = GroupId::Persistent(PersistentId(1));
        let previous = engine.partition().group(group_id).unwrap().occupant(role).unwrap();

        let outcome = engine.place(PersonId(newcomer), group_id, role).unwrap();

        prop_assert_eq!(outcome.displaced, Some(previous));
        prop_assert_eq!(engine.partition().location_of(previous), Some(Location::Unassigned));
        let group = engine.partition().group(group_id).unwrap();
        prop_assert_eq!(group.occupant(role), Some(PersonId(newcomer)));
        prop_assert!(!group.members().contains(&PersonId(newcomer)));
        prop_assert!(!engine.partition().unassigned().contains(&PersonId(newcomer)));
    }
}

#[test]
fn deleting_full_group_releases_everyone() {
    let mut engine = seeded_engine();
    let group_id = GroupId::Persistent(PersistentId(1));
    engine.place(PersonId(4), group_id, Role::Member).unwrap();
    engine.place(PersonId(5), group_id, Role::Member).unwrap();

    let deleted = engine.delete_group(group_id).unwrap();

    assert_eq!(deleted.released.len(), 5);
    assert_eq!(deleted.released[0], PersonId(1));
    assert_eq!(deleted.released[1], PersonId(2));
    assert!(deleted.server_delete_queued);
    assert!(engine.partition().group(group_id).is_none());
    assert_eq!(engine.partition().unassigned().len(), PEOPLE as usize);
}
