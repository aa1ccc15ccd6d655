//! SQLite-backed cell membership gateway.
//!
//! # Responsibility
//! - Implement `CellGateway` over the `people`, `period_enrollments`,
//!   `cell_groups` and `cell_memberships` tables.
//! - Provide seeding helpers for the identity pool.
//!
//! # Invariants
//! - Every multi-row write runs in one immediate transaction.
//! - Deleted groups are tombstoned (`is_deleted = 1`) and never loaded again.
//! - A person holds at most one membership row per period.

use crate::db::migrations::latest_version;
use crate::model::group::{GroupName, PersistentId, Role};
use crate::model::person::{MembershipStatus, Person, PersonId};
use crate::repo::cell_repo::{
    CellGateway, GatewayError, GatewayResult, GroupMetadataPatch, GroupRecord,
    MembershipAssignment, NewGroup,
};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

const REQUIRED_TABLES: [&str; 4] = [
    "people",
    "period_enrollments",
    "cell_groups",
    "cell_memberships",
];

/// Owns one migrated connection; calls are serialized through a mutex so the
/// repository can be shared with concurrent metadata updates.
pub struct SqliteCellRepository {
    conn: Mutex<Connection>,
}

impl SqliteCellRepository {
    /// Wraps a connection returned by `open_db`/`open_db_in_memory`.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations were not applied.
    /// - `InvalidData` when a required table is missing.
    pub fn try_new(conn: Connection) -> GatewayResult<Self> {
        ensure_cell_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts or refreshes one identity record.
    pub fn register_person(&self, person: &Person) -> GatewayResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO people (
                person_id,
                display_name,
                contact_phone,
                birth_date,
                membership_status
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(person_id) DO UPDATE SET
                display_name = excluded.display_name,
                contact_phone = excluded.contact_phone,
                birth_date = excluded.birth_date,
                membership_status = excluded.membership_status,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                person.person_id.0,
                person.display_name.as_str(),
                person.contact_phone.as_deref(),
                person.birth_date.as_deref(),
                person.membership_status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Makes `person_id` part of the identity pool of `period_year`.
    ///
    /// Enrolling twice is a no-op.
    pub fn enroll(&self, person_id: PersonId, period_year: i32) -> GatewayResult<()> {
        let conn = self.lock()?;
        if !person_exists(&conn, person_id)? {
            return Err(GatewayError::UnknownPerson(person_id));
        }
        conn.execute(
            "INSERT OR IGNORE INTO period_enrollments (period_year, person_id)
             VALUES (?1, ?2);",
            params![period_year, person_id.0],
        )?;
        Ok(())
    }

    fn lock(&self) -> GatewayResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::Unavailable("connection lock poisoned".to_string()))
    }
}

impl CellGateway for SqliteCellRepository {
    fn load_identity_pool(&self, period_year: i32) -> GatewayResult<Vec<Person>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT
                p.person_id,
                p.display_name,
                p.contact_phone,
                p.birth_date,
                p.membership_status
             FROM people p
             JOIN period_enrollments e ON e.person_id = p.person_id
             WHERE e.period_year = ?1
             ORDER BY p.person_id ASC;",
        )?;
        let mut rows = stmt.query([period_year])?;
        let mut people = Vec::new();
        while let Some(row) = rows.next()? {
            people.push(parse_person_row(row)?);
        }
        Ok(people)
    }

    fn load_groups(&self, period_year: i32) -> GatewayResult<Vec<GroupRecord>> {
        let conn = self.lock()?;
        let mut records = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT group_id, name, name_is_explicit, period_year
             FROM cell_groups
             WHERE period_year = ?1
               AND is_deleted = 0
             ORDER BY group_id ASC;",
        )?;
        let mut rows = stmt.query([period_year])?;
        while let Some(row) = rows.next()? {
            let group_id = PersistentId(row.get("group_id")?);
            let name: String = row.get("name")?;
            records.insert(
                group_id,
                GroupRecord {
                    group_id,
                    name: GroupName::from_stored(name, row.get("name_is_explicit")?),
                    period_year: row.get("period_year")?,
                    leader_id: None,
                    co_leader_id: None,
                    member_ids: Vec::new(),
                },
            );
        }

        let mut stmt = conn.prepare(
            "SELECT m.group_id, m.person_id, m.role
             FROM cell_memberships m
             JOIN cell_groups g ON g.group_id = m.group_id
             WHERE g.period_year = ?1
               AND g.is_deleted = 0
             ORDER BY m.group_id ASC, m.person_id ASC;",
        )?;
        let mut rows = stmt.query([period_year])?;
        while let Some(row) = rows.next()? {
            let group_id = PersistentId(row.get("group_id")?);
            let person_id = PersonId(row.get("person_id")?);
            let role_text: String = row.get("role")?;
            let role = Role::parse(role_text.as_str()).ok_or_else(|| {
                GatewayError::InvalidData(format!("unknown membership role `{role_text}`"))
            })?;
            let Some(record) = records.get_mut(&group_id) else {
                continue;
            };
            match role {
                Role::Leader => record.leader_id = Some(person_id),
                Role::CoLeader => record.co_leader_id = Some(person_id),
                Role::Member => record.member_ids.push(person_id),
            }
        }

        Ok(records.into_values().map(GroupRecord::normalized).collect())
    }

    fn create_group(&self, request: &NewGroup) -> GatewayResult<PersistentId> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO cell_groups (name, name_is_explicit, period_year)
             VALUES (?1, ?2, ?3);",
            params![
                request.name.as_str(),
                request.name.is_explicit(),
                request.period_year
            ],
        )?;
        let group_id = PersistentId(tx.last_insert_rowid());

        for (person_id, role) in [
            (request.leader_id, Role::Leader),
            (request.co_leader_id, Role::CoLeader),
        ] {
            if let Some(person_id) = person_id {
                upsert_membership(&tx, request.period_year, group_id, person_id, role)?;
            }
        }

        tx.commit()?;
        debug!(
            "event=gateway_create_group module=repo status=ok group_id={}",
            group_id
        );
        Ok(group_id)
    }

    fn update_group_metadata(
        &self,
        group_id: PersistentId,
        patch: &GroupMetadataPatch,
    ) -> GatewayResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE cell_groups
             SET
                name = COALESCE(?1, name),
                name_is_explicit = COALESCE(?2, name_is_explicit),
                period_year = COALESCE(?3, period_year),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE group_id = ?4
               AND is_deleted = 0;",
            params![
                patch.name.as_ref().map(GroupName::as_str),
                patch.name.as_ref().map(GroupName::is_explicit),
                patch.period_year,
                group_id.0
            ],
        )?;
        if changed == 0 {
            return Err(GatewayError::GroupNotFound(group_id));
        }
        Ok(())
    }

    fn submit_membership_batch(&self, batch: &[MembershipAssignment]) -> GatewayResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut periods = BTreeMap::new();
        for entry in batch {
            let period_year = active_group_period(&tx, entry.group_id)?
                .ok_or(GatewayError::GroupNotFound(entry.group_id))?;
            periods.insert(entry.group_id, period_year);
            tx.execute(
                "DELETE FROM cell_memberships WHERE group_id = ?1;",
                [entry.group_id.0],
            )?;
        }

        let mut seen = BTreeSet::new();
        for entry in batch {
            let period_year = periods
                .get(&entry.group_id)
                .copied()
                .ok_or(GatewayError::GroupNotFound(entry.group_id))?;
            let slots = [
                (entry.leader_id, Role::Leader),
                (entry.co_leader_id, Role::CoLeader),
            ];
            let assignments = slots
                .into_iter()
                .filter_map(|(person_id, role)| person_id.map(|id| (id, role)))
                .chain(entry.member_ids.iter().map(|id| (*id, Role::Member)));

            for (person_id, role) in assignments {
                if !seen.insert(person_id) {
                    return Err(GatewayError::Rejected(format!(
                        "person {person_id} listed more than once in batch"
                    )));
                }
                if !person_exists(&tx, person_id)? {
                    return Err(GatewayError::UnknownPerson(person_id));
                }
                upsert_membership(&tx, period_year, entry.group_id, person_id, role)?;
            }
        }

        tx.commit()?;
        debug!(
            "event=gateway_membership_batch module=repo status=ok groups={} people={}",
            batch.len(),
            seen.len()
        );
        Ok(())
    }

    fn delete_group(&self, group_id: PersistentId) -> GatewayResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE cell_groups
             SET
                is_deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE group_id = ?1
               AND is_deleted = 0;",
            [group_id.0],
        )?;
        if changed == 0 {
            return Err(GatewayError::GroupNotFound(group_id));
        }
        tx.execute(
            "DELETE FROM cell_memberships WHERE group_id = ?1;",
            [group_id.0],
        )?;

        tx.commit()?;
        Ok(())
    }
}

fn upsert_membership(
    tx: &Transaction<'_>,
    period_year: i32,
    group_id: PersistentId,
    person_id: PersonId,
    role: Role,
) -> GatewayResult<()> {
    let result = tx.execute(
        "INSERT INTO cell_memberships (period_year, person_id, group_id, role)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(period_year, person_id) DO UPDATE SET
            group_id = excluded.group_id,
            role = excluded.role;",
        params![period_year, person_id.0, group_id.0, role.as_str()],
    );
    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            let err = GatewayError::from(err);
            if let GatewayError::Db(db_err) = &err {
                if db_err.is_constraint_violation() {
                    return Err(GatewayError::Rejected(format!(
                        "membership of person {person_id} in group {group_id}: {db_err}"
                    )));
                }
            }
            Err(err)
        }
    }
}

fn active_group_period(conn: &Connection, group_id: PersistentId) -> GatewayResult<Option<i32>> {
    let period_year = conn
        .query_row(
            "SELECT period_year FROM cell_groups WHERE group_id = ?1 AND is_deleted = 0;",
            [group_id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(period_year)
}

fn person_exists(conn: &Connection, person_id: PersonId) -> GatewayResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM people WHERE person_id = ?1);",
        [person_id.0],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_person_row(row: &Row<'_>) -> GatewayResult<Person> {
    let status_text: String = row.get("membership_status")?;
    let membership_status = MembershipStatus::parse(status_text.as_str()).ok_or_else(|| {
        GatewayError::InvalidData(format!("unknown membership status `{status_text}`"))
    })?;
    Ok(Person {
        person_id: PersonId(row.get("person_id")?),
        display_name: row.get("display_name")?,
        contact_phone: row.get("contact_phone")?,
        birth_date: row.get("birth_date")?,
        membership_status,
    })
}

fn ensure_cell_connection_ready(conn: &Connection) -> GatewayResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(GatewayError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(GatewayError::InvalidData(format!(
                "missing required table `{table}`"
            )));
        }
    }
    Ok(())
}
