//! Per-(assignment, moment) write gate. Locks block grade writes only;
//! reads, deletes and every computation ignore them.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::info;

use crate::db;
use crate::directory;
use crate::error::EngineError;
use crate::model::Moment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Administrator,
    Teacher,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Some(Role::Administrator),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub moment: Moment,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockChange {
    pub assignment_id: String,
    pub moment: Moment,
    pub locked: bool,
    /// False when the moment was already in the requested state.
    pub changed: bool,
}

pub fn is_locked(conn: &Connection, assignment_id: &str, moment: Moment) -> Result<bool, EngineError> {
    let locked: Option<i64> = conn
        .query_row(
            "SELECT locked FROM moment_locks WHERE assignment_id = ? AND moment = ?",
            (assignment_id, moment.get()),
            |r| r.get(0),
        )
        .optional()?;
    Ok(locked.unwrap_or(0) != 0)
}

pub fn ensure_unlocked(conn: &Connection, assignment_id: &str, moment: Moment) -> Result<(), EngineError> {
    if is_locked(conn, assignment_id, moment)? {
        return Err(EngineError::LockedMoment {
            assignment_id: assignment_id.to_string(),
            moment,
        });
    }
    Ok(())
}

pub fn lock_states(conn: &Connection, assignment_id: &str) -> Result<Vec<LockState>, EngineError> {
    directory::load_assignment(conn, assignment_id)?;
    Moment::ALL
        .iter()
        .map(|&moment| {
            Ok(LockState {
                moment,
                locked: is_locked(conn, assignment_id, moment)?,
            })
        })
        .collect()
}

fn require_admin(role: Role) -> Result<(), EngineError> {
    if role != Role::Administrator {
        return Err(EngineError::Forbidden(
            "only administrators may lock or unlock moments".to_string(),
        ));
    }
    Ok(())
}

/// Idempotent lock/unlock of one moment.
pub fn set_lock(
    conn: &mut Connection,
    assignment_id: &str,
    moment: Moment,
    locked: bool,
    role: Role,
) -> Result<LockChange, EngineError> {
    require_admin(role)?;
    directory::load_assignment(conn, assignment_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let was_locked = is_locked(&tx, assignment_id, moment)?;
    let changed = was_locked != locked;
    if changed {
        tx.execute(
            "INSERT INTO moment_locks(assignment_id, moment, locked, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(assignment_id, moment) DO UPDATE SET
               locked = excluded.locked,
               updated_at = excluded.updated_at",
            (assignment_id, moment.get(), locked as i64, db::now_timestamp()),
        )?;
    }
    tx.commit()?;

    if changed {
        info!(assignment_id, moment = moment.get(), locked, "moment lock changed");
    }
    Ok(LockChange {
        assignment_id: assignment_id.to_string(),
        moment,
        locked,
        changed,
    })
}

/// Applies one lock transition to every assignment of a classroom.
pub fn set_classroom_moment(
    conn: &mut Connection,
    classroom_id: &str,
    moment: Moment,
    locked: bool,
    role: Role,
) -> Result<Vec<LockChange>, EngineError> {
    require_admin(role)?;
    let assignments = directory::list_assignments(conn, classroom_id)?;
    assignments
        .iter()
        .map(|a| set_lock(conn, &a.id, moment, locked, role))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fixtures;

    fn m(n: i64) -> Moment {
        Moment::new(n).expect("moment")
    }

    #[test]
    fn lock_is_idempotent_and_reversible() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let a = &seeded.assignment_ids[0];

        let first = set_lock(&mut conn, a, m(2), true, Role::Administrator).expect("lock");
        assert!(first.changed);
        let again = set_lock(&mut conn, a, m(2), true, Role::Administrator).expect("relock");
        assert!(!again.changed);
        assert!(is_locked(&conn, a, m(2)).expect("state"));
        assert!(!is_locked(&conn, a, m(1)).expect("state"));

        let err = ensure_unlocked(&conn, a, m(2)).expect_err("locked");
        assert_eq!(err.code(), "moment_locked");

        set_lock(&mut conn, a, m(2), false, Role::Administrator).expect("unlock");
        assert!(ensure_unlocked(&conn, a, m(2)).is_ok());
    }

    #[test]
    fn teachers_cannot_lock() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let err = set_lock(&mut conn, &seeded.assignment_ids[0], m(1), true, Role::Teacher)
            .expect_err("forbidden");
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn classroom_bulk_lock_touches_every_assignment() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let changes =
            set_classroom_moment(&mut conn, &seeded.classroom_id, m(3), true, Role::Administrator)
                .expect("bulk lock");
        assert_eq!(changes.len(), seeded.assignment_ids.len());
        for a in &seeded.assignment_ids {
            let states = lock_states(&conn, a).expect("states");
            let locked: Vec<u8> = states
                .iter()
                .filter(|s| s.locked)
                .map(|s| s.moment.get())
                .collect();
            assert_eq!(locked, vec![3]);
        }
    }
}
