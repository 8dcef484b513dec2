use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::directory;
use crate::error::EngineError;
use crate::grades::{self, GradePayload};
use crate::locks;
use crate::model::Moment;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub assignment_id: String,
    pub name: String,
    pub description: Option<String>,
    pub date: Option<String>,
    pub weight: f64,
    pub moment: Moment,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub name: String,
    pub description: Option<String>,
    pub date: Option<String>,
    pub weight: f64,
    pub moment: Moment,
    /// Grades created together with the activity (bulk import).
    pub initial_grades: Vec<(String, GradePayload)>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub date: Option<Option<String>>,
    pub weight: Option<f64>,
    pub moment: Option<Moment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentWeight {
    pub moment: Moment,
    pub total_weight: f64,
    pub activity_count: usize,
}

pub fn validate_weight(weight: f64) -> Result<f64, EngineError> {
    if !weight.is_finite() || !(0.0..=100.0).contains(&weight) {
        return Err(EngineError::validation(
            "weight must be in 0..=100",
            Some(json!({ "weight": weight })),
        ));
    }
    Ok(weight)
}

fn validate_name(name: &str) -> Result<String, EngineError> {
    let t = name.trim();
    if t.is_empty() {
        return Err(EngineError::validation("name must not be empty", None));
    }
    Ok(t.to_string())
}

/// Dates are stored as ISO `YYYY-MM-DD`; blank means no date.
fn validate_date(date: Option<&str>) -> Result<Option<String>, EngineError> {
    let Some(raw) = date.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        EngineError::validation("date must be YYYY-MM-DD", Some(json!({ "date": raw })))
    })?;
    Ok(Some(parsed.format("%Y-%m-%d").to_string()))
}

pub(crate) fn check_moment_for_section(moment: Moment, assignment: &directory::AssignmentInfo) -> Result<(), EngineError> {
    if moment.is_pending() && !assignment.pending_section {
        return Err(EngineError::validation(
            "moment 4 is only available in pending sections",
            Some(json!({ "assignmentId": assignment.id, "moment": moment.get() })),
        ));
    }
    Ok(())
}

fn activity_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Activity> {
    let moment = Moment::new(r.get(6)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    Ok(Activity {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        date: r.get(4)?,
        weight: r.get(5)?,
        moment,
        sort_order: r.get(7)?,
    })
}

pub fn load_activity(conn: &Connection, activity_id: &str) -> Result<Activity, EngineError> {
    conn.query_row(
        "SELECT id, assignment_id, name, description, date, weight, moment, sort_order
         FROM activities WHERE id = ?",
        [activity_id],
        activity_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("activity", activity_id))
}

pub fn list_activities(conn: &Connection, assignment_id: &str) -> Result<Vec<Activity>, EngineError> {
    directory::load_assignment(conn, assignment_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, assignment_id, name, description, date, weight, moment, sort_order
         FROM activities WHERE assignment_id = ? ORDER BY moment, sort_order",
    )?;
    let rows = stmt
        .query_map([assignment_id], activity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Weight totals per moment so callers can warn when a moment does not
/// add up to 100.
pub fn moment_weights(activities: &[Activity]) -> Vec<MomentWeight> {
    let mut by_moment: BTreeMap<Moment, (f64, usize)> = BTreeMap::new();
    for a in activities {
        let e = by_moment.entry(a.moment).or_insert((0.0, 0));
        e.0 += a.weight;
        e.1 += 1;
    }
    by_moment
        .into_iter()
        .map(|(moment, (total_weight, activity_count))| MomentWeight {
            moment,
            total_weight,
            activity_count,
        })
        .collect()
}

/// Creates an activity and, atomically with it, any initial grades. Every
/// referenced student must already be enrolled in the assignment.
pub fn add_activity(
    conn: &mut Connection,
    assignment_id: &str,
    input: &NewActivity,
) -> Result<Activity, EngineError> {
    let name = validate_name(&input.name)?;
    let weight = validate_weight(input.weight)?;
    let date = validate_date(input.date.as_deref())?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let assignment = directory::load_assignment(&tx, assignment_id)?;
    check_moment_for_section(input.moment, &assignment)?;

    if !input.initial_grades.is_empty() {
        locks::ensure_unlocked(&tx, assignment_id, input.moment)?;
        for (student_id, _) in &input.initial_grades {
            if !directory::is_enrolled(&tx, &assignment, student_id)? {
                return Err(EngineError::validation(
                    format!("student {} is not enrolled in this assignment", student_id),
                    Some(json!({ "studentId": student_id, "assignmentId": assignment_id })),
                ));
            }
        }
    }

    let sort_order: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM activities WHERE assignment_id = ?",
        [assignment_id],
        |r| r.get(0),
    )?;
    let activity_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO activities(id, assignment_id, name, description, date, weight, moment, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &activity_id,
            assignment_id,
            &name,
            &input.description,
            &date,
            weight,
            input.moment.get(),
            sort_order,
        ),
    )?;
    for (student_id, payload) in &input.initial_grades {
        grades::write_entry(&tx, &activity_id, student_id, payload)?;
    }
    let activity = load_activity(&tx, &activity_id)?;
    tx.commit()?;

    info!(
        activity_id = %activity.id,
        assignment_id,
        moment = activity.moment.get(),
        initial_grades = input.initial_grades.len(),
        "activity created"
    );
    Ok(activity)
}

pub fn update_activity(conn: &mut Connection, activity_id: &str, patch: &ActivityPatch) -> Result<Activity, EngineError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = load_activity(&tx, activity_id)?;
    let assignment = directory::load_assignment(&tx, &current.assignment_id)?;

    let name = match &patch.name {
        Some(n) => validate_name(n)?,
        None => current.name.clone(),
    };
    let weight = match patch.weight {
        Some(w) => validate_weight(w)?,
        None => current.weight,
    };
    let moment = patch.moment.unwrap_or(current.moment);
    if moment != current.moment {
        check_moment_for_section(moment, &assignment)?;
        // Moving an activity moves its grades between moments.
        locks::ensure_unlocked(&tx, &assignment.id, current.moment)?;
        locks::ensure_unlocked(&tx, &assignment.id, moment)?;
    }
    let description = patch
        .description
        .clone()
        .unwrap_or_else(|| current.description.clone());
    let date = match &patch.date {
        Some(d) => validate_date(d.as_deref())?,
        None => current.date.clone(),
    };

    tx.execute(
        "UPDATE activities SET name = ?, description = ?, date = ?, weight = ?, moment = ?
         WHERE id = ?",
        (&name, &description, &date, weight, moment.get(), activity_id),
    )?;
    let updated = load_activity(&tx, activity_id)?;
    tx.commit()?;
    Ok(updated)
}

/// Deletes an activity and its grade entries.
pub fn delete_activity(conn: &mut Connection, activity_id: &str) -> Result<usize, EngineError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let activity = load_activity(&tx, activity_id)?;
    let grades_removed = tx.execute(
        "DELETE FROM grade_entries WHERE activity_id = ?",
        [activity_id],
    )?;
    tx.execute("DELETE FROM activities WHERE id = ?", [activity_id])?;
    tx.commit()?;

    info!(
        activity_id,
        assignment_id = %activity.assignment_id,
        grades_removed,
        "activity deleted"
    );
    Ok(grades_removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::directory::fixtures;
    use crate::locks::{set_lock, Role};
    use crate::model::GradeValue;

    fn m(n: i64) -> Moment {
        Moment::new(n).expect("moment")
    }

    fn new_activity(weight: f64, moment: Moment) -> NewActivity {
        NewActivity {
            name: "Exam".into(),
            description: Some("Unit 1".into()),
            date: Some("2024-10-01".into()),
            weight,
            moment,
            initial_grades: Vec::new(),
        }
    }

    fn grade(v: f64) -> GradePayload {
        GradePayload {
            value: GradeValue::Numeric(v),
            observation: None,
            evidence: None,
        }
    }

    #[test]
    fn weight_and_moment_are_validated() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let a = &seeded.assignment_ids[0];

        let err = add_activity(&mut conn, a, &new_activity(101.0, m(1))).expect_err("weight");
        assert_eq!(err.code(), "bad_params");
        let err = add_activity(&mut conn, a, &new_activity(-1.0, m(1))).expect_err("weight");
        assert_eq!(err.code(), "bad_params");
        let err = add_activity(&mut conn, a, &new_activity(30.0, m(4))).expect_err("pending");
        assert_eq!(err.code(), "bad_params");
        let err = add_activity(&mut conn, "nope", &new_activity(30.0, m(1))).expect_err("assignment");
        assert_eq!(err.code(), "not_found");

        let mut bad_date = new_activity(30.0, m(1));
        bad_date.date = Some("01/10/2024".into());
        let err = add_activity(&mut conn, a, &bad_date).expect_err("date");
        assert_eq!(err.code(), "bad_params");

        add_activity(&mut conn, a, &new_activity(0.0, m(1))).expect("zero weight ok");
        add_activity(&mut conn, a, &new_activity(100.0, m(2))).expect("full weight ok");
    }

    #[test]
    fn initial_grades_require_enrollment() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let a = &seeded.assignment_ids[0];

        let mut input = new_activity(60.0, m(1));
        input.initial_grades = vec![
            (seeded.student_ids[0].clone(), grade(15.0)),
            ("stranger".to_string(), grade(11.0)),
        ];
        let err = add_activity(&mut conn, a, &input).expect_err("not enrolled");
        match err {
            EngineError::Validation { message, .. } => assert!(message.contains("stranger")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(list_activities(&conn, a).expect("list").is_empty());

        input.initial_grades.truncate(1);
        let act = add_activity(&mut conn, a, &input).expect("create");
        assert_eq!(grades::list_grades(&conn, &act.id).expect("grades").len(), 1);
    }

    #[test]
    fn moment_change_respects_locks_and_delete_cascades() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let a = &seeded.assignment_ids[0];
        let mut input = new_activity(40.0, m(1));
        input.initial_grades = vec![(seeded.student_ids[1].clone(), grade(10.0))];
        let act = add_activity(&mut conn, a, &input).expect("create");

        set_lock(&mut conn, a, m(2), true, Role::Administrator).expect("lock");
        let err = update_activity(
            &mut conn,
            &act.id,
            &ActivityPatch {
                moment: Some(m(2)),
                ..Default::default()
            },
        )
        .expect_err("locked target");
        assert_eq!(err.code(), "moment_locked");

        let renamed = update_activity(
            &mut conn,
            &act.id,
            &ActivityPatch {
                name: Some("Midterm".into()),
                weight: Some(45.0),
                description: Some(None),
                ..Default::default()
            },
        )
        .expect("rename");
        assert_eq!(renamed.name, "Midterm");
        assert_eq!(renamed.weight, 45.0);
        assert_eq!(renamed.description, None);
        assert_eq!(renamed.date.as_deref(), Some("2024-10-01"));

        assert_eq!(delete_activity(&mut conn, &act.id).expect("delete"), 1);
        assert_eq!(
            grades::list_grades(&conn, &act.id).expect_err("gone").code(),
            "not_found"
        );
    }

    #[test]
    fn weights_are_totalled_per_moment() {
        let mut conn = db::open_memory();
        let seeded = fixtures::seed(&mut conn, false);
        let a = &seeded.assignment_ids[0];
        add_activity(&mut conn, a, &new_activity(60.0, m(1))).expect("a");
        add_activity(&mut conn, a, &new_activity(40.0, m(1))).expect("b");
        add_activity(&mut conn, a, &new_activity(25.0, m(3))).expect("c");
        let totals = moment_weights(&list_activities(&conn, a).expect("list"));
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].total_weight, 100.0);
        assert_eq!(totals[0].activity_count, 2);
        assert_eq!(totals[1].moment.get(), 3);
        assert_eq!(totals[1].total_weight, 25.0);
    }
}
