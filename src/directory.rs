//! Read access to the enrollment and subject directory, plus the minimal
//! provisioning needed to create classrooms, subject rosters and students.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentInfo {
    pub id: String,
    pub classroom_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub teacher: Option<String>,
    pub pending_section: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub sort_order: i64,
}

impl StudentRow {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRow {
    pub id: String,
    pub name: String,
    pub year: Option<String>,
    pub section: Option<String>,
    pub shift: Option<String>,
    pub term: Option<String>,
    pub pending: bool,
}

#[derive(Debug, Clone)]
pub struct NewSubject {
    pub name: String,
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewClassroom {
    pub name: String,
    pub year: Option<String>,
    pub section: Option<String>,
    pub shift: Option<String>,
    pub term: Option<String>,
    pub pending: bool,
    pub subjects: Vec<NewSubject>,
}

pub fn load_assignment(conn: &Connection, assignment_id: &str) -> Result<AssignmentInfo, EngineError> {
    conn.query_row(
        "SELECT sa.id, sa.classroom_id, sa.subject_id, s.name, sa.teacher, c.pending
         FROM subject_assignments sa
         JOIN subjects s ON s.id = sa.subject_id
         JOIN classrooms c ON c.id = sa.classroom_id
         WHERE sa.id = ?",
        [assignment_id],
        |r| {
            Ok(AssignmentInfo {
                id: r.get(0)?,
                classroom_id: r.get(1)?,
                subject_id: r.get(2)?,
                subject_name: r.get(3)?,
                teacher: r.get(4)?,
                pending_section: r.get::<_, i64>(5)? != 0,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("assignment", assignment_id))
}

pub fn list_assignments(conn: &Connection, classroom_id: &str) -> Result<Vec<AssignmentInfo>, EngineError> {
    classroom_exists(conn, classroom_id)?;
    let mut stmt = conn.prepare(
        "SELECT sa.id, sa.classroom_id, sa.subject_id, s.name, sa.teacher, c.pending
         FROM subject_assignments sa
         JOIN subjects s ON s.id = sa.subject_id
         JOIN classrooms c ON c.id = sa.classroom_id
         WHERE sa.classroom_id = ?
         ORDER BY sa.sort_order",
    )?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            Ok(AssignmentInfo {
                id: r.get(0)?,
                classroom_id: r.get(1)?,
                subject_id: r.get(2)?,
                subject_name: r.get(3)?,
                teacher: r.get(4)?,
                pending_section: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn classroom_exists(conn: &Connection, classroom_id: &str) -> Result<(), EngineError> {
    conn.query_row(
        "SELECT 1 FROM classrooms WHERE id = ?",
        [classroom_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()?
    .map(|_| ())
    .ok_or_else(|| EngineError::not_found("classroom", classroom_id))
}

/// A student is enrolled in an assignment when they sit in its classroom and
/// their allow-list (if any) names its subject.
pub fn is_enrolled(conn: &Connection, assignment: &AssignmentInfo, student_id: &str) -> Result<bool, EngineError> {
    let in_classroom: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND classroom_id = ?",
            (student_id, &assignment.classroom_id),
            |r| r.get(0),
        )
        .optional()?;
    if in_classroom.is_none() {
        return Ok(false);
    }
    let (restricted, allowed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(subject_id = ?), 0)
         FROM student_subject_allow WHERE student_id = ?",
        (&assignment.subject_id, student_id),
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(restricted == 0 || allowed > 0)
}

pub fn enrolled_students(conn: &Connection, assignment: &AssignmentInfo) -> Result<Vec<StudentRow>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT st.id, st.last_name, st.first_name, st.sort_order
         FROM students st
         WHERE st.classroom_id = ?
           AND (NOT EXISTS (SELECT 1 FROM student_subject_allow a WHERE a.student_id = st.id)
                OR EXISTS (SELECT 1 FROM student_subject_allow a
                           WHERE a.student_id = st.id AND a.subject_id = ?))
         ORDER BY st.sort_order",
    )?;
    let rows = stmt
        .query_map((&assignment.classroom_id, &assignment.subject_id), |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                last_name: r.get(1)?,
                first_name: r.get(2)?,
                sort_order: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_students(conn: &Connection, classroom_id: &str) -> Result<Vec<StudentRow>, EngineError> {
    classroom_exists(conn, classroom_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, sort_order
         FROM students WHERE classroom_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([classroom_id], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                last_name: r.get(1)?,
                first_name: r.get(2)?,
                sort_order: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_classroom(conn: &Connection, classroom_id: &str) -> Result<ClassroomRow, EngineError> {
    conn.query_row(
        "SELECT id, name, year, section, shift, term, pending FROM classrooms WHERE id = ?",
        [classroom_id],
        classroom_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("classroom", classroom_id))
}

fn classroom_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassroomRow> {
    Ok(ClassroomRow {
        id: r.get(0)?,
        name: r.get(1)?,
        year: r.get(2)?,
        section: r.get(3)?,
        shift: r.get(4)?,
        term: r.get(5)?,
        pending: r.get::<_, i64>(6)? != 0,
    })
}

pub fn list_classrooms(conn: &Connection) -> Result<Vec<ClassroomRow>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, year, section, shift, term, pending FROM classrooms ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], classroom_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Creates a classroom together with its subject roster. Subjects are shared
/// across classrooms by name.
pub fn create_classroom(conn: &mut Connection, input: &NewClassroom) -> Result<(String, Vec<String>), EngineError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("name must not be empty", None));
    }

    let tx = conn.transaction()?;
    let classroom_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO classrooms(id, name, year, section, shift, term, pending)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &classroom_id,
            name,
            &input.year,
            &input.section,
            &input.shift,
            &input.term,
            input.pending as i64,
        ),
    )?;

    let mut assignment_ids = Vec::with_capacity(input.subjects.len());
    for (i, subject) in input.subjects.iter().enumerate() {
        let subject_name = subject.name.trim();
        if subject_name.is_empty() {
            return Err(EngineError::validation(
                "subject name must not be empty",
                Some(serde_json::json!({ "index": i })),
            ));
        }
        tx.execute(
            "INSERT INTO subjects(id, name) VALUES(?, ?) ON CONFLICT(name) DO NOTHING",
            (Uuid::new_v4().to_string(), subject_name),
        )?;
        let subject_id: String =
            tx.query_row("SELECT id FROM subjects WHERE name = ?", [subject_name], |r| r.get(0))?;

        let assignment_id = Uuid::new_v4().to_string();
        let inserted = tx.execute(
            "INSERT INTO subject_assignments(id, classroom_id, subject_id, teacher, sort_order)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(classroom_id, subject_id) DO NOTHING",
            (&assignment_id, &classroom_id, &subject_id, &subject.teacher, i as i64),
        )?;
        if inserted == 0 {
            return Err(EngineError::validation(
                "subject listed twice for one classroom",
                Some(serde_json::json!({ "subject": subject_name })),
            ));
        }
        assignment_ids.push(assignment_id);
    }
    tx.commit()?;

    info!(classroom_id = %classroom_id, subjects = assignment_ids.len(), "classroom provisioned");
    Ok((classroom_id, assignment_ids))
}

pub fn create_student(
    conn: &mut Connection,
    classroom_id: &str,
    last_name: &str,
    first_name: &str,
    allowed_subject_ids: Option<&[String]>,
) -> Result<String, EngineError> {
    classroom_exists(conn, classroom_id)?;
    let tx = conn.transaction()?;
    let sort_order: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE classroom_id = ?",
        [classroom_id],
        |r| r.get(0),
    )?;
    let student_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO students(id, classroom_id, last_name, first_name, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, classroom_id, last_name.trim(), first_name.trim(), sort_order),
    )?;
    if let Some(subject_ids) = allowed_subject_ids {
        for subject_id in subject_ids {
            let known: Option<i64> = tx
                .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| r.get(0))
                .optional()?;
            if known.is_none() {
                return Err(EngineError::not_found("subject", subject_id.as_str()));
            }
            tx.execute(
                "INSERT OR IGNORE INTO student_subject_allow(student_id, subject_id) VALUES(?, ?)",
                (&student_id, subject_id),
            )?;
        }
    }
    tx.commit()?;
    Ok(student_id)
}

/// Display-name lookup for reports. A failed lookup degrades to `None`.
pub fn subject_display_name(conn: &Connection, assignment_id: &str) -> Option<String> {
    let res: rusqlite::Result<Option<String>> = conn
        .query_row(
            "SELECT s.name FROM subject_assignments sa
             JOIN subjects s ON s.id = sa.subject_id
             WHERE sa.id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional();
    match res {
        Ok(v) => v,
        Err(e) => {
            warn!(assignment_id, error = %e, "subject name lookup failed");
            None
        }
    }
}

pub fn student_display_name(conn: &Connection, student_id: &str) -> Option<String> {
    let res: rusqlite::Result<Option<(String, String)>> = conn
        .query_row(
            "SELECT last_name, first_name FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional();
    match res {
        Ok(v) => v.map(|(last, first)| format!("{}, {}", last, first)),
        Err(e) => {
            warn!(student_id, error = %e, "student name lookup failed");
            None
        }
    }
}
