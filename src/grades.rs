//! GradeEntry store: one row per (activity, student), written with a single
//! `INSERT ... ON CONFLICT DO UPDATE` so concurrent first writes cannot
//! produce duplicates.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activities;
use crate::config::GradingConfig;
use crate::db;
use crate::directory;
use crate::error::EngineError;
use crate::locks;
use crate::model::{GradeValue, GradingMode, Letter, NUMERIC_MAX, NUMERIC_MIN};

#[derive(Debug, Clone, PartialEq)]
pub struct GradePayload {
    pub value: GradeValue,
    pub observation: Option<String>,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub id: String,
    pub activity_id: String,
    pub student_id: String,
    pub mode: &'static str,
    pub value: Option<f64>,
    pub letter: Option<&'static str>,
    pub observation: Option<String>,
    pub evidence: Option<String>,
    pub recorded_seq: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResult {
    pub entry: GradeEntry,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkError {
    pub index: usize,
    pub student_id: Option<String>,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub limit_exceeded: bool,
    pub errors: Vec<BulkError>,
}

fn parse_numeric(v: &serde_json::Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    let s = v.as_str()?.trim().replace(',', ".");
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn optional_text(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<Option<String>, EngineError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(EngineError::validation(
                format!("{} must be a string", key),
                None,
            )),
        },
    }
}

/// NP/ABS carry no value or letter, numeric carries no letter, alphabetic
/// carries no numeric value.
fn reject_mode_mismatch(
    mode: GradingMode,
    value_raw: Option<&serde_json::Value>,
    letter_raw: Option<&serde_json::Value>,
) -> Result<(), EngineError> {
    let conflicting = match mode {
        GradingMode::NotPresented | GradingMode::Absent => value_raw
            .map(|v| ("value", v))
            .or(letter_raw.map(|v| ("letter", v))),
        GradingMode::Numeric => letter_raw.map(|v| ("letter", v)),
        GradingMode::Alphabetic => value_raw
            .filter(|v| parse_numeric(v).is_some())
            .map(|v| ("value", v)),
    };
    match conflicting {
        Some((field, v)) => Err(EngineError::validation(
            format!("{} is not allowed for mode {}", field, mode.as_str()),
            Some(json!({ "field": field, "value": v, "mode": mode.as_str() })),
        )),
        None => Ok(()),
    }
}

/// Validates a grade payload against the grading-mode rules. When `mode` is
/// omitted it is inferred from which of `value` / `letter` is present.
pub fn parse_grade_payload(raw: &serde_json::Value, cfg: &GradingConfig) -> Result<GradePayload, EngineError> {
    let Some(obj) = raw.as_object() else {
        return Err(EngineError::validation("grade must be an object", None));
    };

    let value_raw = obj.get("value").filter(|v| !v.is_null());
    let letter_raw = obj.get("letter").filter(|v| !v.is_null());

    let mode = match obj.get("mode").and_then(|v| v.as_str()) {
        Some(s) => GradingMode::parse(s).ok_or_else(|| {
            EngineError::validation(
                "mode must be one of: numeric, alphabetic, not_presented, absent",
                Some(json!({ "mode": s })),
            )
        })?,
        None if value_raw.is_some() => GradingMode::Numeric,
        None if letter_raw.is_some() => GradingMode::Alphabetic,
        None => return Err(EngineError::validation("missing grade mode", None)),
    };
    reject_mode_mismatch(mode, value_raw, letter_raw)?;

    let value = match mode {
        GradingMode::Numeric => {
            let Some(n) = value_raw.and_then(parse_numeric) else {
                return Err(EngineError::validation(
                    "numeric grade requires a numeric value",
                    value_raw.map(|v| json!({ "value": v })),
                ));
            };
            if !(NUMERIC_MIN..=NUMERIC_MAX).contains(&n) {
                return Err(EngineError::validation(
                    format!("numeric grade must be in {}..={}", NUMERIC_MIN, NUMERIC_MAX),
                    Some(json!({ "value": n })),
                ));
            }
            GradeValue::Numeric(n)
        }
        GradingMode::Alphabetic => {
            let letter = letter_raw
                .or(value_raw)
                .and_then(|v| v.as_str())
                .and_then(Letter::parse);
            match letter {
                Some(l) if cfg.letter_allowed(l) => GradeValue::Alphabetic(l),
                _ => {
                    return Err(EngineError::validation(
                        "alphabetic grade requires an allowed letter",
                        Some(json!({
                            "letter": letter_raw.or(value_raw),
                            "allowed": cfg.allowed_letters.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
                        })),
                    ))
                }
            }
        }
        GradingMode::NotPresented => GradeValue::NotPresented,
        GradingMode::Absent => GradeValue::Absent,
    };

    Ok(GradePayload {
        value,
        observation: optional_text(obj, "observation")?,
        evidence: optional_text(obj, "evidence")?,
    })
}

fn entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeEntry> {
    let mode: String = r.get(3)?;
    let numeric_value: Option<f64> = r.get(4)?;
    let letter_value: Option<String> = r.get(5)?;
    let value = GradeValue::from_columns(&mode, numeric_value, letter_value.as_deref());
    Ok(GradeEntry {
        id: r.get(0)?,
        activity_id: r.get(1)?,
        student_id: r.get(2)?,
        mode: value.map(|v| v.mode().as_str()).unwrap_or("unknown"),
        value: value.and_then(|v| v.numeric()),
        letter: value.and_then(|v| v.letter()).map(Letter::as_str),
        observation: r.get(6)?,
        evidence: r.get(7)?,
        recorded_seq: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

const ENTRY_COLUMNS: &str = "id, activity_id, student_id, mode, numeric_value, letter_value,
     observation, evidence, recorded_seq, updated_at";

fn load_entry(conn: &Connection, activity_id: &str, student_id: &str) -> Result<Option<GradeEntry>, EngineError> {
    let sql = format!(
        "SELECT {} FROM grade_entries WHERE activity_id = ? AND student_id = ?",
        ENTRY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (activity_id, student_id), entry_from_row)
        .optional()?)
}

/// Single-statement upsert. Returns true when a new row was appended.
pub(crate) fn write_entry(
    conn: &Connection,
    activity_id: &str,
    student_id: &str,
    payload: &GradePayload,
) -> Result<bool, EngineError> {
    let key = format!("{}/{}", activity_id, student_id);
    let existed: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grade_entries WHERE activity_id = ? AND student_id = ?",
            (activity_id, student_id),
            |r| r.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO grade_entries(
            id, activity_id, student_id, mode, numeric_value, letter_value,
            observation, evidence, recorded_seq, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(recorded_seq), 0) + 1 FROM grade_entries), ?)
         ON CONFLICT(activity_id, student_id) DO UPDATE SET
           mode = excluded.mode,
           numeric_value = excluded.numeric_value,
           letter_value = excluded.letter_value,
           observation = excluded.observation,
           evidence = excluded.evidence,
           recorded_seq = excluded.recorded_seq,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            activity_id,
            student_id,
            payload.value.mode().as_str(),
            payload.value.numeric(),
            payload.value.letter().map(Letter::as_str),
            &payload.observation,
            &payload.evidence,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| EngineError::from_write(e, "grade", &key))?;

    debug!(activity_id, student_id, created = existed.is_none(), "grade written");
    Ok(existed.is_none())
}

fn upsert_once(
    conn: &mut Connection,
    activity_id: &str,
    student_id: &str,
    payload: &GradePayload,
) -> Result<UpsertResult, EngineError> {
    let key = format!("{}/{}", activity_id, student_id);
    // IMMEDIATE takes the write lock up front so the lock check and the
    // write observe the same state.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| EngineError::from_write(e, "grade", &key))?;

    let activity = activities::load_activity(&tx, activity_id)?;
    let assignment = directory::load_assignment(&tx, &activity.assignment_id)?;
    if !directory::is_enrolled(&tx, &assignment, student_id)? {
        return Err(EngineError::not_found("enrollment", student_id));
    }
    locks::ensure_unlocked(&tx, &assignment.id, activity.moment)?;

    let created = write_entry(&tx, activity_id, student_id, payload)?;
    let entry = load_entry(&tx, activity_id, student_id)?
        .ok_or_else(|| EngineError::not_found("grade", key.as_str()))?;
    tx.commit()
        .map_err(|e| EngineError::from_write(e, "grade", &key))?;
    Ok(UpsertResult { entry, created })
}

/// Creates or overwrites the grade of one student for one activity.
/// A write race is retried once before being surfaced as `Conflict`.
pub fn upsert_grade(
    conn: &mut Connection,
    activity_id: &str,
    student_id: &str,
    payload: &GradePayload,
) -> Result<UpsertResult, EngineError> {
    match upsert_once(conn, activity_id, student_id, payload) {
        Err(EngineError::Conflict { entity, id }) => {
            warn!(entity, id = %id, "grade write collided; retrying once");
            upsert_once(conn, activity_id, student_id, payload)
        }
        other => other,
    }
}

/// Removes a grade. Allowed on locked moments.
pub fn delete_grade(conn: &Connection, activity_id: &str, student_id: &str) -> Result<(), EngineError> {
    activities::load_activity(conn, activity_id)?;
    let removed = conn.execute(
        "DELETE FROM grade_entries WHERE activity_id = ? AND student_id = ?",
        (activity_id, student_id),
    )?;
    if removed == 0 {
        return Err(EngineError::not_found(
            "grade",
            format!("{}/{}", activity_id, student_id),
        ));
    }
    debug!(activity_id, student_id, "grade deleted");
    Ok(())
}

pub fn list_grades(conn: &Connection, activity_id: &str) -> Result<Vec<GradeEntry>, EngineError> {
    activities::load_activity(conn, activity_id)?;
    let sql = format!(
        "SELECT {} FROM grade_entries WHERE activity_id = ? ORDER BY rowid",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([activity_id], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Spreadsheet-style bulk grading. Entries are `{ studentId, grade }`; each
/// one is validated independently and either updates an existing entry or
/// appends a new one. A locked moment rejects the whole batch.
pub fn bulk_upsert_grades(
    conn: &mut Connection,
    cfg: &GradingConfig,
    activity_id: &str,
    entries: &[serde_json::Value],
) -> Result<BulkResult, EngineError> {
    if entries.len() > cfg.bulk_max_entries {
        return Ok(BulkResult {
            rejected: entries.len(),
            limit_exceeded: true,
            errors: vec![BulkError {
                index: 0,
                student_id: None,
                code: "too_many_entries",
                message: format!(
                    "bulk payload exceeds max entries: {} > {}",
                    entries.len(),
                    cfg.bulk_max_entries
                ),
            }],
            ..Default::default()
        });
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| EngineError::from_write(e, "activity", activity_id))?;
    let activity = activities::load_activity(&tx, activity_id)?;
    let assignment = directory::load_assignment(&tx, &activity.assignment_id)?;
    locks::ensure_unlocked(&tx, &assignment.id, activity.moment)?;

    let mut result = BulkResult::default();
    for (index, item) in entries.iter().enumerate() {
        let student_id = item.get("studentId").and_then(|v| v.as_str());
        let reject = |code: &'static str, message: String| BulkError {
            index,
            student_id: student_id.map(str::to_string),
            code,
            message,
        };

        let Some(student_id) = student_id else {
            result
                .errors
                .push(reject("bad_params", format!("entry {} missing studentId", index)));
            continue;
        };
        let payload = match item
            .get("grade")
            .ok_or_else(|| EngineError::validation("missing grade", None))
            .and_then(|g| parse_grade_payload(g, cfg))
        {
            Ok(p) => p,
            Err(e) => {
                result.errors.push(reject(e.code(), e.to_string()));
                continue;
            }
        };
        if !directory::is_enrolled(&tx, &assignment, student_id)? {
            let e = EngineError::not_found("enrollment", student_id);
            result.errors.push(reject(e.code(), e.to_string()));
            continue;
        }
        if write_entry(&tx, activity_id, student_id, &payload)? {
            result.inserted += 1;
        } else {
            result.updated += 1;
        }
    }
    tx.commit()
        .map_err(|e| EngineError::from_write(e, "activity", activity_id))?;

    result.rejected = result.errors.len();
    info!(
        activity_id,
        inserted = result.inserted,
        updated = result.updated,
        rejected = result.rejected,
        "bulk grades applied"
    );
    Ok(result)
}

/// Last-write-wins cleanup: for every (activity, student) pair with more than
/// one row, keeps the newest by (`updated_at`, `recorded_seq`, rowid).
pub fn reconcile_duplicate_grades(conn: &Connection) -> Result<usize, EngineError> {
    let removed = conn.execute(
        "DELETE FROM grade_entries WHERE rowid IN (
            SELECT g.rowid FROM grade_entries g
            WHERE EXISTS (
                SELECT 1 FROM grade_entries h
                WHERE h.activity_id = g.activity_id
                  AND h.student_id = g.student_id
                  AND (h.updated_at > g.updated_at
                       OR (h.updated_at = g.updated_at
                           AND (h.recorded_seq > g.recorded_seq
                                OR (h.recorded_seq = g.recorded_seq AND h.rowid > g.rowid))))
            )
        )",
        [],
    )?;
    Ok(removed)
}
