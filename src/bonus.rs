//! Bonus ledger keyed by (assignment, slot, student). Out-of-range points are
//! clamped into the slot's configured range, never rejected.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::activities;
use crate::config::GradingConfig;
use crate::db;
use crate::directory;
use crate::error::EngineError;
use crate::model::BonusSlot;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusEntry {
    pub assignment_id: String,
    pub moment: String,
    pub student_id: String,
    pub points: f64,
    /// Points as submitted, before clamping.
    pub requested: f64,
    pub clamped: bool,
}

/// Accepts a JSON number or a numeric string (comma decimal allowed).
pub fn parse_points(raw: &serde_json::Value) -> Result<f64, EngineError> {
    let n = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(EngineError::validation(
            "points must be a number",
            Some(json!({ "points": raw })),
        )),
    }
}

pub fn clamp_points(points: f64, max: f64) -> f64 {
    points.clamp(0.0, max)
}

/// Moment 4 slots only exist in pending sections, as for activities.
fn require_slot_and_enrollment(
    conn: &Connection,
    assignment_id: &str,
    slot: BonusSlot,
    student_id: &str,
) -> Result<(), EngineError> {
    let assignment = directory::load_assignment(conn, assignment_id)?;
    if let BonusSlot::Moment(m) = slot {
        activities::check_moment_for_section(m, &assignment)?;
    }
    if !directory::is_enrolled(conn, &assignment, student_id)? {
        return Err(EngineError::not_found("enrollment", student_id));
    }
    Ok(())
}

pub fn set_bonus(
    conn: &Connection,
    cfg: &GradingConfig,
    assignment_id: &str,
    slot: BonusSlot,
    student_id: &str,
    points: f64,
) -> Result<BonusEntry, EngineError> {
    if !points.is_finite() {
        return Err(EngineError::validation("points must be a finite number", None));
    }
    require_slot_and_enrollment(conn, assignment_id, slot, student_id)?;

    let stored = clamp_points(points, cfg.bonus_max(slot));
    conn.execute(
        "INSERT INTO bonus_entries(assignment_id, slot, student_id, points, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(assignment_id, slot, student_id) DO UPDATE SET
           points = excluded.points,
           updated_at = excluded.updated_at",
        (assignment_id, slot.key(), student_id, stored, db::now_timestamp()),
    )
    .map_err(|e| EngineError::from_write(e, "bonus", student_id))?;

    debug!(assignment_id, slot = %slot.key(), student_id, points = stored, "bonus set");
    Ok(BonusEntry {
        assignment_id: assignment_id.to_string(),
        moment: slot.key(),
        student_id: student_id.to_string(),
        points: stored,
        requested: points,
        clamped: stored != points,
    })
}

/// Stored points for one slot, or 0 when nothing was recorded.
pub fn get_bonus(conn: &Connection, assignment_id: &str, slot: BonusSlot, student_id: &str) -> Result<f64, EngineError> {
    directory::load_assignment(conn, assignment_id)?;
    stored_points(conn, assignment_id, slot, student_id)
}

pub(crate) fn stored_points(
    conn: &Connection,
    assignment_id: &str,
    slot: BonusSlot,
    student_id: &str,
) -> Result<f64, EngineError> {
    let points: Option<f64> = conn
        .query_row(
            "SELECT points FROM bonus_entries
             WHERE assignment_id = ? AND slot = ? AND student_id = ?",
            (assignment_id, slot.key(), student_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(points.unwrap_or(0.0))
}
