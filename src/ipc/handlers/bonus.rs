use crate::bonus;
use crate::ipc::error::ok;
use crate::ipc::helpers::{load_config, no_workspace, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::BonusSlot;
use rusqlite::Connection;
use serde_json::json;

fn slot_param(params: &serde_json::Value) -> Result<BonusSlot, HandlerErr> {
    let Some(raw) = params.get("moment") else {
        return Err(HandlerErr::bad_params("missing moment"));
    };
    Ok(BonusSlot::parse(raw)?)
}

fn bonus_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let slot = slot_param(params)?;
    let points = bonus::get_bonus(conn, &assignment_id, slot, &student_id)?;
    Ok(json!({
        "assignmentId": assignment_id,
        "studentId": student_id,
        "moment": slot.key(),
        "points": points,
    }))
}

fn bonus_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let slot = slot_param(params)?;
    let Some(raw_points) = params.get("points") else {
        return Err(HandlerErr::bad_params("missing points"));
    };
    let points = bonus::parse_points(raw_points)?;
    let cfg = load_config(conn)?;
    let entry = bonus::set_bonus(conn, &cfg, &assignment_id, slot, &student_id, points)?;
    Ok(json!({ "bonus": entry }))
}

fn handle_bonus_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match bonus_get(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_bonus_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match bonus_set(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bonus.get" => Some(handle_bonus_get(state, req)),
        "bonus.set" => Some(handle_bonus_set(state, req)),
        _ => None,
    }
}
