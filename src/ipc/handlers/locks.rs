use crate::ipc::error::ok;
use crate::ipc::helpers::{actor_role, no_workspace, required_bool, required_moment, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::locks;
use rusqlite::Connection;
use serde_json::json;

fn locks_set(conn: &mut Connection, params: &serde_json::Value, locked: bool) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let moment = required_moment(params, "moment")?;
    let role = actor_role(params)?;
    let change = locks::set_lock(conn, &assignment_id, moment, locked, role)?;
    Ok(json!({ "lock": change }))
}

fn locks_set_classroom(conn: &mut Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let moment = required_moment(params, "moment")?;
    let locked = required_bool(params, "locked")?;
    let role = actor_role(params)?;
    let changes = locks::set_classroom_moment(conn, &classroom_id, moment, locked, role)?;
    let changed = changes.iter().filter(|c| c.changed).count();
    Ok(json!({ "changes": changes, "changedCount": changed }))
}

fn handle_locks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "assignmentId")
        .and_then(|assignment_id| Ok(locks::lock_states(conn, &assignment_id)?));
    match res {
        Ok(states) => ok(&req.id, json!({ "moments": states })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_locks_set(state: &mut AppState, req: &Request, locked: bool) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match locks_set(conn, &req.params, locked) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_locks_set_classroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match locks_set_classroom(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "locks.get" => Some(handle_locks_get(state, req)),
        "locks.lock" => Some(handle_locks_set(state, req, true)),
        "locks.unlock" => Some(handle_locks_set(state, req, false)),
        "locks.setClassroomMoment" => Some(handle_locks_set_classroom(state, req)),
        _ => None,
    }
}
