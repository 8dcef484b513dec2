use crate::grades;
use crate::ipc::error::ok;
use crate::ipc::helpers::{load_config, no_workspace, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn grades_upsert(conn: &mut Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let activity_id = required_str(params, "activityId")?;
    let student_id = required_str(params, "studentId")?;
    let Some(grade) = params.get("grade") else {
        return Err(HandlerErr::bad_params("missing grade"));
    };
    let cfg = load_config(conn)?;
    let payload = grades::parse_grade_payload(grade, &cfg)?;
    let res = grades::upsert_grade(conn, &activity_id, &student_id, &payload)?;
    Ok(json!({ "entry": res.entry, "created": res.created }))
}

fn grades_bulk_upsert(conn: &mut Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let activity_id = required_str(params, "activityId")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    let cfg = load_config(conn)?;
    let result = grades::bulk_upsert_grades(conn, &cfg, &activity_id, entries)?;
    serde_json::to_value(result).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "activityId")
        .and_then(|activity_id| Ok(grades::list_grades(conn, &activity_id)?));
    match res {
        Ok(entries) => ok(&req.id, json!({ "grades": entries })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match grades_upsert(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "activityId").and_then(|activity_id| {
        let student_id = required_str(&req.params, "studentId")?;
        grades::delete_grade(conn, &activity_id, &student_id)?;
        Ok(())
    });
    match res {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_grades_bulk_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match grades_bulk_upsert(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_grades_reconcile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match grades::reconcile_duplicate_grades(conn) {
        Ok(removed) => {
            info!(removed, "grade reconciliation finished");
            ok(&req.id, json!({ "removed": removed }))
        }
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.bulkUpsert" => Some(handle_grades_bulk_upsert(state, req)),
        "grades.reconcile" => Some(handle_grades_reconcile(state, req)),
        _ => None,
    }
}
