use crate::ipc::error::ok;
use crate::ipc::helpers::{load_config, no_workspace, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use rusqlite::Connection;
use serde_json::json;

fn classroom_model(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let cfg = load_config(conn)?;
    let report = reports::classroom_report(conn, &cfg, &classroom_id)?;
    serde_json::to_value(report).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

fn handle_reports_classroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match classroom_model(conn, &req.params) {
        Ok(v) => ok(&req.id, json!({ "report": v })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classroom" => Some(handle_reports_classroom(state, req)),
        _ => None,
    }
}
