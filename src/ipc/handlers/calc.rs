use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{load_config, no_workspace, required_moment, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn moment_average(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let moment = required_moment(params, "moment")?;
    let cfg = load_config(conn)?;
    let average = calc::compute_moment_average(conn, &cfg, &assignment_id, &student_id, moment)?;
    Ok(json!({
        "assignmentId": assignment_id,
        "studentId": student_id,
        "moment": moment,
        "average": average,
    }))
}

fn final_grade(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let cfg = load_config(conn)?;
    let breakdown = calc::compute_final_grade(conn, &cfg, &assignment_id, &student_id)?;
    serde_json::to_value(breakdown).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

fn handle_moment_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match moment_average(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_final_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match final_grade(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.momentAverage" => Some(handle_moment_average(state, req)),
        "calc.finalGrade" => Some(handle_final_grade(state, req)),
        _ => None,
    }
}
