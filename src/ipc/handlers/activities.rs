use crate::activities::{self, ActivityPatch, NewActivity};
use crate::grades::{self, GradePayload};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    load_config, no_workspace, optional_str, required_f64, required_moment, required_str,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn parse_initial_grades(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Vec<(String, GradePayload)>, HandlerErr> {
    let Some(raw) = params.get("grades").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr::bad_params("grades must be an array"));
    };
    let cfg = load_config(conn)?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let student_id = required_str(item, "studentId").map_err(|_| HandlerErr {
            code: "bad_params",
            message: format!("grades[{}].studentId is required", i),
            details: None,
        })?;
        let Some(grade) = item.get("grade") else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("grades[{}].grade is required", i),
                details: Some(json!({ "studentId": student_id })),
            });
        };
        let payload = grades::parse_grade_payload(grade, &cfg)?;
        out.push((student_id, payload));
    }
    Ok(out)
}

fn activities_create(conn: &mut Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let input = NewActivity {
        name: required_str(params, "name")?,
        description: optional_str(params, "description")?,
        date: optional_str(params, "date")?,
        weight: required_f64(params, "weight")?,
        moment: required_moment(params, "moment")?,
        initial_grades: parse_initial_grades(conn, params)?,
    };
    let activity = activities::add_activity(conn, &assignment_id, &input)?;
    Ok(json!({
        "activity": activity,
        "gradesCreated": input.initial_grades.len(),
    }))
}

/// `description` and `date` distinguish "absent" (keep) from `null` (clear).
fn nullable_text(patch: &serde_json::Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    match patch.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(None)),
        Some(v) => v
            .as_str()
            .map(|s| Some(Some(s.to_string())))
            .ok_or_else(|| HandlerErr::bad_params(format!("patch.{} must be a string or null", key))),
    }
}

fn parse_patch(params: &serde_json::Value) -> Result<ActivityPatch, HandlerErr> {
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let mut out = ActivityPatch {
        description: nullable_text(patch, "description")?,
        date: nullable_text(patch, "date")?,
        ..Default::default()
    };
    if patch.get("name").is_some() {
        out.name = Some(required_str(patch, "name")?);
    }
    if patch.get("weight").is_some() {
        out.weight = Some(required_f64(patch, "weight")?);
    }
    if patch.get("moment").is_some() {
        out.moment = Some(required_moment(patch, "moment")?);
    }
    Ok(out)
}

fn handle_activities_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "assignmentId")
        .and_then(|assignment_id| {
            crate::directory::load_assignment(conn, &assignment_id)?;
            Ok(activities::list_activities(conn, &assignment_id)?)
        });
    match res {
        Ok(list) => ok(
            &req.id,
            json!({
                "momentWeights": activities::moment_weights(&list),
                "activities": list,
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_activities_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match activities_create(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_activities_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "activityId").and_then(|activity_id| {
        let patch = parse_patch(&req.params)?;
        Ok(activities::update_activity(conn, &activity_id, &patch)?)
    });
    match res {
        Ok(activity) => ok(&req.id, json!({ "activity": activity })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_activities_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "activityId")
        .and_then(|activity_id| Ok(activities::delete_activity(conn, &activity_id)?));
    match res {
        Ok(grades_removed) => ok(&req.id, json!({ "ok": true, "gradesRemoved": grades_removed })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activities.list" => Some(handle_activities_list(state, req)),
        "activities.create" => Some(handle_activities_create(state, req)),
        "activities.update" => Some(handle_activities_update(state, req)),
        "activities.delete" => Some(handle_activities_delete(state, req)),
        _ => None,
    }
}
