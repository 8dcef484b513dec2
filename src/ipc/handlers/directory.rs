use crate::directory::{self, NewClassroom, NewSubject};
use crate::ipc::error::ok;
use crate::ipc::helpers::{no_workspace, optional_str, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn parse_subjects(params: &serde_json::Value) -> Result<Vec<NewSubject>, HandlerErr> {
    let Some(arr) = params.get("subjects").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing subjects"));
    };
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        // Bare strings are accepted as subject names.
        let subject = match item {
            serde_json::Value::String(name) => NewSubject {
                name: name.clone(),
                teacher: None,
            },
            serde_json::Value::Object(_) => NewSubject {
                name: required_str(item, "name").map_err(|_| HandlerErr {
                    code: "bad_params",
                    message: format!("subjects[{}].name is required", i),
                    details: None,
                })?,
                teacher: optional_str(item, "teacher")?,
            },
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "subjects[{}] must be a string or object",
                    i
                )))
            }
        };
        out.push(subject);
    }
    Ok(out)
}

fn classrooms_create(conn: &mut Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input = NewClassroom {
        name: required_str(params, "name")?,
        year: optional_str(params, "year")?,
        section: optional_str(params, "section")?,
        shift: optional_str(params, "shift")?,
        term: optional_str(params, "term")?,
        pending: params.get("pending").and_then(|v| v.as_bool()).unwrap_or(false),
        subjects: parse_subjects(params)?,
    };
    let (classroom_id, assignment_ids) = directory::create_classroom(conn, &input)?;
    let assignments = directory::list_assignments(conn, &classroom_id)?;
    Ok(json!({
        "classroomId": classroom_id,
        "assignmentIds": assignment_ids,
        "assignments": assignments,
    }))
}

fn students_create(conn: &mut Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    if last_name.trim().is_empty() && first_name.trim().is_empty() {
        return Err(HandlerErr::bad_params("student name must not be empty"));
    }
    let allowed: Option<Vec<String>> = match params.get("allowedSubjectIds") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return Err(HandlerErr::bad_params("allowedSubjectIds must be an array"));
            };
            let ids = arr
                .iter()
                .map(|x| x.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| HandlerErr::bad_params("allowedSubjectIds must contain strings"))?;
            Some(ids)
        }
    };
    let student_id = directory::create_student(
        conn,
        &classroom_id,
        &last_name,
        &first_name,
        allowed.as_deref(),
    )?;
    Ok(json!({ "studentId": student_id }))
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match classrooms_create(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classrooms": [] }));
    };
    match directory::list_classrooms(conn) {
        Ok(rows) => ok(&req.id, json!({ "classrooms": rows })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "classroomId").and_then(|classroom_id| {
        Ok(directory::list_assignments(conn, &classroom_id)?)
    });
    match res {
        Ok(rows) => ok(&req.id, json!({ "assignments": rows })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    match students_create(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let res = required_str(&req.params, "classroomId")
        .and_then(|classroom_id| Ok(directory::list_students(conn, &classroom_id)?));
    match res {
        Ok(rows) => {
            let students: Vec<serde_json::Value> = rows
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id,
                        "lastName": s.last_name,
                        "firstName": s.first_name,
                        "displayName": s.display_name(),
                        "sortOrder": s.sort_order,
                    })
                })
                .collect();
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.create" => Some(handle_classrooms_create(state, req)),
        "classrooms.list" => Some(handle_classrooms_list(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
