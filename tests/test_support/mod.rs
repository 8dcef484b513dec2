#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()) == Some(true),
        "expected ok response for {}: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Asserts a failed response and returns its error code.
pub fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response for {}: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Ids of a freshly provisioned classroom.
pub struct Seeded {
    pub classroom_id: String,
    /// Mathematics, Orientation.
    pub assignment_ids: Vec<String>,
    pub student_ids: Vec<String>,
}

/// Selects `workspace` and provisions one classroom with Mathematics and
/// Orientation plus two students.
pub fn seed_classroom(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    pending: bool,
) -> Seeded {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "seed-class",
        "classrooms.create",
        json!({
            "name": "1st Year A",
            "year": "2024",
            "section": "A",
            "shift": "morning",
            "pending": pending,
            "subjects": [
                { "name": "Mathematics", "teacher": "R. Mendez" },
                { "name": "Orientation" }
            ]
        }),
    );
    let classroom_id = created["classroomId"].as_str().expect("classroomId").to_string();
    let assignment_ids: Vec<String> = created["assignmentIds"]
        .as_array()
        .expect("assignmentIds")
        .iter()
        .map(|v| v.as_str().expect("assignment id").to_string())
        .collect();

    let mut student_ids = Vec::new();
    for (i, (last, first)) in [("Perez", "Ana"), ("Rojas", "Luis")].iter().enumerate() {
        let s = request_ok(
            stdin,
            reader,
            &format!("seed-student-{}", i),
            "students.create",
            json!({ "classroomId": classroom_id, "lastName": last, "firstName": first }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    Seeded {
        classroom_id,
        assignment_ids,
        student_ids,
    }
}

pub fn create_activity(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    assignment_id: &str,
    weight: f64,
    moment: i64,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "activities.create",
        json!({
            "assignmentId": assignment_id,
            "name": format!("Activity {}", id),
            "weight": weight,
            "moment": moment,
        }),
    );
    res["activity"]["id"].as_str().expect("activity id").to_string()
}
