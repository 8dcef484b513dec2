mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_err_code, seed_classroom, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.gradebook.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "0", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["workspacePath"].is_null());

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "0b",
        "grades.list",
        json!({ "activityId": "x" }),
    );
    assert_eq!(code, "no_workspace");

    let seeded = seed_classroom(&mut stdin, &mut reader, &workspace, false);
    let math = seeded.assignment_ids[0].clone();
    let student = seeded.student_ids[0].clone();

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("classrooms.list", json!({})),
        ("assignments.list", json!({ "classroomId": seeded.classroom_id })),
        ("students.list", json!({ "classroomId": seeded.classroom_id })),
        ("activities.list", json!({ "assignmentId": math })),
        (
            "activities.create",
            json!({ "assignmentId": math, "name": "Quiz", "weight": 100, "moment": 1 }),
        ),
        ("bonus.get", json!({ "assignmentId": math, "moment": "total", "studentId": student })),
        (
            "bonus.set",
            json!({ "assignmentId": math, "moment": 1, "studentId": student, "points": 1 }),
        ),
        ("locks.get", json!({ "assignmentId": math })),
        (
            "locks.lock",
            json!({ "assignmentId": math, "moment": 3, "actorRole": "administrator" }),
        ),
        (
            "locks.unlock",
            json!({ "assignmentId": math, "moment": 3, "actorRole": "administrator" }),
        ),
        (
            "locks.setClassroomMoment",
            json!({
                "classroomId": seeded.classroom_id,
                "moment": 2,
                "locked": false,
                "actorRole": "administrator"
            }),
        ),
        (
            "calc.momentAverage",
            json!({ "assignmentId": math, "studentId": student, "moment": 1 }),
        ),
        ("calc.finalGrade", json!({ "assignmentId": math, "studentId": student })),
        ("reports.classroom", json!({ "classroomId": seeded.classroom_id })),
        ("grades.reconcile", json!({})),
        ("setup.get", json!({})),
        (
            "setup.update",
            json!({ "section": "grading", "patch": { "bulkMaxEntries": 100 } }),
        ),
        ("backup.exportBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("c{}", i), method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
    }

    let activities = request(
        &mut stdin,
        &mut reader,
        "acts",
        "activities.list",
        json!({ "assignmentId": math }),
    );
    let activity_id = activities["result"]["activities"][0]["id"]
        .as_str()
        .expect("activity id")
        .to_string();
    for (i, (method, params)) in [
        (
            "grades.upsert",
            json!({ "activityId": activity_id, "studentId": student, "grade": { "value": 12 } }),
        ),
        ("grades.list", json!({ "activityId": activity_id })),
        (
            "grades.bulkUpsert",
            json!({ "activityId": activity_id, "entries": [] }),
        ),
        ("grades.delete", json!({ "activityId": activity_id, "studentId": student })),
        (
            "activities.update",
            json!({ "activityId": activity_id, "patch": { "name": "Quiz 1" } }),
        ),
        ("activities.delete", json!({ "activityId": activity_id })),
        ("backup.importBundle", json!({ "inPath": bundle_out.to_string_lossy() })),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("g{}", i), method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
    }

    let code = request_err_code(&mut stdin, &mut reader, "u", "grades.frobnicate", json!({}));
    assert_eq!(code, "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(value["error"]["code"], json!("bad_json"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
