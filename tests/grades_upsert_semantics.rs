mod test_support;

use serde_json::json;
use test_support::{
    create_activity, request, request_err_code, request_ok, seed_classroom, spawn_sidecar,
    temp_dir,
};

#[test]
fn repeated_upsert_keeps_one_entry_with_latest_payload() {
    let workspace = temp_dir("gradebook-upsert-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_classroom(&mut stdin, &mut reader, &workspace, false);
    let math = &seeded.assignment_ids[0];
    let student = &seeded.student_ids[0];
    let activity = create_activity(&mut stdin, &mut reader, "a1", math, 100.0, 1);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.upsert",
        json!({ "activityId": activity, "studentId": student, "grade": { "value": 11 } }),
    );
    assert_eq!(first["created"], json!(true));

    for (i, v) in [json!(14), json!(14), json!("15,5")].into_iter().enumerate() {
        let again = request_ok(
            &mut stdin,
            &mut reader,
            &format!("2-{}", i),
            "grades.upsert",
            json!({
                "activityId": activity,
                "studentId": student,
                "grade": { "mode": "numeric", "value": v, "observation": "retake" }
            }),
        );
        assert_eq!(again["created"], json!(false));
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.list",
        json!({ "activityId": activity }),
    );
    let grades = listed["grades"].as_array().expect("grades");
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0]["value"].as_f64(), Some(15.5));
    assert_eq!(grades[0]["observation"], json!("retake"));
    assert_eq!(grades[0]["mode"], json!("numeric"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_payloads_and_unknown_references_are_rejected() {
    let workspace = temp_dir("gradebook-upsert-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_classroom(&mut stdin, &mut reader, &workspace, false);
    let math = &seeded.assignment_ids[0];
    let student = &seeded.student_ids[0];
    let activity = create_activity(&mut stdin, &mut reader, "a1", math, 100.0, 1);

    for (i, grade) in [
        json!({ "value": 0 }),
        json!({ "value": 21 }),
        json!({ "value": "twelve" }),
        json!({ "mode": "alphabetic", "letter": "F" }),
        json!({ "mode": "bogus" }),
    ]
    .into_iter()
    .enumerate()
    {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            &format!("v{}", i),
            "grades.upsert",
            json!({ "activityId": activity, "studentId": student, "grade": grade }),
        );
        assert_eq!(code, "bad_params");
    }

    let resp = request(
        &mut stdin,
        &mut reader,
        "nf1",
        "grades.upsert",
        json!({ "activityId": "missing-activity", "studentId": student, "grade": { "value": 10 } }),
    );
    assert_eq!(resp["error"]["code"], json!("not_found"));
    assert_eq!(resp["error"]["details"]["id"], json!("missing-activity"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "nf2",
        "grades.upsert",
        json!({ "activityId": activity, "studentId": "ghost", "grade": { "value": 10 } }),
    );
    assert_eq!(resp["error"]["code"], json!("not_found"));
    assert_eq!(resp["error"]["details"]["entity"], json!("enrollment"));
    assert_eq!(resp["error"]["details"]["id"], json!("ghost"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "mm1",
        "grades.upsert",
        json!({
            "activityId": activity,
            "studentId": student,
            "grade": { "mode": "absent", "value": 15 }
        }),
    );
    assert_eq!(resp["error"]["code"], json!("bad_params"));
    assert_eq!(resp["error"]["details"]["field"], json!("value"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "mm2",
        "grades.upsert",
        json!({
            "activityId": activity,
            "studentId": student,
            "grade": { "mode": "numeric", "value": 15, "letter": "A" }
        }),
    );
    assert_eq!(resp["error"]["code"], json!("bad_params"));
    assert_eq!(resp["error"]["details"]["field"], json!("letter"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "mm3",
        "grades.list",
        json!({ "activityId": activity }),
    );
    assert!(listed["grades"].as_array().expect("grades").is_empty());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn non_numeric_modes_are_stored_without_a_value() {
    let workspace = temp_dir("gradebook-upsert-modes");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_classroom(&mut stdin, &mut reader, &workspace, false);
    let math = &seeded.assignment_ids[0];
    let activity = create_activity(&mut stdin, &mut reader, "a1", math, 100.0, 1);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.upsert",
        json!({
            "activityId": activity,
            "studentId": seeded.student_ids[0],
            "grade": { "mode": "not-presented", "evidence": "doc://missing.pdf" }
        }),
    );
    assert_eq!(res["entry"]["mode"], json!("not_presented"));
    assert!(res["entry"]["value"].is_null());
    assert_eq!(res["entry"]["evidence"], json!("doc://missing.pdf"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.upsert",
        json!({
            "activityId": activity,
            "studentId": seeded.student_ids[1],
            "grade": { "letter": "b" }
        }),
    );
    assert_eq!(res["entry"]["mode"], json!("alphabetic"));
    assert_eq!(res["entry"]["letter"], json!("B"));

    // Letters never count towards a quantitative average.
    let avg = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "calc.momentAverage",
        json!({ "assignmentId": math, "studentId": seeded.student_ids[1], "moment": 1 }),
    );
    assert_eq!(avg["average"], json!("N/A"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_removes_entry_and_reports_missing_ones() {
    let workspace = temp_dir("gradebook-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_classroom(&mut stdin, &mut reader, &workspace, false);
    let math = &seeded.assignment_ids[0];
    let student = &seeded.student_ids[0];
    let activity = create_activity(&mut stdin, &mut reader, "a1", math, 100.0, 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.upsert",
        json!({ "activityId": activity, "studentId": student, "grade": { "value": 9 } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "locks.lock",
        json!({ "assignmentId": math, "moment": 2, "actorRole": "administrator" }),
    );

    // Locks gate writes only.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.delete",
        json!({ "activityId": activity, "studentId": student }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "grades.delete",
        json!({ "activityId": activity, "studentId": student }),
    );
    assert_eq!(code, "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.list",
        json!({ "activityId": activity }),
    );
    assert!(listed["grades"].as_array().expect("grades").is_empty());

    let _ = std::fs::remove_dir_all(workspace);
}
