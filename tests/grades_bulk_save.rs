
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, MockPortal, Route};

fn open_screen(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    base_url: &str,
) {
    request_ok(
        stdin,
        reader,
        "setup-1",
        "session.configure",
        json!({ "baseUrl": base_url, "token": "test-token" }),
    );
    request_ok(
        stdin,
        reader,
        "setup-2",
        "grades.open",
        json!({
            "subjectId": "sub-101",
            "semesterId": "sem-1",
            "section": "Einstein",
            "yearLevel": "Grade 11"
        }),
    );
}

#[test]
fn bulk_save_sends_one_call_and_reconciles_with_a_refetch() {
    let confirmed_after = json!({
        "data": {
            "stu-1": { "sub-101": { "midterm": 60, "finals": 70, "finalRating": 66, "action": "FAILED" } },
            "stu-2": { "sub-101": { "midterm": 88, "finals": 92, "finalRating": 90, "action": "PASSED" } }
        }
    });
    let portal = MockPortal::start(vec![
        Route {
            method: "GET",
            path_prefix: "/grades/sub-101",
            responses: vec![(200, json!({ "data": {} })), (200, confirmed_after)],
        },
        Route::fixed("POST", "/grades/bulk", 200, json!({ "data": [] })),
    ]);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_screen(&mut stdin, &mut reader, &portal.base_url);

    for (id, student, field, value) in [
        ("1", "stu-1", "midterm", 60),
        ("2", "stu-1", "finals", 70),
        ("3", "stu-2", "midterm", 88),
        ("4", "stu-2", "finals", 92),
    ] {
        request_ok(
            &mut stdin,
            &mut reader,
            id,
            "grades.setField",
            json!({ "studentId": student, "field": field, "value": value }),
        );
    }

    let result = request_ok(&mut stdin, &mut reader, "5", "grades.saveAll", json!({}));
    assert_eq!(result["saved"], json!(2));
    assert_eq!(result["reconciled"], json!(true));

    let rows = result["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["studentId"], json!("stu-1"));
    assert_eq!(rows[0]["finalRating"], json!(66));
    assert_eq!(rows[0]["action"], json!("FAILED"));
    assert_eq!(rows[1]["studentId"], json!("stu-2"));
    assert_eq!(rows[1]["finalRating"], json!(90));
    assert_eq!(rows[1]["action"], json!("PASSED"));

    // Exactly one bulk call, carrying both updates.
    assert_eq!(portal.count("POST", "/grades/bulk"), 1);
    let bulk = portal
        .requests()
        .into_iter()
        .find(|r| r.method == "POST" && r.path.starts_with("/grades/bulk"))
        .expect("bulk request");
    let body: serde_json::Value = serde_json::from_str(&bulk.body).expect("bulk body");
    let updates = body["updates"].as_array().expect("updates");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["studentId"], json!("stu-1"));
    assert_eq!(updates[0]["section"], json!("Einstein"));
    assert_eq!(updates[0]["yearLevel"], json!("Grade 11"));
    assert_eq!(updates[0]["semesterId"], json!("sem-1"));
}

#[test]
fn bulk_failure_applies_nothing_and_keeps_every_edit() {
    let portal = MockPortal::start(vec![
        Route::fixed("GET", "/grades/sub-101", 200, json!({ "data": {} })),
        Route::fixed("POST", "/grades/bulk", 500, json!({ "message": "bulk rejected" })),
    ]);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_screen(&mut stdin, &mut reader, &portal.base_url);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.setField",
        json!({ "studentId": "stu-1", "field": "midterm", "value": 60 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.setField",
        json!({ "studentId": "stu-2", "field": "finals", "value": 70 }),
    );

    let error = request_err(&mut stdin, &mut reader, "3", "grades.saveAll", json!({}));
    assert_eq!(error["code"], json!("server_error"));
    assert_eq!(error["message"], json!("bulk rejected"));

    // Both edits survived: the retry builds the same two-student batch.
    let error = request_err(&mut stdin, &mut reader, "4", "grades.saveAll", json!({}));
    assert_eq!(error["code"], json!("server_error"));
    assert_eq!(portal.count("POST", "/grades/bulk"), 2);
}

#[test]
fn bulk_save_with_no_pending_edits_is_a_silent_no_op() {
    let portal = MockPortal::start(vec![
        Route::fixed("GET", "/grades/sub-101", 200, json!({ "data": {} })),
    ]);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_screen(&mut stdin, &mut reader, &portal.base_url);

    let result = request_ok(&mut stdin, &mut reader, "1", "grades.saveAll", json!({}));
    assert_eq!(result["saved"], json!(0));
    assert_eq!(portal.count("POST", "/grades/bulk"), 0);
}
