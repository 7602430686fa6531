
use serde_json::json;
use test_support::{
    db_conn, request_err, request_ok, spawn_sidecar, temp_dir, write_review_workbook,
    write_workbook_missing_schedule,
};

#[test]
fn import_without_workspace_is_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "workbook.import",
        json!({ "path": "/tmp/nowhere.xlsx" }),
    );
    assert_eq!(error["code"], json!("no_workspace"));
}

#[test]
fn missing_schedule_sheet_fails_with_diagnostics() {
    let workspace = temp_dir("reviewdesk-detect");
    let upload = temp_dir("reviewdesk-detect-upload").join("roster.xlsx");
    write_workbook_missing_schedule(&upload);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "workbook.import",
        json!({ "path": upload.to_string_lossy() }),
    );
    assert_eq!(error["code"], json!("sheet_detection_failed"));
    let details = &error["details"];
    assert_eq!(details["missingRoles"], json!(["schedule"]));
    assert_eq!(
        details["detected"]["div_a"],
        json!("FINAL DIV-A"),
        "partial detections are surfaced: {details}"
    );
    let available = details["availableSheets"].as_array().unwrap();
    assert!(available.iter().any(|s| s == "Notes"));

    // A failed import stores nothing.
    let error = request_err(&mut stdin, &mut reader, "3", "workbook.info", json!({}));
    assert_eq!(error["code"], json!("no_stored_workbook"));
}

#[test]
fn failed_import_keeps_stored_workbook_and_database_in_step() {
    let workspace = temp_dir("reviewdesk-consistent");
    let good = temp_dir("reviewdesk-consistent-good").join("roster.xlsx");
    write_review_workbook(&good);
    let bad = temp_dir("reviewdesk-consistent-bad").join("broken.xlsx");
    write_workbook_missing_schedule(&bad);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workbook.import",
        json!({ "path": good.to_string_lossy() }),
    );
    let first_version = first["workbook"]["version"].clone();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "workbook.import",
        json!({ "path": bad.to_string_lossy() }),
    );
    assert_eq!(error["code"], json!("sheet_detection_failed"));

    // The stored workbook still points at the successful upload and the
    // database still holds its ingestion.
    let info = request_ok(&mut stdin, &mut reader, "4", "workbook.info", json!({}));
    assert_eq!(info["version"], first_version);
    assert_eq!(info["originalFilename"], json!("roster.xlsx"));

    let conn = db_conn(&workspace);
    let groups: i64 = conn
        .query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))
        .unwrap();
    assert_eq!(groups, 3);
}
