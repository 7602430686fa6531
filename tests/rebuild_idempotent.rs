
use rusqlite::Connection;
use serde_json::json;
use test_support::{db_conn, request_ok, spawn_sidecar, temp_dir, write_review_workbook};

fn snapshot(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    let cols = stmt.column_count();
    stmt.query_map([], |r| {
        let mut parts = Vec::with_capacity(cols);
        for i in 0..cols {
            let v: rusqlite::types::Value = r.get(i)?;
            parts.push(format!("{v:?}"));
        }
        Ok(parts.join("|"))
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

#[test]
fn reload_rebuilds_to_an_identical_snapshot() {
    let workspace = temp_dir("reviewdesk-rebuild");
    let upload = temp_dir("reviewdesk-rebuild-upload").join("roster.xlsx");
    write_review_workbook(&upload);

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
        json!({ "path": upload.to_string_lossy() }),
    );

    let conn = db_conn(&workspace);
    let queries = [
        "SELECT * FROM projects ORDER BY group_id",
        "SELECT * FROM members ORDER BY group_id, roll_no",
        "SELECT * FROM panel_assignments ORDER BY group_id",
        "SELECT * FROM row_map ORDER BY sheet_role, row_idx",
    ];
    let before: Vec<Vec<String>> = queries.iter().map(|q| snapshot(&conn, q)).collect();
    drop(conn);

    let second = request_ok(&mut stdin, &mut reader, "3", "workbook.reload", json!({}));
    assert_eq!(first["summary"], second["summary"]);

    let conn = db_conn(&workspace);
    let after: Vec<Vec<String>> = queries.iter().map(|q| snapshot(&conn, q)).collect();
    assert_eq!(before, after);

    // A third pass changes nothing either.
    drop(conn);
    let _ = request_ok(&mut stdin, &mut reader, "4", "workbook.reload", json!({}));
    let conn = db_conn(&workspace);
    let again: Vec<Vec<String>> = queries.iter().map(|q| snapshot(&conn, q)).collect();
    assert_eq!(before, again);
}
