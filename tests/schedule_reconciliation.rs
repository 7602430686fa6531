
use serde_json::json;
use test_support::{db_conn, request_ok, spawn_sidecar, temp_dir, write_review_workbook};

#[test]
fn evaluators_exclude_the_groups_own_guide() {
    let workspace = temp_dir("reviewdesk-sched");
    let upload = temp_dir("reviewdesk-sched-upload").join("roster.xlsx");
    write_review_workbook(&upload);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workbook.import",
        json!({ "path": upload.to_string_lossy() }),
    );

    let conn = db_conn(&workspace);
    let assignment = |group: &str| -> (i64, String, String, String, String) {
        conn.query_row(
            "SELECT track, location, guide, evaluator1, evaluator2
             FROM panel_assignments WHERE group_id = ?1",
            [group],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .expect("assignment row")
    };

    // BIA-01's guide sits on its own panel; the evaluators are the other two
    // panelists, in panel order.
    let (track, location, guide, eval1, eval2) = assignment("BIA-01");
    assert_eq!(track, 1);
    assert_eq!(location, "Lab 204");
    assert_eq!(guide, "Dr. Anil Mehta");
    assert_eq!(eval1, "Prof. Beena Rao");
    assert_eq!(eval2, "Dr. Chitra Iyer");

    // Same panel, different guide: the honorific-insensitive comparison must
    // still recognize Beena Rao and skip her.
    let (_, _, guide, eval1, eval2) = assignment("BIA-02");
    assert_eq!(guide, "Prof. Beena Rao");
    assert_eq!(eval1, "Dr. Anil Mehta");
    assert_eq!(eval2, "Dr. Chitra Iyer");

    // Track 2 has no panel or location in the sheet: defaults all the way.
    let (track, location, _, eval1, eval2) = assignment("BIB-01");
    assert_eq!(track, 2);
    assert_eq!(location, "Room 2");
    assert_eq!(eval1, "Default Panel 2 Prof 1");
    assert_eq!(eval2, "Default Panel 2 Prof 2");
    let professors: String = conn
        .query_row(
            "SELECT panel_professors FROM panel_assignments WHERE group_id = 'BIB-01'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(
        professors,
        "Default Panel 2 Prof 1\nDefault Panel 2 Prof 2\nDefault Panel 2 Prof 3"
    );

    // Evaluator assignments are mirrored onto the project rows.
    let (e1, e2): (String, String) = conn
        .query_row(
            "SELECT evaluator1_name, evaluator2_name FROM projects WHERE group_id = 'BIA-02'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(e1, "Dr. Anil Mehta");
    assert_eq!(e2, "Dr. Chitra Iyer");
}
