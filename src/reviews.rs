//! Review-cycle persistence: per-member marks, attendance flags and
//! per-group questionnaire responses.
//!
//! Table and column names are interpolated into SQL, so every identifier that
//! originates outside this process goes through a validator first. Criteria
//! columns are discovered from the live schema rather than hardcoded, which
//! lets a workspace add criteria columns without touching code.

use crate::db::{table_has_column, REVIEW_COUNT};
use anyhow::bail;
use log::warn;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{json, Map, Value};

const MAX_COMMENTS: usize = 1000;
const MAX_OVERALL_COMMENTS: usize = 2000;
const MAX_RESPONSE: usize = 50;
const MAX_MARK_STRING: usize = 10;

pub fn validate_review_number(review: i64) -> anyhow::Result<u8> {
    if (0..REVIEW_COUNT as i64).contains(&review) {
        Ok(review as u8)
    } else {
        bail!("review number {review} out of range 0..={}", REVIEW_COUNT - 1)
    }
}

pub fn validate_group_id(group_id: &str) -> anyhow::Result<()> {
    let ok = !group_id.is_empty()
        && group_id.len() <= 20
        && group_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(())
    } else {
        bail!("invalid group id {group_id:?}")
    }
}

pub fn validate_roll_no(roll_no: &str) -> anyhow::Result<()> {
    let ok = !roll_no.is_empty()
        && roll_no.len() <= 15
        && roll_no.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(())
    } else {
        bail!("invalid roll number {roll_no:?}")
    }
}

pub fn validate_criteria_id(criteria: &str) -> anyhow::Result<()> {
    let ok = !criteria.is_empty()
        && criteria.len() <= 50
        && criteria
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '_' || c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        bail!("invalid criteria id {criteria:?}")
    }
}

pub fn marks_table(review: u8) -> String {
    format!("review{review}_marks")
}

pub fn responses_table(review: u8) -> String {
    format!("review{review}_group_responses")
}

pub fn attendance_column(review: u8) -> String {
    format!("review{review}_attendance")
}

/// Group members with their attendance flag for one review.
pub fn members_with_attendance(
    conn: &Connection,
    review: u8,
    group_id: &str,
) -> anyhow::Result<Value> {
    validate_group_id(group_id)?;
    let col = attendance_column(review);
    let sql = format!(
        "SELECT roll_no, student_name, {col} FROM members
         WHERE group_id = ?1 ORDER BY roll_no"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([group_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let roll: String = row.get(0)?;
        let name: String = row.get(1)?;
        let attendance: i64 = row.get(2)?;
        out.push(json!({
            "rollNo": roll,
            "studentName": name,
            "attendance": attendance != 0,
        }));
    }
    Ok(Value::Array(out))
}

/// Set attendance flags for one review. Entries with an invalid roll number
/// are skipped, not fatal; the count of applied updates is returned.
pub fn set_attendance(
    conn: &Connection,
    review: u8,
    group_id: &str,
    entries: &[(String, bool)],
) -> anyhow::Result<usize> {
    validate_group_id(group_id)?;
    let col = attendance_column(review);
    let sql = format!("UPDATE members SET {col} = ?1 WHERE group_id = ?2 AND roll_no = ?3");
    let mut applied = 0usize;
    for (roll, present) in entries {
        if validate_roll_no(roll).is_err() {
            continue;
        }
        applied += conn.execute(&sql, params![*present as i64, group_id, roll])?;
    }
    Ok(applied)
}

/// Criteria columns of a marks table, discovered from the live schema.
fn criteria_columns(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({table})");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut cols = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if !matches!(
            name.as_str(),
            "group_id" | "roll_no" | "total" | "updated_at"
        ) {
            cols.push(name);
        }
    }
    Ok(cols)
}

/// One member's mark value. Numbers pass through; short strings (grades like
/// "AB") are stored as-is; anything else becomes 0.
fn mark_value(value: &Value) -> SqlValue {
    match value {
        Value::Number(n) => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        Value::String(s) if s.chars().count() <= MAX_MARK_STRING => {
            SqlValue::Text(s.clone())
        }
        _ => SqlValue::Real(0.0),
    }
}

/// Upsert marks for several members of one group in one review.
///
/// `marks` maps roll number to `{criteria: value}`. Criteria that are not
/// columns of the marks table are dropped; the row total is the sum of the
/// numeric values written.
pub fn save_marks(
    conn: &Connection,
    review: u8,
    group_id: &str,
    marks: &Map<String, Value>,
) -> anyhow::Result<usize> {
    validate_group_id(group_id)?;
    let table = marks_table(review);
    let known = criteria_columns(conn, &table)?;

    let mut saved = 0usize;
    for (roll, per_member) in marks {
        validate_roll_no(roll)?;
        let Some(per_member) = per_member.as_object() else {
            bail!("marks for {roll} must be an object")
        };

        let mut cols: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        let mut total = 0.0f64;
        for (criteria, value) in per_member {
            if validate_criteria_id(criteria).is_err()
                || !known.iter().any(|k| k == criteria)
            {
                warn!("review {review}: dropping unrecognized criteria {criteria:?}");
                continue;
            }
            let v = mark_value(value);
            if let SqlValue::Real(f) = v {
                total += f;
            }
            cols.push(criteria);
            values.push(v);
        }
        if cols.is_empty() {
            continue;
        }

        let col_list = cols.join(", ");
        let placeholders = (3..3 + cols.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = cols
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} (group_id, roll_no, {col_list}, total, updated_at)
             VALUES (?1, ?2, {placeholders}, ?{t}, ?{u})
             ON CONFLICT(group_id, roll_no) DO UPDATE SET
               {updates}, total = excluded.total, updated_at = excluded.updated_at",
            t = 3 + cols.len(),
            u = 4 + cols.len(),
        );

        let mut all: Vec<SqlValue> = Vec::with_capacity(values.len() + 4);
        all.push(SqlValue::Text(group_id.to_string()));
        all.push(SqlValue::Text(roll.clone()));
        all.extend(values);
        all.push(SqlValue::Real(total));
        all.push(SqlValue::Text(now()));
        conn.execute(&sql, params_from_iter(all))?;
        saved += 1;
    }
    Ok(saved)
}

/// All stored marks for one group in one review, keyed by roll number.
pub fn get_marks(conn: &Connection, review: u8, group_id: &str) -> anyhow::Result<Value> {
    validate_group_id(group_id)?;
    let table = marks_table(review);
    let sql = format!("SELECT * FROM {table} WHERE group_id = ?1 ORDER BY roll_no");
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = stmt.query([group_id])?;
    let mut out = Map::new();
    while let Some(row) = rows.next()? {
        let mut entry = Map::new();
        let mut roll = String::new();
        for (i, name) in names.iter().enumerate() {
            let value = json_from_sql(row.get_ref(i)?);
            if name == "roll_no" {
                roll = value.as_str().unwrap_or_default().to_string();
            } else if name != "group_id" {
                entry.insert(name.clone(), value);
            }
        }
        out.insert(roll, Value::Object(entry));
    }
    Ok(Value::Object(out))
}

/// Question columns of a responses table (q1_1, q2_3, ...).
fn question_columns(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({table})");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut cols = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.starts_with('q') {
            cols.push(name);
        }
    }
    Ok(cols)
}

/// Upsert a group's questionnaire answers for one review. Question codes use
/// the form-facing `q1.2` spelling and map onto `q1_2` columns; codes with no
/// matching column are dropped.
pub fn save_responses(
    conn: &Connection,
    review: u8,
    group_id: &str,
    answers: &Map<String, Value>,
    comments: Option<&str>,
) -> anyhow::Result<usize> {
    validate_group_id(group_id)?;
    let table = responses_table(review);
    let known = question_columns(conn, &table)?;

    let mut cols: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for (code, answer) in answers {
        let col = code.replace('.', "_");
        validate_criteria_id(&col)?;
        if !known.iter().any(|k| *k == col) {
            continue;
        }
        let text: String = match answer {
            Value::String(s) => s.chars().take(MAX_RESPONSE).collect(),
            Value::Null => String::new(),
            other => other.to_string().chars().take(MAX_RESPONSE).collect(),
        };
        cols.push(col);
        values.push(SqlValue::Text(text));
    }
    let stored = cols.len();

    let comments: String = comments
        .unwrap_or_default()
        .chars()
        .take(MAX_COMMENTS)
        .collect();

    let mut col_list = vec![
        "group_id".to_string(),
        "submission_date".to_string(),
        "comments".to_string(),
        "updated_at".to_string(),
    ];
    col_list.extend(cols.iter().cloned());
    let placeholders = (1..=col_list.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = col_list
        .iter()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})
         ON CONFLICT(group_id) DO UPDATE SET {updates}",
        col_list.join(", "),
    );

    let stamp = now();
    let mut all: Vec<SqlValue> = Vec::with_capacity(col_list.len());
    all.push(SqlValue::Text(group_id.to_string()));
    all.push(SqlValue::Text(stamp.clone()));
    all.push(SqlValue::Text(comments));
    all.push(SqlValue::Text(stamp));
    all.extend(values);
    conn.execute(&sql, params_from_iter(all))?;
    Ok(stored)
}

/// A group's stored questionnaire answers for one review, or null.
pub fn get_responses(conn: &Connection, review: u8, group_id: &str) -> anyhow::Result<Value> {
    validate_group_id(group_id)?;
    let table = responses_table(review);
    let sql = format!("SELECT * FROM {table} WHERE group_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = stmt.query([group_id])?;
    match rows.next()? {
        Some(row) => {
            let mut entry = Map::new();
            for (i, name) in names.iter().enumerate() {
                entry.insert(name.clone(), json_from_sql(row.get_ref(i)?));
            }
            Ok(Value::Object(entry))
        }
        None => Ok(Value::Null),
    }
}

/// Cross-review wrap-up for one group: project info (panel-assignment names
/// take precedence where present), members with their attendance flag per
/// review, and each review's mark totals keyed by roll number.
pub fn final_summary(conn: &Connection, group_id: &str) -> anyhow::Result<Value> {
    validate_group_id(group_id)?;

    let mut stmt = conn.prepare(
        "SELECT group_id, division, project_domain, project_title, guide_name,
                mentor_name, evaluator1_name, evaluator2_name
         FROM projects WHERE group_id = ?1",
    )?;
    let mut rows = stmt.query([group_id])?;
    let Some(row) = rows.next()? else {
        bail!("no project for group {group_id:?}")
    };
    let mut group_info = Map::new();
    for (i, key) in [
        "groupId",
        "division",
        "projectDomain",
        "projectTitle",
        "guideName",
        "mentorName",
        "evaluator1Name",
        "evaluator2Name",
    ]
    .iter()
    .enumerate()
    {
        group_info.insert(key.to_string(), json_from_sql(row.get_ref(i)?));
    }

    let mut stmt = conn.prepare(
        "SELECT guide, evaluator1, evaluator2 FROM panel_assignments WHERE group_id = ?1",
    )?;
    let mut rows = stmt.query([group_id])?;
    if let Some(row) = rows.next()? {
        for (i, key) in ["guideName", "evaluator1Name", "evaluator2Name"]
            .iter()
            .enumerate()
        {
            match json_from_sql(row.get_ref(i)?) {
                Value::String(s) if !s.is_empty() => {
                    group_info.insert(key.to_string(), Value::String(s));
                }
                _ => {}
            }
        }
    }

    let att_cols: Vec<String> = (0..REVIEW_COUNT).map(attendance_column).collect();
    let sql = format!(
        "SELECT roll_no, student_name, {} FROM members
         WHERE group_id = ?1 ORDER BY roll_no",
        att_cols.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([group_id])?;
    let mut members = Vec::new();
    while let Some(row) = rows.next()? {
        let roll: String = row.get(0)?;
        let name: String = row.get(1)?;
        let mut attendance = Vec::with_capacity(REVIEW_COUNT as usize);
        for i in 0..REVIEW_COUNT as usize {
            let flag: i64 = row.get(2 + i)?;
            attendance.push(Value::Bool(flag != 0));
        }
        members.push(json!({
            "rollNo": roll,
            "studentName": name,
            "attendance": attendance,
        }));
    }
    if members.is_empty() {
        bail!("no members for group {group_id:?}")
    }

    let mut review_marks = Map::new();
    for review in 0..REVIEW_COUNT {
        let table = marks_table(review);
        let sql =
            format!("SELECT roll_no, total FROM {table} WHERE group_id = ?1 ORDER BY roll_no");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([group_id])?;
        let mut totals = Map::new();
        while let Some(row) = rows.next()? {
            let roll: String = row.get(0)?;
            totals.insert(roll, json_from_sql(row.get_ref(1)?));
        }
        review_marks.insert(format!("review{review}"), Value::Object(totals));
    }

    Ok(json!({
        "groupInfo": Value::Object(group_info),
        "members": members,
        "reviewMarks": Value::Object(review_marks),
    }))
}

/// A group's stored overall remark, or null when none has been saved.
pub fn get_overall_comments(conn: &Connection, group_id: &str) -> anyhow::Result<Value> {
    validate_group_id(group_id)?;
    let mut stmt =
        conn.prepare("SELECT overall_comments FROM final_sheet WHERE group_id = ?1")?;
    let mut rows = stmt.query([group_id])?;
    match rows.next()? {
        Some(row) => Ok(json_from_sql(row.get_ref(0)?)),
        None => Ok(Value::Null),
    }
}

/// Upsert the overall remark for a group, clipped to a sane length.
pub fn save_overall_comments(
    conn: &Connection,
    group_id: &str,
    comments: &str,
) -> anyhow::Result<()> {
    validate_group_id(group_id)?;
    let clipped: String = comments.chars().take(MAX_OVERALL_COMMENTS).collect();
    conn.execute(
        "INSERT INTO final_sheet (group_id, overall_comments, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(group_id) DO UPDATE SET
           overall_comments = excluded.overall_comments,
           updated_at = excluded.updated_at",
        params![group_id, clipped, now()],
    )?;
    Ok(())
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Sanity check used at attendance time; the members table always carries one
/// attendance column per review.
pub fn ensure_attendance_column(conn: &Connection, review: u8) -> anyhow::Result<()> {
    let col = attendance_column(review);
    if !table_has_column(conn, "members", &col)? {
        bail!("members table is missing column {col}");
    }
    Ok(())
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_conn(prefix: &str) -> Connection {
        let p: PathBuf = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let conn = open_db(&p).expect("open db");
        conn.execute(
            "INSERT INTO projects (group_id, division) VALUES ('BIA-01', 'A')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO members (group_id, roll_no, student_name) VALUES
               ('BIA-01', '21', 'Asha Kulkarni'),
               ('BIA-01', '22', 'Ravi Menon')",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn validators_enforce_shape() {
        assert!(validate_review_number(0).is_ok());
        assert!(validate_review_number(5).is_ok());
        assert!(validate_review_number(6).is_err());
        assert!(validate_review_number(-1).is_err());

        assert!(validate_group_id("BIA-01").is_ok());
        assert!(validate_group_id("").is_err());
        assert!(validate_group_id("BIA 01").is_err());
        assert!(validate_group_id("x".repeat(21).as_str()).is_err());

        assert!(validate_roll_no("21B04").is_ok());
        assert!(validate_roll_no("21-B").is_err());

        assert!(validate_criteria_id("content_quality").is_ok());
        assert!(validate_criteria_id("q1_2").is_ok());
        assert!(validate_criteria_id("drop table").is_err());
    }

    #[test]
    fn attendance_roundtrip_skips_bad_rolls() {
        let conn = temp_conn("reviewdesk-att");
        let entries = vec![
            ("21".to_string(), true),
            ("bad roll!".to_string(), true),
            ("22".to_string(), false),
        ];
        let applied = set_attendance(&conn, 2, "BIA-01", &entries).unwrap();
        assert_eq!(applied, 1 + 1);

        let members = members_with_attendance(&conn, 2, "BIA-01").unwrap();
        let members = members.as_array().unwrap();
        assert_eq!(members[0]["rollNo"], "21");
        assert_eq!(members[0]["attendance"], true);
        assert_eq!(members[1]["attendance"], false);
        // Other reviews are untouched.
        let other = members_with_attendance(&conn, 0, "BIA-01").unwrap();
        assert_eq!(other.as_array().unwrap()[0]["attendance"], false);
    }

    #[test]
    fn marks_upsert_and_total() {
        let conn = temp_conn("reviewdesk-marks");
        let marks: Map<String, Value> = serde_json::from_value(json!({
            "21": { "presentation": 4.0, "content_quality": 3.5, "qa_response": "AB" },
        }))
        .unwrap();
        assert_eq!(save_marks(&conn, 1, "BIA-01", &marks).unwrap(), 1);

        let stored = get_marks(&conn, 1, "BIA-01").unwrap();
        let row = &stored["21"];
        assert_eq!(row["presentation"], json!(4.0));
        assert_eq!(row["qa_response"], json!("AB"));
        assert_eq!(row["total"], json!(7.5));

        // Second save overwrites in place.
        let marks: Map<String, Value> = serde_json::from_value(json!({
            "21": { "presentation": 5.0 },
        }))
        .unwrap();
        save_marks(&conn, 1, "BIA-01", &marks).unwrap();
        let stored = get_marks(&conn, 1, "BIA-01").unwrap();
        assert_eq!(stored["21"]["presentation"], json!(5.0));
        assert_eq!(stored.as_object().unwrap().len(), 1);
    }

    #[test]
    fn marks_drop_unknown_criteria_and_keep_the_rest() {
        let conn = temp_conn("reviewdesk-badcrit");
        let marks: Map<String, Value> = serde_json::from_value(json!({
            "21": { "presentation": 4.0, "no_such_column": 9.0 },
        }))
        .unwrap();
        assert_eq!(save_marks(&conn, 1, "BIA-01", &marks).unwrap(), 1);

        let stored = get_marks(&conn, 1, "BIA-01").unwrap();
        let row = stored["21"].as_object().unwrap();
        assert_eq!(row["presentation"], json!(4.0));
        assert_eq!(row["total"], json!(4.0));
        assert!(!row.contains_key("no_such_column"));

        // A key that is not even a well-formed identifier is dropped too.
        let marks: Map<String, Value> = serde_json::from_value(json!({
            "21": { "x; DROP TABLE members": 1.0 },
        }))
        .unwrap();
        assert_eq!(save_marks(&conn, 1, "BIA-01", &marks).unwrap(), 0);
        let members: i64 = conn
            .query_row("SELECT COUNT(*) FROM members", [], |r| r.get(0))
            .unwrap();
        assert_eq!(members, 2);
    }

    #[test]
    fn final_summary_collects_every_review() {
        let conn = temp_conn("reviewdesk-final");
        conn.execute(
            "UPDATE projects SET project_title = 'Demand Forecaster',
                 guide_name = 'Dr. Anil Mehta' WHERE group_id = 'BIA-01'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO panel_assignments
               (group_id, track, panel_professors, guide, evaluator1, evaluator2)
             VALUES ('BIA-01', 1, 'P1\nP2', '', 'Prof. Beena Rao', 'Dr. Chitra Iyer')",
            [],
        )
        .unwrap();
        set_attendance(&conn, 1, "BIA-01", &[("21".to_string(), true)]).unwrap();
        let marks: Map<String, Value> = serde_json::from_value(json!({
            "21": { "presentation": 4.0 },
            "22": { "content_quality": 3.0 },
        }))
        .unwrap();
        save_marks(&conn, 0, "BIA-01", &marks).unwrap();
        let marks: Map<String, Value> = serde_json::from_value(json!({
            "21": { "teamwork": 2.5 },
        }))
        .unwrap();
        save_marks(&conn, 3, "BIA-01", &marks).unwrap();

        let summary = final_summary(&conn, "BIA-01").unwrap();
        let info = &summary["groupInfo"];
        assert_eq!(info["groupId"], json!("BIA-01"));
        assert_eq!(info["projectTitle"], json!("Demand Forecaster"));
        // Panel names win where present; the empty panel guide does not
        // clobber the roster guide.
        assert_eq!(info["guideName"], json!("Dr. Anil Mehta"));
        assert_eq!(info["evaluator1Name"], json!("Prof. Beena Rao"));
        assert_eq!(info["evaluator2Name"], json!("Dr. Chitra Iyer"));

        let members = summary["members"].as_array().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0]["rollNo"], json!("21"));
        assert_eq!(members[0]["attendance"][1], json!(true));
        assert_eq!(members[0]["attendance"][0], json!(false));

        let marks = &summary["reviewMarks"];
        assert_eq!(marks["review0"]["21"], json!(4.0));
        assert_eq!(marks["review0"]["22"], json!(3.0));
        assert_eq!(marks["review3"]["21"], json!(2.5));
        assert_eq!(marks["review1"], json!({}));
        assert!(marks.as_object().unwrap().contains_key("review5"));

        assert!(final_summary(&conn, "ZZZ-99").is_err());
    }

    #[test]
    fn overall_comments_roundtrip_and_clip() {
        let conn = temp_conn("reviewdesk-overall");
        assert_eq!(get_overall_comments(&conn, "BIA-01").unwrap(), Value::Null);

        save_overall_comments(&conn, "BIA-01", "Strong delivery across reviews").unwrap();
        assert_eq!(
            get_overall_comments(&conn, "BIA-01").unwrap(),
            json!("Strong delivery across reviews")
        );

        let long = "x".repeat(3000);
        save_overall_comments(&conn, "BIA-01", &long).unwrap();
        let stored = get_overall_comments(&conn, "BIA-01").unwrap();
        assert_eq!(stored.as_str().unwrap().len(), MAX_OVERALL_COMMENTS);

        assert!(save_overall_comments(&conn, "bad id!", "x").is_err());
    }

    #[test]
    fn responses_map_dotted_codes_and_clip() {
        let conn = temp_conn("reviewdesk-resp");
        let long = "x".repeat(200);
        let answers: Map<String, Value> = serde_json::from_value(json!({
            "q1.1": "Agree",
            "q2.3": long,
            "q9.9": "dropped",
        }))
        .unwrap();
        let stored = save_responses(&conn, 0, "BIA-01", &answers, Some("fine work")).unwrap();
        assert_eq!(stored, 2);

        let resp = get_responses(&conn, 0, "BIA-01").unwrap();
        assert_eq!(resp["q1_1"], json!("Agree"));
        assert_eq!(resp["q2_3"].as_str().unwrap().len(), MAX_RESPONSE);
        assert_eq!(resp["comments"], json!("fine work"));

        assert_eq!(get_responses(&conn, 1, "BIA-01").unwrap(), Value::Null);
    }
}
