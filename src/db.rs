use rusqlite::Connection;
use std::path::Path;

pub const REVIEW_COUNT: u8 = 6; // reviews 0..=5

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("reviewdesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            group_id TEXT PRIMARY KEY,
            division TEXT NOT NULL,
            project_domain TEXT,
            project_title TEXT,
            sponsor_company TEXT,
            guide_name TEXT,
            mentor_name TEXT,
            mentor_email TEXT,
            mentor_mobile TEXT,
            evaluator1_name TEXT,
            evaluator2_name TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_division ON projects(division)",
        [],
    )?;

    // Per-review attendance lives as columns on members, matching the
    // review{n}_attendance naming the review handlers interpolate (after
    // whitelist validation).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS members(
            group_id TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            student_name TEXT NOT NULL,
            contact_details TEXT,
            PRIMARY KEY(group_id, roll_no)
        )",
        [],
    )?;
    ensure_member_attendance_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_members_group ON members(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS panel_assignments(
            group_id TEXT PRIMARY KEY,
            track INTEGER NOT NULL,
            panel_professors TEXT NOT NULL,
            location TEXT,
            guide TEXT,
            evaluator1 TEXT,
            evaluator2 TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_panel_assignments_track ON panel_assignments(track)",
        [],
    )?;

    // Audit/edit log: one row per cell position, last write wins.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cell_updates(
            sheet_role TEXT NOT NULL,
            row_num INTEGER NOT NULL,
            col_num INTEGER NOT NULL,
            old_value TEXT,
            new_value TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(sheet_role, row_num, col_num)
        )",
        [],
    )?;

    // Stable row identity assigned at ingestion time; rebuilt on every full
    // ingestion. Cell edits resolve their target through this instead of
    // positional row counting.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS row_map(
            sheet_role TEXT NOT NULL,
            row_idx INTEGER NOT NULL,
            group_id TEXT,
            roll_no TEXT,
            track INTEGER,
            PRIMARY KEY(sheet_role, row_idx)
        )",
        [],
    )?;

    // Cross-review wrap-up: one free-text remark per group, shown alongside
    // the per-review totals in the final summary.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS final_sheet(
            group_id TEXT PRIMARY KEY,
            overall_comments TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    for review in 0..REVIEW_COUNT {
        create_review_tables(&conn, review)?;
    }

    Ok(conn)
}

fn create_review_tables(conn: &Connection, review: u8) -> anyhow::Result<()> {
    // Table names come from a compile-time loop bound here; the reviews
    // module re-validates anything caller-supplied before interpolating.
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS review{review}_marks(
                group_id TEXT NOT NULL,
                roll_no TEXT NOT NULL,
                presentation REAL NOT NULL DEFAULT 0,
                content_quality REAL NOT NULL DEFAULT 0,
                qa_response REAL NOT NULL DEFAULT 0,
                teamwork REAL NOT NULL DEFAULT 0,
                total REAL,
                updated_at TEXT,
                PRIMARY KEY(group_id, roll_no)
            )"
        ),
        [],
    )?;
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS review{review}_group_responses(
                group_id TEXT PRIMARY KEY,
                submission_date TEXT,
                comments TEXT,
                q1_1 TEXT,
                q1_2 TEXT,
                q1_3 TEXT,
                q2_1 TEXT,
                q2_2 TEXT,
                q2_3 TEXT,
                updated_at TEXT
            )"
        ),
        [],
    )?;
    Ok(())
}

fn ensure_member_attendance_columns(conn: &Connection) -> anyhow::Result<()> {
    for review in 0..REVIEW_COUNT {
        let col = format!("review{review}_attendance");
        if !table_has_column(conn, "members", &col)? {
            conn.execute(
                &format!("ALTER TABLE members ADD COLUMN {col} INTEGER NOT NULL DEFAULT 0"),
                [],
            )?;
        }
    }
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
