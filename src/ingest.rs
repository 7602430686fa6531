use crate::groups::extract_group_ids;
use crate::normalize::{normalize_header, normalize_person_name, CanonicalHeader};
use crate::sheets::SheetRole;
use calamine::{DataType, Range};
use log::warn;
use rusqlite::{params, Connection};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};

/// How many leading rows to scan for the header row. Real uploads bury it
/// under two to four banner/title rows.
const HEADER_SCAN_ROWS: usize = 15;

const MAX_DOMAIN: usize = 255;
const MAX_TITLE: usize = 500;
const MAX_SPONSOR: usize = 255;
const MAX_NAME: usize = 100;

/// A worksheet flattened to strings at absolute (0-based) sheet coordinates,
/// with the header row located and its columns mapped to the canonical
/// vocabulary.
pub struct SheetGrid {
    pub role: SheetRole,
    pub rows: Vec<Vec<String>>,
    pub header_row: Option<usize>,
    pub columns: HashMap<CanonicalHeader, usize>,
}

impl SheetGrid {
    pub fn from_range(role: SheetRole, range: &Range<DataType>) -> SheetGrid {
        let (row0, col0) = range.start().unwrap_or((0, 0));
        let mut rows: Vec<Vec<String>> = vec![Vec::new(); row0 as usize];
        for raw_row in range.rows() {
            let mut row: Vec<String> = vec![String::new(); col0 as usize];
            row.extend(raw_row.iter().map(cell_to_string));
            rows.push(row);
        }
        SheetGrid::from_rows(role, rows)
    }

    pub fn from_rows(role: SheetRole, rows: Vec<Vec<String>>) -> SheetGrid {
        let mut grid = SheetGrid {
            role,
            rows,
            header_row: None,
            columns: HashMap::new(),
        };
        grid.detect_header();
        grid
    }

    /// The header row is the first row (within the scan window) carrying at
    /// least two recognized canonical headers.
    fn detect_header(&mut self) {
        for (idx, row) in self.rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
            let mut found: HashMap<CanonicalHeader, usize> = HashMap::new();
            for (col, cell) in row.iter().enumerate() {
                if cell.trim().is_empty() {
                    continue;
                }
                if let Some(tag) = normalize_header(cell) {
                    found.entry(tag).or_insert(col);
                }
            }
            if found.len() >= 2 {
                self.header_row = Some(idx);
                self.columns = found;
                return;
            }
        }
    }

    /// Absolute indices of the rows below the header. Empty when no header
    /// row was found.
    pub fn data_rows(&self) -> std::ops::Range<usize> {
        match self.header_row {
            Some(h) => (h + 1)..self.rows.len(),
            None => 0..0,
        }
    }

    pub fn col(&self, tag: CanonicalHeader) -> Option<usize> {
        self.columns.get(&tag).copied()
    }

    pub fn cell(&self, row: usize, tag: CanonicalHeader) -> &str {
        match self.col(tag) {
            Some(col) => self
                .rows
                .get(row)
                .and_then(|r| r.get(col))
                .map(String::as_str)
                .unwrap_or(""),
            None => "",
        }
    }

    fn row_cells(&self, row: usize) -> &[String] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Roster sheets label the group column "Group No."; some uploads reuse
    /// the schedule wording. Either works as the group-header column.
    fn group_col(&self) -> Option<usize> {
        self.col(CanonicalHeader::GroupNo)
            .or_else(|| self.col(CanonicalHeader::GroupId))
    }

    fn group_cell(&self, row: usize) -> &str {
        match self.group_col() {
            Some(col) => self
                .rows
                .get(row)
                .and_then(|r| r.get(col))
                .map(String::as_str)
                .unwrap_or(""),
            None => "",
        }
    }
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Float(f) => {
            // Roll numbers and tracks come back as floats; keep them integral.
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        DataType::Int(i) => i.to_string(),
        DataType::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn clip(s: &str, max: usize) -> String {
    s.trim().chars().take(max).collect()
}

fn parse_track(text: &str) -> Option<i64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(n) = t.parse::<i64>() {
        return Some(n);
    }
    match t.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

/// 0-based column index to spreadsheet letters (0 -> A, 26 -> AA).
pub fn col_letter(mut col: usize) -> String {
    let mut out = String::new();
    loop {
        out.insert(0, (b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DivisionCounts {
    pub groups: usize,
    pub members: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    pub div_a: DivisionCounts,
    pub div_b: DivisionCounts,
    pub scheduled_groups: usize,
}

impl IngestSummary {
    pub fn to_json(self) -> Value {
        json!({
            "divAGroups": self.div_a.groups,
            "divAMembers": self.div_a.members,
            "divBGroups": self.div_b.groups,
            "divBMembers": self.div_b.members,
            "scheduledGroups": self.scheduled_groups,
            "totalGroups": self.div_a.groups + self.div_b.groups,
        })
    }
}

/// Walk one division roster. Carry-forward: a row without its own group
/// header belongs to the most recently seen group above it; member rows seen
/// before any group header are dropped.
pub fn ingest_division(
    conn: &Connection,
    grid: &SheetGrid,
    division: &str,
) -> anyhow::Result<DivisionCounts> {
    let mut current_group: Option<String> = None;
    let mut groups_seen: Vec<String> = Vec::new();
    let mut members = 0usize;

    for row in grid.data_rows() {
        if let Err(e) = ingest_roster_row(
            conn,
            grid,
            division,
            row,
            &mut current_group,
            &mut groups_seen,
            &mut members,
        ) {
            warn!("division {division} row {row}: {e:#}");
        }
    }

    Ok(DivisionCounts {
        groups: groups_seen.len(),
        members,
    })
}

fn ingest_roster_row(
    conn: &Connection,
    grid: &SheetGrid,
    division: &str,
    row: usize,
    current_group: &mut Option<String>,
    groups_seen: &mut Vec<String>,
    members: &mut usize,
) -> anyhow::Result<()> {
    let group_cell = grid.group_cell(row);

    if !group_cell.trim().is_empty() {
        let canonical = extract_group_ids([group_cell])
            .into_iter()
            .next()
            .unwrap_or_else(|| group_cell.trim().to_string());

        conn.execute(
            "INSERT OR IGNORE INTO projects
               (group_id, division, project_domain, project_title, sponsor_company,
                guide_name, mentor_name, mentor_email, mentor_mobile,
                evaluator1_name, evaluator2_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', '', '', '', '')",
            params![
                canonical,
                division,
                clip(grid.cell(row, CanonicalHeader::Domain), MAX_DOMAIN),
                clip(grid.cell(row, CanonicalHeader::Title), MAX_TITLE),
                clip(grid.cell(row, CanonicalHeader::Sponsor), MAX_SPONSOR),
                clip(grid.cell(row, CanonicalHeader::Guide), MAX_NAME),
            ],
        )?;
        if !groups_seen.contains(&canonical) {
            groups_seen.push(canonical.clone());
        }

        conn.execute(
            "INSERT OR REPLACE INTO row_map (sheet_role, row_idx, group_id, roll_no, track)
             VALUES (?1, ?2, ?3, NULL, NULL)",
            params![grid.role.key(), row as i64, canonical],
        )?;
        *current_group = Some(canonical);
    }

    let roll = grid.cell(row, CanonicalHeader::RollNo).trim().to_string();
    let name = grid.cell(row, CanonicalHeader::StudentName).trim();
    if roll.is_empty() || name.is_empty() {
        return Ok(());
    }
    let Some(group_id) = current_group.as_deref() else {
        // Member row before any group header: dropped, never re-attached.
        warn!(
            "division {division} row {row}: member {roll} precedes any group header, dropped"
        );
        return Ok(());
    };

    conn.execute(
        "INSERT OR IGNORE INTO members (group_id, roll_no, student_name, contact_details)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            group_id,
            roll,
            clip(name, MAX_NAME),
            grid.cell(row, CanonicalHeader::Contact).trim(),
        ],
    )?;
    *members += 1;

    // A member row supersedes a bare group-header mapping for edit targeting.
    conn.execute(
        "INSERT OR REPLACE INTO row_map (sheet_role, row_idx, group_id, roll_no, track)
         VALUES (?1, ?2, ?3, ?4, NULL)",
        params![grid.role.key(), row as i64, group_id, roll],
    )?;

    Ok(())
}

/// Walk the schedule sheet: per track row, collect panel names and referenced
/// groups, then assign each group two evaluators that are not its own guide.
pub fn reconcile_schedule(conn: &Connection, grid: &SheetGrid) -> anyhow::Result<usize> {
    let mut scheduled: BTreeSet<String> = BTreeSet::new();

    for row in grid.data_rows() {
        if let Err(e) = reconcile_schedule_row(conn, grid, row, &mut scheduled) {
            warn!("schedule row {row}: {e:#}");
        }
    }

    Ok(scheduled.len())
}

fn reconcile_schedule_row(
    conn: &Connection,
    grid: &SheetGrid,
    row: usize,
    scheduled: &mut BTreeSet<String>,
) -> anyhow::Result<()> {
    let Some(track) = parse_track(grid.cell(row, CanonicalHeader::Track)) else {
        return Ok(());
    };

    let panel_names = parse_panel_names(grid.cell(row, CanonicalHeader::PanelName), track);

    let location_cell = grid.cell(row, CanonicalHeader::Location).trim().to_string();
    let location = if location_cell.is_empty() {
        format!("Room {track}")
    } else {
        location_cell
    };

    conn.execute(
        "INSERT OR REPLACE INTO row_map (sheet_role, row_idx, group_id, roll_no, track)
         VALUES (?1, ?2, NULL, NULL, ?3)",
        params![grid.role.key(), row as i64, track],
    )?;

    let group_ids = extract_group_ids(grid.row_cells(row));
    if group_ids.is_empty() {
        return Ok(());
    }

    let panel_text = panel_names.join("\n");
    for group_id in &group_ids {
        let guide: String = conn
            .query_row(
                "SELECT guide_name FROM projects WHERE group_id = ?1",
                [group_id],
                |r| r.get::<_, Option<String>>(0),
            )
            .unwrap_or(None)
            .unwrap_or_default();
        let guide_key = normalize_person_name(&guide);

        let available: Vec<&String> = panel_names
            .iter()
            .filter(|p| normalize_person_name(p) != guide_key)
            .collect();
        let eval1 = available
            .first()
            .map(|s| s.as_str())
            .unwrap_or("Default Eval 1");
        let eval2 = available
            .get(1)
            .map(|s| s.as_str())
            .unwrap_or("Default Eval 2");

        conn.execute(
            "INSERT INTO panel_assignments
               (group_id, track, panel_professors, location, guide, evaluator1, evaluator2)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(group_id) DO UPDATE SET
               track = excluded.track,
               panel_professors = excluded.panel_professors,
               location = excluded.location,
               guide = excluded.guide,
               evaluator1 = excluded.evaluator1,
               evaluator2 = excluded.evaluator2",
            params![group_id, track, panel_text, location, guide, eval1, eval2],
        )?;
        conn.execute(
            "UPDATE projects SET evaluator1_name = ?1, evaluator2_name = ?2 WHERE group_id = ?3",
            params![eval1, eval2, group_id],
        )?;
        scheduled.insert(group_id.clone());
    }

    Ok(())
}

/// Split the free-text panel cell on newlines/commas/pipes; tokens of three
/// characters or fewer, or purely numeric ones, are noise.
fn parse_panel_names(panel_text: &str, track: i64) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for token in panel_text.split(['\n', ',', '|']) {
        let clean = token.trim();
        if clean.chars().count() > 3 && !clean.chars().all(|c| c.is_ascii_digit()) {
            names.push(clean.to_string());
        }
    }
    if names.is_empty() {
        names = (1..=3)
            .map(|i| format!("Default Panel {track} Prof {i}"))
            .collect();
    }
    names
}

/// Destructive full rebuild for one upload event, inside a single
/// transaction: a mid-run failure rolls everything back to the previous
/// snapshot instead of leaving partial state.
pub fn process_workbook(
    conn: &mut Connection,
    div_a: &SheetGrid,
    div_b: &SheetGrid,
    schedule: &SheetGrid,
) -> anyhow::Result<IngestSummary> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM panel_assignments", [])?;
    tx.execute("DELETE FROM members", [])?;
    tx.execute("DELETE FROM projects", [])?;
    tx.execute("DELETE FROM row_map", [])?;

    let a = ingest_division(&tx, div_a, "A")?;
    let b = ingest_division(&tx, div_b, "B")?;
    let scheduled_groups = reconcile_schedule(&tx, schedule)?;

    tx.commit()?;

    Ok(IngestSummary {
        div_a: a,
        div_b: b,
        scheduled_groups,
    })
}

/// Per-sheet mapping for a visual editor: where the header row sits, which
/// canonical column lives at which letter, and for each data row the sheet
/// cell backing each editable field.
pub fn generate_cell_mapping(grids: &[&SheetGrid]) -> Value {
    let mut mapping = Map::new();
    for grid in grids {
        let rows = match grid.role {
            SheetRole::Schedule => schedule_mapping(grid),
            _ => roster_mapping(grid),
        };
        let mut headers = Map::new();
        for (tag, col) in &grid.columns {
            headers.insert(col_letter(*col), Value::String(tag.label().to_string()));
        }
        mapping.insert(
            grid.role.key().to_string(),
            json!({
                "headerRow": grid.header_row,
                "headers": headers,
                "rows": rows,
            }),
        );
    }
    Value::Object(mapping)
}

fn field_entry(grid: &SheetGrid, row: usize, tag: CanonicalHeader) -> Option<(String, Value)> {
    let col = grid.col(tag)?;
    Some((
        col_letter(col),
        Value::String(grid.cell(row, tag).to_string()),
    ))
}

fn push_field(obj: &mut Map<String, Value>, key: &str, entry: Option<(String, Value)>) {
    if let Some((col, value)) = entry {
        obj.insert(key.to_string(), json!({ "col": col, "value": value }));
    }
}

fn roster_mapping(grid: &SheetGrid) -> Map<String, Value> {
    let mut rows = Map::new();
    for row in grid.data_rows() {
        if grid.cell(row, CanonicalHeader::RollNo).trim().is_empty() {
            continue;
        }
        let mut fields = Map::new();
        push_field(
            &mut fields,
            "rollNo",
            field_entry(grid, row, CanonicalHeader::RollNo),
        );
        push_field(
            &mut fields,
            "studentName",
            field_entry(grid, row, CanonicalHeader::StudentName),
        );
        push_field(
            &mut fields,
            "contactDetails",
            field_entry(grid, row, CanonicalHeader::Contact),
        );
        rows.insert(row.to_string(), Value::Object(fields));
    }
    rows
}

fn schedule_mapping(grid: &SheetGrid) -> Map<String, Value> {
    let mut rows = Map::new();
    for row in grid.data_rows() {
        if parse_track(grid.cell(row, CanonicalHeader::Track)).is_none() {
            continue;
        }
        let mut fields = Map::new();
        push_field(
            &mut fields,
            "track",
            field_entry(grid, row, CanonicalHeader::Track),
        );
        push_field(
            &mut fields,
            "panelProfessors",
            field_entry(grid, row, CanonicalHeader::PanelName),
        );
        push_field(
            &mut fields,
            "groupIds",
            field_entry(grid, row, CanonicalHeader::GroupId),
        );
        push_field(
            &mut fields,
            "location",
            field_entry(grid, row, CanonicalHeader::Location),
        );
        rows.insert(row.to_string(), Value::Object(fields));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rowvec(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn roster_grid() -> SheetGrid {
        SheetGrid::from_rows(
            SheetRole::DivA,
            vec![
                rowvec(&["Project Review Roster 2026"]),
                rowvec(&[]),
                rowvec(&[]),
                rowvec(&[
                    "Group No.",
                    "Roll No.",
                    "Name of the group member",
                    "Contact details",
                    "Project Domain",
                    "Title of the Project",
                    "Name of the sponsored company",
                    "Name of the Guide",
                ]),
                rowvec(&["BIA1", "21", "Asha K", "98x", "ML", "Forecaster", "Acme", "Dr. Mehta"]),
                rowvec(&["", "22", "Ravi M", "97x", "", "", "", ""]),
            ],
        )
    }

    #[test]
    fn header_row_is_detected_below_banner_rows() {
        let grid = roster_grid();
        assert_eq!(grid.header_row, Some(3));
        assert_eq!(grid.col(CanonicalHeader::GroupNo), Some(0));
        assert_eq!(grid.col(CanonicalHeader::Guide), Some(7));
        assert_eq!(grid.data_rows(), 4..6);
        assert_eq!(grid.cell(4, CanonicalHeader::StudentName), "Asha K");
    }

    #[test]
    fn grid_without_header_yields_no_data_rows() {
        let grid = SheetGrid::from_rows(
            SheetRole::DivA,
            vec![rowvec(&["just", "noise"]), rowvec(&["more", "noise"])],
        );
        assert_eq!(grid.header_row, None);
        assert_eq!(grid.data_rows().len(), 0);
    }

    #[test]
    fn column_letters() {
        assert_eq!(col_letter(0), "A");
        assert_eq!(col_letter(3), "D");
        assert_eq!(col_letter(25), "Z");
        assert_eq!(col_letter(26), "AA");
        assert_eq!(col_letter(27), "AB");
    }

    #[test]
    fn panel_names_drop_short_and_numeric_tokens() {
        let names = parse_panel_names("Dr. Anil Mehta\nProf. Beena Rao\n, 42, ab", 3);
        assert_eq!(names, vec!["Dr. Anil Mehta", "Prof. Beena Rao"]);

        let fallback = parse_panel_names("  ", 3);
        assert_eq!(
            fallback,
            vec![
                "Default Panel 3 Prof 1",
                "Default Panel 3 Prof 2",
                "Default Panel 3 Prof 3"
            ]
        );
    }

    #[test]
    fn track_parsing_accepts_integral_floats() {
        assert_eq!(parse_track("3"), Some(3));
        assert_eq!(parse_track("3.0"), Some(3));
        assert_eq!(parse_track(" "), None);
        assert_eq!(parse_track("Track"), None);
        assert_eq!(parse_track("3.5"), None);
    }

    #[test]
    fn cell_mapping_uses_detected_columns() {
        let grid = roster_grid();
        let mapping = generate_cell_mapping(&[&grid]);
        let sheet = mapping.get("div_a").unwrap();
        assert_eq!(sheet.get("headerRow").unwrap(), &json!(3));
        assert_eq!(
            sheet.get("headers").unwrap().get("A").unwrap(),
            &json!("Group No.")
        );
        let rows = sheet.get("rows").and_then(|v| v.as_object()).unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows.get("4").and_then(|v| v.as_object()).unwrap();
        assert_eq!(
            first.get("rollNo").unwrap(),
            &json!({ "col": "B", "value": "21" })
        );
        assert_eq!(
            first.get("studentName").unwrap().get("col").unwrap(),
            &json!("C")
        );
    }
}
