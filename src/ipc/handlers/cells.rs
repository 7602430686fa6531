use super::workbook::{grid_for, open_grids};
use crate::db::REVIEW_COUNT;
use crate::ingest::{generate_cell_mapping, SheetGrid};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::normalize::CanonicalHeader;
use crate::sheets::SheetRole;
use crate::workbook::WorkbookStore;
use crate::xlsxedit::{patch_cells, CellWrite};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

fn param_str(params: &serde_json::Value, key: &str) -> Option<String> {
    match params.get(key) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(serde_json::Value::Null) => Some(String::new()),
        _ => None,
    }
}

/// Identity of the row being edited, resolved through the persisted row map
/// instead of counting rows positionally.
struct RowIdentity {
    group_id: Option<String>,
    roll_no: Option<String>,
    track: Option<i64>,
}

fn row_identity(
    conn: &Connection,
    role: SheetRole,
    row: usize,
) -> anyhow::Result<Option<RowIdentity>> {
    conn.query_row(
        "SELECT group_id, roll_no, track FROM row_map
         WHERE sheet_role = ?1 AND row_idx = ?2",
        params![role.key(), row as i64],
        |r| {
            Ok(RowIdentity {
                group_id: r.get(0)?,
                roll_no: r.get(1)?,
                track: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Propagate one cell edit into the relational tables. Returns the synced
/// field name, or `None` when the column has no relational counterpart.
fn sync_to_db(
    conn: &Connection,
    role: SheetRole,
    grid: &SheetGrid,
    row: usize,
    col: usize,
    value: &str,
) -> anyhow::Result<Option<&'static str>> {
    let tag = grid
        .columns
        .iter()
        .find(|(_, c)| **c == col)
        .map(|(t, _)| *t);
    let Some(tag) = tag else {
        return Ok(None);
    };
    let Some(identity) = row_identity(conn, role, row)? else {
        return Ok(None);
    };

    match (role, &identity.group_id, &identity.roll_no, identity.track) {
        (SheetRole::DivA | SheetRole::DivB, Some(group), Some(roll), _) => match tag {
            CanonicalHeader::RollNo => {
                conn.execute(
                    "UPDATE members SET roll_no = ?1 WHERE group_id = ?2 AND roll_no = ?3",
                    params![value, group, roll],
                )?;
                conn.execute(
                    "UPDATE row_map SET roll_no = ?1
                     WHERE sheet_role = ?2 AND row_idx = ?3",
                    params![value, role.key(), row as i64],
                )?;
                // Marks already recorded under the old roll number follow it.
                for review in 0..REVIEW_COUNT {
                    conn.execute(
                        &format!(
                            "UPDATE review{review}_marks SET roll_no = ?1
                             WHERE group_id = ?2 AND roll_no = ?3"
                        ),
                        params![value, group, roll],
                    )?;
                }
                Ok(Some("roll_no"))
            }
            CanonicalHeader::StudentName => {
                conn.execute(
                    "UPDATE members SET student_name = ?1
                     WHERE group_id = ?2 AND roll_no = ?3",
                    params![value, group, roll],
                )?;
                Ok(Some("student_name"))
            }
            CanonicalHeader::Contact => {
                conn.execute(
                    "UPDATE members SET contact_details = ?1
                     WHERE group_id = ?2 AND roll_no = ?3",
                    params![value, group, roll],
                )?;
                Ok(Some("contact_details"))
            }
            _ => Ok(None),
        },
        (SheetRole::DivA | SheetRole::DivB, Some(group), None, _) => {
            let column = match tag {
                CanonicalHeader::Domain => "project_domain",
                CanonicalHeader::Title => "project_title",
                CanonicalHeader::Sponsor => "sponsor_company",
                CanonicalHeader::Guide => "guide_name",
                _ => return Ok(None),
            };
            conn.execute(
                &format!("UPDATE projects SET {column} = ?1 WHERE group_id = ?2"),
                params![value, group],
            )?;
            Ok(Some(column))
        }
        (SheetRole::Schedule, _, _, Some(track)) => {
            let column = match tag {
                CanonicalHeader::PanelName => "panel_professors",
                CanonicalHeader::Location => "location",
                // Group membership of a track changes at the next rebuild;
                // the edit still lands in the audit log and the workbook.
                _ => return Ok(None),
            };
            conn.execute(
                &format!("UPDATE panel_assignments SET {column} = ?1 WHERE track = ?2"),
                params![value, track],
            )?;
            Ok(Some(column))
        }
        _ => Ok(None),
    }
}

fn handle_cell_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };

    let Some(role) = req
        .params
        .get("sheetRole")
        .and_then(|v| v.as_str())
        .and_then(SheetRole::from_key)
    else {
        return err(&req.id, "bad_params", "missing or unknown params.sheetRole", None);
    };
    let (Some(row), Some(col)) = (
        req.params.get("row").and_then(|v| v.as_u64()),
        req.params.get("col").and_then(|v| v.as_u64()),
    ) else {
        return err(&req.id, "bad_params", "missing params.row/params.col", None);
    };
    let Some(value) = param_str(&req.params, "value") else {
        return err(&req.id, "bad_params", "missing params.value", None);
    };

    let store = WorkbookStore::new(&workspace);
    let (meta, latest_path, grids) = match open_grids(&store) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "no_stored_workbook", "no workbook imported yet", None),
        Err(e) => return err(&req.id, "workbook_open_failed", format!("{e:#}"), None),
    };
    let grid = grid_for(&grids, role);

    let old_value = param_str(&req.params, "oldValue").unwrap_or_else(|| {
        grid.rows
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .cloned()
            .unwrap_or_default()
    });

    // Audit first; the edit survives even if the sync or patch below fails.
    if let Err(e) = conn.execute(
        "INSERT OR REPLACE INTO cell_updates
           (sheet_role, row_num, col_num, old_value, new_value, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            role.key(),
            row as i64,
            col as i64,
            old_value,
            value,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    ) {
        return err(&req.id, "db_query_failed", format!("{e}"), None);
    }

    let synced = match sync_to_db(conn, role, grid, row as usize, col as usize, &value) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };

    // Workbook patch is best-effort: a corrupt archive must not lose the
    // database-side edit.
    let mut patched = false;
    let mut version = meta.latest.clone();
    match store.begin_edit() {
        Ok((meta, id, new_path)) => {
            let update = CellWrite {
                row: row as u32,
                col: col as u32,
                value: value.clone(),
            };
            let sheet = meta.sheet_names.for_role(role).to_string();
            match patch_cells(&latest_path, &new_path, &sheet, &[update]) {
                Ok(()) => match store.commit_version(meta, id) {
                    Ok(meta) => {
                        patched = true;
                        version = meta.latest;
                    }
                    Err(e) => warn!("could not commit patched workbook: {e:#}"),
                },
                Err(e) => {
                    warn!("could not patch workbook cell: {e:#}");
                    store.discard_version(&id);
                }
            }
        }
        Err(e) => warn!("could not start workbook edit: {e:#}"),
    }

    ok(
        &req.id,
        json!({
            "updated": true,
            "synced": synced,
            "workbookPatched": patched,
            "version": version,
        }),
    )
}

fn handle_mapping_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };
    let store = WorkbookStore::new(&workspace);
    let (meta, _, grids) = match open_grids(&store) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "no_stored_workbook", "no workbook imported yet", None),
        Err(e) => return err(&req.id, "workbook_open_failed", format!("{e:#}"), None),
    };
    let mapping = generate_cell_mapping(&[&grids[0], &grids[1], &grids[2]]);
    ok(
        &req.id,
        json!({
            "mapping": mapping,
            "workbook": meta.to_json(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cell.update" => Some(handle_cell_update(state, req)),
        "mapping.get" => Some(handle_mapping_get(state, req)),
        _ => None,
    }
}
