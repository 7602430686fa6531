use crate::ingest::{generate_cell_mapping, process_workbook, SheetGrid};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::normalize::CanonicalHeader;
use crate::sheets::{classify_sheets, SheetRole};
use crate::workbook::{SheetNames, WorkbookMeta, WorkbookStore};
use crate::xlsxedit::{patch_cells, CellWrite};
use calamine::{open_workbook, Reader, Xlsx};
use anyhow::anyhow;
use rusqlite::{params, Connection};
use serde_json::json;
use std::path::{Path, PathBuf};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn require_workspace(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "no workspace selected"))
}

/// Flatten the three role-bearing worksheets of the workbook at `path`.
fn load_grids(path: &Path, names: &SheetNames) -> anyhow::Result<Vec<SheetGrid>> {
    let mut wb: Xlsx<_> =
        open_workbook(path).map_err(|e| anyhow!("failed to open workbook: {e}"))?;
    let mut grids = Vec::with_capacity(3);
    for role in [SheetRole::DivA, SheetRole::DivB, SheetRole::Schedule] {
        let name = names.for_role(role);
        let range = wb
            .worksheet_range(name)
            .ok_or_else(|| anyhow!("worksheet {name:?} missing from workbook"))?
            .map_err(|e| anyhow!("failed to read worksheet {name:?}: {e}"))?;
        grids.push(SheetGrid::from_range(role, &range));
    }
    Ok(grids)
}

/// Latest stored workbook opened and flattened, or `None` when the workspace
/// has no upload yet. Shared with the cell-edit handlers.
pub(super) fn open_grids(
    store: &WorkbookStore,
) -> anyhow::Result<Option<(WorkbookMeta, PathBuf, Vec<SheetGrid>)>> {
    let Some((meta, path)) = store.latest()? else {
        return Ok(None);
    };
    let grids = load_grids(&path, &meta.sheet_names)?;
    Ok(Some((meta, path, grids)))
}

pub(super) fn grid_for<'a>(grids: &'a [SheetGrid], role: SheetRole) -> &'a SheetGrid {
    match role {
        SheetRole::DivA => &grids[0],
        SheetRole::DivB => &grids[1],
        SheetRole::Schedule => &grids[2],
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match require_workspace(state) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let path = PathBuf::from(path);
    let original_filename = req
        .params
        .get("originalFilename")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "workbook.xlsx".to_string());

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "read_failed",
                format!("cannot read {}: {e}", path.to_string_lossy()),
                None,
            )
        }
    };

    let mut wb: Xlsx<_> = match open_workbook(&path) {
        Ok(wb) => wb,
        Err(e) => return err(&req.id, "workbook_open_failed", format!("{e}"), None),
    };
    let sheet_list = wb.sheet_names().to_owned();
    let detected = classify_sheets(&sheet_list);
    if !detected.is_complete() {
        return err(
            &req.id,
            "sheet_detection_failed",
            "could not match every required sheet role",
            Some(json!({
                "missingRoles": detected.missing_roles(),
                "availableSheets": sheet_list,
                "detected": detected,
            })),
        );
    }
    let sheet_names = match SheetNames::from_detected(&detected) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "sheet_detection_failed", format!("{e}"), None),
    };
    drop(wb);

    let grids = match load_grids(&path, &sheet_names) {
        Ok(g) => g,
        Err(e) => return err(&req.id, "workbook_open_failed", format!("{e:#}"), None),
    };

    // Ingest first, store second: the workbook pointer only moves once the
    // database transaction has committed, so a failed ingestion leaves the
    // previously stored upload and the database describing the same data.
    let summary = match process_workbook(conn, &grids[0], &grids[1], &grids[2]) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "ingest_failed", format!("{e:#}"), None),
    };

    let store = WorkbookStore::new(&workspace);
    let meta = match store.store_upload(&bytes, &original_filename, sheet_names) {
        Ok(m) => m,
        Err(e) => return err(&req.id, "store_failed", format!("{e:#}"), None),
    };
    let mapping = generate_cell_mapping(&[&grids[0], &grids[1], &grids[2]]);

    ok(
        &req.id,
        json!({
            "summary": summary.to_json(),
            "workbook": meta.to_json(),
            "mapping": mapping,
        }),
    )
}

/// Re-run the full ingestion from the stored workbook, without a new upload.
fn handle_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match require_workspace(state) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };

    let store = WorkbookStore::new(&workspace);
    let (meta, _, grids) = match open_grids(&store) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "no_stored_workbook", "no workbook imported yet", None),
        Err(e) => return err(&req.id, "workbook_open_failed", format!("{e:#}"), None),
    };

    let summary = match process_workbook(conn, &grids[0], &grids[1], &grids[2]) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "ingest_failed", format!("{e:#}"), None),
    };

    ok(
        &req.id,
        json!({
            "summary": summary.to_json(),
            "workbook": meta.to_json(),
        }),
    )
}

fn handle_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match require_workspace(state) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let store = WorkbookStore::new(&workspace);
    match store.latest() {
        Ok(Some((meta, _))) => ok(&req.id, meta.to_json()),
        Ok(None) => err(&req.id, "no_stored_workbook", "no workbook imported yet", None),
        Err(e) => err(&req.id, "store_failed", format!("{e:#}"), None),
    }
}

/// Byte-for-byte copy of the stored workbook, edits included.
fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match require_workspace(state) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.outPath", None);
    };
    let store = WorkbookStore::new(&workspace);
    let (_, latest) = match store.latest() {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "no_stored_workbook", "no workbook imported yet", None),
        Err(e) => return err(&req.id, "store_failed", format!("{e:#}"), None),
    };
    match std::fs::copy(&latest, out_path) {
        Ok(bytes) => ok(&req.id, json!({ "path": out_path, "bytes": bytes })),
        Err(e) => err(&req.id, "export_failed", format!("{e}"), None),
    }
}

/// Export with current database state written back into the original layout:
/// every cell whose database value has drifted from the stored workbook gets
/// patched, everything else is untouched.
fn handle_export_formatted(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match require_workspace(state) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.outPath", None);
    };

    let store = WorkbookStore::new(&workspace);
    let (meta, latest, grids) = match open_grids(&store) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "no_stored_workbook", "no workbook imported yet", None),
        Err(e) => return err(&req.id, "workbook_open_failed", format!("{e:#}"), None),
    };

    let mut jobs: Vec<(String, Vec<CellWrite>)> = Vec::new();
    for grid in &grids {
        let updates = match collect_drift(conn, grid) {
            Ok(u) => u,
            Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
        };
        jobs.push((meta.sheet_names.for_role(grid.role).to_string(), updates));
    }
    let cells_written: usize = jobs.iter().map(|(_, u)| u.len()).sum();

    if let Err(e) = apply_patch_chain(&latest, Path::new(out_path), &jobs) {
        return err(&req.id, "export_failed", format!("{e:#}"), None);
    }

    ok(
        &req.id,
        json!({ "path": out_path, "cellsWritten": cells_written }),
    )
}

fn push_if_changed(
    updates: &mut Vec<CellWrite>,
    grid: &SheetGrid,
    row: usize,
    tag: CanonicalHeader,
    value: &str,
) {
    let Some(col) = grid.col(tag) else { return };
    if grid.cell(row, tag) != value {
        updates.push(CellWrite {
            row: row as u32,
            col: col as u32,
            value: value.to_string(),
        });
    }
}

/// Cells of one sheet whose database value no longer matches the workbook.
fn collect_drift(conn: &Connection, grid: &SheetGrid) -> anyhow::Result<Vec<CellWrite>> {
    let mut updates = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT row_idx, group_id, roll_no, track FROM row_map
         WHERE sheet_role = ?1 ORDER BY row_idx",
    )?;
    let mut rows = stmt.query([grid.role.key()])?;
    while let Some(row) = rows.next()? {
        let row_idx: i64 = row.get(0)?;
        let row_idx = row_idx as usize;
        let group_id: Option<String> = row.get(1)?;
        let roll_no: Option<String> = row.get(2)?;
        let track: Option<i64> = row.get(3)?;

        match (group_id, roll_no, track) {
            (Some(group), Some(roll), _) => {
                let member = conn
                    .query_row(
                        "SELECT roll_no, student_name, contact_details FROM members
                         WHERE group_id = ?1 AND roll_no = ?2",
                        params![group, roll],
                        |r| {
                            Ok((
                                r.get::<_, String>(0)?,
                                r.get::<_, String>(1)?,
                                r.get::<_, Option<String>>(2)?,
                            ))
                        },
                    );
                if let Ok((roll, name, contact)) = member {
                    push_if_changed(&mut updates, grid, row_idx, CanonicalHeader::RollNo, &roll);
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::StudentName,
                        &name,
                    );
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::Contact,
                        contact.as_deref().unwrap_or(""),
                    );
                }
            }
            (Some(group), None, _) => {
                let project = conn.query_row(
                    "SELECT project_domain, project_title, sponsor_company, guide_name
                     FROM projects WHERE group_id = ?1",
                    [group],
                    |r| {
                        Ok((
                            r.get::<_, Option<String>>(0)?,
                            r.get::<_, Option<String>>(1)?,
                            r.get::<_, Option<String>>(2)?,
                            r.get::<_, Option<String>>(3)?,
                        ))
                    },
                );
                if let Ok((domain, title, sponsor, guide)) = project {
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::Domain,
                        domain.as_deref().unwrap_or(""),
                    );
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::Title,
                        title.as_deref().unwrap_or(""),
                    );
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::Sponsor,
                        sponsor.as_deref().unwrap_or(""),
                    );
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::Guide,
                        guide.as_deref().unwrap_or(""),
                    );
                }
            }
            (None, None, Some(track)) => {
                let panel = conn.query_row(
                    "SELECT panel_professors, location FROM panel_assignments
                     WHERE track = ?1 LIMIT 1",
                    [track],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, Option<String>>(1)?,
                        ))
                    },
                );
                if let Ok((professors, location)) = panel {
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::PanelName,
                        &professors,
                    );
                    push_if_changed(
                        &mut updates,
                        grid,
                        row_idx,
                        CanonicalHeader::Location,
                        location.as_deref().unwrap_or(""),
                    );
                }
            }
            _ => {}
        }
    }
    Ok(updates)
}

/// Patch one sheet at a time, staging through temp files next to the output.
fn apply_patch_chain(
    latest: &Path,
    out: &Path,
    jobs: &[(String, Vec<CellWrite>)],
) -> anyhow::Result<()> {
    let mut src = latest.to_path_buf();
    let mut temps: Vec<PathBuf> = Vec::new();
    for (i, (sheet, updates)) in jobs.iter().enumerate() {
        if updates.is_empty() {
            continue;
        }
        let dst = out.with_extension(format!("stage{i}"));
        patch_cells(&src, &dst, sheet, updates)?;
        temps.push(dst.clone());
        src = dst;
    }
    std::fs::copy(&src, out)?;
    for t in temps {
        let _ = std::fs::remove_file(t);
    }
    Ok(())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workbook.import" => Some(handle_import(state, req)),
        "workbook.reload" => Some(handle_reload(state, req)),
        "workbook.info" => Some(handle_info(state, req)),
        "workbook.export" => Some(handle_export(state, req)),
        "workbook.exportFormatted" => Some(handle_export_formatted(state, req)),
        _ => None,
    }
}
