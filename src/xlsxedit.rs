//! Format-preserving cell writes into a stored workbook.
//!
//! The archive is rewritten entry by entry: every part except the one
//! worksheet being patched is raw-copied byte for byte, so styles, merged
//! ranges, column widths and theme data are untouched. Within the worksheet
//! part, a patched cell keeps its `r` and `s` attributes (the style
//! reference) and only its content is replaced with an inline string.

use crate::ingest::col_letter;
use anyhow::{anyhow, bail, Context};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Write as IoWrite};
use std::path::Path;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// One cell write at 0-based sheet coordinates.
#[derive(Debug, Clone)]
pub struct CellWrite {
    pub row: u32,
    pub col: u32,
    pub value: String,
}

/// Apply `updates` to the sheet named `sheet_name` (case-insensitive) of the
/// workbook at `src`, writing the patched workbook to `dst`.
pub fn patch_cells(
    src: &Path,
    dst: &Path,
    sheet_name: &str,
    updates: &[CellWrite],
) -> anyhow::Result<()> {
    let file = File::open(src)
        .with_context(|| format!("failed to open workbook {}", src.to_string_lossy()))?;
    let mut archive = ZipArchive::new(file).context("not a valid xlsx archive")?;

    let part = sheet_part_path(&mut archive, sheet_name)?;
    let sheet_xml = read_entry(&mut archive, &part)?;

    let mut pending: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
    for u in updates {
        pending
            .entry(u.row + 1)
            .or_default()
            .insert(u.col, coerce_value(&u.value));
    }
    let patched = patch_sheet_xml(&sheet_xml, &pending)?;

    let out = File::create(dst)
        .with_context(|| format!("failed to create {}", dst.to_string_lossy()))?;
    let mut writer = ZipWriter::new(out);
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.name() == part {
            let opts = FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            writer.start_file(part.clone(), opts)?;
            writer.write_all(&patched)?;
        } else {
            writer.raw_copy_file(entry)?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// `None`-ish placeholder text becomes an empty cell, matching what the
/// editing UI sends back for cleared fields.
fn coerce_value(value: &str) -> String {
    let t = value.trim();
    if t.eq_ignore_ascii_case("none") || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("nan")
    {
        return String::new();
    }
    t.to_string()
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> anyhow::Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("archive entry {name} not found"))?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// Resolve a sheet name to its worksheet part path via workbook.xml and its
/// relationships part.
fn sheet_part_path<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    sheet_name: &str,
) -> anyhow::Result<String> {
    let workbook_xml = read_entry(archive, "xl/workbook.xml")?;
    let rels_xml = read_entry(archive, "xl/_rels/workbook.xml.rels")?;

    let want = sheet_name.trim();
    let mut rid: Option<String> = None;
    let mut reader = Reader::from_str(&workbook_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut id = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"name" => name = Some(attr.unescape_value()?.into_owned()),
                        k if k == b"r:id" || k.ends_with(b":id") => {
                            id = Some(attr.unescape_value()?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(name), Some(id)) = (name, id) {
                    if name.trim().eq_ignore_ascii_case(want) {
                        rid = Some(id);
                        break;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    let rid = rid.ok_or_else(|| anyhow!("no worksheet named {sheet_name:?} in workbook"))?;

    let mut reader = Reader::from_str(&rels_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if id.as_deref() == Some(rid.as_str()) {
                    let target = target.ok_or_else(|| anyhow!("relationship {rid} has no target"))?;
                    return Ok(resolve_part_path(&target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    bail!("relationship {rid} not found in workbook rels")
}

fn resolve_part_path(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        absolute.to_string()
    } else {
        format!("xl/{target}")
    }
}

/// Stream-rewrite one worksheet part. `pending` is keyed by 1-based row
/// number, then 0-based column. Cells present in the sheet keep their
/// attributes except `t`; absent cells and rows are inserted in order.
fn patch_sheet_xml(
    xml: &str,
    pending: &BTreeMap<u32, BTreeMap<u32, String>>,
) -> anyhow::Result<Vec<u8>> {
    let mut pending = pending.clone();
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut in_sheet_data = false;
    let mut row_updates: Option<BTreeMap<u32, String>> = None;
    let mut current_row: u32 = 0;
    let mut next_row_guess: u32 = 1;
    let mut next_col_guess: u32 = 0;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) if e.local_name().as_ref() == b"sheetData" => {
                in_sheet_data = true;
                writer.write_event(event.clone())?;
            }
            Event::End(ref e) if e.local_name().as_ref() == b"sheetData" => {
                // Rows below everything the sheet already had.
                let rest = std::mem::take(&mut pending);
                for (row_num, cols) in rest {
                    write_synthetic_row(&mut writer, row_num, &cols)?;
                }
                in_sheet_data = false;
                writer.write_event(event.clone())?;
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if in_sheet_data && e.local_name().as_ref() == b"row" =>
            {
                let row_num = attr_ref_row(e)?.unwrap_or(next_row_guess);
                next_row_guess = row_num + 1;
                next_col_guess = 0;

                // Synthetic rows that sort before this one.
                let earlier: Vec<u32> = pending
                    .range(..row_num)
                    .map(|(r, _)| *r)
                    .collect();
                for r in earlier {
                    if let Some(cols) = pending.remove(&r) {
                        write_synthetic_row(&mut writer, r, &cols)?;
                    }
                }

                let updates = pending.remove(&row_num);
                match event {
                    Event::Empty(ref e) => {
                        if let Some(cols) = updates {
                            writer.write_event(Event::Start(e.clone()))?;
                            for (col, value) in &cols {
                                write_inline_cell(&mut writer, None, row_num, *col, value)?;
                            }
                            writer.write_event(Event::End(BytesEnd::new("row")))?;
                        } else {
                            writer.write_event(event.clone())?;
                        }
                    }
                    _ => {
                        current_row = row_num;
                        row_updates = updates;
                        writer.write_event(event.clone())?;
                    }
                }
            }
            Event::End(ref e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                if let Some(cols) = row_updates.take() {
                    for (col, value) in &cols {
                        write_inline_cell(&mut writer, None, current_row, *col, value)?;
                    }
                }
                writer.write_event(event.clone())?;
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if row_updates.is_some() && e.local_name().as_ref() == b"c" =>
            {
                let col = attr_ref_col(e)?.unwrap_or(next_col_guess);
                next_col_guess = col + 1;

                let mut replaced = None;
                if let Some(updates) = row_updates.as_mut() {
                    // Synthetic cells that sort before this one.
                    let earlier: Vec<u32> = updates.range(..col).map(|(c, _)| *c).collect();
                    for c in earlier {
                        if let Some(value) = updates.remove(&c) {
                            write_inline_cell(&mut writer, None, current_row, c, &value)?;
                        }
                    }
                    replaced = updates.remove(&col);
                }

                if let Some(value) = replaced {
                    write_inline_cell(&mut writer, Some(e), current_row, col, &value)?;
                    if matches!(event, Event::Start(_)) {
                        // Drop the original cell content.
                        reader.read_to_end(e.name())?;
                    }
                } else {
                    writer.write_event(event.clone())?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner().into_inner())
}

fn write_synthetic_row<W: IoWrite>(
    writer: &mut Writer<W>,
    row_num: u32,
    cols: &BTreeMap<u32, String>,
) -> anyhow::Result<()> {
    let mut row = BytesStart::new("row");
    row.push_attribute(("r", row_num.to_string().as_str()));
    writer.write_event(Event::Start(row))?;
    for (col, value) in cols {
        write_inline_cell(writer, None, row_num, *col, value)?;
    }
    writer.write_event(Event::End(BytesEnd::new("row")))?;
    Ok(())
}

/// Emit `<c r=".." s=".." t="inlineStr"><is><t>value</t></is></c>`. When
/// `original` is given, all its attributes except `t` carry over, which is
/// what preserves the cell's style reference.
fn write_inline_cell<W: IoWrite>(
    writer: &mut Writer<W>,
    original: Option<&BytesStart>,
    row_num: u32,
    col: u32,
    value: &str,
) -> anyhow::Result<()> {
    let mut cell = BytesStart::new("c");
    match original {
        Some(orig) => {
            for attr in orig.attributes() {
                let attr = attr?;
                if attr.key.as_ref() != b"t" {
                    cell.push_attribute(attr);
                }
            }
        }
        None => {
            let cell_ref = format!("{}{}", col_letter(col as usize), row_num);
            cell.push_attribute(("r", cell_ref.as_str()));
        }
    }
    cell.push_attribute(("t", "inlineStr"));
    writer.write_event(Event::Start(cell))?;
    writer.write_event(Event::Start(BytesStart::new("is")))?;
    let mut t = BytesStart::new("t");
    t.push_attribute(("xml:space", "preserve"));
    writer.write_event(Event::Start(t))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new("t")))?;
    writer.write_event(Event::End(BytesEnd::new("is")))?;
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

/// Parse the `r` attribute of a `<row>` element (1-based row number).
fn attr_ref_row(e: &BytesStart) -> anyhow::Result<Option<u32>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            let text = attr.unescape_value()?;
            return Ok(text.parse().ok());
        }
    }
    Ok(None)
}

/// Parse the `r` attribute of a `<c>` element into a 0-based column index.
fn attr_ref_col(e: &BytesStart) -> anyhow::Result<Option<u32>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            let text = attr.unescape_value()?;
            let mut col: u32 = 0;
            let mut seen = false;
            for ch in text.chars() {
                if ch.is_ascii_alphabetic() {
                    seen = true;
                    col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
                } else {
                    break;
                }
            }
            return Ok(if seen { Some(col - 1) } else { None });
        }
    }
    Ok(None)
}
