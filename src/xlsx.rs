//! Minimal OOXML spreadsheet reader.
//!
//! Reads the first worksheet of an `.xlsx` workbook into a grid of strings
//! (one `Vec<String>` per non-empty row, cells placed by their column
//! reference). Shared strings, inline strings, formula string results,
//! numbers and booleans are supported; styles, dates and formulas are not
//! interpreted. Legacy binary `.xls` files are not OOXML and fail with
//! [`SpreadsheetError::Zip`].

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 512 * 1024 * 1024;
/// Maximum cells read from the worksheet.
const MAX_CELLS: usize = 5_000_000;
/// Zero-based index of the last column a worksheet can address (`XFD`).
const MAX_COLUMN: usize = 16_383;

/// ZIP local-file-header signature; every OOXML workbook starts with it.
pub const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("not a readable OOXML workbook: {0}")]
    Zip(String),

    #[error("malformed worksheet XML: {0}")]
    Xml(String),

    #[error("workbook contains no worksheet")]
    NoWorksheet,

    #[error("ZIP entry {name} exceeds size limit ({limit} bytes)")]
    TooLarge { name: String, limit: u64 },

    #[error("worksheet has more than {limit} cells")]
    TooManyCells { limit: usize },

    #[error("failed to read spreadsheet: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `bytes` start with the ZIP signature.
pub fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

/// Read the first worksheet of an in-memory workbook.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| SpreadsheetError::Zip(e.to_string()))?;

    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet = first_worksheet_name(&archive).ok_or(SpreadsheetError::NoWorksheet)?;
    let xml = read_entry(&mut archive, &sheet)?;
    parse_sheet(&xml, &shared_strings, MAX_CELLS)
}

fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, SpreadsheetError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| SpreadsheetError::Zip(e.to_string()))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(SpreadsheetError::TooLarge {
            name: name.to_string(),
            limit: MAX_XML_ENTRY_BYTES,
        });
    }
    Ok(out)
}

fn first_worksheet_name(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

/// Each `<si>` may hold several `<t>` runs; they are concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, SpreadsheetError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    let text = te
                        .unescape()
                        .map_err(|e| SpreadsheetError::Xml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SpreadsheetError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Boolean,
    Plain,
}

struct CellState {
    /// `None` when the cell lies outside the addressable columns.
    col: Option<usize>,
    kind: CellKind,
    value: String,
}

fn cell_start(e: &BytesStart<'_>, next_col: usize) -> CellState {
    let mut col = Some(next_col).filter(|&c| c <= MAX_COLUMN);
    let mut kind = CellKind::Plain;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" if attr.value.first().is_some_and(u8::is_ascii_alphabetic) => {
                col = column_index(&attr.value);
            }
            b"t" => {
                kind = match attr.value.as_ref() {
                    b"s" => CellKind::Shared,
                    b"inlineStr" => CellKind::Inline,
                    b"b" => CellKind::Boolean,
                    _ => CellKind::Plain,
                }
            }
            _ => {}
        }
    }
    CellState {
        col,
        kind,
        value: String::new(),
    }
}

/// Zero-based column index of a cell reference such as `"AB12"`. `None`
/// without letters or past column `XFD`.
fn column_index(reference: &[u8]) -> Option<usize> {
    let mut col = 0usize;
    for &b in reference.iter().take_while(|b| b.is_ascii_alphabetic()) {
        let digit = (b.to_ascii_uppercase() - b'A' + 1) as usize;
        col = col.checked_mul(26)?.checked_add(digit)?;
        if col > MAX_COLUMN + 1 {
            return None;
        }
    }
    col.checked_sub(1)
}

fn parse_sheet(
    xml: &[u8],
    shared: &[String],
    max_cells: usize,
) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<CellState> = None;
    let mut in_value = false;
    let mut next_col = 0usize;
    let mut cells = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = Vec::new();
                    next_col = 0;
                }
                b"c" => cell = Some(cell_start(&e, next_col)),
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                if let Some(col) = cell_start(&e, next_col).col {
                    next_col = col + 1;
                }
            }
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    let text = te
                        .unescape()
                        .map_err(|e| SpreadsheetError::Xml(e.to_string()))?;
                    c.value.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        cells += 1;
                        if cells > max_cells {
                            return Err(SpreadsheetError::TooManyCells { limit: max_cells });
                        }
                        if let Some(col) = c.col {
                            next_col = col + 1;
                            place(&mut row, col, resolve(c.kind, c.value, shared));
                        }
                    }
                }
                b"row" => {
                    if row.iter().any(|v| !v.trim().is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(SpreadsheetError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn resolve(kind: CellKind, value: String, shared: &[String]) -> String {
    match kind {
        CellKind::Shared => value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        CellKind::Boolean => match value.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        CellKind::Inline | CellKind::Plain => value,
    }
}

fn place(row: &mut Vec<String>, col: usize, value: String) {
    if row.len() <= col {
        row.resize(col + 1, String::new());
    }
    row[col] = value;
}
