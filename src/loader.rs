//! Record normalizer: turns a raw resume export into canonical records.
//!
//! # Reading
//!
//! Spreadsheets (`.xlsx`/`.xls` extension or ZIP magic bytes) go straight to
//! [`crate::xlsx`]. Everything else is treated as delimited text and tried
//! with every encoding in [`ENCODINGS`] and, within each encoding, every
//! strategy in [`DELIMITERS`]; the first combination that parses wins. Rows
//! with more fields than the header are skipped and counted. If nothing
//! parses, the spreadsheet reader is tried once more before giving up with
//! [`LoadError::Unparseable`].
//!
//! # Normalization
//!
//! Header names are trimmed and lowercased, then resolved through a fixed
//! alias table. A row becomes a [`CanonicalRecord`] iff it has a non-empty
//! id and non-empty text, where text is the trimmed plain-text column or,
//! when that is blank, the text derived from the HTML column. Input order is
//! preserved and duplicate ids are passed through.

use std::borrow::Cow;
use std::path::Path;

use tracing::{debug, info, warn};

use resume_search_core::error::{LoadError, SchemaError};
use resume_search_core::models::{CanonicalRecord, IngestionStats};

use crate::html::html_to_text;
use crate::xlsx;

/// Text encodings tried, in order.
pub const ENCODINGS: [TextEncoding; 4] = [
    TextEncoding::Utf8Sig,
    TextEncoding::Utf8,
    TextEncoding::Windows1252,
    TextEncoding::Latin1,
];

/// Delimiter strategies tried, in order, within each encoding.
pub const DELIMITERS: [Delimiter; 5] = [
    Delimiter::Sniff,
    Delimiter::Fixed(b','),
    Delimiter::Fixed(b';'),
    Delimiter::Fixed(b'\t'),
    Delimiter::Fixed(b'|'),
];

const ID_ALIASES: &[&str] = &["id", "candidate_id", "candidateid"];
const HTML_ALIASES: &[&str] = &["resume_html", "resume html", "resumehtml", "html"];
const TEXT_ALIASES: &[&str] = &["resume_str", "resume str", "resumestr", "text"];
const CATEGORY_ALIASES: &[&str] = &["category", "profession", "role", "dept"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 with a leading byte-order mark, which is stripped.
    Utf8Sig,
    Utf8,
    Windows1252,
    Latin1,
}

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Sig => "utf-8-sig",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// Strict decode; any invalid sequence is an error.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, String> {
        match self {
            TextEncoding::Utf8Sig => {
                let body = bytes
                    .strip_prefix(UTF8_BOM)
                    .ok_or_else(|| "no UTF-8 byte-order mark".to_string())?;
                std::str::from_utf8(body)
                    .map(Cow::Borrowed)
                    .map_err(|e| e.to_string())
            }
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| e.to_string()),
            TextEncoding::Windows1252 => encoding_rs::WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .ok_or_else(|| "invalid windows-1252 byte sequence".to_string()),
            TextEncoding::Latin1 => Ok(Cow::Owned(bytes.iter().map(|&b| b as char).collect())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Guess from the header line; fails when no candidate appears in it.
    Sniff,
    Fixed(u8),
}

impl Delimiter {
    fn resolve(&self, text: &str) -> Result<u8, String> {
        match self {
            Delimiter::Fixed(d) => Ok(*d),
            Delimiter::Sniff => sniff_delimiter(text)
                .ok_or_else(|| "could not determine delimiter".to_string()),
        }
    }
}

/// Candidate delimiter occurring most often (outside quotes) in the first
/// line. Ties go to the earlier candidate.
fn sniff_delimiter(text: &str) -> Option<u8> {
    let line = text.lines().next()?;
    let mut counts = [0usize; 4];
    let candidates = [b',', b';', b'\t', b'|'];
    let mut in_quotes = false;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(i) = candidates.iter().position(|&c| c == b) {
            counts[i] += 1;
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (i, &n) in counts.iter().enumerate() {
        if n > 0 && best.map(|(_, m)| n > m).unwrap_or(true) {
            best = Some((i, n));
        }
    }
    best.map(|(i, _)| candidates[i])
}

/// Header plus data rows, every row padded to the header width.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    skipped_malformed: usize,
}

impl Table {
    fn from_grid(mut grid: Vec<Vec<String>>) -> Self {
        if grid.is_empty() {
            return Self::default();
        }
        let headers: Vec<String> = grid.remove(0).iter().map(|h| normalize_header(h)).collect();
        let width = headers.len();
        let rows = grid
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self {
            headers,
            rows,
            skipped_malformed: 0,
        }
    }
}

fn normalize_header(h: &str) -> String {
    h.trim().trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn parse_delimited(text: &str, delimiter: u8) -> Result<Table, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let headers: Vec<String> = match records.next() {
        Some(header) => header?.iter().map(normalize_header).collect(),
        None => return Ok(Table::default()),
    };

    let mut rows = Vec::new();
    let mut skipped_malformed = 0;
    for (line, record) in records.enumerate() {
        let record = record?;
        if record.len() > headers.len() {
            skipped_malformed += 1;
            debug!(
                row = line + 1,
                fields = record.len(),
                expected = headers.len(),
                "skipping malformed row"
            );
            continue;
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(Table {
        headers,
        rows,
        skipped_malformed,
    })
}

fn is_spreadsheet_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xlsx" | "xls"))
        .unwrap_or(false)
}

fn read_table(path: &Path) -> Result<Table, LoadError> {
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(LoadError::NotFound(shown));
    }
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: shown.clone(),
        source,
    })?;

    if is_spreadsheet_path(path) || xlsx::looks_like_zip(&bytes) {
        let grid = xlsx::read_first_sheet(&bytes).map_err(|e| LoadError::Unparseable {
            path: shown.clone(),
            last_error: e.to_string(),
        })?;
        info!(path = %shown, "read spreadsheet");
        return Ok(Table::from_grid(grid));
    }

    let mut last_error = String::from("no strategy attempted");
    for encoding in ENCODINGS {
        let text = match encoding.decode(&bytes) {
            Ok(text) => text,
            Err(e) => {
                debug!(encoding = encoding.label(), error = %e, "decode failed");
                last_error = e;
                continue;
            }
        };
        for strategy in DELIMITERS {
            let delimiter = match strategy.resolve(&text) {
                Ok(d) => d,
                Err(e) => {
                    debug!(encoding = encoding.label(), error = %e, "delimiter strategy failed");
                    last_error = e;
                    continue;
                }
            };
            match parse_delimited(&text, delimiter) {
                Ok(table) => {
                    info!(
                        path = %shown,
                        encoding = encoding.label(),
                        delimiter = %(delimiter as char).escape_default(),
                        rows = table.rows.len(),
                        skipped = table.skipped_malformed,
                        "parsed delimited file"
                    );
                    return Ok(table);
                }
                Err(e) => {
                    debug!(encoding = encoding.label(), error = %e, "parse failed");
                    last_error = e.to_string();
                }
            }
        }
    }

    match xlsx::read_first_sheet(&bytes) {
        Ok(grid) => Ok(Table::from_grid(grid)),
        Err(_) => Err(LoadError::Unparseable {
            path: shown,
            last_error,
        }),
    }
}

/// Column positions resolved through the alias table.
#[derive(Debug, Default, Clone, Copy)]
struct Columns {
    id: Option<usize>,
    html: Option<usize>,
    text: Option<usize>,
    category: Option<usize>,
}

impl Columns {
    fn resolve(headers: &[String]) -> Self {
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| headers.iter().position(|h| h == alias))
        };
        Self {
            id: find(ID_ALIASES),
            html: find(HTML_ALIASES),
            text: find(TEXT_ALIASES),
            category: find(CATEGORY_ALIASES),
        }
    }

    fn check(&self, headers: &[String]) -> Result<(), SchemaError> {
        if self.id.is_some() && (self.html.is_some() || self.text.is_some()) {
            Ok(())
        } else {
            Err(SchemaError {
                found: headers.join(", "),
            })
        }
    }
}

fn cell(row: &[String], col: Option<usize>) -> &str {
    col.and_then(|c| row.get(c)).map(String::as_str).unwrap_or("")
}

fn normalize(table: &Table, source_path: &str) -> (Vec<CanonicalRecord>, IngestionStats) {
    let total = table.rows.len();
    let mut stats = IngestionStats::empty(source_path);
    stats.total_rows_raw = total;
    stats.rows_skipped_malformed = table.skipped_malformed;

    if total == 0 {
        return (Vec::new(), stats);
    }

    let cols = Columns::resolve(&table.headers);
    if let Err(e) = cols.check(&table.headers) {
        warn!(path = source_path, error = %e, "schema check failed");
        stats.rows_without_any_text = total;
        stats.rows_missing_id = if cols.id.is_none() { total } else { 0 };
        stats.rows_excluded = total;
        stats.error = Some(e.to_string());
        return (Vec::new(), stats);
    }

    let mut records = Vec::new();
    for row in &table.rows {
        let id = cell(row, cols.id).trim();
        let raw_html = cell(row, cols.html);
        let plain = cell(row, cols.text).trim();
        let has_html = !raw_html.trim().is_empty();
        let has_plain = !plain.is_empty();

        if id.is_empty() {
            stats.rows_missing_id += 1;
        }
        if has_html {
            stats.html_non_empty += 1;
        }
        if has_plain {
            stats.str_non_empty += 1;
        }
        if has_html || has_plain {
            stats.rows_with_any_text += 1;
        }

        if id.is_empty() || !(has_html || has_plain) {
            continue;
        }

        let text = if has_plain {
            plain.to_string()
        } else {
            html_to_text(raw_html)
        };
        if text.is_empty() {
            stats.rows_blank_after_strip += 1;
            continue;
        }

        records.push(CanonicalRecord {
            id: id.to_string(),
            category: cell(row, cols.category).trim().to_string(),
            raw_html: raw_html.to_string(),
            text,
        });
    }

    stats.rows_without_any_text = total - stats.rows_with_any_text;
    stats.rows_used = records.len();
    stats.rows_excluded = total - records.len();
    (records, stats)
}

/// Load and normalize the resume file at `path`.
///
/// Missing columns are not an error here: they yield zero records and a
/// stats `error`. File-level failures are returned as [`LoadError`].
pub fn load(path: &Path) -> Result<(Vec<CanonicalRecord>, IngestionStats), LoadError> {
    let table = read_table(path)?;
    let (records, stats) = normalize(&table, &path.display().to_string());
    info!(
        path = %path.display(),
        total = stats.total_rows_raw,
        used = stats.rows_used,
        excluded = stats.rows_excluded,
        "loaded resumes"
    );
    Ok((records, stats))
}

/// Like [`load`], but folds file-level failures into the stats `error`
/// field so the caller always gets a (possibly empty) record set.
pub fn load_with_stats(path: &Path) -> (Vec<CanonicalRecord>, IngestionStats) {
    match load(path) {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "load failed");
            (
                Vec::new(),
                IngestionStats::failed(path.display().to_string(), e.to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    fn assert_consistent(stats: &IngestionStats) {
        assert_eq!(stats.rows_used + stats.rows_excluded, stats.total_rows_raw);
        assert_eq!(
            stats.rows_with_any_text + stats.rows_without_any_text,
            stats.total_rows_raw
        );
        assert!(stats.rows_used <= stats.rows_with_any_text);
        assert!(stats.rows_used + stats.rows_missing_id <= stats.total_rows_raw);
    }

    #[test]
    fn three_row_csv_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "resumes.csv",
            b"ID,Resume_str,Resume_html,Category\n\
              1,Rust developer,,ENGINEERING\n\
              2,Python analyst,,DATA\n\
              3,,<p>Go engineer</p>,ENGINEERING\n",
        );
        let (records, stats) = load(&path).unwrap();
        assert_eq!(records.len(), 3);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(records[2].text, "Go engineer");
        assert_eq!(records[2].raw_html, "<p>Go engineer</p>");
        assert_eq!(records[0].category, "ENGINEERING");
        assert_eq!(stats.rows_used, 3);
        assert_eq!(stats.html_non_empty, 1);
        assert_eq!(stats.str_non_empty, 2);
        assert!(stats.error.is_none());
        assert_consistent(&stats);
    }

    #[test]
    fn row_without_id_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "resumes.csv",
            b"id,resume_str\n1,Accountant\n,Orphan text\n2,Designer\n",
        );
        let (records, stats) = load(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(stats.rows_missing_id, 1);
        assert_eq!(stats.rows_used, 2);
        assert_eq!(stats.rows_excluded, 1);
        assert!(records.iter().all(|r| r.text != "Orphan text"));
        assert_consistent(&stats);
    }

    #[test]
    fn stats_stay_consistent_on_mixed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "mixed.csv",
            b"id,resume_str,resume_html\n\
              1,  ,<script>x()</script>\n\
              2,,\n\
              ,,\n\
              3,  Chef  ,\n\
              4,,<div><b>Nurse</b></div>\n\
              5,too,many,fields\n",
        );
        let (records, stats) = load(&path).unwrap();
        assert_eq!(stats.total_rows_raw, 5);
        assert_eq!(stats.rows_skipped_malformed, 1);
        assert_eq!(stats.rows_used, 2);
        assert_eq!(stats.rows_blank_after_strip, 1);
        assert_eq!(stats.rows_without_any_text, 2);
        assert_eq!(stats.rows_missing_id, 1);
        assert_eq!(records[0].text, "Chef");
        assert_eq!(records[1].text, "Nurse");
        assert_consistent(&stats);
    }

    #[test]
    fn duplicate_ids_pass_through_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "dup.csv", b"id,text\n7,first\n7,second\n");
        let (records, _) = load(&path).unwrap();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn semicolon_file_with_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "export.txt",
            b"Candidate_ID;Text;Profession\n10;Electrician, licensed;TRADES\n",
        );
        let (records, stats) = load(&path).unwrap();
        assert_eq!(stats.rows_used, 1);
        assert_eq!(records[0].id, "10");
        assert_eq!(records[0].text, "Electrician, licensed");
        assert_eq!(records[0].category, "TRADES");
    }

    #[test]
    fn tab_and_pipe_are_sniffed() {
        assert_eq!(sniff_delimiter("id\tresume_str\n1\tx"), Some(b'\t'));
        assert_eq!(sniff_delimiter("id|resume_str|category"), Some(b'|'));
        assert_eq!(sniff_delimiter("\"a,b\";c;d"), Some(b';'));
        assert_eq!(sniff_delimiter("single"), None);
    }

    #[test]
    fn windows_1252_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "legacy.csv", b"id,resume_str\n1,Caf\xe9 manager \x96 Paris\n");
        let (records, _) = load(&path).unwrap();
        assert_eq!(records[0].text, "Café manager \u{2013} Paris");
    }

    #[test]
    fn bom_is_stripped_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "bom.csv", b"\xEF\xBB\xBFID,Resume_str\n1,Pilot\n");
        let (records, stats) = load(&path).unwrap();
        assert!(stats.error.is_none());
        assert_eq!(records[0].id, "1");
    }

    #[test]
    fn missing_columns_yield_no_records_and_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "wrong.csv", b"name,summary\nJane,Rust\nJohn,Go\n");
        let (records, stats) = load(&path).unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.total_rows_raw, 2);
        assert_eq!(stats.rows_without_any_text, 2);
        assert_eq!(stats.rows_missing_id, 2);
        assert_eq!(stats.rows_excluded, 2);
        assert!(stats.error.as_deref().unwrap_or("").contains("missing required columns"));
        assert_consistent(&stats);
    }

    #[test]
    fn id_without_text_column_keeps_id_count_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "ids.csv", b"id,category\n1,HR\n");
        let (_, stats) = load(&path).unwrap();
        assert_eq!(stats.rows_missing_id, 0);
        assert_eq!(stats.rows_without_any_text, 1);
        assert!(stats.error.is_some());
    }

    #[test]
    fn empty_file_is_legitimately_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "empty.csv", b"");
        let (records, stats) = load(&path).unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.total_rows_raw, 0);
        assert!(stats.error.is_none());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(matches!(load(&path), Err(LoadError::NotFound(_))));

        let (records, stats) = load_with_stats(&path);
        assert!(records.is_empty());
        assert!(stats.error.unwrap().contains("not found"));
    }

    #[test]
    fn spreadsheet_is_detected_by_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = crate::xlsx::tests::inline_workbook(
            &["ID", "Resume_html", "Category"],
            &[&["42", "<p>Nurse &amp; midwife</p>", "HEALTH"], &["43", "", "HEALTH"]],
        );
        let path = write(&dir, "upload.csv", &bytes);
        let (records, stats) = load(&path).unwrap();
        assert_eq!(stats.total_rows_raw, 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Nurse & midwife");
        assert_eq!(records[0].category, "HEALTH");
    }

    #[test]
    fn broken_xlsx_is_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "broken.xlsx", b"definitely not a zip");
        assert!(matches!(load(&path), Err(LoadError::Unparseable { .. })));
    }

    #[test]
    fn decode_is_strict() {
        assert!(TextEncoding::Utf8.decode(b"\xe9").is_err());
        assert!(TextEncoding::Utf8Sig.decode(b"abc").is_err());
        assert_eq!(TextEncoding::Latin1.decode(b"\xe9").unwrap(), "é");
    }
}
