use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::normalize::STANDARD_HEADERS;

pub const TEMPLATE_FILE_NAME: &str = "student_template_standard.csv";
const BOM: char = '\u{feff}';

/// One data row keyed by header text. Only the normalizers read these.
pub type RawRow = HashMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Splits CSV text into records. Quoted fields may contain commas, doubled
/// quotes and line breaks; CRLF and LF both end a record.
pub fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = text.trim_start_matches(BOM).chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if !in_quotes && ch == ',' {
            fields.push(std::mem::take(&mut buf));
            i += 1;
            continue;
        }
        if !in_quotes && (ch == '\n' || ch == '\r') {
            if ch == '\r' && i + 1 < chars.len() && chars[i + 1] == '\n' {
                i += 1;
            }
            fields.push(std::mem::take(&mut buf));
            records.push(std::mem::take(&mut fields));
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        records.push(fields);
    }
    records
}

fn is_blank_record(record: &[String]) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

/// First record is the header line; blank lines are skipped.
pub fn parse_table(text: &str) -> CsvTable {
    let mut records = parse_records(text)
        .into_iter()
        .filter(|r| !is_blank_record(r));
    let Some(header_fields) = records.next() else {
        return CsvTable::default();
    };
    let headers = header_fields
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let rows = records
        .map(|fields| {
            headers
                .iter()
                .zip(fields)
                .map(|(h, v)| (h.clone(), v))
                .collect::<RawRow>()
        })
        .collect();
    CsvTable { headers, rows }
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Standard header row only, UTF-8 with a byte-order mark.
pub fn template_csv() -> String {
    let header = STANDARD_HEADERS
        .iter()
        .map(|h| csv_quote(h))
        .collect::<Vec<_>>()
        .join(",");
    format!("{BOM}{header}\n")
}

pub fn write_template(out_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;
    let out_path = out_dir.join(TEMPLATE_FILE_NAME);
    std::fs::write(&out_path, template_csv())
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_handle_quotes_and_line_endings() {
        let text = "a,b,c\r\n\"x, y\",\"say \"\"hi\"\"\",\"line1\nline2\"\n";
        let recs = parse_records(text);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0], vec!["a", "b", "c"]);
        assert_eq!(recs[1], vec!["x, y", "say \"hi\"", "line1\nline2"]);
    }

    #[test]
    fn table_strips_bom_and_skips_blank_lines() {
        let text = "\u{feff}studentId, firstName\n1001,สมชาย\n\n,\n1002,สมหญิง";
        let t = parse_table(text);
        assert_eq!(t.headers, vec!["studentId", "firstName"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1].get("firstName").map(String::as_str), Some("สมหญิง"));
    }

    #[test]
    fn short_rows_leave_trailing_headers_absent() {
        let t = parse_table("a,b,c\n1,2\n");
        assert_eq!(t.rows[0].get("b").map(String::as_str), Some("2"));
        assert!(t.rows[0].get("c").is_none());
    }

    #[test]
    fn template_is_bom_plus_single_header_line() {
        let t = template_csv();
        assert!(t.starts_with('\u{feff}'));
        assert_eq!(t.lines().count(), 1);
        let table = parse_table(&t);
        assert_eq!(table.headers.len(), STANDARD_HEADERS.len());
        assert!(table.rows.is_empty());
        assert_eq!(table.headers[0], "studentId");
        assert_eq!(table.headers.last().map(String::as_str), Some("insurance"));
    }
}
