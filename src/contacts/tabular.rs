use super::{clean_phone_number, Contact, ContactError, PhoneRules};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use log::debug;
use regex::Regex;
use std::io::Cursor;

type Table = (Vec<String>, Vec<Vec<String>>);

fn matches_any(header: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|rx| rx.is_match(header))
}

/// Picks `(phone column, name column)` from the header row.
///
/// A header that looks like a phone column is never used for names, even
/// when it also matches a name keyword.
pub(crate) fn detect_columns(
    headers: &[String],
    phone_patterns: &[Regex],
    name_patterns: &[Regex],
) -> (usize, Option<usize>) {
    let phone = headers
        .iter()
        .position(|h| matches_any(h, phone_patterns))
        .unwrap_or(0);
    let name = headers
        .iter()
        .position(|h| !matches_any(h, phone_patterns) && matches_any(h, name_patterns))
        .or_else(|| (0..headers.len()).find(|&i| i != phone && (i == 1 || phone == 1)));
    (phone, name)
}

pub(crate) fn extract(
    headers: &[String],
    rows: &[Vec<String>],
    phone_patterns: &[Regex],
    name_patterns: &[Regex],
    rules: &PhoneRules,
) -> Vec<Contact> {
    let mut contacts = Vec::new();
    if headers.is_empty() {
        return contacts;
    }

    let (phone_col, name_col) = detect_columns(headers, phone_patterns, name_patterns);
    debug!(
        "Using column {:?} for numbers and {:?} for names",
        headers.get(phone_col),
        name_col.and_then(|i| headers.get(i))
    );

    for row in rows {
        let Some(number) = row
            .get(phone_col)
            .and_then(|raw| clean_phone_number(raw, rules))
        else {
            continue;
        };
        let name = name_col.and_then(|i| row.get(i)).cloned();
        let position = contacts.len() + 1;
        contacts.push(Contact::with_placeholder(number, name, position));
    }

    contacts
}

pub(crate) fn read_csv(input: &[u8]) -> Result<Table, ContactError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok((headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        // Numbers typed into a sheet come back as floats.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

/// Reads the first worksheet; its first row is the header.
pub(crate) fn read_spreadsheet(input: Vec<u8>) -> Result<Table, ContactError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(input))
        .map_err(|e| ContactError::Spreadsheet(e.to_string()))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| ContactError::Spreadsheet(e.to_string()))?,
        None => return Ok((Vec::new(), Vec::new())),
    };

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>());
    let headers = rows.next().unwrap_or_default();
    let rows = rows
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();
    Ok((headers, rows))
}
