use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};

use super::{build_table, normalize_headers, Cell, DecodedTable};
use crate::types::{AppError, AppResult};

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Int(i) => Cell::Int(*i, i.to_string()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Cell::Int(*f as i64, f.to_string())
        }
        Data::Float(f) => Cell::Float(*f, f.to_string()),
        Data::Bool(b) => Cell::Int(*b as i64, b.to_string()),
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if dt.is_datetime() => Cell::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            _ => Cell::Float(dt.as_f64(), dt.as_f64().to_string()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

fn header_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Decode the first worksheet of an XLSX workbook; its first row is the header.
///
/// Rows with no values at all are skipped. Date-formatted cells become
/// `YYYY-MM-DD HH:MM:SS` text.
pub fn decode_xlsx(file_name: &str, content: &[u8]) -> AppResult<DecodedTable> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(content))
        .map_err(|e| AppError::decode(file_name, e))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::decode(file_name, "workbook has no worksheets"))?
        .map_err(|e| AppError::decode(file_name, e))?;

    let mut rows = range.rows();
    let header_row = rows
        .next()
        .ok_or_else(|| AppError::decode(file_name, "first worksheet is empty"))?;
    let headers = normalize_headers(header_row.iter().map(header_text));
    let width = headers.len();

    let cells: Vec<Vec<Cell>> = rows
        .map(|row| {
            let mut cells: Vec<Cell> = row.iter().map(to_cell).collect();
            cells.resize(width, Cell::Empty);
            cells
        })
        .filter(|row| row.iter().any(|c| *c != Cell::Empty))
        .collect();

    build_table(headers, cells)
}
