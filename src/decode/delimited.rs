use csv::ReaderBuilder;

use super::{build_table, normalize_headers, Cell, DecodedTable};
use crate::types::{AppError, AppResult};

/// Decode comma-separated text whose first record is the header.
///
/// Short records are padded with empty cells; records wider than the header
/// are rejected.
pub fn decode_csv(file_name: &str, content: &[u8]) -> AppResult<DecodedTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| AppError::decode(file_name, e))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
        return Err(AppError::decode(file_name, "missing header row"));
    }
    let headers = normalize_headers(headers);
    let width = headers.len();

    let mut cells = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| AppError::decode(file_name, e))?;
        if record.len() > width {
            return Err(AppError::decode(
                file_name,
                format!(
                    "line {}: expected {} fields, saw {}",
                    record.position().map(|p| p.line()).unwrap_or(idx as u64 + 2),
                    width,
                    record.len()
                ),
            ));
        }
        let mut row: Vec<Cell> = record.iter().map(Cell::from_text).collect();
        row.resize(width, Cell::Empty);
        cells.push(row);
    }

    build_table(headers, cells)
}
