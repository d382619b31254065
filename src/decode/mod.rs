//! Tabular Decoder
//!
//! Turns a [`SourceDescriptor`] into a [`DecodedTable`]: ordered, unique column
//! names, inferred column types, and rows whose width always equals the column
//! count.
//!
//! SAS transport files go through two readers. The strict in-memory reader runs
//! first; when it fails, the bytes are written to a scratch file and the lenient
//! file-backed reader gets a second try. The scratch file is removed whether or
//! not the second reader succeeds.

pub mod delimited;
pub mod spreadsheet;
pub mod xport;

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::sources::SourceDescriptor;
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
    Xpt,
}

impl FileFormat {
    /// Recognise a supported extension, ignoring case
    pub fn from_name(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "xlsx" => Some(FileFormat::Xlsx),
            "xpt" => Some(FileFormat::Xpt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl DecodedTable {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> AppResult<Self> {
        // SQLite compares column names without regard to ASCII case
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(AppError::decode("table", format!("duplicate column name {:?}", column.name)));
            }
        }
        if let Some(idx) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(AppError::decode(
                "table",
                format!(
                    "row {} has {} values, expected {}",
                    idx + 1,
                    rows[idx].len(),
                    columns.len()
                ),
            ));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Make header names unique and non-empty.
///
/// Blank names become `Unnamed: <index>`; repeats get `.1`, `.2`, ... suffixes.
/// Names that differ only in ASCII case count as repeats.
pub fn normalize_headers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let raw: Vec<String> = raw
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let name = name.as_ref();
            if name.trim().is_empty() {
                format!("Unnamed: {}", idx)
            } else {
                name.to_string()
            }
        })
        .collect();

    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for name in raw {
        let mut candidate = name.clone();
        let mut suffix = 1;
        while taken.contains(&candidate.to_ascii_lowercase()) {
            candidate = format!("{}.{}", name, suffix);
            suffix += 1;
        }
        taken.insert(candidate.to_ascii_lowercase());
        out.push(candidate);
    }
    out
}

/// A raw cell before the column type is known; numbers keep their source text
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Empty,
    Int(i64, String),
    Float(f64, String),
    Text(String),
}

impl Cell {
    pub(crate) fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else if let Ok(i) = trimmed.parse::<i64>() {
            Cell::Int(i, raw.to_string())
        } else if let Some(f) = trimmed.parse::<f64>().ok().filter(|f| f.is_finite()) {
            Cell::Float(f, raw.to_string())
        } else {
            Cell::Text(raw.to_string())
        }
    }

    fn into_text(self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Int(_, raw) | Cell::Float(_, raw) | Cell::Text(raw) => raw,
        }
    }
}

/// Pick each column's type from its cells and convert the rows.
pub(crate) fn build_table(headers: Vec<String>, cells: Vec<Vec<Cell>>) -> AppResult<DecodedTable> {
    let width = headers.len();
    let types: Vec<ColumnType> = (0..width)
        .map(|col| {
            let mut column_type = ColumnType::Integer;
            for row in &cells {
                match &row[col] {
                    Cell::Empty | Cell::Int(..) => {}
                    Cell::Float(..) => column_type = ColumnType::Real,
                    Cell::Text(_) => return ColumnType::Text,
                }
            }
            column_type
        })
        .collect();

    let rows = cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&types)
                .map(|(cell, column_type)| match (cell, column_type) {
                    (Cell::Empty, _) => Value::Null,
                    (Cell::Int(i, _), ColumnType::Integer) => Value::Integer(i),
                    (Cell::Int(i, _), ColumnType::Real) => Value::Real(i as f64),
                    (Cell::Float(f, _), ColumnType::Real) => Value::Real(f),
                    (cell, _) => Value::Text(cell.into_text()),
                })
                .collect()
        })
        .collect();

    let columns = headers
        .into_iter()
        .zip(types)
        .map(|(name, column_type)| Column { name, column_type })
        .collect();

    DecodedTable::new(columns, rows)
}

/// Decode a source into a table; `scratch_dir` hosts the transport fallback file.
pub fn decode(descriptor: &SourceDescriptor, scratch_dir: &Path) -> AppResult<DecodedTable> {
    let format = FileFormat::from_name(&descriptor.file_name)
        .ok_or_else(|| AppError::UnsupportedFormat(descriptor.file_name.clone()))?;

    let table = match format {
        FileFormat::Csv => delimited::decode_csv(&descriptor.file_name, &descriptor.content)?,
        FileFormat::Xlsx => spreadsheet::decode_xlsx(&descriptor.file_name, &descriptor.content)?,
        FileFormat::Xpt => decode_transport(&descriptor.file_name, &descriptor.content, scratch_dir)?,
    };

    info!(
        file = %descriptor.file_name,
        format = ?format,
        columns = table.columns().len(),
        rows = table.row_count(),
        "Decoded table"
    );
    Ok(table)
}

/// Primary in-memory reader, then the file-backed reader on a scratch copy.
pub fn decode_transport(file_name: &str, content: &[u8], scratch_dir: &Path) -> AppResult<DecodedTable> {
    let primary = match xport::read_bytes(content) {
        Ok(table) => return Ok(table),
        Err(e) => e,
    };
    warn!(file = %file_name, error = %primary, "Primary transport reader failed, trying fallback");

    let secondary = (|| -> AppResult<DecodedTable> {
        // Dropped (and deleted) at the end of this closure on every path
        let mut scratch = tempfile::Builder::new()
            .prefix("xport-")
            .suffix(".xpt")
            .tempfile_in(scratch_dir)?;
        scratch.write_all(content)?;
        scratch.flush()?;
        xport::read_file(scratch.path())
    })();

    secondary.map_err(|secondary| AppError::TransportFormatFallbackExhausted {
        file: file_name.to_string(),
        primary: primary.to_string(),
        secondary: secondary.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::OriginKind;

    #[test]
    fn test_file_format_from_name() {
        assert_eq!(FileFormat::from_name("AE.csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_name("dm.XLSX"), Some(FileFormat::Xlsx));
        assert_eq!(FileFormat::from_name("lb.xpt"), Some(FileFormat::Xpt));
        assert_eq!(FileFormat::from_name("notes.txt"), None);
        assert_eq!(FileFormat::from_name("csv"), None);
    }

    #[test]
    fn test_normalize_headers() {
        assert_eq!(
            normalize_headers(["id", "", "id", "name", "id"]),
            vec!["id", "Unnamed: 1", "id.1", "name", "id.2"]
        );
        assert_eq!(normalize_headers(["a", "a.1", "a"]), vec!["a", "a.1", "a.2"]);
        assert_eq!(normalize_headers(["id", "ID", "Id"]), vec!["id", "ID.1", "Id.2"]);
    }

    #[test]
    fn test_build_table_infers_types() {
        let headers = vec!["n".to_string(), "x".to_string(), "s".to_string()];
        let cells = vec![
            vec![Cell::from_text("1"), Cell::from_text("1"), Cell::from_text("a")],
            vec![Cell::from_text(""), Cell::from_text("2.5"), Cell::from_text("007")],
        ];
        let table = build_table(headers, cells).unwrap();

        let types: Vec<_> = table.columns().iter().map(|c| c.column_type).collect();
        assert_eq!(types, vec![ColumnType::Integer, ColumnType::Real, ColumnType::Text]);
        assert_eq!(
            table.rows()[0],
            vec![Value::Integer(1), Value::Real(1.0), Value::Text("a".to_string())]
        );
        assert_eq!(
            table.rows()[1],
            vec![Value::Null, Value::Real(2.5), Value::Text("007".to_string())]
        );
    }

    #[test]
    fn test_non_finite_numbers_stay_text() {
        for raw in ["NaN", "inf", "-Infinity"] {
            assert_eq!(Cell::from_text(raw), Cell::Text(raw.to_string()));
        }
        let headers = vec!["code".to_string()];
        let cells = vec![vec![Cell::from_text("1.5")], vec![Cell::from_text("NaN")]];
        let table = build_table(headers, cells).unwrap();
        assert_eq!(table.columns()[0].column_type, ColumnType::Text);
        assert_eq!(table.rows()[1][0], Value::Text("NaN".to_string()));
    }

    #[test]
    fn test_table_rejects_names_differing_only_in_case() {
        let columns = vec![
            Column { name: "id".to_string(), column_type: ColumnType::Integer },
            Column { name: "ID".to_string(), column_type: ColumnType::Integer },
        ];
        assert!(matches!(DecodedTable::new(columns, Vec::new()), Err(AppError::Decode { .. })));
    }

    #[test]
    fn test_table_rejects_ragged_rows() {
        let columns = vec![Column { name: "a".to_string(), column_type: ColumnType::Text }];
        let result = DecodedTable::new(columns, vec![vec![Value::Null, Value::Null]]);
        assert!(matches!(result, Err(AppError::Decode { .. })));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = SourceDescriptor::new(OriginKind::Upload, "notes.txt", b"hello".to_vec());
        assert!(matches!(
            decode(&descriptor, dir.path()),
            Err(AppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_dispatch_by_extension() {
        use xport::tests::{build_xport, Obs, Var};

        let dir = tempfile::tempdir().unwrap();
        let xpt = build_xport(&[Var::Num("AGE")], &[vec![Obs::Num(Some(40.0))]], 140);
        let table = decode(&SourceDescriptor::new(OriginKind::Folder, "DM.XPT", xpt), dir.path()).unwrap();
        assert_eq!(table.column_names(), vec!["AGE"]);
        assert_eq!(table.rows()[0][0], Value::Real(40.0));

        let xlsx = spreadsheet::tests::build_xlsx(&[vec!["id"], vec!["1"]]);
        let table = decode(&SourceDescriptor::new(OriginKind::Upload, "ids.xlsx", xlsx), dir.path()).unwrap();
        assert_eq!(table.rows()[0][0], Value::Integer(1));
    }

    #[test]
    fn test_transport_fallback_recovers_vax_layout() {
        use xport::tests::{build_xport, Obs, Var};

        let dir = tempfile::tempdir().unwrap();
        let xpt = build_xport(
            &[Var::Char("USUBJID", 8), Var::Num("AGE")],
            &[vec![Obs::Char("01-001"), Obs::Num(Some(61.0))]],
            136,
        );

        let table = decode_transport("dm.xpt", &xpt, dir.path()).unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows()[0][1], Value::Real(61.0));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_transport_fallback_exhausted_leaves_no_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = SourceDescriptor::new(OriginKind::Upload, "broken.xpt", b"garbage".to_vec());

        let err = decode(&descriptor, dir.path()).unwrap_err();

        match &err {
            AppError::TransportFormatFallbackExhausted { primary, secondary, .. } => {
                assert!(!primary.is_empty());
                assert!(!secondary.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("primary:"));
        assert!(message.contains("secondary:"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
