//! SAS transport (XPORT version 5) reader
//!
//! The file is a sequence of 80-byte records:
//!
//! ```text
//! LIBRARY header, 2 real-header records
//! MEMBER header, DSCRPTR header, 2 member records
//! NAMESTR header, one namestr (140 bytes, 136 on VAX) per variable, padded
//! OBS header, observations packed back to back, blank padded
//! ```
//!
//! Numeric values are IBM mainframe doubles, possibly truncated to 2..8 bytes.
//! Only the first member of a library is read.
//!
//! [`read_bytes`] is strict about the header layout. [`read_file`] streams from
//! disk and tolerates the variations older writers produce.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, warn};

use super::{normalize_headers, Column, ColumnType, DecodedTable, Value};
use crate::types::{AppError, AppResult};

const RECORD_LEN: usize = 80;
const LIBRARY_HEADER: &[u8] = b"HEADER RECORD*******LIBRARY HEADER RECORD!!!!!!!";
const MEMBER_HEADER: &[u8] = b"HEADER RECORD*******MEMBER  HEADER RECORD!!!!!!!";
const DESCRIPTOR_HEADER: &[u8] = b"HEADER RECORD*******DSCRPTR HEADER RECORD!!!!!!!";
const NAMESTR_HEADER: &[u8] = b"HEADER RECORD*******NAMESTR HEADER RECORD!!!!!!!";
const OBS_HEADER: &[u8] = b"HEADER RECORD*******OBS     HEADER RECORD!!!!!!!";
const REAL_HEADER_PREFIX: &[u8] = b"SAS     SAS     SASLIB  ";
const MEMBER_RECORD_PREFIX: &[u8] = b"SAS     ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Numeric,
    Character,
}

#[derive(Debug, Clone)]
struct Variable {
    kind: VarKind,
    length: usize,
    name: String,
    label: String,
    position: usize,
}

/// Sequential 80-byte record reader
struct Records<R> {
    inner: R,
    consumed: usize,
}

impl<R: Read> Records<R> {
    fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    fn next(&mut self, what: &str) -> AppResult<[u8; RECORD_LEN]> {
        let mut record = [0u8; RECORD_LEN];
        self.inner
            .read_exact(&mut record)
            .map_err(|_| malformed(format!("unexpected end of file reading {}", what)))?;
        self.consumed += RECORD_LEN;
        Ok(record)
    }

    fn take(&mut self, len: usize, what: &str) -> AppResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| malformed(format!("unexpected end of file reading {}", what)))?;
        self.consumed += len;
        Ok(buf)
    }

    fn rest(mut self) -> AppResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

fn malformed(message: impl Into<String>) -> AppError {
    AppError::decode("xport", message.into())
}

fn expect_header(record: &[u8; RECORD_LEN], header: &[u8], what: &str) -> AppResult<()> {
    if record.starts_with(header) {
        Ok(())
    } else {
        Err(malformed(format!(
            "expected {} header, found {:?}",
            what,
            String::from_utf8_lossy(&record[..header.len().min(RECORD_LEN)])
        )))
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

fn digits_field(bytes: &[u8], what: &str) -> AppResult<usize> {
    let text = std::str::from_utf8(bytes).map_err(|_| malformed(format!("{} is not ASCII", what)))?;
    text.trim()
        .parse()
        .map_err(|_| malformed(format!("{} is not a number: {:?}", what, text)))
}

fn be_i16(bytes: &[u8]) -> i16 {
    i16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode an IBM hexadecimal float; `None` for SAS missing values.
pub(crate) fn ibm_to_f64(raw: &[u8]) -> Option<f64> {
    let mut bytes = [0u8; 8];
    let len = raw.len().min(8);
    bytes[..len].copy_from_slice(&raw[..len]);

    if bytes[1..].iter().all(|b| *b == 0) {
        return match bytes[0] {
            0x00 | 0x80 => Some(0.0),
            b'.' | b'_' | b'A'..=b'Z' => None,
            _ => Some(0.0),
        };
    }

    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7f) as i32 - 64;
    let mantissa = bytes[1..]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64);

    Some(sign * mantissa as f64 * 2f64.powi(4 * exponent - 56))
}

fn parse_namestr(raw: &[u8], index: usize) -> AppResult<Variable> {
    let kind = match be_i16(&raw[0..2]) {
        1 => VarKind::Numeric,
        2 => VarKind::Character,
        other => return Err(malformed(format!("variable {} has unknown type code {}", index + 1, other))),
    };
    let length = be_i16(&raw[4..6]);
    let position = be_i32(&raw[84..88]);
    if length <= 0 || position < 0 {
        return Err(malformed(format!("variable {} has invalid length/position", index + 1)));
    }
    let length = length as usize;
    if kind == VarKind::Numeric && !(2..=8).contains(&length) {
        return Err(malformed(format!(
            "numeric variable {} has length {}, expected 2..8",
            index + 1,
            length
        )));
    }

    Ok(Variable {
        kind,
        length,
        name: ascii_field(&raw[8..16]),
        label: ascii_field(&raw[16..56]),
        position: position as usize,
    })
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == b' ')
}

/// Offset of the next member header on a record boundary, if any
fn next_member_offset(data: &[u8], from: usize) -> Option<usize> {
    let start = from.div_ceil(RECORD_LEN) * RECORD_LEN;
    (start..data.len())
        .step_by(RECORD_LEN)
        .find(|off| data[*off..].starts_with(MEMBER_HEADER))
}

fn decode_value(variable: &Variable, raw: &[u8]) -> Value {
    match variable.kind {
        VarKind::Numeric => ibm_to_f64(raw).map(Value::Real).unwrap_or(Value::Null),
        VarKind::Character => {
            Value::Text(String::from_utf8_lossy(raw).trim_end_matches([' ', '\0']).to_string())
        }
    }
}

fn read_library<R: Read>(mut records: Records<R>, mode: Mode) -> AppResult<DecodedTable> {
    let library = records.next("library header")?;
    expect_header(&library, LIBRARY_HEADER, "LIBRARY")
        .map_err(|_| malformed("not a SAS transport file (missing LIBRARY header)"))?;

    let real = records.next("real header")?;
    if mode == Mode::Strict && !real.starts_with(REAL_HEADER_PREFIX) {
        return Err(malformed("real header record does not start with SAS/SASLIB"));
    }
    records.next("modified-date header")?;

    let member = records.next("member header")?;
    expect_header(&member, MEMBER_HEADER, "MEMBER")?;
    let namestr_len = digits_field(&member[74..78], "namestr length")?;
    match (mode, namestr_len) {
        (_, 140) => {}
        (Mode::Lenient, 136) => debug!("VAX namestr layout"),
        _ => {
            return Err(malformed(format!(
                "unsupported namestr length {}",
                namestr_len
            )))
        }
    }

    let descriptor = records.next("descriptor header")?;
    expect_header(&descriptor, DESCRIPTOR_HEADER, "DSCRPTR")?;

    let member_first = records.next("member record")?;
    if mode == Mode::Strict && !member_first.starts_with(MEMBER_RECORD_PREFIX) {
        return Err(malformed("member record does not start with SAS"));
    }
    let dataset = ascii_field(&member_first[8..16]);
    records.next("member label record")?;

    let namestr_header = records.next("namestr header")?;
    expect_header(&namestr_header, NAMESTR_HEADER, "NAMESTR")?;
    let var_count = digits_field(&namestr_header[54..58], "variable count")?;
    if var_count == 0 {
        return Err(malformed("dataset has no variables"));
    }

    let mut variables = Vec::with_capacity(var_count);
    let namestrs = records.take(var_count * namestr_len, "namestr records")?;
    for (idx, raw) in namestrs.chunks(namestr_len).enumerate() {
        variables.push(parse_namestr(raw, idx)?);
    }
    let padding = (RECORD_LEN - records.consumed % RECORD_LEN) % RECORD_LEN;
    records.take(padding, "namestr padding")?;

    let obs_header = records.next("observation header")?;
    expect_header(&obs_header, OBS_HEADER, "OBS")?;

    let obs_len = variables
        .iter()
        .map(|v| v.position + v.length)
        .max()
        .unwrap_or(0);
    let data = records.rest()?;
    let data_end = next_member_offset(&data, 0).unwrap_or(data.len());

    let mut rows = Vec::new();
    let mut offset = 0;
    while offset < data_end {
        if offset + obs_len > data_end {
            if is_blank(&data[offset..data_end]) {
                break;
            }
            match mode {
                Mode::Strict => return Err(malformed("truncated final observation")),
                Mode::Lenient => {
                    warn!(dataset = %dataset, "Dropping truncated final observation");
                    break;
                }
            }
        }
        let observation = &data[offset..offset + obs_len];
        if is_blank(observation) && is_blank(&data[offset..data_end]) {
            break;
        }

        rows.push(
            variables
                .iter()
                .map(|v| decode_value(v, &observation[v.position..v.position + v.length]))
                .collect(),
        );
        offset += obs_len;
    }

    let names = normalize_headers(variables.iter().map(|v| v.name.as_str()));
    let columns = names
        .into_iter()
        .zip(&variables)
        .map(|(name, v)| Column {
            name,
            column_type: match v.kind {
                VarKind::Numeric => ColumnType::Real,
                VarKind::Character => ColumnType::Text,
            },
        })
        .collect();

    debug!(
        dataset = %dataset,
        variables = variables.len(),
        labels = variables.iter().filter(|v| !v.label.is_empty()).count(),
        observations = rows.len(),
        "Read transport member"
    );
    DecodedTable::new(columns, rows)
}

/// Strict in-memory reader.
pub fn read_bytes(content: &[u8]) -> AppResult<DecodedTable> {
    read_library(Records::new(content), Mode::Strict)
}

/// Lenient reader streaming from a file on disk.
pub fn read_file(path: &Path) -> AppResult<DecodedTable> {
    let file = File::open(path)?;
    read_library(Records::new(BufReader::new(file)), Mode::Lenient)
}
