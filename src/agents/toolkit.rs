//! Database tools exposed to the SQL agent.
//!
//! The handle is opened read-only and every statement passes [`check_statement`]
//! first, so model-generated SQL can inspect the store but never change it.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::debug;

use crate::decode::Value;
use crate::store::quote_identifier;
use crate::types::{AppError, AppResult};

const ALLOWED_LEADING_KEYWORDS: [&str; 4] = ["SELECT", "WITH", "EXPLAIN", "VALUES"];

pub struct SqlDatabase {
    pool: SqlitePool,
    sample_rows: usize,
}

impl SqlDatabase {
    pub async fn open_read_only(path: &Path, sample_rows: usize) -> AppResult<Self> {
        if !path.is_file() {
            return Err(AppError::AgentConstruction(format!(
                "database {} does not exist",
                path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AppError::AgentConstruction(format!("{}: {}", path.display(), e)))?;

        Ok(Self { pool, sample_rows })
    }

    pub fn dialect(&self) -> &'static str {
        "sqlite"
    }

    pub async fn table_names(&self) -> AppResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    /// CREATE statement and a few sample rows for each requested table
    pub async fn table_info(&self, requested: &[String]) -> AppResult<String> {
        let known = self.table_names().await?;
        let missing: Vec<&str> = requested
            .iter()
            .filter(|name| !known.contains(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::QueryRejected(format!(
                "table_names {{{}}} not found in database",
                missing.join(", ")
            )));
        }

        let mut sections = Vec::with_capacity(requested.len());
        for name in requested {
            let create_sql = sqlx::query_scalar::<_, String>(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

            let sample_sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(name)?, self.sample_rows);
            let rows = sqlx::query(&sample_sql).fetch_all(&self.pool).await?;
            let header = match rows.first() {
                Some(row) => row
                    .columns()
                    .iter()
                    .map(|c| sqlx::Column::name(c).to_string())
                    .collect::<Vec<_>>()
                    .join("\t"),
                None => String::new(),
            };

            let mut section = format!(
                "\n{}\n\n/*\n{} rows from {} table:\n{}\n",
                create_sql.trim(),
                self.sample_rows,
                name,
                header
            );
            for row in &rows {
                let values = decode_row(row)?;
                let line: Vec<String> = values.iter().map(display_plain).collect();
                section.push_str(&line.join("\t"));
                section.push('\n');
            }
            section.push_str("*/");
            sections.push(section);
        }

        Ok(sections.join("\n\n"))
    }

    /// Run one allow-listed statement and render the rows for the model.
    pub async fn run(&self, sql: &str) -> AppResult<String> {
        let statement = check_statement(sql)?;
        debug!(sql = %statement, "Running agent query");

        let rows = sqlx::query(statement).fetch_all(&self.pool).await?;
        let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(format_rows(&decoded))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len())
        .map(|idx| {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let kind = raw.type_info().name().to_owned();
            Ok(match kind.as_str() {
                "INTEGER" => Value::Integer(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" => Value::Real(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                    Value::Text(format!("<{} bytes>", bytes.len()))
                }
                _ => Value::Text(row.try_get_unchecked::<String, _>(idx)?),
            })
        })
        .collect()
}

fn display_plain(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format_real(*f),
        Value::Text(s) => s.clone(),
    }
}

fn display_literal(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        other => display_plain(other),
    }
}

fn format_real(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Rows as a list of tuples, e.g. `[(1, 'alice'), (2, 'bob')]`; empty results render as ""
pub fn format_rows(rows: &[Vec<Value>]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let items: Vec<String> = row.iter().map(display_literal).collect();
            if items.len() == 1 {
                format!("({},)", items[0])
            } else {
                format!("({})", items.join(", "))
            }
        })
        .collect();
    format!("[{}]", tuples.join(", "))
}

/// Drop a surrounding Markdown code fence, if any.
fn strip_code_fence(sql: &str) -> &str {
    let trimmed = sql.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner
        .strip_prefix("sqlite")
        .or_else(|| inner.strip_prefix("sql"))
        .unwrap_or(inner);
    inner.trim()
}

/// Byte offsets of statement separators outside literals and comments.
fn statement_separators(sql: &str) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let mut separators = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote stays inside the literal
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 1;
            }
            b';' => separators.push(i),
            _ => {}
        }
        i += 1;
    }
    separators
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return sql;
        }
    }
}

/// Admit exactly one read-only statement; returns it without the trailing `;`.
pub fn check_statement(sql: &str) -> AppResult<&str> {
    let sql = strip_code_fence(sql);

    let statement = match statement_separators(sql).first() {
        Some(&pos) if skip_leading_comments(&sql[pos + 1..]).is_empty() => &sql[..pos],
        Some(_) => {
            return Err(AppError::QueryRejected(
                "only a single statement may be executed".to_string(),
            ))
        }
        None => sql,
    };
    let statement = statement.trim();

    let body = skip_leading_comments(statement);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if keyword.is_empty() {
        return Err(AppError::QueryRejected("empty query".to_string()));
    }
    if !ALLOWED_LEADING_KEYWORDS.contains(&keyword.as_str()) {
        return Err(AppError::QueryRejected(format!(
            "{} statements are not allowed; only read-only queries may be executed",
            keyword
        )));
    }
    Ok(statement)
}
