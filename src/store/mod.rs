//! Relational Loader
//!
//! Each decoded table is written to its own SQLite file holding exactly one
//! table. Loading replaces any table of the same name, so reloading a source
//! never appends.

pub mod workspace;

pub use workspace::SessionWorkspace;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::Connection;
use tracing::{error, info};

use crate::decode::{DecodedTable, Value};
use crate::types::{AppError, AppResult, Notice};

/// Quote a name as an SQLite identifier.
///
/// Names are kept verbatim; embedded double quotes are doubled. Empty names and
/// names containing NUL are rejected.
pub fn quote_identifier(name: &str) -> AppResult<String> {
    if name.is_empty() {
        return Err(AppError::DatabaseWrite("identifier is empty".to_string()));
    }
    if name.contains('\0') {
        return Err(AppError::DatabaseWrite(format!("identifier {:?} contains NUL", name)));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a table name; SQLite reserves the `sqlite_` prefix for schema objects.
pub fn quote_table_name(name: &str) -> AppResult<String> {
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(AppError::DatabaseWrite(format!(
            "table name {:?} uses the reserved sqlite_ prefix",
            name
        )));
    }
    quote_identifier(name)
}

async fn write_rows(
    conn: &mut SqliteConnection,
    table: &DecodedTable,
    table_ident: &str,
    column_defs: &str,
    insert: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table_ident))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", table_ident, column_defs))
        .execute(&mut *tx)
        .await?;

    for row in table.rows() {
        let mut query = sqlx::query(insert);
        for value in row {
            query = match value {
                Value::Null => query.bind(None::<i64>),
                Value::Integer(i) => query.bind(*i),
                Value::Real(f) => query.bind(*f),
                Value::Text(s) => query.bind(s.as_str()),
            };
        }
        query.execute(&mut *tx).await?;
    }

    tx.commit().await
}

/// Write `table` into the database at `db_path` as `table_name`, replacing it.
pub async fn write_table(table: &DecodedTable, db_path: &Path, table_name: &str) -> AppResult<()> {
    if table.columns().is_empty() {
        return Err(AppError::DatabaseWrite(format!("table {} has no columns", table_name)));
    }

    let table_ident = quote_table_name(table_name)?;
    let mut idents = Vec::with_capacity(table.columns().len());
    let mut defs = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let ident = quote_identifier(&column.name)?;
        defs.push(format!("{} {}", ident, column.column_type.sql_name()));
        idents.push(ident);
    }
    let placeholders = vec!["?"; idents.len()].join(", ");
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_ident,
        idents.join(", "),
        placeholders
    );

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .map_err(|e| AppError::DatabaseWrite(format!("{}: {}", db_path.display(), e)))?;

    let written = write_rows(&mut conn, table, &table_ident, &defs.join(", "), &insert).await;
    let closed = conn.close().await;

    written
        .and(closed)
        .map_err(|e| AppError::DatabaseWrite(format!("{}: {}", table_name, e)))
}

/// Load a table, reporting instead of propagating failure.
pub async fn load_table(
    table: &DecodedTable,
    db_path: &Path,
    table_name: &str,
    notices: &mut Vec<Notice>,
) -> bool {
    match write_table(table, db_path, table_name).await {
        Ok(()) => {
            info!(
                table = %table_name,
                db = %db_path.display(),
                rows = table.row_count(),
                "Loaded table"
            );
            true
        }
        Err(e) => {
            error!(table = %table_name, error = %e, "Error creating database");
            notices.push(Notice::error(format!("Error creating database: {}", e)));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::delimited::decode_csv;
    use sqlx::Row;

    async fn read_back(db_path: &Path, sql: &str) -> Vec<sqlx::sqlite::SqliteRow> {
        let options = SqliteConnectOptions::new().filename(db_path);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        let rows = sqlx::query(sql).fetch_all(&mut conn).await.unwrap();
        conn.close().await.unwrap();
        rows
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("AE").unwrap(), "\"AE\"");
        assert_eq!(quote_identifier("my table").unwrap(), "\"my table\"");
        assert_eq!(quote_identifier("a\"b").unwrap(), "\"a\"\"b\"");
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("a\0b").is_err());
        assert_eq!(quote_identifier("sqlite_flag").unwrap(), "\"sqlite_flag\"");

        assert!(quote_table_name("SQLITE_master").is_err());
        assert!(quote_table_name("").is_err());
        assert_eq!(quote_table_name("AE").unwrap(), "\"AE\"");
    }

    #[tokio::test]
    async fn test_sqlite_prefixed_column_loads() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("flags.db");
        let table = decode_csv("flags.csv", b"sqlite_flag,v\n1,2\n").unwrap();

        write_table(&table, &db_path, "flags").await.unwrap();

        let rows = read_back(&db_path, "SELECT sqlite_flag FROM flags").await;
        assert_eq!(rows[0].get::<i64, _>("sqlite_flag"), 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("temp_sample.db");
        let table = decode_csv("sample.csv", b"id,name\n1,alice\n2,bob\n").unwrap();

        let mut notices = Vec::new();
        assert!(load_table(&table, &db_path, "sample", &mut notices).await);
        assert!(load_table(&table, &db_path, "sample", &mut notices).await);
        assert!(notices.is_empty());

        let rows = read_back(&db_path, "SELECT id, name FROM sample ORDER BY id").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<i64, _>("id"), 1);
        assert_eq!(rows[1].get::<String, _>("name"), "bob");

        let tables = read_back(&db_path, "SELECT name FROM sqlite_master WHERE type = 'table'").await;
        assert_eq!(tables.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_with_different_shape() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("lb.db");
        let first = decode_csv("lb.csv", b"a,b\n1,2\n3,4\n5,6\n").unwrap();
        let second = decode_csv("lb.csv", b"c\nx\n").unwrap();

        write_table(&first, &db_path, "lb").await.unwrap();
        write_table(&second, &db_path, "lb").await.unwrap();

        let rows = read_back(&db_path, "SELECT * FROM lb").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String, _>("c"), "x");
    }

    #[tokio::test]
    async fn test_unusual_names_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("weird.db");
        let table = decode_csv("x.csv", b"subject id,\"dose \"\"mg\"\"\"\n1,5\n").unwrap();

        write_table(&table, &db_path, "visit-2 (final)").await.unwrap();

        let rows = read_back(&db_path, "SELECT \"dose \"\"mg\"\"\" AS dose FROM \"visit-2 (final)\"").await;
        assert_eq!(rows[0].get::<i64, _>("dose"), 5);
    }

    #[tokio::test]
    async fn test_headers_differing_in_case_load() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ids.db");
        let table = decode_csv("ids.csv", b"id,ID\n1,2\n").unwrap();

        write_table(&table, &db_path, "ids").await.unwrap();

        let rows = read_back(&db_path, "SELECT \"ID.1\" AS second FROM ids").await;
        assert_eq!(rows[0].get::<i64, _>("second"), 2);
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("missing-dir").join("x.db");
        let table = decode_csv("x.csv", b"a\n1\n").unwrap();

        let mut notices = Vec::new();
        assert!(!load_table(&table, &db_path, "x", &mut notices).await);
        assert_eq!(notices.len(), 1);

        assert!(!load_table(&table, &dir.path().join("y.db"), "sqlite_x", &mut notices).await);
        assert_eq!(notices.len(), 2);
    }
}
