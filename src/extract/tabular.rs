//! Delimited (CSV) and embedded relational (SQLite) extraction.
//!
//! Both render a short header block followed by one paragraph per row, and
//! record each row as a [`TableRowExcerpt`](crate::models::TableRowExcerpt).
//! A CSV file is rendered in full, with excerpts for its first `max_rows`
//! rows; a SQLite table is read up to `max_rows` rows.

use sqlx::Row;

use super::TextBuilder;
use crate::db;
use crate::error::{RagError, Result};
use crate::models::ExtractedText;

fn clean(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `text` is the already-decoded file content. `table` labels the excerpts.
pub fn extract_csv(text: &str, table: &str, max_rows: usize) -> Result<ExtractedText> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| RagError::extraction(format!("CSV header row unreadable: {}", e)))?
        .iter()
        .map(clean)
        .collect();

    let mut out = TextBuilder::default();
    out.push_block(&format!("[Headers] {}", headers.join(" | ")));

    for (row, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| RagError::extraction(format!("CSV row {} unreadable: {}", row + 1, e)))?;

        let fields: Vec<String> = record
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(i, v)| match headers.get(i).filter(|h| !h.is_empty()) {
                Some(h) => format!("{}: {}", h, clean(v)),
                None => format!("column {}: {}", i + 1, clean(v)),
            })
            .collect();
        if fields.is_empty() {
            continue;
        }
        // Every row is searchable; only the first `max_rows` carry an origin.
        if row < max_rows {
            out.push_row(table, row, &fields.join("; "));
        } else {
            out.push_block(&fields.join("; "));
        }
    }

    Ok(out.finish())
}

fn sqlite_err(e: sqlx::Error) -> RagError {
    RagError::extraction(format!("SQLite extraction failed: {}", e))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Every table in schema order, each with up to `max_rows` rows.
pub async fn extract_sqlite(bytes: &[u8], max_rows: usize) -> Result<ExtractedText> {
    // sqlx needs a path; the temp file lives until the pool is closed.
    let file = tempfile::NamedTempFile::new()?;
    tokio::fs::write(file.path(), bytes).await?;

    let pool = db::open_existing(file.path()).await.map_err(sqlite_err)?;
    let result = read_tables(&pool, max_rows).await;
    pool.close().await;
    result
}

async fn read_tables(pool: &sqlx::SqlitePool, max_rows: usize) -> Result<ExtractedText> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
    )
    .fetch_all(pool)
    .await
    .map_err(sqlite_err)?;

    let mut out = TextBuilder::default();
    for table in &tables {
        let columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(pool)
            .await
            .map_err(sqlite_err)?
            .iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()
            .map_err(sqlite_err)?;
        if columns.is_empty() {
            continue;
        }

        let select = columns
            .iter()
            .map(|c| {
                let c = quote_ident(c);
                format!(
                    "CASE WHEN typeof({0}) = 'blob' THEN '<blob>' ELSE CAST({0} AS TEXT) END",
                    c
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} LIMIT {}",
            select,
            quote_ident(table),
            max_rows
        );
        let rows = sqlx::query(&sql)
            .fetch_all(pool)
            .await
            .map_err(sqlite_err)?;

        out.push_block(&format!("[Table: {}]", table));
        out.push_block(&format!("Columns: {}", columns.join(", ")));
        for (i, row) in rows.iter().enumerate() {
            let fields: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(c, name)| {
                    let value: Option<String> = row.try_get(c).unwrap_or(None);
                    format!(
                        "{}: {}",
                        name,
                        value.map(|v| clean(&v)).unwrap_or_else(|| "NULL".to_string())
                    )
                })
                .collect();
            out.push_row(table, i, &fields.join("; "));
        }
    }

    Ok(out.finish())
}
