//! Postgres bulk-load sink.
//!
//! Each batch is one transaction:
//! 1. `CREATE TEMPORARY TABLE <table>_staging (LIKE <table> INCLUDING ALL) ON COMMIT DROP`
//! 2. `COPY <table>_staging (...) FROM STDIN` with the batch in text format
//! 3. `INSERT INTO <table> SELECT ... FROM <table>_staging` and count the inserted rows
//!
//! The COPY step avoids per-row statement overhead; the final insert still goes
//! through the destination table's constraints. The staging table disappears on
//! commit, and any failure rolls the whole batch back.

use super::error::IngestError;
use super::loader::{Batch, BatchSink};
use super::record::{ColumnValue, TIMESTAMP_FORMAT, TRIP_COLUMNS, TRIP_TABLE};
use async_trait::async_trait;
use rocket_db_pools::sqlx::{self, PgPool};
use std::fmt::Write as _;

/// Writes batches into `table` through a transaction-scoped staging table.
#[derive(Clone)]
pub struct PgBatchSink {
    pool: PgPool,
    table: String,
    columns: Vec<&'static str>,
}

impl PgBatchSink {
    pub fn new(pool: PgPool) -> Self {
        Self::for_table(pool, TRIP_TABLE, &TRIP_COLUMNS)
    }

    pub fn for_table(pool: PgPool, table: &str, columns: &[&'static str]) -> Self {
        Self {
            pool,
            table: table.to_string(),
            columns: columns.to_vec(),
        }
    }

    fn staging_table(&self) -> String {
        format!("{}_staging", self.table)
    }

    async fn load(&self, batch: &Batch) -> Result<u64, sqlx::Error> {
        let staging = self.staging_table();
        let column_list = self.columns.join(", ");
        let payload = encode_copy_text(batch);

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE {staging} (LIKE {} INCLUDING ALL) ON COMMIT DROP",
            self.table
        ))
        .execute(&mut *tx)
        .await?;

        let mut copy = tx
            .copy_in_raw(&format!("COPY {staging} ({column_list}) FROM STDIN"))
            .await?;
        copy.send(payload.as_bytes()).await?;
        copy.finish().await?;

        let inserted: i64 = sqlx::query_scalar(&format!(
            r#"WITH ins AS (
                   INSERT INTO {table} ({column_list})
                   SELECT {column_list} FROM {staging}
                   RETURNING 1
               )
               SELECT COUNT(*) FROM ins"#,
            table = self.table
        ))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.max(0) as u64)
    }
}

#[async_trait]
impl BatchSink for PgBatchSink {
    async fn write_batch(&self, batch: &Batch) -> Result<u64, IngestError> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.load(batch).await.map_err(|source| IngestError::BulkLoad {
            table: self.table.clone(),
            source,
        })
    }
}

/// Render a batch in COPY text format: tab separated, `\N` for NULL.
pub fn encode_copy_text(batch: &Batch) -> String {
    let mut out = String::with_capacity(batch.len() * 160);
    for row in batch.rows() {
        for (idx, value) in row.iter().enumerate() {
            if idx > 0 {
                out.push('\t');
            }
            write_value(&mut out, value);
        }
        out.push('\n');
    }
    out
}

fn write_value(out: &mut String, value: &ColumnValue) {
    match value {
        ColumnValue::Null => out.push_str("\\N"),
        ColumnValue::Text(text) => escape_text(out, text),
        ColumnValue::Timestamp(ts) => {
            let _ = write!(out, "{}", ts.format(TIMESTAMP_FORMAT));
        }
        ColumnValue::Integer(v) => {
            let _ = write!(out, "{v}");
        }
        ColumnValue::Float(v) => {
            let _ = write!(out, "{v}");
        }
    }
}

fn escape_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::loader::tests::record;
    use crate::ingest::record::RowBuilder;

    #[test]
    fn encodes_rows_in_column_order() {
        let mut batch = Batch::default();
        batch.push(record().to_row());

        let encoded = encode_copy_text(&batch);
        let fields: Vec<&str> = encoded.trim_end_matches('\n').split('\t').collect();

        assert_eq!(fields.len(), TRIP_COLUMNS.len());
        assert_eq!(fields[0], "Helix");
        assert_eq!(fields[1], "2024-03-01 08:00:00");
        assert_eq!(fields[3], "1");
        assert_eq!(fields[4], "0.8");
        assert_eq!(fields[9], "Cash");
        assert!(fields[10..].iter().all(|f| *f == "\\N"));
    }

    #[test]
    fn escapes_copy_metacharacters() {
        let mut batch = Batch::default();
        batch.push(
            RowBuilder::default()
                .text("a\tb")
                .text("back\\slash")
                .text("line\nbreak")
                .optional_float(Some(-2.5))
                .build(),
        );

        assert_eq!(
            encode_copy_text(&batch),
            "a\\tb\tback\\\\slash\tline\\nbreak\t-2.5\n"
        );
    }

    #[tokio::test]
    async fn staging_table_is_derived_from_destination() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let sink = PgBatchSink::new(pool);
        assert_eq!(sink.staging_table(), "nyc_trip_staging");
    }
}
