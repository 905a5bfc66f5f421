//! Digest engine.
//!
//! Computes `(count, digest)` for the ordered rows a [`CheckDescriptor`]
//! selects on one node. Rows are pulled through the node's
//! [`SqlConnection`], rendered canonically and folded into a
//! [`DigestAccumulator`], so two nodes holding the same rows produce the same
//! result regardless of dialect.
//!
//! Position (row window) checks run inside a read-consistent snapshot that is
//! opened and released here. Key-range checks are stable without one.

mod accumulator;
mod binding;
mod catalog;

pub use accumulator::{column_salt, sha256_hex, DigestAccumulator, DigestResult, DIGEST_LEN};
pub use binding::DialectBinding;
pub use catalog::{list_tables, load_table_meta};

use tracing::{debug, warn};

use crate::check::{CheckDescriptor, CheckMethod};
use crate::core::schema::TableMeta;
use crate::core::traits::{Dialect, SqlConnection};
use crate::core::value::SqlValue;
use crate::drivers::DialectImpl;
use crate::error::{CheckError, Result};

/// Load table metadata on `conn` and compute the digest.
pub async fn compute_digest(
    descriptor: &CheckDescriptor,
    conn: &dyn SqlConnection,
) -> Result<DigestResult> {
    DialectImpl::for_connection(conn)?;
    let meta = load_table_meta(conn, descriptor.table()).await?;
    compute_with_meta(descriptor, &meta, conn).await
}

/// Compute the digest with already-loaded metadata.
///
/// The key shape is validated before any SQL reaches `conn`.
pub async fn compute_with_meta(
    descriptor: &CheckDescriptor,
    meta: &TableMeta,
    conn: &dyn SqlConnection,
) -> Result<DigestResult> {
    let binding = DialectBinding::new(DialectImpl::for_connection(conn)?, meta);
    let (sql, params) = binding.select_sql(descriptor)?;

    match descriptor.method() {
        CheckMethod::PrimaryKey => run_digest(descriptor, meta, conn, &sql, &params).await,
        CheckMethod::Position => {
            conn.begin_snapshot().await?;
            let result = run_digest(descriptor, meta, conn, &sql, &params).await;
            if let Err(e) = conn.end_snapshot().await {
                warn!("Failed to release snapshot after {}: {}", descriptor, e);
            }
            result
        }
    }
}

/// Compute the digest on a connection that already holds a snapshot.
pub async fn compute_within_snapshot(
    descriptor: &CheckDescriptor,
    meta: &TableMeta,
    conn: &dyn SqlConnection,
) -> Result<DigestResult> {
    let binding = DialectBinding::new(DialectImpl::for_connection(conn)?, meta);
    let (sql, params) = binding.select_sql(descriptor)?;
    run_digest(descriptor, meta, conn, &sql, &params).await
}

async fn run_digest(
    descriptor: &CheckDescriptor,
    meta: &TableMeta,
    conn: &dyn SqlConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<DigestResult> {
    let rows = conn.query(sql, params).await?;
    let mut acc = DigestAccumulator::for_columns(
        &meta.columns,
        descriptor.check_names(),
        descriptor.check_types(),
    );
    for row in &rows {
        acc.push_row(row);
    }
    let result = acc.finish();
    debug!(
        "{} on {}: {} rows, digest {}",
        descriptor,
        conn.engine(),
        result.count,
        result.digest
    );
    Ok(result)
}

/// Canonical row values selected by a descriptor.
pub async fn fetch_rows(
    descriptor: &CheckDescriptor,
    meta: &TableMeta,
    conn: &dyn SqlConnection,
) -> Result<Vec<Vec<String>>> {
    let binding = DialectBinding::new(DialectImpl::for_connection(conn)?, meta);
    let (sql, params) = binding.select_sql(descriptor)?;
    let rows = conn.query(&sql, &params).await?;
    Ok(rows
        .iter()
        .map(|row| row.iter().map(SqlValue::canonical_text).collect())
        .collect())
}

/// `(min key, max key)` of the single integer key; `None` for an empty table.
pub async fn key_bounds(meta: &TableMeta, conn: &dyn SqlConnection) -> Result<Option<(i64, i64)>> {
    let binding = DialectBinding::new(DialectImpl::for_connection(conn)?, meta);
    let sql = binding.key_bounds_sql()?;
    let rows = conn.query(&sql, &[]).await?;
    let row = rows.into_iter().next().unwrap_or_default();
    match row.as_slice() {
        [min, max, ..] if !min.is_null() && !max.is_null() => {
            let min = min.as_i64().ok_or_else(|| bad_bound(&binding, "MIN"))?;
            let max = max.as_i64().ok_or_else(|| bad_bound(&binding, "MAX"))?;
            Ok(Some((min, max)))
        }
        _ => Ok(None),
    }
}

/// Number of rows in the table.
pub async fn row_count(meta: &TableMeta, conn: &dyn SqlConnection) -> Result<i64> {
    let binding = DialectBinding::new(DialectImpl::for_connection(conn)?, meta);
    let rows = conn.query(&binding.count_sql()?, &[]).await?;
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_bound(&binding, "COUNT"))
}

fn bad_bound(binding: &DialectBinding<'_>, what: &str) -> CheckError {
    CheckError::execution(
        binding.dialect().name(),
        format!("{} query returned a non-integer value", what),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableRef;
    use crate::testing::{MemoryConnection, MemoryTable};

    fn orders(engine: &str) -> MemoryConnection {
        let conn = MemoryConnection::new(engine);
        conn.add_table(
            MemoryTable::new("shop", "orders")
                .column("id", "int")
                .column("item", "varchar")
                .column("qty", "int")
                .primary_key(&["id"])
                .row(vec![SqlValue::I32(1), "apple".into(), SqlValue::I32(3)])
                .row(vec![SqlValue::I32(2), "pear".into(), SqlValue::Null])
                .row(vec![SqlValue::I32(3), "plum".into(), SqlValue::I32(7)])
                .row(vec![SqlValue::I32(4), "fig".into(), SqlValue::I32(1)]),
        );
        conn
    }

    fn descriptor(method: &str, offset: Option<i64>, limit: Option<i64>) -> CheckDescriptor {
        CheckDescriptor::create(
            1,
            TableRef::new("shop", "orders"),
            offset,
            limit,
            method,
            true,
            true,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let conn = orders("mysql");
        let d = descriptor("pk", Some(1), Some(4));
        let a = compute_digest(&d, &conn).await.unwrap();
        let b = compute_digest(&d, &conn).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.count, 4);
        assert_eq!(a.digest.len(), DIGEST_LEN);
    }

    #[tokio::test]
    async fn test_dialects_agree() {
        let my = orders("mysql");
        let pg = orders("postgres");
        // PostgreSQL spells the same logical types differently
        pg.retype_column("shop", "orders", "id", "integer");
        pg.retype_column("shop", "orders", "qty", "integer");
        pg.retype_column("shop", "orders", "item", "character varying");
        for d in [descriptor("pk", Some(1), Some(4)), descriptor("limit", Some(1), Some(2))] {
            let a = compute_digest(&d, &my).await.unwrap();
            let b = compute_digest(&d, &pg).await.unwrap();
            assert_eq!(a, b, "{}", d);
        }
    }

    fn payments(engine: &str, amount: &str, payload: &str, paid_at: &str, zone: i32) -> MemoryConnection {
        let zone = chrono::FixedOffset::east_opt(zone * 3600).unwrap();
        let paid = |h: u32| {
            let utc = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(h, 30, 0)
                .unwrap();
            SqlValue::DateTimeOffset(chrono::DateTime::from_naive_utc_and_offset(utc, zone))
        };
        let conn = MemoryConnection::new(engine);
        conn.add_table(
            MemoryTable::new("shop", "payments")
                .column("id", "int")
                .column("amount", amount)
                .column("payload", payload)
                .column("paid_at", paid_at)
                .primary_key(&["id"])
                .row(vec![
                    SqlValue::I32(1),
                    SqlValue::Decimal(rust_decimal::Decimal::new(1250, 2)),
                    SqlValue::Bytes(vec![0x00, 0xff, 0x10]),
                    paid(9),
                ])
                .row(vec![
                    SqlValue::I32(2),
                    SqlValue::Decimal(rust_decimal::Decimal::new(-7, 3)),
                    SqlValue::Bytes(Vec::new()),
                    paid(23),
                ])
                .row(vec![SqlValue::I32(3), SqlValue::Null, SqlValue::Null, SqlValue::Null]),
        );
        conn
    }

    #[tokio::test]
    async fn test_dialects_agree_on_decimal_bytes_and_zoned_time() {
        let my = payments("mysql", "decimal(10,3)", "longblob", "timestamptz", 2);
        let pg = payments("postgres", "numeric(10,3)", "bytea", "timestamp with time zone", 0);
        for (method, offset) in [("pk", 1), ("limit", 0)] {
            let d = CheckDescriptor::create(
                1,
                TableRef::new("shop", "payments"),
                Some(offset),
                Some(3),
                method,
                true,
                true,
            )
            .unwrap();
            let a = compute_digest(&d, &my).await.unwrap();
            let b = compute_digest(&d, &pg).await.unwrap();
            assert_eq!(a.count, 3, "{}", d);
            assert_eq!(a, b, "{}", d);
        }

        let altered = payments("postgres", "numeric(10,3)", "bytea", "timestamp with time zone", 0);
        altered.update_row("shop", "payments", 1, 3, SqlValue::Null);
        let d = CheckDescriptor::create(1, TableRef::new("shop", "payments"), None, None, "pk", true, true)
            .unwrap();
        assert_ne!(
            compute_digest(&d, &pg).await.unwrap(),
            compute_digest(&d, &altered).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_type_drift_detected_with_check_types() {
        let reference = orders("mysql");
        let drifted = orders("mysql");
        drifted.retype_column("shop", "orders", "qty", "bigint");

        let typed = descriptor("pk", Some(1), Some(4));
        assert_ne!(
            compute_digest(&typed, &reference).await.unwrap(),
            compute_digest(&typed, &drifted).await.unwrap()
        );

        let untyped = CheckDescriptor::create(
            1,
            TableRef::new("shop", "orders"),
            Some(1),
            Some(4),
            "pk",
            true,
            false,
        )
        .unwrap();
        assert_eq!(
            compute_digest(&untyped, &reference).await.unwrap(),
            compute_digest(&untyped, &drifted).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_value_change_detected() {
        let reference = orders("mysql");
        let target = orders("mysql");
        target.update_row("shop", "orders", 3, 2, SqlValue::I32(8));
        let d = descriptor("pk", Some(1), Some(4));
        let a = compute_digest(&d, &reference).await.unwrap();
        let b = compute_digest(&d, &target).await.unwrap();
        assert_eq!(a.count, b.count);
        assert_ne!(a.digest, b.digest);
    }

    #[tokio::test]
    async fn test_pk_range_is_half_open() {
        let conn = orders("mysql");
        let r = compute_digest(&descriptor("pk", Some(2), Some(2)), &conn).await.unwrap();
        assert_eq!(r.count, 2);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let conn = orders("mysql");
        let r = compute_digest(&descriptor("pk", Some(100), Some(10)), &conn)
            .await
            .unwrap();
        assert_eq!(r.count, 0);
        let meta = load_table_meta(&conn, &TableRef::new("shop", "orders")).await.unwrap();
        let salt = column_salt(&meta.columns, true, true).unwrap();
        assert_eq!(r.digest, salt[32..]);
    }

    #[tokio::test]
    async fn test_position_runs_in_snapshot() {
        let conn = orders("postgres");
        compute_digest(&descriptor("limit", Some(0), Some(2)), &conn)
            .await
            .unwrap();
        let log = conn.statements();
        let begin = log.iter().position(|s| s == "BEGIN SNAPSHOT").unwrap();
        let select = log.iter().position(|s| s.contains("LIMIT 2 OFFSET 0")).unwrap();
        let end = log.iter().position(|s| s == "END SNAPSHOT").unwrap();
        assert!(begin < select && select < end);
        assert!(!conn.in_snapshot());
    }

    #[tokio::test]
    async fn test_snapshot_released_on_failure() {
        let conn = orders("mysql");
        conn.fail_on("LIMIT");
        let err = compute_digest(&descriptor("limit", Some(0), Some(2)), &conn).await;
        assert!(matches!(err, Err(CheckError::DialectExecution { .. })));
        assert!(!conn.in_snapshot());
    }

    #[tokio::test]
    async fn test_composite_key_rejected_without_sql() {
        let conn = MemoryConnection::new("mysql");
        conn.add_table(
            MemoryTable::new("shop", "lines")
                .column("order_id", "int")
                .column("line_no", "int")
                .primary_key(&["order_id", "line_no"]),
        );
        let meta = load_table_meta(&conn, &TableRef::new("shop", "lines"))
            .await
            .unwrap();
        conn.clear_statements();

        let d = CheckDescriptor::create(
            9,
            TableRef::new("shop", "lines"),
            Some(0),
            Some(10),
            "pk",
            true,
            true,
        )
        .unwrap();
        let err = compute_with_meta(&d, &meta, &conn).await.unwrap_err();
        assert!(matches!(err, CheckError::UnsupportedKeyShape { .. }));
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_engine() {
        let conn = MemoryConnection::new("oracle");
        let err = compute_digest(&descriptor("pk", None, None), &conn)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::UnsupportedDialect(_)));
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_rows_and_bounds() {
        let conn = orders("mysql");
        let meta = load_table_meta(&conn, &TableRef::new("shop", "orders")).await.unwrap();
        let rows = fetch_rows(&descriptor("pk", Some(2), Some(1)), &meta, &conn)
            .await
            .unwrap();
        assert_eq!(rows, vec![vec!["2".to_string(), "pear".into(), "NULL".into()]]);
        assert_eq!(key_bounds(&meta, &conn).await.unwrap(), Some((1, 4)));
        assert_eq!(row_count(&meta, &conn).await.unwrap(), 4);
    }
}
