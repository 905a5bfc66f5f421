//! Persistent check results.
//!
//! Every node keeps a `<metadata_schema>.consistency` table keyed by
//! `(db, tbl, id)`. A node records its own digest in the `this_*` columns; the
//! reference digest lands in the `master_*` columns, written either by the
//! scan orchestrator (direct mode) or by a replicated write applied on the
//! target (replicated mode).

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::check::{CheckDescriptor, CheckMethod};
use crate::core::traits::{Dialect, SqlConnection};
use crate::core::value::{Row, SqlValue};
use crate::digest::DigestResult;
use crate::drivers::DialectImpl;
use crate::error::{CheckError, Result};

/// Name of the result table inside the metadata schema.
pub const RESULT_TABLE: &str = "consistency";

const LOCAL_COLUMNS: &[&str] = &[
    "db", "tbl", "id", "row_offset", "row_limit", "this_crc", "this_cnt", "ts", "method",
];
const LOCAL_UPDATES: &[&str] = &["row_offset", "row_limit", "this_crc", "this_cnt", "ts", "method"];

const REFERENCE_COLUMNS: &[&str] = &[
    "db", "tbl", "id", "row_offset", "row_limit", "master_crc", "master_cnt", "ts", "method",
];
// ts is set on insert only; the local answer owns it afterwards
const REFERENCE_UPDATES: &[&str] = &["master_crc", "master_cnt"];

const KEY_COLUMNS: &[&str] = &["db", "tbl", "id"];

/// One row of the result table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub schema: String,
    pub table: String,
    pub id: i64,
    pub row_offset: Option<i64>,
    pub row_limit: Option<i64>,
    pub this_digest: Option<String>,
    pub this_count: Option<i64>,
    pub master_digest: Option<String>,
    pub master_count: Option<i64>,
    pub timestamp: Option<NaiveDateTime>,
    pub method: Option<String>,
}

impl ResultRow {
    /// Both the local and the reference result are present.
    pub fn is_resolved(&self) -> bool {
        self.this_digest.is_some()
            && self.this_count.is_some()
            && self.master_digest.is_some()
            && self.master_count.is_some()
    }

    /// Resolved with equal counts and digests.
    pub fn passed(&self) -> bool {
        self.is_resolved()
            && self.this_count == self.master_count
            && self.this_digest == self.master_digest
    }

    /// Local result, when recorded.
    pub fn local(&self) -> Option<DigestResult> {
        Some(DigestResult {
            count: self.this_count?,
            digest: self.this_digest.clone()?,
        })
    }

    /// Reference result, when recorded.
    pub fn reference(&self) -> Option<DigestResult> {
        Some(DigestResult {
            count: self.master_count?,
            digest: self.master_digest.clone()?,
        })
    }
}

/// Result table on one node, accessed through that node's control connection.
#[derive(Clone)]
pub struct ResultStore {
    conn: Arc<dyn SqlConnection>,
    dialect: DialectImpl,
    metadata_schema: String,
}

impl ResultStore {
    /// Bind a store to a control connection.
    pub fn new(conn: Arc<dyn SqlConnection>, metadata_schema: impl Into<String>) -> Result<Self> {
        let dialect = DialectImpl::for_connection(conn.as_ref())?;
        Ok(Self {
            conn,
            dialect,
            metadata_schema: metadata_schema.into(),
        })
    }

    pub fn metadata_schema(&self) -> &str {
        &self.metadata_schema
    }

    pub fn connection(&self) -> &Arc<dyn SqlConnection> {
        &self.conn
    }

    fn qualified_table(&self) -> Result<String> {
        self.dialect.qualify(&self.metadata_schema, RESULT_TABLE)
    }

    /// Create the metadata schema and result table if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        let create_schema = self.dialect.create_schema_sql(&self.metadata_schema)?;
        self.conn.execute(&create_schema, &[]).await?;

        let ddl = self.dialect.result_table_ddl(&self.qualified_table()?);
        self.conn.execute(&ddl, &[]).await?;

        info!(
            "Result store ready at {}.{} on {}",
            self.metadata_schema,
            RESULT_TABLE,
            self.conn.engine()
        );
        Ok(())
    }

    /// Upsert this node's own count and digest.
    pub async fn record_local(&self, descriptor: &CheckDescriptor, result: &DigestResult) -> Result<()> {
        let sql = self.dialect.build_upsert(
            &self.qualified_table()?,
            LOCAL_COLUMNS,
            KEY_COLUMNS,
            LOCAL_UPDATES,
        )?;
        let (offset, limit) = range_params(descriptor);
        let params = vec![
            SqlValue::from(descriptor.schema()),
            SqlValue::from(descriptor.table_name()),
            SqlValue::I64(descriptor.id()),
            offset,
            limit,
            SqlValue::from(result.digest.as_str()),
            SqlValue::I64(result.count),
            SqlValue::DateTime(Utc::now().naive_utc()),
            SqlValue::from(descriptor.method().as_str()),
        ];
        self.conn.execute(&sql, &params).await?;
        debug!(
            "Recorded local result for {}: {} rows, {}",
            descriptor, result.count, result.digest
        );
        Ok(())
    }

    /// Upsert the reference node's count and digest.
    pub async fn record_reference(
        &self,
        descriptor: &CheckDescriptor,
        result: &DigestResult,
    ) -> Result<()> {
        let sql = self.dialect.build_upsert(
            &self.qualified_table()?,
            REFERENCE_COLUMNS,
            KEY_COLUMNS,
            REFERENCE_UPDATES,
        )?;
        let (offset, limit) = range_params(descriptor);
        let params = vec![
            SqlValue::from(descriptor.schema()),
            SqlValue::from(descriptor.table_name()),
            SqlValue::I64(descriptor.id()),
            offset,
            limit,
            SqlValue::from(result.digest.as_str()),
            SqlValue::I64(result.count),
            SqlValue::DateTime(Utc::now().naive_utc()),
            SqlValue::from(descriptor.method().as_str()),
        ];
        self.conn.execute(&sql, &params).await?;
        debug!(
            "Recorded reference result for {}: {} rows, {}",
            descriptor, result.count, result.digest
        );
        Ok(())
    }

    /// Fetch the result row of one check.
    ///
    /// # Errors
    ///
    /// `NotFound` when no node has recorded anything for the id yet.
    pub async fn fetch(&self, schema: &str, table: &str, id: i64) -> Result<ResultRow> {
        let sql = format!(
            "SELECT row_offset, row_limit, this_crc, this_cnt, master_crc, master_cnt, ts, method \
             FROM {} WHERE db = {} AND tbl = {} AND id = {}",
            self.qualified_table()?,
            self.dialect.param_placeholder(1),
            self.dialect.param_placeholder(2),
            self.dialect.int_param_placeholder(3)
        );
        let rows = self
            .conn
            .query(&sql, &[SqlValue::from(schema), SqlValue::from(table), SqlValue::I64(id)])
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| CheckError::NotFound(format!("check result {}.{}#{}", schema, table, id)))?;
        self.decode(schema, table, id, row)
    }

    fn decode(&self, schema: &str, table: &str, id: i64, row: Row) -> Result<ResultRow> {
        let mut values = row.into_iter();
        let mut next = || values.next().unwrap_or(SqlValue::Null);
        let row_offset = opt_i64(next());
        let row_limit = opt_i64(next());
        let this_digest = opt_text(next());
        let this_count = opt_i64(next());
        let master_digest = opt_text(next());
        let master_count = opt_i64(next());
        let timestamp = match next() {
            SqlValue::DateTime(ts) => Some(ts),
            SqlValue::DateTimeOffset(ts) => Some(ts.naive_utc()),
            _ => None,
        };
        let method = opt_text(next());

        if let Some(m) = &method {
            CheckMethod::parse(m)?;
        }

        Ok(ResultRow {
            schema: schema.to_string(),
            table: table.to_string(),
            id,
            row_offset,
            row_limit,
            this_digest,
            this_count,
            master_digest,
            master_count,
            timestamp,
            method,
        })
    }

    /// Largest id recorded for a table, if any.
    pub async fn max_id(&self, schema: &str, table: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX(id) FROM {} WHERE db = {} AND tbl = {}",
            self.qualified_table()?,
            self.dialect.param_placeholder(1),
            self.dialect.param_placeholder(2)
        );
        let rows = self
            .conn
            .query(&sql, &[SqlValue::from(schema), SqlValue::from(table)])
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .and_then(|v| v.as_i64()))
    }

    /// Delete results recorded before `cutoff`. Returns the number removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE ts < {}",
            self.qualified_table()?,
            self.dialect.param_placeholder(1)
        );
        let removed = self
            .conn
            .execute(&sql, &[SqlValue::DateTime(cutoff.naive_utc())])
            .await?;
        if removed > 0 {
            info!(
                "Purged {} check results older than {} on {}",
                removed,
                cutoff,
                self.conn.engine()
            );
        }
        Ok(removed)
    }
}

fn range_params(descriptor: &CheckDescriptor) -> (SqlValue, SqlValue) {
    match descriptor.range() {
        Some(range) => (SqlValue::I64(range.offset), SqlValue::I64(range.limit)),
        None => (SqlValue::Null, SqlValue::Null),
    }
}

fn opt_i64(value: SqlValue) -> Option<i64> {
    value.as_i64()
}

fn opt_text(value: SqlValue) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.canonical_text())
    }
}
