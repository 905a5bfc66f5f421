//! Core traits for dialect-independent consistency checking.
//!
//! - [`SqlConnection`]: the SQL execution handle a node exposes
//! - [`Dialect`]: SQL syntax strategy for different database engines
//!
//! The digest engine and result store never format dialect-specific SQL
//! themselves; they ask the [`Dialect`] strategy for every fragment and run the
//! result through a [`SqlConnection`].

use async_trait::async_trait;

use crate::error::Result;

use super::value::{Row, SqlValue};

/// SQL execution handle for one node.
///
/// Implementations own exactly one server session so that snapshot and
/// change-logging state apply to every statement issued through the handle.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// Declared engine type (e.g., "mysql", "postgres").
    fn engine(&self) -> &str;

    /// Run a query and return all rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Open a read-consistent snapshot on this session.
    async fn begin_snapshot(&self) -> Result<()>;

    /// Release the snapshot opened by [`begin_snapshot`](Self::begin_snapshot).
    async fn end_snapshot(&self) -> Result<()>;

    /// Enable or disable replication of this session's own writes.
    async fn set_change_logging(&self, enabled: bool) -> Result<()>;

    /// Close the session.
    async fn close(&self) {}
}

/// SQL syntax strategy for different database engines.
///
/// # Design Pattern
///
/// This is a **Strategy** pattern - different implementations provide
/// interchangeable SQL syntax rules. The `DialectImpl` enum in the `drivers`
/// module dispatches to the concrete strategies.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "mysql", "postgres").
    fn name(&self) -> &str;

    /// Validate and quote an identifier.
    ///
    /// - MySQL: `` `identifier` ``
    /// - PostgreSQL: `"identifier"`
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Validate and quote a schema-qualified table name.
    fn qualify(&self, schema: &str, table: &str) -> Result<String>;

    /// Get a parameter placeholder for the given 1-based index.
    ///
    /// - MySQL: `?`
    /// - PostgreSQL: `$1`, `$2`, etc.
    fn param_placeholder(&self, index: usize) -> String;

    /// Placeholder for a 64-bit integer parameter compared against a key column.
    fn int_param_placeholder(&self, index: usize) -> String;

    /// Row window over an ordered result.
    fn window_clause(&self, offset: i64, limit: i64) -> String;

    /// Query listing `(column_name, data_type, ordinal_position)` for a table.
    ///
    /// Parameters: schema, table.
    fn columns_query(&self) -> String;

    /// Query listing primary key column names in key order.
    ///
    /// Parameters: schema, table.
    fn primary_key_query(&self) -> String;

    /// Query listing base table names in a schema.
    ///
    /// Parameters: schema.
    fn tables_query(&self) -> String;

    /// Insert-or-update statement keyed on `key_columns`.
    ///
    /// Only `update_columns` are overwritten when the key already exists.
    fn build_upsert(
        &self,
        qualified_table: &str,
        columns: &[&str],
        key_columns: &[&str],
        update_columns: &[&str],
    ) -> Result<String>;

    /// Idempotent schema creation.
    fn create_schema_sql(&self, schema: &str) -> Result<String>;

    /// Idempotent creation of the result store table.
    fn result_table_ddl(&self, qualified_table: &str) -> String;
}
