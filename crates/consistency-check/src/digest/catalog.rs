//! Catalog lookups through the dialect's information_schema queries.

use tracing::debug;

use crate::core::schema::{ColumnMeta, TableMeta, TableRef};
use crate::core::traits::{Dialect, SqlConnection};
use crate::core::value::SqlValue;
use crate::drivers::DialectImpl;
use crate::error::{CheckError, Result};

/// Load columns and primary key of a table.
///
/// # Errors
///
/// `NotFound` when the table has no columns on this node.
pub async fn load_table_meta(conn: &dyn SqlConnection, table: &TableRef) -> Result<TableMeta> {
    let dialect = DialectImpl::for_connection(conn)?;
    let params = [
        SqlValue::from(table.schema.as_str()),
        SqlValue::from(table.name.as_str()),
    ];

    let rows = conn.query(&dialect.columns_query(), &params).await?;
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let (name, data_type, ordinal) = match row.as_slice() {
            [name, data_type, ordinal, ..] => (name, data_type, ordinal),
            _ => {
                return Err(CheckError::execution(
                    dialect.name(),
                    "column catalog query returned too few columns",
                ))
            }
        };
        columns.push(ColumnMeta::new(
            name.canonical_text(),
            data_type.canonical_text(),
            ordinal.as_i64().unwrap_or(0) as i32,
        ));
    }

    if columns.is_empty() {
        return Err(CheckError::NotFound(format!("table {}", table)));
    }

    let primary_key = conn
        .query(&dialect.primary_key_query(), &params)
        .await?
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|v| v.canonical_text())
        .collect::<Vec<_>>();

    debug!(
        "Loaded {} columns for {} (primary key: {:?})",
        columns.len(),
        table,
        primary_key
    );

    Ok(TableMeta {
        table: table.clone(),
        columns,
        primary_key,
    })
}

/// List base tables in a schema.
pub async fn list_tables(conn: &dyn SqlConnection, schema: &str) -> Result<Vec<String>> {
    let dialect = DialectImpl::for_connection(conn)?;
    let rows = conn
        .query(&dialect.tables_query(), &[SqlValue::from(schema)])
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|v| v.canonical_text())
        .collect())
}
